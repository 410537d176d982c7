use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 單筆監控紀錄（JSON 物件，保留欄位順序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Record {
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Looks up a dotted path such as `data.meta_data.host` or `hits.0`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = step(current, segment)?;
        }
        Some(current)
    }

    /// Writes `value` at a dotted path, creating intermediate objects. Fails
    /// when an intermediate segment exists but is not an object.
    pub fn set_path(&mut self, path: &str, value: Value) -> bool {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };

        let mut current = &mut self.data;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(map) => current = map,
                _ => return false,
            }
        }
        current.insert(last.to_string(), value);
        true
    }
}

impl From<Map<String, Value>> for Record {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

/// One step of a dotted path: object key, or array index.
pub fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Resolves a dotted path from an arbitrary JSON value. An empty path is the
/// value itself.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, step)
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub source: String,
    pub records: Vec<Record>,
    /// Hit count reported by the server, when it reports one.
    pub total: Option<u64>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedRecord {
    pub key: String,
    pub sources: Vec<String>,
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedRecord {
    pub source: String,
    pub key: String,
    pub record: Record,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedRecord>,
    pub unmatched: Vec<UnmatchedRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub fetched: Vec<(String, usize)>,
    pub matched: usize,
    pub unmatched: usize,
}
