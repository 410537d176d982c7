use crate::config::settings::{DuplicatePolicy, JoinMode, MatchSettings, SourceSettings};
use crate::core::key::KeySpec;
use crate::domain::model::{MatchOutcome, MatchedRecord, QueryResult, Record, UnmatchedRecord};
use crate::utils::error::{MonitError, Result};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

/// Records of one source, keyed and de-duplicated.
struct KeyedSource {
    name: String,
    records: IndexMap<String, Record>,
}

/// 依設定的鍵將多個來源的紀錄配對合併
pub struct Matcher {
    settings: MatchSettings,
    keys: IndexMap<String, KeySpec>,
}

impl Matcher {
    pub fn new(settings: MatchSettings, keys: IndexMap<String, KeySpec>) -> Self {
        Self { settings, keys }
    }

    pub fn from_sources(settings: MatchSettings, sources: &[SourceSettings]) -> Self {
        let keys = sources
            .iter()
            .map(|source| (source.name.clone(), source.key.clone()))
            .collect();
        Self::new(settings, keys)
    }

    /// Joins `results` in the given order. The first result is the left side
    /// for `JoinMode::Left`; output order follows the first appearance of
    /// each key across the results.
    pub fn correlate(&self, results: Vec<QueryResult>) -> Result<MatchOutcome> {
        if results.len() < 2 {
            return Err(MonitError::matching(format!(
                "matching needs at least two result sets, got {}",
                results.len()
            )));
        }

        let keyed = results
            .into_iter()
            .map(|result| self.key_source(result))
            .collect::<Result<Vec<_>>>()?;

        let mut all_keys: IndexSet<&str> = IndexSet::new();
        for source in &keyed {
            all_keys.extend(source.records.keys().map(String::as_str));
        }

        let mut outcome = MatchOutcome::default();
        for key in all_keys {
            let present: Vec<(&str, &Record)> = keyed
                .iter()
                .filter_map(|source| {
                    source
                        .records
                        .get(key)
                        .map(|record| (source.name.as_str(), record))
                })
                .collect();

            let include = match self.settings.mode {
                JoinMode::Inner => present.len() == keyed.len(),
                JoinMode::Left => keyed[0].records.contains_key(key),
                JoinMode::Outer => true,
            };

            if include {
                let mut merged = Map::new();
                for (_, record) in &present {
                    merge_into(&mut merged, record.data.clone());
                }
                outcome.matched.push(MatchedRecord {
                    key: key.to_string(),
                    sources: present.iter().map(|(name, _)| name.to_string()).collect(),
                    record: Record::new(merged),
                });
            } else {
                outcome
                    .unmatched
                    .extend(present.into_iter().map(|(name, record)| UnmatchedRecord {
                        source: name.to_string(),
                        key: key.to_string(),
                        record: record.clone(),
                    }));
            }
        }

        tracing::debug!(
            "Matched {} keys, {} records without a match",
            outcome.matched.len(),
            outcome.unmatched.len()
        );
        Ok(outcome)
    }

    fn key_source(&self, result: QueryResult) -> Result<KeyedSource> {
        let spec = self.keys.get(&result.source).ok_or_else(|| {
            MonitError::matching(format!("no key configured for source '{}'", result.source))
        })?;

        let mut records: IndexMap<String, Record> = IndexMap::new();
        for (index, mut record) in result.records.into_iter().enumerate() {
            let key = spec.resolve(&mut record).map_err(|e| {
                MonitError::matching(format!(
                    "source '{}', record #{}: {}",
                    result.source,
                    index,
                    match e {
                        MonitError::MatchError { message } => message,
                        other => other.to_string(),
                    }
                ))
            })?;

            match records.get_mut(&key) {
                Some(existing) => match self.settings.duplicates {
                    DuplicatePolicy::Error => {
                        return Err(MonitError::matching(format!(
                            "source '{}' has more than one record with key '{}'",
                            result.source, key
                        )))
                    }
                    DuplicatePolicy::Merge => {
                        tracing::debug!("{}: folding duplicate key {}", result.source, key);
                        merge_into(&mut existing.data, record.data);
                    }
                },
                None => {
                    records.insert(key, record);
                }
            }
        }

        Ok(KeyedSource {
            name: result.source,
            records,
        })
    }
}

/// Merges `incoming` into `target`:
/// new fields are added, arrays are extended (and de-duplicated when they
/// only hold primitives), nested objects are merged field by field with the
/// same rules, anything else is replaced by the incoming value.
pub fn merge_into(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match target.get_mut(&key) {
            Some(Value::Array(existing)) => {
                match value {
                    Value::Array(items) => existing.extend(items),
                    other => existing.push(other),
                }
                if existing.iter().all(is_primitive) {
                    let mut seen: Vec<Value> = Vec::with_capacity(existing.len());
                    existing.retain(|item| {
                        if seen.contains(item) {
                            false
                        } else {
                            seen.push(item.clone());
                            true
                        }
                    });
                }
            }
            Some(Value::Object(existing)) if value.is_object() => {
                if let Value::Object(fields) = value {
                    merge_into(existing, fields);
                }
            }
            Some(slot) => *slot = value,
            None => {
                target.insert(key, value);
            }
        }
    }
}

fn is_primitive(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::key::KeyTemplate;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => Record::new(map),
            _ => panic!("test record must be an object"),
        }
    }

    fn result(source: &str, values: Vec<Value>) -> QueryResult {
        QueryResult {
            source: source.to_string(),
            records: values.into_iter().map(record).collect(),
            total: None,
        }
    }

    fn matcher(mode: JoinMode, duplicates: DuplicatePolicy, sources: &[&str]) -> Matcher {
        let keys = sources
            .iter()
            .map(|name| (name.to_string(), KeySpec::field("host")))
            .collect();
        Matcher::new(MatchSettings { mode, duplicates }, keys)
    }

    fn inner(sources: &[&str]) -> Matcher {
        matcher(JoinMode::Inner, DuplicatePolicy::Error, sources)
    }

    #[test]
    fn test_shared_key_produces_one_merged_record() {
        let outcome = inner(&["a", "b"])
            .correlate(vec![
                result("a", vec![json!({"host": "a", "val": 1})]),
                result("b", vec![json!({"host": "a", "status": "ok"})]),
            ])
            .unwrap();

        assert_eq!(outcome.matched.len(), 1);
        assert!(outcome.unmatched.is_empty());
        let matched = &outcome.matched[0];
        assert_eq!(matched.key, "a");
        assert_eq!(matched.sources, vec!["a", "b"]);
        assert_eq!(
            serde_json::to_value(&matched.record).unwrap(),
            json!({"host": "a", "val": 1, "status": "ok"})
        );
    }

    #[test]
    fn test_disjoint_keys_match_nothing() {
        let outcome = inner(&["a", "b"])
            .correlate(vec![
                result("a", vec![json!({"host": "x"})]),
                result("b", vec![json!({"host": "y"})]),
            ])
            .unwrap();

        assert!(outcome.matched.is_empty());
        let unmatched: Vec<(&str, &str)> = outcome
            .unmatched
            .iter()
            .map(|u| (u.source.as_str(), u.key.as_str()))
            .collect();
        assert_eq!(unmatched, vec![("a", "x"), ("b", "y")]);
    }

    #[test]
    fn test_left_and_outer_joins() {
        let inputs = || {
            vec![
                result("a", vec![json!({"host": "1"}), json!({"host": "2"})]),
                result("b", vec![json!({"host": "2", "b": true}), json!({"host": "3"})]),
            ]
        };

        let left = matcher(JoinMode::Left, DuplicatePolicy::Error, &["a", "b"])
            .correlate(inputs())
            .unwrap();
        let keys: Vec<&str> = left.matched.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
        assert_eq!(left.matched[0].sources, vec!["a"]);
        assert_eq!(left.matched[1].sources, vec!["a", "b"]);
        assert_eq!(left.unmatched.len(), 1);
        assert_eq!(left.unmatched[0].key, "3");

        let outer = matcher(JoinMode::Outer, DuplicatePolicy::Error, &["a", "b"])
            .correlate(inputs())
            .unwrap();
        let keys: Vec<&str> = outer.matched.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2", "3"]);
        assert!(outer.unmatched.is_empty());
    }

    #[test]
    fn test_three_sources_inner_join() {
        let outcome = inner(&["a", "b", "c"])
            .correlate(vec![
                result("a", vec![json!({"host": "h1", "a": 1}), json!({"host": "h2"})]),
                result("b", vec![json!({"host": "h1", "b": 2}), json!({"host": "h2"})]),
                result("c", vec![json!({"host": "h1", "c": 3})]),
            ])
            .unwrap();

        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(
            serde_json::to_value(&outcome.matched[0].record).unwrap(),
            json!({"host": "h1", "a": 1, "b": 2, "c": 3})
        );
        assert_eq!(outcome.unmatched.len(), 2);
    }

    #[test]
    fn test_duplicate_keys_error_by_default() {
        let err = inner(&["a", "b"])
            .correlate(vec![
                result("a", vec![json!({"host": "h"}), json!({"host": "h"})]),
                result("b", vec![json!({"host": "h"})]),
            ])
            .unwrap_err();

        assert!(matches!(err, MonitError::MatchError { .. }));
        assert!(err.to_string().contains("more than one record with key 'h'"));
    }

    #[test]
    fn test_duplicate_keys_merge_when_configured() {
        let outcome = matcher(JoinMode::Inner, DuplicatePolicy::Merge, &["a", "b"])
            .correlate(vec![
                result(
                    "a",
                    vec![
                        json!({"host": "h", "sites": ["T1"]}),
                        json!({"host": "h", "sites": ["T2", "T1"]}),
                    ],
                ),
                result("b", vec![json!({"host": "h"})]),
            ])
            .unwrap();

        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(
            outcome.matched[0].record.get_path("sites"),
            Some(&json!(["T1", "T2"]))
        );
    }

    #[test]
    fn test_missing_key_fails_loudly() {
        let err = inner(&["a", "b"])
            .correlate(vec![
                result("a", vec![json!({"host": "h"}), json!({"other": 1})]),
                result("b", vec![json!({"host": "h"})]),
            ])
            .unwrap_err();

        assert!(err.to_string().contains("source 'a', record #1"));
    }

    #[test]
    fn test_unknown_source_and_single_result() {
        let err = inner(&["a", "b"])
            .correlate(vec![
                result("a", vec![json!({"host": "h"})]),
                result("zzz", vec![json!({"host": "h"})]),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("zzz"));

        let err = inner(&["a"])
            .correlate(vec![result("a", vec![json!({"host": "h"})])])
            .unwrap_err();
        assert!(err.to_string().contains("at least two"));
    }

    #[test]
    fn test_eos_log_url_join_between_wma_and_htc() {
        let eos = "https://eoscmsweb.cern.ch/eos/cms/store/logs/prod/recent/PRODUCTION";
        let mut keys = IndexMap::new();
        keys.insert(
            "htc".to_string(),
            KeySpec::new(
                Some("data.EOSLogURL".to_string()),
                Some(
                    KeyTemplate::parse(&format!(
                        "{}{{data.WMAgent_SubTaskName}}/{{data.ScheddName}}-{{data.Args#1}}-{{data.Args#2}}-log.tar.gz",
                        eos
                    ))
                    .unwrap(),
                ),
            )
            .unwrap(),
        );
        keys.insert(
            "wma".to_string(),
            KeySpec::new(
                Some("data.EOSLogURL".to_string()),
                Some(
                    KeyTemplate::parse(&format!(
                        "{}{{data.task}}/{{data.meta_data.host}}-{{data.meta_data.fwjr_id}}-log.tar.gz",
                        eos
                    ))
                    .unwrap(),
                ),
            )
            .unwrap(),
        );

        let outcome = Matcher::new(MatchSettings::default(), keys)
            .correlate(vec![
                result(
                    "htc",
                    vec![json!({"data": {
                        "WMAgent_SubTaskName": "/task_A/Proc",
                        "ScheddName": "vocms0255.cern.ch",
                        "Args": "7 1234 0",
                        "CpuEff": 88.5
                    }})],
                ),
                result(
                    "wma",
                    vec![json!({"data": {
                        "task": "/task_A/Proc",
                        "meta_data": {"host": "vocms0255.cern.ch", "fwjr_id": "1234-0"},
                        "EOSLogURL": ""
                    }})],
                ),
            ])
            .unwrap();

        assert_eq!(outcome.matched.len(), 1);
        let merged = &outcome.matched[0];
        assert_eq!(
            merged.key,
            format!("{}/task_A/Proc/vocms0255.cern.ch-1234-0-log.tar.gz", eos)
        );
        assert_eq!(merged.record.get_path("data.CpuEff"), Some(&json!(88.5)));
        assert_eq!(
            merged.record.get_path("data.meta_data.host"),
            Some(&json!("vocms0255.cern.ch"))
        );
        assert_eq!(
            merged.record.get_path("data.EOSLogURL"),
            Some(&json!(merged.key))
        );
    }

    #[test]
    fn test_merge_rules() {
        let mut target = match json!({
            "list": [1, 2],
            "nested": {"a": 1, "b": 1},
            "scalar": "old",
            "objects": [{"x": 1}]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let incoming = match json!({
            "list": 2,
            "nested": {"b": 2, "c": 3},
            "scalar": "new",
            "objects": [{"x": 1}],
            "added": true
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        merge_into(&mut target, incoming);

        assert_eq!(
            Value::Object(target),
            json!({
                "list": [1, 2],
                "nested": {"a": 1, "b": 2, "c": 3},
                "scalar": "new",
                "objects": [{"x": 1}, {"x": 1}],
                "added": true
            })
        );
    }

    #[test]
    fn test_overlapping_fields_under_data_are_combined() {
        let keys = ["htc", "wma"]
            .iter()
            .map(|name| (name.to_string(), KeySpec::field("data.EOSLogURL")))
            .collect();

        let outcome = Matcher::new(MatchSettings::default(), keys)
            .correlate(vec![
                result(
                    "htc",
                    vec![json!({"data": {"EOSLogURL": "u", "Sites": ["T1"], "meta_data": {"a": 1}}})],
                ),
                result(
                    "wma",
                    vec![json!({"data": {"EOSLogURL": "u", "Sites": ["T2"], "meta_data": {"b": 2}}})],
                ),
            ])
            .unwrap();

        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(
            serde_json::to_value(&outcome.matched[0].record).unwrap(),
            json!({"data": {
                "EOSLogURL": "u",
                "Sites": ["T1", "T2"],
                "meta_data": {"a": 1, "b": 2}
            }})
        );
    }
}
