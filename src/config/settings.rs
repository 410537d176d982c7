use crate::config::ini::{IniDocument, DEFAULT_SECTION};
use crate::core::key::{KeySpec, KeyTemplate};
use crate::utils::error::{MonitError, Result};
use crate::utils::validation::{
    parse_bool, parse_choice, parse_number, validate_non_empty_string, validate_range,
    validate_url, Validate,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_SECTION: &str = "client";
pub const MATCH_SECTION: &str = "match";
pub const OUTPUT_SECTION: &str = "output";

const RESERVED_SECTIONS: [&str; 4] = [DEFAULT_SECTION, CLIENT_SECTION, MATCH_SECTION, OUTPUT_SECTION];

const MSEARCH_RECORDS: &str = "responses.0.hits.hits";
const MSEARCH_RECORD_FIELD: &str = "_source";

#[derive(Debug, Clone)]
pub struct Settings {
    pub client: ClientSettings,
    pub matching: MatchSettings,
    pub output: OutputSettings,
    pub sources: Vec<SourceSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinMode {
    #[default]
    Inner,
    Left,
    Outer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Error,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchSettings {
    pub mode: JoinMode,
    pub duplicates: DuplicatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Pretty,
    JsonLines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSearchTarget {
    pub url: String,
    pub index: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSettings {
    pub path: Option<PathBuf>,
    pub format: OutputFormat,
    pub include_unmatched: bool,
    pub opensearch: Option<OpenSearchTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// `_msearch` query against one OpenSearch index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub index: String,
    pub fields: Vec<String>,
    pub selection: Value,
    pub gte: String,
    pub lte: String,
    pub time_field: String,
    pub sort_field: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    Json {
        method: HttpMethod,
        params: Vec<(String, String)>,
    },
    Msearch(SearchQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    /// Dotted path to the record array in the response body.
    pub records_path: String,
    /// Dotted path inside each array item to the record itself.
    pub record_field: Option<String>,
    pub key: KeySpec,
    pub allow_empty: bool,
}

impl Settings {
    /// 從 INI 檔案載入並驗證設定；相對路徑以設定檔所在目錄為基準
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let document = IniDocument::from_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_document(&document, base_dir)
    }

    pub fn from_document(doc: &IniDocument, base_dir: &Path) -> Result<Self> {
        let client = parse_client(doc)?;
        let matching = parse_match(doc)?;
        let output = parse_output(doc)?;

        let names = source_names(doc)?;
        let sources = names
            .iter()
            .map(|name| parse_source(doc, name, base_dir))
            .collect::<Result<Vec<_>>>()?;

        let settings = Self {
            client,
            matching,
            output,
            sources,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// 以 `now - interval` 到 `now` 取代所有 msearch 來源的時間範圍
    pub fn apply_interval(&mut self, interval: Duration, now: chrono::DateTime<chrono::Utc>) {
        let span = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        let start = now.checked_sub_signed(span).unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let gte = start.timestamp_millis().to_string();
        let lte = now.timestamp_millis().to_string();

        for source in &mut self.sources {
            if let SourceKind::Msearch(query) = &mut source.kind {
                query.gte = gte.clone();
                query.lte = lte.clone();
            }
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.name == name)
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validate_range("client.retries", self.client.retries, 0, 10)?;
        if self.client.timeout.is_zero() {
            return Err(MonitError::InvalidConfigValueError {
                field: "client.timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "Timeout must be at least one second".to_string(),
            });
        }

        if self.sources.len() < 2 {
            return Err(MonitError::config(format!(
                "at least two source sections are needed for matching, found {}",
                self.sources.len()
            )));
        }

        for source in &self.sources {
            validate_url(&format!("{}.url", source.name), &source.url)?;
            if let SourceKind::Msearch(query) = &source.kind {
                validate_non_empty_string(&format!("{}.index", source.name), &query.index)?;
                validate_non_empty_string(&format!("{}.gte", source.name), &query.gte)?;
                validate_non_empty_string(&format!("{}.lte", source.name), &query.lte)?;
            }
        }

        if let Some(target) = &self.output.opensearch {
            validate_url("output.opensearch_url", &target.url)?;
            validate_non_empty_string("output.opensearch_index", &target.index)?;
        }

        Ok(())
    }
}

fn parse_client(doc: &IniDocument) -> Result<ClientSettings> {
    let mut client = ClientSettings::default();
    if let Some(value) = doc.get(CLIENT_SECTION, "timeout_secs") {
        client.timeout = Duration::from_secs(parse_number("client.timeout_secs", value)?);
    }
    if let Some(value) = doc.get(CLIENT_SECTION, "retries") {
        client.retries = parse_number("client.retries", value)?;
    }
    if let Some(value) = doc.get(CLIENT_SECTION, "backoff_ms") {
        client.backoff = Duration::from_millis(parse_number("client.backoff_ms", value)?);
    }
    Ok(client)
}

fn parse_match(doc: &IniDocument) -> Result<MatchSettings> {
    let mut matching = MatchSettings::default();
    if let Some(value) = doc.get(MATCH_SECTION, "mode") {
        matching.mode = parse_choice(
            "match.mode",
            value,
            &[
                ("inner", JoinMode::Inner),
                ("left", JoinMode::Left),
                ("outer", JoinMode::Outer),
            ],
        )?;
    }
    if let Some(value) = doc.get(MATCH_SECTION, "duplicates") {
        matching.duplicates = parse_choice(
            "match.duplicates",
            value,
            &[
                ("error", DuplicatePolicy::Error),
                ("merge", DuplicatePolicy::Merge),
            ],
        )?;
    }
    Ok(matching)
}

fn parse_output(doc: &IniDocument) -> Result<OutputSettings> {
    let mut output = OutputSettings::default();
    if let Some(value) = section_value(doc, OUTPUT_SECTION, "path") {
        output.path = Some(PathBuf::from(value));
    }
    if let Some(value) = section_value(doc, OUTPUT_SECTION, "format") {
        output.format = parse_choice(
            "output.format",
            value,
            &[
                ("pretty", OutputFormat::Pretty),
                ("jsonl", OutputFormat::JsonLines),
            ],
        )?;
    }
    if let Some(value) = section_value(doc, OUTPUT_SECTION, "include_unmatched") {
        output.include_unmatched = parse_bool("output.include_unmatched", value)?;
    }

    let url = section_value(doc, OUTPUT_SECTION, "opensearch_url");
    let index = section_value(doc, OUTPUT_SECTION, "opensearch_index");
    output.opensearch = match (url, index) {
        (Some(url), Some(index)) => Some(OpenSearchTarget {
            url: url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        }),
        (None, None) => None,
        _ => {
            return Err(MonitError::config(
                "output.opensearch_url and output.opensearch_index must be set together",
            ))
        }
    };
    Ok(output)
}

/// Options of the reserved sections are not inherited from `DEFAULT`, so a
/// shared `url` for the sources cannot leak into `[output]`.
fn section_value<'a>(doc: &'a IniDocument, section: &str, option: &str) -> Option<&'a str> {
    doc.section(section)
        .and_then(|options| options.get(option))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn source_names(doc: &IniDocument) -> Result<Vec<String>> {
    let candidates: Vec<&str> = doc
        .section_names()
        .filter(|name| !RESERVED_SECTIONS.contains(name))
        .collect();

    match doc.get(MATCH_SECTION, "sources") {
        Some(list) => {
            let names = split_list(list);
            for (position, name) in names.iter().enumerate() {
                if names[..position].contains(name) {
                    return Err(MonitError::InvalidConfigValueError {
                        field: "match.sources".to_string(),
                        value: name.clone(),
                        reason: "Source is listed more than once".to_string(),
                    });
                }
                if !candidates.contains(&name.as_str()) {
                    return Err(MonitError::InvalidConfigValueError {
                        field: "match.sources".to_string(),
                        value: name.clone(),
                        reason: "No source section with this name".to_string(),
                    });
                }
            }
            Ok(names)
        }
        None => Ok(candidates.into_iter().map(str::to_string).collect()),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn require<'a>(doc: &'a IniDocument, section: &str, option: &str) -> Result<&'a str> {
    doc.get(section, option)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            MonitError::config(format!("[{}] is missing required option '{}'", section, option))
        })
}

fn parse_source(doc: &IniDocument, name: &str, base_dir: &Path) -> Result<SourceSettings> {
    let url = require(doc, name, "url")?.to_string();

    let kind_name = match doc.get(name, "kind") {
        Some(kind) => kind.trim().to_ascii_lowercase(),
        None if doc.get(name, "index").is_some() => "msearch".to_string(),
        None => "json".to_string(),
    };

    let kind = match kind_name.as_str() {
        "json" => SourceKind::Json {
            method: match doc.get(name, "method") {
                Some(method) => parse_choice(
                    &format!("{}.method", name),
                    method,
                    &[("get", HttpMethod::Get), ("post", HttpMethod::Post)],
                )?,
                None => HttpMethod::Get,
            },
            params: doc
                .section(name)
                .into_iter()
                .flatten()
                .filter_map(|(key, value)| {
                    key.strip_prefix("param.")
                        .map(|param| (param.to_string(), value.clone()))
                })
                .collect(),
        },
        "msearch" => SourceKind::Msearch(parse_search(doc, name, base_dir)?),
        other => {
            return Err(MonitError::InvalidConfigValueError {
                field: format!("{}.kind", name),
                value: other.to_string(),
                reason: "Expected one of: json, msearch".to_string(),
            })
        }
    };

    let (default_records, default_field) = match kind {
        SourceKind::Json { .. } => ("", None),
        SourceKind::Msearch(_) => (MSEARCH_RECORDS, Some(MSEARCH_RECORD_FIELD)),
    };
    let records_path = doc.get(name, "records").unwrap_or(default_records).to_string();
    let record_field = doc
        .get(name, "record_field")
        .or(default_field)
        .filter(|field| !field.is_empty())
        .map(str::to_string);

    let template = doc
        .get(name, "key_template")
        .map(KeyTemplate::parse)
        .transpose()
        .map_err(|e| match e {
            MonitError::InvalidConfigValueError { value, reason, .. } => {
                MonitError::InvalidConfigValueError {
                    field: format!("{}.key_template", name),
                    value,
                    reason,
                }
            }
            other => other,
        })?;
    let field = doc
        .get(name, "key")
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    let key = KeySpec::new(field, template)
        .map_err(|_| MonitError::config(format!("[{}] needs 'key' or 'key_template'", name)))?;

    let allow_empty = match doc.get(name, "allow_empty") {
        Some(value) => parse_bool(&format!("{}.allow_empty", name), value)?,
        None => false,
    };

    Ok(SourceSettings {
        name: name.to_string(),
        url,
        kind,
        records_path,
        record_field,
        key,
        allow_empty,
    })
}

fn parse_search(doc: &IniDocument, name: &str, base_dir: &Path) -> Result<SearchQuery> {
    let selection = match doc.get(name, "selection").map(str::trim) {
        None | Some("") => serde_json::json!({ "match_all": {} }),
        Some(inline) if inline.starts_with('{') || inline.starts_with('[') => {
            serde_json::from_str(inline).map_err(|e| MonitError::InvalidConfigValueError {
                field: format!("{}.selection", name),
                value: inline.to_string(),
                reason: format!("Invalid JSON: {}", e),
            })?
        }
        Some(path) => read_selection(&base_dir.join(path), name)?,
    };

    let size = match doc.get(name, "size") {
        Some(value) => parse_number(&format!("{}.size", name), value)?,
        None => 500,
    };

    Ok(SearchQuery {
        index: require(doc, name, "index")?.to_string(),
        fields: doc.get(name, "fields").map(split_list).unwrap_or_default(),
        selection,
        gte: require(doc, name, "gte")?.to_string(),
        lte: require(doc, name, "lte")?.to_string(),
        time_field: doc
            .get(name, "time_field")
            .unwrap_or("metadata.timestamp")
            .to_string(),
        sort_field: doc
            .get(name, "sort_field")
            .unwrap_or("data.RecordTime")
            .to_string(),
        size,
    })
}

/// 讀取 OpenSearch 查詢條件的 JSON 檔
fn read_selection(path: &Path, source: &str) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MonitError::config(format!(
            "[{}] selection file '{}' cannot be read: {}",
            source,
            path.display(),
            e
        ))
    })?;
    tracing::info!("📄 Selection file loaded for '{}': {}", source, path.display());
    serde_json::from_str(&content).map_err(|e| {
        MonitError::config(format!(
            "[{}] selection file '{}' is not valid JSON: {}",
            source,
            path.display(),
            e
        ))
    })
}
