use crate::config::settings::{ClientSettings, HttpMethod, SearchQuery, SourceKind, SourceSettings};
use crate::core::credential::Credential;
use crate::domain::model::{lookup, QueryResult, Record};
use crate::domain::ports::QueryClient;
use crate::utils::error::{MonitError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

const NDJSON: &str = "application/x-ndjson";

/// 組出單一來源的 HTTP 請求內容（尚未送出）
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub content_type: Option<&'static str>,
    pub body: Option<String>,
}

impl PreparedRequest {
    pub fn for_source(source: &SourceSettings) -> Result<Self> {
        match &source.kind {
            SourceKind::Json { method, params } => Ok(Self {
                method: *method,
                url: source.url.clone(),
                params: params.clone(),
                content_type: None,
                body: None,
            }),
            SourceKind::Msearch(query) => Ok(Self {
                method: HttpMethod::Post,
                url: source.url.clone(),
                params: Vec::new(),
                content_type: Some(NDJSON),
                body: Some(msearch_body(query)?),
            }),
        }
    }
}

/// `_msearch` payload: one header line and one query line, each ending in `\n`.
pub fn msearch_body(query: &SearchQuery) -> Result<String> {
    let head = json!({
        "search_type": "query_then_fetch",
        "ignore_unavailable": true,
        "index": [query.index],
    });

    let mut source_filter = json!({});
    if !query.fields.is_empty() {
        source_filter["includes"] = json!(query.fields);
    }

    let body = json!({
        "sort": [
            { query.sort_field.as_str(): { "order": "desc", "unmapped_type": "boolean" } }
        ],
        "size": query.size,
        "version": true,
        "_source": source_filter,
        "query": {
            "bool": {
                "must": query.selection,
                "filter": [
                    {
                        "range": {
                            query.time_field.as_str(): { "gte": query.gte, "lte": query.lte }
                        }
                    }
                ]
            }
        }
    });

    let head = serde_json::to_string(&head)?;
    let body = serde_json::to_string(&body)?;
    tracing::debug!("Query head created: {}", head);
    tracing::debug!("Query body created: {}", body);
    Ok(format!("{}\n{}\n", head, body))
}

/// Turns a response body into records following the source's
/// `records`/`record_field` paths.
pub fn parse_response(source: &SourceSettings, body: &Value) -> Result<QueryResult> {
    let malformed = |message: String| MonitError::MalformedResponseError {
        name: source.name.clone(),
        message,
    };

    if let SourceKind::Msearch(_) = source.kind {
        if let Some(error) = lookup(body, "responses.0.error") {
            let reason = lookup(error, "reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(MonitError::QueryError {
                name: source.name.clone(),
                message: format!("search failed: {}", reason),
            });
        }
    }

    let container = lookup(body, &source.records_path).ok_or_else(|| {
        malformed(format!("no value at records path '{}'", source.records_path))
    })?;

    let items: Vec<&Value> = match container {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) if source.records_path.is_empty() => vec![container],
        other => {
            return Err(malformed(format!(
                "expected an array at '{}', found {}",
                source.records_path,
                json_kind(other)
            )))
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let value = match &source.record_field {
            Some(field) => lookup(item, field).ok_or_else(|| {
                malformed(format!("item {} has no '{}'", index, field))
            })?,
            None => item,
        };
        match value {
            Value::Object(map) => records.push(Record::new(map.clone())),
            other => {
                return Err(malformed(format!(
                    "item {} is {}, expected an object",
                    index,
                    json_kind(other)
                )))
            }
        }
    }

    let total = match source.kind {
        SourceKind::Msearch(_) => lookup(body, "responses.0.hits.total.value")
            .or_else(|| lookup(body, "responses.0.hits.total"))
            .and_then(Value::as_u64),
        SourceKind::Json { .. } => None,
    };

    Ok(QueryResult {
        source: source.name.clone(),
        records,
        total,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Bearer-authenticated client for the monitoring endpoints.
pub struct HttpQueryClient {
    client: Client,
    credential: Credential,
    retries: u32,
    backoff: Duration,
}

impl HttpQueryClient {
    pub fn new(settings: &ClientSettings, credential: Credential) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("cms-monit-match/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            credential,
            retries: settings.retries,
            backoff: settings.backoff,
        })
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn send(&self, name: &str, request: &PreparedRequest) -> Result<Value> {
        let mut attempt = 0;
        loop {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };
            builder = builder.header(header::AUTHORIZATION, self.credential.bearer_header());
            if !request.params.is_empty() {
                builder = builder.query(&request.params);
            }
            if let Some(content_type) = request.content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let retry_left = attempt < self.retries;
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    tracing::info!("📡 {}: request status {}", name, status.as_u16());

                    if status.is_success() {
                        let text = response.text().await?;
                        return serde_json::from_str(&text).map_err(|e| {
                            MonitError::MalformedResponseError {
                                name: name.to_string(),
                                message: format!("body is not JSON: {}", e),
                            }
                        });
                    }

                    if is_transient(status) && retry_left {
                        tracing::warn!(
                            "⚠️ {}: HTTP {}, retrying ({}/{})",
                            name,
                            status.as_u16(),
                            attempt + 1,
                            self.retries
                        );
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        tracing::error!("❌ {}: request failed ({})", name, status.as_u16());
                        return Err(MonitError::HttpStatusError {
                            name: name.to_string(),
                            status: status.as_u16(),
                            body: body.chars().take(512).collect(),
                        });
                    }
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && retry_left => {
                    tracing::warn!(
                        "⚠️ {}: {}, retrying ({}/{})",
                        name,
                        e,
                        attempt + 1,
                        self.retries
                    );
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.backoff_for(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn fetch(&self, source: &SourceSettings) -> Result<QueryResult> {
        let request = PreparedRequest::for_source(source)?;
        tracing::info!(
            "📡 {}: {:?} {} (Authorization: {})",
            source.name,
            request.method,
            request.url,
            Credential::REDACTED
        );
        if let Some(body) = &request.body {
            tracing::debug!("📡 {}: query:\n{}", source.name, body);
        }

        let body = self.send(&source.name, &request).await?;
        let result = parse_response(source, &body)?;

        if let Some(total) = result.total {
            tracing::info!("📡 {}: {} hits in total, {} returned", source.name, total, result.len());
        }
        if result.is_empty() && !source.allow_empty {
            return Err(MonitError::QueryError {
                name: source.name.clone(),
                message: "no data available".to_string(),
            });
        }
        Ok(result)
    }
}
