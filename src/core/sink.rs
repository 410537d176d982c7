use crate::config::settings::{OpenSearchTarget, OutputFormat};
use crate::core::credential::Credential;
use crate::domain::model::{MatchOutcome, Record};
use crate::domain::ports::Sink;
use crate::utils::error::{MonitError, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Writes matched records (and optionally the unmatched ones) as JSON.
pub struct JsonSink<W: Write + Send> {
    writer: W,
    format: OutputFormat,
    include_unmatched: bool,
}

#[derive(Serialize)]
struct UnmatchedLine<'a> {
    unmatched: bool,
    source: &'a str,
    key: &'a str,
    record: &'a Record,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W, format: OutputFormat, include_unmatched: bool) -> Self {
        Self {
            writer,
            format,
            include_unmatched,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn documents(&self, outcome: &MatchOutcome) -> Result<Vec<Value>> {
        let mut documents = outcome
            .matched
            .iter()
            .map(|m| serde_json::to_value(&m.record))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if self.include_unmatched {
            for u in &outcome.unmatched {
                documents.push(serde_json::to_value(UnmatchedLine {
                    unmatched: true,
                    source: &u.source,
                    key: &u.key,
                    record: &u.record,
                })?);
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl<W: Write + Send> Sink for JsonSink<W> {
    fn name(&self) -> &str {
        "json"
    }

    async fn emit(&mut self, outcome: &MatchOutcome) -> Result<()> {
        let documents = self.documents(outcome)?;
        match self.format {
            OutputFormat::Pretty => {
                serde_json::to_writer_pretty(&mut self.writer, &documents)?;
                writeln!(self.writer)?;
            }
            OutputFormat::JsonLines => {
                for document in &documents {
                    serde_json::to_writer(&mut self.writer, document)?;
                    writeln!(self.writer)?;
                }
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// 配對成功後才寫入輸出檔：先寫暫存檔再改名，失敗的執行不會動到舊結果
pub struct JsonFileSink {
    path: PathBuf,
    format: OutputFormat,
    include_unmatched: bool,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat, include_unmatched: bool) -> Self {
        Self {
            path: path.into(),
            format,
            include_unmatched,
        }
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn emit(&mut self, outcome: &MatchOutcome) -> Result<()> {
        let mut rendered = JsonSink::new(Vec::new(), self.format, self.include_unmatched);
        rendered.emit(outcome).await?;

        let partial = self.partial_path();
        tokio::fs::write(&partial, rendered.into_inner())
            .await
            .map_err(|e| {
                MonitError::output(format!("cannot write '{}': {}", partial.display(), e))
            })?;
        tokio::fs::rename(&partial, &self.path).await.map_err(|e| {
            MonitError::output(format!(
                "cannot move results into '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::info!("📁 Results written to {}", self.path.display());
        Ok(())
    }
}

/// 以 `_bulk` API 將配對結果寫入 OpenSearch 相容的索引
pub struct OpenSearchSink {
    client: Client,
    target: OpenSearchTarget,
    credential: Credential,
}

impl OpenSearchSink {
    pub fn new(target: OpenSearchTarget, credential: Credential, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            target,
            credential,
        })
    }

    /// One `index` action per matched record; `_id` is the join key.
    pub fn bulk_body(index: &str, outcome: &MatchOutcome) -> Result<String> {
        let mut body = String::new();
        for matched in &outcome.matched {
            let action = json!({ "index": { "_index": index, "_id": matched.key } });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&matched.record)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl Sink for OpenSearchSink {
    fn name(&self) -> &str {
        "opensearch"
    }

    async fn emit(&mut self, outcome: &MatchOutcome) -> Result<()> {
        if outcome.matched.is_empty() {
            tracing::info!("📤 Nothing to push to OpenSearch");
            return Ok(());
        }

        let body = Self::bulk_body(&self.target.index, outcome)?;
        let url = format!("{}/_bulk", self.target.url);
        tracing::info!(
            "📤 Pushing {} records to {} (index {})",
            outcome.matched.len(),
            url,
            self.target.index
        );

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, self.credential.bearer_header())
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| MonitError::output(format!("OpenSearch bulk request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            MonitError::output(format!("cannot read OpenSearch bulk reply: {}", e))
        })?;
        if !status.is_success() {
            return Err(MonitError::output(format!(
                "OpenSearch bulk request failed with HTTP {}: {}",
                status.as_u16(),
                text.chars().take(512).collect::<String>()
            )));
        }

        let reply: Value = serde_json::from_str(&text)
            .map_err(|e| MonitError::output(format!("OpenSearch reply is not JSON: {}", e)))?;
        if reply.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let failed = reply
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| item.pointer("/index/error").is_some())
                        .count()
                })
                .unwrap_or(0);
            return Err(MonitError::output(format!(
                "OpenSearch rejected {} of {} documents",
                failed,
                outcome.matched.len()
            )));
        }

        tracing::info!("📤 OpenSearch accepted {} documents", outcome.matched.len());
        Ok(())
    }
}
