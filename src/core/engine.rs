use crate::config::settings::{MatchSettings, SourceSettings};
use crate::core::matcher::Matcher;
use crate::domain::model::RunSummary;
use crate::domain::ports::{QueryClient, Sink};
use crate::utils::error::Result;

/// 依序查詢各來源、配對並輸出結果
pub struct Correlator<C: QueryClient> {
    client: C,
    sources: Vec<SourceSettings>,
    matching: MatchSettings,
}

impl<C: QueryClient> Correlator<C> {
    pub fn new(client: C, sources: Vec<SourceSettings>, matching: MatchSettings) -> Self {
        Self {
            client,
            sources,
            matching,
        }
    }

    pub async fn run(&self, sinks: &mut [Box<dyn Sink>]) -> Result<RunSummary> {
        tracing::info!("🚀 Starting correlation over {} sources", self.sources.len());

        // Query
        let mut results = Vec::with_capacity(self.sources.len());
        let mut fetched = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let result = self.client.fetch(source).await?;
            tracing::info!("📥 {}: {} records", source.name, result.len());
            fetched.push((source.name.clone(), result.len()));
            results.push(result);
        }

        // Match
        let outcome = Matcher::from_sources(self.matching, &self.sources).correlate(results)?;
        for matched in &outcome.matched {
            tracing::debug!("Merged ({}):\n{:#?}", matched.key, matched.record.data);
        }
        for unmatched in &outcome.unmatched {
            tracing::debug!("No match ({}): {}", unmatched.source, unmatched.key);
        }

        tracing::info!("📊 Statistics");
        for (name, count) in &fetched {
            tracing::info!("📊   N {}: {}", name, count);
        }
        tracing::info!("📊   N merged: {}", outcome.matched.len());
        tracing::info!("📊   N no match: {}", outcome.unmatched.len());

        // Output
        for sink in sinks.iter_mut() {
            tracing::debug!("Writing results to {} sink", sink.name());
            sink.emit(&outcome).await?;
        }

        Ok(RunSummary {
            fetched,
            matched: outcome.matched.len(),
            unmatched: outcome.unmatched.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{HttpMethod, SourceKind};
    use crate::core::key::KeySpec;
    use crate::domain::model::{MatchOutcome, QueryResult, Record};
    use crate::utils::error::MonitError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct MockClient {
        responses: HashMap<String, Vec<Value>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl QueryClient for MockClient {
        async fn fetch(&self, source: &SourceSettings) -> Result<QueryResult> {
            self.calls.lock().unwrap().push(source.name.clone());
            let values = self.responses.get(&source.name).cloned().ok_or_else(|| {
                MonitError::HttpStatusError {
                    name: source.name.clone(),
                    status: 404,
                    body: String::new(),
                }
            })?;
            Ok(QueryResult {
                source: source.name.clone(),
                records: values
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::Object(map) => Some(Record::new(map)),
                        _ => None,
                    })
                    .collect(),
                total: None,
            })
        }
    }

    struct CollectingSink {
        seen: Arc<Mutex<Vec<MatchOutcome>>>,
    }

    #[async_trait]
    impl Sink for CollectingSink {
        fn name(&self) -> &str {
            "collect"
        }

        async fn emit(&mut self, outcome: &MatchOutcome) -> Result<()> {
            self.seen.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    fn source(name: &str) -> SourceSettings {
        SourceSettings {
            name: name.to_string(),
            url: format!("http://localhost/{}", name),
            kind: SourceKind::Json {
                method: HttpMethod::Get,
                params: vec![],
            },
            records_path: String::new(),
            record_field: None,
            key: KeySpec::field("host"),
            allow_empty: false,
        }
    }

    #[tokio::test]
    async fn test_run_queries_matches_and_emits() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = MockClient {
            responses: HashMap::from([
                ("a".to_string(), vec![json!({"host": "a", "val": 1})]),
                (
                    "b".to_string(),
                    vec![json!({"host": "a", "status": "ok"}), json!({"host": "z"})],
                ),
            ]),
            calls: calls.clone(),
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CollectingSink { seen: seen.clone() })];

        let correlator =
            Correlator::new(client, vec![source("a"), source("b")], MatchSettings::default());
        let summary = correlator.run(&mut sinks).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(
            summary,
            RunSummary {
                fetched: vec![("a".to_string(), 1), ("b".to_string(), 2)],
                matched: 1,
                unmatched: 1,
            }
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            serde_json::to_value(&seen[0].matched[0].record).unwrap(),
            json!({"host": "a", "val": 1, "status": "ok"})
        );
    }

    #[tokio::test]
    async fn test_query_failure_stops_before_output() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = MockClient {
            responses: HashMap::from([("b".to_string(), vec![json!({"host": "a"})])]),
            calls: calls.clone(),
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CollectingSink { seen: seen.clone() })];

        let correlator =
            Correlator::new(client, vec![source("a"), source("b")], MatchSettings::default());
        let err = correlator.run(&mut sinks).await.unwrap_err();

        assert!(matches!(err, MonitError::HttpStatusError { status: 404, .. }));
        assert_eq!(*calls.lock().unwrap(), vec!["a"]);
        assert!(seen.lock().unwrap().is_empty());
    }
}
