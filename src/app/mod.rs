// Application layer: wires config, credential, query client, matcher and sinks
// for a single run.

use crate::config::settings::{OutputSettings, Settings};
use crate::core::credential::{Credential, TOKEN_ENV};
use crate::core::engine::Correlator;
use crate::core::query::{HttpQueryClient, PreparedRequest};
use crate::core::sink::{JsonFileSink, JsonSink, OpenSearchSink};
use crate::domain::model::RunSummary;
use crate::domain::ports::Sink;
use crate::utils::error::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub config: PathBuf,
    pub interval: Option<Duration>,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            interval: None,
            output: None,
            dry_run: false,
        }
    }
}

/// 載入設定並執行一次完整的比對流程
///
/// `env` resolves environment variables; only the bearer token is read
/// through it. Returns `None` for a dry run.
pub async fn run<F>(options: &RunOptions, env: F) -> Result<Option<RunSummary>>
where
    F: Fn(&str) -> Option<String>,
{
    tracing::info!("📁 Loading configuration from: {}", options.config.display());
    let mut settings = Settings::from_file(&options.config)?;
    if let Some(interval) = options.interval {
        tracing::info!("🔧 Query window overridden to the last {:?}", interval);
        settings.apply_interval(interval, chrono::Utc::now());
    }
    if let Some(output) = &options.output {
        settings.output.path = Some(output.clone());
    }
    tracing::info!(
        "✅ Configuration loaded: sources [{}], mode {:?}, duplicates {:?}",
        settings
            .sources
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        settings.matching.mode,
        settings.matching.duplicates
    );

    if options.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No requests will be sent");
        perform_dry_run(&settings)?;
        return Ok(None);
    }

    let credential = Credential::from_lookup(TOKEN_ENV, env)?;
    let client = HttpQueryClient::new(&settings.client, credential.clone())?;
    let mut sinks = build_sinks(&settings.output, &credential, settings.client.timeout)?;

    let correlator = Correlator::new(client, settings.sources, settings.matching);
    let summary = correlator.run(&mut sinks).await?;
    Ok(Some(summary))
}

fn perform_dry_run(settings: &Settings) -> Result<()> {
    for source in &settings.sources {
        let request = PreparedRequest::for_source(source)?;
        println!("[{}] {:?} {}", source.name, request.method, request.url);
        for (name, value) in &request.params {
            println!("  param {} = {}", name, value);
        }
        if let Some(body) = &request.body {
            print!("{}", body);
        }
    }
    Ok(())
}

fn build_sinks(
    output: &OutputSettings,
    credential: &Credential,
    timeout: Duration,
) -> Result<Vec<Box<dyn Sink>>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    match &output.path {
        Some(path) => {
            tracing::info!("📁 Matched records will be written to {}", path.display());
            sinks.push(Box::new(JsonFileSink::new(
                path.clone(),
                output.format,
                output.include_unmatched,
            )));
        }
        None => sinks.push(Box::new(JsonSink::new(
            std::io::stdout(),
            output.format,
            output.include_unmatched,
        ))),
    }

    if let Some(target) = &output.opensearch {
        sinks.push(Box::new(OpenSearchSink::new(
            target.clone(),
            credential.clone(),
            timeout,
        )?));
    }

    Ok(sinks)
}
