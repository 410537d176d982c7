use crate::config::settings::SourceSettings;
use crate::domain::model::{MatchOutcome, QueryResult};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 對單一資料來源發出查詢
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn fetch(&self, source: &SourceSettings) -> Result<QueryResult>;
}

/// 比對結果的輸出端
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;
    async fn emit(&mut self, outcome: &MatchOutcome) -> Result<()>;
}
