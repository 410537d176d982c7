pub mod credential;
pub mod engine;
pub mod key;
pub mod matcher;
pub mod query;
pub mod sink;

pub use crate::domain::model::{MatchOutcome, QueryResult, Record, RunSummary};
pub use crate::domain::ports::{QueryClient, Sink};
pub use crate::utils::error::Result;
