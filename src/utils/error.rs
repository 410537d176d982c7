use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ('{value}'): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing credential: environment variable {var} is not set or empty")]
    MissingCredentialError { var: String },

    #[error("Query to source '{name}' failed with HTTP {status}: {body}")]
    HttpStatusError {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Query to source '{name}' returned a malformed response: {message}")]
    MalformedResponseError { name: String, message: String },

    #[error("Query to source '{name}' failed: {message}")]
    QueryError { name: String, message: String },

    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Matching error: {message}")]
    MatchError { message: String },

    #[error("Output error: {message}")]
    OutputError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Credential,
    Query,
    Matching,
    Output,
    System,
}

impl MonitError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn matching(message: impl Into<String>) -> Self {
        Self::MatchError {
            message: message.into(),
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::OutputError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. } | Self::InvalidConfigValueError { .. } => {
                ErrorCategory::Configuration
            }
            Self::MissingCredentialError { .. } => ErrorCategory::Credential,
            Self::HttpStatusError { .. }
            | Self::MalformedResponseError { .. }
            | Self::QueryError { .. }
            | Self::ApiError(_) => ErrorCategory::Query,
            Self::MatchError { .. } => ErrorCategory::Matching,
            Self::OutputError { .. } => ErrorCategory::Output,
            Self::IoError(_) | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    /// 每個錯誤類別對應的行程結束碼，皆為非零
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::System => 1,
            ErrorCategory::Configuration => 2,
            ErrorCategory::Credential => 3,
            ErrorCategory::Query => 4,
            ErrorCategory::Matching => 5,
            ErrorCategory::Output => 6,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::ConfigError { .. } => {
                "Check that the config file exists and is valid INI".to_string()
            }
            Self::InvalidConfigValueError { field, .. } => {
                format!("Fix the value of '{}' in the config file", field)
            }
            Self::MissingCredentialError { var } => {
                format!("Export a valid bearer token: export {}=<token>", var)
            }
            Self::HttpStatusError { status, .. } if *status == 401 || *status == 403 => {
                "The bearer token was rejected; obtain a fresh token".to_string()
            }
            Self::HttpStatusError { .. } | Self::ApiError(_) | Self::QueryError { .. } => {
                "Check the endpoint URL and network access, then retry".to_string()
            }
            Self::MalformedResponseError { .. } => {
                "Check the 'records' and 'record_field' paths for this source".to_string()
            }
            Self::MatchError { .. } => {
                "Check the 'key'/'key_template' options or set duplicates = merge".to_string()
            }
            Self::OutputError { .. } => "Check the [output] section".to_string(),
            Self::IoError(_) | Self::SerializationError(_) => {
                "Check file permissions and available disk space".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Credential => self.to_string(),
            ErrorCategory::Query => format!("Could not fetch monitoring data: {}", self),
            ErrorCategory::Matching => format!("Could not match records: {}", self),
            ErrorCategory::Output => format!("Could not write results: {}", self),
            ErrorCategory::System => format!("Unexpected failure: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitError>;
