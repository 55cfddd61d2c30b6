use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("HTTP error from {url}: {detail}")]
    Http {
        url: String,
        /// Response status, absent when the request never got a response
        status: Option<u16>,
        detail: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SourceError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Http { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
