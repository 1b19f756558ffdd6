use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Range(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("artifact error: {0}")]
    Artifact(String),
}

impl ForecastError {
    /// Client-side rejections are the caller's fault; everything else is a server failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Range(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Parse(_) | Self::Range(_) => 400,
            Self::Fetch(_) => 502,
            Self::Model(_) | Self::Config(_) | Self::Artifact(_) => 500,
        }
    }
}

impl From<reqwest::Error> for ForecastError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
