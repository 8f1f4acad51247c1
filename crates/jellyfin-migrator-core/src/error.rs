use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported identifier encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("Invalid date string '{0}'")]
    InvalidDate(String),

    #[error("Job {path} failed: {source}")]
    Job {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn job(path: impl Into<PathBuf>, source: Error) -> Self {
        Error::Job {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Configuration problems abort the run before anything is written.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigLoad(_) | Error::UnsupportedEncoding(_)
        )
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}
