use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Reading settings from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing settings from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}
