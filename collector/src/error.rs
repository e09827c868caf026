use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("node returned http status {0}")]
    Status(reqwest::StatusCode),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("no result in rpc response to {0}")]
    EmptyResult(String),
    #[error("could not get block stats for height {0} through rpc")]
    MissingStats(u64),
    #[error("invalid signing key")]
    SigningKey,
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
