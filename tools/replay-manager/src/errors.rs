use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("process table error: {0}")]
    ProcessTable(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("host error: {0}")]
    Host(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}
