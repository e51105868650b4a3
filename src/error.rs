use thiserror::Error;

use crate::config::ConfigError;
use crate::context::ContextError;
use crate::report::ReportError;
use crate::suite::SuiteError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
    #[error("Suite error: {0}")]
    Suite(#[from] SuiteError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, Error>;

// エラー作成用のヘルパー関数
impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
