use sea_orm::DbErr;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The rule (or ledger entry) does not exist for the requesting owner.
    #[error("not found")]
    NotFound,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("maximum automations ({max}) reached")]
    TooManyAutomations { max: u32 },
    #[error("storage failure: {0}")]
    Storage(#[from] DbErr),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
