use thiserror::Error;

/// Failures surfaced by the catalog, account and storage layers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Catalog request failed: {0}")]
    Catalog(String),

    #[error("Account store request failed: {0}")]
    Account(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Sign-in required")]
    Unauthenticated,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stored data under '{0}' is corrupt")]
    CorruptStorage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn catalog(err: anyhow::Error) -> Self {
        AppError::Catalog(format!("{:#}", err))
    }

    pub fn account(err: anyhow::Error) -> Self {
        AppError::Account(format!("{:#}", err))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Remote failures the user can retry by hand.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Catalog(_) | AppError::Account(_) | AppError::Unauthenticated
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
