use thiserror::Error;

// Every stage returns this error; nothing in the pipeline recovers locally.
#[derive(Error, Debug)]
pub enum FraudError {
    #[error("data access error: {0}")]
    DataAccess(String),

    #[error("data access error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data access error: {0}")]
    Csv(#[from] csv::Error),

    #[error("computation error: {0}")]
    Computation(String),

    #[error("computation error: {0}")]
    Linfa(#[from] linfa::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FraudError {
    pub fn data(msg: impl Into<String>) -> Self {
        FraudError::DataAccess(msg.into())
    }

    pub fn computation(msg: impl Into<String>) -> Self {
        FraudError::Computation(msg.into())
    }

    #[cfg(test)]
    pub fn is_data_access(&self) -> bool {
        matches!(
            self,
            FraudError::DataAccess(_) | FraudError::Io(_) | FraudError::Csv(_)
        )
    }

    #[cfg(test)]
    pub fn is_computation(&self) -> bool {
        matches!(self, FraudError::Computation(_) | FraudError::Linfa(_))
    }
}

pub type Result<T> = std::result::Result<T, FraudError>;
