#![forbid(unsafe_code)]

use thiserror::Error;

use crate::types::StreamKind;

/// ABR engine errors.
///
/// Load failures and infeasible selections are not errors: they are reported
/// through notifications and `SelectionReason`.
#[derive(Debug, Error)]
pub enum AbrError {
    #[error("Bandwidth estimator already initialized (requested for {0:?})")]
    EstimatorAlreadyInitialized(StreamKind),

    #[error("Level index {index} out of range ({count} levels)")]
    LevelOutOfRange { index: usize, count: usize },

    #[error("ABR driver stopped")]
    DriverStopped,
}

pub type AbrResult<T> = Result<T, AbrError>;
