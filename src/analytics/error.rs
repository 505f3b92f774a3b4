//! Analytics error types

use thiserror::Error;

/// Errors from detector training and forecasting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    /// Caller violated a precondition (empty series id, zero window)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Too few points for the chosen method
    #[error("insufficient data: need {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Forecast requested before a successful fit
    #[error("model '{0}' is not trained")]
    NotTrained(&'static str),
}

/// Result type alias for analytics operations
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
