/// Errors produced by the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker has been shut down and accepts no new subscribers.
    #[error("broker is shut down")]
    Shutdown,

    /// A key pattern could not be parsed.
    #[error("invalid key pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Subscriptions must name a table.
    #[error("table name must not be empty")]
    EmptyTable,
}

/// Convenience alias used throughout the broker crate.
pub type Result<T> = std::result::Result<T, BrokerError>;
