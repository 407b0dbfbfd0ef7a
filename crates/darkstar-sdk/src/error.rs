use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] darkstar_store::StoreError),

    #[error("database error: {0}")]
    Database(#[from] darkstar_store::DatabaseError),

    #[error("auction error: {0}")]
    Auction(#[from] darkstar_auction::AuctionError),

    #[error("delivery error: {0}")]
    Delivery(#[from] darkstar_delivery::DeliveryError),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

pub type SdkResult<T> = Result<T, SdkError>;
