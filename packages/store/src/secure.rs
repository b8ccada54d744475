use async_trait::async_trait;

/// Errors raised by a [`SecureStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("secure storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// String-keyed secure storage.
///
/// Every operation may fail. A missing key is `Ok(None)`, not an error, and
/// removing a missing key succeeds.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
