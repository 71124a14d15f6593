pub mod bincode;
pub mod keycode;

use thiserror::Error;

use crate::error::Result;

/// Trait for encoding record values for storage.
///
/// Values don't need to preserve ordering, so they go through bincode rather
/// than the order-preserving key codec.
pub trait Value {
    /// Encode the value to bytes
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode bytes back to the original value type
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("invalid encoding format: {0}")]
    InvalidFormat(String),
    #[error("truncated data")]
    TruncatedData,
    #[error("unknown tag {0:#04x}")]
    UnknownTag(u8),
}
