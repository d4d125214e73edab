// Row encoding for the sled tables plus the canonical JSON used for digests
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| LedgerError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| LedgerError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// Canonical JSON bytes of `data`.
///
/// The value goes through `serde_json::Value` first, whose object maps are
/// ordered by key, so two values with the same logical content encode to the
/// same bytes no matter how their fields or map entries were inserted.
pub fn canonical_encoding<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(data)
        .map_err(|e| LedgerError::Serialization(format!("Canonical encoding failed: {e}")))?;
    serde_json::to_vec(&value)
        .map_err(|e| LedgerError::Serialization(format!("Canonical encoding failed: {e}")))
}
