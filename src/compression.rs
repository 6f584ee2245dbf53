// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entry sizing for the result cache.
//!
//! Cached values stay in memory as parsed JSON; what this module decides is
//! how many bytes an entry is charged against the cache budget. By default
//! that is the length of the serialized JSON. With the `compression` feature
//! and `compression_enabled`, the zstd-compressed length is charged instead,
//! so highly repetitive results take a smaller share of the budget.
//!
//! # Feature Flag
//!
//! ```toml
//! [dependencies]
//! resilient-gateway = { version = "0.1", features = ["compression"] }
//! ```

use serde_json::Value;

/// Default compression level (3 is a good balance of speed/ratio)
#[cfg(feature = "compression")]
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Compression error types
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Failed to compress data
    #[error("compression failed: {0}")]
    CompressFailed(String),

    /// Failed to serialize JSON
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bytes charged for caching `value`.
///
/// `compressed` is ignored when the crate is built without the
/// `compression` feature.
pub fn estimate_size(value: &Value, compressed: bool) -> Result<usize, CompressionError> {
    let json_bytes = serde_json::to_vec(value)?;
    if compressed {
        return compressed_len(&json_bytes);
    }
    Ok(json_bytes.len())
}

#[cfg(feature = "compression")]
fn compressed_len(data: &[u8]) -> Result<usize, CompressionError> {
    zstd::encode_all(data, DEFAULT_COMPRESSION_LEVEL)
        .map(|bytes| bytes.len())
        .map_err(|e| CompressionError::CompressFailed(e.to_string()))
}

#[cfg(not(feature = "compression"))]
fn compressed_len(data: &[u8]) -> Result<usize, CompressionError> {
    Ok(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_size_is_json_length() {
        let value = json!({"caption": "a cat on a mat"});
        let expected = serde_json::to_vec(&value).unwrap().len();
        assert_eq!(estimate_size(&value, false).unwrap(), expected);
    }

    #[cfg(not(feature = "compression"))]
    #[test]
    fn test_compressed_flag_is_ignored_without_feature() {
        let value = json!({"data": "x".repeat(1000)});
        assert_eq!(
            estimate_size(&value, true).unwrap(),
            estimate_size(&value, false).unwrap()
        );
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_repetitive_results_are_charged_less() {
        let labels = json!({
            "labels": (0..100).map(|i| {
                json!({"label": "cat", "score": 0.5, "box": [i, i, 10, 10]})
            }).collect::<Vec<_>>()
        });

        let plain = estimate_size(&labels, false).unwrap();
        let charged = estimate_size(&labels, true).unwrap();
        assert!(charged * 2 < plain, "Expected >50% savings, got {charged} of {plain} bytes");
    }
}
