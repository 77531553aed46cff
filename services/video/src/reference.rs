//! Persisted form of an object's location.
//!
//! A video record keeps its stored object as a single `"<bucket>,<key>"`
//! string in the URL column. Decoding splits on the first comma, so a bucket
//! containing a comma could not round-trip; [`ObjectReference::new`] refuses
//! one. Keys may contain commas.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const DELIMITER: char = ',';

/// Errors from building or decoding an object reference
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("malformed object reference {value:?} (want 'bucket,key')")]
    MalformedReference { value: String },

    #[error("invalid object reference: {0}")]
    InvalidReference(String),
}

/// Check that `bucket` can appear in an encoded reference
pub fn validate_bucket(bucket: &str) -> Result<(), ReferenceError> {
    if bucket.is_empty() {
        return Err(ReferenceError::InvalidReference("empty bucket".to_string()));
    }
    if bucket.contains(DELIMITER) {
        return Err(ReferenceError::InvalidReference(format!(
            "bucket {bucket:?} contains '{DELIMITER}'"
        )));
    }
    Ok(())
}

/// Bucket and key of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    bucket: String,
    key: String,
}

impl ObjectReference {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self, ReferenceError> {
        let bucket = bucket.into();
        let key = key.into();

        validate_bucket(&bucket)?;
        if key.is_empty() {
            return Err(ReferenceError::InvalidReference("empty key".to_string()));
        }

        Ok(Self { bucket, key })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `"<bucket>,<key>"`
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.bucket, DELIMITER, self.key)
    }

    /// Decode a persisted reference.
    ///
    /// An empty string means no object has been stored yet and decodes to
    /// `None`. Anything else must be `bucket,key` with both parts non-empty.
    pub fn decode(value: &str) -> Result<Option<Self>, ReferenceError> {
        if value.is_empty() {
            return Ok(None);
        }

        let malformed = || ReferenceError::MalformedReference {
            value: value.to_string(),
        };

        let (bucket, key) = value.split_once(DELIMITER).ok_or_else(malformed)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(malformed());
        }

        Ok(Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }))
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.bucket, DELIMITER, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let reference =
            ObjectReference::new("tubely-videos", "landscape/0123abcd.mp4").unwrap();
        assert_eq!(reference.encode(), "tubely-videos,landscape/0123abcd.mp4");
        assert_eq!(reference.to_string(), reference.encode());
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            ("b", "k"),
            ("tubely-videos", "portrait/ffffffffffffffffffffffffffffffff.mp4"),
            ("my.bucket", "nested/path/with spaces.mp4"),
            ("bucket", "key,with,commas.mp4"),
        ];

        for (bucket, key) in cases {
            let encoded = ObjectReference::new(bucket, key).unwrap().encode();
            let decoded = ObjectReference::decode(&encoded).unwrap().unwrap();
            assert_eq!(decoded.bucket(), bucket);
            assert_eq!(decoded.key(), key);
        }
    }

    #[test]
    fn test_decode_empty_is_absent() {
        assert_eq!(ObjectReference::decode(""), Ok(None));
    }

    #[test]
    fn test_decode_malformed() {
        for value in ["no-comma-here", ",key.mp4", "bucket,", ","] {
            assert_eq!(
                ObjectReference::decode(value),
                Err(ReferenceError::MalformedReference {
                    value: value.to_string()
                }),
                "{value:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_splits_on_first_comma() {
        let decoded = ObjectReference::decode("bucket,a,b").unwrap().unwrap();
        assert_eq!(decoded.bucket(), "bucket");
        assert_eq!(decoded.key(), "a,b");
    }

    #[test]
    fn test_validate_bucket() {
        assert!(validate_bucket("tubely-videos").is_ok());
        assert!(validate_bucket("").is_err());
        assert!(validate_bucket("a,b").is_err());
    }

    #[test]
    fn test_new_rejects_unencodable() {
        assert!(matches!(
            ObjectReference::new("", "key"),
            Err(ReferenceError::InvalidReference(_))
        ));
        assert!(matches!(
            ObjectReference::new("bucket", ""),
            Err(ReferenceError::InvalidReference(_))
        ));
        assert!(matches!(
            ObjectReference::new("buck,et", "key"),
            Err(ReferenceError::InvalidReference(_))
        ));
    }
}
