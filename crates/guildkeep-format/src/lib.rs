#![forbid(unsafe_code)]

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Current on-disk document version.
pub const FORMAT_VERSION: u16 = 1;
/// Maximum allowed size of one stored document.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Versioned storage document. Every persisted collection uses `{ v, kind, d }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document<T> {
    pub v: u16,
    pub kind: CollectionKind,
    pub d: T,
}

/// Collection identifier with a strict character allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionKind(String);

impl CollectionKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionKind {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_collection_kind(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for CollectionKind {
    type Error = FormatError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl From<CollectionKind> for String {
    fn from(value: CollectionKind) -> Self {
        value.0
    }
}

impl core::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize `data` as a `kind` document at the current version.
///
/// # Errors
/// Returns [`FormatError::InvalidJson`] if `data` cannot be serialized, or
/// [`FormatError::OversizedPayload`] if the encoded document is too large.
pub fn encode_document<T: Serialize>(
    kind: &CollectionKind,
    data: &T,
) -> Result<Vec<u8>, FormatError> {
    let document = Document {
        v: FORMAT_VERSION,
        kind: kind.clone(),
        d: data,
    };
    let encoded = serde_json::to_vec_pretty(&document)?;
    if encoded.len() > MAX_DOCUMENT_BYTES {
        return Err(FormatError::OversizedPayload {
            max: MAX_DOCUMENT_BYTES,
            actual: encoded.len(),
        });
    }
    Ok(encoded)
}

/// Parse and validate a stored document, returning its payload.
///
/// # Errors
/// Returns [`FormatError`] if the input exceeds limits, is malformed JSON,
/// carries an unsupported version, or belongs to a different collection.
pub fn decode_document<T: DeserializeOwned>(
    expected: &CollectionKind,
    input: &[u8],
) -> Result<T, FormatError> {
    if input.len() > MAX_DOCUMENT_BYTES {
        return Err(FormatError::OversizedPayload {
            max: MAX_DOCUMENT_BYTES,
            actual: input.len(),
        });
    }

    let document: Document<serde_json::Value> = serde_json::from_slice(input)?;
    if document.v != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            actual: document.v,
        });
    }
    if &document.kind != expected {
        return Err(FormatError::KindMismatch {
            expected: expected.to_string(),
            actual: document.kind.into(),
        });
    }

    Ok(serde_json::from_value(document.d)?)
}

pub(crate) fn validate_collection_kind(value: &str) -> Result<(), FormatError> {
    const MAX_LEN: usize = 64;

    if value.is_empty() || value.len() > MAX_LEN {
        return Err(FormatError::InvalidCollectionKind);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Ok(());
    }

    Err(FormatError::InvalidCollectionKind)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("document exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("unsupported document version: expected={expected} actual={actual}")]
    UnsupportedVersion { expected: u16, actual: u16 },
    #[error("document belongs to collection {actual}, expected {expected}")]
    KindMismatch { expected: String, actual: String },
    #[error("invalid collection kind")]
    InvalidCollectionKind,
    #[error("invalid json document")]
    InvalidJson,
}

impl From<serde_json::Error> for FormatError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}
