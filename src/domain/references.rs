//! Reference value objects.
//!
//! Case references and multiple references are opaque string keys issued by
//! the case store. Both are validated once at the boundary (non-empty after
//! trimming) so the coordination core never sees a blank key.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

/// The reference of a single case, unique within its case type.
///
/// # Examples
///
/// ```rust
/// use multiples_sync::domain::CaseReference;
///
/// let reference = CaseReference::new("2500123/2024").unwrap();
/// assert_eq!(reference.as_str(), "2500123/2024");
///
/// assert!(CaseReference::new("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaseReference(String);

impl CaseReference {
    /// Creates a case reference, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyReference`] if the value is empty
    /// after trimming.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyReference);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseReference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<String> for CaseReference {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CaseReference> for String {
    fn from(reference: CaseReference) -> Self {
        reference.0
    }
}

/// The reference of a multiple (the grouping record).
///
/// Multiple references are allocated by the multiple store as office-prefixed
/// sequence numbers, e.g. `6000001`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MultipleReference(String);

impl MultipleReference {
    /// Creates a multiple reference, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyReference`] if the value is empty
    /// after trimming.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyReference);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Builds the reference for sequence number `sequence` under `office_prefix`.
    ///
    /// ```rust
    /// use multiples_sync::domain::MultipleReference;
    ///
    /// let reference = MultipleReference::from_sequence(60, 1);
    /// assert_eq!(reference.as_str(), "6000001");
    /// ```
    #[must_use]
    pub fn from_sequence(office_prefix: u32, sequence: u64) -> Self {
        Self(format!("{office_prefix}{sequence:05}"))
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MultipleReference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<String> for MultipleReference {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MultipleReference> for String {
    fn from(reference: MultipleReference) -> Self {
        reference.0
    }
}
