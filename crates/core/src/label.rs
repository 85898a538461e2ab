// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job label: the unique identity of a job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum label length in bytes. Equivalent to FILE_MAX.
pub const LABEL_MAX: usize = 255;

/// Unique identifier of a job.
///
/// Printable, no whitespace, at most [`LABEL_MAX`] bytes. Labels name jobs for
/// the lifetime of the daemon process; the registry enforces uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Label(String);

/// Label validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("label is empty")]
    Empty,

    #[error("label exceeds {LABEL_MAX} bytes")]
    TooLong,

    #[error("label contains whitespace or unprintable characters")]
    Unprintable,
}

impl Label {
    /// Validate and construct a label.
    pub fn new(s: impl Into<String>) -> Result<Self, LabelError> {
        let s = s.into();
        if s.is_empty() {
            return Err(LabelError::Empty);
        }
        if s.len() > LABEL_MAX {
            return Err(LabelError::TooLong);
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(LabelError::Unprintable);
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Label {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Label {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Test-only conversion; whitespace and control characters become '-'.
#[cfg(any(test, feature = "test-support"))]
impl From<&str> for Label {
    fn from(s: &str) -> Self {
        let cleaned: String = s
            .chars()
            .map(|c| if c.is_whitespace() || c.is_control() { '-' } else { c })
            .take(LABEL_MAX)
            .collect();
        if cleaned.is_empty() {
            Self("test".to_string())
        } else {
            Self(cleaned)
        }
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Label::new(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "label_tests.rs"]
mod tests;
