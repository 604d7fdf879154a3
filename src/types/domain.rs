//! Availability of derived values.
//!
//! Domain data distinguishes three kinds of "no value": the measure does not
//! apply to the record (a barrier off the network has no upstream miles), the
//! value is unknown, or nobody has assessed it yet. `Assessed<T>` keeps these
//! apart instead of overloading a sentinel number.

use serde::{Deserialize, Serialize};

/// A value that may be missing for one of three distinct reasons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Assessed<T> {
    /// Measured value.
    Value(T),
    /// The measure does not apply to this record.
    NotApplicable,
    /// The value exists but is unknown.
    Unknown,
    /// The value has not been assessed yet.
    NotAssessed,
}

impl<T> Assessed<T> {
    /// Get the value if present.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Whether a value is present.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Borrow the contained value.
    pub fn as_ref(&self) -> Assessed<&T> {
        match self {
            Self::Value(v) => Assessed::Value(v),
            Self::NotApplicable => Assessed::NotApplicable,
            Self::Unknown => Assessed::Unknown,
            Self::NotAssessed => Assessed::NotAssessed,
        }
    }

    /// Map the contained value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Assessed<U> {
        match self {
            Self::Value(v) => Assessed::Value(f(v)),
            Self::NotApplicable => Assessed::NotApplicable,
            Self::Unknown => Assessed::Unknown,
            Self::NotAssessed => Assessed::NotAssessed,
        }
    }

    /// Convert to `Option`, discarding the reason for absence.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl Assessed<f64> {
    /// Tabular code: the value itself, or a negative sentinel per reason.
    ///
    /// `-1` not applicable, `-2` unknown, `-3` not assessed.
    pub fn to_sentinel(&self) -> f64 {
        match self {
            Self::Value(v) => *v,
            Self::NotApplicable => -1.0,
            Self::Unknown => -2.0,
            Self::NotAssessed => -3.0,
        }
    }
}

impl<T> Default for Assessed<T> {
    fn default() -> Self {
        Self::NotAssessed
    }
}

impl<T> From<Option<T>> for Assessed<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Value(v),
            None => Self::Unknown,
        }
    }
}
