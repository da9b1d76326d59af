//! Structured availability for read paths.
//!
//! Reads distinguish "not yet computed / not enough data" from genuine
//! defects: the former is an [`Availability::Unavailable`] value, the latter an
//! `Err`. On the wire an unavailable payload is
//! `{"available": false, "reason": "no_calculation_available"}` and an
//! available one is the payload's fields with `"available": true`.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Why a read has nothing to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// No calculation has been persisted for the requested key
    NoCalculationAvailable,
    /// Fewer than two symbols qualify, or their weights are all zero
    InsufficientSymbols,
    /// Factor rows exist but no date has every active factor
    IncompleteFactorSet,
    /// The portfolio holds no positions
    NoPositions,
}

impl UnavailableReason {
    /// Wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::NoCalculationAvailable => "no_calculation_available",
            UnavailableReason::InsufficientSymbols => "insufficient_symbols",
            UnavailableReason::IncompleteFactorSet => "incomplete_factor_set",
            UnavailableReason::NoPositions => "no_positions",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a read that may legitimately have no data.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability<T> {
    /// Data is present
    Available(T),
    /// Data is absent for a known reason
    Unavailable {
        /// Machine-readable reason
        reason: UnavailableReason,
        /// Optional human-readable context
        detail: Option<String>,
    },
}

impl<T> Availability<T> {
    /// Unavailable with no detail.
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Availability::Unavailable {
            reason,
            detail: None,
        }
    }

    /// Unavailable with detail.
    pub fn unavailable_with(reason: UnavailableReason, detail: impl Into<String>) -> Self {
        Availability::Unavailable {
            reason,
            detail: Some(detail.into()),
        }
    }

    /// True if data is present.
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }

    /// The reason, if unavailable.
    pub fn reason(&self) -> Option<UnavailableReason> {
        match self {
            Availability::Available(_) => None,
            Availability::Unavailable { reason, .. } => Some(*reason),
        }
    }

    /// Borrow the payload, if available.
    pub fn as_available(&self) -> Option<&T> {
        match self {
            Availability::Available(value) => Some(value),
            Availability::Unavailable { .. } => None,
        }
    }

    /// Take the payload, if available.
    pub fn into_available(self) -> Option<T> {
        match self {
            Availability::Available(value) => Some(value),
            Availability::Unavailable { .. } => None,
        }
    }

    /// Map the payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Availability<U> {
        match self {
            Availability::Available(value) => Availability::Available(f(value)),
            Availability::Unavailable { reason, detail } => {
                Availability::Unavailable { reason, detail }
            }
        }
    }
}

impl<T: Serialize> Serialize for Availability<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a, T> {
            available: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<UnavailableReason>,
            #[serde(skip_serializing_if = "Option::is_none")]
            detail: Option<&'a str>,
            #[serde(flatten)]
            data: Option<&'a T>,
        }

        let wire = match self {
            Availability::Available(value) => Wire {
                available: true,
                reason: None,
                detail: None,
                data: Some(value),
            },
            Availability::Unavailable { reason, detail } => Wire {
                available: false,
                reason: Some(*reason),
                detail: detail.as_deref(),
                data: None,
            },
        };
        wire.serialize(serializer)
    }
}
