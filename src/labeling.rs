//! Class labels and risk-head probability thresholds.
//!
//! # Overview
//!
//! Two kinds of label live here:
//!
//! - [`EventLabel`]: the binary training target assigned to each synthetic
//!   patient (event-negative / event-positive).
//! - [`RiskLabel`]: the discrete label a served probability maps to. Each
//!   [`RiskHead`] has its own fixed threshold table:
//!
//! | Head | Thresholds |
//! |------|------------|
//! | Glucose event | ≥ 0.7 High Alert, ≥ 0.4 Watchful, else Stable |
//! | Baseline diabetes | ≥ 0.6 High, ≥ 0.3 Medium, else Low |
//! | Hypertension | ≥ 0.5 High, else Normal |
//! | Heart disease | ≥ 0.5 High, else Low |
//!
//! Only the glucose-event head has a trained model in this crate.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Event label
// ============================================================================

/// Binary training target for one patient.
///
/// # Example
///
/// ```
/// use cgm_risk::labeling::EventLabel;
///
/// assert_eq!(EventLabel::Positive.as_int(), 1);
/// assert_eq!(EventLabel::from_int(0), Some(EventLabel::Negative));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLabel {
    /// No injected event
    Negative = 0,

    /// Precursor drift and acute event injected
    Positive = 1,
}

impl EventLabel {
    /// Integer representation used in the feature table.
    #[inline]
    pub fn as_int(&self) -> u8 {
        *self as u8
    }

    /// Create from integer representation.
    pub fn from_int(value: u8) -> Option<Self> {
        match value {
            0 => Some(EventLabel::Negative),
            1 => Some(EventLabel::Positive),
            _ => None,
        }
    }

    /// Whether this is the positive class.
    #[inline]
    pub fn is_positive(&self) -> bool {
        matches!(self, EventLabel::Positive)
    }

    /// Get the string name of this label.
    pub fn name(&self) -> &'static str {
        match self {
            EventLabel::Negative => "Negative",
            EventLabel::Positive => "Positive",
        }
    }
}

impl fmt::Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Risk labels
// ============================================================================

/// Discrete label for a served probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLabel {
    #[serde(rename = "High Alert")]
    HighAlert,
    Watchful,
    Stable,
    High,
    Medium,
    Low,
    Normal,
}

impl RiskLabel {
    /// Display name as written in responses.
    pub fn name(&self) -> &'static str {
        match self {
            RiskLabel::HighAlert => "High Alert",
            RiskLabel::Watchful => "Watchful",
            RiskLabel::Stable => "Stable",
            RiskLabel::High => "High",
            RiskLabel::Medium => "Medium",
            RiskLabel::Low => "Low",
            RiskLabel::Normal => "Normal",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A served risk model and its threshold table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskHead {
    GlucoseEvent,
    BaselineDiabetes,
    Hypertension,
    HeartDisease,
}

impl RiskHead {
    /// Human-readable model name used in error responses.
    pub fn model_name(&self) -> &'static str {
        match self {
            RiskHead::GlucoseEvent => "Glucose event",
            RiskHead::BaselineDiabetes => "Diabetes",
            RiskHead::Hypertension => "Hypertension",
            RiskHead::HeartDisease => "Heart disease",
        }
    }

    /// Descending `(min_probability, label)` table; the first match wins.
    pub fn thresholds(&self) -> &'static [(f64, RiskLabel)] {
        match self {
            RiskHead::GlucoseEvent => &[
                (0.7, RiskLabel::HighAlert),
                (0.4, RiskLabel::Watchful),
                (0.0, RiskLabel::Stable),
            ],
            RiskHead::BaselineDiabetes => &[
                (0.6, RiskLabel::High),
                (0.3, RiskLabel::Medium),
                (0.0, RiskLabel::Low),
            ],
            RiskHead::Hypertension => &[(0.5, RiskLabel::High), (0.0, RiskLabel::Normal)],
            RiskHead::HeartDisease => &[(0.5, RiskLabel::High), (0.0, RiskLabel::Low)],
        }
    }

    /// Map a probability to this head's label.
    ///
    /// Values below every threshold (including NaN) get the lowest label.
    pub fn label(&self, probability: f64) -> RiskLabel {
        let table = self.thresholds();
        table
            .iter()
            .find(|(min, _)| probability >= *min)
            .or_else(|| table.last())
            .map(|&(_, label)| label)
            .unwrap_or(RiskLabel::Stable)
    }
}
