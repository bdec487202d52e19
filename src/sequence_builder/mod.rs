//! Fixed-length sequence extraction for the sequence classifier.
//!
//! A sequence is the `L` filled glucose values ending (exclusively) at an
//! anchor index. Two anchors are used:
//!
//! - **TraceEnd**: the last `L` readings of the trace (steady state, event-negative
//!   patients and serving).
//! - **EventStart(i)**: the `L` readings before an injected event, so the window
//!   holds the precursor and never the event itself.
//!
//! # Padding
//!
//! When fewer than `L` values precede the anchor, the output is left-padded
//! with the first available value, or [`EMPTY_PAD_VALUE`] when nothing
//! precedes it.
//!
//! ```text
//! values:  [a b c d e f g]          L = 5, anchor = EventStart(3)
//! slice:   [a b c]
//! output:  [a a a b c]
//! ```
//!
//! # Example
//!
//! ```
//! use cgm_risk::sequence_builder::{extract_sequence, SequenceAnchor};
//!
//! let values = [100.0, 110.0, 120.0, 130.0];
//! let seq = extract_sequence(&values, 3, SequenceAnchor::TraceEnd);
//! assert_eq!(seq, vec![110.0, 120.0, 130.0]);
//! ```

use crate::trace::Trace;
use serde::{Deserialize, Serialize};

/// Padding value when the slice before the anchor is empty.
pub const EMPTY_PAD_VALUE: f32 = 100.0;

/// Sequence extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Number of samples per sequence (96 = 24 h at 15-minute cadence)
    pub length: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self { length: 96 }
    }
}

impl SequenceConfig {
    /// Create a configuration with the given window length.
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.length == 0 {
            return Err("sequence length must be > 0".to_string());
        }
        Ok(())
    }
}

/// Where an extracted window ends (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceAnchor {
    /// End of the series
    TraceEnd,
    /// Start index of an injected event
    EventStart(usize),
}

impl SequenceAnchor {
    /// Exclusive end index for a series of `len` values, clamped to `len`.
    #[inline]
    pub fn end_index(&self, len: usize) -> usize {
        match *self {
            SequenceAnchor::TraceEnd => len,
            SequenceAnchor::EventStart(i) => i.min(len),
        }
    }
}

/// Extract `length` values ending at `anchor`, left-padding when short.
pub fn extract_sequence(values: &[f64], length: usize, anchor: SequenceAnchor) -> Vec<f32> {
    let end = anchor.end_index(values.len());
    let start = end.saturating_sub(length);
    let slice = &values[start..end];

    let pad = slice.first().map(|&v| v as f32).unwrap_or(EMPTY_PAD_VALUE);
    let mut out = Vec::with_capacity(length);
    out.resize(length - slice.len(), pad);
    out.extend(slice.iter().map(|&v| v as f32));
    out
}

/// Extracts sequences from traces with a fixed window length.
#[derive(Debug, Clone, Default)]
pub struct SequenceExtractor {
    config: SequenceConfig,
}

impl SequenceExtractor {
    /// Create an extractor.
    pub fn new(config: SequenceConfig) -> Self {
        Self { config }
    }

    /// Window length.
    #[inline]
    pub fn length(&self) -> usize {
        self.config.length
    }

    /// Extract from an already filled series.
    pub fn extract(&self, values: &[f64], anchor: SequenceAnchor) -> Vec<f32> {
        extract_sequence(values, self.config.length, anchor)
    }

    /// Fill the trace's glucose channel, then extract.
    ///
    /// An all-missing trace yields a constant [`EMPTY_PAD_VALUE`] window.
    pub fn extract_trace(&self, trace: &Trace, anchor: SequenceAnchor) -> Vec<f32> {
        let filled = trace.filled_values().unwrap_or_default();
        self.extract(&filled, anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_tail_when_long_enough() {
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let seq = extract_sequence(&values, 96, SequenceAnchor::TraceEnd);
        assert_eq!(seq.len(), 96);
        assert_eq!(seq[0], 104.0);
        assert_eq!(seq[95], 199.0);
    }

    #[test]
    fn test_event_anchor_excludes_event() {
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let seq = extract_sequence(&values, 96, SequenceAnchor::EventStart(150));
        assert_eq!(seq[95], 149.0);
        assert_eq!(seq[0], 54.0);
    }

    #[test]
    fn test_left_pad_with_first_value() {
        let values = [7.0, 8.0, 9.0];
        let seq = extract_sequence(&values, 5, SequenceAnchor::TraceEnd);
        assert_eq!(seq, vec![7.0, 7.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_empty_slice_pads_with_default() {
        let seq = extract_sequence(&[120.0, 130.0], 4, SequenceAnchor::EventStart(0));
        assert_eq!(seq, vec![EMPTY_PAD_VALUE; 4]);
        assert_eq!(extract_sequence(&[], 3, SequenceAnchor::TraceEnd), vec![EMPTY_PAD_VALUE; 3]);
    }

    #[test]
    fn test_anchor_clamped_to_len() {
        let values = [1.0, 2.0, 3.0];
        let seq = extract_sequence(&values, 2, SequenceAnchor::EventStart(10));
        assert_eq!(seq, vec![2.0, 3.0]);
    }
}
