//! Chapter range selection.
//!
//! A selection is a comma-separated list of chapter numbers and inclusive
//! spans, e.g. `1,3-5,10.5`. Numbers may be fractional.
//!
//! # Example
//!
//! ```
//! use mango_core::ranges::{self, Range};
//!
//! let selection = ranges::parse("1, 3-5, 8,").unwrap();
//! assert_eq!(selection, vec![Range::new(1.0, 1.0), Range::new(3.0, 5.0), Range::new(8.0, 8.0)]);
//! assert!(ranges::contains_any(&selection, 4.0));
//! assert_eq!(ranges::count(&selection), 5);
//! assert_eq!(ranges::to_string_list(&selection), "1,3-5,8");
//! ```

use std::fmt;
use std::num::ParseFloatError;

use thiserror::Error;

/// Errors produced while parsing a selection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    /// A part has more than one `-`.
    #[error("invalid range format: {part}")]
    InvalidFormat {
        /// The offending comma-separated part.
        part: String,
    },

    /// A bound is not a finite number.
    #[error("invalid chapter number '{value}' in range {part}")]
    InvalidNumber {
        /// The offending comma-separated part.
        part: String,
        /// The bound that failed to parse.
        value: String,
    },
}

/// Inclusive span of chapter numbers. `begin <= end` always holds for
/// parsed ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    /// Lower bound, inclusive.
    pub begin: f64,
    /// Upper bound, inclusive.
    pub end: f64,
}

impl Range {
    /// Creates a range, swapping the bounds if they are reversed.
    #[must_use]
    pub fn new(begin: f64, end: f64) -> Self {
        if begin > end {
            Self {
                begin: end,
                end: begin,
            }
        } else {
            Self { begin, end }
        }
    }

    /// Returns true if `number` lies within the range.
    #[must_use]
    pub fn contains(&self, number: f64) -> bool {
        number >= self.begin && number <= self.end
    }

    fn is_integral(&self) -> bool {
        self.begin.fract() == 0.0 && self.end.fract() == 0.0
    }
}

impl fmt::Display for Range {
    #[allow(clippy::float_cmp)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.begin == self.end {
            if self.begin.fract() == 0.0 {
                write!(f, "{:.0}", self.begin)
            } else {
                write!(f, "{:.1}", self.begin)
            }
        } else {
            write!(f, "{}-{}", self.begin, self.end)
        }
    }
}

/// Parses a selection string.
///
/// Parts are separated by commas and trimmed; empty parts are ignored, so an
/// empty or blank input yields an empty selection.
///
/// # Errors
///
/// Returns [`RangeError`] for a part with several dashes or a bound that is
/// not a finite number.
pub fn parse(input: &str) -> Result<Vec<Range>, RangeError> {
    let mut ranges = Vec::new();

    for part in input.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let bounds: Vec<&str> = part.split('-').collect();
        let range = match bounds.as_slice() {
            [single] => {
                let value = parse_bound(part, single)?;
                Range::new(value, value)
            }
            [begin, end] => Range::new(parse_bound(part, begin)?, parse_bound(part, end)?),
            _ => {
                return Err(RangeError::InvalidFormat {
                    part: part.to_string(),
                });
            }
        };
        ranges.push(range);
    }

    Ok(ranges)
}

fn parse_bound(part: &str, value: &str) -> Result<f64, RangeError> {
    let value = value.trim();
    let invalid = || RangeError::InvalidNumber {
        part: part.to_string(),
        value: value.to_string(),
    };
    let number: f64 = value.parse().map_err(|_: ParseFloatError| invalid())?;
    if number.is_finite() {
        Ok(number)
    } else {
        Err(invalid())
    }
}

/// Returns true if any range contains `number`.
#[must_use]
pub fn contains_any(ranges: &[Range], number: f64) -> bool {
    ranges.iter().any(|range| range.contains(number))
}

/// Formats a selection back into its comma-separated form.
#[must_use]
pub fn to_string_list(ranges: &[Range]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Number of chapters a selection covers.
///
/// Integral spans count every whole number in them; a span with a
/// fractional bound counts as one.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn count(ranges: &[Range]) -> usize {
    ranges
        .iter()
        .map(|range| {
            if range.is_integral() {
                (range.end - range.begin) as usize + 1
            } else {
                1
            }
        })
        .sum()
}

/// Sorts ranges by their lower bound and merges those that overlap or are
/// within 1 of each other.
#[must_use]
pub fn merge(ranges: &[Range]) -> Vec<Range> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by(|a, b| a.begin.total_cmp(&b.begin));

    let mut merged: Vec<Range> = Vec::with_capacity(sorted.len());
    for current in sorted {
        match merged.last_mut() {
            Some(last) if current.begin <= last.end + 1.0 => {
                last.end = last.end.max(current.end);
            }
            _ => merged.push(current),
        }
    }
    merged
}
