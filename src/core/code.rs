//! Session Codes
//!
//! Short, human-shareable numeric codes that players type in to join a
//! session. Leading zeros are significant (`"0042"` is a valid code).

use std::fmt;
use rand::Rng;
use serde::{Serialize, Deserialize};

/// Default number of digits per code.
pub const DEFAULT_CODE_LENGTH: usize = 4;

/// Longest supported code; keeps the numeric space inside `u32`.
pub const MAX_CODE_LENGTH: usize = 9;

/// A session code: a fixed-length string of ASCII digits.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Generate a random code of `length` digits (clamped to `1..=MAX_CODE_LENGTH`).
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, length: usize) -> Self {
        let length = length.clamp(1, MAX_CODE_LENGTH);
        let space = 10u32.pow(length as u32);
        let value = rng.gen_range(0..space);
        Self(format!("{:0width$}", value, width = length))
    }

    /// Parse user input into a code of exactly `length` digits.
    ///
    /// Surrounding whitespace is ignored. Returns `None` for anything else.
    pub fn parse(input: &str, length: usize) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.len() == length && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of distinct codes of the given length.
    pub fn space(length: usize) -> usize {
        10usize.pow(length.clamp(1, MAX_CODE_LENGTH) as u32)
    }
}

impl fmt::Debug for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCode({})", self.0)
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
