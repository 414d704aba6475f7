//! RevisionId - totally ordered document revision
//!
//! - Set exactly once per successful write
//! - Reused verbatim only by no-op writes and restore-mode writes
//! - Generated from a hybrid logical clock: physical milliseconds in the
//!   high bits, a logical counter in the low 20 bits
//!
//! The string form is a compact base-64 encoding whose alphabet keeps
//! equal-length encodings ordered the same way as their values.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const ALPHABET: &[u8; 64] = b"-_ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Bits reserved for the logical counter
const LOGICAL_BITS: u32 = 20;

/// A document revision.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct RevisionId(u64);

impl RevisionId {
    /// The unset revision.
    pub const NONE: RevisionId = RevisionId(0);

    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0 != 0
    }

    /// Parse a revision string.
    ///
    /// All-digit strings are read as decimal numbers, everything else as the
    /// base-64 clock encoding. Returns `None` for malformed input.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse::<u64>().ok().map(Self);
        }
        if s.len() > 11 {
            return None;
        }
        let mut value: u64 = 0;
        for b in s.bytes() {
            let digit = decode_char(b)?;
            value = value.checked_mul(64)?.checked_add(digit as u64)?;
        }
        Some(Self(value))
    }

    /// Parse a revision from a JSON value (string or unsigned number).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => n.as_u64().map(Self),
            _ => None,
        }
    }

    /// Encoded string form.
    pub fn encode(&self) -> String {
        if self.0 == 0 {
            return "-".to_string();
        }
        let mut buf = [0u8; 11];
        let mut pos = buf.len();
        let mut v = self.0;
        while v > 0 {
            pos -= 1;
            buf[pos] = ALPHABET[(v & 63) as usize];
            v >>= 6;
        }
        String::from_utf8_lossy(&buf[pos..]).into_owned()
    }
}

fn decode_char(b: u8) -> Option<u8> {
    match b {
        b'-' => Some(0),
        b'_' => Some(1),
        b'A'..=b'Z' => Some(b - b'A' + 2),
        b'a'..=b'z' => Some(b - b'a' + 28),
        b'0'..=b'9' => Some(b - b'0' + 54),
        _ => None,
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Hands out strictly increasing revisions.
///
/// Revisions written by restore or replication are observed so that locally
/// generated revisions never fall behind them.
#[derive(Debug, Default)]
pub struct RevisionGenerator {
    last: AtomicU64,
}

impl RevisionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next revision: max(physical clock, last + 1).
    pub fn next(&self) -> RevisionId {
        let physical = physical_now();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = physical.max(current + 1);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return RevisionId(candidate),
                Err(actual) => current = actual,
            }
        }
    }

    /// Observe an externally supplied revision.
    pub fn observe(&self, revision: RevisionId) {
        self.last.fetch_max(revision.0, Ordering::AcqRel);
    }

    /// Last revision handed out or observed.
    pub fn last(&self) -> RevisionId {
        RevisionId(self.last.load(Ordering::Acquire))
    }
}

fn physical_now() -> u64 {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    millis << LOGICAL_BITS
}
