//! Per-handle diagnostic trace settings.
//!
//! A [`TraceState`] pairs a verbosity level (0 is silent, 15 is the most
//! verbose) with a topic bitmask. An event is emitted when its topic is
//! enabled and the level reaches the topic threshold, or when the level alone
//! reaches the general threshold.

use std::fmt::Display;
use std::str::FromStr;

use once_cell::sync::Lazy;

use crate::error::{Error, Result, Status};

/// Statement text being prepared and executed.
pub const TOPIC_SQL: u32 = 0x0000_0100;
/// Connect and disconnect.
pub const TOPIC_CON: u32 = 0x0000_0200;
/// Parameter binding and value encoding.
pub const TOPIC_ENC: u32 = 0x0000_0400;
/// Driver internals.
pub const TOPIC_DBD: u32 = 0x0000_0800;
/// Commit and rollback.
pub const TOPIC_TXN: u32 = 0x0000_1000;

pub const MAX_LEVEL: u8 = 15;

const TOPIC_NAMES: [(&str, u32); 5] = [
    ("SQL", TOPIC_SQL),
    ("CON", TOPIC_CON),
    ("ENC", TOPIC_ENC),
    ("DBD", TOPIC_DBD),
    ("TXN", TOPIC_TXN),
];

/// Environment variable read once for the default trace settings.
pub const TRACE_ENV: &str = "DBI_TRACE";

static ENV_TRACE: Lazy<TraceState> = Lazy::new(|| {
    std::env::var(TRACE_ENV)
        .ok()
        .and_then(|spec| spec.parse().ok())
        .unwrap_or_default()
});

/// Trace settings from `DBI_TRACE`, silent if unset or malformed.
pub fn env_default() -> TraceState {
    *ENV_TRACE
}

/// Name of a single topic bit, `"-"` for anything else.
pub fn topic_name(topic: u32) -> &'static str {
    TOPIC_NAMES
        .iter()
        .find(|(_, bit)| *bit == topic)
        .map(|(name, _)| *name)
        .unwrap_or("-")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TraceState {
    pub level: u8,
    pub topics: u32,
}

impl TraceState {
    /// Levels above [`MAX_LEVEL`] are clamped.
    pub fn new(level: u8, topics: u32) -> Self {
        Self {
            level: level.min(MAX_LEVEL),
            topics,
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn should_trace(&self, topic_mask: u32, topic_level: u8, level: u8) -> bool {
        (self.topics & topic_mask != 0 && self.level >= topic_level) || self.level >= level
    }
}

impl FromStr for TraceState {
    type Err = Error;

    /// Parses `|`-separated parts: a decimal level, topic names, or hex topic
    /// bits, e.g. `"2|SQL|TXN"` or `"1|0xF0"`.
    fn from_str(s: &str) -> Result<Self> {
        let mut state = TraceState::default();
        for part in s.split('|').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(hex) = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
            {
                state.topics |= u32::from_str_radix(hex, 16).map_err(|_| bad_spec(s))?;
            } else if part.bytes().all(|b| b.is_ascii_digit()) {
                let level: u32 = part.parse().map_err(|_| bad_spec(s))?;
                state.level = level.min(MAX_LEVEL as u32) as u8;
            } else {
                let (_, bit) = TOPIC_NAMES
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(part))
                    .ok_or_else(|| bad_spec(s))?;
                state.topics |= bit;
            }
        }
        Ok(state)
    }
}

fn bad_spec(spec: &str) -> Error {
    Error::with_message_and_status(
        &format!("Invalid trace specification: {:?}", spec),
        Status::InvalidArguments,
    )
}

impl Display for TraceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.level)?;
        let mut rest = self.topics;
        for (name, bit) in TOPIC_NAMES {
            if rest & bit != 0 {
                write!(f, "|{}", name)?;
                rest &= !bit;
            }
        }
        if rest != 0 {
            write!(f, "|{:#x}", rest)?;
        }
        Ok(())
    }
}
