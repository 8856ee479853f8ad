use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result, Status};
use crate::trace::MAX_LEVEL;

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Double(f64),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&[u8]> for OptionValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.into())
    }
}

impl<const N: usize> From<&[u8; N]> for OptionValue {
    fn from(value: &[u8; N]) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::String(if value { "true" } else { "false" }.into())
    }
}

impl OptionValue {
    /// Integer view: `Int` as is, `String` if it parses.
    pub fn as_int(&self, key: &str) -> Result<i64> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::String(value) => value.trim().parse().map_err(|_| incorrect(key)),
            _ => Err(incorrect(key)),
        }
    }

    /// Boolean view: `"true"`/`"false"` strings or `0`/`1` integers.
    pub fn as_bool(&self, key: &str) -> Result<bool> {
        match self {
            Self::String(value) if value.eq_ignore_ascii_case("true") => Ok(true),
            Self::String(value) if value.eq_ignore_ascii_case("false") => Ok(false),
            Self::Int(0) => Ok(false),
            Self::Int(1) => Ok(true),
            _ => Err(incorrect(key)),
        }
    }

    pub fn as_string(&self, key: &str) -> Result<String> {
        match self {
            Self::String(value) => Ok(value.clone()),
            _ => Err(incorrect(key)),
        }
    }

    /// Trace level in `0..=15`; larger levels are clamped.
    pub fn as_level(&self, key: &str) -> Result<u8> {
        let level = self.as_int(key)?;
        if level < 0 {
            return Err(incorrect(key));
        }
        Ok(level.min(MAX_LEVEL.into()) as u8)
    }

    pub fn as_topics(&self, key: &str) -> Result<u32> {
        u32::try_from(self.as_int(key)?).map_err(|_| incorrect(key))
    }

    /// Milliseconds; `0` means no timeout.
    pub fn as_timeout(&self, key: &str) -> Result<Option<Duration>> {
        let millis = u64::try_from(self.as_int(key)?).map_err(|_| incorrect(key))?;
        Ok((millis > 0).then(|| Duration::from_millis(millis)))
    }
}

pub(crate) fn incorrect(key: &str) -> Error {
    Error::with_message_and_status(
        &format!("Incorrect value for option: {}", key),
        Status::InvalidData,
    )
}

pub(crate) fn unrecognized(key: &str) -> Error {
    Error::with_message_and_status(&format!("Unrecognized option: {}", key), Status::NotFound)
}

/// Options of a driver handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionDriver {
    TraceLevel,
    TraceTopics,
    /// Default connect timeout in milliseconds.
    ConnectTimeout,
}

impl AsRef<str> for OptionDriver {
    fn as_ref(&self) -> &str {
        match self {
            Self::TraceLevel => "dbi.trace.level",
            Self::TraceTopics => "dbi.trace.topics",
            Self::ConnectTimeout => "dbi.driver.connect_timeout",
        }
    }
}

impl FromStr for OptionDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dbi.trace.level" => Ok(Self::TraceLevel),
            "dbi.trace.topics" => Ok(Self::TraceTopics),
            "dbi.driver.connect_timeout" => Ok(Self::ConnectTimeout),
            _ => Err(unrecognized(s)),
        }
    }
}

/// Options of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionConnection {
    Target,
    Username,
    /// Write-only.
    Password,
    AutoCommit,
    /// Connect timeout in milliseconds.
    Timeout,
    TraceLevel,
    TraceTopics,
}

impl AsRef<str> for OptionConnection {
    fn as_ref(&self) -> &str {
        match self {
            Self::Target => "dbi.connection.target",
            Self::Username => "dbi.connection.username",
            Self::Password => "dbi.connection.password",
            Self::AutoCommit => "dbi.connection.autocommit",
            Self::Timeout => "dbi.connection.timeout",
            Self::TraceLevel => "dbi.trace.level",
            Self::TraceTopics => "dbi.trace.topics",
        }
    }
}

impl FromStr for OptionConnection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dbi.connection.target" => Ok(Self::Target),
            "dbi.connection.username" => Ok(Self::Username),
            "dbi.connection.password" => Ok(Self::Password),
            "dbi.connection.autocommit" => Ok(Self::AutoCommit),
            "dbi.connection.timeout" => Ok(Self::Timeout),
            "dbi.trace.level" => Ok(Self::TraceLevel),
            "dbi.trace.topics" => Ok(Self::TraceTopics),
            _ => Err(unrecognized(s)),
        }
    }
}

/// Options of a statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionStatement {
    TraceLevel,
    TraceTopics,
}

impl AsRef<str> for OptionStatement {
    fn as_ref(&self) -> &str {
        match self {
            Self::TraceLevel => "dbi.trace.level",
            Self::TraceTopics => "dbi.trace.topics",
        }
    }
}

impl FromStr for OptionStatement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dbi.trace.level" => Ok(Self::TraceLevel),
            "dbi.trace.topics" => Ok(Self::TraceTopics),
            _ => Err(unrecognized(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip_through_strings() {
        for key in [
            OptionConnection::Target,
            OptionConnection::Username,
            OptionConnection::Password,
            OptionConnection::AutoCommit,
            OptionConnection::Timeout,
            OptionConnection::TraceLevel,
            OptionConnection::TraceTopics,
        ] {
            assert_eq!(key.as_ref().parse::<OptionConnection>().unwrap(), key);
        }

        let err = "dbi.connection.auto_commit"
            .parse::<OptionConnection>()
            .unwrap_err();
        assert_eq!(err.status, Status::NotFound);
    }

    #[test]
    fn test_value_views() {
        assert_eq!(OptionValue::from(42).as_int("k").unwrap(), 42);
        assert_eq!(OptionValue::from(" 7 ").as_int("k").unwrap(), 7);
        assert_eq!(
            OptionValue::from(3.5).as_int("k").unwrap_err().status,
            Status::InvalidData
        );

        assert!(OptionValue::from(true).as_bool("k").unwrap());
        assert!(!OptionValue::from("FALSE").as_bool("k").unwrap());
        assert!(OptionValue::from(1).as_bool("k").unwrap());
        assert!(OptionValue::from(b"true").as_bool("k").is_err());

        assert_eq!(OptionValue::from(40).as_level("k").unwrap(), MAX_LEVEL);
        assert!(OptionValue::from(-1).as_level("k").is_err());
        assert_eq!(OptionValue::from(0).as_timeout("k").unwrap(), None);
        assert_eq!(
            OptionValue::from(250).as_timeout("k").unwrap(),
            Some(Duration::from_millis(250))
        );
    }
}
