use std::fmt::Display;

use arrow::error::ArrowError;

/// Outcome kind of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Connection,       // unreachable target, rejected credentials
    Syntax,           // unparseable statement text
    Bind,             // parameter count/type mismatch
    Execution,        // runtime failure during execute/fetch
    Timeout,          // deadline exceeded
    InvalidState,     // stale handle or wrong lifecycle state
    InvalidArguments, // malformed argument
    InvalidData,      // option value of the wrong type
    NotFound,         // unknown or unset attribute
    NotImplemented,   // optional driver callback absent
}

impl Status {
    /// Numeric code reported through [`ErrorState::code`] when the driver
    /// gives no vendor code. Never zero.
    pub fn code(&self) -> i32 {
        match self {
            Status::Connection => 1,
            Status::Syntax => 2,
            Status::Bind => 3,
            Status::Execution => 4,
            Status::Timeout => 5,
            Status::InvalidState => 6,
            Status::InvalidArguments => 7,
            Status::InvalidData => 8,
            Status::NotFound => 9,
            Status::NotImplemented => 10,
        }
    }

    /// SQLSTATE used when the driver does not supply one.
    pub fn default_sqlstate(&self) -> &'static str {
        match self {
            Status::Connection => "08001",
            Status::Syntax => "42000",
            Status::Bind => "07001",
            Status::Execution => "HY000",
            Status::Timeout => "HYT00",
            Status::InvalidState => "HY010",
            Status::InvalidArguments => "HY009",
            Status::InvalidData => "HY024",
            Status::NotFound => "HY092",
            Status::NotImplemented => "IM001",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub message: Option<String>,
    pub status: Status,
    pub vendor_code: i32,
    pub sqlstate: [u8; 5],
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn with_message_and_status(message: &str, status: Status) -> Self {
        Self {
            message: Some(message.into()),
            status,
            vendor_code: 0,
            sqlstate: [0; 5],
        }
    }

    /// Overrides the SQLSTATE. Anything but five ASCII characters is ignored.
    pub fn with_sqlstate(mut self, sqlstate: &str) -> Self {
        if let Ok(bytes) = <[u8; 5]>::try_from(sqlstate.as_bytes()) {
            if bytes.is_ascii() {
                self.sqlstate = bytes;
            }
        }
        self
    }

    pub fn with_vendor_code(mut self, vendor_code: i32) -> Self {
        self.vendor_code = vendor_code;
        self
    }

    /// Vendor code if the driver set one, otherwise the status code.
    pub fn code(&self) -> i32 {
        if self.vendor_code != 0 {
            self.vendor_code
        } else {
            self.status.code()
        }
    }

    pub fn sqlstate(&self) -> &str {
        match std::str::from_utf8(&self.sqlstate) {
            Ok(state) if self.sqlstate != [0; 5] => state,
            _ => self.status.default_sqlstate(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}: {} (sqlstate: {}, vendor_code: {})",
            self.status,
            self.message.as_deref().unwrap_or_default(),
            self.sqlstate(),
            self.vendor_code
        )
    }
}

impl std::error::Error for Error {}

impl From<ArrowError> for Error {
    fn from(value: ArrowError) -> Self {
        Self::with_message_and_status(&value.to_string(), Status::Execution)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Self::with_message_and_status(value, Status::InvalidArguments)
    }
}

/// Outcome of the most recent fallible operation on a handle.
///
/// The all-clear sentinel is code `0` with empty state and message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    pub code: i32,
    pub state: String,
    pub message: String,
}

impl ErrorState {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn new(code: i32, state: &str, message: &str) -> Self {
        Self {
            code,
            state: state.into(),
            message: message.into(),
        }
    }

    pub fn is_clear(&self) -> bool {
        self.code == 0 && self.state.is_empty() && self.message.is_empty()
    }
}

impl From<&Error> for ErrorState {
    fn from(value: &Error) -> Self {
        Self {
            code: value.code(),
            state: value.sqlstate().into(),
            message: value.message.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct_and_nonzero() {
        let all = [
            Status::Connection,
            Status::Syntax,
            Status::Bind,
            Status::Execution,
            Status::Timeout,
            Status::InvalidState,
            Status::InvalidArguments,
            Status::InvalidData,
            Status::NotFound,
            Status::NotImplemented,
        ];
        let mut codes: Vec<i32> = all.iter().map(Status::code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_sqlstate_fallback() {
        let error = Error::with_message_and_status("boom", Status::Syntax);
        assert_eq!(error.sqlstate(), "42000");

        let error = error.with_sqlstate("42601");
        assert_eq!(error.sqlstate(), "42601");

        // Too long, ignored.
        let error = Error::with_message_and_status("", Status::Bind).with_sqlstate("0700100");
        assert_eq!(error.sqlstate(), "07001");
    }

    #[test]
    fn test_error_state_from_error() {
        let error = Error::with_message_and_status("no route", Status::Connection);
        let state = ErrorState::from(&error);
        assert_eq!(state, ErrorState::new(1, "08001", "no route"));
        assert!(!state.is_clear());

        let error = error.with_vendor_code(2003);
        assert_eq!(ErrorState::from(&error).code, 2003);

        assert!(ErrorState::clear().is_clear());
    }

    #[test]
    fn test_display() {
        let error = Error::with_message_and_status("late", Status::Timeout);
        assert_eq!(
            error.to_string(),
            "Timeout: late (sqlstate: HYT00, vendor_code: 0)"
        );
    }
}
