//! Driver interface layer.
//!
//! A driver implements [`Driver`], [`Connection`] and [`Statement`]. Callers
//! never touch those objects directly: they go through a
//! [`registry::Registry`], which owns the driver → connection → statement
//! handle tree, keeps the outcome of the last operation on every handle and
//! decides which diagnostics get traced.

pub mod error;
pub mod options;
pub mod registry;
pub mod trace;
pub mod value;
pub mod views;

use std::time::Instant;

use arrow::record_batch::RecordBatchReader;

use error::{Error, Result, Status};
use options::{OptionConnection, OptionStatement, OptionValue};
use value::Value;

pub use error::ErrorState;
pub use registry::{
    ConnectionHandle, Credentials, DriverConfig, DriverHandle, HandleId, HandleKind, ParamKey,
    Registry, StatementHandle, TransactionState,
};
pub use trace::TraceState;

/// Attribute access on a handle.
pub trait Optionable {
    type Option: AsRef<str>;

    /// Sets a post-init option.
    fn set_option(&mut self, key: Self::Option, value: OptionValue) -> Result<()>;

    /// Gets an option value by key.
    fn get_option_string(&mut self, key: Self::Option) -> Result<String>;

    /// Gets an option value by key.
    fn get_option_bytes(&mut self, key: Self::Option) -> Result<Vec<u8>>;

    /// Gets an option value by key.
    fn get_option_int(&mut self, key: Self::Option) -> Result<i64>;

    /// Gets an option value by key.
    fn get_option_double(&mut self, key: Self::Option) -> Result<f64>;
}

/// Arguments of a login.
#[derive(Debug)]
pub struct ConnectParams<'a> {
    pub target: &'a str,
    pub credentials: &'a Credentials,
    pub auto_commit: bool,
    /// Point in time after which the login must give up.
    pub deadline: Option<Instant>,
    /// Trace settings the new connection handle starts with.
    pub trace: TraceState,
}

/// A placeholder of a prepared statement, in positional order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameter {
    /// `Some` for named placeholders such as `:id`.
    pub name: Option<String>,
}

/// Outcome of executing a statement.
pub struct Execution {
    /// Rows affected, `-1` if unknown.
    pub rows_affected: i64,
    /// Result set, `None` for statements that return no rows.
    pub results: Option<Box<dyn RecordBatchReader + Send>>,
}

impl Execution {
    pub fn rows(rows_affected: i64) -> Self {
        Self {
            rows_affected,
            results: None,
        }
    }

    pub fn results(results: Box<dyn RecordBatchReader + Send>) -> Self {
        Self {
            rows_affected: -1,
            results: Some(results),
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("rows_affected", &self.rows_affected)
            .field("results", &self.results.as_ref().map(|r| r.schema()))
            .finish()
    }
}

pub trait Driver: Send {
    fn name(&self) -> &str;

    /// Logs in to `params.target`.
    fn connect(&mut self, params: &ConnectParams<'_>) -> Result<Box<dyn Connection>>;

    /// Lists the targets this driver knows about.
    fn data_sources(&self) -> Result<Vec<String>> {
        Err(Error::with_message_and_status(
            "data_sources",
            Status::NotImplemented,
        ))
    }

    /// Called once the driver handle is destroyed, after all its connections.
    fn disconnect_all(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait Connection: Send {
    /// Parses `text`, failing with [`Status::Syntax`] if it cannot.
    fn prepare(&mut self, text: &str) -> Result<Box<dyn Statement>>;

    /// One-shot execution of `text`.
    fn execute_direct(&mut self, text: &str, params: &[Value]) -> Result<Execution> {
        let mut statement = self.prepare(text)?;
        let execution = statement.execute(params)?;
        statement.finish(false)?;
        Ok(execution)
    }

    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;

    /// Sees every valid attribute change before the registry applies it; an error
    /// rejects the change.
    fn store_attribute(&mut self, _key: OptionConnection, _value: &OptionValue) -> Result<()> {
        Ok(())
    }

    /// Overrides the value the registry would report.
    fn fetch_attribute(&self, _key: OptionConnection) -> Option<OptionValue> {
        None
    }
}

pub trait Statement: Send {
    fn parameters(&self) -> &[Parameter];

    /// Runs the statement; `params` holds one value per placeholder.
    fn execute(&mut self, params: &[Value]) -> Result<Execution>;

    /// Discards pending results. `from_destroy` is set when the handle is
    /// being released.
    fn finish(&mut self, _from_destroy: bool) -> Result<()> {
        Ok(())
    }

    fn store_attribute(&mut self, _key: OptionStatement, _value: &OptionValue) -> Result<()> {
        Ok(())
    }

    fn fetch_attribute(&self, _key: OptionStatement) -> Option<OptionValue> {
        None
    }
}
