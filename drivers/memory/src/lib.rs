//! In-memory driver.
//!
//! Every target owns a catalog of tables shared by all connections to it.
//! With auto-commit off, a connection keeps an undo entry for each of its
//! successful writes; rollback and disconnect revert only those, newest
//! first. Uncommitted writes are visible to other connections.
//!
//! ```
//! use dbi_core::{Credentials, DriverConfig, Registry, TraceState};
//! use dbi_memory::MemoryDriver;
//!
//! let mut registry = Registry::with_trace(TraceState::silent());
//! let driver = registry.create_driver(
//!     MemoryDriver::new().with_target("t1", "user", "secret"),
//!     DriverConfig::default(),
//! );
//! let connection = registry
//!     .connect(driver, "t1", &Credentials::new("user", "secret"))
//!     .unwrap();
//! let statement = registry.prepare_statement(connection, "SELECT 1").unwrap();
//! registry.execute(statement).unwrap();
//! assert!(registry.fetch(statement).unwrap().is_some());
//! ```

mod catalog;
mod exec;
mod sql;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use dbi_core::error::{Error, Result, Status};
use dbi_core::options::{OptionConnection, OptionValue};
use dbi_core::trace::{TOPIC_CON, TOPIC_DBD, TOPIC_TXN};
use dbi_core::value::Value;
use dbi_core::{
    ConnectParams, Connection, Credentials, Driver, Execution, Parameter, Statement, TraceState,
};

use catalog::{Catalog, Undo};
use sql::Parsed;

const DEFAULT_BATCH_SIZE: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        Error::with_message_and_status("Catalog lock poisoned", Status::Execution)
    })
}

struct Target {
    accounts: Vec<Credentials>,
    latency: Duration,
    catalog: Arc<Mutex<Catalog>>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            latency: Duration::ZERO,
            catalog: Arc::new(Mutex::new(Catalog::default())),
        }
    }
}

pub struct MemoryDriver {
    targets: HashMap<String, Target>,
    batch_size: usize,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            targets: HashMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Declares `target` and an account allowed to log in to it.
    pub fn with_target(mut self, target: &str, username: &str, password: &str) -> Self {
        self.targets
            .entry(target.into())
            .or_default()
            .accounts
            .push(Credentials::new(username, password));
        self
    }

    /// Makes logins to `target` take `latency`.
    pub fn with_latency(mut self, target: &str, latency: Duration) -> Self {
        self.targets.entry(target.into()).or_default().latency = latency;
        self
    }

    /// Maximum number of rows per result batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn connect(&mut self, params: &ConnectParams<'_>) -> Result<Box<dyn Connection>> {
        let target = self.targets.get(params.target).ok_or_else(|| {
            Error::with_message_and_status(
                &format!("Unknown target {}", params.target),
                Status::Connection,
            )
            .with_sqlstate("08001")
        })?;

        if !target.latency.is_zero() {
            let ready = Instant::now() + target.latency;
            match params.deadline {
                Some(deadline) if ready > deadline => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return Err(Error::with_message_and_status(
                        &format!("Login to {} timed out", params.target),
                        Status::Timeout,
                    )
                    .with_sqlstate("HYT00"));
                }
                _ => std::thread::sleep(target.latency),
            }
        }

        if !target.accounts.contains(params.credentials) {
            return Err(Error::with_message_and_status(
                &format!(
                    "Login to {} failed for user {:?}",
                    params.target, params.credentials.username
                ),
                Status::Connection,
            )
            .with_sqlstate("28000"));
        }

        if params.trace.should_trace(TOPIC_CON, 1, 2) {
            debug!(
                target: "dbi_memory",
                target_name = params.target,
                user = params.credentials.username.as_str(),
                "logged in"
            );
        }
        Ok(Box::new(MemoryConnection {
            catalog: target.catalog.clone(),
            session: Arc::new(Mutex::new(Session {
                auto_commit: params.auto_commit,
                undo: Vec::new(),
            })),
            batch_size: self.batch_size,
            trace: params.trace,
        }))
    }

    fn data_sources(&self) -> Result<Vec<String>> {
        let mut targets: Vec<String> = self.targets.keys().cloned().collect();
        targets.sort();
        Ok(targets)
    }
}

struct Session {
    auto_commit: bool,
    /// Reverts this connection's writes since the last commit.
    undo: Vec<Undo>,
}

pub struct MemoryConnection {
    catalog: Arc<Mutex<Catalog>>,
    session: Arc<Mutex<Session>>,
    batch_size: usize,
    trace: TraceState,
}

impl MemoryConnection {
    /// Reverts pending writes, returning how many there were.
    fn revert(&mut self) -> Result<usize> {
        let undo = std::mem::take(&mut lock(&self.session)?.undo);
        let reverted = undo.len();
        if reverted > 0 {
            let mut catalog = lock(&self.catalog)?;
            for entry in undo.into_iter().rev() {
                catalog.revert(entry);
            }
        }
        Ok(reverted)
    }
}

impl Connection for MemoryConnection {
    fn prepare(&mut self, text: &str) -> Result<Box<dyn Statement>> {
        let parsed = sql::parse(text)?;
        if self.trace.should_trace(TOPIC_DBD, 2, 4) {
            debug!(
                target: "dbi_memory",
                parameters = parsed.parameters.len(),
                "parsed {:?}",
                parsed.command
            );
        }
        Ok(Box::new(MemoryStatement {
            parsed,
            catalog: self.catalog.clone(),
            session: self.session.clone(),
            batch_size: self.batch_size,
        }))
    }

    fn commit(&mut self) -> Result<()> {
        let committed = std::mem::take(&mut lock(&self.session)?.undo).len();
        if self.trace.should_trace(TOPIC_TXN, 2, 4) {
            debug!(target: "dbi_memory", writes = committed, "commit");
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let reverted = self.revert()?;
        if self.trace.should_trace(TOPIC_TXN, 2, 4) {
            debug!(target: "dbi_memory", writes = reverted, "rollback");
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.revert()?;
        Ok(())
    }

    fn store_attribute(&mut self, key: OptionConnection, value: &OptionValue) -> Result<()> {
        if key == OptionConnection::AutoCommit {
            let enabled = value.as_bool(key.as_ref())?;
            let mut session = lock(&self.session)?;
            session.auto_commit = enabled;
            if enabled {
                session.undo.clear();
            }
        }
        Ok(())
    }
}

pub struct MemoryStatement {
    parsed: Parsed,
    catalog: Arc<Mutex<Catalog>>,
    session: Arc<Mutex<Session>>,
    batch_size: usize,
}

impl Statement for MemoryStatement {
    fn parameters(&self) -> &[Parameter] {
        &self.parsed.parameters
    }

    fn execute(&mut self, params: &[Value]) -> Result<Execution> {
        if params.len() != self.parsed.parameters.len() {
            return Err(Error::with_message_and_status(
                &format!(
                    "Statement expects {} parameters, got {}",
                    self.parsed.parameters.len(),
                    params.len()
                ),
                Status::Bind,
            )
            .with_sqlstate("07001"));
        }

        let mut session = lock(&self.session)?;
        let mut undo = Vec::new();
        let execution = exec::execute(
            &mut *lock(&self.catalog)?,
            &self.parsed.command,
            params,
            self.batch_size,
            &mut undo,
        )?;
        if !session.auto_commit {
            session.undo.extend(undo);
        }
        Ok(execution)
    }
}
