//! Handle registry.
//!
//! Handles live in an arena of slots. Every node keeps a link to its parent and
//! the list of its children, so that destroying a node tears down its subtree
//! first. Slots are reused, and a generation counter makes sure an id of a
//! destroyed handle never resolves again.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::time::{Duration, Instant};

use arrow::datatypes::DataType;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use tracing::{debug, warn};

use crate::error::{Error, ErrorState, Result, Status};
use crate::options::{OptionConnection, OptionDriver, OptionValue};
use crate::trace::{self, TraceState, TOPIC_CON, TOPIC_DBD, TOPIC_ENC, TOPIC_SQL, TOPIC_TXN};
use crate::value::{Row, Value};
use crate::views::DriverView;
use crate::{ConnectParams, Connection, Driver, Optionable, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Driver,
    Connection,
    Statement,
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(HandleId);

        impl $name {
            pub fn id(&self) -> HandleId {
                self.0
            }
        }

        impl From<$name> for HandleId {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

handle!(
    /// Root of a handle tree.
    DriverHandle
);
handle!(
    /// Child of a [`DriverHandle`].
    ConnectionHandle
);
handle!(
    /// Child of a [`ConnectionHandle`].
    StatementHandle
);

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Driver-wide settings given at creation.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Overrides the registry default.
    pub trace: Option<TraceState>,
    pub connect_timeout: Option<Duration>,
}

impl DriverConfig {
    pub fn with_trace(mut self, trace: TraceState) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionState {
    #[default]
    Committed,
    /// Uncommitted writes exist.
    Pending,
}

/// Placeholder reference: 1-based position or name (with or without `:`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Position(usize),
    Name(String),
}

impl Display for ParamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamKey::Position(position) => write!(f, "{}", position),
            ParamKey::Name(name) => write!(f, ":{}", name.trim_start_matches(':')),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub value: Value,
    pub data_type: DataType,
}

pub(crate) struct DriverState {
    pub(crate) driver: Box<dyn Driver>,
    pub(crate) connect_timeout: Option<Duration>,
}

pub(crate) struct ConnectionState {
    pub(crate) connection: Box<dyn Connection>,
    pub(crate) target: String,
    pub(crate) username: String,
    pub(crate) auto_commit: bool,
    pub(crate) transaction: TransactionState,
    pub(crate) timeout: Option<Duration>,
}

pub(crate) struct StatementState {
    pub(crate) statement: Box<dyn Statement>,
    text: String,
    params: BTreeMap<usize, BoundParam>,
    cursor: Option<Cursor>,
}

struct Cursor {
    results: Option<Box<dyn RecordBatchReader + Send>>,
    has_results: bool,
    batch: Option<RecordBatch>,
    row: usize,
    position: u64,
    rows_affected: i64,
}

impl Cursor {
    /// Makes sure `batch` holds an unread row. `false` once results are drained.
    fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(batch) = &self.batch {
                if self.row < batch.num_rows() {
                    return Ok(true);
                }
            }
            self.batch = None;
            match self.results.as_mut().and_then(|results| results.next()) {
                Some(batch) => {
                    self.batch = Some(batch?);
                    self.row = 0;
                }
                None => {
                    self.results = None;
                    return Ok(false);
                }
            }
        }
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.advance()? {
            return Ok(None);
        }
        let Some(batch) = &self.batch else {
            return Ok(None);
        };
        let row = batch
            .columns()
            .iter()
            .map(|column| Value::from_array(column.as_ref(), self.row))
            .collect::<Result<Row>>()?;
        self.row += 1;
        self.position += 1;
        Ok(Some(row))
    }

    /// Rest of the current batch, or the next one.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if !self.advance()? {
            return Ok(None);
        }
        let Some(batch) = self.batch.take() else {
            return Ok(None);
        };
        let rest = batch.slice(self.row, batch.num_rows() - self.row);
        self.position += rest.num_rows() as u64;
        self.row = 0;
        Ok(Some(rest))
    }
}

pub(crate) enum Payload {
    Driver(DriverState),
    Connection(ConnectionState),
    Statement(StatementState),
}

impl Payload {
    fn kind(&self) -> HandleKind {
        match self {
            Payload::Driver(_) => HandleKind::Driver,
            Payload::Connection(_) => HandleKind::Connection,
            Payload::Statement(_) => HandleKind::Statement,
        }
    }
}

pub(crate) struct Node {
    parent: Option<HandleId>,
    children: Vec<HandleId>,
    error: ErrorState,
    pub(crate) trace: TraceState,
    pub(crate) payload: Payload,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

pub struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    default_trace: TraceState,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_live(id: HandleId) -> Error {
    Error::with_message_and_status(&format!("Handle {} is not live", id), Status::InvalidState)
}

impl Registry {
    /// Registry whose drivers start with the trace settings of `DBI_TRACE`.
    pub fn new() -> Self {
        Self::with_trace(trace::env_default())
    }

    pub fn with_trace(default_trace: TraceState) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            default_trace,
        }
    }

    // Arena

    pub(crate) fn node(&self, id: HandleId) -> Result<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or_else(|| not_live(id))
    }

    pub(crate) fn node_mut(&mut self, id: HandleId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or_else(|| not_live(id))
    }

    pub(crate) fn driver_state(&mut self, handle: DriverHandle) -> Result<&mut DriverState> {
        match &mut self.node_mut(handle.0)?.payload {
            Payload::Driver(state) => Ok(state),
            _ => Err(not_live(handle.0)),
        }
    }

    pub(crate) fn connection_state(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<&mut ConnectionState> {
        match &mut self.node_mut(handle.0)?.payload {
            Payload::Connection(state) => Ok(state),
            _ => Err(not_live(handle.0)),
        }
    }

    pub(crate) fn statement_state(
        &mut self,
        handle: StatementHandle,
    ) -> Result<&mut StatementState> {
        match &mut self.node_mut(handle.0)?.payload {
            Payload::Statement(state) => Ok(state),
            _ => Err(not_live(handle.0)),
        }
    }

    fn allocate(&mut self, parent: Option<HandleId>, trace: TraceState, payload: Payload) -> HandleId {
        let node = Node {
            parent,
            children: Vec::new(),
            error: ErrorState::clear(),
            trace,
            payload,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                HandleId {
                    index,
                    generation: 0,
                }
            }
        };
        if let Some(parent) = parent {
            if let Ok(parent) = self.node_mut(parent) {
                parent.children.push(id);
            }
        }
        id
    }

    fn release(&mut self, id: HandleId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        // A slot whose generation is exhausted is retired for good.
        if let Some(generation) = slot.generation.checked_add(1) {
            slot.generation = generation;
            self.free.push(id.index);
        }
        Some(node)
    }

    /// Overwrites the handle's error state with the outcome of `result`.
    pub(crate) fn record<T>(&mut self, id: HandleId, result: Result<T>) -> Result<T> {
        if let Ok(node) = self.node_mut(id) {
            node.error = match &result {
                Ok(_) => ErrorState::clear(),
                Err(error) => ErrorState::from(error),
            };
        }
        if let Err(error) = &result {
            self.emit(id, 0, 0, 1, || format!("error: {}", error));
        }
        result
    }

    pub(crate) fn emit(
        &self,
        id: HandleId,
        topic: u32,
        topic_level: u8,
        level: u8,
        message: impl FnOnce() -> String,
    ) {
        if self.should_trace(id, topic, topic_level, level) {
            debug!(
                target: "dbi",
                handle = %id,
                topic = trace::topic_name(topic),
                "{}",
                message()
            );
        }
    }

    // Handle registry

    pub fn create_driver(&mut self, driver: impl Driver + 'static, config: DriverConfig) -> DriverHandle {
        let name = driver.name().to_string();
        let trace = config.trace.unwrap_or(self.default_trace);
        let id = self.allocate(
            None,
            trace,
            Payload::Driver(DriverState {
                driver: Box::new(driver),
                connect_timeout: config.connect_timeout,
            }),
        );
        self.emit(id, TOPIC_CON, 1, 2, || format!("driver {} created", name));
        DriverHandle(id)
    }

    /// Creates a driver handle and applies `opts` to it. The handle is
    /// destroyed again if an option is rejected.
    pub fn create_driver_with_opts(
        &mut self,
        driver: impl Driver + 'static,
        opts: impl IntoIterator<Item = (OptionDriver, OptionValue)>,
    ) -> Result<DriverHandle> {
        let handle = self.create_driver(driver, DriverConfig::default());
        for (key, value) in opts {
            let result = self.driver_options(handle).set_option(key, value);
            if let Err(error) = result {
                self.destroy(handle);
                return Err(error);
            }
        }
        Ok(handle)
    }

    pub fn driver_options(&mut self, handle: DriverHandle) -> DriverView<'_> {
        DriverView::new(self, handle)
    }

    pub fn connect(
        &mut self,
        driver: DriverHandle,
        target: &str,
        credentials: &Credentials,
    ) -> Result<ConnectionHandle> {
        let opts = [
            (OptionConnection::Target, target.into()),
            (OptionConnection::Username, credentials.username.as_str().into()),
            (OptionConnection::Password, credentials.password.as_str().into()),
        ];
        self.connect_with_opts(driver, opts)
    }

    /// Logs in through `driver`. The outcome, failure included, is recorded on
    /// the driver handle.
    pub fn connect_with_opts(
        &mut self,
        driver: DriverHandle,
        opts: impl IntoIterator<Item = (OptionConnection, OptionValue)>,
    ) -> Result<ConnectionHandle> {
        let result = self.connect_inner(driver, opts);
        self.record(driver.0, result)
    }

    fn connect_inner(
        &mut self,
        driver: DriverHandle,
        opts: impl IntoIterator<Item = (OptionConnection, OptionValue)>,
    ) -> Result<ConnectionHandle> {
        let mut trace = self.node(driver.0)?.trace;
        let mut target = None;
        let mut credentials = Credentials::default();
        let mut auto_commit = true;
        let mut timeout = None;
        for (key, value) in opts {
            let name = key.as_ref();
            match key {
                OptionConnection::Target => target = Some(value.as_string(name)?),
                OptionConnection::Username => credentials.username = value.as_string(name)?,
                OptionConnection::Password => credentials.password = value.as_string(name)?,
                OptionConnection::AutoCommit => auto_commit = value.as_bool(name)?,
                OptionConnection::Timeout => timeout = value.as_timeout(name)?,
                OptionConnection::TraceLevel => trace.level = value.as_level(name)?,
                OptionConnection::TraceTopics => trace.topics = value.as_topics(name)?,
            }
        }
        let target = target.ok_or_else(|| {
            Error::with_message_and_status("Missing connection target", Status::InvalidArguments)
        })?;

        self.emit(driver.0, TOPIC_CON, 1, 2, || {
            format!("connect to {} as {:?}", target, credentials.username)
        });
        let state = self.driver_state(driver)?;
        let timeout = timeout.or(state.connect_timeout);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut connection = state.driver.connect(&ConnectParams {
            target: &target,
            credentials: &credentials,
            auto_commit,
            deadline,
            trace,
        })?;
        if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
            if Instant::now() > deadline {
                if let Err(error) = connection.disconnect() {
                    warn!(target: "dbi", "disconnect after late login failed: {}", error);
                }
                return Err(Error::with_message_and_status(
                    &format!("Connect to {} timed out after {:?}", target, timeout),
                    Status::Timeout,
                ));
            }
        }

        let id = self.allocate(
            Some(driver.0),
            trace,
            Payload::Connection(ConnectionState {
                connection,
                target,
                username: credentials.username,
                auto_commit,
                transaction: TransactionState::Committed,
                timeout,
            }),
        );
        Ok(ConnectionHandle(id))
    }

    pub fn prepare_statement(
        &mut self,
        connection: ConnectionHandle,
        text: &str,
    ) -> Result<StatementHandle> {
        let result = self.prepare_inner(connection, text);
        self.record(connection.0, result)
    }

    fn prepare_inner(&mut self, connection: ConnectionHandle, text: &str) -> Result<StatementHandle> {
        let trace = self.node(connection.0)?.trace;
        self.emit(connection.0, TOPIC_SQL, 1, 2, || format!("prepare: {}", text));
        let statement = self.connection_state(connection)?.connection.prepare(text)?;
        let id = self.allocate(
            Some(connection.0),
            trace,
            Payload::Statement(StatementState {
                statement,
                text: text.into(),
                params: BTreeMap::new(),
                cursor: None,
            }),
        );
        Ok(StatementHandle(id))
    }

    /// Destroys `handle` and everything below it, children first. Destroying
    /// a handle that is no longer live does nothing.
    ///
    /// Statements are finished, connections with uncommitted work are rolled
    /// back and disconnected, drivers get `disconnect_all`. Failures during
    /// teardown are logged; the handle is released regardless.
    pub fn destroy(&mut self, handle: impl Into<HandleId>) {
        let id = handle.into();
        let children = match self.node(id) {
            Ok(node) => node.children.clone(),
            Err(_) => return,
        };
        for child in children {
            self.destroy(child);
        }

        self.emit(id, TOPIC_CON, 1, 2, || format!("destroy {}", id));
        let Some(node) = self.release(id) else {
            return;
        };
        if let Some(parent) = node.parent {
            if let Ok(parent) = self.node_mut(parent) {
                parent.children.retain(|child| *child != id);
            }
        }

        let outcome = match node.payload {
            Payload::Statement(mut state) => state.statement.finish(true),
            Payload::Connection(mut state) => {
                let rollback = if state.transaction == TransactionState::Pending {
                    warn!(
                        target: "dbi",
                        handle = %id,
                        "rolling back uncommitted work on {} before disconnect",
                        state.target
                    );
                    state.connection.rollback()
                } else {
                    Ok(())
                };
                let disconnect = state.connection.disconnect();
                rollback.and(disconnect)
            }
            Payload::Driver(mut state) => state.driver.disconnect_all(),
        };
        if let Err(error) = outcome {
            warn!(target: "dbi", handle = %id, "teardown failed: {}", error);
        }
    }

    pub fn is_live(&self, handle: impl Into<HandleId>) -> bool {
        self.node(handle.into()).is_ok()
    }

    pub fn kind(&self, handle: impl Into<HandleId>) -> Option<HandleKind> {
        self.node(handle.into()).ok().map(|node| node.payload.kind())
    }

    pub fn parent(&self, handle: impl Into<HandleId>) -> Option<HandleId> {
        self.node(handle.into()).ok().and_then(|node| node.parent)
    }

    pub fn children(&self, handle: impl Into<HandleId>) -> Vec<HandleId> {
        self.node(handle.into())
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn connections(&self, driver: DriverHandle) -> Vec<ConnectionHandle> {
        self.children(driver)
            .into_iter()
            .map(ConnectionHandle)
            .collect()
    }

    pub fn statements(&self, connection: ConnectionHandle) -> Vec<StatementHandle> {
        self.children(connection)
            .into_iter()
            .map(StatementHandle)
            .collect()
    }

    /// Number of live handles of every kind.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Error/state reporter

    /// Overwrites the handle's error state as a whole.
    pub fn set_error(
        &mut self,
        handle: impl Into<HandleId>,
        code: i32,
        state: &str,
        message: &str,
    ) -> Result<()> {
        let id = handle.into();
        self.node_mut(id)?.error = ErrorState::new(code, state, message);
        self.emit(id, 0, 0, 1, || format!("set error {} [{}] {}", code, state, message));
        Ok(())
    }

    /// Outcome of the last fallible operation on the handle; the all-clear
    /// sentinel if it succeeded, if nothing failed yet, or if the handle is
    /// gone.
    pub fn get_error(&self, handle: impl Into<HandleId>) -> ErrorState {
        self.node(handle.into())
            .map(|node| node.error.clone())
            .unwrap_or_default()
    }

    // Trace controller

    /// Handles created below this one afterwards start with a copy.
    pub fn set_trace(&mut self, handle: impl Into<HandleId>, level: u8, topics: u32) -> Result<()> {
        self.node_mut(handle.into())?.trace = TraceState::new(level, topics);
        Ok(())
    }

    pub fn trace_state(&self, handle: impl Into<HandleId>) -> Result<TraceState> {
        Ok(self.node(handle.into())?.trace)
    }

    /// Whether an event of `topic_mask` should be emitted for the handle; see
    /// [`TraceState::should_trace`]. Never for a handle that is gone.
    pub fn should_trace(
        &self,
        handle: impl Into<HandleId>,
        topic_mask: u32,
        topic_level: u8,
        level: u8,
    ) -> bool {
        self.node(handle.into())
            .map(|node| node.trace.should_trace(topic_mask, topic_level, level))
            .unwrap_or(false)
    }

    /// [`Registry::should_trace`] with one threshold for both the topic and
    /// the general level.
    pub fn should_trace_level(
        &self,
        handle: impl Into<HandleId>,
        topic_mask: u32,
        level: u8,
    ) -> bool {
        self.should_trace(handle, topic_mask, level, level)
    }

    // Driver operations

    pub fn driver_name(&self, driver: DriverHandle) -> Result<&str> {
        match &self.node(driver.0)?.payload {
            Payload::Driver(state) => Ok(state.driver.name()),
            _ => Err(not_live(driver.0)),
        }
    }

    pub fn data_sources(&mut self, driver: DriverHandle) -> Result<Vec<String>> {
        let result = self
            .driver_state(driver)
            .and_then(|state| state.driver.data_sources());
        self.record(driver.0, result)
    }

    // Connection operations

    /// Executes `text` once without keeping a statement handle. Returns the
    /// number of affected rows, `-1` if unknown.
    pub fn do_statement(
        &mut self,
        connection: ConnectionHandle,
        text: &str,
        params: &[Value],
    ) -> Result<i64> {
        self.emit(connection.0, TOPIC_SQL, 1, 2, || format!("do: {}", text));
        let result = self.connection_state(connection).and_then(|state| {
            let execution = state.connection.execute_direct(text, params)?;
            if execution.results.is_none() && !state.auto_commit {
                state.transaction = TransactionState::Pending;
            }
            Ok(execution.rows_affected)
        });
        self.record(connection.0, result)
    }

    pub fn commit(&mut self, connection: ConnectionHandle) -> Result<()> {
        self.emit(connection.0, TOPIC_TXN, 1, 2, || "commit".into());
        let result = self.connection_state(connection).and_then(|state| {
            if state.auto_commit {
                return Err(Error::with_message_and_status(
                    "Commit ineffective with AutoCommit enabled",
                    Status::InvalidState,
                ));
            }
            state.connection.commit()?;
            state.transaction = TransactionState::Committed;
            Ok(())
        });
        self.record(connection.0, result)
    }

    pub fn rollback(&mut self, connection: ConnectionHandle) -> Result<()> {
        self.emit(connection.0, TOPIC_TXN, 1, 2, || "rollback".into());
        let result = self.connection_state(connection).and_then(|state| {
            if state.auto_commit {
                return Err(Error::with_message_and_status(
                    "Rollback ineffective with AutoCommit enabled",
                    Status::InvalidState,
                ));
            }
            state.connection.rollback()?;
            state.transaction = TransactionState::Committed;
            Ok(())
        });
        self.record(connection.0, result)
    }

    pub fn transaction_state(&mut self, connection: ConnectionHandle) -> Result<TransactionState> {
        Ok(self.connection_state(connection)?.transaction)
    }

    // Statement operations

    pub fn statement_text(&self, statement: StatementHandle) -> Result<&str> {
        match &self.node(statement.0)?.payload {
            Payload::Statement(state) => Ok(&state.text),
            _ => Err(not_live(statement.0)),
        }
    }

    pub fn param_count(&mut self, statement: StatementHandle) -> Result<usize> {
        Ok(self.statement_state(statement)?.statement.parameters().len())
    }

    pub fn bound_param(&mut self, statement: StatementHandle, position: usize) -> Result<Option<BoundParam>> {
        Ok(self.statement_state(statement)?.params.get(&position).cloned())
    }

    /// Binds the placeholder at 1-based `position`.
    pub fn bind(
        &mut self,
        statement: StatementHandle,
        position: usize,
        value: impl Into<Value>,
        data_type: Option<DataType>,
    ) -> Result<()> {
        self.bind_param(statement, ParamKey::Position(position), value.into(), data_type)
    }

    pub fn bind_named(
        &mut self,
        statement: StatementHandle,
        name: &str,
        value: impl Into<Value>,
        data_type: Option<DataType>,
    ) -> Result<()> {
        self.bind_param(statement, ParamKey::Name(name.into()), value.into(), data_type)
    }

    /// Binds a placeholder. Without `data_type` the value's own type is
    /// declared. Fails with [`Status::Bind`] if the placeholder does not exist
    /// or the value does not fit the declared type.
    pub fn bind_param(
        &mut self,
        statement: StatementHandle,
        key: ParamKey,
        value: Value,
        data_type: Option<DataType>,
    ) -> Result<()> {
        let result = self.bind_inner(statement, &key, value, data_type);
        if let Ok(bound) = &result {
            self.emit(statement.0, TOPIC_ENC, 1, 3, || {
                format!("bind {} = {} ({})", key, bound.value, bound.data_type)
            });
        }
        self.record(statement.0, result.map(|_| ()))
    }

    fn bind_inner(
        &mut self,
        statement: StatementHandle,
        key: &ParamKey,
        value: Value,
        data_type: Option<DataType>,
    ) -> Result<BoundParam> {
        let state = self.statement_state(statement)?;
        let parameters = state.statement.parameters();
        let position = match key {
            ParamKey::Position(position) => {
                if *position == 0 || *position > parameters.len() {
                    return Err(Error::with_message_and_status(
                        &format!(
                            "Parameter index {} out of range, statement has {} placeholders",
                            position,
                            parameters.len()
                        ),
                        Status::Bind,
                    ));
                }
                *position
            }
            ParamKey::Name(name) => {
                let name = name.trim_start_matches(':');
                parameters
                    .iter()
                    .position(|parameter| parameter.name.as_deref() == Some(name))
                    .map(|index| index + 1)
                    .ok_or_else(|| {
                        Error::with_message_and_status(
                            &format!("Unknown parameter :{}", name),
                            Status::Bind,
                        )
                    })?
            }
        };
        let data_type = data_type.unwrap_or_else(|| value.data_type());
        let value = value.coerce(&data_type).ok_or_else(|| {
            Error::with_message_and_status(
                &format!("Value {} does not match declared type {}", value, data_type),
                Status::Bind,
            )
        })?;
        let bound = BoundParam { value, data_type };
        state.params.insert(position, bound.clone());
        Ok(bound)
    }

    /// Runs the statement with its bound parameters and opens a cursor on the
    /// results. Returns the number of affected rows, `-1` if unknown.
    pub fn execute(&mut self, statement: StatementHandle) -> Result<i64> {
        let result = self.execute_inner(statement);
        self.record(statement.0, result)
    }

    fn execute_inner(&mut self, statement: StatementHandle) -> Result<i64> {
        let parent = self.node(statement.0)?.parent;
        let state = self.statement_state(statement)?;
        let text = state.text.clone();

        let count = state.statement.parameters().len();
        let mut values = Vec::with_capacity(count);
        for position in 1..=count {
            let bound = state.params.get(&position).ok_or_else(|| {
                Error::with_message_and_status(
                    &format!("Parameter {} is not bound", position),
                    Status::Bind,
                )
            })?;
            values.push(bound.value.clone());
        }
        if state.cursor.take().is_some() {
            state.statement.finish(false)?;
        }
        self.emit(statement.0, TOPIC_SQL, 1, 2, || format!("execute: {}", text));

        let state = self.statement_state(statement)?;
        let execution = state.statement.execute(&values)?;
        let rows_affected = execution.rows_affected;
        let has_results = execution.results.is_some();
        state.cursor = Some(Cursor {
            results: execution.results,
            has_results,
            batch: None,
            row: 0,
            position: 0,
            rows_affected,
        });

        if !has_results {
            if let Some(parent) = parent {
                let connection = self.connection_state(ConnectionHandle(parent))?;
                if !connection.auto_commit {
                    connection.transaction = TransactionState::Pending;
                }
            }
        }
        Ok(rows_affected)
    }

    fn cursor(&mut self, statement: StatementHandle) -> Result<&mut Cursor> {
        let cursor = self
            .statement_state(statement)?
            .cursor
            .as_mut()
            .ok_or_else(|| {
                Error::with_message_and_status("Statement has not been executed", Status::InvalidState)
            })?;
        if !cursor.has_results {
            return Err(Error::with_message_and_status(
                "Statement has no result set",
                Status::InvalidState,
            ));
        }
        Ok(cursor)
    }

    /// Next row of the result set, `None` once it is drained.
    pub fn fetch(&mut self, statement: StatementHandle) -> Result<Option<Row>> {
        let result = self.cursor(statement).and_then(Cursor::next_row);
        if let Ok(Some(row)) = &result {
            self.emit(statement.0, TOPIC_DBD, 2, 4, || format!("fetched {} columns", row.len()));
        }
        self.record(statement.0, result)
    }

    /// Unread rows of the current batch, or the next batch.
    pub fn fetch_batch(&mut self, statement: StatementHandle) -> Result<Option<RecordBatch>> {
        let result = self.cursor(statement).and_then(Cursor::next_batch);
        if let Ok(Some(batch)) = &result {
            self.emit(statement.0, TOPIC_DBD, 2, 4, || {
                format!("fetched batch of {} rows", batch.num_rows())
            });
        }
        self.record(statement.0, result)
    }

    /// Discards unread results. Bindings are kept.
    pub fn finish(&mut self, statement: StatementHandle) -> Result<()> {
        let result = self.statement_state(statement).and_then(|state| {
            state.cursor = None;
            state.statement.finish(false)
        });
        self.record(statement.0, result)
    }

    /// Rows fetched so far for a query, rows affected otherwise; `-1` before
    /// execution or when unknown.
    pub fn rows(&mut self, statement: StatementHandle) -> Result<i64> {
        Ok(match &self.statement_state(statement)?.cursor {
            Some(cursor) if cursor.has_results => cursor.position as i64,
            Some(cursor) => cursor.rows_affected,
            None => -1,
        })
    }

    /// Rows consumed from the result set; `None` until executed.
    pub fn cursor_position(&mut self, statement: StatementHandle) -> Result<Option<u64>> {
        Ok(self
            .statement_state(statement)?
            .cursor
            .as_ref()
            .map(|cursor| cursor.position))
    }
}
