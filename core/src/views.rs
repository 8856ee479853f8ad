//! Attribute access on a single handle.
//!
//! A view borrows the registry for one handle and implements [`Optionable`].
//! Like every other fallible call, getting or setting an option overwrites
//! the handle's error state.

use crate::error::{Error, Result, Status};
use crate::options::{
    incorrect, OptionConnection, OptionDriver, OptionStatement, OptionValue,
};
use crate::registry::{ConnectionHandle, DriverHandle, Registry, StatementHandle, TransactionState};
use crate::trace::TOPIC_TXN;
use crate::Optionable;

fn expect_string(value: OptionValue, key: &str) -> Result<String> {
    match value {
        OptionValue::String(value) => Ok(value),
        _ => Err(incorrect(key)),
    }
}

fn expect_bytes(value: OptionValue, key: &str) -> Result<Vec<u8>> {
    match value {
        OptionValue::Bytes(value) => Ok(value),
        _ => Err(incorrect(key)),
    }
}

fn expect_int(value: OptionValue, key: &str) -> Result<i64> {
    match value {
        OptionValue::Int(value) => Ok(value),
        _ => Err(incorrect(key)),
    }
}

fn expect_double(value: OptionValue, key: &str) -> Result<f64> {
    match value {
        OptionValue::Double(value) => Ok(value),
        _ => Err(incorrect(key)),
    }
}

fn unset(key: &str) -> Error {
    Error::with_message_and_status(&format!("Option {} is not set", key), Status::NotFound)
}

fn millis(timeout: Option<std::time::Duration>, key: &str) -> Result<OptionValue> {
    timeout
        .map(|timeout| OptionValue::Int(timeout.as_millis() as i64))
        .ok_or_else(|| unset(key))
}

/// Typed getters on top of `fetch`, each recording its outcome.
macro_rules! typed_getters {
    () => {
        fn get_option_string(&mut self, key: Self::Option) -> Result<String> {
            let result = self
                .fetch(key)
                .and_then(|value| expect_string(value, key.as_ref()));
            self.registry.record(self.handle.id(), result)
        }

        fn get_option_bytes(&mut self, key: Self::Option) -> Result<Vec<u8>> {
            let result = self
                .fetch(key)
                .and_then(|value| expect_bytes(value, key.as_ref()));
            self.registry.record(self.handle.id(), result)
        }

        fn get_option_int(&mut self, key: Self::Option) -> Result<i64> {
            let result = self
                .fetch(key)
                .and_then(|value| expect_int(value, key.as_ref()));
            self.registry.record(self.handle.id(), result)
        }

        fn get_option_double(&mut self, key: Self::Option) -> Result<f64> {
            let result = self
                .fetch(key)
                .and_then(|value| expect_double(value, key.as_ref()));
            self.registry.record(self.handle.id(), result)
        }
    };
}

pub struct DriverView<'a> {
    registry: &'a mut Registry,
    handle: DriverHandle,
}

impl<'a> DriverView<'a> {
    pub(crate) fn new(registry: &'a mut Registry, handle: DriverHandle) -> Self {
        Self { registry, handle }
    }

    fn store(&mut self, key: OptionDriver, value: OptionValue) -> Result<()> {
        let name = key.as_ref();
        match key {
            OptionDriver::TraceLevel => {
                let level = value.as_level(name)?;
                self.registry.node_mut(self.handle.id())?.trace.level = level;
            }
            OptionDriver::TraceTopics => {
                let topics = value.as_topics(name)?;
                self.registry.node_mut(self.handle.id())?.trace.topics = topics;
            }
            OptionDriver::ConnectTimeout => {
                let timeout = value.as_timeout(name)?;
                self.registry.driver_state(self.handle)?.connect_timeout = timeout;
            }
        }
        Ok(())
    }

    fn fetch(&mut self, key: OptionDriver) -> Result<OptionValue> {
        let trace = self.registry.node(self.handle.id())?.trace;
        match key {
            OptionDriver::TraceLevel => Ok(OptionValue::Int(trace.level.into())),
            OptionDriver::TraceTopics => Ok(OptionValue::Int(trace.topics.into())),
            OptionDriver::ConnectTimeout => millis(
                self.registry.driver_state(self.handle)?.connect_timeout,
                key.as_ref(),
            ),
        }
    }
}

impl Optionable for DriverView<'_> {
    type Option = OptionDriver;

    fn set_option(&mut self, key: Self::Option, value: OptionValue) -> Result<()> {
        let result = self.store(key, value);
        self.registry.record(self.handle.id(), result)
    }

    typed_getters!();
}

pub struct ConnectionView<'a> {
    registry: &'a mut Registry,
    handle: ConnectionHandle,
}

impl<'a> ConnectionView<'a> {
    fn store(&mut self, key: OptionConnection, value: OptionValue) -> Result<()> {
        let name = key.as_ref();
        match key {
            OptionConnection::Target | OptionConnection::Username | OptionConnection::Password => {
                Err(Error::with_message_and_status(
                    &format!("Option {} can only be set when connecting", name),
                    Status::InvalidState,
                ))
            }
            OptionConnection::AutoCommit => {
                let enabled = value.as_bool(name)?;
                let state = self.registry.connection_state(self.handle)?;
                // Switching auto-commit on commits outstanding work.
                let commit = enabled && !state.auto_commit && state.transaction == TransactionState::Pending;
                if commit {
                    state.connection.commit()?;
                    state.transaction = TransactionState::Committed;
                }
                state.connection.store_attribute(key, &value)?;
                state.auto_commit = enabled;
                if commit {
                    self.registry.emit(self.handle.id(), TOPIC_TXN, 1, 2, || {
                        "commit on enabling AutoCommit".into()
                    });
                }
                Ok(())
            }
            OptionConnection::Timeout => {
                let timeout = value.as_timeout(name)?;
                let state = self.registry.connection_state(self.handle)?;
                state.connection.store_attribute(key, &value)?;
                state.timeout = timeout;
                Ok(())
            }
            OptionConnection::TraceLevel | OptionConnection::TraceTopics => {
                let node = self.registry.node_mut(self.handle.id())?;
                if key == OptionConnection::TraceLevel {
                    node.trace.level = value.as_level(name)?;
                } else {
                    node.trace.topics = value.as_topics(name)?;
                }
                Ok(())
            }
        }
    }

    fn fetch(&mut self, key: OptionConnection) -> Result<OptionValue> {
        let trace = self.registry.node(self.handle.id())?.trace;
        let state = self.registry.connection_state(self.handle)?;
        if let Some(value) = state.connection.fetch_attribute(key) {
            return Ok(value);
        }
        match key {
            OptionConnection::Target => Ok(state.target.as_str().into()),
            OptionConnection::Username => Ok(state.username.as_str().into()),
            OptionConnection::Password => Err(Error::with_message_and_status(
                "Option dbi.connection.password is write-only",
                Status::NotFound,
            )),
            OptionConnection::AutoCommit => Ok(state.auto_commit.into()),
            OptionConnection::Timeout => millis(state.timeout, key.as_ref()),
            OptionConnection::TraceLevel => Ok(OptionValue::Int(trace.level.into())),
            OptionConnection::TraceTopics => Ok(OptionValue::Int(trace.topics.into())),
        }
    }
}

impl Optionable for ConnectionView<'_> {
    type Option = OptionConnection;

    fn set_option(&mut self, key: Self::Option, value: OptionValue) -> Result<()> {
        let result = self.store(key, value);
        self.registry.record(self.handle.id(), result)
    }

    typed_getters!();
}

pub struct StatementView<'a> {
    registry: &'a mut Registry,
    handle: StatementHandle,
}

impl<'a> StatementView<'a> {
    fn store(&mut self, key: OptionStatement, value: OptionValue) -> Result<()> {
        let name = key.as_ref();
        let mut trace = self.registry.node(self.handle.id())?.trace;
        match key {
            OptionStatement::TraceLevel => trace.level = value.as_level(name)?,
            OptionStatement::TraceTopics => trace.topics = value.as_topics(name)?,
        }
        self.registry
            .statement_state(self.handle)?
            .statement
            .store_attribute(key, &value)?;
        self.registry.node_mut(self.handle.id())?.trace = trace;
        Ok(())
    }

    fn fetch(&mut self, key: OptionStatement) -> Result<OptionValue> {
        let trace = self.registry.node(self.handle.id())?.trace;
        let state = self.registry.statement_state(self.handle)?;
        if let Some(value) = state.statement.fetch_attribute(key) {
            return Ok(value);
        }
        match key {
            OptionStatement::TraceLevel => Ok(OptionValue::Int(trace.level.into())),
            OptionStatement::TraceTopics => Ok(OptionValue::Int(trace.topics.into())),
        }
    }
}

impl Optionable for StatementView<'_> {
    type Option = OptionStatement;

    fn set_option(&mut self, key: Self::Option, value: OptionValue) -> Result<()> {
        let result = self.store(key, value);
        self.registry.record(self.handle.id(), result)
    }

    typed_getters!();
}

impl Registry {
    pub fn connection_options(&mut self, handle: ConnectionHandle) -> ConnectionView<'_> {
        ConnectionView {
            registry: self,
            handle,
        }
    }

    pub fn statement_options(&mut self, handle: StatementHandle) -> StatementView<'_> {
        StatementView {
            registry: self,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::value::Value;
    use crate::{
        ConnectParams, Connection, Driver, DriverConfig, Execution, Parameter, Statement,
        TraceState,
    };

    type Calls = Arc<Mutex<Vec<String>>>;

    struct StubDriver {
        calls: Calls,
        commit_fails: bool,
    }

    struct StubConnection {
        calls: Calls,
        commit_fails: bool,
    }

    struct StubStatement {
        calls: Calls,
    }

    impl Driver for StubDriver {
        fn name(&self) -> &str {
            "stub"
        }

        fn connect(&mut self, _params: &ConnectParams<'_>) -> Result<Box<dyn Connection>> {
            Ok(Box::new(StubConnection {
                calls: self.calls.clone(),
                commit_fails: self.commit_fails,
            }))
        }
    }

    impl Connection for StubConnection {
        fn prepare(&mut self, _text: &str) -> Result<Box<dyn Statement>> {
            Ok(Box::new(StubStatement {
                calls: self.calls.clone(),
            }))
        }

        fn commit(&mut self) -> Result<()> {
            if self.commit_fails {
                return Err(Error::with_message_and_status("commit failed", Status::Execution));
            }
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }

        fn store_attribute(&mut self, key: OptionConnection, _value: &OptionValue) -> Result<()> {
            self.calls.lock().unwrap().push(key.as_ref().into());
            Ok(())
        }
    }

    impl Statement for StubStatement {
        fn parameters(&self) -> &[Parameter] {
            &[]
        }

        fn execute(&mut self, _params: &[Value]) -> Result<Execution> {
            Ok(Execution::rows(0))
        }

        fn store_attribute(&mut self, key: OptionStatement, _value: &OptionValue) -> Result<()> {
            self.calls.lock().unwrap().push(key.as_ref().into());
            Ok(())
        }
    }

    fn setup(commit_fails: bool) -> (Registry, ConnectionHandle, Calls) {
        let calls = Calls::default();
        let mut registry = Registry::with_trace(TraceState::silent());
        let driver = registry.create_driver(
            StubDriver {
                calls: calls.clone(),
                commit_fails,
            },
            DriverConfig::default(),
        );
        let opts = [
            (OptionConnection::Target, "t".into()),
            (OptionConnection::AutoCommit, false.into()),
        ];
        let connection = registry.connect_with_opts(driver, opts).unwrap();
        calls.lock().unwrap().clear();
        (registry, connection, calls)
    }

    #[test]
    fn test_invalid_statement_option_not_passed_to_driver() {
        let (mut registry, connection, calls) = setup(false);
        let statement = registry.prepare_statement(connection, "x").unwrap();
        let mut options = registry.statement_options(statement);

        let err = options
            .set_option(OptionStatement::TraceLevel, OptionValue::Int(-1))
            .unwrap_err();
        assert_eq!(err.status, Status::InvalidData);
        assert!(calls.lock().unwrap().is_empty());

        options
            .set_option(OptionStatement::TraceLevel, OptionValue::Int(3))
            .unwrap();
        assert_eq!(options.get_option_int(OptionStatement::TraceLevel).unwrap(), 3);
        assert_eq!(*calls.lock().unwrap(), vec!["dbi.trace.level".to_string()]);
    }

    #[test]
    fn test_failed_commit_keeps_auto_commit_off() {
        let (mut registry, connection, calls) = setup(true);
        registry.do_statement(connection, "x", &[]).unwrap();
        assert_eq!(
            registry.transaction_state(connection).unwrap(),
            TransactionState::Pending
        );

        let err = registry
            .connection_options(connection)
            .set_option(OptionConnection::AutoCommit, true.into())
            .unwrap_err();
        assert_eq!(err.status, Status::Execution);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(
            registry.transaction_state(connection).unwrap(),
            TransactionState::Pending
        );
        let enabled = registry
            .connection_options(connection)
            .get_option_string(OptionConnection::AutoCommit)
            .unwrap();
        assert_eq!(enabled, "false");
    }

    #[test]
    fn test_auto_commit_reaches_driver_after_commit() {
        let (mut registry, connection, calls) = setup(false);
        registry.do_statement(connection, "x", &[]).unwrap();
        registry
            .connection_options(connection)
            .set_option(OptionConnection::AutoCommit, true.into())
            .unwrap();
        assert_eq!(
            registry.transaction_state(connection).unwrap(),
            TransactionState::Committed
        );
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["dbi.connection.autocommit".to_string()]
        );
    }
}
