use std::time::Duration;

use dbi_core::error::Status;
use dbi_core::options::{OptionConnection, OptionDriver, OptionStatement};
use dbi_core::{Credentials, DriverConfig, Optionable, Registry, TraceState};

pub mod common;

#[test]
fn test_driver_options() {
    let mut registry = Registry::with_trace(TraceState::silent());
    let opts = [
        (OptionDriver::ConnectTimeout, 1500.into()),
        (OptionDriver::TraceLevel, 2.into()),
    ];
    let driver = registry
        .create_driver_with_opts(common::driver(), opts)
        .unwrap();

    let mut options = registry.driver_options(driver);
    assert_eq!(options.get_option_int(OptionDriver::ConnectTimeout).unwrap(), 1500);
    assert_eq!(options.get_option_int(OptionDriver::TraceLevel).unwrap(), 2);
    assert_eq!(options.get_option_int(OptionDriver::TraceTopics).unwrap(), 0);

    let err = options
        .get_option_string(OptionDriver::TraceLevel)
        .unwrap_err();
    assert_eq!(err.status, Status::InvalidData);
    assert_eq!(registry.get_error(driver).code, Status::InvalidData.code());
}

#[test]
fn test_driver_options_rejected() {
    let mut registry = Registry::with_trace(TraceState::silent());
    let opts = [(OptionDriver::TraceLevel, "loud".into())];
    let err = registry
        .create_driver_with_opts(common::driver(), opts)
        .unwrap_err();
    assert_eq!(err.status, Status::InvalidData);
    assert!(registry.is_empty());
}

#[test]
fn test_unset_connect_timeout() {
    let (mut registry, driver) = common::setup();
    let err = registry
        .driver_options(driver)
        .get_option_int(OptionDriver::ConnectTimeout)
        .unwrap_err();
    assert_eq!(err.status, Status::NotFound);
}

#[test]
fn test_connection_options() {
    let (mut registry, _, connection) = common::setup_connection();
    let mut options = registry.connection_options(connection);

    assert_eq!(
        options.get_option_string(OptionConnection::Target).unwrap(),
        "t1"
    );
    assert_eq!(
        options.get_option_string(OptionConnection::Username).unwrap(),
        common::USER
    );
    assert_eq!(
        options.get_option_string(OptionConnection::AutoCommit).unwrap(),
        "true"
    );
    let err = options
        .get_option_string(OptionConnection::Password)
        .unwrap_err();
    assert_eq!(err.status, Status::NotFound);

    let err = options
        .set_option(OptionConnection::Target, "t2".into())
        .unwrap_err();
    assert_eq!(err.status, Status::InvalidState);

    options
        .set_option(OptionConnection::Timeout, 250.into())
        .unwrap();
    assert_eq!(
        options.get_option_int(OptionConnection::Timeout).unwrap(),
        250
    );
    let err = options
        .set_option(OptionConnection::AutoCommit, b"yes".into())
        .unwrap_err();
    assert_eq!(err.status, Status::InvalidData);
    assert_eq!(registry.get_error(connection).state, "HY024");
}

#[test]
fn test_statement_options() {
    let (mut registry, _, connection) = common::setup_connection();
    let statement = registry.prepare_statement(connection, "SELECT 1").unwrap();
    let mut options = registry.statement_options(statement);

    options
        .set_option(OptionStatement::TraceLevel, 5.into())
        .unwrap();
    assert_eq!(
        options.get_option_int(OptionStatement::TraceLevel).unwrap(),
        5
    );
    assert_eq!(
        options.get_option_double(OptionStatement::TraceTopics).unwrap_err().status,
        Status::InvalidData
    );
    assert_eq!(registry.trace_state(statement).unwrap().level, 5);
    assert_eq!(registry.trace_state(connection).unwrap().level, 0);
}

#[test]
fn test_option_keys_from_strings() {
    let key: OptionConnection = "dbi.connection.autocommit".parse().unwrap();
    assert_eq!(key, OptionConnection::AutoCommit);
    let err = "dbi.connection.isolation"
        .parse::<OptionConnection>()
        .unwrap_err();
    assert_eq!(err.status, Status::NotFound);
}

#[test]
fn test_connect_timeout() {
    let (mut registry, driver) = common::setup();
    let credentials = Credentials::new(common::USER, common::PASSWORD);

    let opts = [
        (OptionConnection::Target, "slow".into()),
        (OptionConnection::Username, common::USER.into()),
        (OptionConnection::Password, common::PASSWORD.into()),
        (OptionConnection::Timeout, 20.into()),
    ];
    let err = registry.connect_with_opts(driver, opts).unwrap_err();
    assert_eq!(err.status, Status::Timeout);
    assert_eq!(registry.get_error(driver).state, "HYT00");
    assert!(registry.connections(driver).is_empty());

    // Without a timeout the slow login eventually succeeds.
    registry.connect(driver, "slow", &credentials).unwrap();
}

#[test]
fn test_driver_default_connect_timeout() {
    let mut registry = Registry::with_trace(TraceState::silent());
    let driver = registry.create_driver(
        common::driver(),
        DriverConfig::default().with_connect_timeout(Duration::from_millis(20)),
    );
    let err = registry
        .connect(driver, "slow", &Credentials::new(common::USER, common::PASSWORD))
        .unwrap_err();
    assert_eq!(err.status, Status::Timeout);

    // Fast targets are unaffected.
    common::connect(&mut registry, driver);
}
