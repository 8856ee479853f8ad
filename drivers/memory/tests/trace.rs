use dbi_core::options::{OptionConnection, OptionDriver};
use dbi_core::trace::{TOPIC_SQL, TOPIC_TXN};
use dbi_core::{DriverConfig, Optionable, Registry, TraceState};

pub mod common;

#[test]
fn test_children_start_with_a_copy() {
    let (mut registry, driver) = common::setup();
    registry.set_trace(driver, 3, 0xF0).unwrap();

    let connection = common::connect(&mut registry, driver);
    assert_eq!(
        registry.trace_state(connection).unwrap(),
        TraceState::new(3, 0xF0)
    );

    // Later changes on the parent do not reach existing children.
    registry.set_trace(driver, 0, 0).unwrap();
    assert_eq!(
        registry.trace_state(connection).unwrap(),
        TraceState::new(3, 0xF0)
    );

    let statement = registry.prepare_statement(connection, "SELECT 1").unwrap();
    assert_eq!(
        registry.trace_state(statement).unwrap(),
        TraceState::new(3, 0xF0)
    );

    let other = common::connect(&mut registry, driver);
    assert_eq!(registry.trace_state(other).unwrap(), TraceState::silent());
}

#[test]
fn test_should_trace_thresholds() {
    let (mut registry, driver) = common::setup();
    registry.set_trace(driver, 2, TOPIC_SQL).unwrap();

    // Enabled topic at or above its threshold.
    assert!(registry.should_trace(driver, TOPIC_SQL, 2, 9));
    assert!(!registry.should_trace(driver, TOPIC_SQL, 3, 9));
    // Disabled topic falls back to the general threshold.
    assert!(!registry.should_trace(driver, TOPIC_TXN, 1, 3));
    assert!(registry.should_trace(driver, TOPIC_TXN, 1, 2));
    // Same threshold for both checks.
    assert!(registry.should_trace(driver, TOPIC_TXN | TOPIC_SQL, 2, 2));
    assert!(!registry.should_trace(driver, TOPIC_TXN, 5, 5));
}

#[test]
fn test_should_trace_single_threshold() {
    let (mut registry, driver) = common::setup();
    registry.set_trace(driver, 2, TOPIC_SQL).unwrap();

    for (mask, level) in [(TOPIC_SQL, 2), (TOPIC_SQL, 3), (TOPIC_TXN, 2), (TOPIC_TXN, 3)] {
        assert_eq!(
            registry.should_trace_level(driver, mask, level),
            registry.should_trace(driver, mask, level, level)
        );
    }
    assert!(registry.should_trace_level(driver, TOPIC_TXN, 2));
    assert!(!registry.should_trace_level(driver, TOPIC_SQL, 3));
}

#[test]
fn test_silent_handles_trace_nothing() {
    let (mut registry, driver) = common::setup();
    let connection = common::connect(&mut registry, driver);
    assert!(!registry.should_trace(connection, TOPIC_SQL, 1, 1));

    registry.destroy(connection);
    registry.set_trace(driver, 15, u32::MAX).unwrap();
    assert!(!registry.should_trace(connection, TOPIC_SQL, 0, 0));
    assert!(registry.set_trace(connection, 1, 0).is_err());
}

#[test]
fn test_level_is_clamped() {
    let (mut registry, driver) = common::setup();
    registry.set_trace(driver, 200, 0).unwrap();
    assert_eq!(registry.trace_state(driver).unwrap().level, 15);
}

#[test]
fn test_registry_default_and_driver_override() {
    let mut registry = Registry::with_trace("2|SQL".parse().unwrap());
    let inherited = registry.create_driver(common::driver(), DriverConfig::default());
    assert_eq!(
        registry.trace_state(inherited).unwrap(),
        TraceState::new(2, TOPIC_SQL)
    );

    let own = registry.create_driver(
        common::driver(),
        DriverConfig::default().with_trace(TraceState::new(1, TOPIC_TXN)),
    );
    assert_eq!(
        registry.trace_state(own).unwrap(),
        TraceState::new(1, TOPIC_TXN)
    );
}

#[test]
fn test_trace_through_options() {
    let (mut registry, driver) = common::setup();
    registry
        .driver_options(driver)
        .set_option(OptionDriver::TraceLevel, 4.into())
        .unwrap();
    registry
        .driver_options(driver)
        .set_option(OptionDriver::TraceTopics, i64::from(TOPIC_TXN).into())
        .unwrap();
    assert_eq!(
        registry.trace_state(driver).unwrap(),
        TraceState::new(4, TOPIC_TXN)
    );

    let connection = common::connect(&mut registry, driver);
    let level = registry
        .connection_options(connection)
        .get_option_int(OptionConnection::TraceLevel)
        .unwrap();
    assert_eq!(level, 4);
}

#[test]
fn test_traced_session_runs() {
    // Exercises every emission path with a subscriber installed.
    let (mut registry, driver) = common::setup();
    registry.set_trace(driver, 15, u32::MAX).unwrap();
    let connection = common::connect(&mut registry, driver);
    registry
        .do_statement(connection, "CREATE TABLE t (id INT)", &[])
        .unwrap();
    let statement = registry
        .prepare_statement(connection, "INSERT INTO t VALUES (?)")
        .unwrap();
    registry.bind(statement, 1, 7, None).unwrap();
    registry.execute(statement).unwrap();
    let rows = common::query(&mut registry, connection, "SELECT id FROM t");
    assert_eq!(rows.len(), 1);
    registry.destroy(driver);
}
