#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use dbi_core::value::Row;
use dbi_core::{ConnectionHandle, Credentials, DriverConfig, DriverHandle, Registry, StatementHandle, TraceState};
use dbi_memory::MemoryDriver;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "VerySecret";

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness, once per binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .init();
    });
}

pub fn driver() -> MemoryDriver {
    MemoryDriver::new()
        .with_target("t1", USER, PASSWORD)
        .with_target("t2", USER, PASSWORD)
        .with_latency("slow", Duration::from_millis(200))
        .with_target("slow", USER, PASSWORD)
        .with_batch_size(2)
}

pub fn setup() -> (Registry, DriverHandle) {
    init_tracing();
    let mut registry = Registry::with_trace(TraceState::silent());
    let driver = registry.create_driver(driver(), DriverConfig::default());
    (registry, driver)
}

pub fn connect(registry: &mut Registry, driver: DriverHandle) -> ConnectionHandle {
    registry
        .connect(driver, "t1", &Credentials::new(USER, PASSWORD))
        .unwrap()
}

pub fn setup_connection() -> (Registry, DriverHandle, ConnectionHandle) {
    let (mut registry, driver) = setup();
    let connection = connect(&mut registry, driver);
    (registry, driver, connection)
}

/// Fetches the remaining rows one by one.
pub fn collect_rows(registry: &mut Registry, statement: StatementHandle) -> Vec<Row> {
    let mut rows = Vec::new();
    while let Some(row) = registry.fetch(statement).unwrap() {
        rows.push(row);
    }
    rows
}

/// Prepares, executes and drains `text`.
pub fn query(registry: &mut Registry, connection: ConnectionHandle, text: &str) -> Vec<Row> {
    let statement = registry.prepare_statement(connection, text).unwrap();
    registry.execute(statement).unwrap();
    let rows = collect_rows(registry, statement);
    registry.destroy(statement);
    rows
}
