//! Integration tests for statement factories and capability fallbacks.

mod common;

use common::{Harness, numbers_database};
use db_exec::db::TypedStatement;
use db_exec::driver::DriverCapabilities;
use db_exec::models::{GeneratedKeys, StatementKind, StatementOptions, StatementType, Value};

const INSERT: &str = "INSERT INTO numbers VALUES (?)";

fn harness(caps: DriverCapabilities) -> Harness {
    let db = numbers_database(0);
    db.register_insert(INSERT, "numbers");
    db.register_insert("INSERT INTO numbers VALUES (42)", "numbers");
    Harness::with_capabilities(db, caps)
}

#[test]
fn test_generated_keys_returned_when_supported() {
    let harness = harness(DriverCapabilities::default());
    let ctx = harness.context(false);
    let mut stmt = ctx
        .prepare_statement(INSERT, &StatementOptions::new().with_generated_keys())
        .unwrap();
    stmt.set_parameter(1, 7).unwrap();
    assert_eq!(stmt.execute_update().unwrap(), 1);
    let mut keys = stmt.generated_keys().unwrap().unwrap();
    assert!(keys.advance().unwrap());
    assert!(keys.get_by_name("GENERATED_KEY").unwrap().as_i64().is_some());
}

#[test]
fn test_generated_keys_degrade_to_plain_prepare() {
    let harness = harness(DriverCapabilities {
        supports_generated_keys: false,
        ..Default::default()
    });
    let ctx = harness.context(false);
    let mut stmt = ctx
        .prepare_statement(INSERT, &StatementOptions::new().with_generated_keys())
        .unwrap();
    stmt.set_parameter(1, 7).unwrap();
    assert_eq!(stmt.execute_update().unwrap(), 1);
    assert!(stmt.generated_keys().unwrap().is_none());
    assert_eq!(
        harness.source.database().table("numbers").unwrap().rows,
        vec![vec![Value::Int(7)]]
    );
}

#[test]
fn test_plain_statement_with_key_variants() {
    let harness = harness(DriverCapabilities::default());
    let ctx = harness.context(false);
    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    let count = stmt
        .execute_update_with_keys(
            "INSERT INTO numbers VALUES (42)",
            &GeneratedKeys::ColumnNames(vec!["n".into()]),
        )
        .unwrap();
    assert_eq!(count, 1);
    assert!(stmt.generated_keys().unwrap().is_some());
}

#[test]
fn test_typed_statements() {
    let harness = harness(DriverCapabilities::default());
    let ctx = harness.context(false);

    let mut script = ctx
        .prepare_typed(StatementType::Script, "INSERT INTO numbers VALUES (42)", &StatementOptions::new())
        .unwrap();
    assert_eq!(script.kind(), StatementKind::Plain);
    assert_eq!(script.execute_update().unwrap(), 1);

    let query = ctx
        .prepare_typed(StatementType::Query, INSERT, &StatementOptions::new())
        .unwrap();
    assert!(matches!(query, TypedStatement::Prepared(_)));

    let call = ctx
        .prepare_typed(StatementType::Exec, "{call noop()}", &StatementOptions::new())
        .unwrap();
    assert_eq!(call.kind(), StatementKind::Callable);
}

#[test]
fn test_isolated_context_owns_one_connection() {
    let harness = harness(DriverCapabilities::default());
    let isolated = harness.context(true);
    let shared = harness.context(false);

    for _ in 0..3 {
        isolated.create_statement(&StatementOptions::new()).unwrap();
        shared.create_statement(&StatementOptions::new()).unwrap();
    }
    assert_eq!(harness.source.isolated_connections().len(), 1);
    assert!(isolated.is_connected());

    isolated.close();
    shared.close();
    assert_eq!(harness.source.isolated_connections()[0].close_calls(), 1);
    assert_eq!(harness.source.shared_connection().close_calls(), 0);
}
