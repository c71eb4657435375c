//! Integration tests for offset/limit emulation.

mod common;

use common::{Harness, NUMBERS_QUERY, drain_ints, numbers_database};
use db_exec::driver::DriverCapabilities;
use db_exec::models::StatementOptions;
use rand::Rng;

fn capability_matrix() -> Vec<DriverCapabilities> {
    let mut out = Vec::new();
    for limit in [true, false] {
        for scroll in [true, false] {
            out.push(DriverCapabilities {
                supports_result_set_limit: limit,
                supports_result_set_scroll: scroll,
                ..Default::default()
            });
        }
    }
    out
}

#[test]
fn test_page_three_to_five() {
    let harness = Harness::new(numbers_database(10));
    let ctx = harness.context(false);
    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    stmt.set_limit(2, 3);
    let mut rs = stmt.execute_query(NUMBERS_QUERY).unwrap();
    assert_eq!(drain_ints(&mut rs), vec![3, 4, 5]);
    assert_eq!(rs.rows_fetched(), 3);
    rs.close();
    stmt.close();
    ctx.close();
    assert!(harness.source.isolated_connections().is_empty());
}

#[test]
fn test_random_pages_across_capabilities() {
    let mut rng = rand::thread_rng();
    for caps in capability_matrix() {
        for _ in 0..50 {
            let available: i64 = rng.gen_range(0..30);
            let offset: u64 = rng.gen_range(0..35);
            let limit: u64 = rng.gen_range(1..15);
            let scrollable = rng.gen_bool(0.5);

            let harness = Harness::with_capabilities(numbers_database(available), caps);
            let ctx = harness.context(rng.gen_bool(0.5));
            let options = if scrollable {
                StatementOptions::new().scrollable()
            } else {
                StatementOptions::new()
            };
            let mut stmt = ctx.create_statement(&options).unwrap();
            stmt.set_limit(offset, limit);
            let mut rs = stmt.execute_query(NUMBERS_QUERY).unwrap();
            let rows = drain_ints(&mut rs);

            let start = offset as i64 + 1;
            let expected: Vec<i64> = (start..=available).take(limit as usize).collect();
            assert_eq!(
                rows, expected,
                "available={available} offset={offset} limit={limit} caps={caps:?}"
            );
            assert_eq!(rs.rows_fetched(), expected.len() as u64);
            ctx.close();
        }
    }
}

#[test]
fn test_unbounded_limit_returns_everything_after_offset() {
    let harness = Harness::new(numbers_database(6));
    let ctx = harness.context(false);
    let mut stmt = ctx.create_statement(&StatementOptions::new()).unwrap();
    stmt.set_limit(4, 0);
    let mut rs = stmt.execute_query(NUMBERS_QUERY).unwrap();
    assert_eq!(drain_ints(&mut rs), vec![5, 6]);
    ctx.close();
}
