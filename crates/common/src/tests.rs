use super::*;
use std::io;

#[test]
fn config_defaults_fill_in_cache_sizes() {
    let cfg = Config::builder()
        .node_file("nodes.db")
        .record_file("records.db")
        .build();
    assert_eq!(cfg.node_cache_pages, 5);
    assert_eq!(cfg.record_cache_pages, 5);
}

#[test]
fn address_orders_by_page_then_offset() {
    let a = Address::new(PageId(1), 50);
    let b = Address::new(PageId(2), 0);
    assert!(a < b);

    let c = Address::new(PageId(1), 10);
    assert!(c < a);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::OutOfRange {
        page: 9,
        page_count: 3,
    };
    assert!(format!("{err}").contains("out of range"));
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}
