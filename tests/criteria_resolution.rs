mod common;

use std::sync::Arc;

use common::{TEMPLATE, definition, drain, plain_source, seed, three_rows};
use sqlsource::criteria::{Criteria, QueryTemplate};
use sqlsource::driver::{ConnectionTarget, SqliteDriver};
use sqlsource::key::{ColumnRef, KeySchema};
use sqlsource::map::MemoryKeyMap;
use sqlsource::migration::MigrationContext;
use sqlsource::source::{SourceOptions, SqlSource};

#[test]
fn id_list_is_substituted_verbatim() {
    let (_db, uri) = seed("criteria_id_list", &three_rows());
    let mut source = plain_source(&uri);
    source.start(&MigrationContext::new().with_id_list("1,2,3")).expect("start");
    let active = source.active_query().expect("active query");
    assert!(active.contains("id IN (1,2,3)"), "got {active}");
    assert!(!active.contains(":criteria"));
    assert_eq!(drain(&mut source), vec![1, 2, 3]);
}

#[test]
fn id_list_filters_rows() {
    let (_db, uri) = seed("criteria_id_filter", &three_rows());
    let mut source = plain_source(&uri);
    source.start(&MigrationContext::new().with_id_list("3, 1")).expect("start");
    assert_eq!(drain(&mut source), vec![1, 3]);
}

#[test]
fn high_water_compares_as_string() {
    let (_db, uri) = seed("criteria_high_water", &three_rows());
    let mut source = plain_source(&uri);
    let migration = MigrationContext::new().with_high_water(ColumnRef::new("modified"), Some("2020-01-01".into()));
    source.start(&migration).expect("start");
    assert!(source.active_query().expect("active").contains("modified > '2020-01-01'"));
    assert_eq!(drain(&mut source), vec![2, 3]);
}

#[test]
fn id_list_takes_precedence_over_high_water() {
    let (_db, uri) = seed("criteria_precedence", &three_rows());
    let mut source = plain_source(&uri);
    let migration = MigrationContext::new()
        .with_high_water(ColumnRef::new("modified"), Some("2020-01-01".into()))
        .with_id_list("1");
    source.start(&migration).expect("start");
    let active = source.active_query().expect("active");
    assert!(active.contains("id IN (1)"));
    assert!(!active.contains("modified >"));
    assert_eq!(drain(&mut source), vec![1]);
}

#[test]
fn neither_yields_tautology() {
    let (_db, uri) = seed("criteria_neutral", &three_rows());
    let mut source = plain_source(&uri);
    // a high-water field without a value yet is the first pass of an incremental migration
    source
        .start(&MigrationContext::new().with_high_water(ColumnRef::new("modified"), None))
        .expect("start");
    assert_eq!(
        source.active_query(),
        Some("SELECT id, name, modified FROM t WHERE 1=1 ORDER BY id")
    );
    assert_eq!(drain(&mut source), vec![1, 2, 3]);
}

#[test]
fn aliases_qualify_the_filter_column() {
    let (_db, uri) = seed("criteria_alias", &three_rows());
    let mut def = definition("SELECT x.id, x.name, x.modified FROM t x WHERE :criteria AND x.id > 0 ORDER BY x.id");
    def.key = KeySchema::new(vec![ColumnRef::aliased("id", "x")]).expect("key");
    let mut source = SqlSource::new(
        SqliteDriver,
        ConnectionTarget::sqlite(&uri),
        def,
        SourceOptions::default(),
        Arc::new(MemoryKeyMap::new()),
    )
    .expect("source");
    source.start(&MigrationContext::new().with_id_list("2")).expect("start");
    assert!(source.active_query().expect("active").contains("x.id IN (2)"));
    assert_eq!(drain(&mut source), vec![2]);

    let migration = MigrationContext::new().with_high_water(ColumnRef::aliased("modified", "x"), Some("2020-02-01".into()));
    source.start(&migration).expect("restart");
    assert!(source.active_query().expect("active").contains("x.modified > '2020-02-01'"));
    assert_eq!(drain(&mut source), vec![3]);
}

#[test]
fn composite_keys_filter_on_first_field_only() {
    let key = KeySchema::new(vec![ColumnRef::new("nid"), ColumnRef::new("language")]).expect("key");
    let criteria = Criteria::resolve(Some("4,5"), None, &key);
    let template = QueryTemplate::new("select * from node where :criteria").expect("template");
    assert_eq!(template.substitute(&criteria), "select * from node where nid IN (4,5)");
}

#[test]
fn each_pass_substitutes_from_the_original_template() {
    let (_db, uri) = seed("criteria_repeat", &three_rows());
    let mut source = plain_source(&uri);
    source.start(&MigrationContext::new().with_id_list("1")).expect("first");
    source.start(&MigrationContext::new()).expect("second");
    assert!(source.active_query().expect("active").contains("1=1"));
    assert_eq!(source.to_string(), TEMPLATE);
}

#[test]
fn malformed_templates_fail_at_construction() {
    for query in ["SELECT * FROM t", "SELECT * FROM t WHERE :criteria OR :criteria"] {
        let err = SqlSource::new(
            SqliteDriver,
            ConnectionTarget::sqlite(":memory:"),
            definition(query),
            SourceOptions::default(),
            Arc::new(MemoryKeyMap::new()),
        )
        .err()
        .expect("template must be rejected");
        assert!(err.is_fatal(), "{query}: {err}");
    }
}
