//! Blocking binder behaviour against a scripted pool
//!
//! Covers rendering and parameter binding, the return-shape table, the
//! reentrant connection scope and stream connection handling.

mod common;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;

use common::{Event, MockConnection, MockPool, Script};
use dbind::{
    Arguments, BoundFunction, BoundQuery, Error, FromRow, FunctionBinder, Result, Session, Value,
};

#[derive(Arguments)]
struct Insert {
    arg: String,
}

#[derive(Arguments)]
struct ById {
    id: i64,
}

#[derive(Arguments)]
struct Search {
    table: String,
    id: i64,
}

#[derive(Arguments)]
struct Customer {
    name: String,
    #[dbind(rename = "tier")]
    level: i32,
}

#[derive(Arguments)]
struct Nested {
    customer: Customer,
    filters: HashMap<String, Value>,
}

#[derive(Debug, PartialEq, FromRow)]
struct Account {
    id: i64,
    #[dbind(rename = "owner_name")]
    owner: String,
    balance: Option<f64>,
}

fn binder(script: &Script) -> FunctionBinder<MockPool> {
    FunctionBinder::with_pool(MockPool::new(script))
}

fn bind_error<T>(bound: Result<T>) -> Error {
    match bound {
        Ok(_) => panic!("expected binding to fail"),
        Err(err) => err,
    }
}

fn insert(value: &str) -> Insert {
    Insert {
        arg: value.to_string(),
    }
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_execute_binds_parameters() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO test_table (test_column) VALUES (#{arg})")
        .unwrap();

    insert_fn.call(&insert("value")).unwrap();

    assert_eq!(
        script.events(),
        vec![
            Event::Lease(1),
            Event::Execute {
                cnx: 1,
                sql: "INSERT INTO test_table (test_column) VALUES (%s)".to_string(),
                params: vec![Value::from("value")],
            },
            Event::Commit(1),
            Event::Release(1),
        ]
    );
}

#[test]
fn test_execute_returns_affected_rows() {
    let script = Script::new();
    let binder = binder(&script);
    let delete = binder
        .execute::<ById, u64>("DELETE FROM t WHERE id > #{id}")
        .unwrap();

    script.affected(4);
    assert_eq!(delete.call(&ById { id: 10 }).unwrap(), 4);
}

#[test]
fn test_literal_substitution_and_repeated_parameters() {
    let script = Script::new();
    let binder = binder(&script);
    let select = binder
        .query::<Search, Vec<i64>>("SELECT id FROM !{table} WHERE id = #{id} OR parent = #{id}")
        .unwrap();

    select
        .call(&Search {
            table: "nodes".into(),
            id: 7,
        })
        .unwrap();

    assert_eq!(
        script.statements(),
        vec![(
            "SELECT id FROM nodes WHERE id = %s OR parent = %s".to_string(),
            vec![Value::I64(7), Value::I64(7)]
        )]
    );
}

#[test]
fn test_dotted_paths_reach_records_and_maps() {
    let script = Script::new();
    let binder = binder(&script);
    let update = binder
        .execute::<Nested, ()>(
            "UPDATE c SET tier = #{customer.tier} WHERE name = #{customer.name} AND status = #{filters.status}",
        )
        .unwrap();

    let mut filters = HashMap::new();
    filters.insert("status".to_string(), Value::from("active"));
    update
        .call(&Nested {
            customer: Customer {
                name: "ada".into(),
                level: 3,
            },
            filters,
        })
        .unwrap();

    assert_eq!(
        script.statements()[0].1,
        vec![Value::I32(3), Value::from("ada"), Value::from("active")]
    );
}

#[test]
fn test_unresolvable_path_fails_the_call() {
    let script = Script::new();
    let binder = binder(&script);
    let update = binder
        .execute::<Nested, ()>("UPDATE c SET x = #{filters.missing}")
        .unwrap();

    let err = update
        .call(&Nested {
            customer: Customer {
                name: "ada".into(),
                level: 1,
            },
            filters: HashMap::new(),
        })
        .unwrap_err();

    assert!(matches!(err, Error::ArgumentResolution { ref path, .. } if path == "filters.missing"));
    // Rendering happens before a connection is leased
    assert_eq!(script.leases(), 0);
}

// ============================================================================
// Bind-time errors
// ============================================================================

#[test]
fn test_template_argument_must_be_declared() {
    let script = Script::new();
    let binder = binder(&script);

    let err = bind_error(binder.execute::<Insert, ()>(
        "INSERT INTO test_table (test_column) VALUES (#{some_arg})",
    ));

    let message = err.to_string();
    assert!(message.contains("Argument 'some_arg' specified in template but is not an argument of"));
    assert!(message.contains("Insert"));
    assert!(err.is_bind_time());
}

#[test]
fn test_malformed_template_fails_at_bind_time() {
    let script = Script::new();
    let binder = binder(&script);

    let err = bind_error(binder.query::<Insert, ()>("SELECT * FROM t WHERE c = #{arg"));
    assert!(matches!(err, Error::Template { line: 1, .. }));
    assert!(err.is_bind_time());
    assert!(script.events().is_empty());
}

#[test]
fn test_pool_is_required_and_set_once() {
    let script = Script::new();
    let binder: FunctionBinder<MockPool> = FunctionBinder::new();

    // Functions can be bound before the pool exists
    let count = binder.query::<(), i64>("SELECT COUNT(*) FROM t").unwrap();
    assert!(matches!(count.call(&()), Err(Error::NoPoolSet)));
    assert!(matches!(binder.mung_symbol(), Err(Error::NoPoolSet)));

    binder.set_pool(MockPool::new(&script)).unwrap();
    assert!(matches!(
        binder.set_pool(MockPool::new(&script)),
        Err(Error::PoolAlreadySet)
    ));

    script.rows(&["count"], vec![vec![Value::I64(12)]]);
    assert_eq!(count.call(&()).unwrap(), 12);
}

// ============================================================================
// Return shapes
// ============================================================================

#[test]
fn test_scalar_and_optional_returns() {
    let script = Script::new();
    let binder = binder(&script);
    let required = binder.query::<ById, i64>("SELECT n FROM t WHERE id = #{id}").unwrap();
    let optional = binder
        .query::<ById, Option<i64>>("SELECT n FROM t WHERE id = #{id}")
        .unwrap();

    script.rows(&["n"], vec![vec![Value::I64(42)]]);
    assert_eq!(required.call(&ById { id: 1 }).unwrap(), 42);

    script.rows(&["n"], vec![]);
    assert_eq!(optional.call(&ById { id: 2 }).unwrap(), None);

    script.rows(&["n"], vec![]);
    assert!(matches!(required.call(&ById { id: 3 }), Err(Error::NoRows)));
}

#[test]
fn test_many_rows_and_raw_tuples() {
    let script = Script::new();
    let binder = binder(&script);
    let names = binder.query::<(), Vec<String>>("SELECT name FROM t").unwrap();
    let raw: BoundQuery<MockPool, ()> = binder.query("SELECT a, b FROM t").unwrap();

    script.rows(&["name"], vec![vec![Value::from("a")], vec![Value::from("b")]]);
    assert_eq!(names.call(&()).unwrap(), vec!["a", "b"]);

    script.rows(
        &["a", "b"],
        vec![vec![Value::I64(1), Value::Null], vec![Value::I64(2), Value::from("x")]],
    );
    assert_eq!(
        raw.call(&()).unwrap(),
        vec![
            vec![Value::I64(1), Value::Null],
            vec![Value::I64(2), Value::from("x")]
        ]
    );
}

#[test]
fn test_record_and_map_returns() {
    let script = Script::new();
    let binder = binder(&script);
    let account = binder
        .query::<ById, Account>("SELECT id, owner_name, balance FROM accounts WHERE id = #{id}")
        .unwrap();
    let as_map = binder
        .query::<ById, Option<HashMap<String, Value>>>("SELECT id, owner_name FROM accounts WHERE id = #{id}")
        .unwrap();

    script.rows(
        &["id", "owner_name", "balance"],
        vec![vec![Value::I64(1), Value::from("ada"), Value::Null]],
    );
    assert_eq!(
        account.call(&ById { id: 1 }).unwrap(),
        Account {
            id: 1,
            owner: "ada".into(),
            balance: None
        }
    );

    script.rows(&["id", "owner_name"], vec![vec![Value::I64(1), Value::from("ada")]]);
    let row = as_map.call(&ById { id: 1 }).unwrap().unwrap();
    assert_eq!(row.get("owner_name"), Some(&Value::from("ada")));
    assert_eq!(row.len(), 2);
}

#[test]
fn test_no_return_skips_fetching() {
    let script = Script::new();
    let binder = binder(&script);
    let touch = binder.query::<(), ()>("SELECT pg_sleep(0)").unwrap();

    script.rows(&["x"], vec![vec![Value::I64(1)], vec![Value::I64(2)]]);
    touch.call(&()).unwrap();
    assert_eq!(script.commits(), 1);
}

#[test]
fn test_too_many_rows_rolls_back() {
    let script = Script::new();
    let binder = binder(&script);
    let select = binder.query::<(), Option<i64>>("SELECT n FROM t").unwrap();

    script.rows(&["n"], vec![vec![Value::I64(1)], vec![Value::I64(2)]]);
    let err = select.call(&()).unwrap_err();

    assert!(matches!(err, Error::TooManyRows(2)));
    assert_eq!(err.to_string(), "Only expected one row, but got 2");
    assert_eq!(script.commits(), 0);
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);
}

#[test]
fn test_scalar_rejects_wide_rows() {
    let script = Script::new();
    let binder = binder(&script);
    let select = binder.query::<(), i64>("SELECT a, b FROM t").unwrap();

    script.rows(&["a", "b"], vec![vec![Value::I64(1), Value::I64(2)]]);
    assert!(matches!(select.call(&()), Err(Error::TooManyValues(2))));
}

// ============================================================================
// Connection scope
// ============================================================================

#[test]
fn test_nested_calls_share_one_connection() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();
    let select = binder
        .query::<ById, Option<String>>("SELECT c FROM t WHERE id = #{id}")
        .unwrap();

    binder
        .connection(|outer| {
            insert_fn.call(&insert("a"))?;
            select.call(&ById { id: 1 })?;
            binder.connection(|inner| {
                assert!(inner.same_connection(outer));
                insert_fn.call(&insert("b"))
            })
        })
        .unwrap();

    assert_eq!(script.leases(), 1);
    assert_eq!(script.commits(), 1);
    assert_eq!(script.releases(), 1);
    assert_eq!(script.statement_connections(), vec![1, 1, 1]);
    assert_eq!(script.events().last(), Some(&Event::Release(1)));
}

#[test]
fn test_sequential_calls_lease_separately() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    insert_fn.call(&insert("a")).unwrap();
    insert_fn.call(&insert("b")).unwrap();

    assert_eq!(script.leases(), 2);
    assert_eq!(script.statement_connections(), vec![1, 2]);
}

#[test]
fn test_binders_do_not_share_scopes() {
    let script = Script::new();
    let first = binder(&script);
    let second = binder(&script);
    let insert_fn = second
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    first
        .connection(|_| insert_fn.call(&insert("a")))
        .unwrap();

    assert_eq!(script.leases(), 2);
}

#[test]
fn test_threads_get_their_own_connections() {
    let script = Script::new();
    let binder = binder(&script);
    let select = Arc::new(binder.query::<(), Option<i64>>("SELECT 1").unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let binder = binder.clone();
            let select = Arc::clone(&select);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                binder
                    .connection(|_| {
                        barrier.wait();
                        select.call(&())
                    })
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(script.leases(), 2);
    let mut used = script.statement_connections();
    used.sort_unstable();
    assert_eq!(used, vec![1, 2]);
}

#[test]
fn test_autocommit_commits_each_statement() {
    let script = Script::new();
    let binder = FunctionBinder::with_pool(MockPool::new(&script).autocommit(true));
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    binder
        .connection(|_| {
            insert_fn.call(&insert("a"))?;
            insert_fn.call(&insert("b"))
        })
        .unwrap();

    // One per statement, then the scope's own
    assert_eq!(script.commits(), 3);
}

#[test]
fn test_failed_commit_rolls_back_and_releases() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    script.fail_commits();
    let err = insert_fn.call(&insert("a")).unwrap_err();

    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);
}

#[test]
fn test_panic_rolls_back_and_releases() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        binder.connection(|_| -> Result<()> {
            insert_fn.call(&insert("a"))?;
            panic!("boom");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(script.commits(), 0);
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);

    // The abandoned scope is gone; the next call leases afresh
    insert_fn.call(&insert("b")).unwrap();
    assert_eq!(script.leases(), 2);
}

#[test]
fn test_panicking_commit_still_releases() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    script.panic_commits();
    let outcome = catch_unwind(AssertUnwindSafe(|| insert_fn.call(&insert("a"))));

    assert!(outcome.is_err());
    assert_eq!(script.commits(), 0);
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);
    assert_eq!(script.events().last(), Some(&Event::Release(1)));
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_transaction_error_rolls_back_once() {
    let script = Script::new();
    let binder = binder(&script);
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    let transfer = binder.transaction(move |args: Insert| -> Result<()> {
        insert_fn.call(&args)?;
        insert_fn.call(&args)?;
        Err(Error::application("insufficient funds"))
    });

    let err = transfer.call(insert("a")).unwrap_err();
    assert_eq!(err.to_string(), "insufficient funds");
    assert_eq!(script.leases(), 1);
    assert_eq!(script.commits(), 0);
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);
}

#[test]
fn test_transaction_disables_autocommit_for_its_duration() {
    let script = Script::new();
    let binder = FunctionBinder::with_pool(MockPool::new(&script).autocommit(true));
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    let batch = binder.transaction_with_connection(
        move |cnx: &Session<MockConnection>, values: Vec<String>| -> Result<usize> {
            assert!(!cnx.autocommit()?);
            for value in &values {
                insert_fn.call(&insert(value))?;
            }
            Ok(values.len())
        },
    );

    binder
        .connection(|cnx| {
            assert_eq!(batch.call(vec!["a".into(), "b".into()])?, 2);
            assert!(cnx.autocommit()?);
            Ok(())
        })
        .unwrap();

    // Only the scope commits; the inserts ran with autocommit off
    assert_eq!(script.commits(), 1);
}

#[test]
fn test_bound_functions_share_a_calling_convention() {
    fn call_with<F: BoundFunction<A>, A>(f: &F, args: A) -> Result<F::Output> {
        f.call(args)
    }

    let script = Script::new();
    let binder = binder(&script);
    let count = binder.query::<ById, i64>("SELECT n FROM t WHERE id = #{id}").unwrap();
    let double = binder.transaction(|n: i64| Ok(n * 2));

    script.rows(&["n"], vec![vec![Value::I64(5)]]);
    assert_eq!(call_with(&count, &ById { id: 1 }).unwrap(), 5);
    assert_eq!(call_with(&double, 21).unwrap(), 42);
    assert!(count.to_string().starts_with("BoundQuery of SELECT n FROM t WHERE id = #{id}"));
}

// ============================================================================
// Streams
// ============================================================================

#[test]
fn test_stream_commits_and_releases_when_exhausted() {
    let script = Script::new();
    let binder = binder(&script);
    let stream = binder.stream::<(), i64>("SELECT n FROM t").unwrap();

    script.rows(
        &["n"],
        vec![vec![Value::I64(1)], vec![Value::I64(2)], vec![Value::I64(3)]],
    );
    let rows = stream.call(&()).unwrap();
    assert_eq!(script.releases(), 0);

    let values = rows.collect::<Result<Vec<_>>>().unwrap();
    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(script.commits(), 1);
    assert_eq!(script.releases(), 1);
}

#[test]
fn test_abandoned_stream_rolls_back_and_releases() {
    let script = Script::new();
    let binder = binder(&script);
    let stream = binder.stream::<(), i64>("SELECT n FROM t").unwrap();

    script.rows(&["n"], vec![vec![Value::I64(1)], vec![Value::I64(2)]]);
    let mut rows = stream.call(&()).unwrap();
    assert_eq!(rows.next().unwrap().unwrap(), 1);
    drop(rows);

    assert_eq!(script.commits(), 0);
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);
}

#[test]
fn test_stream_mapping_error_ends_the_stream() {
    let script = Script::new();
    let binder = binder(&script);
    let stream = binder.stream::<(), i64>("SELECT n FROM t").unwrap();

    script.rows(&["n"], vec![vec![Value::I64(1)], vec![Value::from("x")]]);
    let mut rows = stream.call(&()).unwrap();
    assert_eq!(rows.next().unwrap().unwrap(), 1);
    assert!(matches!(rows.next(), Some(Err(Error::TypeConversion { .. }))));
    assert!(rows.next().is_none());
    assert_eq!(script.rollbacks(), 1);
    assert_eq!(script.releases(), 1);
}

#[test]
fn test_stream_inside_scope_uses_scope_connection() {
    let script = Script::new();
    let binder = binder(&script);
    let stream = binder.stream::<(), Account>("SELECT * FROM accounts").unwrap();
    let insert_fn = binder
        .execute::<Insert, ()>("INSERT INTO t (c) VALUES (#{arg})")
        .unwrap();

    script.rows(
        &["id", "owner_name", "balance"],
        vec![vec![Value::I64(1), Value::from("ada"), Value::F64(1.5)]],
    );
    binder
        .connection(|_| {
            for account in stream.call(&())? {
                insert_fn.call(&insert(&account?.owner))?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(script.leases(), 1);
    assert_eq!(script.commits(), 1);
    assert_eq!(script.releases(), 1);
}
