use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use replidb::{Connection, Database, Error, Value};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

async fn count_where(cx: &Cx, conn: &Connection, predicate: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM t WHERE {predicate}");
    let mut rows = unwrap_outcome(conn.query(cx, &sql, ()).await);
    let row = unwrap_outcome(rows.next(cx).await).expect("count row");
    row.get_int(0).unwrap()
}

#[test]
fn bindings_persist_across_runs_until_rebound() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = unwrap_outcome(Database::open_local(&cx, ":memory:").await);
        let conn = unwrap_outcome(db.connect(&cx).await);
        unwrap_outcome(conn.execute(&cx, "CREATE TABLE t (v TEXT)", ()).await);

        let stmt = unwrap_outcome(conn.prepare(&cx, "INSERT INTO t VALUES (?)").await);

        // Bind "a" once, then run twice more without parameters.
        unwrap_outcome(stmt.run(&cx, vec![Value::from("a")]).await);
        unwrap_outcome(stmt.run(&cx, ()).await);
        unwrap_outcome(stmt.run(&cx, ()).await);

        // Rebinding replaces the persisted value.
        unwrap_outcome(stmt.run(&cx, vec![Value::from("b")]).await);
        unwrap_outcome(stmt.run(&cx, ()).await);

        assert_eq!(count_where(&cx, &conn, "v = 'a'").await, 3);
        assert_eq!(count_where(&cx, &conn, "v = 'b'").await, 2);
    });
}

#[test]
fn reset_clears_bindings_back_to_null() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = unwrap_outcome(Database::open_local(&cx, ":memory:").await);
        let conn = unwrap_outcome(db.connect(&cx).await);
        unwrap_outcome(conn.execute(&cx, "CREATE TABLE t (v TEXT)", ()).await);

        let stmt = unwrap_outcome(conn.prepare(&cx, "INSERT INTO t VALUES (?)").await);
        unwrap_outcome(stmt.run(&cx, vec![Value::from("a")]).await);
        unwrap_outcome(stmt.reset(&cx).await);
        unwrap_outcome(stmt.run(&cx, ()).await);

        assert_eq!(count_where(&cx, &conn, "v IS NULL").await, 1);
        assert_eq!(count_where(&cx, &conn, "v IS NOT NULL").await, 1);
    });
}

#[test]
fn statement_query_reuses_the_handle() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = unwrap_outcome(Database::open_local(&cx, ":memory:").await);
        let conn = unwrap_outcome(db.connect(&cx).await);
        unwrap_outcome(conn.execute(&cx, "CREATE TABLE t (x INTEGER)", ()).await);
        unwrap_outcome(conn.execute(&cx, "INSERT INTO t VALUES (1), (2), (3)", ()).await);

        let stmt = unwrap_outcome(conn.prepare(&cx, "SELECT x FROM t WHERE x >= ? ORDER BY x").await);

        for (bound, expected_first) in [(1i64, 1i64), (3, 3)] {
            let mut rows = unwrap_outcome(stmt.query(&cx, vec![Value::Integer(bound)]).await);
            let row = unwrap_outcome(rows.next(&cx).await).expect("first row");
            assert_eq!(row.get_int(0).unwrap(), expected_first);
        }

        // Execute reports affected rows for writes through a statement.
        let update = unwrap_outcome(conn.prepare(&cx, "UPDATE t SET x = x + 10").await);
        assert_eq!(unwrap_outcome(update.execute(&cx, ()).await), 3);
    });
}

#[test]
fn finalized_statements_refuse_every_operation() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = unwrap_outcome(Database::open_local(&cx, ":memory:").await);
        let conn = unwrap_outcome(db.connect(&cx).await);
        let mut stmt = unwrap_outcome(conn.prepare(&cx, "SELECT 1").await);

        stmt.finalize();
        stmt.finalize();

        match stmt.run(&cx, ()).await {
            Outcome::Err(Error::Statement(e)) => {
                assert_eq!(e.kind, replidb::StatementErrorKind::Finalized);
            }
            Outcome::Err(e) => panic!("expected statement error, got {e}"),
            _ => panic!("run succeeded on a finalized statement"),
        }
        match stmt.query(&cx, ()).await {
            Outcome::Err(Error::Statement(_)) => {}
            Outcome::Err(e) => panic!("expected statement error, got {e}"),
            _ => panic!("query succeeded on a finalized statement"),
        }
    });
}
