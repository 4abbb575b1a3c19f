//! Walks the full lifecycle of an embedded session: bootstrap a cluster,
//! run statements, use a static extension, poll notifications, shut down,
//! and start again in the same process.
//!
//! Run with `RUST_LOG=debug` to watch the shim's bring-up and teardown.

use emberdb_core::{register_static_extension, Session, ShimResult, StaticExtension};
use emberdb_engine::{CellValue, EngineError, EngineResult};
use tracing_subscriber::EnvFilter;

fn double(args: &[CellValue]) -> EngineResult<CellValue> {
    match args {
        [CellValue::Int(v)] => Ok(CellValue::Int(v * 2)),
        _ => Err(EngineError::execution("double expects one integer")),
    }
}

fn main() -> ShimResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    register_static_extension(
        StaticExtension::new("demo_math")
            .function("double", double)
            .control_file(b"default_version = '1.0'\n".as_slice())
            .script_file(b"CREATE FUNCTION double AS '$libdir/demo_math', 'double';".as_slice()),
    );

    let data_dir = tempfile::tempdir()?;
    let mut session = Session::new();

    session.init_fresh(data_dir.path(), "admin", "UTF8", "C")?;
    session.initialize(data_dir.path(), "main", "admin")?;

    session.execute("CREATE TABLE users (id int, name text)")?;
    session.execute("INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob')")?;
    let result = session.execute("SELECT * FROM users ORDER BY id")?;
    println!("{} user(s):", result.row_count());
    for row in 0..result.row_count() {
        println!(
            "  #{} {}",
            result.value(row, 0).unwrap_or("?"),
            result.value(row, 1).unwrap_or("<null>")
        );
    }

    session.execute("CREATE EXTENSION demo_math")?;
    let result = session.execute("SELECT double(21)")?;
    println!("double(21) = {}", result.value(0, 0).unwrap_or("?"));

    session.listen("events")?;
    session.notify("events", Some("hello"))?;
    while let Some(record) = session.poll_notification()? {
        println!("notification on {:?}: {:?}", record.channel, record.payload);
    }

    session.shutdown();

    // The process is pristine again; a second lifecycle works end to end.
    session.initialize(data_dir.path(), "main", "admin")?;
    let result = session.execute("SELECT * FROM users")?;
    println!("after restart: {} user(s) still there", result.row_count());
    session.shutdown();

    Ok(())
}
