//! The sample static extension: a small arithmetic/greeting library that
//! exercises every registry feature (functions, introspection records,
//! embedded control and script files, init callback).

use emberdb_core::{register_static_extension, StaticExtension};
use emberdb_engine::{
    CellValue, EngineError, EngineResult, FnInfoRecord, FNINFO_API_VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

/// Library name the sample extension registers under.
pub const LIBRARY: &str = "arith";

const CONTROL: &[u8] = b"# arith extension\ndefault_version = '1.0'\n";
const SCRIPT: &[u8] = b"CREATE FUNCTION add_one AS '$libdir/arith', 'add_one';\n\
CREATE FUNCTION greet AS '$libdir/arith', 'greet';\n";

static REGISTERED: Once = Once::new();
static INIT_RAN: AtomicBool = AtomicBool::new(false);

/// Adds one to its single integer argument.
pub fn add_one(args: &[CellValue]) -> EngineResult<CellValue> {
    match args {
        [CellValue::Int(v)] => Ok(CellValue::Int(v + 1)),
        _ => Err(EngineError::execution("add_one expects one integer")),
    }
}

/// Greets its single text argument.
pub fn greet(args: &[CellValue]) -> EngineResult<CellValue> {
    match args {
        [CellValue::Text(name)] => Ok(CellValue::Text(format!("Hello, {name}!"))),
        _ => Err(EngineError::execution("greet expects one text value")),
    }
}

fn fninfo() -> FnInfoRecord {
    FnInfoRecord {
        api_version: FNINFO_API_VERSION,
    }
}

fn on_init() {
    INIT_RAN.store(true, Ordering::SeqCst);
    tracing::debug!("arith extension initialized");
}

/// Whether the library's init callback has run in this process.
#[must_use]
pub fn init_callback_ran() -> bool {
    INIT_RAN.load(Ordering::SeqCst)
}

/// Registers the sample extension; safe to call from every test, the
/// registration happens once per process.
pub fn register_sample_extension() {
    REGISTERED.call_once(|| {
        register_static_extension(
            StaticExtension::new(LIBRARY)
                .function("add_one", add_one)
                .function("greet", greet)
                .introspection("add_one", fninfo)
                .introspection("greet", fninfo)
                .control_file(CONTROL)
                .script_file(SCRIPT)
                .on_init(on_init),
        );
    });
}
