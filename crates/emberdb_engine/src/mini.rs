//! Reference mini engine.
//!
//! `MiniEngine` plays the role the in-memory backend plays for a storage
//! trait: a small, honest implementation of [`EngineCore`] that the shim,
//! the testkit, and the demo program run against. It is not a real query
//! engine - the statement set is eight fixed forms - but it enforces the
//! full calling discipline (transaction, snapshot, connection bracketing),
//! persists tables per database, delivers notifications at commit, and
//! resolves extension functions exclusively through the injected
//! [`FunctionLoader`] and [`ResourceOpener`].

use crate::core::{
    EngineCore, ExtensionFn, FunctionLoader, PublishHook, ResolvedSymbol, ResourceOpener,
    SnapshotId, StartupHooks, StartupOptions, FNINFO_API_VERSION, FNINFO_PREFIX,
};
use crate::error::{EngineError, EngineResult};
use crate::exec::{CellValue, ColumnMeta, ColumnType, ExecStatus, StatementKind, TupleBuffer};
use crate::layout;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// One table: column metadata plus row-major cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Table {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<CellValue>>,
}

/// Per-transaction state: the before-image for abort, queued notifies,
/// and the set of tables whose files need rewriting at commit.
struct TxnState {
    saved_tables: HashMap<String, Table>,
    saved_listens: HashSet<String>,
    pending_notifies: Vec<(String, String)>,
    touched: HashSet<String>,
}

/// The reference engine.
///
/// Construct with [`MiniEngine::new`], then drive it exclusively through
/// the [`EngineCore`] interface.
#[derive(Default)]
pub struct MiniEngine {
    data_dir: PathBuf,
    database: String,
    user: String,
    fsync: bool,
    allow_catalog_edits: bool,
    loader: Option<Arc<dyn FunctionLoader>>,
    opener: Option<Arc<dyn ResourceOpener>>,
    tables: HashMap<String, Table>,
    functions: HashMap<String, ExtensionFn>,
    listens: HashSet<String>,
    txn: Option<TxnState>,
    snapshots: Vec<SnapshotId>,
    next_snapshot: u64,
    connected: bool,
    started: bool,
    publish_hook: Option<PublishHook>,
    delivery: VecDeque<(String, String)>,
    last_result: Option<TupleBuffer>,
}

impl MiniEngine {
    /// Creates an engine in its pre-startup state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// User the current session runs as.
    #[must_use]
    pub fn session_user(&self) -> &str {
        &self.user
    }

    fn ensure_started(&self) -> EngineResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(EngineError::invalid_state("engine is not started"))
        }
    }

    fn txn_mut(&mut self) -> EngineResult<&mut TxnState> {
        self.txn
            .as_mut()
            .ok_or_else(|| EngineError::invalid_state("no transaction in progress"))
    }

    fn touch(&mut self, table: &str) {
        if let Some(txn) = self.txn.as_mut() {
            txn.touched.insert(table.to_string());
        }
    }

    fn check_writable(&self, table: &str) -> EngineResult<()> {
        if layout::is_catalog_table(table) && !self.allow_catalog_edits {
            return Err(EngineError::catalog_edit(format!(
                "catalog table \"{table}\" requires a privileged session"
            )));
        }
        Ok(())
    }

    fn loader(&self) -> EngineResult<Arc<dyn FunctionLoader>> {
        self.loader
            .clone()
            .ok_or_else(|| EngineError::invalid_state("no function loader installed"))
    }

    fn opener(&self) -> EngineResult<Arc<dyn ResourceOpener>> {
        self.opener
            .clone()
            .ok_or_else(|| EngineError::invalid_state("no resource opener installed"))
    }

    fn persist_table(&self, name: &str, table: &Table) -> EngineResult<()> {
        let path = layout::table_path(&self.data_dir, &self.database, name);
        let file = fs::File::create(&path)?;
        ciborium::ser::into_writer(table, &file).map_err(|e| EngineError::codec(e.to_string()))?;
        if self.fsync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn load_tables(&mut self) -> EngineResult<()> {
        let dir = layout::database_dir(&self.data_dir, &self.database);
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(layout::TABLE_SUFFIX) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let file = fs::File::open(&path)?;
            let table: Table =
                ciborium::de::from_reader(&file).map_err(|e| EngineError::codec(e.to_string()))?;
            self.tables.insert(name.to_string(), table);
        }
        Ok(())
    }

    fn execute_statement(&mut self, tokens: Vec<Token>) -> EngineResult<ExecStatus> {
        let mut cur = Cursor::new(tokens);
        if cur.eat_word("create") {
            if cur.eat_word("table") {
                self.exec_create_table(&mut cur)
            } else if cur.eat_word("database") {
                self.exec_create_database(&mut cur)
            } else if cur.eat_word("extension") {
                self.exec_create_extension(&mut cur)
            } else if cur.eat_word("function") {
                self.exec_create_function(&mut cur)
            } else {
                Err(EngineError::syntax("expected TABLE, DATABASE, EXTENSION, or FUNCTION after CREATE"))
            }
        } else if cur.eat_word("drop") {
            cur.expect_word("table")?;
            self.exec_drop_table(&mut cur)
        } else if cur.eat_word("insert") {
            cur.expect_word("into")?;
            self.exec_insert(&mut cur)
        } else if cur.eat_word("select") {
            self.exec_select(&mut cur)
        } else if cur.eat_word("delete") {
            cur.expect_word("from")?;
            self.exec_delete(&mut cur)
        } else {
            Err(EngineError::syntax("unrecognized statement"))
        }
    }

    fn exec_create_table(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        self.check_writable(&name)?;
        if self.tables.contains_key(&name) {
            return Err(EngineError::duplicate_object(format!(
                "table \"{name}\" already exists"
            )));
        }
        cur.expect_punct('(')?;
        let mut columns = Vec::new();
        loop {
            let col = cur.ident()?;
            let ty = match cur.ident()?.as_str() {
                "int" | "integer" => ColumnType::Int,
                "text" => ColumnType::Text,
                other => {
                    return Err(EngineError::syntax(format!("unknown column type \"{other}\"")))
                }
            };
            columns.push(ColumnMeta { name: col, ty });
            if cur.eat_punct(',') {
                continue;
            }
            cur.expect_punct(')')?;
            break;
        }
        self.tables.insert(
            name.clone(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
        self.touch(&name);
        Ok(ExecStatus {
            kind: StatementKind::CreateTable,
            rows: 0,
        })
    }

    fn exec_drop_table(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        self.check_writable(&name)?;
        if self.tables.remove(&name).is_none() {
            return Err(EngineError::undefined_object(format!(
                "table \"{name}\" does not exist"
            )));
        }
        self.touch(&name);
        Ok(ExecStatus {
            kind: StatementKind::DropTable,
            rows: 0,
        })
    }

    fn exec_insert(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        self.check_writable(&name)?;
        cur.expect_word("values")?;
        let columns = match self.tables.get(&name) {
            Some(table) => table.columns.clone(),
            None => {
                return Err(EngineError::undefined_object(format!(
                    "table \"{name}\" does not exist"
                )))
            }
        };
        let mut inserted = Vec::new();
        loop {
            cur.expect_punct('(')?;
            let mut row = Vec::new();
            loop {
                row.push(cur.literal()?);
                if cur.eat_punct(',') {
                    continue;
                }
                cur.expect_punct(')')?;
                break;
            }
            if row.len() != columns.len() {
                return Err(EngineError::execution(format!(
                    "table \"{name}\" has {} columns but {} values were supplied",
                    columns.len(),
                    row.len()
                )));
            }
            for (cell, column) in row.iter().zip(&columns) {
                let ok = match (cell, column.ty) {
                    (CellValue::Null, _) => true,
                    (CellValue::Int(_), ColumnType::Int) => true,
                    (CellValue::Text(_), ColumnType::Text) => true,
                    _ => false,
                };
                if !ok {
                    return Err(EngineError::execution(format!(
                        "type mismatch for column \"{}\"",
                        column.name
                    )));
                }
            }
            inserted.push(row);
            if !cur.eat_punct(',') {
                break;
            }
        }
        let count = inserted.len() as u64;
        let table = self.tables.get_mut(&name).ok_or_else(|| {
            EngineError::undefined_object(format!("table \"{name}\" does not exist"))
        })?;
        table.rows.extend(inserted);
        self.touch(&name);
        Ok(ExecStatus {
            kind: StatementKind::Insert,
            rows: count,
        })
    }

    fn exec_select(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        // Function-call form: SELECT fname(arg, ...).
        if cur.peek_is_call() {
            return self.exec_select_call(cur);
        }

        let mut projection: Option<Vec<String>> = None;
        if !cur.eat_punct('*') {
            let mut cols = vec![cur.ident()?];
            while cur.eat_punct(',') {
                cols.push(cur.ident()?);
            }
            projection = Some(cols);
        }
        cur.expect_word("from")?;
        let name = cur.ident()?;
        let mut order_by = None;
        if cur.eat_word("order") {
            cur.expect_word("by")?;
            order_by = Some(cur.ident()?);
        }
        let table = self.tables.get(&name).ok_or_else(|| {
            EngineError::undefined_object(format!("table \"{name}\" does not exist"))
        })?;

        let column_index = |col: &str| -> EngineResult<usize> {
            table
                .columns
                .iter()
                .position(|c| c.name == col)
                .ok_or_else(|| {
                    EngineError::undefined_object(format!("column \"{col}\" does not exist"))
                })
        };
        let indices: Vec<usize> = match &projection {
            Some(cols) => cols
                .iter()
                .map(|c| column_index(c))
                .collect::<EngineResult<_>>()?,
            None => (0..table.columns.len()).collect(),
        };

        let mut rows: Vec<&Vec<CellValue>> = table.rows.iter().collect();
        if let Some(col) = order_by {
            let key = column_index(&col)?;
            rows.sort_by(|a, b| compare_cells(&a[key], &b[key]));
        }

        let buffer = TupleBuffer {
            columns: indices
                .iter()
                .map(|&i| table.columns[i].clone())
                .collect(),
            rows: rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        };
        let count = buffer.row_count() as u64;
        self.last_result = Some(buffer);
        Ok(ExecStatus {
            kind: StatementKind::Select,
            rows: count,
        })
    }

    fn exec_select_call(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        cur.expect_punct('(')?;
        let mut args = Vec::new();
        if !cur.eat_punct(')') {
            loop {
                args.push(cur.literal()?);
                if cur.eat_punct(',') {
                    continue;
                }
                cur.expect_punct(')')?;
                break;
            }
        }
        let func = *self.functions.get(&name).ok_or_else(|| {
            EngineError::undefined_function(format!("function \"{name}\" does not exist"))
        })?;
        let value = func(&args)?;
        let ty = match value {
            CellValue::Int(_) => ColumnType::Int,
            _ => ColumnType::Text,
        };
        self.last_result = Some(TupleBuffer {
            columns: vec![ColumnMeta { name, ty }],
            rows: vec![vec![value]],
        });
        Ok(ExecStatus {
            kind: StatementKind::Select,
            rows: 1,
        })
    }

    fn exec_delete(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        self.check_writable(&name)?;
        let table = self.tables.get_mut(&name).ok_or_else(|| {
            EngineError::undefined_object(format!("table \"{name}\" does not exist"))
        })?;
        let count = table.rows.len() as u64;
        table.rows.clear();
        self.touch(&name);
        Ok(ExecStatus {
            kind: StatementKind::Delete,
            rows: count,
        })
    }

    fn exec_create_database(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        let target = layout::database_dir(&self.data_dir, &name);
        if target.exists() {
            return Err(EngineError::duplicate_object(format!(
                "database \"{name}\" already exists"
            )));
        }
        fs::create_dir_all(&target)?;
        // File-copy strategy: the new database starts as a copy of the
        // connected database's committed table files.
        let source = layout::database_dir(&self.data_dir, &self.database);
        for entry in fs::read_dir(&source)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(layout::TABLE_SUFFIX) {
                continue;
            }
            if let Some(file_name) = path.file_name() {
                fs::copy(&path, target.join(file_name))?;
            }
        }
        Ok(ExecStatus {
            kind: StatementKind::CreateDatabase,
            rows: 0,
        })
    }

    fn exec_create_extension(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        let opener = self.opener()?;

        let control_path = PathBuf::from(format!("{name}.control"));
        let control = opener.read_all(&control_path)?.ok_or_else(|| {
            EngineError::undefined_object(format!("extension \"{name}\" is not available"))
        })?;
        let control = String::from_utf8(control)
            .map_err(|_| EngineError::codec(format!("control file for \"{name}\" is not UTF-8")))?;
        let version = control_version(&control).unwrap_or_else(|| "1.0".to_string());

        let script_path = PathBuf::from(format!("{name}.sql"));
        let script = opener.read_all(&script_path)?.ok_or_else(|| {
            EngineError::undefined_object(format!("extension \"{name}\" has no install script"))
        })?;
        let script = String::from_utf8(script)
            .map_err(|_| EngineError::codec(format!("script file for \"{name}\" is not UTF-8")))?;

        for statement in split_statements(tokenize(&script)?) {
            self.execute_statement(statement)?;
        }

        // The engine records the installation itself, so the catalog guard
        // does not apply here.
        if let Some(table) = self.tables.get_mut("sys_extensions") {
            if table.columns.len() == 2 {
                table
                    .rows
                    .push(vec![CellValue::Text(name.clone()), CellValue::Text(version)]);
                self.touch("sys_extensions");
            }
        }
        tracing::debug!(extension = %name, "extension installed");
        Ok(ExecStatus {
            kind: StatementKind::CreateExtension,
            rows: 0,
        })
    }

    fn exec_create_function(&mut self, cur: &mut Cursor) -> EngineResult<ExecStatus> {
        let name = cur.ident()?;
        cur.expect_word("as")?;
        let library = cur.string()?;
        cur.expect_punct(',')?;
        let symbol = cur.string()?;

        let loader = self.loader()?;
        let loaded = loader.load(&library, &symbol, true)?.ok_or_else(|| {
            EngineError::undefined_function(format!(
                "could not resolve \"{symbol}\" in \"{library}\""
            ))
        })?;
        if let Some(ResolvedSymbol::FnInfo(finfo)) =
            loader.rebind(loaded.handle, &format!("{FNINFO_PREFIX}{symbol}"))
        {
            if finfo().api_version != FNINFO_API_VERSION {
                return Err(EngineError::execution(format!(
                    "incompatible call convention for \"{symbol}\""
                )));
            }
        }
        self.functions.insert(name, loaded.func);
        Ok(ExecStatus {
            kind: StatementKind::CreateFunction,
            rows: 0,
        })
    }
}

impl EngineCore for MiniEngine {
    fn startup(&mut self, opts: &StartupOptions, hooks: &mut StartupHooks) -> EngineResult<()> {
        if self.started {
            return Err(EngineError::invalid_state("engine is already started"));
        }

        let version_path = layout::version_path(&opts.data_dir);
        let raw = fs::read_to_string(&version_path).map_err(|_| {
            EngineError::undefined_object(format!(
                "\"{}\" is not a valid cluster (missing version marker)",
                opts.data_dir.display()
            ))
        })?;
        let version: u32 = raw
            .trim()
            .parse()
            .map_err(|_| EngineError::codec("unreadable cluster version marker"))?;
        if version != layout::FORMAT_VERSION {
            return Err(EngineError::execution(format!(
                "cluster format version {version} does not match expected {}",
                layout::FORMAT_VERSION
            )));
        }

        if !layout::database_dir(&opts.data_dir, &opts.database).is_dir() {
            return Err(EngineError::undefined_object(format!(
                "database \"{}\" does not exist",
                opts.database
            )));
        }

        self.data_dir = opts.data_dir.clone();
        self.database = opts.database.clone();
        self.user = opts.user.clone();
        self.fsync = opts.fsync;
        self.allow_catalog_edits = opts.allow_catalog_edits;
        self.loader = Some(Arc::clone(&opts.loader));
        self.opener = Some(Arc::clone(&opts.opener));
        self.load_tables()?;

        // Registered in bring-up order; the shim replays them in reverse at
        // shutdown, so the publish hook is detached before the final flush.
        hooks.on_shutdown(Box::new(|engine| engine.flush()));
        hooks.on_shutdown(Box::new(|engine| {
            engine.set_publish_hook(None);
            Ok(())
        }));

        self.started = true;
        tracing::debug!(
            database = %self.database,
            tables = self.tables.len(),
            "engine started"
        );
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn start_transaction(&mut self) -> EngineResult<()> {
        self.ensure_started()?;
        if self.txn.is_some() {
            return Err(EngineError::invalid_state("transaction already in progress"));
        }
        self.txn = Some(TxnState {
            saved_tables: self.tables.clone(),
            saved_listens: self.listens.clone(),
            pending_notifies: Vec::new(),
            touched: HashSet::new(),
        });
        Ok(())
    }

    fn commit_transaction(&mut self) -> EngineResult<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| EngineError::invalid_state("no transaction in progress"))?;
        for name in &txn.touched {
            match self.tables.get(name) {
                Some(table) => self.persist_table(name, &table.clone())?,
                None => {
                    let path = layout::table_path(&self.data_dir, &self.database, name);
                    if path.exists() {
                        fs::remove_file(&path)?;
                    }
                }
            }
        }
        for (channel, payload) in txn.pending_notifies {
            if self.listens.contains(&channel) {
                self.delivery.push_back((channel, payload));
            }
        }
        Ok(())
    }

    fn abort_transaction(&mut self) -> EngineResult<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| EngineError::invalid_state("no transaction in progress"))?;
        self.tables = txn.saved_tables;
        self.listens = txn.saved_listens;
        self.snapshots.clear();
        Ok(())
    }

    fn push_snapshot(&mut self) -> EngineResult<SnapshotId> {
        self.ensure_started()?;
        if self.txn.is_none() {
            return Err(EngineError::invalid_state("no transaction in progress"));
        }
        self.next_snapshot += 1;
        let id = SnapshotId::new(self.next_snapshot);
        self.snapshots.push(id);
        Ok(id)
    }

    fn pop_snapshot(&mut self, snapshot: SnapshotId) -> EngineResult<()> {
        match self.snapshots.last() {
            Some(top) if *top == snapshot => {
                self.snapshots.pop();
                Ok(())
            }
            _ => Err(EngineError::invalid_state("snapshot stack mismatch")),
        }
    }

    fn connect(&mut self) -> EngineResult<()> {
        self.ensure_started()?;
        if self.connected {
            return Err(EngineError::invalid_state("already connected"));
        }
        self.connected = true;
        Ok(())
    }

    fn run(&mut self, sql: &str) -> EngineResult<ExecStatus> {
        self.ensure_started()?;
        if !self.connected {
            return Err(EngineError::invalid_state("not connected"));
        }
        if self.snapshots.is_empty() {
            return Err(EngineError::invalid_state("no active snapshot"));
        }
        if self.txn.is_none() {
            return Err(EngineError::invalid_state("no transaction in progress"));
        }

        let statements = split_statements(tokenize(sql)?);
        if statements.is_empty() {
            return Err(EngineError::syntax("empty statement"));
        }
        let mut status = None;
        for statement in statements {
            self.last_result = None;
            status = Some(self.execute_statement(statement)?);
        }
        Ok(status.unwrap_or(ExecStatus {
            kind: StatementKind::Select,
            rows: 0,
        }))
    }

    fn tuple_buffer(&self) -> Option<&TupleBuffer> {
        self.last_result.as_ref()
    }

    fn disconnect(&mut self) -> EngineResult<()> {
        if !self.connected {
            return Err(EngineError::invalid_state("not connected"));
        }
        self.connected = false;
        Ok(())
    }

    fn listen(&mut self, channel: &str) -> EngineResult<()> {
        self.txn_mut()?;
        self.listens.insert(channel.to_string());
        Ok(())
    }

    fn unlisten(&mut self, channel: Option<&str>) -> EngineResult<()> {
        self.txn_mut()?;
        match channel {
            Some(channel) => {
                self.listens.remove(channel);
            }
            None => self.listens.clear(),
        }
        Ok(())
    }

    fn notify(&mut self, channel: &str, payload: &str) -> EngineResult<()> {
        let channel = channel.to_string();
        let payload = payload.to_string();
        self.txn_mut()?.pending_notifies.push((channel, payload));
        Ok(())
    }

    fn set_publish_hook(&mut self, hook: Option<PublishHook>) {
        self.publish_hook = hook;
    }

    fn pump_notifications(&mut self) -> EngineResult<()> {
        let Some(hook) = self.publish_hook.clone() else {
            return Ok(());
        };
        while let Some((channel, payload)) = self.delivery.pop_front() {
            hook(&channel, &payload, std::process::id());
        }
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        for (name, table) in &self.tables {
            let path = layout::table_path(&self.data_dir, &self.database, name);
            let file = fs::File::create(&path)?;
            ciborium::ser::into_writer(table, &file)
                .map_err(|e| EngineError::codec(e.to_string()))?;
            if self.fsync {
                file.sync_all()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MiniEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiniEngine")
            .field("database", &self.database)
            .field("started", &self.started)
            .field("tables", &self.tables.len())
            .field("in_transaction", &self.txn.is_some())
            .finish_non_exhaustive()
    }
}

/// Orders cells within one column; NULLs sort last.
fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Null, CellValue::Null) => Ordering::Equal,
        (CellValue::Null, _) => Ordering::Greater,
        (_, CellValue::Null) => Ordering::Less,
        (CellValue::Int(x), CellValue::Int(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.cmp(y),
        (CellValue::Int(x), CellValue::Text(y)) => x.to_string().as_str().cmp(y),
        (CellValue::Text(x), CellValue::Int(y)) => x.as_str().cmp(y.to_string().as_str()),
    }
}

/// Extracts `default_version = '...'` from a control file.
fn control_version(control: &str) -> Option<String> {
    for line in control.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("default_version") {
            if let Some(value) = rest.trim_start().strip_prefix('=') {
                return Some(value.trim().trim_matches('\'').to_string());
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(i64),
    Str(String),
    Punct(char),
}

fn tokenize(sql: &str) -> EngineResult<Vec<Token>> {
    let mut out = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('\'') => {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            value.push('\'');
                        } else {
                            break;
                        }
                    }
                    Some(ch) => value.push(ch),
                    None => return Err(EngineError::syntax("unterminated string literal")),
                }
            }
            out.push(Token::Str(value));
        } else if c.is_ascii_digit() || c == '-' {
            let negative = c == '-';
            chars.next();
            if negative && !chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                return Err(EngineError::syntax("unexpected character '-'"));
            }
            let mut digits = String::new();
            if !negative {
                digits.push(c);
            }
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value: i64 = digits
                .parse()
                .map_err(|_| EngineError::syntax(format!("invalid number \"{digits}\"")))?;
            out.push(Token::Number(if negative { -value } else { value }));
        } else if c.is_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&w) = chars.peek() {
                if w.is_alphanumeric() || w == '_' {
                    word.push(w);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push(Token::Word(word));
        } else if matches!(c, '(' | ')' | ',' | ';' | '*') {
            chars.next();
            out.push(Token::Punct(c));
        } else {
            return Err(EngineError::syntax(format!("unexpected character '{c}'")));
        }
    }
    Ok(out)
}

/// Splits a token stream into statements on top-level semicolons,
/// discarding empty statements.
fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut statements = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token == Token::Punct(';') {
            if !current.is_empty() {
                statements.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_word(&mut self, keyword: &str) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(keyword) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_word(&mut self, keyword: &str) -> EngineResult<()> {
        if self.eat_word(keyword) {
            Ok(())
        } else {
            Err(EngineError::syntax(format!(
                "expected {}",
                keyword.to_ascii_uppercase()
            )))
        }
    }

    fn ident(&mut self) -> EngineResult<String> {
        match self.advance() {
            Some(Token::Word(w)) => Ok(w.to_ascii_lowercase()),
            _ => Err(EngineError::syntax("expected identifier")),
        }
    }

    fn string(&mut self) -> EngineResult<String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err(EngineError::syntax("expected string literal")),
        }
    }

    fn literal(&mut self) -> EngineResult<CellValue> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(CellValue::Int(n)),
            Some(Token::Str(s)) => Ok(CellValue::Text(s)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => Ok(CellValue::Null),
            _ => Err(EngineError::syntax("expected literal value")),
        }
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, punct: char) -> EngineResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(EngineError::syntax(format!("expected '{punct}'")))
        }
    }

    /// Whether the upcoming tokens are `ident (` - the function-call form.
    fn peek_is_call(&self) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(_)))
            && self.tokens.get(self.pos + 1) == Some(&Token::Punct('('))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FnInfoRecord, LibraryHandle, LoadedFunction};
    use std::io::{self, Read};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    struct NoLoader;

    impl FunctionLoader for NoLoader {
        fn load(
            &self,
            library_ref: &str,
            _symbol: &str,
            _must_exist: bool,
        ) -> EngineResult<Option<LoadedFunction>> {
            Err(EngineError::undefined_object(format!(
                "could not find library \"{library_ref}\""
            )))
        }

        fn rebind(&self, _handle: LibraryHandle, _symbol: &str) -> Option<ResolvedSymbol> {
            None
        }
    }

    struct NoOpener;

    impl ResourceOpener for NoOpener {
        fn open(&self, path: &Path) -> EngineResult<Box<dyn Read + Send>> {
            Err(EngineError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}", path.display()),
            )))
        }

        fn exists(&self, _path: &Path) -> bool {
            false
        }

        fn read_all(&self, _path: &Path) -> EngineResult<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn scratch(databases: &[&str]) -> TempDir {
        let temp = tempdir().unwrap();
        let root = temp.path();
        for sub in layout::CLUSTER_SUBDIRS {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(
            layout::version_path(root),
            format!("{}\n", layout::FORMAT_VERSION),
        )
        .unwrap();
        for db in databases {
            fs::create_dir_all(layout::database_dir(root, db)).unwrap();
        }
        temp
    }

    fn options(root: &Path, database: &str, privileged: bool) -> StartupOptions {
        StartupOptions {
            data_dir: root.to_path_buf(),
            database: database.to_string(),
            user: "tester".to_string(),
            fsync: false,
            synchronous_commit: false,
            full_page_writes: false,
            allow_catalog_edits: privileged,
            loader: Arc::new(NoLoader),
            opener: Arc::new(NoOpener),
        }
    }

    fn boot(root: &Path, database: &str) -> MiniEngine {
        boot_with(options(root, database, false))
    }

    fn boot_with(opts: StartupOptions) -> MiniEngine {
        let mut engine = MiniEngine::new();
        let mut hooks = StartupHooks::new();
        engine.startup(&opts, &mut hooks).unwrap();
        engine
    }

    /// Runs one statement with the full bracketing the shim uses.
    fn exec(engine: &mut MiniEngine, sql: &str) -> EngineResult<ExecStatus> {
        engine.start_transaction()?;
        let snapshot = engine.push_snapshot()?;
        engine.connect()?;
        let status = engine.run(sql);
        engine.disconnect()?;
        engine.pop_snapshot(snapshot)?;
        match status {
            Ok(status) => {
                engine.commit_transaction()?;
                Ok(status)
            }
            Err(e) => {
                engine.abort_transaction()?;
                Err(e)
            }
        }
    }

    #[test]
    fn startup_requires_version_marker() {
        let temp = tempdir().unwrap();
        let mut engine = MiniEngine::new();
        let mut hooks = StartupHooks::new();
        let result = engine.startup(&options(temp.path(), "main", false), &mut hooks);
        assert!(matches!(result, Err(EngineError::UndefinedObject { .. })));
    }

    #[test]
    fn startup_unknown_database() {
        let temp = scratch(&[]);
        let mut engine = MiniEngine::new();
        let mut hooks = StartupHooks::new();
        let result = engine.startup(&options(temp.path(), "nope", false), &mut hooks);
        assert!(matches!(result, Err(EngineError::UndefinedObject { .. })));
    }

    #[test]
    fn startup_registers_cleanup_hooks() {
        let temp = scratch(&["main"]);
        let mut engine = MiniEngine::new();
        let mut hooks = StartupHooks::new();
        engine
            .startup(&options(temp.path(), "main", false), &mut hooks)
            .unwrap();
        assert_eq!(hooks.len(), 2);
    }

    #[test]
    fn create_insert_select() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");

        exec(&mut engine, "CREATE TABLE t (id int, name text)").unwrap();
        let status = exec(&mut engine, "INSERT INTO t VALUES (2, 'b'), (1, 'a')").unwrap();
        assert_eq!(status.kind, StatementKind::Insert);
        assert_eq!(status.rows, 2);

        let status = exec(&mut engine, "SELECT * FROM t ORDER BY id").unwrap();
        assert_eq!(status.rows, 2);
        let buffer = engine.tuple_buffer().unwrap();
        assert_eq!(buffer.columns[0].name, "id");
        assert_eq!(buffer.rows[0][0], CellValue::Int(1));
        assert_eq!(buffer.rows[1][1], CellValue::Text("b".into()));
    }

    #[test]
    fn select_projection() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        exec(&mut engine, "CREATE TABLE t (id int, name text)").unwrap();
        exec(&mut engine, "INSERT INTO t VALUES (1, 'a')").unwrap();
        exec(&mut engine, "SELECT name FROM t").unwrap();
        let buffer = engine.tuple_buffer().unwrap();
        assert_eq!(buffer.column_count(), 1);
        assert_eq!(buffer.rows[0][0], CellValue::Text("a".into()));
    }

    #[test]
    fn insert_type_mismatch() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        exec(&mut engine, "CREATE TABLE t (id int)").unwrap();
        let result = exec(&mut engine, "INSERT INTO t VALUES ('nope')");
        assert!(matches!(result, Err(EngineError::Execution { .. })));
    }

    #[test]
    fn abort_discards_changes() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        exec(&mut engine, "CREATE TABLE t (id int)").unwrap();

        engine.start_transaction().unwrap();
        let snap = engine.push_snapshot().unwrap();
        engine.connect().unwrap();
        engine.run("INSERT INTO t VALUES (1)").unwrap();
        engine.disconnect().unwrap();
        engine.pop_snapshot(snap).unwrap();
        engine.abort_transaction().unwrap();

        exec(&mut engine, "SELECT * FROM t").unwrap();
        assert_eq!(engine.tuple_buffer().unwrap().row_count(), 0);
    }

    #[test]
    fn commit_persists_across_restart() {
        let temp = scratch(&["main"]);
        {
            let mut engine = boot(temp.path(), "main");
            exec(&mut engine, "CREATE TABLE t (id int)").unwrap();
            exec(&mut engine, "INSERT INTO t VALUES (7)").unwrap();
        }
        let mut engine = boot(temp.path(), "main");
        exec(&mut engine, "SELECT * FROM t").unwrap();
        let buffer = engine.tuple_buffer().unwrap();
        assert_eq!(buffer.rows[0][0], CellValue::Int(7));
    }

    #[test]
    fn drop_table_removes_file_at_commit() {
        let temp = scratch(&["main"]);
        {
            let mut engine = boot(temp.path(), "main");
            exec(&mut engine, "CREATE TABLE t (id int)").unwrap();
            exec(&mut engine, "DROP TABLE t").unwrap();
        }
        assert!(!layout::table_path(temp.path(), "main", "t").exists());
        let mut engine = boot(temp.path(), "main");
        let result = exec(&mut engine, "SELECT * FROM t");
        assert!(matches!(result, Err(EngineError::UndefinedObject { .. })));
    }

    #[test]
    fn catalog_tables_require_privilege() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        let result = exec(&mut engine, "CREATE TABLE sys_settings (name text, value text)");
        assert!(matches!(result, Err(EngineError::CatalogEdit { .. })));

        let mut privileged = boot_with(options(temp.path(), "main", true));
        exec(
            &mut privileged,
            "CREATE TABLE sys_settings (name text, value text)",
        )
        .unwrap();
    }

    #[test]
    fn run_requires_bracketing() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        assert!(matches!(
            engine.run("SELECT * FROM t"),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn snapshot_stack_mismatch() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        engine.start_transaction().unwrap();
        let first = engine.push_snapshot().unwrap();
        let _second = engine.push_snapshot().unwrap();
        assert!(matches!(
            engine.pop_snapshot(first),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn notify_delivers_only_listened_channels_after_commit() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        let received: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        engine.set_publish_hook(Some(Arc::new(move |channel: &str, payload: &str, _pid| {
            sink.lock().unwrap().push((channel.into(), payload.into()));
        })));

        engine.start_transaction().unwrap();
        engine.listen("jobs").unwrap();
        engine.notify("jobs", "a").unwrap();
        engine.notify("other", "x").unwrap();
        engine.notify("jobs", "b").unwrap();
        engine.commit_transaction().unwrap();

        // Nothing surfaces until interrupts are processed.
        assert!(received.lock().unwrap().is_empty());
        engine.pump_notifications().unwrap();
        let seen = received.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("jobs".to_string(), "a".to_string()),
                ("jobs".to_string(), "b".to_string())
            ]
        );
    }

    #[test]
    fn aborted_notifies_are_dropped() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        engine.set_publish_hook(Some(Arc::new(move |channel: &str, _payload, _pid| {
            sink.lock().unwrap().push(channel.to_string());
        })));

        engine.start_transaction().unwrap();
        engine.listen("jobs").unwrap();
        engine.commit_transaction().unwrap();

        engine.start_transaction().unwrap();
        engine.notify("jobs", "gone").unwrap();
        engine.abort_transaction().unwrap();

        engine.pump_notifications().unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn create_database_copies_committed_tables() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        exec(&mut engine, "CREATE TABLE t (id int)").unwrap();
        exec(&mut engine, "INSERT INTO t VALUES (1)").unwrap();
        exec(&mut engine, "CREATE DATABASE copy").unwrap();

        let mut other = boot(temp.path(), "copy");
        exec(&mut other, "SELECT * FROM t").unwrap();
        assert_eq!(other.tuple_buffer().unwrap().row_count(), 1);
    }

    #[test]
    fn multi_statement_script_reports_last() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        let status = exec(
            &mut engine,
            "CREATE TABLE t (id int); INSERT INTO t VALUES (1); SELECT * FROM t;",
        )
        .unwrap();
        assert_eq!(status.kind, StatementKind::Select);
        assert_eq!(status.rows, 1);
        assert!(engine.tuple_buffer().is_some());
    }

    // Extension path through stub loader/opener.

    fn add_one(args: &[CellValue]) -> EngineResult<CellValue> {
        match args {
            [CellValue::Int(v)] => Ok(CellValue::Int(v + 1)),
            _ => Err(EngineError::execution("add_one expects one integer")),
        }
    }

    fn fninfo_add_one() -> FnInfoRecord {
        FnInfoRecord {
            api_version: FNINFO_API_VERSION,
        }
    }

    struct StubLoader;

    impl FunctionLoader for StubLoader {
        fn load(
            &self,
            library_ref: &str,
            symbol: &str,
            must_exist: bool,
        ) -> EngineResult<Option<LoadedFunction>> {
            if !library_ref.contains("arith") {
                return Err(EngineError::undefined_object(format!(
                    "could not find library \"{library_ref}\""
                )));
            }
            if symbol == "add_one" {
                Ok(Some(LoadedFunction {
                    func: add_one,
                    handle: LibraryHandle::new(7),
                }))
            } else if must_exist {
                Err(EngineError::undefined_function(symbol.to_string()))
            } else {
                Ok(None)
            }
        }

        fn rebind(&self, handle: LibraryHandle, symbol: &str) -> Option<ResolvedSymbol> {
            if handle == LibraryHandle::new(7) && symbol == "fninfo_add_one" {
                Some(ResolvedSymbol::FnInfo(fninfo_add_one))
            } else {
                None
            }
        }
    }

    struct StubOpener;

    impl ResourceOpener for StubOpener {
        fn open(&self, path: &Path) -> EngineResult<Box<dyn Read + Send>> {
            match self.read_all(path)? {
                Some(data) => Ok(Box::new(io::Cursor::new(data))),
                None => Err(EngineError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}", path.display()),
                ))),
            }
        }

        fn exists(&self, path: &Path) -> bool {
            matches!(self.read_all(path), Ok(Some(_)))
        }

        fn read_all(&self, path: &Path) -> EngineResult<Option<Vec<u8>>> {
            let name = path.to_string_lossy();
            if name.ends_with("arith.control") {
                Ok(Some(b"default_version = '2.1'\n".to_vec()))
            } else if name.ends_with("arith.sql") {
                Ok(Some(
                    b"CREATE FUNCTION add_one AS '$libdir/arith', 'add_one';".to_vec(),
                ))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn create_extension_resolves_through_loader() {
        let temp = scratch(&["main"]);
        let mut opts = options(temp.path(), "main", false);
        opts.loader = Arc::new(StubLoader);
        opts.opener = Arc::new(StubOpener);
        let mut engine = boot_with(opts);

        exec(&mut engine, "CREATE EXTENSION arith").unwrap();
        let status = exec(&mut engine, "SELECT add_one(41)").unwrap();
        assert_eq!(status.rows, 1);
        let buffer = engine.tuple_buffer().unwrap();
        assert_eq!(buffer.rows[0][0], CellValue::Int(42));
        assert_eq!(buffer.columns[0].name, "add_one");
    }

    #[test]
    fn create_extension_records_installation() {
        let temp = scratch(&["main"]);
        let mut opts = options(temp.path(), "main", true);
        opts.loader = Arc::new(StubLoader);
        opts.opener = Arc::new(StubOpener);
        let mut engine = boot_with(opts);

        exec(&mut engine, "CREATE TABLE sys_extensions (name text, version text)").unwrap();
        exec(&mut engine, "CREATE EXTENSION arith").unwrap();
        exec(&mut engine, "SELECT * FROM sys_extensions").unwrap();
        let buffer = engine.tuple_buffer().unwrap();
        assert_eq!(buffer.row_count(), 1);
        assert_eq!(buffer.rows[0][0], CellValue::Text("arith".into()));
        assert_eq!(buffer.rows[0][1], CellValue::Text("2.1".into()));
    }

    #[test]
    fn unknown_extension_faults() {
        let temp = scratch(&["main"]);
        let mut engine = boot(temp.path(), "main");
        let result = exec(&mut engine, "CREATE EXTENSION missing");
        assert!(matches!(result, Err(EngineError::UndefinedObject { .. })));
    }

    #[test]
    fn tokenizer_handles_quotes_and_negatives() {
        let tokens = tokenize("INSERT INTO t VALUES (-5, 'it''s')").unwrap();
        assert!(tokens.contains(&Token::Number(-5)));
        assert!(tokens.contains(&Token::Str("it's".to_string())));
    }

    #[test]
    fn tokenizer_rejects_garbage() {
        assert!(tokenize("SELECT @ FROM t").is_err());
        assert!(tokenize("SELECT 'open").is_err());
    }
}
