//! Fresh-cluster bootstrap.
//!
//! `init_fresh` turns an empty directory into a cluster a normal
//! `initialize` can open: directory skeleton, version marker, empty config
//! file, then a one-shot privileged session on the seed database that runs
//! the fixed setup scripts with catalog edits enabled, and finally an
//! unprivileged session that creates the template and default databases.

use crate::error::{ShimError, ShimResult};
use crate::session::Session;
use emberdb_engine::layout;
use std::fs;
use std::path::Path;

pub(crate) fn init_fresh(
    session: &mut Session,
    data_dir: &Path,
    user: &str,
    encoding: &str,
    locale: &str,
) -> ShimResult<()> {
    if session.is_initialized() {
        return Err(ShimError::AlreadyInitialized);
    }
    if user.is_empty() {
        return Err(ShimError::invalid_argument("user name must not be empty"));
    }

    fs::create_dir_all(data_dir)?;
    if layout::version_path(data_dir).is_file() {
        tracing::debug!(
            data_dir = %data_dir.display(),
            "cluster already bootstrapped, nothing to do"
        );
        return Ok(());
    }

    tracing::info!(data_dir = %data_dir.display(), "bootstrapping new cluster");
    for sub in layout::CLUSTER_SUBDIRS {
        fs::create_dir_all(data_dir.join(sub))?;
    }
    fs::write(
        layout::version_path(data_dir),
        format!("{}\n", layout::FORMAT_VERSION),
    )?;
    fs::write(layout::config_path(data_dir), b"")?;

    // Privileged phase: catalog tables may only be written here.
    session.initialize_with(data_dir, layout::SEED_DATABASE, user, true)?;
    let outcome = run_script(session, &setup_statements(user, encoding, locale));
    session.shutdown();
    outcome?;

    // Unprivileged phase: seed the template and default databases.
    session.initialize_with(data_dir, layout::SEED_DATABASE, user, false)?;
    let outcome = run_script(
        session,
        &[
            format!("CREATE DATABASE {}", layout::TEMPLATE_DATABASE),
            format!("CREATE DATABASE {}", layout::DEFAULT_DATABASE),
        ],
    );
    session.shutdown();
    outcome?;

    tracing::info!(data_dir = %data_dir.display(), "cluster bootstrap complete");
    Ok(())
}

fn run_script(session: &mut Session, statements: &[String]) -> ShimResult<()> {
    for statement in statements {
        let result = session.execute(statement)?;
        if result.is_fault() {
            return Err(ShimError::bootstrap(format!(
                "setup statement failed: {}",
                session.last_error_message()
            )));
        }
    }
    Ok(())
}

fn setup_statements(user: &str, encoding: &str, locale: &str) -> Vec<String> {
    vec![
        "CREATE TABLE sys_settings (name text, value text)".to_string(),
        "CREATE TABLE sys_extensions (name text, version text)".to_string(),
        format!(
            "INSERT INTO sys_settings VALUES \
             ('encoding', '{}'), ('locale', '{}'), ('superuser', '{}')",
            quote(encoding),
            quote(locale),
            quote(user)
        ),
    ]
}

fn quote(literal: &str) -> String {
    literal.replace('\'', "''")
}
