//! Instance and database administration, including schema changes.
//!
//! Schema changes run as long-running operations: submitting one returns a
//! [`DdlOperation`] immediately and [`DdlOperation::wait`] resolves once every
//! statement has been applied. The operation keeps running if the waiter goes
//! away.

use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::fs;
use std::path::Path;
use tokio::task::JoinHandle;

use super::client::StoreOptions;
use super::error::{Error, Result};
use super::path::{DatabasePath, InstancePath};
use super::schema::{apply_database_pragmas, apply_session_pragmas, initialize_commit_clock};

/// Whether an instance was created by this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Existing,
}

/// Creates instances under a store root.
#[derive(Debug, Clone)]
pub struct InstanceAdmin {
    root: std::path::PathBuf,
}

impl InstanceAdmin {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create `instance` if it does not exist yet.
    pub async fn create_instance(&self, instance: &InstancePath) -> Result<InstanceState> {
        let dir = instance.dir(&self.root);
        let state = tokio::task::spawn_blocking(move || -> Result<InstanceState> {
            if dir.is_dir() {
                return Ok(InstanceState::Existing);
            }
            fs::create_dir_all(&dir)?;
            Ok(InstanceState::Created)
        })
        .await
        .map_err(Error::from_join)??;

        tracing::info!(instance = %instance, ?state, "Instance ready");
        Ok(state)
    }
}

/// A submitted schema operation.
#[derive(Debug)]
pub struct DdlOperation {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl DdlOperation {
    fn spawn<F>(name: String, work: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            name,
            handle: tokio::task::spawn_blocking(work),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the operation completes and report its outcome.
    pub async fn wait(self) -> Result<()> {
        let result = self.handle.await.map_err(Error::from_join)?;
        match &result {
            Ok(()) => tracing::debug!(operation = %self.name, "Schema operation done"),
            Err(e) => tracing::warn!(operation = %self.name, error = %e, "Schema operation failed"),
        }
        result
    }
}

/// Creates databases and applies schema changes.
#[derive(Debug, Clone)]
pub struct DatabaseAdmin {
    options: StoreOptions,
}

impl DatabaseAdmin {
    pub fn new(options: StoreOptions) -> Self {
        Self { options }
    }

    /// Create `path` with `extra_statements` as its initial schema.
    ///
    /// Fails with [`Error::AlreadyExists`] if the database exists and with
    /// [`Error::NotFound`] if its instance does not.
    pub fn create_database(&self, path: &DatabasePath, extra_statements: Vec<String>) -> DdlOperation {
        let root = self.options.root.clone();
        let busy_timeout = self.options.busy_timeout;
        let path = path.clone();
        DdlOperation::spawn(format!("{path}/operations/create"), move || {
            create_database(&root, &path, &extra_statements, busy_timeout)
        })
    }

    /// Apply `statements` in order, each in its own transaction.
    ///
    /// Statements already applied stay applied if a later one fails.
    pub fn update_database_ddl(&self, path: &DatabasePath, statements: Vec<String>) -> DdlOperation {
        let root = self.options.root.clone();
        let busy_timeout = self.options.busy_timeout;
        let path = path.clone();
        DdlOperation::spawn(format!("{path}/operations/ddl"), move || {
            update_database_ddl(&root, &path, &statements, busy_timeout)
        })
    }
}

fn create_database(
    root: &Path,
    path: &DatabasePath,
    statements: &[String],
    busy_timeout: std::time::Duration,
) -> Result<()> {
    let instance = path.instance_path();
    if !instance.dir(root).is_dir() {
        return Err(Error::NotFound(format!("instance {instance}")));
    }
    let file = path.file(root);
    if file.exists() {
        return Err(Error::AlreadyExists(format!("database {path}")));
    }

    let conn = Connection::open_with_flags(
        &file,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::sqlite(format!("create database {path}"), e))?;

    let initialized = apply_database_pragmas(&conn)
        .and_then(|()| apply_session_pragmas(&conn, busy_timeout))
        .map_err(|e| Error::sqlite(format!("configure database {path}"), e))
        .and_then(|()| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| Error::sqlite("begin schema transaction", e))?;
            initialize_commit_clock(&tx).map_err(|e| Error::sqlite("create commit clock", e))?;
            for (idx, statement) in statements.iter().enumerate() {
                tx.execute_batch(statement)
                    .map_err(|e| Error::sqlite(format!("schema statement {idx}"), e))?;
            }
            tx.commit().map_err(|e| Error::sqlite("commit schema", e))
        });

    if let Err(e) = initialized {
        drop(conn);
        remove_database_files(&file);
        return Err(e);
    }

    tracing::info!(database = %path, tables = statements.len(), "Database created");
    Ok(())
}

fn update_database_ddl(
    root: &Path,
    path: &DatabasePath,
    statements: &[String],
    busy_timeout: std::time::Duration,
) -> Result<()> {
    let file = path.file(root);
    if !file.is_file() {
        return Err(Error::NotFound(format!("database {path}")));
    }

    let mut conn = Connection::open_with_flags(
        &file,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::sqlite(format!("open database {path}"), e))?;
    apply_session_pragmas(&conn, busy_timeout)
        .map_err(|e| Error::sqlite(format!("configure database {path}"), e))?;

    for (idx, statement) in statements.iter().enumerate() {
        let context = || format!("DDL statement {idx} `{statement}`");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::sqlite(context(), e))?;
        tx.execute_batch(statement)
            .map_err(|e| Error::sqlite(context(), e))?;
        tx.commit().map_err(|e| Error::sqlite(context(), e))?;
        tracing::debug!(database = %path, statement = %statement, "DDL statement applied");
    }
    Ok(())
}

fn remove_database_files(file: &Path) {
    let _ = fs::remove_file(file);
    for suffix in ["-wal", "-shm"] {
        let mut side = file.as_os_str().to_owned();
        side.push(suffix);
        let _ = fs::remove_file(side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE_DDL: &str = "CREATE TABLE Things (Id INTEGER NOT NULL PRIMARY KEY)";

    fn setup(temp_dir: &TempDir) -> (DatabasePath, DatabaseAdmin) {
        let path = DatabasePath::new("test", "local", "db").unwrap();
        (path, DatabaseAdmin::new(StoreOptions::new(temp_dir.path())))
    }

    #[tokio::test]
    async fn test_create_instance_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let admin = InstanceAdmin::new(temp_dir.path());
        let instance = InstancePath::new("test", "local").unwrap();

        assert_eq!(admin.create_instance(&instance).await.unwrap(), InstanceState::Created);
        assert_eq!(admin.create_instance(&instance).await.unwrap(), InstanceState::Existing);
    }

    #[tokio::test]
    async fn test_create_database_requires_instance() {
        let temp_dir = TempDir::new().unwrap();
        let (path, admin) = setup(&temp_dir);

        let err = admin.create_database(&path, vec![]).wait().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_database_twice_is_already_exists() {
        let temp_dir = TempDir::new().unwrap();
        let (path, admin) = setup(&temp_dir);
        InstanceAdmin::new(temp_dir.path())
            .create_instance(&path.instance_path())
            .await
            .unwrap();

        admin
            .create_database(&path, vec![TABLE_DDL.into()])
            .wait()
            .await
            .unwrap();
        let err = admin
            .create_database(&path, vec![TABLE_DDL.into()])
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_database() {
        let temp_dir = TempDir::new().unwrap();
        let (path, admin) = setup(&temp_dir);
        InstanceAdmin::new(temp_dir.path())
            .create_instance(&path.instance_path())
            .await
            .unwrap();

        let err = admin
            .create_database(&path, vec!["CREATE TABLE broken (".into()])
            .wait()
            .await;
        assert!(err.is_err());
        assert!(!path.file(temp_dir.path()).exists());
    }

    #[tokio::test]
    async fn test_duplicate_column_ddl_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let (path, admin) = setup(&temp_dir);
        InstanceAdmin::new(temp_dir.path())
            .create_instance(&path.instance_path())
            .await
            .unwrap();
        admin
            .create_database(&path, vec![TABLE_DDL.into()])
            .wait()
            .await
            .unwrap();

        let add = "ALTER TABLE Things ADD COLUMN Label TEXT".to_string();
        admin
            .update_database_ddl(&path, vec![add.clone()])
            .wait()
            .await
            .unwrap();
        let err = admin
            .update_database_ddl(&path, vec![add])
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }
}
