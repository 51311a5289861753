//! Store client: pooled sessions, transactions, and the abort/retry loop.
//!
//! Uses r2d2 with r2d2_sqlite for pooled sessions. Every store call runs on the
//! blocking pool; dropping the awaiting future interrupts the statement in
//! flight, so a cancelled caller never keeps a session busy.
//!
//! Read-write transactions begin `DEFERRED`. Under WAL a transaction whose
//! snapshot was invalidated by a concurrent commit cannot take the write lock
//! and fails with `SQLITE_BUSY`; that is surfaced as [`Error::Aborted`] and the
//! whole transaction body is run again with fresh reads.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ToSql;
use rusqlite::{Connection, InterruptHandle, OpenFlags, Row, TransactionBehavior};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::{Error, Result, Retryable};
use super::mutation::Mutation;
use super::path::DatabasePath;
use super::schema::{
    advance_commit_clock, apply_session_pragmas, column_exists, primary_key_columns, quote_ident,
};
use super::statement::Statement;
use super::value::{Key, Timestamp};
use crate::observability::metrics::{record_txn_abort, record_txn_attempt};

/// Tuning knobs for the store client.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory under which instance directories live.
    pub root: PathBuf,
    /// Maximum number of pooled sessions.
    pub pool_size: u32,
    /// How long to wait for a free session.
    pub connect_timeout: Duration,
    /// How long a statement waits on a lock held by another writer.
    pub busy_timeout: Duration,
    /// Attempts (first run included) before an aborted transaction is given up.
    pub max_commit_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub retry_backoff: Duration,
    /// Upper bound on the retry backoff.
    pub retry_backoff_max: Duration,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            pool_size: 8,
            connect_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            max_commit_attempts: 16,
            retry_backoff: Duration::from_millis(2),
            retry_backoff_max: Duration::from_millis(250),
        }
    }
}

/// Result of a committed read-write transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResponse<T> {
    /// Value returned by the final, committed attempt of the body.
    pub value: T,
    /// Commit timestamp, or `None` if the transaction wrote nothing.
    pub commit_timestamp: Option<Timestamp>,
}

/// Handle to one logical database.
///
/// Cheap to clone; clones share the session pool. The pool, and every idle
/// session in it, is released when the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    path: DatabasePath,
    pool: Pool<SqliteConnectionManager>,
    options: Arc<StoreOptions>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("path", &self.path)
            .field("pool", &self.pool.state())
            .finish()
    }
}

impl Client {
    /// Connect to an existing database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the database has not been created, or a
    /// pool error if no session can be opened.
    pub async fn connect(path: DatabasePath, options: StoreOptions) -> Result<Self> {
        let options = Arc::new(options);
        let pool = {
            let path = path.clone();
            let options = Arc::clone(&options);
            tokio::task::spawn_blocking(move || build_pool(&path, &options))
                .await
                .map_err(Error::from_join)??
        };

        tracing::debug!(database = %path, "Store client connected");
        Ok(Self {
            path,
            pool,
            options,
        })
    }

    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Check out a session from the pool.
    pub async fn session(&self) -> Result<Session> {
        let pool = self.pool.clone();
        let conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(Error::from_join)??;
        Ok(Session { conn })
    }

    /// Apply a batch of mutations atomically and return the commit timestamp.
    pub async fn apply(&self, mutations: Vec<Mutation>) -> Result<Timestamp> {
        if mutations.is_empty() {
            return Err(Error::InvalidArgument("no mutations to apply".into()));
        }

        let count = mutations.len();
        let response = self
            .read_write_transaction(move |txn| {
                txn.buffer_write(mutations.iter().cloned());
                Ok::<_, Error>(())
            })
            .await?;

        let commit_timestamp = response
            .commit_timestamp
            .ok_or_else(|| Error::Task("mutation batch committed without a timestamp".into()))?;
        tracing::debug!(
            database = %self.path,
            mutations = count,
            commit_timestamp = %commit_timestamp,
            "Mutations applied"
        );
        Ok(commit_timestamp)
    }

    /// Run `body` inside a read-write transaction, re-running it whenever the
    /// store aborts the attempt.
    ///
    /// `body` may execute several times. Anything it does outside the
    /// transaction handle is repeated on every attempt, so it should only read
    /// and write through `txn` and report what it did through its return value.
    pub async fn read_write_transaction<T, E, F>(&self, body: F) -> Result<CommitResponse<T>, E>
    where
        F: FnMut(&mut ReadWriteTransaction<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Retryable + Send + 'static,
    {
        let options = Arc::clone(&self.options);
        let session = self.session().await?;
        session
            .run(move |conn, cancel| run_read_write(conn, &options, cancel, body))
            .await
    }

    /// Run `body` inside a single read-only transaction: every read observes
    /// the same consistent snapshot.
    pub async fn read_only_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut ReadOnlyTransaction<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Send + 'static,
    {
        let session = self.session().await?;
        session
            .run(move |conn, cancel| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Deferred)
                    .map_err(|e| Error::sqlite("begin read-only transaction", e))?;
                let mut txn = ReadOnlyTransaction {
                    tx,
                    cancel: cancel.clone(),
                };
                let value = body(&mut txn)?;
                txn.tx
                    .commit()
                    .map_err(|e| Error::sqlite("end read-only transaction", e))?;
                Ok(value)
            })
            .await
    }

    /// Run one query in a single-use read-only transaction.
    pub async fn single_query<T, F>(&self, stmt: Statement, decode: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.read_only_transaction(move |txn| txn.query(&stmt, decode))
            .await
    }

    /// Release the client. Equivalent to dropping it; spelled out for call
    /// sites that want the release to be visible.
    pub fn close(self) {
        tracing::debug!(database = %self.path, "Store client closed");
    }
}

fn build_pool(path: &DatabasePath, options: &StoreOptions) -> Result<Pool<SqliteConnectionManager>> {
    let file = path.file(&options.root);
    if !file.is_file() {
        return Err(Error::NotFound(format!("database {path}")));
    }

    let manager = SqliteConnectionManager::file(&file)
        .with_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX);

    let pool = Pool::builder()
        .max_size(options.pool_size)
        .min_idle(Some(1))
        .connection_timeout(options.connect_timeout)
        .connection_customizer(Box::new(SessionCustomizer {
            busy_timeout: options.busy_timeout,
        }))
        .build(manager)?;
    Ok(pool)
}

/// Connection customizer that applies session pragmas.
#[derive(Debug)]
struct SessionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for SessionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        apply_session_pragmas(conn, self.busy_timeout)
    }
}

/// A pooled session, returned to the pool when dropped.
pub struct Session {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl Session {
    /// Run blocking work against this session.
    ///
    /// If the returned future is dropped before completion the running
    /// statement is interrupted and `cancel` is raised, so the work unwinds
    /// promptly and the session goes back to the pool.
    pub async fn run<T, E, F>(self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection, &CancelFlag) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Send + 'static,
    {
        let Session { mut conn } = self;
        let cancel = CancelFlag::default();
        let finished = Arc::new(Mutex::new(false));
        let guard = InterruptOnDrop {
            cancel: cancel.clone(),
            handle: conn.get_interrupt_handle(),
            finished: Arc::clone(&finished),
        };

        let result = tokio::task::spawn_blocking(move || {
            let out = work(&mut conn, &cancel);
            // Mark the work finished while the session is still checked out.
            *lock_ignoring_poison(&finished) = true;
            drop(conn);
            out
        })
        .await;
        drop(guard);
        result.map_err(|e| E::from(Error::from_join(e)))?
    }
}

fn lock_ignoring_poison(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Raised when the caller of a store operation goes away.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Interrupts the session's running statement if the caller goes away.
///
/// The interrupt is issued under the `finished` lock, and the blocking work
/// sets `finished` before giving the session back to the pool, so a late drop
/// can never interrupt a statement of the session's next holder.
struct InterruptOnDrop {
    cancel: CancelFlag,
    handle: InterruptHandle,
    finished: Arc<Mutex<bool>>,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        let finished = lock_ignoring_poison(&self.finished);
        if !*finished {
            self.cancel.cancel();
            self.handle.interrupt();
        }
    }
}

fn run_read_write<T, E, F>(
    conn: &mut Connection,
    options: &StoreOptions,
    cancel: &CancelFlag,
    mut body: F,
) -> Result<CommitResponse<T>, E>
where
    F: FnMut(&mut ReadWriteTransaction<'_>) -> Result<T, E>,
    E: From<Error> + Retryable,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        cancel.check()?;
        record_txn_attempt();

        match attempt_read_write(conn, cancel, &mut body) {
            Err(err) if err.is_aborted() => {
                record_txn_abort();
                if attempt >= options.max_commit_attempts {
                    tracing::warn!(attempt, "Transaction aborted, retry budget exhausted");
                    return Err(err);
                }
                let delay = backoff_duration(options, attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transaction aborted, retrying"
                );
                std::thread::sleep(delay);
            }
            other => return other,
        }
    }
}

fn attempt_read_write<T, E, F>(
    conn: &mut Connection,
    cancel: &CancelFlag,
    body: &mut F,
) -> Result<CommitResponse<T>, E>
where
    F: FnMut(&mut ReadWriteTransaction<'_>) -> Result<T, E>,
    E: From<Error>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Deferred)
        .map_err(|e| Error::sqlite("begin transaction", e))?;
    let mut txn = ReadWriteTransaction {
        tx,
        commit_ts: None,
        buffered: Vec::new(),
        cancel: cancel.clone(),
    };

    // On error `txn` is dropped here, which rolls the attempt back.
    let value = body(&mut txn)?;
    let commit_timestamp = txn.commit()?;
    Ok(CommitResponse {
        value,
        commit_timestamp,
    })
}

/// Exponential backoff with cap.
fn backoff_duration(options: &StoreOptions, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    options
        .retry_backoff
        .saturating_mul(1_u32 << shift)
        .min(options.retry_backoff_max)
}

/// One attempt of a read-write transaction.
///
/// Reads and DML see this transaction's own earlier writes. Buffered
/// mutations are applied only at commit and are invisible to reads.
pub struct ReadWriteTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
    commit_ts: Option<Timestamp>,
    buffered: Vec<Mutation>,
    cancel: CancelFlag,
}

impl ReadWriteTransaction<'_> {
    /// Read `columns` of the row with primary key `key`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no such row exists.
    pub fn read_row<T, F>(&mut self, table: &str, key: &Key, columns: &[&str], decode: F) -> Result<T>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.cancel.check()?;
        read_row(&self.tx, table, key, columns, decode)
    }

    pub fn query<T, F>(&mut self, stmt: &Statement, decode: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.cancel.check()?;
        query(&self.tx, stmt, decode)
    }

    /// Execute a DML statement and return the number of rows it changed.
    ///
    /// `Value::CommitTimestamp` parameters resolve to this transaction's
    /// commit timestamp.
    pub fn update(&mut self, stmt: &Statement) -> Result<usize> {
        self.cancel.check()?;
        let commit_ts = self.commit_timestamp()?;
        let params = stmt.resolve(Some(commit_ts))?;
        self.tx
            .execute(stmt.sql(), params.as_named().as_slice())
            .map_err(|e| Error::sqlite("execute update", e))
    }

    /// Queue mutations to be applied when the transaction commits.
    pub fn buffer_write(&mut self, mutations: impl IntoIterator<Item = Mutation>) {
        self.buffered.extend(mutations);
    }

    /// The first write takes the write lock and fixes the commit timestamp.
    fn commit_timestamp(&mut self) -> Result<Timestamp> {
        if let Some(ts) = self.commit_ts {
            return Ok(ts);
        }
        let ts = advance_commit_clock(&self.tx)
            .map_err(|e| Error::sqlite("allocate commit timestamp", e))?;
        self.commit_ts = Some(ts);
        Ok(ts)
    }

    fn commit(mut self) -> Result<Option<Timestamp>> {
        self.cancel.check()?;
        if !self.buffered.is_empty() {
            let ts = self.commit_timestamp()?;
            for mutation in std::mem::take(&mut self.buffered) {
                mutation.apply(&self.tx, ts)?;
            }
        }

        let Self { tx, commit_ts, .. } = self;
        tx.commit().map_err(|e| Error::sqlite("commit", e))?;
        Ok(commit_ts)
    }
}

/// A read-only view over one consistent snapshot.
pub struct ReadOnlyTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
    cancel: CancelFlag,
}

impl ReadOnlyTransaction<'_> {
    pub fn read_row<T, F>(&mut self, table: &str, key: &Key, columns: &[&str], decode: F) -> Result<T>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.cancel.check()?;
        read_row(&self.tx, table, key, columns, decode)
    }

    pub fn query<T, F>(&mut self, stmt: &Statement, decode: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.cancel.check()?;
        query(&self.tx, stmt, decode)
    }

    /// Whether `table` has `column` in this snapshot's schema.
    pub fn has_column(&mut self, table: &str, column: &str) -> Result<bool> {
        self.cancel.check()?;
        column_exists(&self.tx, table, column)
            .map_err(|e| Error::sqlite(format!("read schema of {table}"), e))
    }
}

fn read_row<T, F>(conn: &Connection, table: &str, key: &Key, columns: &[&str], decode: F) -> Result<T>
where
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    if columns.is_empty() {
        return Err(Error::InvalidArgument(format!("read of {table} names no columns")));
    }
    let pk = primary_key_columns(conn, table)
        .map_err(|e| Error::sqlite(format!("read schema of {table}"), e))?;
    if pk.is_empty() {
        return Err(Error::NotFound(format!("table {table}")));
    }
    if pk.len() != key.len() {
        return Err(Error::InvalidArgument(format!(
            "key {key} does not match primary key ({}) of {table}",
            pk.join(", ")
        )));
    }

    let select: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let filter: Vec<String> = pk
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("{} = ?{}", quote_ident(column), idx + 1))
        .collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select.join(", "),
        quote_ident(table),
        filter.join(" AND ")
    );

    let values = key
        .parts()
        .iter()
        .map(|v| v.resolve(None))
        .collect::<Result<Vec<_>>>()?;
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

    let context = || format!("read row {key} of {table}");
    let mut stmt = conn
        .prepare_cached(&sql)
        .map_err(|e| Error::sqlite(context(), e))?;
    let mut rows = stmt
        .query(params.as_slice())
        .map_err(|e| Error::sqlite(context(), e))?;
    match rows.next().map_err(|e| Error::sqlite(context(), e))? {
        Some(row) => decode(row).map_err(|e| Error::row(context(), e)),
        None => Err(Error::NotFound(format!("row {key} in table {table}"))),
    }
}

fn query<T, F>(conn: &Connection, stmt: &Statement, mut decode: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let params = stmt.resolve(None)?;
    let mut prepared = conn
        .prepare(stmt.sql())
        .map_err(|e| Error::sqlite("prepare query", e))?;
    let mut rows = prepared
        .query(params.as_named().as_slice())
        .map_err(|e| Error::sqlite("execute query", e))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| Error::sqlite("fetch row", e))? {
        out.push(decode(row).map_err(|e| Error::row("decode row", e))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::admin::{DatabaseAdmin, InstanceAdmin};
    use crate::storage::value::Value;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const ACCOUNTS_DDL: &str =
        "CREATE TABLE Accounts (Id INTEGER NOT NULL PRIMARY KEY, Balance INTEGER, Touched INTEGER)";

    async fn setup(temp_dir: &TempDir) -> (DatabasePath, StoreOptions) {
        let options = StoreOptions::new(temp_dir.path());
        let path = DatabasePath::new("test", "local", "bank").unwrap();
        InstanceAdmin::new(temp_dir.path())
            .create_instance(&path.instance_path())
            .await
            .unwrap();
        DatabaseAdmin::new(options.clone())
            .create_database(&path, vec![ACCOUNTS_DDL.to_string()])
            .wait()
            .await
            .unwrap();
        (path, options)
    }

    fn account(id: i64, balance: i64) -> Mutation {
        Mutation::insert_or_update(
            "Accounts",
            &["Id", "Balance", "Touched"],
            vec![Value::Int64(id), Value::Int64(balance), Value::CommitTimestamp],
        )
    }

    async fn balance(client: &Client, id: i64) -> Option<i64> {
        let stmt = Statement::new("SELECT Balance FROM Accounts WHERE Id = @id").bind("id", id);
        client
            .single_query(stmt, |row| row.get::<_, Option<i64>>(0))
            .await
            .unwrap()
            .into_iter()
            .next()
            .flatten()
    }

    #[tokio::test]
    async fn test_connect_missing_database_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = DatabasePath::new("test", "local", "nothing").unwrap();

        let err = Client::connect(path, StoreOptions::new(temp_dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_apply_returns_increasing_commit_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let client = Client::connect(path, options).await.unwrap();

        let first = client.apply(vec![account(1, 10), account(2, 20)]).await.unwrap();
        let second = client.apply(vec![account(1, 11)]).await.unwrap();

        assert!(second > first);
        assert_eq!(balance(&client, 1).await, Some(11));
        assert_eq!(balance(&client, 2).await, Some(20));

        let touched = client
            .single_query(
                Statement::new("SELECT Touched FROM Accounts ORDER BY Id"),
                |row| row.get::<_, i64>(0),
            )
            .await
            .unwrap();
        assert_eq!(
            touched,
            vec![second.as_micros(), first.as_micros()]
        );
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let client = Client::connect(path, options).await.unwrap();

        let err = client
            .apply(vec![
                account(1, 10),
                Mutation::update("Accounts", &["Id", "Balance"], vec![Value::Int64(99), Value::Int64(1)]),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(balance(&client, 1).await, None);
    }

    #[tokio::test]
    async fn test_read_row_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let client = Client::connect(path, options).await.unwrap();

        let err = client
            .read_write_transaction(|txn| {
                txn.read_row("Accounts", &Key::from(7_i64), &["Balance"], |row| {
                    row.get::<_, Option<i64>>(0)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(ref what) if what.contains("(7)")));
    }

    #[tokio::test]
    async fn test_read_only_commit_has_no_timestamp() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let client = Client::connect(path, options).await.unwrap();
        client.apply(vec![account(1, 10)]).await.unwrap();

        let response = client
            .read_write_transaction(|txn| {
                txn.read_row("Accounts", &Key::from(1_i64), &["Balance"], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .await
            .unwrap();

        assert_eq!(response.value, 10);
        assert_eq!(response.commit_timestamp, None);
    }

    #[tokio::test]
    async fn test_stale_read_aborts_and_reruns_body() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let file = path.file(&options.root);
        let client = Client::connect(path, options).await.unwrap();
        client.apply(vec![account(1, 100)]).await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let response = client
            .read_write_transaction(move |txn| {
                let attempt = seen.fetch_add(1, Ordering::SeqCst);
                let current: i64 = txn.read_row("Accounts", &Key::from(1_i64), &["Balance"], |row| {
                    row.get(0)
                })?;

                if attempt == 0 {
                    // A competing writer commits after our read.
                    let other = Connection::open(&file).unwrap();
                    other
                        .execute("UPDATE Accounts SET Balance = 500 WHERE Id = 1", [])
                        .unwrap();
                }

                txn.update(
                    &Statement::new("UPDATE Accounts SET Balance = @b WHERE Id = 1")
                        .bind("b", current + 1),
                )?;
                Ok::<_, Error>(current)
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(response.value, 500);
        assert!(response.commit_timestamp.is_some());
        assert_eq!(balance(&client, 1).await, Some(501));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_surfaces_abort() {
        let temp_dir = TempDir::new().unwrap();
        let (path, mut options) = setup(&temp_dir).await;
        options.max_commit_attempts = 3;
        options.retry_backoff = Duration::from_millis(1);
        let client = Client::connect(path, options).await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let err = client
            .read_write_transaction(move |_txn| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Aborted("injected".into()))
            })
            .await
            .unwrap_err();

        assert!(err.is_aborted());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_abort_error_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let client = Client::connect(path, options).await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let err = client
            .read_write_transaction(move |txn| {
                seen.fetch_add(1, Ordering::SeqCst);
                txn.update(&Statement::new("UPDATE Missing SET X = 1"))
            })
            .await
            .unwrap_err();

        assert!(!err.is_aborted());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_timestamp_rejected_in_reads() {
        let temp_dir = TempDir::new().unwrap();
        let (path, options) = setup(&temp_dir).await;
        let client = Client::connect(path, options).await.unwrap();

        let stmt = Statement::new("SELECT @ts").bind("ts", Value::CommitTimestamp);
        let err = client
            .single_query(stmt, |row| row.get::<_, i64>(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_dropped_caller_interrupts_and_releases_session() {
        let temp_dir = TempDir::new().unwrap();
        let (path, mut options) = setup(&temp_dir).await;
        options.pool_size = 1;
        let client = Client::connect(path, options).await.unwrap();

        let endless = Statement::new(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) SELECT COUNT(*) FROM n",
        );
        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            client.single_query(endless, |row| row.get::<_, i64>(0)),
        )
        .await;
        assert!(timed_out.is_err());

        // The only session is back in the pool once the statement unwinds.
        let value = tokio::time::timeout(
            Duration::from_secs(5),
            client.single_query(Statement::new("SELECT 1"), |row| row.get::<_, i64>(0)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value, vec![1]);
    }

    #[tokio::test]
    async fn test_late_drop_does_not_interrupt_next_session_holder() {
        let temp_dir = TempDir::new().unwrap();
        let (path, mut options) = setup(&temp_dir).await;
        options.pool_size = 1;
        let client = Client::connect(path, options).await.unwrap();

        // Caller A finishes its work but is never polled again.
        let session = client.session().await.unwrap();
        let mut abandoned = Box::pin(session.run(|_, _| Ok::<_, Error>(())));
        assert!(futures::poll!(abandoned.as_mut()).is_pending());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Caller B gets the only session and starts a long statement on it.
        let counting = Statement::new(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 5000000) \
             SELECT COUNT(*) FROM n",
        );
        let reader = client.clone();
        let next_holder = tokio::spawn(async move {
            reader
                .single_query(counting, |row| row.get::<_, i64>(0))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(abandoned);

        let counted = next_holder.await.unwrap().unwrap();
        assert_eq!(counted, vec![5_000_000]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let options = StoreOptions {
            retry_backoff: Duration::from_millis(2),
            retry_backoff_max: Duration::from_millis(20),
            ..StoreOptions::default()
        };
        assert_eq!(backoff_duration(&options, 1), Duration::from_millis(2));
        assert_eq!(backoff_duration(&options, 3), Duration::from_millis(8));
        assert_eq!(backoff_duration(&options, 30), Duration::from_millis(20));
    }
}
