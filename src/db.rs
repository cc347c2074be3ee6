use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

/// Embedded migrations, applied in lexicographic filename order and tracked
/// in `schema_migrations(id)`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_init.sql", include_str!("../migrations/0001_init.sql")),
    ("0002_push.sql", include_str!("../migrations/0002_push.sql")),
];

/// Shared database handle. Background workers (push outbox, expiry sweeps)
/// open their own connections from `path` instead of contending on this one.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

/// Storage failures split into the two categories callers care about:
/// integrity violations map to client errors, everything else is transient.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Integrity(String),
    #[error("{0}")]
    Transient(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Integrity(e.to_string())
            }
            _ => StoreError::Transient(e.to_string()),
        }
    }
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("failed to open database");
        apply_pragmas(&conn);
        migrate(&conn);
        Db {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_string(),
        }
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Open a secondary connection for a background task.
pub fn open_worker_connection(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn);
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=2000;")
        .expect("failed to set pragmas");
}

fn migrate(conn: &Connection) {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_migrations (id TEXT PRIMARY KEY);")
        .expect("failed to create schema_migrations");

    let mut pending: Vec<(&str, &str)> = MIGRATIONS.to_vec();
    pending.sort_by_key(|(id, _)| *id);

    for (id, sql) in pending {
        let applied: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_migrations WHERE id = ?1",
                [id],
                |r| r.get::<_, i64>(0),
            )
            .map(|c| c > 0)
            .unwrap_or(false);
        if applied {
            continue;
        }
        conn.execute_batch(sql)
            .unwrap_or_else(|e| panic!("migration {id} failed: {e}"));
        conn.execute("INSERT INTO schema_migrations (id) VALUES (?1)", [id])
            .expect("failed to record migration");
    }
}
