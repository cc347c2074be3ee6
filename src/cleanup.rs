//! Expiry sweep: removes users whose removal horizon passed, then chats
//! left without a viable membership. Runs on its own connection so the
//! request path never waits on it.

use rusqlite::Connection;
use tracing::debug;

use crate::chat;
use crate::db::open_worker_connection;

/// Initial delay before the first sweep, so startup is not penalized.
const INITIAL_DELAY_SECS: u64 = 30;

pub fn spawn_expiry_task(db_path: String, interval_secs: u64) {
    tokio::spawn(async move {
        let conn = match open_worker_connection(&db_path) {
            Ok(c) => c,
            Err(_) => return,
        };
        tokio::time::sleep(std::time::Duration::from_secs(INITIAL_DELAY_SECS)).await;
        let tick = std::time::Duration::from_secs(interval_secs.max(30));
        loop {
            run_expiry_sweep(&conn);
            tokio::time::sleep(tick).await;
        }
    });
}

/// One sweep: expired users first, then orphaned chats (cascades take the
/// dependent rows with them).
pub fn run_expiry_sweep(conn: &Connection) -> (usize, usize) {
    let users = chat::delete_expired_users(conn).unwrap_or(0);
    let chats = chat::delete_orphan_chats(conn).unwrap_or(0);
    if users > 0 || chats > 0 {
        debug!(users, chats, "expiry sweep removed rows");
    }
    (users, chats)
}
