//! Web push outbox. Subscriptions and the send queue are persisted; payloads
//! are synthesized at dispatch time and never contain message content.
//!
//! A background worker claims unread, unsent queue rows in batches and
//! pushes a fixed-shape notification to each of the recipient's
//! subscriptions. Gone endpoints (404/410) are pruned; other failures
//! count against a 20-attempt cap, after which the row is left to expire.

use chrono::{Duration, Utc};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, URL_SAFE_NO_PAD, VapidSignatureBuilder,
    WebPushClient, WebPushError, WebPushMessageBuilder,
};

use crate::config::Config;
use crate::db::open_worker_connection;
use crate::error::ApiResult;

const MAX_ATTEMPTS: i64 = 20;
const CLAIM_BATCH: i64 = 50;

/// Subscription retention: randomized 21–90 days after each refresh.
const SUB_RETENTION_MIN_SECS: i64 = 21 * 86400;
const SUB_RETENTION_MAX_SECS: i64 = 90 * 86400;
/// Queue row retention: randomized 7–30 days.
const QUEUE_RETENTION_MIN_SECS: i64 = 7 * 86400;
const QUEUE_RETENTION_MAX_SECS: i64 = 30 * 86400;

/// Store or refresh a subscription. The retention window is randomized and
/// capped one minute below the user's own removal horizon.
pub fn subscribe(
    conn: &Connection,
    user_id: &str,
    endpoint: &str,
    p256dh: &str,
    auth: &str,
) -> ApiResult<()> {
    let jitter = rand::thread_rng().gen_range(SUB_RETENTION_MIN_SECS..=SUB_RETENTION_MAX_SECS);
    let mut remove_date = Utc::now() + Duration::seconds(jitter);
    let user_remove: Option<String> = conn
        .query_row(
            "SELECT remove_date FROM users WHERE id = ?1",
            params![user_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(user_remove) = user_remove
        && let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(&user_remove)
    {
        let cap = parsed.with_timezone(&Utc) - Duration::minutes(1);
        if remove_date > cap {
            remove_date = cap;
        }
    }
    conn.execute(
        "INSERT INTO push_subscriptions (endpoint, user_id, p256dh, auth, remove_date)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(endpoint) DO UPDATE SET
           user_id = excluded.user_id,
           p256dh = excluded.p256dh,
           auth = excluded.auth,
           remove_date = excluded.remove_date",
        params![endpoint, user_id, p256dh, auth, remove_date.to_rfc3339()],
    )?;
    Ok(())
}

pub fn disable(conn: &Connection, user_id: &str, endpoint: &str) -> ApiResult<()> {
    conn.execute(
        "DELETE FROM push_subscriptions WHERE endpoint = ?1 AND user_id = ?2",
        params![endpoint, user_id],
    )?;
    Ok(())
}

/// Queue a notification for an offline recipient. A row is created only
/// when the user has at least one stored subscription.
pub fn enqueue(conn: &Connection, user_id: &str, message_id: &str, chat_id: &str) -> ApiResult<()> {
    let jitter = rand::thread_rng().gen_range(QUEUE_RETENTION_MIN_SECS..=QUEUE_RETENTION_MAX_SECS);
    let remove_date = (Utc::now() + Duration::seconds(jitter)).to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO push_send_queue (user_id, message_id, chat_id, remove_date)
         SELECT ?1, ?2, ?3, ?4
         WHERE EXISTS (SELECT 1 FROM push_subscriptions WHERE user_id = ?1)",
        params![user_id, message_id, chat_id, remove_date],
    )?;
    Ok(())
}

struct QueueRow {
    user_id: String,
    message_id: String,
    chat_id: String,
}

struct StoredSubscription {
    endpoint: String,
    p256dh: String,
    auth: String,
}

/// Rows still worth sending: unsent, under the attempt cap, and whose
/// unread counterpart still exists (a read message needs no nudge).
fn claim_rows(conn: &Connection) -> rusqlite::Result<Vec<QueueRow>> {
    let mut stmt = conn.prepare(
        "SELECT q.user_id, q.message_id, q.chat_id FROM push_send_queue q
         WHERE q.sent = 0 AND q.attempts < ?1
           AND EXISTS (SELECT 1 FROM unread_messages u
                       WHERE u.user_id = q.user_id AND u.message_id = q.message_id)
         ORDER BY q.message_id ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![MAX_ATTEMPTS, CLAIM_BATCH], |r| {
            Ok(QueueRow {
                user_id: r.get(0)?,
                message_id: r.get(1)?,
                chat_id: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn subscriptions_for(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<StoredSubscription>> {
    let mut stmt = conn
        .prepare("SELECT endpoint, p256dh, auth FROM push_subscriptions WHERE user_id = ?1")?;
    let subs = stmt
        .query_map(params![user_id], |r| {
            Ok(StoredSubscription {
                endpoint: r.get(0)?,
                p256dh: r.get(1)?,
                auth: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subs)
}

/// The notification payload is a fixed shape carrying routing data only.
fn payload(app_name: &str, chat_id: &str) -> Vec<u8> {
    serde_json::json!({
        "title": app_name,
        "body": "New message",
        "tag": format!("lrcom-chat-{chat_id}"),
        "url": "/",
        "data": { "chatId": chat_id },
    })
    .to_string()
    .into_bytes()
}

async fn send_one(
    client: &IsahcWebPushClient,
    config: &Config,
    sub: &StoredSubscription,
    payload: &[u8],
) -> Result<(), WebPushError> {
    let info = SubscriptionInfo::new(sub.endpoint.clone(), sub.p256dh.clone(), sub.auth.clone());
    let private_key = config.vapid_private_key.as_deref().unwrap_or_default();
    let mut sig = VapidSignatureBuilder::from_base64(private_key, URL_SAFE_NO_PAD, &info)?;
    if let Some(subject) = &config.vapid_subject {
        sig.add_claim("sub", subject.as_str());
    }
    let signature = sig.build()?;
    let mut builder = WebPushMessageBuilder::new(&info);
    builder.set_payload(ContentEncoding::Aes128Gcm, payload);
    builder.set_vapid_signature(signature);
    client.send(builder.build()?).await
}

/// One worker pass. The connection is only locked between sends, never
/// across an await. Returns the number of queue rows that reached at least
/// one endpoint.
pub async fn run_outbox_pass(
    conn: &std::sync::Mutex<Connection>,
    client: &IsahcWebPushClient,
    config: &Config,
) -> usize {
    let rows = {
        let db = conn.lock().unwrap_or_else(|e| e.into_inner());
        match claim_rows(&db) {
            Ok(rows) => rows,
            Err(_) => return 0,
        }
    };
    let mut delivered = 0;

    for row in rows {
        let subs = {
            let db = conn.lock().unwrap_or_else(|e| e.into_inner());
            subscriptions_for(&db, &row.user_id).unwrap_or_default()
        };
        let body = payload(&config.app_name, &row.chat_id);
        let mut any_success = false;

        for sub in &subs {
            match send_one(client, config, sub, &body).await {
                Ok(()) => any_success = true,
                Err(WebPushError::EndpointNotValid | WebPushError::EndpointNotFound) => {
                    // The push service says this endpoint is gone for good.
                    let db = conn.lock().unwrap_or_else(|e| e.into_inner());
                    let _ = db.execute(
                        "DELETE FROM push_subscriptions WHERE endpoint = ?1",
                        params![&sub.endpoint],
                    );
                }
                Err(e) => {
                    debug!(error = %e, "push send failed");
                }
            }
        }

        let db = conn.lock().unwrap_or_else(|e| e.into_inner());
        let _ = db.execute(
            "UPDATE push_send_queue SET attempts = attempts + 1, sent = ?1
             WHERE user_id = ?2 AND message_id = ?3",
            params![any_success as i64, &row.user_id, &row.message_id],
        );
        if any_success {
            delivered += 1;
        }
    }
    delivered
}

/// Drop expired subscriptions, expired queue rows, and queue rows whose
/// unread counterpart disappeared.
pub fn run_push_cleanup(conn: &Connection) {
    let now = Utc::now().to_rfc3339();
    let _ = conn.execute(
        "DELETE FROM push_subscriptions WHERE remove_date < ?1",
        params![&now],
    );
    let _ = conn.execute(
        "DELETE FROM push_send_queue WHERE remove_date < ?1",
        params![&now],
    );
    let _ = conn.execute(
        "DELETE FROM push_send_queue WHERE NOT EXISTS (
            SELECT 1 FROM unread_messages u
            WHERE u.user_id = push_send_queue.user_id
              AND u.message_id = push_send_queue.message_id)",
        [],
    );
}

/// Spawn the outbox worker. Only called when VAPID credentials are present.
pub fn spawn_outbox_worker(db_path: String, config: Config) {
    tokio::spawn(async move {
        let Ok(client) = IsahcWebPushClient::new() else {
            return;
        };
        let conn = match open_worker_connection(&db_path) {
            Ok(c) => std::sync::Mutex::new(c),
            Err(_) => return,
        };
        let tick = std::time::Duration::from_secs(config.push_tick_secs.max(5));
        loop {
            tokio::time::sleep(tick).await;
            let sent = run_outbox_pass(&conn, &client, &config).await;
            if sent > 0 {
                debug!(sent, "push outbox pass delivered");
            }
        }
    });
}

/// Spawn the push table sweep.
pub fn spawn_push_cleanup(db_path: String, interval_secs: u64) {
    tokio::spawn(async move {
        let conn = match open_worker_connection(&db_path) {
            Ok(c) => c,
            Err(_) => return,
        };
        let tick = std::time::Duration::from_secs(interval_secs.max(30));
        loop {
            tokio::time::sleep(tick).await;
            run_push_cleanup(&conn);
        }
    });
}
