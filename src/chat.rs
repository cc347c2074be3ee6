//! Chat data model: personal and group chats, memberships with visibility
//! borders, messages, and the unread ledger. All multi-row transitions run
//! inside a transaction on the caller's connection.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{ApiError, ApiResult};
use crate::models::{ChatSummary, MAX_CIPHERTEXT_BYTES, MemberOut, MessageOut, UserRow, validate_name};

// --- Users ---

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        public_key: row.get(2)?,
        vault: row.get(3)?,
        remove_date: row.get(4)?,
        hidden_mode: row.get::<_, i64>(5)? != 0,
        introvert_mode: row.get::<_, i64>(6)? != 0,
    })
}

const USER_COLUMNS: &str =
    "id, username, public_key, vault, remove_date, hidden_mode, introvert_mode";

pub fn find_user(conn: &Connection, user_id: &str) -> ApiResult<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> ApiResult<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn username_exists(conn: &Connection, username: &str) -> ApiResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1",
        params![username],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    public_key: &str,
    vault: &str,
    remove_date: &str,
) -> ApiResult<UserRow> {
    let id = uuid::Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (id, username, public_key, vault, remove_date) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, username, public_key, vault, remove_date],
    )?;
    if inserted == 0 {
        return Err(ApiError::Conflict("already exists".to_string()));
    }
    Ok(UserRow {
        id,
        username: username.to_string(),
        public_key: public_key.to_string(),
        vault: vault.to_string(),
        remove_date: remove_date.to_string(),
        hidden_mode: false,
        introvert_mode: false,
    })
}

pub fn set_vault(conn: &Connection, user_id: &str, vault: &str) -> ApiResult<()> {
    conn.execute(
        "UPDATE users SET vault = ?1 WHERE id = ?2",
        params![vault, user_id],
    )?;
    Ok(())
}

pub fn set_remove_date(conn: &Connection, user_id: &str, remove_date: &str) -> ApiResult<()> {
    conn.execute(
        "UPDATE users SET remove_date = ?1 WHERE id = ?2",
        params![remove_date, user_id],
    )?;
    Ok(())
}

pub fn set_hidden_mode(conn: &Connection, user_id: &str, enabled: bool) -> ApiResult<()> {
    conn.execute(
        "UPDATE users SET hidden_mode = ?1 WHERE id = ?2",
        params![enabled as i64, user_id],
    )?;
    Ok(())
}

pub fn set_introvert_mode(conn: &Connection, user_id: &str, enabled: bool) -> ApiResult<()> {
    conn.execute(
        "UPDATE users SET introvert_mode = ?1 WHERE id = ?2",
        params![enabled as i64, user_id],
    )?;
    Ok(())
}

pub fn delete_user(conn: &Connection, user_id: &str) -> ApiResult<()> {
    conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
    Ok(())
}

// --- Membership ---

/// Membership guard for every chat operation. A non-member gets the same
/// `forbidden` whether the chat exists or not.
fn member_border(conn: &Connection, chat_id: &str, user_id: &str) -> ApiResult<Option<String>> {
    conn.query_row(
        "SELECT visible_after_message_id FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
        params![chat_id, user_id],
        |r| r.get::<_, Option<String>>(0),
    )
    .optional()?
    .ok_or(ApiError::Forbidden)
}

pub fn assert_member(conn: &Connection, chat_id: &str, user_id: &str) -> ApiResult<()> {
    member_border(conn, chat_id, user_id).map(|_| ())
}

pub fn member_ids(conn: &Connection, chat_id: &str) -> ApiResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")?;
    let ids = stmt
        .query_map(params![chat_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn chat_ids_for_user(conn: &Connection, user_id: &str) -> ApiResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT chat_id FROM chat_members WHERE user_id = ?1")?;
    let ids = stmt
        .query_map(params![user_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn chat_type(conn: &Connection, chat_id: &str) -> ApiResult<Option<String>> {
    let t = conn
        .query_row(
            "SELECT chat_type FROM chats WHERE id = ?1",
            params![chat_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(t)
}

pub fn has_any_chat(conn: &Connection, a: &str, b: &str) -> ApiResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_members m1
         JOIN chat_members m2 ON m2.chat_id = m1.chat_id
         WHERE m1.user_id = ?1 AND m2.user_id = ?2",
        params![a, b],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn has_personal_chat(conn: &Connection, a: &str, b: &str) -> ApiResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chats c
         JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?1
         JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?2
         WHERE c.chat_type = 'personal'",
        params![a, b],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

// --- Chat lifecycle ---

pub struct PersonalChatOutcome {
    pub chat_id: String,
    pub other: UserRow,
    pub created: bool,
}

/// Create (or idempotently return) the personal chat between the actor and
/// another user. The introvert flag blocks first contact only: once any
/// shared chat exists, the gate is open.
pub fn create_personal_chat(
    conn: &mut Connection,
    actor_id: &str,
    other_username: &str,
) -> ApiResult<PersonalChatOutcome> {
    let other = find_user_by_username(conn, other_username)?.ok_or(ApiError::NotFound)?;
    if other.id == actor_id {
        return Err(ApiError::Validation("cannot chat with yourself".to_string()));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT c.id FROM chats c
             JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?1
             JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?2
             WHERE c.chat_type = 'personal' LIMIT 1",
            params![actor_id, &other.id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(chat_id) = existing {
        return Ok(PersonalChatOutcome { chat_id, other, created: false });
    }

    if other.introvert_mode && !has_any_chat(conn, actor_id, &other.id)? {
        return Err(ApiError::Introvert);
    }

    let chat_id = uuid::Uuid::new_v4().to_string();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO chats (id, chat_type) VALUES (?1, 'personal')",
        params![&chat_id],
    )?;
    tx.execute(
        "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
        params![&chat_id, actor_id],
    )?;
    tx.execute(
        "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
        params![&chat_id, &other.id],
    )?;
    tx.commit()?;

    Ok(PersonalChatOutcome { chat_id, other, created: true })
}

pub fn create_group_chat(conn: &mut Connection, actor_id: &str, name: &str) -> ApiResult<String> {
    let name = name.trim();
    validate_name(name, "group name")?;
    let chat_id = uuid::Uuid::new_v4().to_string();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO chats (id, chat_type, chat_name) VALUES (?1, 'group', ?2)",
        params![&chat_id, name],
    )?;
    tx.execute(
        "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
        params![&chat_id, actor_id],
    )?;
    tx.commit()?;
    Ok(chat_id)
}

pub struct AddMemberOutcome {
    pub user: UserRow,
    pub added: bool,
}

/// Add a user to a group. The joiner's visibility border starts at the
/// current newest message, so the pre-join history stays out of reach.
pub fn add_group_member(
    conn: &mut Connection,
    actor_id: &str,
    chat_id: &str,
    username: &str,
) -> ApiResult<AddMemberOutcome> {
    assert_member(conn, chat_id, actor_id)?;
    match chat_type(conn, chat_id)?.as_deref() {
        Some("group") => {}
        _ => return Err(ApiError::Validation("not a group chat".to_string())),
    }
    let user = find_user_by_username(conn, username)?.ok_or(ApiError::NotFound)?;

    let already: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id, &user.id],
            |r| r.get::<_, i64>(0),
        )
        .map(|c| c > 0)?;
    if already {
        return Ok(AddMemberOutcome { user, added: false });
    }

    if user.introvert_mode && !has_any_chat(conn, actor_id, &user.id)? {
        return Err(ApiError::Introvert);
    }

    let border: Option<String> = conn.query_row(
        "SELECT MAX(id) FROM messages WHERE chat_id = ?1",
        params![chat_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO chat_members (chat_id, user_id, visible_after_message_id) VALUES (?1, ?2, ?3)",
        params![chat_id, &user.id, border],
    )?;
    Ok(AddMemberOutcome { user, added: true })
}

pub fn rename_group(
    conn: &Connection,
    actor_id: &str,
    chat_id: &str,
    name: &str,
) -> ApiResult<Vec<String>> {
    assert_member(conn, chat_id, actor_id)?;
    match chat_type(conn, chat_id)?.as_deref() {
        Some("group") => {}
        _ => return Err(ApiError::Validation("not a group chat".to_string())),
    }
    let name = name.trim();
    validate_name(name, "group name")?;
    conn.execute(
        "UPDATE chats SET chat_name = ?1 WHERE id = ?2",
        params![name, chat_id],
    )?;
    member_ids(conn, chat_id)
}

pub enum LeaveOutcome {
    /// The whole personal chat was removed; both former member ids returned.
    PersonalDeleted { member_ids: Vec<String> },
    /// The actor left a group. Remaining members had their borders raised to
    /// the newest message id; `authored` lists the leaver's message ids for
    /// removal-from-view fan-out.
    LeftGroup {
        remaining: Vec<String>,
        authored: Vec<String>,
        group_deleted: bool,
    },
}

pub fn leave_chat(conn: &mut Connection, actor_id: &str, chat_id: &str) -> ApiResult<LeaveOutcome> {
    assert_member(conn, chat_id, actor_id)?;
    let kind = chat_type(conn, chat_id)?.ok_or(ApiError::Forbidden)?;

    if kind == "personal" {
        let members = member_ids(conn, chat_id)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
        tx.commit()?;
        return Ok(LeaveOutcome::PersonalDeleted { member_ids: members });
    }

    let tx = conn.transaction()?;
    let authored: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT id FROM messages WHERE chat_id = ?1 AND sender_id = ?2 ORDER BY id ASC")?;
        stmt.query_map(params![chat_id, actor_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?
    };
    tx.execute(
        "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
        params![chat_id, actor_id],
    )?;
    tx.execute(
        "DELETE FROM unread_messages WHERE chat_id = ?1 AND user_id = ?2",
        params![chat_id, actor_id],
    )?;
    let highest: Option<String> = tx.query_row(
        "SELECT MAX(id) FROM messages WHERE chat_id = ?1",
        params![chat_id],
        |r| r.get(0),
    )?;
    if let Some(ref highest) = highest {
        tx.execute(
            "UPDATE chat_members SET visible_after_message_id = ?1
             WHERE chat_id = ?2
               AND (visible_after_message_id IS NULL OR visible_after_message_id < ?1)",
            params![highest, chat_id],
        )?;
    }
    let remaining: Vec<String> = {
        let mut stmt = tx.prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")?;
        stmt.query_map(params![chat_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?
    };
    let group_deleted = remaining.is_empty();
    if group_deleted {
        tx.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
    }
    tx.commit()?;

    Ok(LeaveOutcome::LeftGroup { remaining, authored, group_deleted })
}

// --- Messages ---

pub struct SendOutcome {
    pub message_id: String,
    pub member_ids: Vec<String>,
}

/// Insert a message and the unread rows for every member except the sender,
/// in one transaction. The id is a UUIDv7, so ids sort chronologically.
pub fn send_message(
    conn: &mut Connection,
    sender_id: &str,
    chat_id: &str,
    encrypted_data: &str,
) -> ApiResult<SendOutcome> {
    assert_member(conn, chat_id, sender_id)?;
    if encrypted_data.len() > MAX_CIPHERTEXT_BYTES {
        return Err(ApiError::PayloadTooLarge("message too large".to_string()));
    }
    let message_id = uuid::Uuid::now_v7().to_string();
    let members = member_ids(conn, chat_id)?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO messages (id, chat_id, sender_id, encrypted_data) VALUES (?1, ?2, ?3, ?4)",
        params![&message_id, chat_id, sender_id, encrypted_data],
    )?;
    for member in members.iter().filter(|m| m.as_str() != sender_id) {
        tx.execute(
            "INSERT INTO unread_messages (user_id, message_id, chat_id) VALUES (?1, ?2, ?3)",
            params![member, &message_id, chat_id],
        )?;
    }
    tx.commit()?;

    Ok(SendOutcome { message_id, member_ids: members })
}

fn message_sender(conn: &Connection, chat_id: &str, message_id: &str) -> ApiResult<String> {
    conn.query_row(
        "SELECT sender_id FROM messages WHERE id = ?1 AND chat_id = ?2",
        params![message_id, chat_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or(ApiError::NotFound)
}

pub fn update_message(
    conn: &Connection,
    actor_id: &str,
    chat_id: &str,
    message_id: &str,
    encrypted_data: &str,
) -> ApiResult<Vec<String>> {
    assert_member(conn, chat_id, actor_id)?;
    if encrypted_data.len() > MAX_CIPHERTEXT_BYTES {
        return Err(ApiError::PayloadTooLarge("message too large".to_string()));
    }
    if message_sender(conn, chat_id, message_id)? != actor_id {
        return Err(ApiError::Forbidden);
    }
    conn.execute(
        "UPDATE messages SET encrypted_data = ?1 WHERE id = ?2",
        params![encrypted_data, message_id],
    )?;
    member_ids(conn, chat_id)
}

pub fn delete_message(
    conn: &mut Connection,
    actor_id: &str,
    chat_id: &str,
    message_id: &str,
) -> ApiResult<Vec<String>> {
    assert_member(conn, chat_id, actor_id)?;
    if message_sender(conn, chat_id, message_id)? != actor_id {
        return Err(ApiError::Forbidden);
    }
    let members = member_ids(conn, chat_id)?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
    tx.commit()?;
    Ok(members)
}

/// Newest-first history page, filtered by the member's visibility border.
pub fn history(
    conn: &Connection,
    user_id: &str,
    chat_id: &str,
    limit: i64,
    before: Option<&str>,
) -> ApiResult<Vec<MessageOut>> {
    let border = member_border(conn, chat_id, user_id)?;
    let limit = limit.clamp(1, 200);
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, sender_id, encrypted_data FROM messages
         WHERE chat_id = ?1
           AND (?2 IS NULL OR id > ?2)
           AND (?3 IS NULL OR id < ?3)
         ORDER BY id DESC LIMIT ?4",
    )?;
    let messages = stmt
        .query_map(params![chat_id, border, before, limit], |r| {
            Ok(MessageOut {
                id: r.get(0)?,
                chat_id: r.get(1)?,
                sender_id: r.get(2)?,
                encrypted_data: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

// --- Unread ledger ---

pub fn unread_ids(
    conn: &Connection,
    user_id: &str,
    chat_id: &str,
    limit: i64,
) -> ApiResult<Vec<String>> {
    assert_member(conn, chat_id, user_id)?;
    let limit = limit.clamp(1, 5000);
    let mut stmt = conn.prepare(
        "SELECT message_id FROM unread_messages
         WHERE user_id = ?1 AND chat_id = ?2 ORDER BY message_id ASC LIMIT ?3",
    )?;
    let ids = stmt
        .query_map(params![user_id, chat_id, limit], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn mark_chat_read(conn: &Connection, user_id: &str, chat_id: &str) -> ApiResult<()> {
    assert_member(conn, chat_id, user_id)?;
    conn.execute(
        "DELETE FROM unread_messages WHERE user_id = ?1 AND chat_id = ?2",
        params![user_id, chat_id],
    )?;
    Ok(())
}

/// Delete the named unread rows; returns the remaining unread count for the
/// chat.
pub fn mark_messages_read(
    conn: &Connection,
    user_id: &str,
    chat_id: &str,
    message_ids: &[String],
) -> ApiResult<i64> {
    assert_member(conn, chat_id, user_id)?;
    for chunk in message_ids.chunks(500) {
        let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "DELETE FROM unread_messages WHERE user_id = ?1 AND chat_id = ?2 AND message_id IN ({})",
            placeholders.join(",")
        );
        let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id, &chat_id];
        for id in chunk {
            values.push(id as &dyn rusqlite::types::ToSql);
        }
        conn.execute(&sql, values.as_slice())?;
    }
    let remaining: i64 = conn.query_row(
        "SELECT COUNT(*) FROM unread_messages WHERE user_id = ?1 AND chat_id = ?2",
        params![user_id, chat_id],
        |r| r.get(0),
    )?;
    Ok(remaining)
}

pub fn unread_count(conn: &Connection, user_id: &str, chat_id: &str) -> ApiResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM unread_messages WHERE user_id = ?1 AND chat_id = ?2",
        params![user_id, chat_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

// --- Listings ---

pub fn chats_list(conn: &Connection, user_id: &str) -> ApiResult<Vec<ChatSummary>> {
    let rows: Vec<(String, String, Option<String>, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.chat_type, c.chat_name, m.visible_after_message_id
             FROM chats c JOIN chat_members m ON m.chat_id = c.id
             WHERE m.user_id = ?1",
        )?;
        stmt.query_map(params![user_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?
    };

    let mut chats = Vec::with_capacity(rows.len());
    for (chat_id, kind, name, border) in rows {
        let (other_user_id, other_username, other_public_key) = if kind == "personal" {
            let other: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT u.id, u.username, u.public_key FROM chat_members m
                     JOIN users u ON u.id = m.user_id
                     WHERE m.chat_id = ?1 AND m.user_id != ?2",
                    params![&chat_id, user_id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?;
            match other {
                Some((id, name, key)) => (Some(id), Some(name), Some(key)),
                None => (None, None, None),
            }
        } else {
            (None, None, None)
        };

        let last_message: Option<MessageOut> = conn
            .query_row(
                "SELECT id, chat_id, sender_id, encrypted_data FROM messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR id > ?2)
                 ORDER BY id DESC LIMIT 1",
                params![&chat_id, &border],
                |r| {
                    Ok(MessageOut {
                        id: r.get(0)?,
                        chat_id: r.get(1)?,
                        sender_id: r.get(2)?,
                        encrypted_data: r.get(3)?,
                    })
                },
            )
            .optional()?;

        let unread = unread_count(conn, user_id, &chat_id)?;
        chats.push(ChatSummary {
            id: chat_id,
            chat_type: kind,
            name,
            other_user_id,
            other_username,
            other_public_key,
            last_message,
            unread_count: unread,
        });
    }
    Ok(chats)
}

pub fn members(conn: &Connection, user_id: &str, chat_id: &str) -> ApiResult<Vec<MemberOut>> {
    assert_member(conn, chat_id, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.public_key FROM chat_members m
         JOIN users u ON u.id = m.user_id WHERE m.chat_id = ?1",
    )?;
    let list = stmt
        .query_map(params![chat_id], |r| {
            Ok(MemberOut {
                user_id: r.get(0)?,
                username: r.get(1)?,
                public_key: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(list)
}

// --- Expiry sweep ---

pub fn delete_expired_users(conn: &Connection) -> ApiResult<usize> {
    let now = Utc::now().to_rfc3339();
    let n = conn.execute("DELETE FROM users WHERE remove_date < ?1", params![now])?;
    Ok(n)
}

/// Personal chats need two members; groups need at least one.
pub fn delete_orphan_chats(conn: &Connection) -> ApiResult<usize> {
    let personal = conn.execute(
        "DELETE FROM chats WHERE chat_type = 'personal'
         AND (SELECT COUNT(*) FROM chat_members WHERE chat_id = chats.id) < 2",
        [],
    )?;
    let groups = conn.execute(
        "DELETE FROM chats WHERE chat_type = 'group'
         AND (SELECT COUNT(*) FROM chat_members WHERE chat_id = chats.id) = 0",
        [],
    )?;
    Ok(personal + groups)
}
