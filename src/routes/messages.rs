use rocket::serde::json::Json;
use rocket::{State, get, post};
use std::sync::Arc;

use crate::chat;
use crate::config::Config;
use crate::db::Db;
use crate::error::ApiError;
use crate::fabric::Fabric;
use crate::models::*;
use crate::protocol;
use crate::push;

use super::AuthSession;

/// Newest-first history page, bounded by the member's visibility border.
/// Clients reverse for display.
#[get("/api/signed/messages?<chatId>&<limit>&<before>")]
#[allow(non_snake_case)]
pub fn get_messages(
    auth: AuthSession,
    db: &State<Db>,
    chatId: &str,
    limit: Option<i64>,
    before: Option<&str>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let messages = chat::history(&conn, &auth.user_id, chatId, limit.unwrap_or(50), before)?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

#[get("/api/signed/messages/unread?<chatId>&<limit>")]
#[allow(non_snake_case)]
pub fn get_unread(
    auth: AuthSession,
    db: &State<Db>,
    chatId: &str,
    limit: Option<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let ids = chat::unread_ids(&conn, &auth.user_id, chatId, limit.unwrap_or(500))?;
    Ok(Json(serde_json::json!({ "messageIds": ids })))
}

/// Insert the ciphertext, ledger the unreads, then fan out to every live
/// member session. Members without a socket fall through to the push
/// outbox when it is enabled.
#[post("/api/signed/messages/send", format = "json", data = "<body>")]
pub fn send_message(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    config: &State<Config>,
    body: Json<SendMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = {
        let mut conn = db.conn();
        chat::send_message(&mut conn, &auth.user_id, &body.chat_id, &body.encrypted_data)?
    };

    let message = MessageOut {
        id: outcome.message_id.clone(),
        chat_id: body.chat_id.clone(),
        sender_id: auth.user_id.clone(),
        encrypted_data: body.encrypted_data.clone(),
    };
    let event = protocol::signed_message(&message);
    for member in &outcome.member_ids {
        if fabric.online(member) {
            fabric.send_to_user(member, &event);
        } else if member != &auth.user_id && config.push_enabled() {
            let conn = db.conn();
            let _ = push::enqueue(&conn, member, &outcome.message_id, &body.chat_id);
        }
    }

    Ok(Json(serde_json::json!({ "messageId": outcome.message_id })))
}

#[post("/api/signed/messages/update", format = "json", data = "<body>")]
pub fn update_message(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<UpdateMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let members = {
        let conn = db.conn();
        chat::update_message(
            &conn,
            &auth.user_id,
            &body.chat_id,
            &body.message_id,
            &body.encrypted_data,
        )?
    };
    let event =
        protocol::signed_message_updated(&body.chat_id, &body.message_id, &body.encrypted_data);
    for member in members {
        fabric.send_to_user(&member, &event);
    }
    Ok(Json(serde_json::json!({ "updated": true })))
}

#[post("/api/signed/messages/delete", format = "json", data = "<body>")]
pub fn delete_message(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<DeleteMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let members = {
        let mut conn = db.conn();
        chat::delete_message(&mut conn, &auth.user_id, &body.chat_id, &body.message_id)?
    };
    let event = protocol::signed_message_deleted(&body.chat_id, &body.message_id);
    for member in members {
        fabric.send_to_user(&member, &event);
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Mark a whole chat read, or just the named messages. The reply carries
/// the remaining unread count for the chat.
#[post("/api/signed/messages/mark-read", format = "json", data = "<body>")]
pub fn mark_read(
    auth: AuthSession,
    db: &State<Db>,
    body: Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let remaining = match &body.message_ids {
        None => {
            chat::mark_chat_read(&conn, &auth.user_id, &body.chat_id)?;
            0
        }
        Some(ids) => chat::mark_messages_read(&conn, &auth.user_id, &body.chat_id, ids)?,
    };
    Ok(Json(serde_json::json!({ "remaining": remaining })))
}
