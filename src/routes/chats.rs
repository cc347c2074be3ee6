use rocket::serde::json::Json;
use rocket::{State, get, post};
use std::sync::Arc;

use crate::chat::{self, LeaveOutcome};
use crate::db::Db;
use crate::error::ApiError;
use crate::fabric::Fabric;
use crate::models::*;
use crate::protocol;

use super::AuthSession;

#[get("/api/signed/chats")]
pub fn chats_list(
    auth: AuthSession,
    db: &State<Db>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let chats = chat::chats_list(&conn, &auth.user_id)?;
    Ok(Json(serde_json::json!({ "chats": chats })))
}

#[post("/api/signed/chats/create-personal", format = "json", data = "<body>")]
pub fn create_personal(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<CreatePersonalChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = {
        let mut conn = db.conn();
        chat::create_personal_chat(&mut conn, &auth.user_id, body.username.trim())?
    };
    if outcome.created {
        let changed = protocol::signed_chats_changed();
        fabric.send_reliable(&auth.user_id, &changed);
        fabric.send_reliable(&outcome.other.id, &changed);
    }
    Ok(Json(serde_json::json!({
        "chatId": outcome.chat_id,
        "otherUserId": outcome.other.id,
        "otherUsername": outcome.other.username,
        "otherPublicKey": outcome.other.public_key,
        "created": outcome.created,
    })))
}

#[post("/api/signed/chats/create-group", format = "json", data = "<body>")]
pub fn create_group(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<CreateGroupRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat_id = {
        let mut conn = db.conn();
        chat::create_group_chat(&mut conn, &auth.user_id, &body.name)?
    };
    fabric.send_reliable(&auth.user_id, &protocol::signed_chats_changed());
    Ok(Json(serde_json::json!({ "chatId": chat_id })))
}

#[post("/api/signed/chats/add-member", format = "json", data = "<body>")]
pub fn add_member(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<AddMemberRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = {
        let mut conn = db.conn();
        chat::add_group_member(&mut conn, &auth.user_id, &body.chat_id, body.username.trim())?
    };
    if outcome.added {
        let changed = protocol::signed_chats_changed();
        fabric.send_reliable(&outcome.user.id, &changed);
        fabric.send_reliable(&auth.user_id, &changed);
    }
    Ok(Json(serde_json::json!({
        "chatId": body.chat_id,
        "userId": outcome.user.id,
        "added": outcome.added,
    })))
}

#[post("/api/signed/chats/rename-group", format = "json", data = "<body>")]
pub fn rename_group(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<RenameGroupRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let members = {
        let conn = db.conn();
        chat::rename_group(&conn, &auth.user_id, &body.chat_id, &body.name)?
    };
    let changed = protocol::signed_chats_changed();
    for member in members {
        fabric.send_reliable(&member, &changed);
    }
    Ok(Json(serde_json::json!({
        "chatId": body.chat_id,
        "name": body.name.trim(),
    })))
}

/// Delete a personal chat, or leave a group. Remaining group members lose
/// sight of the history up to the leave point and are told which message
/// ids to drop from view.
#[post("/api/signed/chats/delete", format = "json", data = "<body>")]
pub fn delete_chat(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<ChatIdRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = {
        let mut conn = db.conn();
        chat::leave_chat(&mut conn, &auth.user_id, &body.chat_id)?
    };
    match outcome {
        LeaveOutcome::PersonalDeleted { member_ids } => {
            let deleted = protocol::signed_chat_deleted(&body.chat_id);
            for member in member_ids {
                fabric.send_reliable(&member, &deleted);
            }
        }
        LeaveOutcome::LeftGroup { remaining, authored, .. } => {
            let changed = protocol::signed_chats_changed();
            let dropped = (!authored.is_empty())
                .then(|| protocol::signed_messages_deleted(&body.chat_id, &authored));
            for member in remaining {
                if let Some(dropped) = &dropped {
                    fabric.send_to_user(&member, dropped);
                }
                fabric.send_reliable(&member, &changed);
            }
        }
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[get("/api/signed/chats/members?<chatId>")]
#[allow(non_snake_case)]
pub fn chat_members(
    auth: AuthSession,
    db: &State<Db>,
    chatId: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let members = chat::members(&conn, &auth.user_id, chatId)?;
    Ok(Json(serde_json::json!({ "members": members })))
}
