use chrono::Duration;
use rand::Rng;
use rocket::serde::json::Json;
use rocket::{State, post};
use std::sync::Arc;

use crate::chat::{self, LeaveOutcome};
use crate::db::Db;
use crate::error::ApiError;
use crate::fabric::Fabric;
use crate::models::*;
use crate::protocol;
use crate::sessions::SessionRegistry;

use super::AuthSession;

/// Update the encrypted vault and/or the removal horizon. The stored
/// horizon gets up to a day of random jitter so operators cannot infer
/// exact activity times from it.
#[post("/api/signed/account/update", format = "json", data = "<body>")]
pub fn account_update(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<AccountUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    {
        let conn = db.conn();
        if let Some(vault) = &body.vault {
            validate_vault(vault)?;
            chat::set_vault(&conn, &auth.user_id, vault)?;
        }
        if let Some(remove_date) = &body.remove_date {
            let parsed = parse_remove_date(remove_date)?;
            let jitter = rand::thread_rng().gen_range(0..=86400);
            let stored = parsed + Duration::seconds(jitter);
            chat::set_remove_date(&conn, &auth.user_id, &stored.to_rfc3339())?;
        }
    }
    fabric.send_to_user_except(
        &auth.user_id,
        &auth.session_id,
        &protocol::signed_account_updated(),
    );
    Ok(Json(serde_json::json!({ "updated": true })))
}

#[post("/api/signed/account/hidden-mode", format = "json", data = "<body>")]
pub fn hidden_mode(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<FlagRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    {
        let conn = db.conn();
        chat::set_hidden_mode(&conn, &auth.user_id, body.enabled)?;
    }
    fabric.send_to_user_except(
        &auth.user_id,
        &auth.session_id,
        &protocol::signed_account_updated(),
    );
    Ok(Json(serde_json::json!({ "enabled": body.enabled })))
}

#[post("/api/signed/account/introvert-mode", format = "json", data = "<body>")]
pub fn introvert_mode(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<FlagRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    {
        let conn = db.conn();
        chat::set_introvert_mode(&conn, &auth.user_id, body.enabled)?;
    }
    fabric.send_to_user_except(
        &auth.user_id,
        &auth.session_id,
        &protocol::signed_account_updated(),
    );
    Ok(Json(serde_json::json!({ "enabled": body.enabled })))
}

/// Delete the account: leave every chat with the usual border updates and
/// fan-outs, drop the user row, and log out every device.
#[post("/api/signed/account/delete")]
pub fn account_delete(
    auth: AuthSession,
    db: &State<Db>,
    registry: &State<Arc<SessionRegistry>>,
    fabric: &State<Arc<Fabric>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chats = {
        let conn = db.conn();
        chat::chat_ids_for_user(&conn, &auth.user_id)?
    };
    for chat_id in chats {
        let outcome = {
            let mut conn = db.conn();
            chat::leave_chat(&mut conn, &auth.user_id, &chat_id)
        };
        let Ok(outcome) = outcome else { continue };
        match outcome {
            LeaveOutcome::PersonalDeleted { member_ids } => {
                let deleted = protocol::signed_chat_deleted(&chat_id);
                for member in member_ids.iter().filter(|m| m.as_str() != auth.user_id) {
                    fabric.send_reliable(member, &deleted);
                }
            }
            LeaveOutcome::LeftGroup { remaining, authored, .. } => {
                let changed = protocol::signed_chats_changed();
                let dropped = (!authored.is_empty())
                    .then(|| protocol::signed_messages_deleted(&chat_id, &authored));
                for member in remaining {
                    if let Some(dropped) = &dropped {
                        fabric.send_to_user(&member, dropped);
                    }
                    fabric.send_reliable(&member, &changed);
                }
            }
        }
    }

    {
        let conn = db.conn();
        chat::delete_user(&conn, &auth.user_id)?;
    }
    for session in registry.revoke_user(&auth.user_id) {
        fabric.force_logout(&auth.user_id, &session.session_id, false);
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
