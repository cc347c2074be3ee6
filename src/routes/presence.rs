use rocket::serde::json::Json;
use rocket::{State, post};
use std::sync::Arc;

use crate::chat;
use crate::db::Db;
use crate::error::ApiError;
use crate::fabric::Fabric;
use crate::models::*;

use super::AuthSession;

/// Presence is visible only between mutual personal-chat peers. Queried ids
/// outside that relationship are silently dropped, and hidden users never
/// appear, so the endpoint leaks nothing about strangers.
#[post("/api/signed/presence", format = "json", data = "<body>")]
pub fn presence(
    auth: AuthSession,
    db: &State<Db>,
    fabric: &State<Arc<Fabric>>,
    body: Json<PresenceRequest>,
) -> Result<Json<PresenceResponse>, ApiError> {
    if body.user_ids.len() > MAX_PRESENCE_IDS {
        return Err(ApiError::Validation(format!(
            "at most {MAX_PRESENCE_IDS} ids per query"
        )));
    }

    let mut online = Vec::new();
    let mut busy = Vec::new();
    {
        let conn = db.conn();
        for user_id in &body.user_ids {
            let Some(user) = chat::find_user(&conn, user_id)? else {
                continue;
            };
            if user.hidden_mode {
                continue;
            }
            if !chat::has_personal_chat(&conn, &auth.user_id, user_id)? {
                continue;
            }
            if fabric.online(user_id) {
                online.push(user_id.clone());
            }
            if fabric.busy(user_id) {
                busy.push(user_id.clone());
            }
        }
    }

    Ok(Json(PresenceResponse {
        online_user_ids: online,
        busy_user_ids: busy,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
