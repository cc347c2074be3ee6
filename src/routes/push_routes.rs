use rocket::serde::json::Json;
use rocket::{State, get, post};

use crate::config::Config;
use crate::db::Db;
use crate::error::ApiError;
use crate::models::*;
use crate::push;

use super::AuthSession;

/// Store (or refresh) a browser push subscription. 404 when push is not
/// configured, so clients can feature-detect.
#[post("/api/signed/push/subscribe", format = "json", data = "<body>")]
pub fn push_subscribe(
    auth: AuthSession,
    db: &State<Db>,
    config: &State<Config>,
    body: Json<PushSubscribeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !config.push_enabled() {
        return Err(ApiError::NotFound);
    }
    if body.endpoint.trim().is_empty() {
        return Err(ApiError::Validation("endpoint required".to_string()));
    }
    let conn = db.conn();
    push::subscribe(
        &conn,
        &auth.user_id,
        body.endpoint.trim(),
        &body.keys.p256dh,
        &body.keys.auth,
    )?;
    Ok(Json(serde_json::json!({ "subscribed": true })))
}

#[post("/api/signed/push/disable", format = "json", data = "<body>")]
pub fn push_disable(
    auth: AuthSession,
    db: &State<Db>,
    body: Json<PushDisableRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    push::disable(&conn, &auth.user_id, body.endpoint.trim())?;
    Ok(Json(serde_json::json!({ "disabled": true })))
}

#[get("/api/signed/push/vapid-public-key")]
pub fn vapid_public_key(
    _auth: AuthSession,
    config: &State<Config>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match &config.vapid_public_key {
        Some(key) if config.push_enabled() => {
            Ok(Json(serde_json::json!({ "publicKey": key })))
        }
        _ => Err(ApiError::NotFound),
    }
}
