use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rocket::serde::json::Json;
use rocket::{State, post};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::chat;
use crate::db::Db;
use crate::error::ApiError;
use crate::fabric::Fabric;
use crate::keys;
use crate::models::*;
use crate::sessions::{ChallengeStore, SessionRegistry, new_nonce};

#[post("/api/auth/register", format = "json", data = "<body>")]
pub fn register(
    db: &State<Db>,
    registry: &State<Arc<SessionRegistry>>,
    body: Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let username = body.username.trim();
    validate_name(username, "username")?;
    let canonical = keys::canonicalize_jwk(&body.public_key)?;
    validate_vault(&body.vault)?;
    let remove_date = parse_remove_date(&body.remove_date)?;

    let user = {
        let conn = db.conn();
        chat::create_user(
            &conn,
            username,
            &canonical,
            &body.vault,
            &remove_date.to_rfc3339(),
        )?
    };

    let (session, _) = registry.issue(&user.id);
    Ok(Json(AuthResponse {
        token: session.token,
        expires_at: session.expires_at.to_rfc3339(),
        user_id: user.id,
        username: user.username,
        hidden_mode: false,
        introvert_mode: false,
        vault: None,
    }))
}

/// Login step 1: prove you hold the private key. The nonce travels only
/// encrypted to the registered public key; the server never sees a shared
/// secret.
#[post("/api/auth/login-init", format = "json", data = "<body>")]
pub fn login_init(
    db: &State<Db>,
    challenges: &State<ChallengeStore>,
    body: Json<LoginInitRequest>,
) -> Result<Json<LoginInitResponse>, ApiError> {
    let username = body.username.trim();
    // 404 for an unknown name lets the client offer account recreation;
    // a known name with the wrong key is a plain 401.
    let user = {
        let conn = db.conn();
        chat::find_user_by_username(&conn, username)?
    }
    .ok_or(ApiError::NotFound)?;

    let presented = keys::canonicalize_jwk(&body.public_key)?;
    if presented != user.public_key {
        return Err(ApiError::Unauthorized);
    }

    let nonce = new_nonce();
    let encrypted_challenge_b64 = keys::encrypt_challenge(&user.public_key, &nonce)?;
    let challenge_id = challenges.insert(&user.id, nonce);
    Ok(Json(LoginInitResponse {
        challenge_id,
        encrypted_challenge_b64,
    }))
}

/// Login step 2: return the decrypted nonce. Challenges are one-shot and
/// compared in constant time.
#[post("/api/auth/login-final", format = "json", data = "<body>")]
pub fn login_final(
    db: &State<Db>,
    registry: &State<Arc<SessionRegistry>>,
    challenges: &State<ChallengeStore>,
    fabric: &State<Arc<Fabric>>,
    body: Json<LoginFinalRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let challenge = challenges
        .take(&body.challenge_id)
        .ok_or(ApiError::Unauthorized)?;

    let response = STANDARD
        .decode(body.response.trim())
        .or_else(|_| URL_SAFE_NO_PAD.decode(body.response.trim().trim_end_matches('=')))
        .map_err(|_| ApiError::Unauthorized)?;
    if response.ct_eq(&challenge.nonce).unwrap_u8() != 1 {
        return Err(ApiError::Unauthorized);
    }

    let user = {
        let conn = db.conn();
        chat::find_user(&conn, &challenge.user_id)?
    }
    .ok_or(ApiError::Unauthorized)?;

    let (session, evicted) = registry.issue(&user.id);
    for old in evicted {
        fabric.force_logout(&user.id, &old.session_id, false);
    }

    Ok(Json(AuthResponse {
        token: session.token,
        expires_at: session.expires_at.to_rfc3339(),
        user_id: user.id,
        username: user.username,
        hidden_mode: user.hidden_mode,
        introvert_mode: user.introvert_mode,
        vault: Some(user.vault),
    }))
}

#[post("/api/auth/check-username", format = "json", data = "<body>")]
pub fn check_username(
    db: &State<Db>,
    body: Json<CheckUsernameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = db.conn();
    let exists = chat::username_exists(&conn, body.username.trim())?;
    Ok(Json(serde_json::json!({ "exists": exists })))
}
