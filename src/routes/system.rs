use rocket::serde::json::Json;
use rocket::{State, catch, get};

use crate::config::Config;
use crate::turn as turn_credentials;

#[get("/healthz")]
pub fn healthz() -> &'static str {
    "ok"
}

/// ICE server list for call setup: short-lived TURN REST credentials when a
/// secret is configured, STUN fallbacks always.
#[get("/turn")]
pub fn turn(config: &State<Config>) -> Json<serde_json::Value> {
    Json(turn_credentials::ice_servers(config))
}

// --- Catchers: keep error bodies JSON-shaped everywhere ---

#[catch(400)]
pub fn bad_request() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "bad request" }))
}

#[catch(401)]
pub fn unauthorized() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "unauthorized" }))
}

#[catch(403)]
pub fn forbidden() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "forbidden" }))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "not found" }))
}

#[catch(413)]
pub fn payload_too_large() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "payload too large" }))
}

#[catch(422)]
pub fn unprocessable() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "malformed request body" }))
}

#[catch(500)]
pub fn internal_error() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": "internal error" }))
}
