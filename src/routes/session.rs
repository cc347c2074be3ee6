use rocket::serde::json::Json;
use rocket::{State, post};
use std::sync::Arc;

use crate::error::ApiError;
use crate::fabric::Fabric;
use crate::sessions::SessionRegistry;

use super::AuthSession;

/// Rotate the bearer token in place: same session id, fresh expiry.
#[post("/api/signed/session/refresh")]
pub fn session_refresh(
    auth: AuthSession,
    registry: &State<Arc<SessionRegistry>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rotated = registry.rotate(&auth.token).ok_or(ApiError::Unauthorized)?;
    Ok(Json(serde_json::json!({
        "token": rotated.token,
        "expiresAt": rotated.expires_at.to_rfc3339(),
    })))
}

#[post("/api/signed/session/logout-other-devices")]
pub fn logout_other_devices(
    auth: AuthSession,
    registry: &State<Arc<SessionRegistry>>,
    fabric: &State<Arc<Fabric>>,
) -> Json<serde_json::Value> {
    Json(logout_others(&auth, registry, fabric, false))
}

/// Variant that additionally tells evicted clients to wipe their locally
/// stored encrypted key entries.
#[post("/api/signed/session/logout-and-remove-key-other-devices")]
pub fn logout_wipe_other_devices(
    auth: AuthSession,
    registry: &State<Arc<SessionRegistry>>,
    fabric: &State<Arc<Fabric>>,
) -> Json<serde_json::Value> {
    Json(logout_others(&auth, registry, fabric, true))
}

fn logout_others(
    auth: &AuthSession,
    registry: &SessionRegistry,
    fabric: &Fabric,
    wipe_local_keys: bool,
) -> serde_json::Value {
    let revoked = registry.revoke_all_except(&auth.user_id, &auth.session_id);
    for session in &revoked {
        fabric.force_logout(&auth.user_id, &session.session_id, wipe_local_keys);
    }
    serde_json::json!({ "loggedOut": revoked.len() })
}
