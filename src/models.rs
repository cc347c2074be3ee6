use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Maximum ciphertext size for a single message (bytes of UTF-8).
pub const MAX_CIPHERTEXT_BYTES: usize = 50 * 1024;
/// Maximum size of the encrypted settings vault.
pub const MAX_VAULT_BYTES: usize = 100 * 1024;
/// Maximum number of ids in a presence query.
pub const MAX_PRESENCE_IDS: usize = 25;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub public_key: String,
    pub vault: String,
    pub remove_date: String,
    pub hidden_mode: bool,
    pub introvert_mode: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageOut {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub encrypted_data: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MemberOut {
    pub user_id: String,
    pub username: String,
    pub public_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageOut>,
    pub unread_count: i64,
}

// --- Auth ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub public_key: String,
    pub remove_date: String,
    #[serde(default)]
    pub vault: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInitRequest {
    pub username: String,
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginFinalRequest {
    pub challenge_id: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckUsernameRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: String,
    pub user_id: String,
    pub username: String,
    pub hidden_mode: bool,
    pub introvert_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInitResponse {
    pub challenge_id: String,
    pub encrypted_challenge_b64: String,
}

// --- Chats & messages ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonalChatRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub chat_id: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameGroupRequest {
    pub chat_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIdRequest {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub encrypted_data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    pub chat_id: String,
    pub message_id: String,
    pub encrypted_data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    pub chat_id: String,
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub chat_id: String,
    /// Absent means "mark the whole chat read".
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
}

// --- Presence ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub online_user_ids: Vec<String>,
    pub busy_user_ids: Vec<String>,
    pub server_version: String,
}

// --- Account ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdateRequest {
    #[serde(default)]
    pub vault: Option<String>,
    #[serde(default)]
    pub remove_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub enabled: bool,
}

// --- Push ---

#[derive(Debug, Deserialize)]
pub struct PushSubscribeRequest {
    pub endpoint: String,
    pub keys: PushSubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
pub struct PushDisableRequest {
    pub endpoint: String,
}

// --- Validation helpers ---

/// Usernames and group names: 3–64 code points, no control characters, no
/// angle brackets.
pub fn validate_name(name: &str, what: &str) -> Result<(), ApiError> {
    let count = name.chars().count();
    if !(3..=64).contains(&count) {
        return Err(ApiError::Validation(format!("{what} must be 3-64 characters")));
    }
    if name.chars().any(|c| c.is_control() || c == '<' || c == '>') {
        return Err(ApiError::Validation(format!("{what} contains forbidden characters")));
    }
    Ok(())
}

pub fn validate_vault(vault: &str) -> Result<(), ApiError> {
    if vault.len() > MAX_VAULT_BYTES {
        return Err(ApiError::PayloadTooLarge("vault too large".to_string()));
    }
    Ok(())
}

/// Remove dates arrive as RFC 3339 strings and are stored verbatim (UTC).
pub fn parse_remove_date(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, ApiError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&chrono::Utc))
        .map_err(|_| ApiError::Validation("invalid remove date".to_string()))
}
