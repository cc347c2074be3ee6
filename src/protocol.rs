//! WebSocket wire protocol: inbound frames are a tagged union on `type`;
//! outbound frames are built as JSON values so the fabric can inject
//! delivery metadata (`msgId`) before serializing.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::models::MessageOut;

/// Inbound client frames. `cMsgId` is extracted separately by the dispatcher
/// before this union is decoded, so duplicates can be answered from the
/// receipt cache without touching the command itself.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Ack { msg_id: String },
    Ping,
    CallStart { to: String },
    CallAccept,
    CallReject,
    CallHangup,
    CallJoinRequest { to: String },
    CallJoinCancel,
    CallJoinAccept,
    CallJoinReject,
    Signal { to: String, payload: Value },
}

// --- Outbound builders ---

pub fn signed_hello(user_id: &str) -> Value {
    json!({"type": "signedHello", "userId": user_id})
}

pub fn pong() -> Value {
    json!({"type": "pong"})
}

/// Receipts echo the client's `cMsgId`; the synthesized `msgId` makes the
/// frame self-identifying without entering the reliable pipeline.
pub fn receipt(c_msg_id: &str, ok: bool, code: Option<&str>) -> Value {
    let mut v = json!({
        "type": "receipt",
        "cMsgId": c_msg_id,
        "msgId": format!("receipt:{c_msg_id}"),
        "ok": ok,
    });
    if let Some(code) = code {
        v["code"] = json!(code);
    }
    v
}

pub fn signed_message(msg: &MessageOut) -> Value {
    json!({
        "type": "signedMessage",
        "chatId": msg.chat_id,
        "messageId": msg.id,
        "senderId": msg.sender_id,
        "encryptedData": msg.encrypted_data,
    })
}

pub fn signed_message_updated(chat_id: &str, message_id: &str, encrypted_data: &str) -> Value {
    json!({
        "type": "signedMessageUpdated",
        "chatId": chat_id,
        "messageId": message_id,
        "encryptedData": encrypted_data,
    })
}

pub fn signed_message_deleted(chat_id: &str, message_id: &str) -> Value {
    json!({"type": "signedMessageDeleted", "chatId": chat_id, "messageId": message_id})
}

pub fn signed_messages_deleted(chat_id: &str, message_ids: &[String]) -> Value {
    json!({"type": "signedMessagesDeleted", "chatId": chat_id, "messageIds": message_ids})
}

pub fn signed_chats_changed() -> Value {
    json!({"type": "signedChatsChanged"})
}

pub fn signed_chat_deleted(chat_id: &str) -> Value {
    json!({"type": "signedChatDeleted", "chatId": chat_id})
}

pub fn signed_account_updated() -> Value {
    json!({"type": "signedAccountUpdated"})
}

pub fn signed_force_logout(wipe_local_keys: bool) -> Value {
    json!({"type": "signedForceLogout", "wipeLocalKeys": wipe_local_keys})
}

pub fn incoming_call(room_id: &str, from_user_id: &str, from_username: &str) -> Value {
    json!({
        "type": "incomingCall",
        "roomId": room_id,
        "fromUserId": from_user_id,
        "fromUsername": from_username,
    })
}

pub fn incoming_call_cancelled(room_id: &str, reason: &str) -> Value {
    json!({"type": "incomingCallCancelled", "roomId": room_id, "reason": reason})
}

pub fn call_rejected(room_id: &str) -> Value {
    json!({"type": "callRejected", "roomId": room_id})
}

pub fn call_ended(room_id: &str, reason: &str) -> Value {
    json!({"type": "callEnded", "roomId": room_id, "reason": reason})
}

pub fn call_start_ok(room_id: &str) -> Value {
    json!({"type": "callStartResult", "ok": true, "roomId": room_id})
}

pub fn call_start_err(reason: &str) -> Value {
    json!({"type": "callStartResult", "ok": false, "reason": reason})
}

pub fn call_join_pending(room_id: &str) -> Value {
    json!({"type": "callJoinPending", "roomId": room_id})
}

pub fn call_join_ok(room_id: &str) -> Value {
    json!({"type": "callJoinResult", "ok": true, "roomId": room_id})
}

pub fn call_join_err(reason: &str) -> Value {
    json!({"type": "callJoinResult", "ok": false, "reason": reason})
}

pub fn join_request(room_id: &str, user_id: &str, username: &str) -> Value {
    json!({
        "type": "joinRequest",
        "roomId": room_id,
        "userId": user_id,
        "username": username,
    })
}

pub fn room_peers(room_id: &str, peers: &[(String, String)]) -> Value {
    let peers: Vec<Value> = peers
        .iter()
        .map(|(id, name)| json!({"userId": id, "username": name}))
        .collect();
    json!({"type": "roomPeers", "roomId": room_id, "peers": peers})
}

pub fn room_peer_joined(room_id: &str, user_id: &str, username: &str) -> Value {
    json!({
        "type": "roomPeerJoined",
        "roomId": room_id,
        "userId": user_id,
        "username": username,
    })
}

pub fn room_peer_left(room_id: &str, user_id: &str) -> Value {
    json!({"type": "roomPeerLeft", "roomId": room_id, "userId": user_id})
}

/// The payload travels verbatim; the engine never looks inside the
/// offer/answer/ICE envelope.
pub fn signal(from: &str, payload: &Value) -> Value {
    json!({"type": "signal", "from": from, "payload": payload})
}
