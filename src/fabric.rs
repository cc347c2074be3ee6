//! Realtime fabric: the registry of live sockets per (user, session), event
//! fan-out, ack-based reliable delivery, heartbeat supervision, and the
//! per-user receipt cache for client idempotency.
//!
//! One structure owns everything per user (sockets, call runtime, receipts)
//! behind a single lock. Sends never block: each socket is an unbounded
//! mpsc sender drained by the connection's write task.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Cached receipts per user.
const RECEIPT_CACHE_CAP: usize = 2000;

/// What the connection's write task should put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketWrite {
    Frame(String),
    Ping,
    Close,
}

pub struct SocketHandle {
    tx: mpsc::UnboundedSender<SocketWrite>,
    /// Cleared on each heartbeat tick; set again by the client's pong (or
    /// any inbound frame). Two silent ticks terminate the socket.
    alive: bool,
    /// Reliable frames awaiting an ack, keyed by server msgId.
    pending: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingJoin {
    pub room_id: String,
    pub session_id: String,
}

pub struct UserRuntime {
    pub username: String,
    pub last_activity: DateTime<Utc>,
    pub room_id: Option<String>,
    pub controlling_session: Option<String>,
    pub pending_join: Option<PendingJoin>,
    receipts: ReceiptCache,
}

struct UserEntry {
    sockets: HashMap<String, SocketHandle>,
    runtime: UserRuntime,
}

/// Everything the disconnect path needs to unwind a socket's call state.
#[derive(Debug)]
pub struct DetachInfo {
    pub room_id: Option<String>,
    pub was_controlling: bool,
    pub pending_join: Option<PendingJoin>,
    pub last_socket: bool,
}

pub struct Fabric {
    users: Mutex<HashMap<String, UserEntry>>,
    next_msg_id: AtomicU64,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Fabric {
            users: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserEntry>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind a socket to (user, session) and greet it. Installs the user's
    /// runtime on first connection.
    pub fn attach(
        &self,
        user_id: &str,
        username: &str,
        session_id: &str,
        tx: mpsc::UnboundedSender<SocketWrite>,
    ) {
        let hello = crate::protocol::signed_hello(user_id);
        let mut users = self.lock();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntry {
                sockets: HashMap::new(),
                runtime: UserRuntime {
                    username: username.to_string(),
                    last_activity: Utc::now(),
                    room_id: None,
                    controlling_session: None,
                    pending_join: None,
                    receipts: ReceiptCache::new(RECEIPT_CACHE_CAP),
                },
            });
        entry.runtime.username = username.to_string();
        let handle = SocketHandle {
            tx,
            alive: true,
            pending: HashMap::new(),
        };
        let _ = handle.tx.send(SocketWrite::Frame(hello.to_string()));
        entry.sockets.insert(session_id.to_string(), handle);
    }

    /// Unbind a socket. Returns what the socket was doing so the caller can
    /// unwind call state; `None` if it was already gone.
    pub fn detach(&self, user_id: &str, session_id: &str) -> Option<DetachInfo> {
        let mut users = self.lock();
        let entry = users.get_mut(user_id)?;
        entry.sockets.remove(session_id)?;
        let was_controlling = entry.runtime.controlling_session.as_deref() == Some(session_id);
        let pending_join = entry
            .runtime
            .pending_join
            .as_ref()
            .filter(|p| p.session_id == session_id)
            .cloned();
        let last_socket = entry.sockets.is_empty();
        let info = DetachInfo {
            room_id: entry.runtime.room_id.clone(),
            was_controlling,
            pending_join,
            last_socket,
        };
        if last_socket {
            users.remove(user_id);
        }
        Some(info)
    }

    pub fn online(&self, user_id: &str) -> bool {
        let users = self.lock();
        users
            .get(user_id)
            .map(|e| !e.sockets.is_empty())
            .unwrap_or(false)
    }

    pub fn busy(&self, user_id: &str) -> bool {
        let users = self.lock();
        users
            .get(user_id)
            .map(|e| e.runtime.room_id.is_some())
            .unwrap_or(false)
    }

    pub fn username_of(&self, user_id: &str) -> Option<String> {
        let users = self.lock();
        users.get(user_id).map(|e| e.runtime.username.clone())
    }

    pub fn with_runtime<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut UserRuntime) -> R,
    ) -> Option<R> {
        let mut users = self.lock();
        users.get_mut(user_id).map(|e| f(&mut e.runtime))
    }

    pub fn mark_active(&self, user_id: &str, session_id: &str) {
        let mut users = self.lock();
        if let Some(entry) = users.get_mut(user_id) {
            entry.runtime.last_activity = Utc::now();
            if let Some(socket) = entry.sockets.get_mut(session_id) {
                socket.alive = true;
            }
        }
    }

    // --- Best-effort sends ---

    pub fn send_to_user(&self, user_id: &str, event: &Value) {
        let frame = event.to_string();
        let users = self.lock();
        if let Some(entry) = users.get(user_id) {
            for socket in entry.sockets.values() {
                let _ = socket.tx.send(SocketWrite::Frame(frame.clone()));
            }
        }
    }

    /// Send an already-serialized frame (cached receipts replay
    /// byte-identical).
    pub fn send_raw_to_session(&self, user_id: &str, session_id: &str, frame: &str) {
        let users = self.lock();
        if let Some(socket) = users
            .get(user_id)
            .and_then(|e| e.sockets.get(session_id))
        {
            let _ = socket.tx.send(SocketWrite::Frame(frame.to_string()));
        }
    }

    pub fn send_to_session(&self, user_id: &str, session_id: &str, event: &Value) {
        let users = self.lock();
        if let Some(socket) = users
            .get(user_id)
            .and_then(|e| e.sockets.get(session_id))
        {
            let _ = socket.tx.send(SocketWrite::Frame(event.to_string()));
        }
    }

    pub fn send_to_user_except(&self, user_id: &str, except_session: &str, event: &Value) {
        let frame = event.to_string();
        let users = self.lock();
        if let Some(entry) = users.get(user_id) {
            for (session_id, socket) in &entry.sockets {
                if session_id != except_session {
                    let _ = socket.tx.send(SocketWrite::Frame(frame.clone()));
                }
            }
        }
    }

    /// Deliver to the user's controlling call session when known, otherwise
    /// to every session.
    pub fn send_to_controlling(&self, user_id: &str, event: &Value) {
        let frame = event.to_string();
        let users = self.lock();
        if let Some(entry) = users.get(user_id) {
            if let Some(controlling) = entry.runtime.controlling_session.as_deref()
                && let Some(socket) = entry.sockets.get(controlling)
            {
                let _ = socket.tx.send(SocketWrite::Frame(frame));
                return;
            }
            for socket in entry.sockets.values() {
                let _ = socket.tx.send(SocketWrite::Frame(frame.clone()));
            }
        }
    }

    // --- Reliable delivery ---

    fn assign_msg_id(&self) -> String {
        format!("m{}", self.next_msg_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Reliable fan-out to every session of the user. Each socket gets its
    /// own msgId; the frame is resent on every resend tick until acked.
    pub fn send_reliable(&self, user_id: &str, event: &Value) {
        let mut users = self.lock();
        if let Some(entry) = users.get_mut(user_id) {
            let sessions: Vec<String> = entry.sockets.keys().cloned().collect();
            for session_id in sessions {
                let msg_id = self.assign_msg_id();
                let mut frame = event.clone();
                frame["msgId"] = Value::String(msg_id.clone());
                let serialized = frame.to_string();
                if let Some(socket) = entry.sockets.get_mut(&session_id) {
                    let _ = socket.tx.send(SocketWrite::Frame(serialized.clone()));
                    socket.pending.insert(msg_id, serialized);
                }
            }
        }
    }

    pub fn send_reliable_to_session(&self, user_id: &str, session_id: &str, event: &Value) {
        let msg_id = self.assign_msg_id();
        let mut frame = event.clone();
        frame["msgId"] = Value::String(msg_id.clone());
        let serialized = frame.to_string();
        let mut users = self.lock();
        if let Some(socket) = users
            .get_mut(user_id)
            .and_then(|e| e.sockets.get_mut(session_id))
        {
            let _ = socket.tx.send(SocketWrite::Frame(serialized.clone()));
            socket.pending.insert(msg_id, serialized);
        }
    }

    pub fn ack(&self, user_id: &str, session_id: &str, msg_id: &str) {
        let mut users = self.lock();
        if let Some(socket) = users
            .get_mut(user_id)
            .and_then(|e| e.sockets.get_mut(session_id))
        {
            socket.pending.remove(msg_id);
        }
    }

    /// One pass of the central retransmit timer: re-send every unacked
    /// reliable frame. Pending maps die with their socket, which bounds
    /// the retries to the socket lifetime.
    pub fn resend_tick(&self) {
        let users = self.lock();
        for entry in users.values() {
            for socket in entry.sockets.values() {
                for frame in socket.pending.values() {
                    let _ = socket.tx.send(SocketWrite::Frame(frame.clone()));
                }
            }
        }
    }

    // --- Heartbeat ---

    /// One pass of the heartbeat timer. Sockets that did not answer the
    /// previous ping get a close; everyone else gets a fresh ping. The
    /// actual detach happens on the connection task's exit path.
    pub fn heartbeat_tick(&self) {
        let mut users = self.lock();
        for entry in users.values_mut() {
            for socket in entry.sockets.values_mut() {
                if socket.alive {
                    socket.alive = false;
                    let _ = socket.tx.send(SocketWrite::Ping);
                } else {
                    let _ = socket.tx.send(SocketWrite::Close);
                }
            }
        }
    }

    /// Every live (user, session) pair, for liveness cross-checks.
    pub fn socket_pairs(&self) -> Vec<(String, String)> {
        let users = self.lock();
        users
            .iter()
            .flat_map(|(user, entry)| {
                entry
                    .sockets
                    .keys()
                    .map(|s| (user.clone(), s.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Ask a single socket to close (used when its backing session expires).
    pub fn close_socket(&self, user_id: &str, session_id: &str) {
        let users = self.lock();
        if let Some(socket) = users.get(user_id).and_then(|e| e.sockets.get(session_id)) {
            let _ = socket.tx.send(SocketWrite::Close);
        }
    }

    /// Reliable force-logout followed by a short-fused close, giving the
    /// client a moment to ack and clean up.
    pub fn force_logout(&self, user_id: &str, session_id: &str, wipe_local_keys: bool) {
        self.send_reliable_to_session(
            user_id,
            session_id,
            &crate::protocol::signed_force_logout(wipe_local_keys),
        );
        let tx = {
            let users = self.lock();
            users
                .get(user_id)
                .and_then(|e| e.sockets.get(session_id))
                .map(|s| s.tx.clone())
        };
        if let Some(tx) = tx {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                let _ = tx.send(SocketWrite::Close);
            });
        }
    }

    // --- Receipt cache ---

    pub fn cached_receipt(&self, user_id: &str, c_msg_id: &str) -> Option<String> {
        let mut users = self.lock();
        users
            .get_mut(user_id)
            .and_then(|e| e.runtime.receipts.get(c_msg_id).cloned())
    }

    pub fn store_receipt(&self, user_id: &str, c_msg_id: &str, frame: String) {
        let mut users = self.lock();
        if let Some(entry) = users.get_mut(user_id) {
            entry.runtime.receipts.insert(c_msg_id.to_string(), frame);
        }
    }
}

/// Insertion-ordered cache with a hard cap; oldest entries fall out first.
struct ReceiptCache {
    cap: usize,
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

impl ReceiptCache {
    fn new(cap: usize) -> Self {
        ReceiptCache {
            cap,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    fn insert(&mut self, key: String, value: String) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.map.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            } else {
                break;
            }
        }
    }
}
