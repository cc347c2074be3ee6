//! Voice-call room engine: room lifecycle, controlling-session arbitration
//! across a user's devices, incoming-call invalidation, and the FIFO join
//! queue with owner approval.
//!
//! Rooms live behind their own lock; the lock order is rooms first, then
//! the fabric's user map. The engine never interprets signaling payloads.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chat;
use crate::db::Db;
use crate::fabric::{DetachInfo, Fabric, PendingJoin};
use crate::protocol;

pub struct Room {
    pub id: String,
    pub members: Vec<String>,
    pub owner: String,
    /// FIFO of users waiting to join. The head, when `active_join` is set,
    /// is the request currently presented to the owner.
    pub queue: VecDeque<String>,
    pub active_join: Option<String>,
}

pub struct CallEngine {
    fabric: Arc<Fabric>,
    rooms: Mutex<HashMap<String, Room>>,
}

impl CallEngine {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        CallEngine {
            fabric,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn room_of(&self, user_id: &str) -> Option<String> {
        self.fabric
            .with_runtime(user_id, |rt| rt.room_id.clone())
            .flatten()
    }

    fn controlling_of(&self, user_id: &str) -> Option<String> {
        self.fabric
            .with_runtime(user_id, |rt| rt.controlling_session.clone())
            .flatten()
    }

    fn name_of(&self, user_id: &str) -> String {
        self.fabric.username_of(user_id).unwrap_or_default()
    }

    // --- Call setup ---

    pub fn start(&self, db: &Db, caller: &str, caller_session: &str, callee: &str) {
        let reply = |event: Value| self.fabric.send_to_session(caller, caller_session, &event);

        if !self.fabric.online(callee) {
            reply(protocol::call_start_err("offline"));
            return;
        }

        // Authorization: a shared chat is required; introverts require a
        // shared personal chat.
        let allowed = {
            let conn = db.conn();
            match chat::find_user(&conn, callee) {
                Ok(Some(user)) if user.introvert_mode => {
                    chat::has_personal_chat(&conn, caller, callee).unwrap_or(false)
                }
                Ok(Some(_)) => chat::has_any_chat(&conn, caller, callee).unwrap_or(false),
                _ => false,
            }
        };
        if !allowed {
            reply(protocol::call_start_err("forbidden"));
            return;
        }

        let mut rooms = self.lock();
        if self.fabric.busy(caller) {
            reply(protocol::call_start_err("already_in_call"));
            return;
        }
        if self.fabric.busy(callee) {
            reply(protocol::call_start_err("busy"));
            return;
        }

        let room_id = uuid::Uuid::new_v4().to_string();
        rooms.insert(
            room_id.clone(),
            Room {
                id: room_id.clone(),
                members: vec![caller.to_string(), callee.to_string()],
                owner: caller.to_string(),
                queue: VecDeque::new(),
                active_join: None,
            },
        );
        self.fabric.with_runtime(caller, |rt| {
            rt.room_id = Some(room_id.clone());
            rt.controlling_session = Some(caller_session.to_string());
        });
        self.fabric
            .with_runtime(callee, |rt| rt.room_id = Some(room_id.clone()));

        let caller_name = self.name_of(caller);
        self.fabric.send_to_user(
            callee,
            &protocol::incoming_call(&room_id, caller, &caller_name),
        );
        reply(protocol::call_start_ok(&room_id));
    }

    pub fn accept(&self, user: &str, session: &str) {
        let rooms = self.lock();
        let Some(room_id) = self.room_of(user) else { return };
        let Some(room) = rooms.get(&room_id) else { return };
        if !room.members.iter().any(|m| m == user) {
            return;
        }
        // Only one session controls the call per user.
        if self.controlling_of(user).is_some() {
            return;
        }
        self.fabric
            .with_runtime(user, |rt| rt.controlling_session = Some(session.to_string()));
        self.fabric.send_to_user_except(
            user,
            session,
            &protocol::incoming_call_cancelled(&room_id, "accepted_elsewhere"),
        );

        let username = self.name_of(user);
        let mut peers = Vec::new();
        for member in room.members.iter().filter(|m| m.as_str() != user) {
            self.fabric.send_to_controlling(
                member,
                &protocol::room_peer_joined(&room_id, user, &username),
            );
            peers.push((member.clone(), self.name_of(member)));
        }
        self.fabric
            .send_to_session(user, session, &protocol::room_peers(&room_id, &peers));
    }

    pub fn reject(&self, user: &str, session: &str) {
        let mut rooms = self.lock();
        let Some(room_id) = self.room_of(user) else { return };
        if !rooms.contains_key(&room_id) {
            return;
        }

        if self.controlling_of(user).is_some() {
            // An in-call device sent reject: treat as hangup.
            self.leave(&mut rooms, &room_id, user, session);
            return;
        }

        let is_proposed = {
            let room = &rooms[&room_id];
            room.members.len() == 2 && room.members.iter().any(|m| m == user)
        };
        if is_proposed {
            // No established call yet: dissolve silently, tell the caller.
            let room = rooms.remove(&room_id).unwrap();
            let caller = room
                .members
                .iter()
                .find(|m| m.as_str() != user)
                .cloned()
                .unwrap_or_default();
            self.fabric
                .send_to_controlling(&caller, &protocol::call_rejected(&room_id));
            self.clear_call_state(&caller);
            self.clear_call_state(user);
            self.fabric.send_to_user_except(
                user,
                session,
                &protocol::incoming_call_cancelled(&room_id, "rejected_elsewhere"),
            );
            self.flush_joiners(&room, "ended");
        } else {
            // Joined-call invite rejected mid-call: just drop the member.
            self.fabric.send_to_user_except(
                user,
                session,
                &protocol::incoming_call_cancelled(&room_id, "rejected_elsewhere"),
            );
            self.clear_call_state(user);
            self.remove_member(&mut rooms, &room_id, user);
        }
    }

    pub fn hangup(&self, user: &str, session: &str) {
        let mut rooms = self.lock();
        let Some(room_id) = self.room_of(user) else { return };
        self.leave(&mut rooms, &room_id, user, session);
    }

    /// Shared leave path for hangup / reject-while-controlling / socket
    /// close of the controlling session.
    fn leave(&self, rooms: &mut HashMap<String, Room>, room_id: &str, user: &str, session: &str) {
        let Some(room) = rooms.get(room_id) else { return };
        if !room.members.iter().any(|m| m == user) {
            return;
        }

        // Caller hanging up before the callee accepted: dissolve without a
        // callEnded (there is no established call to end).
        let pre_accept = room.members.len() == 2
            && room.owner == user
            && room
                .members
                .iter()
                .find(|m| m.as_str() != user)
                .map(|callee| self.controlling_of(callee).is_none())
                .unwrap_or(false);
        if pre_accept {
            let room = rooms.remove(room_id).unwrap();
            let callee = room
                .members
                .iter()
                .find(|m| m.as_str() != user)
                .cloned()
                .unwrap_or_default();
            self.fabric.send_to_user(
                &callee,
                &protocol::incoming_call_cancelled(room_id, "hangup"),
            );
            self.clear_call_state(&callee);
            self.clear_call_state(user);
            self.fabric.send_to_user_except(
                user,
                session,
                &protocol::incoming_call_cancelled(room_id, "hangup"),
            );
            self.flush_joiners(&room, "ended");
            return;
        }

        self.fabric.send_to_user_except(
            user,
            session,
            &protocol::incoming_call_cancelled(room_id, "hangup"),
        );
        self.clear_call_state(user);
        self.remove_member(rooms, room_id, user);
    }

    /// Drop a member from an established room, dissolving it when at most
    /// one member remains.
    fn remove_member(&self, rooms: &mut HashMap<String, Room>, room_id: &str, user: &str) {
        let Some(room) = rooms.get_mut(room_id) else { return };
        room.members.retain(|m| m != user);
        for member in &room.members {
            self.fabric
                .send_to_controlling(member, &protocol::room_peer_left(room_id, user));
        }

        if room.members.len() <= 1 {
            let room = rooms.remove(room_id).unwrap();
            if let Some(last) = room.members.first() {
                self.fabric
                    .send_to_controlling(last, &protocol::call_ended(room_id, "alone"));
                self.clear_call_state(last);
            }
            self.flush_joiners(&room, "ended");
            return;
        }

        let owner_left = room.owner == user;
        if owner_left {
            room.owner = room
                .members
                .iter()
                .find(|m| self.fabric.online(m))
                .cloned()
                .unwrap_or_else(|| room.members[0].clone());
        }
        if owner_left && let Some(active) = room.active_join.clone() {
            // Re-present the pending request to the new approver.
            let name = self.name_of(&active);
            self.fabric.send_to_controlling(
                &room.owner,
                &protocol::join_request(room_id, &active, &name),
            );
        }
    }

    fn clear_call_state(&self, user: &str) {
        self.fabric.with_runtime(user, |rt| {
            rt.room_id = None;
            rt.controlling_session = None;
        });
    }

    /// Answer every queued join request with a terminal failure.
    fn flush_joiners(&self, room: &Room, reason: &str) {
        let joiners: Vec<String> = room.queue.iter().cloned().collect();
        for joiner in joiners {
            let pending = self
                .fabric
                .with_runtime(&joiner, |rt| rt.pending_join.take())
                .flatten();
            if let Some(p) = pending.filter(|p| p.room_id == room.id) {
                self.fabric.send_to_session(
                    &joiner,
                    &p.session_id,
                    &protocol::call_join_err(reason),
                );
            }
        }
    }

    // --- Join flow ---

    pub fn join_request(&self, user: &str, session: &str, target: &str) {
        let reply = |event: Value| self.fabric.send_to_session(user, session, &event);
        let mut rooms = self.lock();
        if self.fabric.busy(user) {
            reply(protocol::call_join_err("already_in_call"));
            return;
        }
        let Some(room_id) = self.room_of(target) else {
            reply(protocol::call_join_err("not_in_call"));
            return;
        };
        let Some(room) = rooms.get_mut(&room_id) else {
            reply(protocol::call_join_err("not_in_call"));
            return;
        };

        if !room.queue.iter().any(|q| q == user) {
            room.queue.push_back(user.to_string());
        }
        self.fabric.with_runtime(user, |rt| {
            rt.pending_join = Some(PendingJoin {
                room_id: room_id.clone(),
                session_id: session.to_string(),
            })
        });
        reply(protocol::call_join_pending(&room_id));
        self.pump(room);
    }

    pub fn join_cancel(&self, user: &str, _session: &str) {
        let mut rooms = self.lock();
        let pending = self
            .fabric
            .with_runtime(user, |rt| rt.pending_join.take())
            .flatten();
        let Some(p) = pending else { return };
        if let Some(room) = rooms.get_mut(&p.room_id) {
            room.queue.retain(|q| q != user);
            if room.active_join.as_deref() == Some(user) {
                room.active_join = None;
            }
            self.pump(room);
        }
    }

    pub fn join_accept(&self, owner: &str, _session: &str) {
        let mut rooms = self.lock();
        let Some(room_id) = self.room_of(owner) else { return };
        let Some(room) = rooms.get_mut(&room_id) else { return };
        if room.owner != owner {
            return;
        }
        let Some(joiner) = room.active_join.take() else { return };
        room.queue.retain(|q| q != joiner.as_str());

        let pending = self
            .fabric
            .with_runtime(&joiner, |rt| rt.pending_join.take())
            .flatten();
        let Some(p) = pending.filter(|p| p.room_id == room_id) else {
            self.pump(room);
            return;
        };

        room.members.push(joiner.clone());
        self.fabric.with_runtime(&joiner, |rt| {
            rt.room_id = Some(room_id.clone());
            rt.controlling_session = Some(p.session_id.clone());
        });

        let joiner_name = self.name_of(&joiner);
        let mut peers = Vec::new();
        for member in room.members.iter().filter(|m| m.as_str() != joiner) {
            self.fabric.send_to_controlling(
                member,
                &protocol::room_peer_joined(&room_id, &joiner, &joiner_name),
            );
            peers.push((member.clone(), self.name_of(member)));
        }
        self.fabric.send_to_session(
            &joiner,
            &p.session_id,
            &protocol::room_peers(&room_id, &peers),
        );
        self.fabric
            .send_to_session(&joiner, &p.session_id, &protocol::call_join_ok(&room_id));
        self.pump(room);
    }

    pub fn join_reject(&self, owner: &str, _session: &str) {
        let mut rooms = self.lock();
        let Some(room_id) = self.room_of(owner) else { return };
        let Some(room) = rooms.get_mut(&room_id) else { return };
        if room.owner != owner {
            return;
        }
        let Some(joiner) = room.active_join.take() else { return };
        room.queue.retain(|q| q != joiner.as_str());

        let pending = self
            .fabric
            .with_runtime(&joiner, |rt| rt.pending_join.take())
            .flatten();
        if let Some(p) = pending.filter(|p| p.room_id == room_id) {
            self.fabric.send_to_session(
                &joiner,
                &p.session_id,
                &protocol::call_join_err("rejected"),
            );
        }
        self.pump(room);
    }

    /// Present the next queued request to the approver, exactly one at a
    /// time. The active request stays at the queue head.
    fn pump(&self, room: &mut Room) {
        if room.active_join.is_some() {
            return;
        }
        let approver_connected =
            room.members.iter().any(|m| m == &room.owner) && self.fabric.online(&room.owner);
        let approver = if approver_connected {
            Some(room.owner.clone())
        } else {
            room.members.iter().find(|m| self.fabric.online(m)).cloned()
        };
        let Some(approver) = approver else {
            for joiner in room.queue.drain(..).collect::<Vec<_>>() {
                let pending = self
                    .fabric
                    .with_runtime(&joiner, |rt| rt.pending_join.take())
                    .flatten();
                if let Some(p) = pending.filter(|p| p.room_id == room.id) {
                    self.fabric.send_to_session(
                        &joiner,
                        &p.session_id,
                        &protocol::call_join_err("no_approver"),
                    );
                }
            }
            return;
        };
        room.owner = approver.clone();

        while let Some(candidate) = room.queue.front().cloned() {
            let still_pending = self
                .fabric
                .with_runtime(&candidate, |rt| {
                    rt.pending_join
                        .as_ref()
                        .map(|p| p.room_id == room.id)
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            if !still_pending || !self.fabric.online(&candidate) {
                room.queue.pop_front();
                continue;
            }
            room.active_join = Some(candidate.clone());
            let name = self.name_of(&candidate);
            self.fabric.send_to_controlling(
                &approver,
                &protocol::join_request(&room.id, &candidate, &name),
            );
            break;
        }
    }

    // --- Signaling relay ---

    /// Forward an opaque signaling envelope. Only honored from the sender's
    /// controlling session, and only between members of the same room.
    pub fn relay_signal(&self, user: &str, session: &str, to: &str, payload: &Value) {
        let rooms = self.lock();
        if self.controlling_of(user).as_deref() != Some(session) {
            return;
        }
        let Some(room_id) = self.room_of(user) else { return };
        let Some(room) = rooms.get(&room_id) else { return };
        if !room.members.iter().any(|m| m == user) || !room.members.iter().any(|m| m == to) {
            return;
        }
        self.fabric
            .send_to_controlling(to, &protocol::signal(user, payload));
    }

    // --- Socket close handling ---

    pub fn handle_disconnect(&self, user: &str, session: &str, info: DetachInfo) {
        if let Some(pending) = &info.pending_join {
            let mut rooms = self.lock();
            if let Some(room) = rooms.get_mut(&pending.room_id) {
                room.queue.retain(|q| q != user);
                if room.active_join.as_deref() == Some(user) {
                    room.active_join = None;
                }
                self.fabric
                    .with_runtime(user, |rt| rt.pending_join = None);
                self.pump(room);
            }
        }

        let Some(room_id) = info.room_id else { return };
        if info.was_controlling {
            let mut rooms = self.lock();
            self.leave(&mut rooms, &room_id, user, session);
        } else if info.last_socket {
            // A ringing or idle-in-room user lost their last socket: they can
            // no longer answer, so drop them from the room.
            let mut rooms = self.lock();
            self.clear_call_state(user);
            self.remove_member(&mut rooms, &room_id, user);
        }
    }

    #[cfg(test)]
    fn room_snapshot(&self, room_id: &str) -> Option<(Vec<String>, String, Vec<String>, Option<String>)> {
        let rooms = self.lock();
        rooms.get(room_id).map(|r| {
            (
                r.members.clone(),
                r.owner.clone(),
                r.queue.iter().cloned().collect(),
                r.active_join.clone(),
            )
        })
    }
}
