// Route module decomposition — each domain area in its own file.
// The bearer-auth request guard lives here; route functions in submodules.

mod account;
mod auth;
mod chats;
mod messages;
mod presence;
mod push_routes;
mod session;
mod system;
mod ws;

pub use account::{account_delete, account_update, hidden_mode, introvert_mode};
pub use auth::{check_username, login_final, login_init, register};
pub use chats::{
    add_member, chat_members, chats_list, create_group, create_personal, delete_chat, rename_group,
};
pub use messages::{get_messages, get_unread, mark_read, send_message, update_message, delete_message};
pub use presence::presence as presence_route;
pub use push_routes::{push_disable, push_subscribe, vapid_public_key};
pub use session::{logout_other_devices, logout_wipe_other_devices, session_refresh};
pub use system::{
    bad_request, forbidden, healthz, internal_error, not_found, payload_too_large, turn,
    unauthorized, unprocessable,
};
pub use ws::ws_connect;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use std::sync::Arc;

use crate::sessions::SessionRegistry;

/// Authenticated request context: the resolved (user, session) pair plus
/// the presented token (session refresh rotates it in place).
pub struct AuthSession {
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

fn bearer_token<'r>(req: &'r Request<'_>) -> Option<&'r str> {
    if let Some(auth) = req.headers().get_one("Authorization")
        && let Some(token) = auth.strip_prefix("Bearer ")
    {
        return Some(token);
    }
    req.headers().get_one("X-Auth-Token")
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(token) = bearer_token(req) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let Some(registry) = req.rocket().state::<Arc<SessionRegistry>>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        match registry.lookup(token) {
            Some(session) => Outcome::Success(AuthSession {
                user_id: session.user_id,
                session_id: session.session_id,
                token: token.to_string(),
            }),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
