//! TURN REST credentials: short-lived username/credential pairs minted from
//! a shared secret (HMAC-SHA1 over the unix expiry), plus STUN fallbacks.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha1::Sha1;

use crate::config::Config;

type HmacSha1 = Hmac<Sha1>;

pub fn ice_servers(config: &Config) -> Value {
    let mut servers = Vec::new();

    if let Some(secret) = &config.turn_secret
        && !config.turn_urls.is_empty()
        && let Some((username, credential)) = mint(secret, config.turn_ttl_secs)
    {
        servers.push(json!({
            "urls": config.turn_urls,
            "username": username,
            "credential": credential,
        }));
    }
    if !config.stun_urls.is_empty() {
        servers.push(json!({ "urls": config.stun_urls }));
    }

    json!({ "iceServers": servers })
}

fn mint(secret: &str, ttl_secs: u64) -> Option<(String, String)> {
    let expiry = Utc::now().timestamp() + ttl_secs as i64;
    let username = expiry.to_string();
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    let credential = STANDARD.encode(mac.finalize().into_bytes());
    Some((username, credential))
}
