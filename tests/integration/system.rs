use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rocket::http::Status;
use sha1::Sha1;

use crate::common::{test_client, test_client_with_config};
use lrcom_server::config::Config;

#[test]
fn test_healthz() {
    let client = test_client();
    let res = client.get("/healthz").dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_string().unwrap(), "ok");
}

#[test]
fn test_turn_without_secret_is_stun_only() {
    let client = test_client();
    let res = client.get("/turn").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let servers = body["iceServers"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert!(servers[0].get("credential").is_none());
}

#[test]
fn test_turn_credentials_verify() {
    let mut config = Config::default();
    config.turn_secret = Some("shared-secret".to_string());
    config.turn_urls = vec!["turn:turn.example.org:3478".to_string()];
    let client = test_client_with_config(config);

    let res = client.get("/turn").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let servers = body["iceServers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);

    let username = servers[0]["username"].as_str().unwrap();
    let credential = servers[0]["credential"].as_str().unwrap();
    let expiry: i64 = username.parse().unwrap();
    assert!(expiry > chrono::Utc::now().timestamp());

    let mut mac = Hmac::<Sha1>::new_from_slice(b"shared-secret").unwrap();
    mac.update(username.as_bytes());
    assert_eq!(credential, STANDARD.encode(mac.finalize().into_bytes()));
}
