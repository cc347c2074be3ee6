use rocket::http::Status;

use crate::common::{
    auth_get, auth_post, create_personal, register, send_message, test_client,
    test_client_with_config,
};
use lrcom_server::config::Config;
use lrcom_server::db::open_worker_connection;

fn push_config() -> Config {
    let mut config = Config::default();
    // Structurally valid base64url key material; dispatch against a real
    // push service is outside these tests.
    config.vapid_public_key = Some("BPubKeyMaterial".to_string());
    config.vapid_private_key = Some("cHJpdmF0ZS1rZXktbWF0ZXJpYWw".to_string());
    config.vapid_subject = Some("mailto:ops@example.org".to_string());
    config
}

#[test]
fn test_push_routes_404_when_disabled() {
    let client = test_client();
    let user = register(&client, "alice");
    let res = auth_post(
        &client,
        &user,
        "/api/signed/push/subscribe",
        serde_json::json!({
            "endpoint": "https://push.example.org/ep",
            "keys": { "p256dh": "p", "auth": "a" },
        }),
    );
    assert_eq!(res.status(), Status::NotFound);

    let res = auth_get(&client, &user, "/api/signed/push/vapid-public-key".to_string());
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_subscribe_and_vapid_key() {
    let client = test_client_with_config(push_config());
    let user = register(&client, "alice");

    let res = auth_get(&client, &user, "/api/signed/push/vapid-public-key".to_string());
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["publicKey"], "BPubKeyMaterial");

    let res = auth_post(
        &client,
        &user,
        "/api/signed/push/subscribe",
        serde_json::json!({
            "endpoint": "https://push.example.org/ep",
            "keys": { "p256dh": "p256dh-material", "auth": "auth-material" },
        }),
    );
    assert_eq!(res.status(), Status::Ok);

    let conn = open_worker_connection(&client.db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM push_subscriptions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);

    let res = auth_post(
        &client,
        &user,
        "/api/signed/push/disable",
        serde_json::json!({ "endpoint": "https://push.example.org/ep" }),
    );
    assert_eq!(res.status(), Status::Ok);
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM push_subscriptions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_offline_recipient_with_subscription_is_queued() {
    let client = test_client_with_config(push_config());
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");

    let res = auth_post(
        &client,
        &bob,
        "/api/signed/push/subscribe",
        serde_json::json!({
            "endpoint": "https://push.example.org/bob",
            "keys": { "p256dh": "p", "auth": "a" },
        }),
    );
    assert_eq!(res.status(), Status::Ok);

    let message_id = send_message(&client, &alice, &chat_id, "offline ping");

    let conn = open_worker_connection(&client.db_path).unwrap();
    let row: (String, String, i64, i64) = conn
        .query_row(
            "SELECT user_id, message_id, attempts, sent FROM push_send_queue",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .unwrap();
    assert_eq!(row.0, bob.user_id);
    assert_eq!(row.1, message_id);
    assert_eq!(row.2, 0);
    assert_eq!(row.3, 0);
}

#[test]
fn test_recipient_without_subscription_is_not_queued() {
    let client = test_client_with_config(push_config());
    let alice = register(&client, "alice");
    let _bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    send_message(&client, &alice, &chat_id, "nobody listening");

    let conn = open_worker_connection(&client.db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM push_send_queue", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 0);
}
