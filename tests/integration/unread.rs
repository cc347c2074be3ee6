use rocket::http::Status;

use crate::common::{auth_get, auth_post, create_personal, register, send_message, test_client};

fn unread_ids(
    client: &rocket::local::blocking::Client,
    user: &crate::common::TestUser,
    chat_id: &str,
) -> Vec<String> {
    let res = auth_get(
        client,
        user,
        format!("/api/signed/messages/unread?chatId={chat_id}"),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["messageIds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_unread_counts_are_monotonic() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");

    let mut sent = Vec::new();
    for i in 0..7 {
        sent.push(send_message(&client, &alice, &chat_id, &format!("m{i}")));
    }

    // N sends, zero reads: exactly N unread for B, zero for the sender.
    assert_eq!(unread_ids(&client, &bob, &chat_id), sent);
    assert!(unread_ids(&client, &alice, &chat_id).is_empty());

    // Mark k ids read: count drops by exactly k.
    let res = auth_post(
        &client,
        &bob,
        "/api/signed/messages/mark-read",
        serde_json::json!({ "chatId": chat_id, "messageIds": [sent[0], sent[1], sent[2]] }),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["remaining"], 4);
    assert_eq!(unread_ids(&client, &bob, &chat_id).len(), 4);
}

#[test]
fn test_mark_whole_chat_read() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    for i in 0..3 {
        send_message(&client, &alice, &chat_id, &format!("m{i}"));
    }

    let res = auth_post(
        &client,
        &bob,
        "/api/signed/messages/mark-read",
        serde_json::json!({ "chatId": chat_id }),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["remaining"], 0);
    assert!(unread_ids(&client, &bob, &chat_id).is_empty());
}

#[test]
fn test_mark_read_ignores_foreign_ids() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    send_message(&client, &alice, &chat_id, "m0");

    let res = auth_post(
        &client,
        &bob,
        "/api/signed/messages/mark-read",
        serde_json::json!({ "chatId": chat_id, "messageIds": ["not-a-real-id"] }),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["remaining"], 1);
}
