use rocket::http::Status;

use crate::common::{
    auth_get, auth_post, create_personal, get_history, register, send_message, test_client,
};

#[test]
fn test_send_and_read_history_newest_first() {
    let client = test_client();
    let alice = register(&client, "alice");
    let _bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(send_message(&client, &alice, &chat_id, &format!("m{i}")));
    }

    // Ids sort chronologically (time-ordered identifiers).
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let messages = get_history(&client, &alice, &chat_id);
    assert_eq!(messages.len(), 5);
    // Newest first.
    assert_eq!(messages[0]["id"], ids[4].as_str());
    assert_eq!(messages[4]["id"], ids[0].as_str());
    assert_eq!(messages[0]["senderId"], alice.user_id.as_str());
    assert_eq!(messages[0]["encryptedData"], "m4");
}

#[test]
fn test_history_limit_and_before_pagination() {
    let client = test_client();
    let alice = register(&client, "alice");
    let _bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(send_message(&client, &alice, &chat_id, &format!("m{i}")));
    }

    let res = auth_get(
        &client,
        &alice,
        format!("/api/signed/messages?chatId={chat_id}&limit=2"),
    );
    let body: serde_json::Value = res.into_json().unwrap();
    let page = body["messages"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["id"], ids[5].as_str());
    assert_eq!(page[1]["id"], ids[4].as_str());

    // Page backwards from the oldest id of the first page.
    let before = page[1]["id"].as_str().unwrap();
    let res = auth_get(
        &client,
        &alice,
        format!("/api/signed/messages?chatId={chat_id}&limit=2&before={before}"),
    );
    let body: serde_json::Value = res.into_json().unwrap();
    let page = body["messages"].as_array().unwrap();
    assert_eq!(page[0]["id"], ids[3].as_str());
    assert_eq!(page[1]["id"], ids[2].as_str());
}

#[test]
fn test_update_message_sender_only() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    let message_id = send_message(&client, &alice, &chat_id, "original");

    let res = auth_post(
        &client,
        &bob,
        "/api/signed/messages/update",
        serde_json::json!({ "chatId": chat_id, "messageId": message_id, "encryptedData": "hijack" }),
    );
    assert_eq!(res.status(), Status::Forbidden);

    let res = auth_post(
        &client,
        &alice,
        "/api/signed/messages/update",
        serde_json::json!({ "chatId": chat_id, "messageId": message_id, "encryptedData": "edited" }),
    );
    assert_eq!(res.status(), Status::Ok);
    let messages = get_history(&client, &bob, &chat_id);
    assert_eq!(messages[0]["encryptedData"], "edited");
}

#[test]
fn test_delete_message_sender_only_and_unread_cascade() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    let message_id = send_message(&client, &alice, &chat_id, "oops");

    let res = auth_post(
        &client,
        &bob,
        "/api/signed/messages/delete",
        serde_json::json!({ "chatId": chat_id, "messageId": message_id }),
    );
    assert_eq!(res.status(), Status::Forbidden);

    let res = auth_post(
        &client,
        &alice,
        "/api/signed/messages/delete",
        serde_json::json!({ "chatId": chat_id, "messageId": message_id }),
    );
    assert_eq!(res.status(), Status::Ok);

    assert!(get_history(&client, &bob, &chat_id).is_empty());
    // The unread row went with the message.
    let res = auth_get(
        &client,
        &bob,
        format!("/api/signed/messages/unread?chatId={chat_id}"),
    );
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["messageIds"].as_array().unwrap().is_empty());
}

#[test]
fn test_update_missing_message_is_404() {
    let client = test_client();
    let alice = register(&client, "alice");
    let _bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");
    let res = auth_post(
        &client,
        &alice,
        "/api/signed/messages/update",
        serde_json::json!({ "chatId": chat_id, "messageId": "ghost", "encryptedData": "x" }),
    );
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_ciphertext_size_cap() {
    let client = test_client();
    let alice = register(&client, "alice");
    let _bob = register(&client, "bobby");
    let chat_id = create_personal(&client, &alice, "bobby");

    let at_cap = "x".repeat(50 * 1024);
    let res = auth_post(
        &client,
        &alice,
        "/api/signed/messages/send",
        serde_json::json!({ "chatId": chat_id, "encryptedData": at_cap }),
    );
    assert_eq!(res.status(), Status::Ok);

    let over_cap = "x".repeat(50 * 1024 + 1);
    let res = auth_post(
        &client,
        &alice,
        "/api/signed/messages/send",
        serde_json::json!({ "chatId": chat_id, "encryptedData": over_cap }),
    );
    assert_eq!(res.status(), Status::PayloadTooLarge);
}
