use rocket::http::Status;

use crate::common::{auth_post, create_group, create_personal, register, test_client};

fn query(
    client: &rocket::local::blocking::Client,
    user: &crate::common::TestUser,
    ids: Vec<&str>,
) -> serde_json::Value {
    let res = auth_post(
        client,
        user,
        "/api/signed/presence",
        serde_json::json!({ "userIds": ids }),
    );
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn test_presence_requires_a_personal_chat() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let carol = register(&client, "carol");
    create_personal(&client, &alice, "bobby");
    // carol shares only a group with alice: not enough for presence.
    let group = create_group(&client, &alice, "acquaintances");
    let res = auth_post(
        &client,
        &alice,
        "/api/signed/chats/add-member",
        serde_json::json!({ "chatId": group, "username": "carol" }),
    );
    assert_eq!(res.status(), Status::Ok);

    // Neither has an open socket, so nobody is online; the point is that
    // carol is dropped silently while bob is a valid subject.
    let body = query(&client, &alice, vec![&bob.user_id, &carol.user_id]);
    assert!(body["onlineUserIds"].as_array().unwrap().is_empty());
    assert!(body["busyUserIds"].as_array().unwrap().is_empty());
    assert!(!body["serverVersion"].as_str().unwrap().is_empty());
}

#[test]
fn test_hidden_users_never_appear() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    create_personal(&client, &alice, "bobby");
    let res = auth_post(
        &client,
        &bob,
        "/api/signed/account/hidden-mode",
        serde_json::json!({ "enabled": true }),
    );
    assert_eq!(res.status(), Status::Ok);

    let body = query(&client, &alice, vec![&bob.user_id]);
    assert!(body["onlineUserIds"].as_array().unwrap().is_empty());
}

#[test]
fn test_presence_list_is_capped() {
    let client = test_client();
    let alice = register(&client, "alice");
    let ids: Vec<String> = (0..26).map(|i| format!("id-{i}")).collect();
    let res = auth_post(
        &client,
        &alice,
        "/api/signed/presence",
        serde_json::json!({ "userIds": ids }),
    );
    assert_eq!(res.status(), Status::BadRequest);
}
