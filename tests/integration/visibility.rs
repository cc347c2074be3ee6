use rocket::http::Status;

use crate::common::{
    auth_get, auth_post, create_group, get_history, register, send_message, test_client,
};

fn add_member(
    client: &rocket::local::blocking::Client,
    actor: &crate::common::TestUser,
    group: &str,
    username: &str,
) {
    let res = auth_post(
        client,
        actor,
        "/api/signed/chats/add-member",
        serde_json::json!({ "chatId": group, "username": username }),
    );
    assert_eq!(res.status(), Status::Ok);
}

/// Leaving a group seals the history: remaining members' borders move to
/// the highest message id at the time of leave, and the leaver's authored
/// ids are the removal set.
#[test]
fn test_leave_group_seals_history_for_remaining_members() {
    let client = test_client();
    let x = register(&client, "xavier");
    let y = register(&client, "yvonne");
    let z = register(&client, "zelda");
    let group = create_group(&client, &x, "war room");
    add_member(&client, &x, &group, "yvonne");
    add_member(&client, &x, &group, "zelda");

    for i in 0..5 {
        send_message(&client, &x, &group, &format!("m{i}"));
    }
    assert_eq!(get_history(&client, &y, &group).len(), 5);

    let res = auth_post(
        &client,
        &x,
        "/api/signed/chats/delete",
        serde_json::json!({ "chatId": group }),
    );
    assert_eq!(res.status(), Status::Ok);

    // Y and Z no longer see m1..m5.
    assert!(get_history(&client, &y, &group).is_empty());
    assert!(get_history(&client, &z, &group).is_empty());
    // The leaver is out entirely.
    let res = auth_get(&client, &x, format!("/api/signed/messages?chatId={group}"));
    assert_eq!(res.status(), Status::Forbidden);

    // Fresh traffic flows normally.
    let fresh = send_message(&client, &y, &group, "m6");
    let z_view = get_history(&client, &z, &group);
    assert_eq!(z_view.len(), 1);
    assert_eq!(z_view[0]["id"], fresh.as_str());
}

#[test]
fn test_late_joiner_border() {
    let client = test_client();
    let alice = register(&client, "alice");
    let bob = register(&client, "bobby");
    let group = create_group(&client, &alice, "archive");
    send_message(&client, &alice, &group, "before-join");

    add_member(&client, &alice, &group, "bobby");
    assert!(get_history(&client, &bob, &group).is_empty());

    send_message(&client, &alice, &group, "after-join");
    let view = get_history(&client, &bob, &group);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0]["encryptedData"], "after-join");

    // The founder still sees both.
    assert_eq!(get_history(&client, &alice, &group).len(), 2);
}

#[test]
fn test_empty_group_is_deleted_when_last_member_leaves() {
    let client = test_client();
    let alice = register(&client, "alice");
    let group = create_group(&client, &alice, "ephemera");
    send_message(&client, &alice, &group, "note to self");

    let res = auth_post(
        &client,
        &alice,
        "/api/signed/chats/delete",
        serde_json::json!({ "chatId": group }),
    );
    assert_eq!(res.status(), Status::Ok);

    let res = auth_get(&client, &alice, "/api/signed/chats".to_string());
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["chats"].as_array().unwrap().is_empty());
}
