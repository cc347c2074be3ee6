use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rocket::http::{ContentType, Header, Status};
use rsa::Oaep;
use sha2::Sha256;

use crate::common::{TestUser, auth_get, auth_post, real_keypair, register, test_client};

/// Run the full challenge-response flow to open another session for an
/// already-registered keyholder.
fn login(client: &rocket::local::blocking::Client, username: &str, private: &rsa::RsaPrivateKey, jwk: &str) -> String {
    let res = client
        .post("/api/auth/login-init")
        .header(ContentType::JSON)
        .body(serde_json::json!({"username": username, "publicKey": jwk}).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let challenge_id = body["challengeId"].as_str().unwrap().to_string();
    let encrypted = STANDARD
        .decode(body["encryptedChallengeB64"].as_str().unwrap())
        .unwrap();
    let nonce = private.decrypt(Oaep::new::<Sha256>(), &encrypted).unwrap();

    let res = client
        .post("/api/auth/login-final")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "challengeId": challenge_id,
                "response": STANDARD.encode(&nonce),
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["token"].as_str().unwrap().to_string()
}

#[test]
fn test_refresh_rotates_the_token() {
    let client = test_client();
    let user = register(&client, "alice");

    let res = auth_post(&client, &user, "/api/signed/session/refresh", serde_json::json!({}));
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let new_token = body["token"].as_str().unwrap().to_string();
    assert_ne!(new_token, user.token);

    // The old token is dead, the new one works.
    let res = auth_get(&client, &user, "/api/signed/chats".to_string());
    assert_eq!(res.status(), Status::Unauthorized);
    let rotated = TestUser { token: new_token, ..user };
    let res = auth_get(&client, &rotated, "/api/signed/chats".to_string());
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_requests_without_token_are_401() {
    let client = test_client();
    let res = client.get("/api/signed/chats").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = client
        .get("/api/signed/chats")
        .header(Header::new("Authorization", "Bearer bogus"))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_x_auth_token_header_is_accepted() {
    let client = test_client();
    let user = register(&client, "alice");
    let res = client
        .get("/api/signed/chats")
        .header(Header::new("X-Auth-Token", user.token.clone()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_logout_other_devices_keeps_only_the_caller() {
    let client = test_client();
    let (private, jwk) = real_keypair();
    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "keyholder",
                "publicKey": jwk.clone(),
                "removeDate": "2099-01-01T00:00:00Z",
            })
            .to_string(),
        )
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let first_token = body["token"].as_str().unwrap().to_string();
    let user_id = body["userId"].as_str().unwrap().to_string();

    let second_token = login(&client, "keyholder", &private, &jwk);
    let second = TestUser {
        user_id,
        username: "keyholder".to_string(),
        token: second_token,
    };

    let res = auth_post(
        &client,
        &second,
        "/api/signed/session/logout-other-devices",
        serde_json::json!({}),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["loggedOut"], 1);

    // The first session is revoked; the caller's survives.
    let revoked = TestUser {
        user_id: second.user_id.clone(),
        username: second.username.clone(),
        token: first_token,
    };
    let res = auth_get(&client, &revoked, "/api/signed/chats".to_string());
    assert_eq!(res.status(), Status::Unauthorized);
    let res = auth_get(&client, &second, "/api/signed/chats".to_string());
    assert_eq!(res.status(), Status::Ok);
}
