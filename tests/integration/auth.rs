use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rocket::http::{ContentType, Status};
use rsa::Oaep;
use sha2::Sha256;

use crate::common::{real_keypair, register, stub_jwk, test_client};

// --- Register ---

#[test]
fn test_register_returns_session() {
    let client = test_client();
    let user = register(&client, "alice");
    assert!(!user.user_id.is_empty());
    assert!(!user.token.is_empty());
    assert_eq!(user.username, "alice");
}

#[test]
fn test_register_duplicate_username() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "alice",
                "publicKey": stub_jwk("other"),
                "removeDate": "2099-01-01T00:00:00Z",
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "already exists");
}

#[test]
fn test_register_rejects_bad_names_and_keys() {
    let client = test_client();
    for (username, key) in [
        ("ab", stub_jwk("x")),                       // too short
        ("bad<name>", stub_jwk("x")),                // angle brackets
        ("goodname", "not json".to_string()),        // key not JSON
        ("goodname", r#"{"kty":"EC","n":"qqo","e":"AQAB"}"#.to_string()),
    ] {
        let res = client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "username": username,
                    "publicKey": key,
                    "removeDate": "2099-01-01T00:00:00Z",
                })
                .to_string(),
            )
            .dispatch();
        assert_eq!(res.status(), Status::BadRequest, "accepted {username}");
    }
}

#[test]
fn test_register_rejects_bad_remove_date() {
    let client = test_client();
    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "goodname",
                "publicKey": stub_jwk("x"),
                "removeDate": "sometime soon",
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

// --- check-username ---

#[test]
fn test_check_username() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/auth/check-username")
        .header(ContentType::JSON)
        .body(r#"{"username":"alice"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["exists"], true);

    let res = client
        .post("/api/auth/check-username")
        .header(ContentType::JSON)
        .body(r#"{"username":"nobody"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["exists"], false);
}

// --- Challenge-response login ---

#[test]
fn test_login_round_trip() {
    let client = test_client();
    let (private, jwk) = real_keypair();

    // Register with a vault so login-final can return it.
    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "keyholder",
                "publicKey": jwk,
                "removeDate": "2099-01-01T00:00:00Z",
                "vault": "encrypted-settings-blob",
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Init with an equivalent JWK (different field order, extra fields):
    // canonicalization must make them match.
    let reordered: serde_json::Value = serde_json::from_str(&jwk).unwrap();
    let reordered = serde_json::json!({
        "e": reordered["e"],
        "ext": true,
        "alg": "RSA-OAEP-256",
        "kty": "RSA",
        "n": reordered["n"],
    });
    let res = client
        .post("/api/auth/login-init")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "keyholder",
                "publicKey": reordered.to_string(),
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let challenge_id = body["challengeId"].as_str().unwrap().to_string();
    let encrypted = STANDARD
        .decode(body["encryptedChallengeB64"].as_str().unwrap())
        .unwrap();

    // Only the private key holder can produce the nonce.
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
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert_eq!(body["username"], "keyholder");
    assert_eq!(body["vault"], "encrypted-settings-blob");

    // Challenges are one-shot: the same id fails on replay.
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
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_login_init_unknown_user_is_404() {
    let client = test_client();
    let res = client
        .post("/api/auth/login-init")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "nobody",
                "publicKey": stub_jwk("x"),
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_login_init_wrong_key_is_401() {
    let client = test_client();
    register(&client, "alice");
    let res = client
        .post("/api/auth/login-init")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "username": "alice",
                "publicKey": stub_jwk("different"),
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_login_final_wrong_nonce_is_401() {
    let client = test_client();
    let (_private, jwk) = real_keypair();
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
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post("/api/auth/login-init")
        .header(ContentType::JSON)
        .body(serde_json::json!({"username": "keyholder", "publicKey": jwk}).to_string())
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let challenge_id = body["challengeId"].as_str().unwrap();

    let res = client
        .post("/api/auth/login-final")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "challengeId": challenge_id,
                "response": STANDARD.encode(b"guessed wrong"),
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn test_unknown_challenge_id_is_401() {
    let client = test_client();
    let res = client
        .post("/api/auth/login-final")
        .header(ContentType::JSON)
        .body(r#"{"challengeId":"ghost","response":"eA=="}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}
