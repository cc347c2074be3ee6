use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::{Client, LocalResponse};
use rsa::RsaPrivateKey;
use rsa::traits::PublicKeyParts;

/// Wrapper around Client that auto-deletes the temp DB on drop. Uses
/// Option<Client> so the SQLite connection is released before the files go.
pub struct TestClient {
    client: Option<Client>,
    pub db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

fn temp_db_path() -> String {
    format!(
        "/tmp/lrcom_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    )
}

pub fn test_client() -> TestClient {
    let db_path = temp_db_path();
    let rocket = lrcom_server::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

/// Client with a custom Config (TURN secrets, VAPID keys) without env-var
/// races between parallel tests.
pub fn test_client_with_config(config: lrcom_server::config::Config) -> TestClient {
    let db_path = temp_db_path();
    let rocket = lrcom_server::rocket_with_db_and_config(&db_path, config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

pub struct TestUser {
    pub user_id: String,
    pub username: String,
    pub token: String,
}

/// A syntactically valid RSA JWK that is NOT a usable key — fine for every
/// flow except challenge decryption.
pub fn stub_jwk(seed: &str) -> String {
    let n = URL_SAFE_NO_PAD.encode(format!("stub-modulus-{seed}"));
    format!("{{\"kty\":\"RSA\",\"n\":\"{n}\",\"e\":\"AQAB\"}}")
}

/// A real 2048-bit keypair for challenge-response tests.
pub fn real_keypair() -> (RsaPrivateKey, String) {
    let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("keygen");
    let public = private.to_public_key();
    let jwk = format!(
        "{{\"kty\":\"RSA\",\"n\":\"{}\",\"e\":\"{}\"}}",
        URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    );
    (private, jwk)
}

pub fn register_with_key(client: &Client, username: &str, jwk: &str) -> TestUser {
    let body = serde_json::json!({
        "username": username,
        "publicKey": jwk,
        "removeDate": "2099-01-01T00:00:00Z",
        "vault": "",
    });
    let res = client
        .post("/api/auth/register")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok, "register failed for {username}");
    let body: serde_json::Value = res.into_json().unwrap();
    TestUser {
        user_id: body["userId"].as_str().unwrap().to_string(),
        username: body["username"].as_str().unwrap().to_string(),
        token: body["token"].as_str().unwrap().to_string(),
    }
}

pub fn register(client: &Client, username: &str) -> TestUser {
    register_with_key(client, username, &stub_jwk(username))
}

pub fn auth_get<'c>(client: &'c Client, user: &TestUser, path: String) -> LocalResponse<'c> {
    client
        .get(path)
        .header(Header::new("Authorization", format!("Bearer {}", user.token)))
        .dispatch()
}

pub fn auth_post<'c>(
    client: &'c Client,
    user: &TestUser,
    path: &'c str,
    body: serde_json::Value,
) -> LocalResponse<'c> {
    client
        .post(path)
        .header(ContentType::JSON)
        .header(Header::new("Authorization", format!("Bearer {}", user.token)))
        .body(body.to_string())
        .dispatch()
}

/// Create (or fetch) the personal chat between `user` and `other`.
pub fn create_personal(client: &Client, user: &TestUser, other: &str) -> String {
    let res = auth_post(
        client,
        user,
        "/api/signed/chats/create-personal",
        serde_json::json!({ "username": other }),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["chatId"].as_str().unwrap().to_string()
}

pub fn create_group(client: &Client, user: &TestUser, name: &str) -> String {
    let res = auth_post(
        client,
        user,
        "/api/signed/chats/create-group",
        serde_json::json!({ "name": name }),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["chatId"].as_str().unwrap().to_string()
}

pub fn send_message(client: &Client, user: &TestUser, chat_id: &str, data: &str) -> String {
    let res = auth_post(
        client,
        user,
        "/api/signed/messages/send",
        serde_json::json!({ "chatId": chat_id, "encryptedData": data }),
    );
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["messageId"].as_str().unwrap().to_string()
}

pub fn get_history(client: &Client, user: &TestUser, chat_id: &str) -> Vec<serde_json::Value> {
    let res = auth_get(client, user, format!("/api/signed/messages?chatId={chat_id}"));
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    body["messages"].as_array().unwrap().clone()
}
