use std::env;

/// Server configuration. All values read from environment variables with
/// sensible defaults. Port, host and TLS key/cert paths are Rocket's own
/// (`ROCKET_PORT`, `ROCKET_ADDRESS`, `ROCKET_TLS`).
///
/// Environment variables:
/// - `SESSION_TTL_SECS` — bearer session lifetime (default: 43200 = 12 h)
/// - `MAX_SESSIONS_PER_USER` — concurrent session cap, oldest evicted (default: 5)
/// - `HEARTBEAT_INTERVAL_SECS` — ws ping cadence, floor 5 (default: 30)
/// - `WS_RESEND_SECS` — reliable frame retransmit interval (default: 5)
/// - `PUSH_TICK_SECS` — push outbox worker cadence, floor 5 (default: 15)
/// - `PUSH_CLEANUP_SECS` — push table sweep cadence (default: 300)
/// - `CLEANUP_INTERVAL_SECS` — user/chat expiry sweep cadence (default: 600)
/// - `TURN_URLS` — comma-separated turn:/turns: URLs (default: none)
/// - `TURN_SECRET` — shared secret for TURN REST credentials (default: none)
/// - `TURN_TTL_SECS` — TURN credential lifetime (default: 3600)
/// - `STUN_URLS` — comma-separated STUN fallbacks
/// - `VAPID_PUBLIC_KEY` / `VAPID_PRIVATE_KEY` / `VAPID_SUBJECT` — web push
///   credentials; push is disabled unless all three are set
/// - `APP_NAME` — notification title and service name (default: "lrcom")
#[derive(Clone)]
pub struct Config {
    pub session_ttl_secs: u64,
    pub max_sessions_per_user: usize,
    pub heartbeat_interval_secs: u64,
    pub ws_resend_secs: u64,
    pub push_tick_secs: u64,
    pub push_cleanup_secs: u64,
    pub cleanup_interval_secs: u64,
    pub turn_urls: Vec<String>,
    pub turn_secret: Option<String>,
    pub turn_ttl_secs: u64,
    pub stun_urls: Vec<String>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_subject: Option<String>,
    pub app_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_ttl_secs: 12 * 3600,
            max_sessions_per_user: 5,
            heartbeat_interval_secs: 30,
            ws_resend_secs: 5,
            push_tick_secs: 15,
            push_cleanup_secs: 300,
            cleanup_interval_secs: 600,
            turn_urls: Vec::new(),
            turn_secret: None,
            turn_ttl_secs: 3600,
            stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            vapid_public_key: None,
            vapid_private_key: None,
            vapid_subject: None,
            app_name: "lrcom".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("SESSION_TTL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.session_ttl_secs = n;
        }
        if let Ok(val) = env::var("MAX_SESSIONS_PER_USER")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_sessions_per_user = n.max(1);
        }
        if let Ok(val) = env::var("HEARTBEAT_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.heartbeat_interval_secs = n.max(5);
        }
        if let Ok(val) = env::var("WS_RESEND_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.ws_resend_secs = n.max(1);
        }
        if let Ok(val) = env::var("PUSH_TICK_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.push_tick_secs = n.max(5);
        }
        if let Ok(val) = env::var("PUSH_CLEANUP_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.push_cleanup_secs = n.max(30);
        }
        if let Ok(val) = env::var("CLEANUP_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.cleanup_interval_secs = n.max(30);
        }
        if let Ok(val) = env::var("TURN_URLS") {
            config.turn_urls = split_urls(&val);
        }
        if let Ok(val) = env::var("TURN_SECRET")
            && !val.is_empty()
        {
            config.turn_secret = Some(val);
        }
        if let Ok(val) = env::var("TURN_TTL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.turn_ttl_secs = n.max(60);
        }
        if let Ok(val) = env::var("STUN_URLS") {
            config.stun_urls = split_urls(&val);
        }
        if let Ok(val) = env::var("VAPID_PUBLIC_KEY")
            && !val.is_empty()
        {
            config.vapid_public_key = Some(val);
        }
        if let Ok(val) = env::var("VAPID_PRIVATE_KEY")
            && !val.is_empty()
        {
            config.vapid_private_key = Some(val);
        }
        if let Ok(val) = env::var("VAPID_SUBJECT")
            && !val.is_empty()
        {
            config.vapid_subject = Some(val);
        }
        if let Ok(val) = env::var("APP_NAME")
            && !val.is_empty()
        {
            config.app_name = val;
        }

        config
    }

    /// Web push requires the full VAPID triple.
    pub fn push_enabled(&self) -> bool {
        self.vapid_public_key.is_some()
            && self.vapid_private_key.is_some()
            && self.vapid_subject.is_some()
    }
}

fn split_urls(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
