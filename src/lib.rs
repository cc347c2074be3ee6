pub mod calls;
pub mod chat;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod fabric;
pub mod keys;
pub mod models;
pub mod protocol;
pub mod push;
pub mod routes;
pub mod sessions;
pub mod turn;

use calls::CallEngine;
use config::Config;
use db::Db;
use fabric::Fabric;
use sessions::{ChallengeStore, SessionRegistry};
use std::env;
use std::sync::Arc;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "data/lrcom.db".to_string());
    rocket_with_db(&db_path)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, Config::from_env())
}

pub fn rocket_with_db_and_config(db_path: &str, config: Config) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, config)
}

fn build_rocket(db_path: &str, config: Config) -> rocket::Rocket<rocket::Build> {
    init_diagnostics();

    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let registry = Arc::new(SessionRegistry::new(
        config.session_ttl_secs,
        config.max_sessions_per_user,
    ));
    let challenges = ChallengeStore::default();
    let fabric = Arc::new(Fabric::new());
    let engine = Arc::new(CallEngine::new(fabric.clone()));

    // JSON bodies are capped at 1 MiB; the real payload caps (ciphertext,
    // vault) are enforced per field. Rocket's own logging stays off unless
    // diagnostics are requested.
    let mut figment = rocket::Config::figment().merge(("limits.json", 1024 * 1024));
    if env::var("DEBUG").is_err() {
        figment = figment.merge(("log_level", "off"));
    }

    let supervisor_fabric = fabric.clone();
    let supervisor_registry = registry.clone();
    let heartbeat_secs = config.heartbeat_interval_secs.max(5);
    let resend_secs = config.ws_resend_secs.max(1);

    let push_config = config.clone();
    let push_db_path = db_path.to_string();
    let cleanup_db_path = db_path.to_string();
    let cleanup_secs = config.cleanup_interval_secs;

    rocket::custom(figment)
        .manage(db)
        .manage(config)
        .manage(registry)
        .manage(challenges)
        .manage(fabric)
        .manage(engine)
        .register(
            "/",
            rocket::catchers![
                routes::bad_request,
                routes::unauthorized,
                routes::forbidden,
                routes::not_found,
                routes::payload_too_large,
                routes::unprocessable,
                routes::internal_error,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::healthz,
                routes::turn,
                routes::register,
                routes::login_init,
                routes::login_final,
                routes::check_username,
                routes::session_refresh,
                routes::logout_other_devices,
                routes::logout_wipe_other_devices,
                routes::chats_list,
                routes::create_personal,
                routes::create_group,
                routes::add_member,
                routes::rename_group,
                routes::delete_chat,
                routes::chat_members,
                routes::get_messages,
                routes::get_unread,
                routes::send_message,
                routes::update_message,
                routes::delete_message,
                routes::mark_read,
                routes::presence_route,
                routes::account_update,
                routes::account_delete,
                routes::hidden_mode,
                routes::introvert_mode,
                routes::push_subscribe,
                routes::push_disable,
                routes::vapid_public_key,
                routes::ws_connect,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Realtime Supervisor",
            move |_rocket| {
                Box::pin(async move {
                    // Heartbeat: ping every socket, terminate the silent
                    // ones, and drop sockets whose session expired.
                    let fabric = supervisor_fabric.clone();
                    let registry = supervisor_registry.clone();
                    tokio::spawn(async move {
                        let tick = std::time::Duration::from_secs(heartbeat_secs);
                        loop {
                            tokio::time::sleep(tick).await;
                            for (user_id, session_id) in fabric.socket_pairs() {
                                if !registry.session_alive(&user_id, &session_id) {
                                    fabric.close_socket(&user_id, &session_id);
                                }
                            }
                            fabric.heartbeat_tick();
                        }
                    });

                    // Central reliable-delivery retransmit timer.
                    let fabric = supervisor_fabric.clone();
                    tokio::spawn(async move {
                        let tick = std::time::Duration::from_secs(resend_secs);
                        loop {
                            tokio::time::sleep(tick).await;
                            fabric.resend_tick();
                        }
                    });
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Push Outbox",
            move |_rocket| {
                Box::pin(async move {
                    if push_config.push_enabled() {
                        let cleanup_secs = push_config.push_cleanup_secs;
                        push::spawn_outbox_worker(push_db_path.clone(), push_config);
                        push::spawn_push_cleanup(push_db_path, cleanup_secs);
                    }
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Expiry Sweep",
            move |_rocket| {
                Box::pin(async move {
                    cleanup::spawn_expiry_task(cleanup_db_path, cleanup_secs);
                })
            },
        ))
}

/// Diagnostics are opt-in: without `DEBUG` in the environment the server
/// emits nothing at all (no request logs, no IPs, no user agents).
fn init_diagnostics() {
    if let Ok(filter) = env::var("DEBUG") {
        let filter = if filter == "1" || filter.is_empty() {
            "info".to_string()
        } else {
            filter
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .try_init();
    }
}
