use futures::{SinkExt, StreamExt};
use rocket::{State, get};
use rocket_ws as ws;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::calls::CallEngine;
use crate::chat;
use crate::db::Db;
use crate::error::ApiError;
use crate::fabric::{Fabric, SocketWrite};
use crate::protocol::{self, ClientFrame};
use crate::sessions::{Session, SessionRegistry};

/// WebSocket entry point. The bearer token rides in the URL (browsers
/// cannot set headers on a ws upgrade); an unknown token refuses the
/// upgrade outright.
#[get("/api/signed/ws?<token>")]
pub fn ws_connect(
    socket: ws::WebSocket,
    token: &str,
    db: &State<Db>,
    registry: &State<Arc<SessionRegistry>>,
    fabric: &State<Arc<Fabric>>,
    engine: &State<Arc<CallEngine>>,
) -> Result<ws::Channel<'static>, ApiError> {
    let session = registry.lookup(token).ok_or(ApiError::Unauthorized)?;
    let username = {
        let conn = db.conn();
        chat::find_user(&conn, &session.user_id)?
            .map(|u| u.username)
            .ok_or(ApiError::Unauthorized)?
    };

    let db = db.inner().clone();
    let fabric = fabric.inner().clone();
    let engine = engine.inner().clone();
    Ok(socket.channel(move |stream| {
        Box::pin(async move {
            connection_loop(stream, db, fabric, engine, session, username).await;
            Ok(())
        })
    }))
}

/// Full connection lifecycle: writer task, fabric attach, read loop,
/// detach + call-state unwind.
async fn connection_loop(
    stream: ws::stream::DuplexStream,
    db: Db,
    fabric: Arc<Fabric>,
    engine: Arc<CallEngine>,
    session: Session,
    username: String,
) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SocketWrite>();

    // Writer: everything the server wants on this wire funnels through one
    // task, so fan-out from any request handler is a plain channel send.
    let writer = tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let result = match write {
                SocketWrite::Frame(frame) => sink.send(ws::Message::Text(frame)).await,
                SocketWrite::Ping => sink.send(ws::Message::Ping(Vec::new())).await,
                SocketWrite::Close => {
                    let _ = sink.send(ws::Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    fabric.attach(&session.user_id, &username, &session.session_id, tx);

    while let Some(message) = source.next().await {
        match message {
            Ok(ws::Message::Text(text)) => {
                dispatch(&db, &fabric, &engine, &session.user_id, &session.session_id, &text);
            }
            Ok(ws::Message::Pong(_)) => {
                fabric.mark_active(&session.user_id, &session.session_id);
            }
            Ok(ws::Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if let Some(info) = fabric.detach(&session.user_id, &session.session_id) {
        engine.handle_disconnect(&session.user_id, &session.session_id, info);
    }
    writer.abort();
}

/// Decode and execute one inbound frame. Malformed JSON is ignored; a
/// well-formed frame with an unrecognized type gets a failure receipt when
/// it carries a `cMsgId`. Duplicate `cMsgId`s replay the cached receipt
/// without re-executing.
fn dispatch(
    db: &Db,
    fabric: &Fabric,
    engine: &CallEngine,
    user_id: &str,
    session_id: &str,
    text: &str,
) {
    fabric.mark_active(user_id, session_id);

    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    let c_msg_id = value
        .get("cMsgId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if let Some(c) = &c_msg_id
        && let Some(cached) = fabric.cached_receipt(user_id, c)
    {
        fabric.send_raw_to_session(user_id, session_id, &cached);
        return;
    }

    let frame = match serde_json::from_value::<ClientFrame>(value) {
        Ok(frame) => frame,
        Err(_) => {
            answer(fabric, user_id, session_id, &c_msg_id, false, Some("UNKNOWN_TYPE"));
            return;
        }
    };

    match frame {
        ClientFrame::Ack { msg_id } => {
            fabric.ack(user_id, session_id, &msg_id);
            return;
        }
        ClientFrame::Ping => {
            fabric.send_to_session(user_id, session_id, &protocol::pong());
            return;
        }
        ClientFrame::CallStart { to } => engine.start(db, user_id, session_id, &to),
        ClientFrame::CallAccept => engine.accept(user_id, session_id),
        ClientFrame::CallReject => engine.reject(user_id, session_id),
        ClientFrame::CallHangup => engine.hangup(user_id, session_id),
        ClientFrame::CallJoinRequest { to } => engine.join_request(user_id, session_id, &to),
        ClientFrame::CallJoinCancel => engine.join_cancel(user_id, session_id),
        ClientFrame::CallJoinAccept => engine.join_accept(user_id, session_id),
        ClientFrame::CallJoinReject => engine.join_reject(user_id, session_id),
        ClientFrame::Signal { to, payload } => {
            engine.relay_signal(user_id, session_id, &to, &payload);
        }
    }
    answer(fabric, user_id, session_id, &c_msg_id, true, None);
}

/// Synthesize, cache, and deliver the receipt for a `cMsgId`-bearing frame.
fn answer(
    fabric: &Fabric,
    user_id: &str,
    session_id: &str,
    c_msg_id: &Option<String>,
    ok: bool,
    code: Option<&str>,
) {
    let Some(c) = c_msg_id else { return };
    let receipt = protocol::receipt(c, ok, code).to_string();
    fabric.store_receipt(user_id, c, receipt.clone());
    fabric.send_raw_to_session(user_id, session_id, &receipt);
}
