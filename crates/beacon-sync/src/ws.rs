use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use beacon_core::BeaconError;
use beacon_core::events::EventLogRepository;
use beacon_core::store::Store;
use beacon_db::DbStore;
use beacon_events::ids::UserId;
use beacon_events::types::Envelope;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::protocol::{ClientFrame, ClientHello, ServerFrame};

const BACKFILL_PAGE: u32 = 256;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sync/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();

    let Some(hello) = read_handshake(&mut receiver).await else {
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    // Register before the backfill query. Deltas landing mid-backfill queue
    // behind the registration instead of slipping through the gap; the pump
    // drops the ones the backfill already sent.
    let (tx, rx) = mpsc::unbounded_channel();
    let connection_id = state
        .registry
        .register(&hello.user_id, tx, hello.last_sequence)
        .await;

    let Some(sent_through) = open_session(&state, &hello, &mut sender).await else {
        state.registry.unregister(&hello.user_id, &connection_id).await;
        return;
    };
    tokio::spawn(pump_frames(sender, rx, sent_through));

    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Ack { sequence }) => {
                state
                    .registry
                    .record_ack(&hello.user_id, &connection_id, sequence)
                    .await;
            }
            Err(_) => {
                debug!(user_id = %hello.user_id, "ignoring unknown client frame");
            }
        }
    }

    // Dropping the registration drops the pump's sender, which ends it.
    state.registry.unregister(&hello.user_id, &connection_id).await;
}

async fn read_handshake(receiver: &mut SplitStream<WebSocket>) -> Option<ClientHello> {
    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        return match serde_json::from_str::<ClientHello>(&text) {
            Ok(hello) => Some(hello),
            Err(err) => {
                warn!(error = %err, "invalid handshake");
                None
            }
        };
    }
    None
}

/// Acknowledges the handshake and replays what the client missed. Returns
/// the sequence the session is caught up through, or None when the socket or
/// the store went away.
async fn open_session(
    state: &AppState,
    hello: &ClientHello,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Option<i64> {
    let plan = match plan_for(&state.db_path, hello) {
        Ok(plan) => plan,
        Err(err) => {
            warn!(user_id = %hello.user_id, error = %err, "handshake query failed");
            return None;
        }
    };

    send_frame(sender, &ServerFrame::HelloOk { head: plan.head })
        .await
        .ok()?;

    if plan.resync_required {
        info!(
            user_id = %hello.user_id,
            last_sequence = hello.last_sequence,
            "resume point predates retention, resync required"
        );
        send_frame(sender, &ServerFrame::ResyncRequired).await.ok()?;
        return Some(plan.backfill_from);
    }

    let mut cursor = plan.backfill_from;
    loop {
        let page = match delta_page(&state.db_path, &hello.user_id, cursor) {
            Ok(page) => page,
            Err(err) => {
                warn!(user_id = %hello.user_id, error = %err, "backfill query failed");
                return None;
            }
        };
        let Some(last) = page.last().map(|envelope| envelope.seq) else {
            break;
        };
        for envelope in &page {
            send_frame(sender, &ServerFrame::delta(envelope)).await.ok()?;
        }
        cursor = last;
    }
    debug!(
        user_id = %hello.user_id,
        from = plan.backfill_from,
        through = cursor,
        "backfill complete"
    );
    Some(cursor)
}

/// Copies queued frames onto the socket, skipping deltas the backfill
/// already delivered. Ends when the socket dies or the registration drops.
async fn pump_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    sent_through: i64,
) {
    while let Some(message) = rx.recv().await {
        if let Message::Text(text) = &message {
            if delta_sequence(text).is_some_and(|sequence| sequence <= sent_through) {
                continue;
            }
        }
        if sender.send(message).await.is_err() {
            break;
        }
    }
}

fn delta_sequence(text: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value["type"] == "delta" {
        value["sequence"].as_i64()
    } else {
        None
    }
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    sender
        .send(Message::Text(Utf8Bytes::from(frame.encode())))
        .await
}

struct SessionPlan {
    head: i64,
    resync_required: bool,
    backfill_from: i64,
}

fn plan_for(db_path: &str, hello: &ClientHello) -> Result<SessionPlan, BeaconError> {
    let store = DbStore::open(db_path)?;
    let head = store.events().head_seq()?;
    let pruned_through = store.events().pruned_through()?;
    Ok(session_plan(hello.last_sequence, pruned_through, head))
}

/// A resume point below the pruned horizon cannot be backfilled: the client
/// re-fetches full state out of band and the session streams from the
/// current head instead.
fn session_plan(last_sequence: i64, pruned_through: i64, head: i64) -> SessionPlan {
    if last_sequence < pruned_through {
        SessionPlan {
            head,
            resync_required: true,
            backfill_from: head,
        }
    } else {
        SessionPlan {
            head,
            resync_required: false,
            backfill_from: last_sequence,
        }
    }
}

fn delta_page(db_path: &str, user_id: &UserId, after: i64) -> Result<Vec<Envelope>, BeaconError> {
    let store = DbStore::open(db_path)?;
    store
        .events()
        .deltas_for_user_after(user_id, after, BACKFILL_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_client_backfills_from_zero_when_nothing_was_pruned() {
        let plan = session_plan(0, 0, 12);
        assert!(!plan.resync_required);
        assert_eq!(plan.backfill_from, 0);
        assert_eq!(plan.head, 12);
    }

    #[test]
    fn resume_point_above_the_horizon_backfills_from_itself() {
        let plan = session_plan(8, 3, 12);
        assert!(!plan.resync_required);
        assert_eq!(plan.backfill_from, 8);
    }

    #[test]
    fn resume_point_exactly_at_the_horizon_is_still_servable() {
        // Everything at or below the horizon is gone, but the client only
        // needs what comes after its resume point.
        let plan = session_plan(5, 5, 12);
        assert!(!plan.resync_required);
        assert_eq!(plan.backfill_from, 5);
    }

    #[test]
    fn resume_point_inside_the_pruned_range_requires_resync() {
        let plan = session_plan(2, 5, 12);
        assert!(plan.resync_required);
        assert_eq!(plan.backfill_from, 12);
    }

    #[test]
    fn delta_sequence_reads_only_delta_frames() {
        assert_eq!(
            delta_sequence(r#"{"type":"delta","sequence":4,"event":{}}"#),
            Some(4)
        );
        assert_eq!(delta_sequence(r#"{"type":"hello_ok","head":4}"#), None);
        assert_eq!(delta_sequence("not json"), None);
    }
}
