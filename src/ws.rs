//! WebSocket transport: one task per connection, fanning the engine's
//! broadcast stream out to sockets and feeding client commands in.
//!
//! Identity is bound server-side at login and never read from message
//! payloads, so a client cannot act as another user by forging fields.

use crate::errors::EngineError;
use crate::events::{BetResultBody, ClientCommand, CreditResultBody, EngineEvent, Recipient};
use crate::scheduler::RoundEngine;
use crate::types::UserId;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<RoundEngine>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = engine.subscribe();
    let mut user_id: Option<UserId> = None;

    debug!("websocket connected");
    for event in greeting(&engine).await {
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }
    loop {
        tokio::select! {
            envelope = events.recv() => match envelope {
                Ok(envelope) => {
                    let mine = match envelope.recipient {
                        Recipient::All => true,
                        Recipient::User(id) => user_id == Some(id),
                    };
                    if mine && send_event(&mut sender, &envelope.event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "slow websocket consumer dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let replies = handle_command(&engine, &mut user_id, &text).await;
                    let mut closed = false;
                    for event in replies {
                        if send_event(&mut sender, &event).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive error");
                    break;
                }
            },
        }
    }
    debug!(?user_id, "websocket disconnected");
}

/// A rejected bet is reported on the same `betResult` channel as a
/// settled one, carrying the error form instead of an outcome.
fn bet_rejection(error: &EngineError) -> EngineEvent {
    EngineEvent::BetResult {
        body: BetResultBody::Err {
            error: error.to_string(),
            code: error.code().to_string(),
        },
    }
}

/// Context pushed to every fresh connection: the current round phase
/// (`pending` before the first round opens) and the standings.
async fn greeting(engine: &Arc<RoundEngine>) -> Vec<EngineEvent> {
    let snapshot = engine.snapshot().await;
    let mut events = vec![
        EngineEvent::RoundState {
            id: snapshot.round_id,
            state: snapshot.state,
            remaining: snapshot.remaining_ms,
            duration: snapshot.duration_ms,
        },
        EngineEvent::RoundStats {
            stats: snapshot.stats,
        },
    ];
    match engine.leaderboard().await {
        Ok(players) => events.push(EngineEvent::Leaderboard { players }),
        Err(e) => warn!(error = %e, "failed to load leaderboard for new connection"),
    }
    events
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &EngineEvent,
) -> std::result::Result<(), ()> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await.map_err(|_| ()),
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            Ok(())
        }
    }
}

/// Apply one client command, returning the direct replies for this
/// socket. Fan-out events go through the engine's broadcast channel.
async fn handle_command(
    engine: &Arc<RoundEngine>,
    user_id: &mut Option<UserId>,
    text: &str,
) -> Vec<EngineEvent> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "unparseable client message");
            return vec![EngineEvent::Error {
                message: "unrecognized message".to_string(),
            }];
        }
    };

    match command {
        ClientCommand::RequestLogin { username } => {
            let name = username
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| format!("guest-{}", &Uuid::new_v4().simple().to_string()[..8]));
            let user = match engine.store().create_user(name.trim()).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(error = %e, "login failed");
                    return vec![EngineEvent::Error {
                        message: e.to_string(),
                    }];
                }
            };
            info!(user_id = user.id, username = %user.username, "user logged in");
            *user_id = Some(user.id);

            let mut replies = vec![EngineEvent::UserData {
                id: user.id,
                username: user.username.clone(),
                chips: user.chips,
                rating: user.rating,
                credit_eligible: engine.credit_eligible(&user),
            }];
            // Refresh the round context alongside the identity.
            replies.extend(greeting(engine).await);
            replies
        }
        ClientCommand::PlaceBet {
            round_id,
            amount,
            side,
        } => {
            let Some(id) = *user_id else {
                return vec![bet_rejection(&EngineError::Unauthenticated)];
            };
            // Fractional stakes are floored to whole chips; zero and
            // below then fail the engine's amount validation.
            let amount = amount.floor() as i64;
            match engine.place_bet(id, &round_id, amount, &side).await {
                // Acceptance events arrive through the broadcast stream.
                Ok(_) => Vec::new(),
                Err(e) => vec![bet_rejection(&e)],
            }
        }
        ClientCommand::RequestCredit { needed } => {
            let Some(id) = *user_id else {
                return vec![EngineEvent::CreditResult {
                    body: CreditResultBody::Denied {
                        error: EngineError::Unauthenticated.to_string(),
                        code: EngineError::Unauthenticated.code().to_string(),
                    },
                }];
            };
            match engine.request_credit(id, needed).await {
                Ok((user, grant)) => vec![EngineEvent::CreditResult {
                    body: CreditResultBody::Granted {
                        success: true,
                        grant,
                        new_chips: user.chips,
                    },
                }],
                Err(e) => vec![EngineEvent::CreditResult {
                    body: CreditResultBody::Denied {
                        error: e.to_string(),
                        code: e.code().to_string(),
                    },
                }],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::{MemoryStore, UserStore};
    use crate::types::RoundState;

    async fn engine_with_login() -> (Arc<RoundEngine>, Option<UserId>) {
        let store: Arc<dyn UserStore> = Arc::new(MemoryStore::new(100, 1_000));
        let user = store.create_user("player").await.unwrap();
        (RoundEngine::new(EngineConfig::default(), store), Some(user.id))
    }

    fn as_json(event: &EngineEvent) -> serde_json::Value {
        serde_json::to_value(event).unwrap()
    }

    #[tokio::test]
    async fn test_rejected_bet_replies_on_bet_result_channel() {
        let (engine, mut user_id) = engine_with_login().await;
        let raw = format!(
            r#"{{"type":"placeBet","roundId":"{}","amount":10,"side":"red"}}"#,
            Uuid::new_v4()
        );

        let replies = handle_command(&engine, &mut user_id, &raw).await;
        assert_eq!(replies.len(), 1);
        let json = as_json(&replies[0]);
        assert_eq!(json["type"], "betResult");
        assert_eq!(json["code"], "round_not_open");
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_unauthenticated_bet_rejected_on_bet_result_channel() {
        let (engine, _) = engine_with_login().await;
        let mut anonymous: Option<UserId> = None;
        let raw = format!(
            r#"{{"type":"placeBet","roundId":"{}","amount":10,"side":"red"}}"#,
            Uuid::new_v4()
        );

        let replies = handle_command(&engine, &mut anonymous, &raw).await;
        let json = as_json(&replies[0]);
        assert_eq!(json["type"], "betResult");
        assert_eq!(json["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_fractional_amount_is_floored_not_dropped() {
        let (engine, mut user_id) = engine_with_login().await;

        // Parses as a command: the rejection names the round, not the
        // message format.
        let raw = format!(
            r#"{{"type":"placeBet","roundId":"{}","amount":50.5,"side":"red"}}"#,
            Uuid::new_v4()
        );
        let replies = handle_command(&engine, &mut user_id, &raw).await;
        let json = as_json(&replies[0]);
        assert_eq!(json["type"], "betResult");
        assert_eq!(json["code"], "round_not_open");

        // Flooring 0.5 leaves no whole chip to stake.
        let raw = format!(
            r#"{{"type":"placeBet","roundId":"{}","amount":0.5,"side":"red"}}"#,
            Uuid::new_v4()
        );
        let replies = handle_command(&engine, &mut user_id, &raw).await;
        let json = as_json(&replies[0]);
        assert_eq!(json["type"], "betResult");
        assert_eq!(json["code"], "invalid_amount");
    }

    #[tokio::test]
    async fn test_greeting_reports_pending_before_first_round() {
        let (engine, _) = engine_with_login().await;
        let events = greeting(&engine).await;

        let json = as_json(&events[0]);
        assert_eq!(json["type"], "roundState");
        assert_eq!(json["state"], "pending");
        assert_eq!(json["remaining"], 0);
        assert_eq!(as_json(&events[1])["type"], "roundStats");
        assert_eq!(as_json(&events[2])["type"], "leaderboard");
    }

    #[tokio::test]
    async fn test_login_binds_identity_and_replays_context() {
        let (engine, _) = engine_with_login().await;
        let mut user_id: Option<UserId> = None;

        let raw = r#"{"type":"requestLogin","username":"alice"}"#;
        let replies = handle_command(&engine, &mut user_id, raw).await;
        assert!(user_id.is_some());

        let json = as_json(&replies[0]);
        assert_eq!(json["type"], "userData");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["chips"], 100);
        assert_eq!(as_json(&replies[1])["type"], "roundState");
    }

    #[test]
    fn test_pending_state_serializes_lowercase() {
        let json = serde_json::to_value(RoundState::Pending).unwrap();
        assert_eq!(json, "pending");
    }
}
