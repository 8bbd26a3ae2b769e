//! Request dispatch: maps an `InboundEnvelope`'s `kind` to the matching
//! `Core` method, parsing the type-specific payload on demand and
//! packaging the result back into a `ResponseEnvelope`.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::core::Core;
use crate::error::CoreError;
use crate::lobby::Room;
use crate::match_manager::Match;
use crate::presence::ConnectionId;
use crate::protocol::{
    ChallengePayload, ChallengeResponsePayload, ChatMessagePayload, CreateRoomPayload, DrawOfferPayload,
    DrawResponsePayload, FindMatchPayload, GetMatchPayload, GetProfilePayload, GetTimerPayload, InboundEnvelope,
    JoinMatchPayload, JoinRoomPayload, JoinSpectatePayload, LeaderboardPayload, LeaveRoomPayload,
    LeaveSpectatePayload, LoginPayload, MatchHistoryPayload, MovePayload, RegisterPayload, RematchRequestPayload,
    RematchResponsePayload, ResignPayload, ResponseEnvelope, SetReadyPayload, StartRoomGamePayload,
};
use crate::types::UserId;

/// Requests that do not require a bearer token.
const UNAUTHENTICATED: &[&str] = &["register", "login"];

/// Route one inbound envelope to the matching `Core` operation.
///
/// `conn_id` identifies the connection this request arrived on, used to
/// attach presence once a token is established. Authentication happens
/// here, once, for every request type that needs it; individual `Core`
/// methods take an already-resolved `UserId`.
pub async fn dispatch(core: &Core, conn_id: ConnectionId, envelope: InboundEnvelope) -> ResponseEnvelope {
    let seq = envelope.seq;

    if UNAUTHENTICATED.contains(&envelope.kind.as_str()) {
        return dispatch_unauthenticated(core, conn_id, envelope).await;
    }

    let token = match &envelope.token {
        Some(token) => token.clone(),
        None => return error_response(seq, CoreError::InvalidToken),
    };
    let user_id = match core.authenticate(&token).await {
        Ok(id) => id,
        Err(err) => return error_response(seq, err),
    };

    dispatch_authenticated(core, user_id, envelope).await
}

async fn dispatch_unauthenticated(core: &Core, conn_id: ConnectionId, envelope: InboundEnvelope) -> ResponseEnvelope {
    let seq = envelope.seq;
    match envelope.kind.as_str() {
        "register" => {
            let payload: RegisterPayload = match parse_payload(&envelope) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            match core.register(&payload.username, &payload.password_hash).await {
                Ok((user_id, token)) => {
                    core.presence.attach_user(conn_id, user_id).await;
                    ok_with(seq, serde_json::json!({ "user_id": user_id, "token": token }))
                }
                Err(err) => error_response(seq, err),
            }
        }
        "login" => {
            let payload: LoginPayload = match parse_payload(&envelope) {
                Ok(p) => p,
                Err(resp) => return resp,
            };
            match core.login(&payload.username, &payload.password_hash).await {
                Ok((user_id, token)) => {
                    core.presence.attach_user(conn_id, user_id).await;
                    ok_with(seq, serde_json::json!({ "user_id": user_id, "token": token }))
                }
                Err(err) => error_response(seq, err),
            }
        }
        other => {
            warn!(kind = other, "unauthenticated request for an authenticated-only type");
            error_response(seq, CoreError::InvalidToken)
        }
    }
}

async fn dispatch_authenticated(core: &Core, user_id: UserId, envelope: InboundEnvelope) -> ResponseEnvelope {
    let seq = envelope.seq;
    macro_rules! payload {
        ($ty:ty) => {
            match parse_payload::<$ty>(&envelope) {
                Ok(p) => p,
                Err(resp) => return resp,
            }
        };
    }

    match envelope.kind.as_str() {
        "logout" => {
            let token = envelope.token.as_deref().unwrap_or_default();
            respond_ok(seq, core.logout(token).await)
        }
        "heartbeat" => {
            let token = envelope.token.as_deref().unwrap_or_default();
            respond_ok(seq, core.touch_session(token).await)
        }
        "set_ready" => {
            let p = payload!(SetReadyPayload);
            let result = async {
                let profile = core.get_profile(user_id, None).await?;
                core.set_ready(user_id, profile.username, profile.rating, p.ready).await
            }
            .await;
            respond_ok(seq, result)
        }
        "find_match" => {
            let p = payload!(FindMatchPayload);
            let result = async {
                let profile = core.get_profile(user_id, None).await?;
                core.find_match(user_id, profile.username, profile.rating, p.rated()).await
            }
            .await;
            match result {
                Ok(true) => ok(seq),
                Ok(false) => ok_with(seq, serde_json::json!({ "status": "queued" })),
                Err(err) => error_response(seq, err),
            }
        }
        "move" => {
            let p = payload!(MovePayload);
            let result = core.make_move(p.match_id, user_id, p.from, p.to).await;
            respond(seq, result.map(|outcome| MoveAck { clock_ms_after: outcome.clock_ms_after }))
        }
        "resign" => {
            let p = payload!(ResignPayload);
            respond_ok(seq, core.resign(p.match_id, user_id).await)
        }
        "draw_offer" => {
            let p = payload!(DrawOfferPayload);
            respond_ok(seq, core.offer_draw(p.match_id, user_id).await)
        }
        "draw_response" => {
            let p = payload!(DrawResponsePayload);
            respond_ok(seq, core.respond_draw(p.match_id, user_id, p.accept).await)
        }
        "challenge" => {
            let p = payload!(ChallengePayload);
            let result = async {
                let profile = core.get_profile(user_id, None).await?;
                core.challenge(user_id, profile.username, &p.target_username, p.rated).await
            }
            .await;
            respond(seq, result.map(|c| serde_json::json!({ "challenge_id": c.id })))
        }
        "challenge_response" => {
            let p = payload!(ChallengeResponsePayload);
            let result = if p.accept {
                core.accept_challenge(p.challenge_id, user_id).await.map(|_| ())
            } else {
                core.decline_challenge(p.challenge_id, user_id).await
            };
            respond_ok(seq, result)
        }
        "get_match" => {
            let p = payload!(GetMatchPayload);
            match core.get_match(p.match_id).await {
                Ok(m) => ok_with(seq, match_to_json(&m)),
                Err(err) => error_response(seq, err),
            }
        }
        "join_match" => {
            let p = payload!(JoinMatchPayload);
            respond_ok(seq, core.join_spectate(p.match_id, user_id).await)
        }
        "leaderboard" => {
            let p = payload!(LeaderboardPayload);
            respond(seq, core.leaderboard(p.limit.unwrap_or(10)).await)
        }
        "chat_message" => {
            let p = payload!(ChatMessagePayload);
            let result = async {
                let profile = core.get_profile(user_id, None).await?;
                core.chat_message(profile.username, p.match_id, p.message).await
            }
            .await;
            respond_ok(seq, result)
        }
        "create_room" => {
            let p = payload!(CreateRoomPayload);
            let result = async {
                let profile = core.get_profile(user_id, None).await?;
                core.create_room(user_id, profile.username, p.name, p.password, p.rated).await
            }
            .await;
            match result {
                Ok(room) => ok_with(seq, room_to_json(&room)),
                Err(err) => error_response(seq, err),
            }
        }
        "join_room" => {
            let p = payload!(JoinRoomPayload);
            let result = async {
                let profile = core.get_profile(user_id, None).await?;
                core.join_room(&p.room_code, user_id, profile.username, p.password.as_deref()).await
            }
            .await;
            match result {
                Ok(room) => ok_with(seq, room_to_json(&room)),
                Err(err) => error_response(seq, err),
            }
        }
        "leave_room" => {
            let p = payload!(LeaveRoomPayload);
            match core.leave_room(&p.room_code, user_id).await {
                Ok(room) => ok_with(seq, room_to_json(&room)),
                Err(err) => error_response(seq, err),
            }
        }
        "get_rooms" => {
            let rooms: Vec<Value> = core.get_rooms().await.iter().map(room_to_json).collect();
            ok_with(seq, Value::Array(rooms))
        }
        "start_room_game" => {
            let p = payload!(StartRoomGamePayload);
            match core.start_room_game(&p.room_code, user_id).await {
                Ok(m) => ok_with(seq, match_to_json(&m)),
                Err(err) => error_response(seq, err),
            }
        }
        "rematch_request" => {
            let p = payload!(RematchRequestPayload);
            respond_ok(seq, core.request_rematch(p.match_id, user_id).await)
        }
        "rematch_response" => {
            let p = payload!(RematchResponsePayload);
            respond_ok(seq, core.respond_rematch(p.match_id, user_id, p.accept).await)
        }
        "match_history" => {
            let p = payload!(MatchHistoryPayload);
            respond(seq, core.match_history(user_id, p.limit.unwrap_or(20), p.offset.unwrap_or(0)).await)
        }
        "get_live_matches" => ok_with(seq, serde_json::to_value(core.get_live_matches().await).unwrap()),
        "join_spectate" => {
            let p = payload!(JoinSpectatePayload);
            respond_ok(seq, core.join_spectate(p.match_id, user_id).await)
        }
        "leave_spectate" => {
            let p = payload!(LeaveSpectatePayload);
            respond_ok(seq, core.leave_spectate(p.match_id, user_id).await)
        }
        "get_profile" => {
            let p = payload!(GetProfilePayload);
            respond(seq, core.get_profile(user_id, p.user_id).await)
        }
        "get_timer" => {
            let p = payload!(GetTimerPayload);
            respond(seq, core.get_timer(p.match_id).await)
        }
        other => {
            warn!(kind = other, "unknown request type");
            error_response(seq, CoreError::ProtocolViolation)
        }
    }
}

#[derive(Serialize)]
struct MoveAck {
    clock_ms_after: u64,
}

/// `Match` carries an `Instant` that has no meaningful wire
/// representation, so the response view is built by hand instead of
/// deriving `Serialize` on the live struct.
fn match_to_json(m: &Match) -> Value {
    serde_json::json!({
        "match_id": m.id,
        "red": m.red,
        "red_username": m.red_username,
        "black": m.black,
        "black_username": m.black_username,
        "rated": m.rated,
        "current_turn": m.current_turn,
        "moves": m.moves,
        "red_clock_ms": m.red_clock_ms,
        "black_clock_ms": m.black_clock_ms,
        "active": m.active,
        "result": m.result,
        "end_reason": m.end_reason,
        "spectator_count": m.spectators.len(),
    })
}

fn room_to_json(r: &Room) -> Value {
    serde_json::json!({
        "room_code": r.code,
        "name": r.name,
        "host": r.host_username,
        "guest": r.guest_username,
        "has_password": r.password.is_some(),
        "rated": r.rated,
        "state": format!("{:?}", r.state).to_lowercase(),
    })
}

fn parse_payload<T: serde::de::DeserializeOwned>(envelope: &InboundEnvelope) -> Result<T, ResponseEnvelope> {
    let value = envelope.payload.clone().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|_| error_response(envelope.seq, CoreError::ProtocolViolation))
}

fn ok(seq: u64) -> ResponseEnvelope {
    ResponseEnvelope::ok(seq)
}

fn ok_with(seq: u64, payload: Value) -> ResponseEnvelope {
    ResponseEnvelope::ok_with(seq, payload)
}

fn error_response(seq: u64, err: CoreError) -> ResponseEnvelope {
    ResponseEnvelope::error(seq, err.message())
}

/// Build a response from a handler that returns data worth echoing back.
fn respond<T: Serialize>(seq: u64, result: Result<T, CoreError>) -> ResponseEnvelope {
    match result {
        Ok(value) => ok_with(seq, serde_json::to_value(value).unwrap()),
        Err(err) => error_response(seq, err),
    }
}

/// Build a response from a handler whose success carries no payload.
fn respond_ok(seq: u64, result: Result<(), CoreError>) -> ResponseEnvelope {
    match result {
        Ok(()) => ok(seq),
        Err(err) => error_response(seq, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::repo::InMemoryRepository;
    use std::sync::Arc;

    fn core() -> Core {
        Core::new(ServerConfig::default(), Arc::new(InMemoryRepository::new()))
    }

    fn envelope(kind: &str, seq: u64, token: Option<&str>, payload: Option<Value>) -> InboundEnvelope {
        InboundEnvelope {
            kind: kind.to_string(),
            seq,
            token: token.map(|t| t.to_string()),
            payload,
        }
    }

    #[tokio::test]
    async fn register_then_authenticated_request_round_trip() {
        let core = core();
        let resp = dispatch(
            &core,
            1,
            envelope(
                "register",
                1,
                None,
                Some(serde_json::json!({ "username": "alice", "password_hash": "hash" })),
            ),
        )
        .await;
        assert!(resp.success);
        let token = resp.payload.unwrap()["token"].as_str().unwrap().to_string();

        let resp = dispatch(&core, 1, envelope("heartbeat", 2, Some(&token), None)).await;
        assert!(resp.success);
        assert_eq!(resp.seq, 2);
    }

    #[tokio::test]
    async fn missing_token_is_rejected_for_authenticated_requests() {
        let core = core();
        let resp = dispatch(&core, 1, envelope("heartbeat", 1, None, None)).await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn unknown_request_type_is_a_protocol_error() {
        let core = core();
        let resp = dispatch(
            &core,
            1,
            envelope(
                "register",
                1,
                None,
                Some(serde_json::json!({ "username": "bob", "password_hash": "hash" })),
            ),
        )
        .await;
        let token = resp.payload.unwrap()["token"].as_str().unwrap().to_string();

        let resp = dispatch(&core, 1, envelope("not_a_real_request", 2, Some(&token), None)).await;
        assert!(!resp.success);
    }
}
