//! Wire protocol: newline-delimited JSON envelopes.
//!
//! Every line on the wire is exactly one JSON object. Requests share a
//! single envelope shape (`type`, `seq`, optional `token`, optional
//! `payload`); the payload's exact shape depends on `type` and is
//! parsed on demand by the dispatcher rather than baked into one big
//! tagged enum, since `seq`/`token` are common to all of them. Outbound
//! traffic is either a `ResponseEnvelope` (one per request) or a
//! `Notification` (zero or more, unsolicited).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChallengeId, Color, MatchId, MatchResult, MatchSummary, TimerSnapshot, UserId, UserProfile};

/// Maximum size, in bytes, of a single newline-delimited frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// A request as received from a client, before its payload is parsed.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    /// Request name, e.g. `"find_match"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Client-assigned correlation id, echoed back on the matching response.
    pub seq: u64,
    /// Bearer token, required by every request except `register`/`login`.
    #[serde(default)]
    pub token: Option<String>,
    /// Request-specific payload, parsed by the dispatcher once `kind` is known.
    #[serde(default)]
    pub payload: Option<Value>,
}

/// A response to a single request.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    /// Always `"response"` or `"error"`.
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Echoes the request's `seq`.
    pub seq: u64,
    /// Whether the request succeeded.
    pub success: bool,
    /// Human-readable outcome description.
    pub message: String,
    /// Result payload, present on success for requests that return data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ResponseEnvelope {
    /// Build a successful response with no payload.
    pub fn ok(seq: u64) -> Self {
        Self {
            kind: ResponseKind::Response,
            seq,
            success: true,
            message: "ok".to_string(),
            payload: None,
        }
    }

    /// Build a successful response carrying `payload`.
    pub fn ok_with(seq: u64, payload: Value) -> Self {
        Self {
            kind: ResponseKind::Response,
            seq,
            success: true,
            message: "ok".to_string(),
            payload: Some(payload),
        }
    }

    /// Build an error response.
    pub fn error(seq: u64, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            seq,
            success: false,
            message: message.into(),
            payload: None,
        }
    }
}

/// Discriminant for `ResponseEnvelope`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Successful outcome.
    Response,
    /// Failed outcome.
    Error,
}

/// Unsolicited server-to-client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The ready list changed.
    ReadyListUpdate {
        /// Usernames currently ready.
        usernames: Vec<String>,
    },
    /// The open-room list changed.
    RoomsUpdate {
        /// Currently open rooms.
        rooms: Vec<RoomSummary>,
    },
    /// A second player joined the recipient's room.
    RoomGuestJoined {
        /// Room code.
        room_code: String,
        /// Guest's username.
        guest: String,
    },
    /// The guest left the recipient's room.
    RoomGuestLeft {
        /// Room code.
        room_code: String,
    },
    /// The host closed the room.
    RoomClosed {
        /// Room code.
        room_code: String,
    },
    /// Matchmaking paired the recipient with an opponent.
    MatchFound {
        /// New match identifier.
        match_id: MatchId,
        /// Opponent's username.
        opponent: String,
        /// Color the recipient plays.
        color: Color,
        /// Whether the match is rated.
        rated: bool,
    },
    /// A match is beginning (sent to players and any initial spectators).
    MatchStart {
        /// Match identifier.
        match_id: MatchId,
        /// Red player's username.
        red: String,
        /// Black player's username.
        black: String,
        /// Starting clock, per side, in milliseconds.
        initial_clock_ms: u64,
    },
    /// The opponent made a move.
    OpponentMove {
        /// Match identifier.
        match_id: MatchId,
        /// Source square.
        from: (u8, u8),
        /// Destination square.
        to: (u8, u8),
        /// Mover's remaining clock after the debit.
        clock_ms_after: u64,
    },
    /// A match concluded.
    GameEnd {
        /// Match identifier.
        match_id: MatchId,
        /// Final result.
        result: MatchResult,
        /// Reason the match ended.
        reason: crate::types::EndReason,
        /// Red's rating after this result, for rated matches.
        red_rating: Option<i32>,
        /// Black's rating after this result, for rated matches.
        black_rating: Option<i32>,
    },
    /// A draw was offered or a prior offer was declined.
    DrawOffer {
        /// Match identifier.
        match_id: MatchId,
        /// Username of the offering (or declining) side.
        from: String,
        /// `true` for a new offer, `false` for a decline of the recipient's offer.
        offered: bool,
    },
    /// Someone issued a direct challenge to the recipient.
    ChallengeReceived {
        /// Challenge identifier.
        challenge_id: ChallengeId,
        /// Challenger's username.
        from: String,
        /// Whether the resulting match would be rated.
        rated: bool,
    },
    /// A challenge was declined by its recipient.
    ChallengeDeclined {
        /// Challenge identifier.
        challenge_id: ChallengeId,
        /// Decliner's username.
        from: String,
    },
    /// The recipient's opponent requested a rematch.
    RematchRequest {
        /// Identifier of the match that just ended.
        match_id: MatchId,
        /// Requester's username.
        from: String,
    },
    /// A rematch request was declined.
    RematchDeclined {
        /// Identifier of the match that just ended.
        match_id: MatchId,
    },
    /// A chat line, scoped to a match or the lobby.
    ChatMessage {
        /// Sender's username, or `"system"` for server-originated lines.
        from: String,
        /// Message body.
        message: String,
    },
}

/// Public view of an open room, used in `RoomsUpdate` and `get_rooms`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    /// Room code.
    pub room_code: String,
    /// Display name chosen by the host.
    pub name: String,
    /// Host's username.
    pub host: String,
    /// Whether a password is required to join.
    pub has_password: bool,
}

// ---------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------

/// Payload for `register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPayload {
    /// Desired username.
    pub username: String,
    /// Caller-hashed credential.
    pub password_hash: String,
}

/// Payload for `login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginPayload {
    /// Account username.
    pub username: String,
    /// Caller-hashed credential.
    pub password_hash: String,
}

/// Payload for `set_ready`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetReadyPayload {
    /// Whether to join (`true`) or leave (`false`) the ready list.
    pub ready: bool,
}

/// Matchmaking pool requested by `find_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingMode {
    /// Unrated, no rating tolerance window.
    Random,
    /// Rated, paired within the configured rating tolerance.
    Rated,
}

/// Payload for `find_match`.
#[derive(Debug, Clone, Deserialize)]
pub struct FindMatchPayload {
    /// Which matchmaking pool to join.
    pub mode: MatchmakingMode,
}

impl FindMatchPayload {
    /// Whether this request asks for rated (rating-aware) matchmaking.
    pub fn rated(&self) -> bool {
        self.mode == MatchmakingMode::Rated
    }
}

/// Payload for `move`.
#[derive(Debug, Clone, Deserialize)]
pub struct MovePayload {
    /// Match to move in.
    pub match_id: MatchId,
    /// Source square.
    pub from: (u8, u8),
    /// Destination square.
    pub to: (u8, u8),
}

/// Payload for `resign`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResignPayload {
    /// Match to resign from.
    pub match_id: MatchId,
}

/// Payload for `draw_offer`.
#[derive(Debug, Clone, Deserialize)]
pub struct DrawOfferPayload {
    /// Match to offer a draw in.
    pub match_id: MatchId,
}

/// Payload for `draw_response`.
#[derive(Debug, Clone, Deserialize)]
pub struct DrawResponsePayload {
    /// Match the offer was made in.
    pub match_id: MatchId,
    /// Whether to accept the offer.
    pub accept: bool,
}

/// Payload for `challenge`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengePayload {
    /// Username to challenge.
    pub target_username: String,
    /// Whether the resulting match should be rated.
    #[serde(default)]
    pub rated: bool,
}

/// Payload for `challenge_response`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeResponsePayload {
    /// Challenge being responded to.
    pub challenge_id: ChallengeId,
    /// Whether to accept.
    pub accept: bool,
}

/// Payload for `get_match`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetMatchPayload {
    /// Match to describe.
    pub match_id: MatchId,
}

/// Payload for `join_match` (spectator entry point distinct from `join_spectate`
/// in that it also succeeds for a match's own players reconnecting).
#[derive(Debug, Clone, Deserialize)]
pub struct JoinMatchPayload {
    /// Match to join.
    pub match_id: MatchId,
}

/// Payload for `leaderboard`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardPayload {
    /// Maximum rows to return.
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Payload for `chat_message`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessagePayload {
    /// If set, the message is scoped to this match; otherwise it is a
    /// lobby-wide broadcast to the ready list.
    #[serde(default)]
    pub match_id: Option<MatchId>,
    /// Message body.
    pub message: String,
}

/// Payload for `create_room`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomPayload {
    /// Display name for the room.
    pub name: String,
    /// Optional join password.
    #[serde(default)]
    pub password: Option<String>,
    /// Whether the eventual match should be rated.
    #[serde(default)]
    pub rated: bool,
}

/// Payload for `join_room`.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomPayload {
    /// Room code to join.
    pub room_code: String,
    /// Password, if the room requires one.
    #[serde(default)]
    pub password: Option<String>,
}

/// Payload for `leave_room`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveRoomPayload {
    /// Room code to leave.
    pub room_code: String,
}

/// Payload for `start_room_game`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRoomGamePayload {
    /// Room code to start.
    pub room_code: String,
}

/// Payload for `rematch_request`.
#[derive(Debug, Clone, Deserialize)]
pub struct RematchRequestPayload {
    /// The match that just ended.
    pub match_id: MatchId,
}

/// Payload for `rematch_response`.
#[derive(Debug, Clone, Deserialize)]
pub struct RematchResponsePayload {
    /// The match that just ended.
    pub match_id: MatchId,
    /// Whether to accept the rematch.
    pub accept: bool,
}

/// Payload for `match_history`.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchHistoryPayload {
    /// Maximum rows to return.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Rows to skip, for pagination.
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Payload for `join_spectate`.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinSpectatePayload {
    /// Match to spectate.
    pub match_id: MatchId,
}

/// Payload for `leave_spectate`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveSpectatePayload {
    /// Match to stop spectating.
    pub match_id: MatchId,
}

/// Payload for `get_profile`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetProfilePayload {
    /// Account to describe; defaults to the caller.
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Payload for `get_timer`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTimerPayload {
    /// Match to describe.
    pub match_id: MatchId,
}

/// Response payload for `leaderboard`.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    /// Username.
    pub username: String,
    /// Current rating.
    pub rating: i32,
}

/// Response payload for `match_history`.
pub type MatchHistoryResponse = Vec<MatchSummary>;

/// Response payload for `get_profile`.
pub type GetProfileResponse = UserProfile;

/// Response payload for `get_timer`.
pub type GetTimerResponse = TimerSnapshot;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_envelope_parses_minimal_request() {
        let line = r#"{"type":"heartbeat","seq":1,"token":"abc"}"#;
        let envelope: InboundEnvelope = serde_json::from_str(line).unwrap();
        assert_eq!(envelope.kind, "heartbeat");
        assert_eq!(envelope.seq, 1);
        assert_eq!(envelope.token.as_deref(), Some("abc"));
        assert!(envelope.payload.is_none());
    }

    #[test]
    fn move_payload_parses_from_nested_value() {
        let envelope: InboundEnvelope = serde_json::from_str(
            r#"{"type":"move","seq":2,"token":"abc","payload":{"match_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","from":[0,0],"to":[0,1]}}"#,
        )
        .unwrap();
        let payload: MovePayload = serde_json::from_value(envelope.payload.unwrap()).unwrap();
        assert_eq!(payload.from, (0, 0));
        assert_eq!(payload.to, (0, 1));
    }

    #[test]
    fn response_envelope_serializes_error_without_payload_field() {
        let response = ResponseEnvelope::error(7, "not your turn");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["success"], false);
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn notification_tags_match_snake_case_names() {
        let notification = Notification::RoomClosed {
            room_code: "ABCD1234".into(),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "room_closed");
        assert_eq!(json["room_code"], "ABCD1234");
    }

    #[test]
    fn find_match_payload_parses_mode_string() {
        let payload: FindMatchPayload = serde_json::from_str(r#"{"mode":"rated"}"#).unwrap();
        assert!(payload.rated());

        let payload: FindMatchPayload = serde_json::from_str(r#"{"mode":"random"}"#).unwrap();
        assert!(!payload.rated());
    }

    #[test]
    fn game_end_carries_ratings_and_wire_end_reason_strings() {
        let notification = Notification::GameEnd {
            match_id: uuid::Uuid::nil(),
            result: MatchResult::BlackWins,
            reason: crate::types::EndReason::Resignation,
            red_rating: Some(1184),
            black_rating: Some(1216),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["reason"], "resign");
        assert_eq!(json["red_rating"], 1184);
        assert_eq!(json["black_rating"], 1216);

        let agreed = crate::types::EndReason::DrawAgreed;
        assert_eq!(serde_json::to_value(agreed).unwrap(), "agreement");
    }
}
