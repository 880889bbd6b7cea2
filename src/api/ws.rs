// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Price stream over WebSocket.
//!
//! ```text
//! server → {"event":"connected","data":{"connection_id","server_time"},"timestamp"}
//! client → {"action":"subscribe","channel":"prices","symbols":["BTC","ETH"]}
//! server → {"event":"subscribed","data":{"channel":"prices","symbols":[..]},"timestamp"}
//! server → {"event":"price_update","data":PriceUpdate,"timestamp"}
//! client → {"action":"ping"}
//! server → {"event":"pong","data":{"server_time"},"timestamp"}
//! ```
//!
//! A new subscribe replaces the previous symbol set. Browsers cannot set
//! headers on the upgrade request, so the token may also come as `?token=`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use utoipa::IntoParams;

use crate::{
    auth::{AuthError, AuthenticatedUser},
    blockchain::Chain,
    pubsub::{price_channel, PriceMessage, PriceUpdate, Subscription},
    state::AppState,
};

pub const PRICES_CHANNEL: &str = "prices";

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WsAuthQuery {
    /// Bearer token, for clients that cannot send headers.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        channel: String,
        #[serde(default)]
        symbols: Vec<String>,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub event: &'static str,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    fn new(event: &'static str, data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            event,
            data,
            timestamp: now,
        }
    }

    pub fn connected(connection_id: &str, now: DateTime<Utc>) -> Self {
        Self::new(
            "connected",
            json!({ "connection_id": connection_id, "server_time": now }),
            now,
        )
    }

    pub fn pong(now: DateTime<Utc>) -> Self {
        Self::new("pong", json!({ "server_time": now }), now)
    }

    pub fn subscribed(symbols: &[String], now: DateTime<Utc>) -> Self {
        Self::new(
            "subscribed",
            json!({ "channel": PRICES_CHANNEL, "symbols": symbols }),
            now,
        )
    }

    pub fn price_update(update: &PriceUpdate, now: DateTime<Utc>) -> Self {
        Self::new("price_update", json!(update), now)
    }

    pub fn error(message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new("error", json!({ "message": message.into() }), now)
    }

    fn into_message(self) -> Option<Message> {
        serde_json::to_string(&self).ok().map(|text| Message::Text(text.into()))
    }
}

/// What the connection loop should do with a client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe(Vec<String>),
    Reply(ServerEvent),
}

/// Translate one client text frame.
pub fn interpret(text: &str, now: DateTime<Utc>) -> Command {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => return Command::Reply(ServerEvent::error(format!("invalid message: {e}"), now)),
    };
    match message {
        ClientMessage::Ping => Command::Reply(ServerEvent::pong(now)),
        ClientMessage::Subscribe { channel, .. } if channel != PRICES_CHANNEL => {
            Command::Reply(ServerEvent::error(format!("unknown channel '{channel}'"), now))
        }
        ClientMessage::Subscribe { symbols, .. } => {
            let mut normalized: Vec<String> = symbols.iter().map(|s| s.trim().to_uppercase()).collect();
            normalized.sort();
            normalized.dedup();
            if normalized.is_empty() {
                return Command::Reply(ServerEvent::error("at least one symbol is required", now));
            }
            if let Some(unknown) = normalized
                .iter()
                .find(|s| !Chain::ALL.iter().any(|c| c.symbol() == s.as_str()))
            {
                return Command::Reply(ServerEvent::error(format!("unknown symbol '{unknown}'"), now));
            }
            Command::Subscribe(normalized)
        }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap, query: &WsAuthQuery) -> Result<AuthenticatedUser, AuthError> {
    let token = match headers.get(AUTHORIZATION) {
        Some(value) => value
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidAuthHeader)?
            .to_string(),
        None => query.token.clone().ok_or(AuthError::MissingAuthHeader)?,
    };
    state.tokens.verify(&token)
}

/// Upgrade to the price stream.
#[utoipa::path(
    get,
    path = "/api/v1/ws/rates",
    tag = "Rates",
    params(WsAuthQuery),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn ws_rates(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
) -> Result<Response, AuthError> {
    let user = authenticate(&state, &headers, &query)?;
    Ok(ws.on_upgrade(move |socket| connection(socket, state, user)))
}

async fn next_price(subscription: &mut Option<Subscription<PriceMessage>>) -> Option<PriceMessage> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn connection(mut socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, user_id = %user.user_id, "WebSocket connected");

    let mut subscription: Option<Subscription<PriceMessage>> = None;
    let mut outbound = ServerEvent::connected(&connection_id, state.clock.now()).into_message();

    loop {
        if let Some(message) = outbound.take() {
            if socket.send(message).await.is_err() {
                break;
            }
        }

        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let now = state.clock.now();
                    outbound = match interpret(text.as_str(), now) {
                        Command::Subscribe(symbols) => {
                            if let Some(old) = subscription.take() {
                                state.prices.unsubscribe(old.id);
                            }
                            subscription = Some(state.prices.subscribe(symbols.iter().map(|s| price_channel(s))));
                            debug!(connection_id = %connection_id, symbols = ?symbols, "Price subscription replaced");
                            ServerEvent::subscribed(&symbols, now).into_message()
                        }
                        Command::Reply(event) => event.into_message(),
                    };
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            price = next_price(&mut subscription) => match price {
                Some(PriceMessage::Update(update)) => {
                    outbound = ServerEvent::price_update(&update, state.clock.now()).into_message();
                }
                Some(PriceMessage::Batch(_)) => {}
                None => subscription = None,
            },
        }
    }

    if let Some(sub) = subscription {
        state.prices.unsubscribe(sub.id);
    }
    info!(connection_id = %connection_id, "WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn ping_gets_pong() {
        match interpret(r#"{"action":"ping"}"#, now()) {
            Command::Reply(event) => {
                assert_eq!(event.event, "pong");
                assert_eq!(event.data["server_time"], json!(now()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn subscribe_normalizes_symbols() {
        let command = interpret(
            r#"{"action":"subscribe","channel":"prices","symbols":["eth","BTC","eth"]}"#,
            now(),
        );
        assert_eq!(command, Command::Subscribe(vec!["BTC".into(), "ETH".into()]));
    }

    #[test]
    fn bad_subscriptions_are_reported() {
        for text in [
            r#"{"action":"subscribe","channel":"trades","symbols":["BTC"]}"#,
            r#"{"action":"subscribe","channel":"prices","symbols":[]}"#,
            r#"{"action":"subscribe","channel":"prices","symbols":["DOGE"]}"#,
            r#"{"action":"dance"}"#,
            "not json",
        ] {
            match interpret(text, now()) {
                Command::Reply(event) => assert_eq!(event.event, "error", "{text}"),
                other => panic!("{text}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn connected_event_shape() {
        let value = serde_json::to_value(ServerEvent::connected("c1", now())).unwrap();
        assert_eq!(value["event"], "connected");
        assert_eq!(value["data"]["connection_id"], "c1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn price_update_frame_wraps_full_update() {
        let update = PriceUpdate {
            symbol: "BTC".into(),
            price_usd: rust_decimal_macros::dec!(64000.5),
            price_change_24h: rust_decimal_macros::dec!(-1.2),
            volume_24h: rust_decimal_macros::dec!(1000),
            timestamp: now(),
        };
        let value = serde_json::to_value(ServerEvent::price_update(&update, now())).unwrap();
        assert_eq!(value["event"], "price_update");
        assert_eq!(value["data"], serde_json::to_value(&update).unwrap());
        assert_eq!(value["data"]["price_usd"], "64000.5");
    }
}
