// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-level middleware: per-IP+path rate limiting and panic recovery.

use std::any::Any;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::{error, warn};

use crate::config::RateLimitConfig;
use crate::error::ApiError;

type LimiterKey = (IpAddr, String);

/// Keyed token bucket: `requests` per `window` for each client IP and path.
pub struct RequestLimiter {
    limiter: DefaultKeyedRateLimiter<LimiterKey>,
}

impl RequestLimiter {
    /// `None` when limiting is disabled or the quota is degenerate.
    pub fn from_config(config: &RateLimitConfig) -> Option<Arc<Self>> {
        if !config.enabled {
            return None;
        }
        let burst = NonZeroU32::new(config.requests)?;
        let quota = Quota::with_period(config.window / config.requests)?.allow_burst(burst);
        Some(Arc::new(Self {
            limiter: RateLimiter::keyed(quota),
        }))
    }

    pub fn check(&self, ip: IpAddr, path: &str) -> bool {
        self.limiter.check_key(&(ip, path.to_string())).is_ok()
    }

    /// Drop state of keys whose bucket has refilled.
    pub fn housekeeping(&self) {
        self.limiter.retain_recent();
    }
}

/// Peer address, or the first `X-Forwarded-For` hop when no socket
/// address is attached (tests, some proxies).
fn client_ip(request: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn rate_limit(State(limiter): State<Arc<RequestLimiter>>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    if !limiter.check(ip, request.uri().path()) {
        warn!(%ip, path = %request.uri().path(), "Rate limit exceeded");
        return ApiError::rate_limited().into_response();
    }
    next.run(request).await
}

/// `CatchPanicLayer` handler: log and answer with the `Unexpected` envelope.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    error!(panic = detail, "Handler panicked");
    ApiError::internal().into_response()
}
