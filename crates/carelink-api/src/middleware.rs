use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode};

use carelink_types::actor::{Actor, StaffRole};
use carelink_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

pub const ALL_STAFF: &[StaffRole] = &[
    StaffRole::Admin,
    StaffRole::Clinician,
    StaffRole::Nurse,
    StaffRole::Staff,
];

/// Resolve the caller to exactly one `Actor` from the Bearer token and pass
/// it down as a request extension. Handlers never re-derive identity.
pub async fn resolve_actor(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer(req.headers()).ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    let actor = token_data.claims.into_actor().ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// Admin endpoints are gated by a static bearer token, not the JWT system.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer(req.headers()).ok_or(ApiError::Unauthorized)?;

    if state.admin_token.is_empty() || !ct_eq(token.as_bytes(), state.admin_token.as_bytes()) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(req).await)
}

/// Check that the caller is staff holding one of the allowed roles.
pub fn require_staff(actor: &Actor, allowed: &[StaffRole]) -> Result<(), ApiError> {
    match actor {
        Actor::Staff { .. } if actor.has_role(allowed) => Ok(()),
        _ => Err(ApiError::Forbidden),
    }
}

pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Constant-time byte comparison for the admin token.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Fixed-window rate limiter keyed by client IP, applied before business
/// logic runs.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit and report whether the caller is still within budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter lock poisoned");

        // keep the map from growing without bound
        if hits.len() > 4096 {
            let window = self.window;
            hits.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = hits.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // ConnectInfo is absent when the router is driven directly in tests
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if !limiter.check(ip) {
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(req).await)
}
