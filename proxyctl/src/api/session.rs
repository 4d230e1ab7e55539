//! Session minting and verification for mutating Control API routes. A login request exchanges
//! the configured password for an opaque bearer token, carried thereafter as a cookie. Sessions
//! live in memory only — restarting the control plane logs everyone out, which is acceptable for
//! a local development tool.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ApiError;

pub const SESSION_COOKIE: &str = "devproxy_session";

/// An opaque bearer token minted by `/auth/login`. Mutating Control API routes require a live,
/// non-expired session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
	pub token: String,
	pub issued_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
	secret: String,
	ttl: Duration,
	live: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
	pub fn new(secret: String, ttl: Duration) -> Self {
		Self { secret, ttl, live: Mutex::new(HashMap::new()) }
	}

	pub fn login(&self, password: &str) -> Result<Session, ApiError> {
		if password != self.secret {
			return Err(ApiError::AuthFailed);
		}
		let token: String = {
			let mut rng = rand::thread_rng();
			(0..32).map(|_| char::from(rng.sample(rand::distributions::Alphanumeric))).collect()
		};
		let now = Utc::now();
		let session = Session { token: token.clone(), issued_at: now, expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(12)) };
		self.live.lock().insert(token, session.clone());
		Ok(session)
	}

	pub fn logout(&self, token: &str) {
		self.live.lock().remove(token);
	}

	pub fn verify(&self, token: &str) -> bool {
		let mut live = self.live.lock();
		match live.get(token) {
			Some(session) if session.expires_at > Utc::now() => true,
			Some(_) => {
				live.remove(token);
				false
			},
			None => false,
		}
	}
}

pub fn session_cookie(session: &Session) -> Cookie<'static> {
	Cookie::build((SESSION_COOKIE, session.token.clone())).http_only(true).path("/").build()
}

/// `tower`/axum middleware enforcing a live session on mutating routes, rather than
/// re-implementing the check per handler.
pub async fn require_session<B>(State(store): State<std::sync::Arc<SessionStore>>, jar: CookieJar, request: Request<B>, next: Next) -> Result<Response, ApiError>
where
	B: Send + 'static,
{
	let token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()).ok_or(ApiError::AuthFailed)?;
	if !store.verify(&token) {
		return Err(ApiError::AuthFailed);
	}
	Ok(next.run(request).await)
}
