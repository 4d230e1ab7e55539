//! C7 — External URL Resolver.
//!
//! Queries a local tunnel admin endpoint for the current public HTTPS URL and caches it for 60
//! seconds. A failed or absent tunnel is not an error: the scanner simply skips external probes
//! until a URL is discovered. Also provides `translate` for turning an internal route path into
//! its externally-reachable form, used by the site-auditor adapter (C9).

use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedUrl {
	url: Option<String>,
	fetched_at: Instant,
}

/// Resolves and caches the tunnel's current public HTTPS URL.
pub struct TunnelResolver {
	admin_url: Option<String>,
	client: reqwest::Client,
	cache: Mutex<Option<CachedUrl>>,
}

impl TunnelResolver {
	pub fn new(admin_url: Option<String>) -> Self {
		Self { admin_url, client: reqwest::Client::new(), cache: Mutex::new(None) }
	}

	/// Returns the cached external URL if the cache is still fresh, otherwise re-queries the
	/// tunnel admin endpoint. Returns `None` if no tunnel is configured, unreachable, or its
	/// response has no public HTTPS URL — "not discovered" is never an error.
	pub async fn resolve(&self) -> Option<String> {
		if let Some(cached) = self.cached_if_fresh() {
			return cached;
		}

		let fresh = self.fetch().await;
		*self.cache.lock().expect("cache mutex never poisoned") = Some(CachedUrl { url: fresh.clone(), fetched_at: Instant::now() });
		fresh
	}

	fn cached_if_fresh(&self) -> Option<Option<String>> {
		let guard = self.cache.lock().expect("cache mutex never poisoned");
		match guard.as_ref() {
			Some(entry) if entry.fetched_at.elapsed() < CACHE_TTL => Some(entry.url.clone()),
			_ => None,
		}
	}

	async fn fetch(&self) -> Option<String> {
		let admin_url = self.admin_url.as_ref()?;
		let response = self.client.get(admin_url).timeout(Duration::from_secs(3)).send().await.ok()?;
		let body: serde_json::Value = response.json().await.ok()?;
		first_https_url(&body)
	}

	/// Rewrites `internal_url` (addressed at the local dataplane) into its externally-reachable
	/// form, for the site-auditor adapter.
	pub async fn translate(&self, internal_url: &str) -> Option<String> {
		let external_base = self.resolve().await?;
		let path = internal_url.splitn(4, '/').nth(3).map(|rest| format!("/{rest}")).unwrap_or_default();
		Some(format!("{}{}", external_base.trim_end_matches('/'), path))
	}
}

/// Walks a tunnel admin API's JSON response (shape varies by provider) looking for the first
/// string value that looks like a public HTTPS URL — shallow search over tunnel list endpoints
/// that commonly nest the interesting field under `tunnels[].public_url` or similar.
fn first_https_url(value: &serde_json::Value) -> Option<String> {
	match value {
		serde_json::Value::String(s) if s.starts_with("https://") => Some(s.clone()),
		serde_json::Value::Array(items) => items.iter().find_map(first_https_url),
		serde_json::Value::Object(map) => map.values().find_map(first_https_url),
		_ => None,
	}
}
