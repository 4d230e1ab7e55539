//! Process-level startup configuration.
//!
//! Grounded in the teacher's `agentgateway::config::parse_config`: environment variables
//! override an optional YAML file, which overrides a built-in default. Parsed once at startup;
//! the result is validated then held behind `Arc` for the life of the process.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Startup configuration for the control plane, assembled by [`parse_config`].
#[derive(Debug, Clone)]
pub struct AppConfig {
	/// Directory containing app-owned route snippets.
	pub snippets_dir: PathBuf,
	/// Directory containing operator-owned override snippets.
	pub overrides_dir: PathBuf,
	/// Directory the commit pipeline writes the composed artifact and resolution store into.
	pub state_dir: PathBuf,
	/// Bind address for the Control API.
	pub listen_addr: SocketAddr,
	/// Base URL of the tunnel/admin endpoint used by the external URL resolver (C7).
	pub tunnel_admin_url: Option<String>,
	/// Interval between health-scanner sweeps.
	pub probe_period: Duration,
	/// Max concurrent outbound health probes per sweep.
	pub scan_concurrency: usize,
	/// Minimum spacing between healing attempts on the same route.
	pub heal_cooldown: Duration,
	/// Max strategies attempted per healing episode.
	pub heal_max_strategies: usize,
	/// Secret used to sign session tokens minted by `/auth/login`.
	pub session_secret: String,
	/// Lifetime of a minted session token.
	pub session_ttl: Duration,
	/// `"pretty"` or `"json"`; mirrors the teacher's log-format knob.
	pub log_format: String,
	/// Shell command validating a staged artifact; `None` runs with [`crate::dataplane::NullDataplane`].
	pub dataplane_validate_command: Option<String>,
	/// Shell command reloading the dataplane from its active path.
	pub dataplane_reload_command: Option<String>,
	/// Shell command driving a headless-browser audit; `None` runs with [`crate::auditor::NullAuditor`].
	pub auditor_command: Option<String>,
}

/// Raw, partially-specified configuration as read from an optional YAML file. Every field is
/// optional; environment variables take precedence over whatever is set here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
	snippets_dir: Option<PathBuf>,
	overrides_dir: Option<PathBuf>,
	state_dir: Option<PathBuf>,
	listen_addr: Option<String>,
	tunnel_admin_url: Option<String>,
	probe_period_secs: Option<u64>,
	scan_concurrency: Option<usize>,
	heal_cooldown_secs: Option<u64>,
	heal_max_strategies: Option<usize>,
	session_secret: Option<String>,
	session_ttl_secs: Option<u64>,
	log_format: Option<String>,
	dataplane_validate_command: Option<String>,
	dataplane_reload_command: Option<String>,
	auditor_command: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("invalid config file: {0}")]
	Yaml(#[from] serde_yaml::Error),
	#[error("invalid env var {name}={value} ({reason})")]
	Env { name: &'static str, value: String, reason: String },
	#[error("{field} must be set via config file or {env} environment variable")]
	Missing { field: &'static str, env: &'static str },
}

/// Parses startup configuration: `contents` (if present) is an optional YAML file, layered
/// under environment variables, layered under built-in defaults.
pub fn parse_config(contents: Option<String>) -> Result<AppConfig, ConfigError> {
	let raw: RawConfig = match contents {
		Some(text) => serde_yaml::from_str(&text)?,
		None => RawConfig::default(),
	};

	let snippets_dir = parse::<PathBuf>("DEVPROXY_SNIPPETS_DIR")?
		.or(raw.snippets_dir)
		.unwrap_or_else(|| PathBuf::from("./snippets"));
	let overrides_dir = parse::<PathBuf>("DEVPROXY_OVERRIDES_DIR")?
		.or(raw.overrides_dir)
		.unwrap_or_else(|| PathBuf::from("./overrides"));
	let state_dir = parse::<PathBuf>("DEVPROXY_STATE_DIR")?
		.or(raw.state_dir)
		.unwrap_or_else(|| PathBuf::from("./state"));

	let listen_addr_str = parse::<String>("DEVPROXY_LISTEN_ADDR")?
		.or(raw.listen_addr)
		.unwrap_or_else(|| "127.0.0.1:9900".to_string());
	let listen_addr = listen_addr_str
		.parse::<SocketAddr>()
		.map_err(|e| ConfigError::Env { name: "DEVPROXY_LISTEN_ADDR", value: listen_addr_str, reason: e.to_string() })?;

	let tunnel_admin_url = parse::<String>("DEVPROXY_TUNNEL_ADMIN_URL")?.or(raw.tunnel_admin_url);

	let probe_period = Duration::from_secs(
		parse::<u64>("DEVPROXY_PROBE_PERIOD_SECS")?.or(raw.probe_period_secs).unwrap_or(30),
	);
	let scan_concurrency = parse::<usize>("DEVPROXY_SCAN_CONCURRENCY")?.or(raw.scan_concurrency).unwrap_or(8);
	let heal_cooldown = Duration::from_secs(
		parse::<u64>("DEVPROXY_HEAL_COOLDOWN_SECS")?.or(raw.heal_cooldown_secs).unwrap_or(300),
	);
	let heal_max_strategies = parse::<usize>("DEVPROXY_HEAL_MAX_STRATEGIES")?.or(raw.heal_max_strategies).unwrap_or(3);

	let session_secret = parse::<String>("DEVPROXY_SESSION_SECRET")?
		.or(raw.session_secret)
		.ok_or(ConfigError::Missing { field: "session_secret", env: "DEVPROXY_SESSION_SECRET" })?;
	let session_ttl =
		Duration::from_secs(parse::<u64>("DEVPROXY_SESSION_TTL_SECS")?.or(raw.session_ttl_secs).unwrap_or(3600 * 12));

	let log_format = parse::<String>("DEVPROXY_LOG_FORMAT")?.or(raw.log_format).unwrap_or_else(|| "pretty".to_string());

	let dataplane_validate_command = parse::<String>("DEVPROXY_DATAPLANE_VALIDATE_COMMAND")?.or(raw.dataplane_validate_command);
	let dataplane_reload_command = parse::<String>("DEVPROXY_DATAPLANE_RELOAD_COMMAND")?.or(raw.dataplane_reload_command);
	let auditor_command = parse::<String>("DEVPROXY_AUDITOR_COMMAND")?.or(raw.auditor_command);

	Ok(AppConfig {
		snippets_dir,
		overrides_dir,
		state_dir,
		listen_addr,
		tunnel_admin_url,
		probe_period,
		scan_concurrency,
		heal_cooldown,
		heal_max_strategies,
		session_secret,
		session_ttl,
		log_format,
		dataplane_validate_command,
		dataplane_reload_command,
		auditor_command,
	})
}

fn parse<T: FromStr>(env: &'static str) -> Result<Option<T>, ConfigError>
where
	<T as FromStr>::Err: ToString,
{
	match env::var(env) {
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|e: <T as FromStr>::Err| ConfigError::Env { name: env, value: val, reason: e.to_string() }),
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_apply_when_secret_provided_via_yaml() {
		let yaml = "sessionSecret: test-secret\n".to_string();
		let cfg = parse_config(Some(yaml)).unwrap();
		assert_eq!(cfg.snippets_dir, PathBuf::from("./snippets"));
		assert_eq!(cfg.scan_concurrency, 8);
		assert_eq!(cfg.session_secret, "test-secret");
	}

	#[test]
	fn missing_session_secret_is_an_error() {
		let err = parse_config(None).unwrap_err();
		assert!(matches!(err, ConfigError::Missing { field: "session_secret", .. }));
	}

	#[test]
	fn yaml_values_are_overridden_by_env() {
		let yaml = "sessionSecret: test-secret\nscanConcurrency: 4\n".to_string();
		env::set_var("DEVPROXY_SCAN_CONCURRENCY", "16");
		let cfg = parse_config(Some(yaml)).unwrap();
		env::remove_var("DEVPROXY_SCAN_CONCURRENCY");
		assert_eq!(cfg.scan_concurrency, 16);
	}
}
