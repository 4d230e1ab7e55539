use std::env;
use std::str::FromStr;
use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, filter, reload};

pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);
static LOG_HANDLE: OnceCell<LogHandle> = OnceCell::new();

/// Initializes process-wide logging. Returns a guard that must be held for the life of the
/// process: dropping it flushes and stops the background writer.
pub fn setup_logging() -> tracing_appender::non_blocking::WorkerGuard {
	Lazy::force(&APPLICATION_START_TIME);
	let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
	let use_json = env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string()) == "json";

	let format = if use_json {
		tracing_subscriber::fmt::layer()
			.with_writer(non_blocking)
			.json()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(non_blocking)
			.with_ansi(false)
			.boxed()
	};
	let (layer, reload) = reload::Layer::new(format.with_filter(default_filter()));
	LOG_HANDLE
		.set(reload)
		.map_or_else(|_| warn!("logging was already initialized"), |_| {});

	tracing_subscriber::registry().with(layer).init();
	guard
}

fn default_filter() -> filter::Targets {
	let var = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
	filter::Targets::from_str(&var).expect("static filter should build")
}

/// Dynamically updates the logging level. If `reset` is set, the whole filter is replaced;
/// otherwise `level` is appended as an additional directive.
pub fn set_level(reset: bool, level: &str) -> Result<(), Error> {
	let Some(handle) = LOG_HANDLE.get() else {
		warn!("failed to get log handle");
		return Err(Error::Uninitialized);
	};
	let current = handle.with_current(|f| f.filter().to_string()).unwrap_or_default();
	let new_directive = if reset {
		if level.is_empty() { default_filter().to_string() } else { level.to_string() }
	} else {
		format!("{current},{level}")
	};
	let new_filter = filter::Targets::from_str(&new_directive)?;
	handle.modify(|layer| *layer.filter_mut() = new_filter)?;
	Ok(())
}

pub fn get_current_loglevel() -> Result<String, Error> {
	let handle = LOG_HANDLE.get().ok_or(Error::Uninitialized)?;
	Ok(handle.with_current(|f| f.filter().to_string())?)
}

type FilteredLayer = filter::Filtered<Box<dyn Layer<Registry> + Send + Sync>, filter::Targets, Registry>;
type LogHandle = reload::Handle<FilteredLayer, Registry>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("parse failure: {0}")]
	InvalidFilter(#[from] filter::ParseError),
	#[error("reload failure: {0}")]
	Reload(#[from] reload::Error),
	#[error("logging is not initialized")]
	Uninitialized,
}
