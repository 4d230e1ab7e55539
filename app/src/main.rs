use std::path::PathBuf;

use clap::Parser;
use devproxy_core::telemetry;
use devproxy_core::version::BuildInfo;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Use config from bytes
	#[arg(short, long, value_name = "config")]
	config: Option<String>,

	/// Use config from file
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Print version (as a simple version string)
	#[arg(short = 'V', value_name = "version")]
	version_short: bool,

	/// Print version (as JSON)
	#[arg(long = "version")]
	version_long: bool,
}

fn main() -> anyhow::Result<()> {
	let _log_flush = telemetry::setup_logging();

	let args = Args::parse();
	let Args { config, file, version_short, version_long } = args;

	if version_short {
		println!("{}", BuildInfo::new().version);
		return Ok(());
	}
	if version_long {
		println!("{}", BuildInfo::new());
		return Ok(());
	}

	tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async move {
		let contents = match (config, file) {
			(Some(_), Some(_)) => anyhow::bail!("only one of --config or --file"),
			(Some(config), None) => Some(config),
			(None, Some(file)) => Some(fs_err::read_to_string(&file)?),
			(None, None) => None,
		};

		let cfg = devproxy::config::parse_config(contents)?;
		info!("version: {}", BuildInfo::new());
		info!(listen_addr = %cfg.listen_addr, "starting devproxy control plane");
		devproxy::app::run(cfg).await?.wait_termination().await
	})
}
