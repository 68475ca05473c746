//! Development host for `mexec-engine`.
//!
//! Plays the host side of the channel: binds a fresh correlation-keyed
//! socket, spawns the worker with this process as its host, submits one
//! script request, prints the reply and shuts the worker down.

#![cfg_attr(test, allow(unused_crate_dependencies))]

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mexec_engine::config::WorkerConfig;
use mexec_engine::host::HostListener;
use mexec_proto::{Packet, WorkerMessage};
use uuid::Uuid;
use {dirs as _, libloading as _, mexec_nu as _, serde as _, sysinfo as _, thiserror as _, toml as _, tracing_subscriber as _};

#[derive(Parser, Debug)]
#[command(name = "mexec-run")]
#[command(about = "Runs one macro through a mexec-engine worker")]
struct Args {
	/// Script file, or inline script source
	#[arg(value_name = "SCRIPT")]
	script: String,

	/// Number of times the script is invoked
	#[arg(short = 'n', long, default_value_t = 1)]
	iterations: i32,

	/// Worker binary; defaults to `mexec-engine` next to this executable
	#[arg(long, value_name = "PATH")]
	worker: Option<PathBuf>,

	/// Worker configuration file, also passed to the worker
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Seconds to wait for the worker to connect
	#[arg(long, default_value_t = 10)]
	connect_timeout: u64,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();
	mexec_engine::logging::setup_tracing("mexec-run", args.verbose);

	let worker = match args.worker {
		Some(path) => path,
		None => std::env::current_exe()
			.context("failed to locate current executable")?
			.with_file_name(format!("mexec-engine{}", std::env::consts::EXE_SUFFIX)),
	};

	let correlation = Uuid::new_v4();
	let config = WorkerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
	let socket_path = config.channel_path(correlation);
	let listener = HostListener::bind(&socket_path).with_context(|| format!("failed to bind {}", socket_path.display()))?;

	let mut child = Command::new(&worker)
		.arg(correlation.to_string())
		.arg(std::process::id().to_string())
		.arg(env!("CARGO_PKG_VERSION"))
		.args(args.config.iter().flat_map(|path| [OsStr::new("--config"), path.as_os_str()]))
		.args(args.verbose.then_some("--verbose"))
		.spawn()
		.with_context(|| format!("failed to spawn {}", worker.display()))?;

	let mut conn = listener
		.accept_timeout(Duration::from_secs(args.connect_timeout))
		.context("worker did not connect")?;

	let reply = conn.request(&Packet::script(args.script, args.iterations));
	let acknowledged = conn.shutdown();
	let status = child.wait().context("failed to wait for worker")?;
	tracing::debug!(acknowledged, %status, "mexec-run.worker_exited");

	let code = match reply.context("no reply from worker")? {
		WorkerMessage::Success => {
			println!("success");
			ExitCode::SUCCESS
		}
		WorkerMessage::ScriptError(report) => {
			println!("{report}");
			ExitCode::from(1)
		}
		WorkerMessage::HostFault(report) => {
			println!("{report}");
			ExitCode::from(2)
		}
		WorkerMessage::Shutdown => ExitCode::from(2),
	};
	Ok(code)
}
