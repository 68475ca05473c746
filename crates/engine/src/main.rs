//! Macro execution worker binary.
//!
//! Started by the host with a correlation id, the host pid and the host
//! version. Connects to the host's channel and serves script requests until
//! told to stop.

#![cfg_attr(test, allow(unused_crate_dependencies))]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mexec_engine::config::WorkerConfig;
use mexec_engine::ipc::Channel;
use mexec_engine::resolver::{self, HostInstallResolver};
use mexec_engine::session::{self, SessionOptions, SessionParts};
use mexec_nu::{EngineOptions, HostContext, NuEngine};
use uuid::Uuid;
use {dirs as _, libloading as _, mexec_proto as _, serde as _, sysinfo as _, thiserror as _, toml as _, tracing_subscriber as _};

/// Worker command line arguments.
#[derive(Parser, Debug)]
#[command(name = "mexec-engine")]
#[command(about = "Runs host-submitted macros over a private channel")]
struct Args {
	/// Identifier of the host's channel
	#[arg(value_name = "CORRELATION_ID")]
	correlation_id: Uuid,

	/// Process id of the host
	#[arg(value_name = "HOST_PID")]
	host_pid: u32,

	/// Host version string
	#[arg(value_name = "HOST_VERSION")]
	host_version: String,

	/// Configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	mexec_engine::logging::setup_tracing("mexec-engine", args.verbose);

	tracing::info!(
		correlation = %args.correlation_id,
		host_pid = args.host_pid,
		host_version = %args.host_version,
		"starting mexec-engine"
	);

	let config = WorkerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
	let socket_path = config.channel_path(args.correlation_id);

	let channel = Channel::connect(&socket_path)?;

	let options = SessionOptions {
		max_script_bytes: config.max_script_bytes,
	};
	let resolver = HostInstallResolver::new(args.host_pid, config.dependency_dir.clone());
	let host = HostContext {
		pid: args.host_pid,
		version: args.host_version,
	};
	let engine_options = EngineOptions {
		recursion_limit: config.recursion_limit,
	};
	let dependencies = config.dependencies;

	let handle = session::spawn(channel, options, move || {
		let dependencies = resolver::preload(&resolver, &dependencies, &host.version)?;
		let engine = NuEngine::new(host, &engine_options)?;
		Ok(SessionParts { engine, dependencies })
	})
	.context("failed to spawn session thread")?;

	let end = handle
		.join()
		.map_err(|_| anyhow::anyhow!("session thread panicked"))?;
	tracing::info!(?end, "mexec-engine exiting");
	Ok(())
}
