//! Xeno library synchronization driver.
//!
//! Resolves library references, fetches their declarations and registers them
//! into an in-process declaration namespace, reporting per-library outcomes.
//! With `--stdin`, every line is a desired-state event reconciled against the
//! same session, so later events only fetch and register what changed.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};
use xeno_libsync::adapter::{AdapterSet, DeclarationNamespace};
use xeno_libsync::cache::ContentCache;
use xeno_libsync::config::{ConfigError, ConfigOverrides, SyncConfig};
use xeno_libsync::resolve::Resolver;
use xeno_libsync::store::DirStore;
use xeno_libsync::transport::HttpTransport;
use xeno_libsync::{DesiredState, LibraryEvent, LibraryEventReceiver, LibrarySession};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let cli = Cli::parse();

	setup_tracing(cli.verbose);

	let config = load_config(cli.config.as_deref())?;
	info!(cdn = %config.cdn_root, timeout = ?config.fetch_timeout, "Loaded library sync configuration");

	let mut cache = ContentCache::new(Arc::new(HttpTransport::new(config.fetch_timeout)));
	if !cli.no_store
		&& let Some(dir) = cli.cache_dir.clone().or_else(default_cache_dir)
	{
		match DirStore::open(&dir) {
			Ok(store) => {
				info!(path = %store.root().display(), "Persisting declarations");
				cache = cache.with_store(Arc::new(store));
			}
			Err(e) => warn!(path = %dir.display(), error = %e, "Declaration store unavailable, continuing in memory"),
		}
	}

	let namespace = Arc::new(DeclarationNamespace::new());
	let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
	let session = Arc::new(
		LibrarySession::new(Arc::new(cache), AdapterSet::in_namespace(&namespace), Resolver::new(config)).with_events(tx),
	);
	let printer = tokio::spawn(print_events(rx));

	let mut passes = JoinSet::new();
	if cli.stdin {
		let mut lines = BufReader::new(tokio::io::stdin()).lines();
		while let Some(line) = lines.next_line().await? {
			if line.trim().is_empty() {
				continue;
			}
			let request: DesiredState = match serde_json::from_str(&line) {
				Ok(request) => request,
				Err(e) => {
					eprintln!("invalid event: {e}");
					continue;
				}
			};
			// A variant switch mid-stream rebinds the session instead of rejecting.
			match session.rebind(&request) {
				Ok(outcomes) => {
					for locator in outcomes.removed() {
						println!("removed {locator}");
					}
					passes.spawn(outcomes.settle());
				}
				Err(e) => eprintln!("rejected event: {e}"),
			}
		}
	} else {
		let request = DesiredState {
			references: cli.references.clone(),
			language_variant: cli.variant.clone(),
			surface_kind: cli.surface.clone(),
		};
		passes.spawn(session.apply(&request)?.settle());
	}

	let mut failures = 0;
	while let Some(report) = passes.join_next().await {
		failures += report?.failed.len();
	}

	let active = session.active_locators();
	println!("active {} libraries ({} declarations live)", active.len(), namespace.len());
	for locator in &active {
		println!("  {locator}");
	}
	if failures > 0 {
		warn!(failures, "Some libraries could not be registered");
	}

	drop(session);
	let _ = printer.await;
	Ok(())
}

/// Prints user-visible outcomes as they arrive.
async fn print_events(mut rx: LibraryEventReceiver) {
	while let Some(event) = rx.recv().await {
		match event {
			LibraryEvent::Registered { locator } => println!("registered {locator}"),
			LibraryEvent::RegistrationFailed { locator, error } => println!("failed {locator}: {error}"),
			LibraryEvent::Discarded { .. } => {}
		}
	}
}

/// Defaults, then the user config file, then `--config`.
fn load_config(path: Option<&std::path::Path>) -> Result<SyncConfig, ConfigError> {
	let mut config = SyncConfig::default();
	if let Some(user) = dirs::config_dir().map(|d| d.join("xeno").join("libsync.kdl"))
		&& user.is_file()
	{
		config.merge(ConfigOverrides::load(&user)?);
	}
	if let Some(path) = path {
		config.merge(ConfigOverrides::load(path)?);
	}
	Ok(config)
}

fn default_cache_dir() -> Option<PathBuf> {
	dirs::cache_dir().map(|d| d.join("xeno").join("libsync"))
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("xeno_libsync=debug,info")
			} else {
				EnvFilter::new("xeno_libsync=info,warn")
			}
		})
	};

	// Support XENO_LOG_DIR for smoke testing
	if let Some(log_dir) = std::env::var("XENO_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("xeno-libsync.{}.log", std::process::id()));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_target(true);

			tracing_subscriber::registry().with(filter()).with(file_layer).init();

			tracing::info!(path = ?log_path, "Library sync tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_env_filter(filter())
		.with_writer(std::io::stderr)
		.init();
}
