use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "xeno-libsync")]
#[command(about = "Synchronize declaration libraries into the analysis engine")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Library references (`@types/<pkg>`, `dt~<pkg>` or a `.d.ts` path)
	pub references: Vec<String>,

	/// Editing surface kind (general, restricted)
	#[arg(long, short = 's', default_value = "general")]
	pub surface: String,

	/// Language variant (javascript, typescript)
	#[arg(long, short = 'l', default_value = "typescript")]
	pub variant: String,

	/// Read newline-delimited JSON desired-state events from stdin
	#[arg(long, conflicts_with = "references")]
	pub stdin: bool,

	/// Configuration file layered over `$XDG_CONFIG_HOME/xeno/libsync.kdl`
	#[arg(long, short = 'c', value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Directory for persisted declarations
	#[arg(long, value_name = "PATH", conflicts_with = "no_store")]
	pub cache_dir: Option<PathBuf>,

	/// Keep fetched declarations in memory only
	#[arg(long)]
	pub no_store: bool,

	/// Verbose logging
	#[arg(short, long)]
	pub verbose: bool,
}
