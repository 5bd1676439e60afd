use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netscope")]
#[command(about = "Start, cancel and follow network discovery sessions")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (defaults to <config dir>/netscope/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// API root, overriding the config file
	#[arg(long, global = true, value_name = "URL")]
	pub server: Option<String>,

	/// Poll for updates instead of subscribing to the event stream
	#[arg(long, global = true)]
	pub polling: bool,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start discovery on a daemon
	Discover {
		daemon_id: String,
		/// Follow progress until the session finishes
		#[arg(long)]
		watch: bool,
	},

	/// Cancel a running discovery session
	Cancel { session_id: String },

	/// List active discovery sessions as JSON
	Active,

	/// Follow every active session until none remain
	Watch,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn global_flags_apply_after_subcommand() {
		let cli = Cli::try_parse_from(["netscope", "discover", "daemon-1", "--watch", "--polling", "-vv"]).unwrap();
		assert_eq!(cli.verbose, 2);
		assert!(cli.polling);
		assert!(matches!(cli.command, Commands::Discover { ref daemon_id, watch: true } if daemon_id == "daemon-1"));
	}

	#[test]
	fn cancel_requires_session_id() {
		assert!(Cli::try_parse_from(["netscope", "cancel"]).is_err());
	}
}
