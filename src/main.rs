use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use vanopticon_collab::observability::init_observability;
use vanopticon_collab::sync::{
	ConflictResolver, Operation, ResolutionStrategy, SyncManager, SyncOptions, deserialize_message,
};
use vanopticon_collab::config;

#[derive(Parser)]
#[command(name = "collab", about = "Collab - canvas operation sync and conflict resolution")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Resolve a local operation against a remote one and print the outcome
	Resolve {
		/// JSON file holding the local operation
		#[arg(long)]
		local: PathBuf,
		/// JSON file holding the remote operation
		#[arg(long)]
		remote: PathBuf,
		/// Resolution strategy (defaults to the configured one)
		#[arg(long)]
		strategy: Option<ResolutionStrategy>,
	},
	/// Feed an NDJSON file of inbound messages through a sync session
	Replay {
		file: PathBuf,
		/// Session user id (defaults to the configured one)
		#[arg(long)]
		user: Option<String>,
		/// Board the session is on
		#[arg(long, default_value = "default")]
		board: String,
	},
	/// Print the effective settings
	Config,
}

fn read_operation(path: &PathBuf) -> anyhow::Result<Operation> {
	let raw = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read {}", path.display()))?;
	serde_json::from_str(&raw).with_context(|| format!("{} is not a valid operation", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config, using defaults: {}", e);
			config::Settings::default()
		}
	};
	let observability = init_observability(settings.log_level.to_level_filter())?;

	match cli.command {
		Commands::Resolve {
			local,
			remote,
			strategy,
		} => {
			let local = read_operation(&local)?;
			let remote = read_operation(&remote)?;
			let resolver = ConflictResolver::new(strategy.unwrap_or(settings.strategy));

			let resolution = resolver.resolve(&local, &remote);
			println!("{}", serde_json::to_string_pretty(&resolution)?);
		}
		Commands::Replay { file, user, board } => {
			let options = SyncOptions::from_settings(&settings)
				.with_metrics(observability.metrics.clone());
			let manager = SyncManager::with_options(
				user.unwrap_or_else(|| settings.user_id.clone()),
				board,
				options,
			);

			let reader = std::io::BufReader::new(
				std::fs::File::open(&file)
					.with_context(|| format!("failed to open {}", file.display()))?,
			);
			for (number, line) in reader.lines().enumerate() {
				let line = line?;
				if line.trim().is_empty() {
					continue;
				}
				let Some(message) = deserialize_message(&line) else {
					log::warn!("Skipping undecodable line {}", number + 1);
					continue;
				};
				for operation in manager.handle_message(&message) {
					println!("{}", serde_json::to_string(&operation)?);
				}
			}

			log::debug!("Replay metrics:\n{}", observability.metrics.encode());
		}
		Commands::Config => {
			println!("{}", serde_json::to_string_pretty(&settings)?);
		}
	}

	Ok(())
}
