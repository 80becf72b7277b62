// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `loom-cohorts`: inspect and drive the persisted cohort and event-queue
//! state of one app.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use loom_cohorts::{CohortEngine, CohortsClient, CohortsConfig, CohortsConfigLayer, QueuedEvent};
use loom_cohorts_core::{CohortCriteria, EventProperties, InMemoryEventHistory, PropertyValue, SignalSnapshot};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "loom-cohorts", version, about, long_about = None)]
struct Args {
	/// Config file (defaults to the user config directory)
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Backend base URL
	#[arg(long)]
	base_url: Option<String>,

	/// App key used for namespacing and authentication
	#[arg(long)]
	app_key: Option<String>,

	/// Directory holding persisted state
	#[arg(long)]
	storage_dir: Option<PathBuf>,

	/// Enable debug logging
	#[arg(short, long)]
	verbose: bool,

	/// Emit logs as JSON
	#[arg(long)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show the cached rule set
	Rules {
		/// Fetch from the server even if the cache is fresh
		#[arg(long)]
		refresh: bool,
	},

	/// Compute the ranked cohort list
	Evaluate {
		/// Signal snapshot JSON to evaluate instead of the stored signals
		#[arg(long)]
		signals: Option<PathBuf>,

		/// Event history JSON (array of {name, properties, occurred_at})
		#[arg(long)]
		history: Option<PathBuf>,
	},

	/// Manage app-defined cohorts
	Custom {
		#[command(subcommand)]
		command: CustomCommand,
	},

	/// Show event queue statistics
	QueueStats,

	/// Queue an analytics event
	Enqueue {
		name: String,

		/// Event id (generated when omitted)
		#[arg(long)]
		id: Option<String>,

		/// Event property, repeatable
		#[arg(long = "property", short = 'p', value_name = "KEY=VALUE", value_parser = parse_property)]
		properties: Vec<(String, PropertyValue)>,
	},

	/// Deliver pending events now
	Flush {
		/// Seconds to wait for connectivity before giving up
		#[arg(long, default_value = "10")]
		wait_secs: u64,
	},

	/// Drop every pending event
	ClearQueue,
}

#[derive(Subcommand, Debug)]
enum CustomCommand {
	/// List registered cohort ids
	List,

	/// Register criteria from a JSON file (one object or an array)
	Register { file: PathBuf },

	/// Remove a registered cohort
	Unregister { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_tracing(args.verbose, args.json_logs);

	let overrides = CohortsConfigLayer {
		base_url: args.base_url.clone(),
		app_key: args.app_key.clone(),
		storage_dir: args.storage_dir.clone(),
		..Default::default()
	};
	let config =
		CohortsConfig::load(args.config.as_deref(), overrides).context("Failed to load configuration")?;
	debug!(config = ?config, "configuration loaded");

	let client = CohortsClient::from_config(config).context("Failed to initialize cohorts client")?;
	run(&client, args.command).await
}

async fn run(client: &CohortsClient, command: Command) -> Result<()> {
	match command {
		Command::Rules { refresh } => {
			let app_key = client.engine().app_key();
			let rules = client.engine().rules();
			if refresh {
				rules.invalidate(app_key).await;
			}
			let rule_set = if refresh || !rules.is_fresh(app_key).await {
				Some(rules.load(app_key).await?)
			} else {
				rules.current(app_key).await
			};
			match rule_set {
				Some(rule_set) => print_json(&rule_set)?,
				None => println!("no cached rule set"),
			}
		}

		Command::Evaluate { signals, history } => {
			let history: InMemoryEventHistory = match history {
				Some(path) => read_json(&path)?,
				None => InMemoryEventHistory::new(),
			};
			let cohorts = match signals {
				Some(path) => {
					let snapshot: SignalSnapshot = read_json(&path)?;
					let engine = CohortEngine::new(
						client.config().app_key.clone(),
						client.config().engine.clone(),
						Arc::new(snapshot),
						client.engine().rules().clone(),
						client.engine().registry().clone(),
					);
					engine.cohorts(&history).await
				}
				None => client.cohorts(&history).await,
			};
			print_json(&cohorts)?;
		}

		Command::Custom { command } => run_custom(client, command).await?,

		Command::QueueStats => print_json(&client.queue().stats().await)?,

		Command::Enqueue { name, id, properties } => {
			let mut event = QueuedEvent::new(name);
			if let Some(id) = id {
				event = event.with_id(id);
			}
			if !properties.is_empty() {
				event = event.with_properties(properties.into_iter().collect::<EventProperties>());
			}
			let event_id = event.id.clone();
			if client.track_event(event).await? {
				println!("{event_id}");
			} else {
				println!("{event_id} already queued");
			}
		}

		Command::Flush { wait_secs } => {
			let connectivity = client.connectivity();
			connectivity.start().await;
			let connected = connectivity.wait_for_connection(Duration::from_secs(wait_secs)).await;
			connectivity.stop().await;
			if !connected {
				bail!("no connectivity after {wait_secs}s; events remain queued");
			}
			let outcome = client.queue().flush().await;
			info!(sent = outcome.sent, failed = outcome.failed, "flush finished");
			print_json(&outcome)?;
		}

		Command::ClearQueue => {
			client.queue().clear().await;
		}
	}

	client.queue().stop().await;
	Ok(())
}

async fn run_custom(client: &CohortsClient, command: CustomCommand) -> Result<()> {
	let engine = client.engine();
	match command {
		CustomCommand::List => print_json(&engine.registry().list().await)?,
		CustomCommand::Register { file } => {
			let value: serde_json::Value = read_json(&file)?;
			let list: Vec<CohortCriteria> = if value.is_array() {
				serde_json::from_value(value)?
			} else {
				vec![serde_json::from_value(value)?]
			};
			let count = list.len();
			engine.registry().register_many(list).await?;
			println!("registered {count} cohort(s)");
		}
		CustomCommand::Unregister { id } => {
			if !engine.unregister_custom(&id).await {
				bail!("cohort '{id}' is not registered");
			}
			println!("unregistered {id}");
		}
	}
	Ok(())
}

/// Parses `key=value`, inferring bool, integer, then float, else string.
fn parse_property(raw: &str) -> Result<(String, PropertyValue), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
	let key = key.trim();
	if key.is_empty() {
		return Err(format!("empty property name in '{raw}'"));
	}

	let value = value.trim();
	let value = if let Ok(b) = value.parse::<bool>() {
		PropertyValue::Bool(b)
	} else if let Ok(i) = value.parse::<i64>() {
		PropertyValue::Int(i)
	} else if let Ok(f) = value.parse::<f64>() {
		PropertyValue::Double(f)
	} else {
		PropertyValue::String(value.to_string())
	};
	Ok((key.to_string(), value))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
	let content =
		std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
	serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
	let default_level = if verbose { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(format!(
			"loom_cohorts={default_level},loom_cli_cohorts={default_level},warn"
		))
	});

	if json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().with_writer(std::io::stderr))
			.init();
	}
}
