use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use msgqueue_engine::{
    config::{AbandonedIntakePolicy, Config},
    pipeline::reclaim_abandoned,
    queue::{Direction, EntryId, EntryState},
    relay::relay_message_type,
    state::{EntryFilter, QueueStore, SledQueueStore},
};
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mq-admin")]
#[command(about = "Message queue engine administration", long_about = None)]
struct Cli {
    /// Daemon HTTP endpoint
    #[arg(short, long, default_value = "http://localhost:8080", env = "MQE_ENDPOINT")]
    endpoint: String,

    /// Queue database path; defaults to the configured state path.
    /// The daemon must be stopped before opening its database.
    #[arg(short, long, env = "MQE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check daemon health
    Health,

    /// Show hosted services with status and backlog
    Services,

    /// Run every pipeline of every service now
    Tick,

    /// Queue a JSON document on a relay
    Enqueue {
        #[arg(value_name = "RELAY")]
        relay: String,

        /// JSON body
        #[arg(short, long)]
        body: String,

        /// outbound or inbound
        #[arg(short = 'D', long, default_value = "outbound")]
        direction: Direction,
    },

    /// Count stored entries per direction and state
    Stats {
        /// Only entries of this relay
        #[arg(short, long)]
        relay: Option<String>,
    },

    /// List stored entries
    List {
        #[arg(short, long)]
        relay: Option<String>,

        #[arg(short = 'D', long)]
        direction: Option<Direction>,

        #[arg(short, long)]
        state: Option<EntryState>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Make a failed entry eligible for processing again
    Requeue {
        #[arg(value_name = "ENTRY_ID")]
        id: u64,
    },

    /// Resolve intake rows left unconfirmed by a crash
    Reclaim {
        /// Minimum age in seconds; defaults to the configured grace period
        #[arg(short, long)]
        grace_secs: Option<u64>,

        /// Delete the rows instead of promoting them
        #[arg(long)]
        discard: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Services => {
            let response = client
                .get(format!("{}/v1/services", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Tick => {
            let response = client
                .post(format!("{}/v1/services/run", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Enqueue {
            relay,
            body,
            direction,
        } => {
            let body: serde_json::Value =
                serde_json::from_str(&body).context("Body is not valid JSON")?;
            let response = client
                .post(format!("{}/v1/relays/{}/{}", cli.endpoint, relay, direction))
                .json(&json!({ "body": body }))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Stats { relay } => {
            let (store, _) = open_store(cli.data_dir)?;
            let base = type_filter(relay.as_deref());

            println!("{:<10} {:<20} {:>10}", "DIRECTION", "STATE", "COUNT");
            for direction in [Direction::Outbound, Direction::Inbound] {
                for state in [
                    EntryState::NotProcessed,
                    EntryState::Repeat,
                    EntryState::IntermediateAdded,
                    EntryState::Complete,
                    EntryState::Error,
                ] {
                    let filter = base.clone().direction(direction).states([state]);
                    let count = store.count(&filter).await?;
                    if count > 0 {
                        println!("{:<10} {:<20} {:>10}", direction, state, count);
                    }
                }
            }
        }

        Commands::List {
            relay,
            direction,
            state,
            limit,
        } => {
            let (store, _) = open_store(cli.data_dir)?;
            let mut filter = type_filter(relay.as_deref()).limit(limit);
            if let Some(direction) = direction {
                filter = filter.direction(direction);
            }
            if let Some(state) = state {
                filter = filter.states([state]);
            }

            for entry in store.query(&filter).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }

        Commands::Requeue { id } => {
            let (store, _) = open_store(cli.data_dir)?;
            let Some(mut entry) = store.get(EntryId::new(id)).await? else {
                bail!("Entry {} not found", id);
            };
            if entry.state != EntryState::Error {
                bail!("Entry {} is {}, only failed entries can be requeued", id, entry.state);
            }

            entry.reset();
            store.save(&entry).await?;
            println!("Entry {} requeued", id);
        }

        Commands::Reclaim {
            grace_secs,
            discard,
        } => {
            let (store, config) = open_store(cli.data_dir)?;
            let grace = grace_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.engine.settings().intermediate_grace);
            let policy = if discard {
                AbandonedIntakePolicy::Discard
            } else {
                config.engine.abandoned_intake_policy
            };

            let stats = reclaim_abandoned(&store, None, grace, policy).await?;
            println!(
                "Reclaimed {} entries ({} promoted, {} discarded)",
                stats.total(),
                stats.promoted,
                stats.discarded
            );
        }
    }

    Ok(())
}

fn open_store(data_dir: Option<PathBuf>) -> anyhow::Result<(SledQueueStore, Config)> {
    let config = Config::load().context("Failed to load configuration")?;
    let path = data_dir
        .or_else(|| config.state.path.clone())
        .context("No queue database path configured")?;

    let store = SledQueueStore::new(&path)
        .with_context(|| format!("Failed to open queue database at {}", path.display()))?;
    Ok((store, config))
}

fn type_filter(relay: Option<&str>) -> EntryFilter {
    match relay {
        Some(name) => EntryFilter::for_type(relay_message_type(name)),
        None => EntryFilter::default(),
    }
}

async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        bail!("Request failed with HTTP {}", status);
    }
    Ok(())
}
