//! tetherctl: inspect and operate the tether store.
//!
//! Works directly on the SQLite store named by the shared configuration, so
//! it can run next to a live server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_client::{
    CacheTierManager, FetchClient, FetchConfig, LogNotifier, Network, NotificationDispatcher, QueueEntry,
    RetryPolicy, SyncCoordinator,
};
use tether_core::{AppConfig, CacheDb, TierInfo};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tetherctl")]
#[command(about = "Inspect and operate the tether cache tiers and offline queue")]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Offline mutation queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Cache tiers
    #[command(subcommand)]
    Tiers(TierCommand),
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum QueueCommand {
    /// List queued mutations in replay order
    List,
    /// Replay every eligible mutation now
    Replay,
    /// Make a parked or backed-off mutation eligible again
    Release { id: String },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum TierCommand {
    /// List every tier in the store
    List,
    /// Pre-populate the current static tier
    Install,
    /// Delete this application's tiers from previous versions
    Activate,
}

struct Workspace {
    config: AppConfig,
    db: CacheDb,
    network: Arc<dyn Network>,
}

impl Workspace {
    async fn open() -> Result<Self> {
        let config = AppConfig::load().context("failed to load configuration")?;
        let db = CacheDb::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open {}", config.db_path.display()))?;
        let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
        Ok(Self { config, db, network })
    }

    fn coordinator(&self) -> SyncCoordinator {
        let dispatcher = NotificationDispatcher::new(Arc::new(LogNotifier::new(0)));
        SyncCoordinator::new(self.db.clone(), self.network.clone(), dispatcher)
            .with_policy(RetryPolicy::from_config(&self.config))
    }

    fn tiers(&self) -> Result<CacheTierManager> {
        Ok(CacheTierManager::from_config(self.db.clone(), self.network.clone(), &self.config)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let workspace = Workspace::open().await?;
    run(&workspace, cli.command, cli.json).await
}

async fn run(workspace: &Workspace, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Queue(QueueCommand::List) => {
            let entries = workspace.coordinator().queue().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("queue is empty");
            } else {
                entries.iter().for_each(|entry| println!("{}", describe_entry(entry)));
            }
        }
        Command::Queue(QueueCommand::Replay) => {
            let report = workspace.coordinator().replay().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "synced {}, failed {}, deferred {}, parked {}",
                    report.synced.len(),
                    report.failed.len(),
                    report.deferred,
                    report.parked
                );
            }
        }
        Command::Queue(QueueCommand::Release { id }) => {
            if workspace.coordinator().release(&id).await? {
                println!("released {id}");
            } else {
                anyhow::bail!("{id} has no replay state to release");
            }
        }
        Command::Tiers(TierCommand::List) => {
            let tiers = workspace.db.list_tiers().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tiers)?);
            } else {
                tiers.iter().for_each(|tier| println!("{}", describe_tier(tier)));
            }
        }
        Command::Tiers(TierCommand::Install) => {
            let installed = workspace.tiers()?.initialize().await?;
            println!("installed {installed} assets");
        }
        Command::Tiers(TierCommand::Activate) => {
            let retired = workspace.tiers()?.cleanup().await?;
            if retired.is_empty() {
                println!("no tiers to retire");
            } else {
                retired.iter().for_each(|name| println!("retired {name}"));
            }
        }
    }
    Ok(())
}

fn describe_entry(entry: &QueueEntry) -> String {
    let mutation = &entry.mutation;
    let status = match &entry.replay {
        None => "pending".to_string(),
        Some(state) if state.parked => format!("parked after {} attempts", state.attempts),
        Some(state) => format!("retrying, {} failed attempts", state.attempts),
    };
    let mut line = format!("{}\t{} {}\t{}", mutation.id, mutation.method, mutation.url, status);
    if let Some(error) = entry.replay.as_ref().and_then(|state| state.last_error.as_deref()) {
        line.push_str(&format!("\t{error}"));
    }
    line
}

fn describe_tier(tier: &TierInfo) -> String {
    let owner = tier.app.as_deref().unwrap_or("-");
    format!("{}\t{}\t{} entries\tcreated {}", tier.name, owner, tier.entries, tier.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tether_core::{QueuedMutation, ReplayState};

    fn entry(replay: Option<ReplayState>) -> QueueEntry {
        QueueEntry {
            mutation: QueuedMutation {
                id: "offline-1700000000000".into(),
                url: "http://localhost:3001/api/complaints".into(),
                method: "POST".into(),
                headers: BTreeMap::new(),
                body: "{}".into(),
                timestamp: 1_700_000_000_000,
            },
            replay,
        }
    }

    fn state(attempts: u32, parked: bool) -> ReplayState {
        ReplayState {
            id: "offline-1700000000000".into(),
            attempts,
            last_attempt_at: 0,
            next_attempt_at: 0,
            last_error: Some("upstream answered 503".into()),
            parked,
        }
    }

    #[test]
    fn test_parse_queue_commands() {
        let cli = Cli::try_parse_from(["tetherctl", "queue", "release", "offline-1"]).unwrap();
        assert_eq!(cli.command, Command::Queue(QueueCommand::Release { id: "offline-1".into() }));

        let cli = Cli::try_parse_from(["tetherctl", "queue", "list", "--json"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.command, Command::Queue(QueueCommand::List));
    }

    #[test]
    fn test_parse_tier_commands() {
        for (arg, expected) in [("list", TierCommand::List), ("install", TierCommand::Install), ("activate", TierCommand::Activate)] {
            let cli = Cli::try_parse_from(["tetherctl", "tiers", arg]).unwrap();
            assert_eq!(cli.command, Command::Tiers(expected));
        }
    }

    #[test]
    fn test_release_requires_id() {
        assert!(Cli::try_parse_from(["tetherctl", "queue", "release"]).is_err());
    }

    #[test]
    fn test_describe_entry() {
        assert_eq!(
            describe_entry(&entry(None)),
            "offline-1700000000000\tPOST http://localhost:3001/api/complaints\tpending"
        );
        assert!(describe_entry(&entry(Some(state(2, false)))).contains("retrying, 2 failed attempts\tupstream answered 503"));
        assert!(describe_entry(&entry(Some(state(8, true)))).contains("parked after 8 attempts"));
    }

    #[test]
    fn test_describe_tier() {
        let mut tier = TierInfo {
            name: "complaints-static-v1".into(),
            app: Some("complaints".into()),
            created_at: "2024-01-01T00:00:00Z".into(),
            entries: 4,
        };
        assert_eq!(describe_tier(&tier), "complaints-static-v1\tcomplaints\t4 entries\tcreated 2024-01-01T00:00:00Z");

        tier.app = None;
        assert!(describe_tier(&tier).starts_with("complaints-static-v1\t-\t"));
    }
}
