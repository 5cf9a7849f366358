//! enginereg — operator CLI for the alerting-engine registry.
//!
//! Opens the binding store named in the config (or `--db`), wires it into a
//! `MembershipManager`, and runs one registry operation per invocation.
//! `heartbeat --watch` keeps running as a worker-side heartbeat loop.
//!
//! # Usage
//!
//! ```text
//! enginereg register n9e-1:19000 Default
//! enginereg heartbeat n9e-1:19000 --cluster Default --watch
//! enginereg bindings --stale-after 30
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use enginereg_membership::{AgentConfig, HeartbeatAgent, MembershipManager};
use enginereg_state::{BindingFilter, BindingId, StateStore};

mod commands;
mod config;

use commands::Format;
use config::RegistryConfig;

#[derive(Parser)]
#[command(
    name = "enginereg",
    about = "Alerting-engine registry — worker bindings and heartbeats",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./enginereg.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides [store].path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bind an instance to a cluster.
    Register { instance: String, cluster: String },
    /// Move an existing binding to another cluster.
    Reassign { id: BindingId, cluster: String },
    /// Delete bindings by id.
    Deregister { ids: Vec<BindingId> },
    /// Send a heartbeat for an instance.
    ///
    /// With one or more --cluster flags the named bindings are created or
    /// refreshed; without, every existing binding of the instance is
    /// refreshed.
    Heartbeat {
        instance: String,
        #[arg(long = "cluster")]
        clusters: Vec<String>,
        /// Keep heartbeating until interrupted.
        #[arg(long)]
        watch: bool,
        /// Seconds between heartbeats in --watch mode.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
    /// List instances.
    Instances {
        #[arg(long)]
        cluster: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// List clusters, or the clusters of one instance.
    Clusters {
        #[arg(long)]
        instance: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
    /// List bindings with their liveness.
    Bindings {
        #[arg(long)]
        instance: Option<String>,
        #[arg(long)]
        cluster: Option<String>,
        /// Seconds of silence before a binding is reported stale.
        #[arg(long)]
        stale_after: Option<u64>,
        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RegistryConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    // Logs go to stderr so command output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log.filter))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let store = StateStore::open(&config.store.path)?;
    let membership = MembershipManager::new(store);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Register { instance, cluster } => {
            commands::register(&membership, &instance, &cluster, &mut out)
        }
        Command::Reassign { id, cluster } => {
            commands::reassign(&membership, id, &cluster, &mut out)
        }
        Command::Deregister { ids } => commands::deregister(&membership, &ids, &mut out),
        Command::Heartbeat {
            instance,
            clusters,
            watch: false,
            ..
        } => commands::heartbeat(&membership, &instance, &clusters, &mut out),
        Command::Heartbeat {
            instance,
            clusters,
            watch: true,
            interval,
        } => {
            drop(out);
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.heartbeat_interval());
            run_heartbeat_loop(membership, instance, clusters, interval).await
        }
        Command::Instances { cluster, format } => {
            let filter = match cluster {
                Some(cluster) => BindingFilter::cluster(&cluster),
                None => BindingFilter::all(),
            };
            commands::instances(&membership, &filter, format, &mut out)
        }
        Command::Clusters { instance, format } => {
            commands::clusters(&membership, instance.as_deref(), format, &mut out)
        }
        Command::Bindings {
            instance,
            cluster,
            stale_after,
            format,
        } => {
            let filter = BindingFilter {
                instance,
                cluster,
                ..BindingFilter::default()
            };
            let stale_after = stale_after
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.stale_after());
            commands::bindings(&membership, &filter, stale_after, format, &mut out)
        }
    }
}

/// Heartbeat until Ctrl-C.
async fn run_heartbeat_loop(
    membership: MembershipManager<StateStore>,
    instance: String,
    clusters: Vec<String>,
    interval: Duration,
) -> anyhow::Result<()> {
    let agent = HeartbeatAgent::new(
        AgentConfig {
            instance,
            clusters,
            interval,
        },
        Arc::new(membership),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_heartbeat_with_clusters() {
        let cli = Cli::try_parse_from([
            "enginereg",
            "heartbeat",
            "n9e-1:19000",
            "--cluster",
            "Default",
            "--cluster",
            "Prod",
        ])
        .unwrap();
        match cli.command {
            Command::Heartbeat {
                instance,
                clusters,
                watch,
                interval,
            } => {
                assert_eq!(instance, "n9e-1:19000");
                assert_eq!(clusters, vec!["Default", "Prod"]);
                assert!(!watch);
                assert!(interval.is_none());
            }
            _ => panic!("expected heartbeat"),
        }
    }

    #[test]
    fn parse_global_db_after_subcommand() {
        let cli =
            Cli::try_parse_from(["enginereg", "deregister", "1", "2", "--db", "/tmp/x.redb"])
                .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.redb")));
        match cli.command {
            Command::Deregister { ids } => assert_eq!(ids, vec![1, 2]),
            _ => panic!("expected deregister"),
        }
    }

    #[test]
    fn parse_bindings_json() {
        let cli = Cli::try_parse_from([
            "enginereg",
            "bindings",
            "--stale-after",
            "60",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Command::Bindings {
                stale_after, format, ..
            } => {
                assert_eq!(stale_after, Some(60));
                assert_eq!(format, Format::Json);
            }
            _ => panic!("expected bindings"),
        }
    }

    #[test]
    fn reassign_requires_numeric_id() {
        assert!(Cli::try_parse_from(["enginereg", "reassign", "abc", "Prod"]).is_err());
    }

    #[test]
    fn heartbeat_interval_must_be_positive() {
        let args = ["enginereg", "heartbeat", "n9e-1:19000", "--watch", "--interval"];
        assert!(Cli::try_parse_from(args.iter().copied().chain(["0"])).is_err());

        let cli = Cli::try_parse_from(args.iter().copied().chain(["1"])).unwrap();
        match cli.command {
            Command::Heartbeat { interval, .. } => assert_eq!(interval, Some(1)),
            _ => panic!("expected heartbeat"),
        }
    }
}
