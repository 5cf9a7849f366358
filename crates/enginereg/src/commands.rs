//! Subcommand implementations.
//!
//! Each command is a thin call into the membership manager; output goes to
//! the supplied writer so commands can be exercised without a terminal.

use std::io::Write;
use std::time::Duration;

use clap::ValueEnum;

use enginereg_membership::MembershipManager;
use enginereg_state::{BindingFilter, BindingId, BindingStore};

/// Output format for list commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

pub fn register<S: BindingStore>(
    mgr: &MembershipManager<S>,
    instance: &str,
    cluster: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let binding = mgr.register(instance, cluster)?;
    writeln!(out, "registered binding {} ({instance} -> {cluster})", binding.id)?;
    Ok(())
}

pub fn reassign<S: BindingStore>(
    mgr: &MembershipManager<S>,
    id: BindingId,
    cluster: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let binding = mgr.reassign_by_id(id, cluster)?;
    writeln!(
        out,
        "binding {} ({}) now on cluster {}",
        binding.id, binding.instance, binding.cluster
    )?;
    Ok(())
}

pub fn deregister<S: BindingStore>(
    mgr: &MembershipManager<S>,
    ids: &[BindingId],
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let removed = mgr.deregister(ids)?;
    writeln!(out, "removed {removed} binding(s)")?;
    Ok(())
}

/// One round of heartbeats for `instance`.
pub fn heartbeat<S: BindingStore>(
    mgr: &MembershipManager<S>,
    instance: &str,
    clusters: &[String],
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if clusters.is_empty() {
        let refreshed = mgr.heartbeat(instance)?;
        writeln!(out, "refreshed {refreshed} binding(s) for {instance}")?;
    } else {
        for cluster in clusters {
            mgr.heartbeat_with_cluster(instance, cluster)?;
        }
        writeln!(out, "heartbeat sent for {instance} on {}", clusters.join(", "))?;
    }
    Ok(())
}

pub fn instances<S: BindingStore>(
    mgr: &MembershipManager<S>,
    filter: &BindingFilter,
    format: Format,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    print_names(&mgr.list_instances(filter)?, format, out)
}

pub fn clusters<S: BindingStore>(
    mgr: &MembershipManager<S>,
    instance: Option<&str>,
    format: Format,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let names = match instance {
        Some(instance) => mgr.clusters_for_instance(instance)?,
        None => mgr.list_clusters(&BindingFilter::all())?,
    };
    print_names(&names, format, out)
}

pub fn bindings<S: BindingStore>(
    mgr: &MembershipManager<S>,
    filter: &BindingFilter,
    stale_after: Duration,
    format: Format,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let report = mgr.liveness(filter, stale_after)?;
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        Format::Text => {
            writeln!(out, "ID\tINSTANCE\tCLUSTER\tLAST_HEARTBEAT\tSTATUS")?;
            for entry in &report {
                let status = if entry.alive {
                    "alive".to_string()
                } else {
                    format!("stale ({}s)", entry.staleness_secs)
                };
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{status}",
                    entry.binding.id,
                    entry.binding.instance,
                    entry.binding.cluster,
                    entry.binding.last_heartbeat,
                )?;
            }
        }
    }
    Ok(())
}

fn print_names(names: &[String], format: Format, out: &mut impl Write) -> anyhow::Result<()> {
    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string(names)?)?,
        Format::Text => {
            for name in names {
                writeln!(out, "{name}")?;
            }
        }
    }
    Ok(())
}
