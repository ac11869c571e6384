use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use colored::*;
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use dbsnap::codec::Compression;
use dbsnap::config::{ServiceInfo, Settings, SnapshotInfo};
use dbsnap::engines::{Engine, EngineRegistry};
use dbsnap::exec::DockerCli;
use dbsnap::registry::ServiceRegistry;
use dbsnap::service::{
    CreateOptions, FileStatus, RestoreOptions, SnapshotSelector, SnapshotService,
};
use dbsnap::utils::io::human_size;

/// Build the service for one CLI invocation. The cancel token is never
/// fired here; an interrupted process simply exits, and cancellation is
/// left to library callers that own a `SnapshotService`.
pub fn open_service(root: Option<PathBuf>) -> Result<SnapshotService> {
    let mut settings = Settings::load()?;
    if let Some(root) = root {
        settings.snapshot_root = root;
    }
    let registry = ServiceRegistry::open_default()?;
    let docker = DockerCli::new(&settings.docker_binary);
    Ok(SnapshotService::from_settings(
        &settings,
        Arc::new(registry),
        Arc::new(docker),
    ))
}

pub fn do_create(
    svc: &SnapshotService,
    service: &str,
    tag: Option<String>,
    note: String,
    compression: Option<String>,
) -> Result<()> {
    let bar = create_progress_bar(&format!("Snapshotting {}", service));
    let result = svc.create(
        service,
        &CreateOptions {
            tag,
            note,
            compression,
        },
    );
    bar.finish_and_clear();
    let manifest = result?;

    let label = manifest.tag.as_deref().unwrap_or("untagged");
    println!(
        "{} {}",
        "✔".green().bold(),
        format!(
            "Snapshot of '{}' created ({}, {}, {})",
            service,
            label,
            manifest.compression,
            human_size(manifest.total_size())
        )
        .green()
    );
    Ok(())
}

pub fn do_restore(
    svc: &SnapshotService,
    service: &str,
    tag: Option<String>,
    latest: bool,
    before: Option<String>,
    force: bool,
) -> Result<()> {
    let selector = match (tag, before) {
        (Some(tag), _) => SnapshotSelector::Tag(tag),
        (None, Some(_)) if latest => return Err(anyhow!("--latest and --before are exclusive")),
        (None, Some(before)) => SnapshotSelector::Before(parse_time(&before)?),
        (None, None) => SnapshotSelector::Latest,
    };

    let bar = create_progress_bar(&format!("Restoring {}", service));
    let result = svc.restore(service, &RestoreOptions { selector, force });
    bar.finish_and_clear();
    let snapshot = result?;

    println!(
        "{} {}",
        "✔".green().bold(),
        format!(
            "Restored '{}' from {}",
            service,
            describe(&snapshot)
        )
        .green()
    );
    Ok(())
}

pub fn do_list(svc: &SnapshotService, service: Option<&str>) -> Result<()> {
    let snapshots = svc.list(service)?;
    print_snapshots(&snapshots, "No snapshots found");
    Ok(())
}

pub fn do_search(svc: &SnapshotService, query: &str) -> Result<()> {
    let snapshots = svc.search(query)?;
    print_snapshots(&snapshots, &format!("No snapshots match '{}'", query));
    Ok(())
}

pub fn do_prune(svc: &SnapshotService, service: &str, keep: usize, dry_run: bool) -> Result<()> {
    let report = svc.prune(service, keep, dry_run)?;
    if report.removed.is_empty() {
        println!(
            "{} {}",
            "i".yellow().bold(),
            format!("Nothing to prune; {} snapshot(s) kept", report.kept).yellow()
        );
        return Ok(());
    }

    for snap in &report.removed {
        let verb = if dry_run { "would remove" } else { "removed" };
        println!("  {} {}", verb.dimmed(), describe(snap));
    }
    let summary = format!(
        "{} {} snapshot(s), {} reclaimed; {} kept",
        if dry_run { "Would prune" } else { "Pruned" },
        report.removed.len(),
        human_size(report.reclaimed_bytes),
        report.kept
    );
    if dry_run {
        println!("{} {}", "i".yellow().bold(), summary.yellow());
    } else {
        println!("{} {}", "✔".green().bold(), summary.green());
    }
    Ok(())
}

pub fn do_verify(svc: &SnapshotService, service: &str, tag: Option<String>) -> Result<()> {
    let report = svc.verify(service, &selector_for(tag))?;
    for file in &report.files {
        match &file.status {
            FileStatus::Ok => println!("  {} {}", "✔".green(), file.name),
            FileStatus::Missing => println!("  {} {} {}", "✘".red(), file.name, "(missing)".red()),
            FileStatus::Mismatch { actual } => println!(
                "  {} {} {}",
                "✘".red(),
                file.name,
                format!("(checksum {})", &actual[..actual.len().min(12)]).red()
            ),
        }
    }
    if report.is_ok() {
        println!(
            "{} {}",
            "✔".green().bold(),
            format!("{} verified", describe(&report.snapshot)).green()
        );
        Ok(())
    } else {
        Err(anyhow!("{} failed verification", describe(&report.snapshot)))
    }
}

pub fn do_delete(svc: &SnapshotService, service: &str, tag: &str) -> Result<()> {
    let snapshot = svc.delete(service, tag)?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Deleted {}", describe(&snapshot)).green()
    );
    Ok(())
}

pub fn do_repack(
    svc: &SnapshotService,
    service: &str,
    compression: &str,
    tag: Option<String>,
) -> Result<()> {
    let compression: Compression = compression.parse()?;
    let bar = create_progress_bar(&format!("Repacking {} as {}", service, compression));
    let result = svc.repack(service, &selector_for(tag), compression);
    bar.finish_and_clear();
    let manifest = result?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!(
            "Repacked '{}' to {} ({})",
            service,
            manifest.compression,
            human_size(manifest.total_size())
        )
        .green()
    );
    Ok(())
}

pub fn do_register(registry: &ServiceRegistry, mut info: ServiceInfo) -> Result<()> {
    if info.name.trim().is_empty() || info.container.trim().is_empty() {
        return Err(anyhow!("service name and container must not be empty"));
    }
    let engines = EngineRegistry::default();
    let engine = engines.lookup(&info.engine)?;
    info.engine = engine.engine_type().to_string();
    let name = info.name.clone();
    registry.register(info)?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Registered service '{}' ({})", name, engine.engine_type()).green()
    );
    Ok(())
}

pub fn do_services(svc: &SnapshotService) -> Result<()> {
    let services = svc.services()?;
    if services.is_empty() {
        println!("{} {}", "i".yellow().bold(), "No services registered".yellow());
        return Ok(());
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Name", "Engine", "Container", "Image", "Database", "Port"]));
    for s in &services {
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(&s.engine),
            Cell::new(&s.container),
            Cell::new(&s.image),
            Cell::new(&s.database),
            Cell::new(s.host_port.map(|p| p.to_string()).unwrap_or_default()),
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub fn do_version() {
    println!("{} {}", "dbsnap".bold(), env!("CARGO_PKG_VERSION").cyan());
}

fn print_snapshots(snapshots: &[SnapshotInfo], empty_message: &str) {
    if snapshots.is_empty() {
        println!("{} {}", "i".yellow().bold(), empty_message.yellow());
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Service", "Tag", "Engine", "Created", "Size", "Note"]));
    for s in snapshots {
        table.add_row(vec![
            Cell::new(&s.service),
            Cell::new(s.tag.as_deref().unwrap_or("-")),
            Cell::new(&s.engine),
            Cell::new(s.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(human_size(s.size)),
            Cell::new(&s.note),
        ]);
    }
    println!("{}", table);
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

fn describe(snapshot: &SnapshotInfo) -> String {
    let when = snapshot.created_at.format("%Y-%m-%d %H:%M:%S");
    match &snapshot.tag {
        Some(tag) => format!("snapshot '{}' ({})", tag, when),
        None => format!("snapshot from {}", when),
    }
}

fn selector_for(tag: Option<String>) -> SnapshotSelector {
    tag.map(SnapshotSelector::Tag).unwrap_or_default()
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow!("invalid time '{}': {}", value, e))
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}
