//! OTA release admin CLI
//!
//! Entry point for the `ota-release` command-line tool. Every command opens
//! the coordinator on the configured storage root (taking its lock) and
//! closes it with a final ledger flush.

use clap::{Parser, Subcommand};
use ota_release::config::HOST_CONFIG_PATH;
use ota_release::{Coordinator, EffectiveConfig, Error, ErrorKind};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "ota-release")]
#[command(about = "OTA artifact release and rollout administration", version)]
struct Cli {
    /// Config file layered over /etc/ota-release/config.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Storage root (overrides storage.root)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the ledger against the artifact store and report
    Reconcile,

    /// Show the latest release and rollout summary
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Publish an artifact as the latest release
    Publish {
        /// Declared artifact version
        #[arg(long)]
        version: String,

        /// Artifact file to upload
        #[arg(long)]
        file: PathBuf,

        /// Release notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Assign the latest release to a device
    Promote {
        device_id: String,
    },

    /// Assign the latest release to every known device
    PromoteAll {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the ledger from the current release
    FlushLedger,

    /// Print the effective configuration with provenance
    Config,
}

fn main() {
    let cli = Cli::parse();

    let effective = match load_config(cli.config.as_deref(), cli.root.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    let settings = match effective.settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };
    ota_release::init_tracing(&settings.logging.filter);

    if let Commands::Config = cli.command {
        print_json(&effective);
        return;
    }

    let coordinator = match Coordinator::open(&settings) {
        Ok(c) => c,
        Err(e) => fail(&e),
    };

    let outcome = match cli.command {
        Commands::Reconcile => run_reconcile(&coordinator),
        Commands::Status { json } => run_status(&coordinator, json),
        Commands::Publish {
            version,
            file,
            notes,
        } => run_publish(&coordinator, &version, &file, notes.as_deref()),
        Commands::Promote { device_id } => run_promote(&coordinator, &device_id),
        Commands::PromoteAll { json } => run_promote_all(&coordinator, json),
        Commands::FlushLedger => run_flush(&coordinator),
        Commands::Config => Ok(true),
    };

    let closed = coordinator.close();
    match outcome.and_then(|ok| closed.map(|()| ok)) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => fail(&e),
    }
}

fn load_config(
    explicit: Option<&Path>,
    root: Option<&Path>,
) -> Result<EffectiveConfig, ota_release::config::ConfigError> {
    let overrides = root.map(|root| serde_json::json!({"storage": {"root": root}}));
    EffectiveConfig::build(Some(Path::new(HOST_CONFIG_PATH)), explicit, overrides)
}

fn run_reconcile(coordinator: &Coordinator) -> Result<bool, Error> {
    let report = coordinator.reconcile_report();
    let latest = coordinator.latest();
    println!("Reconciled: {:?}", report.source);
    println!("  Version: {}", latest.current.version);
    println!("  Ledger rewritten: {}", report.ledger_rewritten);
    println!("  Stray files removed: {}", report.pruned);
    println!("  Devices: {}", coordinator.devices().len());
    Ok(true)
}

fn run_status(coordinator: &Coordinator, json_output: bool) -> Result<bool, Error> {
    let status = coordinator.status();
    if json_output {
        print_json(&serde_json::json!({
            "status": status,
            "devices": coordinator.devices(),
        }));
        return Ok(true);
    }

    println!("Latest release: {}", status.latest.current.version);
    println!("  Notes: {}", status.latest.release_notes);
    println!("  Published: {}", status.latest.published_at.to_rfc3339());
    println!("  Origin: {:?}", status.latest.origin);
    if status.backed {
        println!(
            "  Artifact: {} ({} bytes, sha256 {})",
            status.latest.current.storage_key,
            status.latest.current.size_bytes,
            status.latest.current.content_hash
        );
    } else {
        println!("  Artifact: none stored");
    }
    if status.ledger_dirty {
        println!("  Ledger: NOT PERSISTED");
    }

    let devices = coordinator.devices();
    if devices.is_empty() {
        println!("\nNo devices provisioned.");
        return Ok(true);
    }
    println!("\nDevices ({} total):", devices.len());
    for entry in devices {
        let marker = if entry.assigned.same_content(&status.latest.current) {
            ""
        } else {
            " (behind)"
        };
        println!(
            "  {}  {}{}  assigned {}",
            entry.device_id,
            entry.assigned.version,
            marker,
            entry.assigned_at.to_rfc3339()
        );
    }
    Ok(true)
}

fn run_publish(
    coordinator: &Coordinator,
    version: &str,
    path: &Path,
    notes: Option<&str>,
) -> Result<bool, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Validation(format!("cannot read {}: {}", path.display(), e)))?;
    let record = coordinator.publish(version, file, notes)?;
    println!(
        "Published {} ({} bytes, sha256 {})",
        record.current.version, record.current.size_bytes, record.current.content_hash
    );
    Ok(true)
}

fn run_promote(coordinator: &Coordinator, device_id: &str) -> Result<bool, Error> {
    let entry = coordinator.promote(device_id)?;
    println!("{} -> {}", entry.device_id, entry.assigned.version);
    Ok(true)
}

fn run_promote_all(coordinator: &Coordinator, json_output: bool) -> Result<bool, Error> {
    let report = coordinator.promote_all();
    if json_output {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(id, e)| serde_json::json!({"device_id": id, "error": e.to_string()}))
            .collect();
        print_json(&serde_json::json!({
            "promoted": report.promoted,
            "failed": failed,
        }));
    } else {
        println!("Promoted {} device(s)", report.count());
        for (id, e) in &report.failed {
            println!("  FAILED {}: {}", id, e);
        }
    }
    Ok(report.is_complete())
}

fn run_flush(coordinator: &Coordinator) -> Result<bool, Error> {
    coordinator.flush_ledger()?;
    println!("Ledger written for {}", coordinator.latest().current.version);
    Ok(true)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn fail(error: &Error) -> ! {
    eprintln!("Error: {}", error);
    let code = match error.kind() {
        ErrorKind::Validation | ErrorKind::PathTraversal => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::VersionMismatch => 4,
        ErrorKind::Unavailable => 5,
        _ => 1,
    };
    process::exit(code);
}
