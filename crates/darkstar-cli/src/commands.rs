use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::warn;

use darkstar_sdk::{Darkstar, DarkstarConfig, StorageBackend, Timestamp};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    darkstar_sdk::telemetry::init_tracing(&config.log);

    let Cli { command, format, .. } = cli;
    if let Command::Config = command {
        return cmd_config(&config, &format);
    }

    if config.storage.backend == StorageBackend::Memory {
        warn!("using in-memory storage; changes are discarded on exit");
    }
    let node = Darkstar::open(config).context("failed to open darkstar store")?;
    match command {
        Command::Config => Ok(()),
        Command::Tables => cmd_tables(&node, &format),
        Command::Dump(args) => cmd_dump(&node, args, &format),
        Command::Send(args) => cmd_send(&node, args, &format),
        Command::Inbox(args) => cmd_inbox(&node, args, &format),
        Command::Claim(args) => cmd_claim(&node, args, &format),
        Command::Sweep(args) => cmd_sweep(&node, args, &format),
        Command::Compact => cmd_compact(&node),
        Command::Verify(args) => cmd_verify(&node, args),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<DarkstarConfig> {
    let mut config = match &cli.config {
        Some(path) => DarkstarConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DarkstarConfig::default(),
    };
    if let Some(data) = &cli.data {
        config.storage.backend = StorageBackend::Log;
        config.storage.path = Some(data.clone());
    }
    if cli.verbose {
        config.log.filter = "debug".into();
    }
    config.validate()?;
    Ok(config)
}

fn cmd_config(config: &DarkstarConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

fn cmd_tables(node: &Darkstar, format: &OutputFormat) -> anyhow::Result<()> {
    let db = node.database();
    let mut rows = Vec::new();
    for table in db.tables()? {
        let live = db.scan(&table, |_| true)?.collect::<Result<Vec<_>, _>>()?.len();
        rows.push((table, live));
    }
    match format {
        OutputFormat::Json => {
            let out: Vec<_> = rows
                .iter()
                .map(|(table, live)| json!({ "table": table, "live": live }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            for (table, live) in &rows {
                println!("{:<16} {} live", table.bold(), live);
            }
        }
    }
    Ok(())
}

fn cmd_dump(node: &Darkstar, args: DumpArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let db = node.database();
    db.ensure_table(&args.table)?;
    let records = db
        .scan(&args.table, |_| true)?
        .take(args.limit)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to read {}", args.table))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            for obj in &records {
                println!(
                    "{}  r{}  {}  {}",
                    obj.key.yellow().bold(),
                    obj.revision,
                    obj.updated_at,
                    obj.checksum_hex()[..12].dimmed()
                );
                for (field, value) in &obj.fields {
                    println!("    {field} = {value:?}");
                }
            }
            if records.is_empty() {
                println!("No records in {}.", args.table.bold());
            }
        }
    }
    Ok(())
}

fn cmd_send(node: &Darkstar, args: SendArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let delivery = node.delivery();
    let parcel_id = match &args.from {
        Some(sender) => delivery.send_from(sender, &args.recipient, &args.payload)?,
        None => delivery.send(&args.recipient, &args.payload)?,
    };
    match format {
        OutputFormat::Json => println!("{}", json!({ "parcel_id": parcel_id })),
        OutputFormat::Text => {
            println!(
                "{} Sent {} to {}",
                "✓".green().bold(),
                args.payload.cyan(),
                args.recipient.bold()
            );
            println!("  Parcel: {}", parcel_id.yellow());
        }
    }
    Ok(())
}

fn cmd_inbox(node: &Darkstar, args: InboxArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let parcels = node.delivery().inbox(&args.recipient)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&parcels)?),
        OutputFormat::Text => {
            if parcels.is_empty() {
                println!("No pending parcels for {}.", args.recipient.bold());
            }
            for parcel in &parcels {
                println!(
                    "{}  {}  from {}  expires {}",
                    parcel.parcel_id.yellow(),
                    parcel.payload_ref.cyan(),
                    parcel.sender_id.as_deref().unwrap_or("-"),
                    parcel.expires_at
                );
            }
        }
    }
    Ok(())
}

fn cmd_claim(node: &Darkstar, args: ClaimArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let payload = node
        .delivery()
        .claim(&args.parcel, &args.claimant)
        .with_context(|| format!("claim of {} failed", args.parcel))?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "parcel_id": args.parcel, "payload_ref": payload })),
        OutputFormat::Text => println!(
            "{} {} claimed {}",
            "✓".green().bold(),
            args.claimant.bold(),
            payload.cyan()
        ),
    }
    Ok(())
}

/// Auction settlement needs the ledger that holds the escrowed funds, which
/// lives in the embedding process, so only parcels are swept here.
fn cmd_sweep(node: &Darkstar, args: SweepArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let now = args
        .at
        .map(Timestamp::from_millis)
        .unwrap_or_else(|| node.clock().now_wall());
    let report = node.delivery().sweep_expired(now)?;
    let purged = node.delivery().purge(now)?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "at": now.as_millis(), "sweep": report, "purged": purged })
        ),
        OutputFormat::Text => {
            println!("{} Swept parcels as of {}", "✓".green().bold(), now);
            println!("  Expired: {}", report.expired);
            println!("  Skipped: {}", report.skipped);
            println!("  Purged:  {}", purged);
            if report.contended + report.failed > 0 {
                println!(
                    "  {} {} contended, {} failed",
                    "!".yellow().bold(),
                    report.contended,
                    report.failed
                );
            }
        }
    }
    Ok(())
}

fn cmd_compact(node: &Darkstar) -> anyhow::Result<()> {
    match node.compact_storage()? {
        Some(size) => println!("{} Compacted log to {} bytes.", "✓".green().bold(), size),
        None => println!("Nothing to compact: storage is in memory."),
    }
    Ok(())
}

fn cmd_verify(node: &Darkstar, args: VerifyArgs) -> anyhow::Result<()> {
    let db = node.database();
    let tables = if args.tables.is_empty() {
        db.tables()?
    } else {
        for table in &args.tables {
            db.ensure_table(table)?;
        }
        args.tables
    };

    let mut checked = 0usize;
    let mut corrupt = Vec::new();
    for table in tables {
        for item in db.scan(&table, |_| true)? {
            match item {
                Ok(_) => checked += 1,
                Err(e) => corrupt.push(e.to_string()),
            }
        }
    }

    if corrupt.is_empty() {
        println!("{} {} records verified", "✓".green().bold(), checked);
        return Ok(());
    }
    for problem in &corrupt {
        println!("  {} {}", "✗".red().bold(), problem);
    }
    anyhow::bail!("{} corrupt records ({} ok)", corrupt.len(), checked)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;

    use super::*;
    use darkstar_sdk::{ParcelState, StorageConfig};

    fn run(args: &[&str]) -> anyhow::Result<()> {
        run_command(Cli::try_parse_from(args)?)
    }

    fn open(path: &Path) -> Darkstar {
        Darkstar::open(DarkstarConfig {
            storage: StorageConfig {
                backend: StorageBackend::Log,
                path: Some(path.to_path_buf()),
                ..StorageConfig::default()
            },
            ..DarkstarConfig::default()
        })
        .unwrap()
    }

    fn only_parcel(path: &Path, recipient: &str) -> String {
        let node = open(path);
        let inbox = node.delivery().inbox(recipient).unwrap();
        assert_eq!(inbox.len(), 1);
        inbox[0].parcel_id.clone()
    }

    // ---- delivery commands ----

    #[test]
    fn send_then_claim_across_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("store.log");
        let data = data.to_str().unwrap();

        run(&["darkstar", "send", "rosa", "gil:500", "--from", "cid", "--data", data]).unwrap();
        let parcel = only_parcel(Path::new(data), "rosa");

        run(&["darkstar", "claim", parcel.as_str(), "rosa", "--data", data]).unwrap();
        let node = open(Path::new(data));
        let claimed = node.delivery().parcel(&parcel).unwrap();
        assert_eq!(claimed.state, ParcelState::Claimed);
        assert_eq!(claimed.sender_id.as_deref(), Some("cid"));
    }

    #[test]
    fn claim_by_stranger_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("store.log");
        let data = data.to_str().unwrap();

        run(&["darkstar", "send", "rosa", "gil:5", "--data", data]).unwrap();
        let parcel = only_parcel(Path::new(data), "rosa");

        assert!(run(&["darkstar", "claim", parcel.as_str(), "kain", "--data", data]).is_err());
        assert_eq!(only_parcel(Path::new(data), "rosa"), parcel);
    }

    #[test]
    fn sweep_at_future_time_expires_parcel() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("store.log");
        let data = data.to_str().unwrap();

        run(&["darkstar", "send", "rosa", "gil:5", "--data", data]).unwrap();
        let parcel = only_parcel(Path::new(data), "rosa");

        let far = (u64::MAX / 2).to_string();
        run(&["darkstar", "sweep", "--at", far.as_str(), "--format", "json", "--data", data]).unwrap();
        let node = open(Path::new(data));
        assert!(node.delivery().parcel(&parcel).is_err());
        assert!(node.delivery().inbox("rosa").unwrap().is_empty());
    }

    // ---- maintenance commands ----

    #[test]
    fn maintenance_commands_succeed_on_log_store() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("store.log");
        let data = data.to_str().unwrap();

        run(&["darkstar", "send", "rosa", "gil:5", "--data", data]).unwrap();
        run(&["darkstar", "tables", "--data", data]).unwrap();
        run(&["darkstar", "dump", "delivery_box", "--format", "json", "--data", data]).unwrap();
        run(&["darkstar", "compact", "--data", data]).unwrap();
        run(&["darkstar", "verify", "--data", data]).unwrap();
        assert!(!only_parcel(Path::new(data), "rosa").is_empty());
    }

    #[test]
    fn compact_reports_log_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let node = open(&path);
            let parcel = node.delivery().send("rosa", "gil:5").unwrap();
            node.delivery().claim(&parcel, "rosa").unwrap();
            node.delivery().send("kain", "gil:9").unwrap();
        }
        let node = open(&path);
        let size = node.compact_storage().unwrap().unwrap();
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn verify_checks_only_named_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let data = path.to_str().unwrap();
        run(&["darkstar", "send", "rosa", "gil:5", "--data", data]).unwrap();
        {
            let raw = darkstar_store::LogBackingStore::open(&path, Default::default()).unwrap();
            darkstar_store::BackingStore::put(&raw, "delivery_box", "garbled", b"not a record")
                .unwrap();
        }

        run(&["darkstar", "verify", "auction_house", "--data", data]).unwrap();
        assert!(run(&["darkstar", "verify", "delivery_box", "--data", data]).is_err());
        assert!(run(&["darkstar", "verify", "--data", data]).is_err());
    }

    #[test]
    fn config_command_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("darkstar.toml");
        std::fs::write(&path, "[delivery]\nretention_secs = 60\n").unwrap();
        run(&["darkstar", "config", "--config", path.to_str().unwrap()]).unwrap();
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(run(&["darkstar", "config", "--config", path.to_str().unwrap()]).is_err());
    }
}
