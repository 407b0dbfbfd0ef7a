use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "darkstar",
    about = "Inspect and maintain a darkstar store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the file log at this path, overriding the configured storage.
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the effective configuration
    Config,
    /// List tables and their live record counts
    Tables,
    /// Print the records of a table
    Dump(DumpArgs),
    /// Send a parcel to a recipient
    Send(SendArgs),
    /// List a recipient's pending parcels
    Inbox(InboxArgs),
    /// Claim a parcel on behalf of its recipient
    Claim(ClaimArgs),
    /// Expire overdue parcels and purge settled ones
    Sweep(SweepArgs),
    /// Rewrite the storage log down to live records
    Compact,
    /// Decode every record and check its checksum
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct DumpArgs {
    pub table: String,
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: usize,
}

#[derive(Args)]
pub struct SendArgs {
    pub recipient: String,
    pub payload: String,
    #[arg(long)]
    pub from: Option<String>,
}

#[derive(Args)]
pub struct InboxArgs {
    pub recipient: String,
}

#[derive(Args)]
pub struct ClaimArgs {
    pub parcel: String,
    pub claimant: String,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Sweep as of this wall-clock time (ms since the epoch) instead of now.
    #[arg(long)]
    pub at: Option<u64>,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Tables to check; every registered table when omitted.
    pub tables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_send_with_sender() {
        let cli = Cli::try_parse_from(["darkstar", "send", "rosa", "gil:500", "--from", "cid"])
            .unwrap();
        if let Command::Send(args) = cli.command {
            assert_eq!(args.recipient, "rosa");
            assert_eq!(args.payload, "gil:500");
            assert_eq!(args.from, Some("cid".into()));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_claim() {
        let cli = Cli::try_parse_from(["darkstar", "claim", "p-1", "rosa"]).unwrap();
        if let Command::Claim(args) = cli.command {
            assert_eq!(args.parcel, "p-1");
            assert_eq!(args.claimant, "rosa");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_dump_default_limit() {
        let cli = Cli::try_parse_from(["darkstar", "dump", "delivery_box"]).unwrap();
        if let Command::Dump(args) = cli.command {
            assert_eq!(args.table, "delivery_box");
            assert_eq!(args.limit, 50);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_sweep_at() {
        let cli = Cli::try_parse_from(["darkstar", "sweep", "--at", "12345"]).unwrap();
        if let Command::Sweep(args) = cli.command {
            assert_eq!(args.at, Some(12_345));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "darkstar", "tables", "--data", "store.log", "--format", "json", "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Tables));
        assert_eq!(cli.data, Some(PathBuf::from("store.log")));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn parse_verify_tables() {
        let cli = Cli::try_parse_from(["darkstar", "verify", "auction_house", "notes"]).unwrap();
        if let Command::Verify(args) = cli.command {
            assert_eq!(args.tables, vec!["auction_house", "notes"]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn claim_requires_claimant() {
        assert!(Cli::try_parse_from(["darkstar", "claim", "p-1"]).is_err());
    }
}
