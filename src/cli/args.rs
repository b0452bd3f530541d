use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};

use crate::queue::{EntityType, MutationOp};

#[derive(Parser)]
#[command(name = "reportq")]
#[command(about = "Offline-first mutation queue for report and finding edits")]
#[command(long_about = "reportq - offline-first mutation queue

Keeps create/update/delete edits in a durable local queue while the
network is away, and replays them against the remote API in order once
it is back.

QUICK START:
  reportq enqueue report create '{\"id\": \"r1\", \"title\": \"Site visit\"}'
  reportq list --unsynced        Show changes waiting to sync
  reportq sync                   Replay pending changes now
  reportq daemon                 Sync on connectivity events from stdin

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

Data lives in ~/.reportq (override with REPORTQ_HOME).")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output (default),
    /// or 'json' for machine-readable output suitable for scripting.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Remote API base URL, overriding sync.remote_url
    #[arg(long, env = "REPORTQ_REMOTE_URL", global = true, value_name = "URL")]
    pub remote: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation
    ///
    /// The payload is a JSON document; pass '-' to read it from stdin.
    ///
    /// # Examples
    ///
    ///   reportq enqueue report create '{"id": "r1", "title": "Site visit"}'
    ///   reportq enqueue finding update '{"id": 7, "severity": "high"}'
    ///   reportq enqueue report delete '{"id": "r1"}'
    #[command(alias = "add")]
    Enqueue(EnqueueArgs),

    /// List queued mutations in insertion order
    #[command(alias = "ls")]
    List {
        /// Only show records not yet acknowledged by the server
        #[arg(short, long)]
        unsynced: bool,

        /// Only show records of this entity type
        #[arg(short, long)]
        entity: Option<EntityType>,
    },

    /// Show one queued mutation
    Show {
        /// Record ID
        id: String,
    },

    /// Show queue status and the pending sync count
    Status,

    /// Permanently delete a queued mutation
    #[command(alias = "rm")]
    Remove {
        /// Record ID
        id: String,
    },

    /// Delete synced records
    ///
    /// Unsynced records are never touched.
    Purge {
        /// Only delete records synced more than this many hours ago
        #[arg(long, value_name = "HOURS")]
        older_than: Option<u64>,
    },

    /// List records the server rejected
    Conflicts,

    /// Resolve a rejected record
    ///
    /// --retry clears the flag so the next sync replays the record;
    /// --discard deletes it.
    #[command(group(ArgGroup::new("action").required(true).args(["retry", "discard"])))]
    Resolve {
        /// Record ID
        id: String,

        /// Replay the record on the next sync
        #[arg(long)]
        retry: bool,

        /// Drop the record
        #[arg(long)]
        discard: bool,
    },

    /// Replay pending mutations against the remote once
    Sync {
        /// Show the chains that would be replayed without calling the remote
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the background scheduler
    ///
    /// Reads connectivity events from stdin, one per line: 'online',
    /// 'offline', 'sync', 'status', 'quit'.
    Daemon {
        /// Start in the offline state
        #[arg(long)]
        offline: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Arguments for `enqueue`.
#[derive(Args)]
pub struct EnqueueArgs {
    /// Entity type (report, finding, ...)
    pub entity_type: EntityType,

    /// Operation: create, update or delete
    pub operation: MutationOp,

    /// JSON payload, or '-' for stdin
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_enqueue_command() {
        let cli = Cli::try_parse_from([
            "reportq",
            "enqueue",
            "report",
            "create",
            r#"{"id": "r1"}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue(args) => {
                assert_eq!(args.entity_type, EntityType::report());
                assert_eq!(args.operation, MutationOp::Create);
                assert_eq!(args.payload, r#"{"id": "r1"}"#);
            },
            _ => panic!("Expected Enqueue command"),
        }
    }

    #[test]
    fn test_cli_enqueue_rejects_bad_entity() {
        assert!(Cli::try_parse_from(["reportq", "enqueue", "Bad Type!", "create", "{}"]).is_err());
    }

    #[test]
    fn test_cli_enqueue_rejects_bad_operation() {
        assert!(Cli::try_parse_from(["reportq", "enqueue", "report", "upsert", "{}"]).is_err());
    }

    #[test]
    fn test_cli_add_alias() {
        let cli = Cli::try_parse_from(["reportq", "add", "finding", "delete", "{}"]).unwrap();
        assert!(matches!(cli.command, Commands::Enqueue(_)));
    }

    #[test]
    fn test_cli_list_unsynced() {
        let cli = Cli::try_parse_from(["reportq", "list", "--unsynced"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                unsynced: true,
                entity: None
            }
        ));
    }

    #[test]
    fn test_cli_resolve_requires_action() {
        assert!(Cli::try_parse_from(["reportq", "resolve", "abc"]).is_err());
        assert!(Cli::try_parse_from(["reportq", "resolve", "abc", "--retry", "--discard"]).is_err());

        let cli = Cli::try_parse_from(["reportq", "resolve", "abc", "--discard"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Resolve {
                retry: false,
                discard: true,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_purge_older_than() {
        let cli = Cli::try_parse_from(["reportq", "purge", "--older-than", "48"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Purge {
                older_than: Some(48)
            }
        ));
    }

    #[test]
    fn test_cli_output_format_global() {
        let cli = Cli::try_parse_from(["reportq", "status", "--output", "json"]).unwrap();
        assert_eq!(cli.output, Some(OutputFormat::Json));

        let cli = Cli::try_parse_from(["reportq", "-o", "pretty", "status"]).unwrap();
        assert_eq!(cli.output, Some(OutputFormat::Pretty));

        let cli = Cli::try_parse_from(["reportq", "status"]).unwrap();
        assert_eq!(cli.output, None);
    }

    #[test]
    fn test_cli_completions() {
        let cli = Cli::try_parse_from(["reportq", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { shell: Shell::Bash }));
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
