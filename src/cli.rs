//! Command-line interface, built on clap.
//!
//! Defines the [`Cli`] struct with the [`Command`] subcommands (run,
//! status, approve, demo) and global flags.

use clap::{Parser, Subcommand, ValueEnum};

/// Floodgate, the change-data-capture platform orchestrator.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose (debug-level) logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Review role an approval command acts under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Database administrator review.
    Dba,
    /// Source owner review.
    Owner,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestrator: reconcile managed connectors until interrupted.
    Run,

    /// Show persisted and actual state for every managed connector.
    Status,

    /// Record an approval decision for a connection requisition.
    Approve {
        /// Requisition id to review.
        requisition_id: String,

        /// Account performing the review.
        #[arg(long)]
        operator: String,

        /// Role the review is performed under.
        #[arg(long, value_enum)]
        role: RoleArg,

        /// Reject instead of approving.
        #[arg(long, default_value_t = false)]
        reject: bool,

        /// Free-text review comment.
        #[arg(long)]
        comment: Option<String>,
    },

    /// Run the embedded end-to-end demonstration of both machines.
    Demo,
}
