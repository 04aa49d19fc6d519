//! Command-line interface for binwatch, built on clap.
//!
//! Defines [`Cli`] with its [`Command`] tree and the global flags
//! (`--config`, `--verbose`).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::tasks::{Priority, TaskStatus};

/// Waste-bin fill monitoring with task routing and staff notification.
#[derive(Debug, Parser)]
#[command(name = "binwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./binwatch.toml when present).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Feed bin readings (one JSON object per line) through the pipeline.
    Ingest {
        /// File to read, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Run without the modem; SMS notifications are skipped.
        #[arg(long)]
        no_sms: bool,
    },

    /// Inspect and change tasks in the configured store.
    #[command(subcommand)]
    Task(TaskCommand),

    /// Talk to the GSM modem directly.
    #[command(subcommand)]
    Modem(ModemCommand),

    /// Run the whole pipeline against a simulated modem.
    Demo,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// List tasks, oldest first.
    List {
        #[arg(long)]
        status: Option<StatusArg>,
        #[arg(long)]
        bin: Option<String>,
    },
    /// Open a manual task.
    Create {
        bin: String,
        #[arg(long)]
        location: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Assign a pending task to a staff member and notify them.
    Assign {
        task_id: String,
        staff_id: String,
        /// Name recorded as the assigner.
        #[arg(long)]
        by: Option<String>,
    },
    Complete {
        task_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Cancel {
        task_id: String,
    },
    Archive {
        task_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ModemCommand {
    /// Connect and print a diagnosis of port, SIM, network and SMSC.
    Check,
    /// Send one SMS.
    Send {
        number: String,
        message: String,
        /// Use PDU mode instead of text mode.
        #[arg(long)]
        pdu: bool,
    },
}

/// Priority accepted on the command line, mapped to [`Priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::High => Priority::High,
            PriorityArg::Critical => Priority::Critical,
        }
    }
}

/// Status filter accepted on the command line, mapped to [`TaskStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Pending,
    InProgress,
    Done,
    Cancelled,
    Archived,
}

impl From<StatusArg> for TaskStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => TaskStatus::Pending,
            StatusArg::InProgress => TaskStatus::InProgress,
            StatusArg::Done => TaskStatus::Done,
            StatusArg::Cancelled => TaskStatus::Cancelled,
            StatusArg::Archived => TaskStatus::Archived,
        }
    }
}
