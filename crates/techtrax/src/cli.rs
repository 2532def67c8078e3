//! Clap derive structures for the `techtrax` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// techtrax -- clinic queue client
#[derive(Debug, Parser)]
#[command(
    name = "techtrax",
    version,
    about = "Run and watch TechTrax clinic queues from the command line",
    long_about = "Command-line client for the TechTrax queue backend.\n\n\
        Signs in with email and password, keeps the session's tokens fresh,\n\
        and follows live queue changes over the push channel.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "TECHTRAX_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Server URL (overrides profile)
    #[arg(long, short = 'u', env = "TECHTRAX_URL", global = true)]
    pub url: Option<String>,

    /// Where to keep tokens when no profile is configured
    #[arg(long, env = "TECHTRAX_CREDENTIALS", global = true, value_enum)]
    pub credentials: Option<CredentialsArg>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TECHTRAX_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "TECHTRAX_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "TECHTRAX_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CredentialsArg {
    Keyring,
    File,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and store the session's tokens
    Login(LoginArgs),

    /// Close the session and forget stored tokens
    Logout,

    /// Show who the stored session belongs to
    Whoami,

    /// Follow a queue live over the push channel
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Inspect and operate a queue
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Send a command over the push channel
    Emit(EmitArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SESSION
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Account email (defaults to the profile's email)
    #[arg(long, short = 'e')]
    pub email: Option<String>,

    /// Read the password from the first line of stdin
    #[arg(long)]
    pub password_stdin: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  QUEUE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Selects a queue other than the signed-in doctor's own.
#[derive(Debug, Clone, Default, Args)]
pub struct QueueSelector {
    /// Tenant (clinic) id
    #[arg(long, global = true, requires = "doctor")]
    pub tenant: Option<String>,

    /// Doctor id
    #[arg(long, global = true, requires = "tenant")]
    pub doctor: Option<String>,

    /// Queue date (YYYY-MM-DD, defaults to today)
    #[arg(long, global = true)]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub selector: QueueSelector,

    /// Do not poll queue statistics
    #[arg(long)]
    pub no_stats: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

#[derive(Debug, Args)]
pub struct QueueArgs {
    #[command(flatten)]
    pub selector: QueueSelector,

    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Show the queue
    #[command(alias = "ls")]
    Show {
        /// Only waiting patients
        #[arg(long)]
        waiting: bool,
    },

    /// Look up another doctor's queue (requires --tenant and --doctor)
    Lookup,

    /// Show queue statistics
    Stats,

    /// Clock in (creates today's queue if needed)
    ClockIn,

    /// Clock out
    ClockOut,

    /// Build a queue from the day's appointments
    Create {
        /// Work day start (HH:MM)
        #[arg(long, default_value = "09:00")]
        start: String,
        /// Work day end (HH:MM)
        #[arg(long, default_value = "17:00")]
        end: String,
    },

    /// Check a patient in
    CheckIn {
        /// Patient id
        patient: String,
        /// Check-in type: walk-in, appointment, vip, emergency, late
        #[arg(long = "type", short = 't', default_value = "walkIn")]
        item_type: String,
    },

    /// Call a waiting patient
    Call {
        /// Queue item id
        item: String,
    },

    /// Start serving a called patient
    Serve {
        /// Queue item id
        item: String,
    },

    /// Mark a patient as done
    Finish {
        /// Queue item id
        item: String,
    },

    /// Cancel a queue item
    Cancel {
        /// Queue item id
        item: String,
        /// Cancellation reason
        #[arg(long)]
        reason: Option<String>,
    },

    /// Replace the waiting order (every waiting item id, in the new order)
    Reorder {
        #[arg(required = true, num_args = 1..)]
        items: Vec<String>,
    },

    /// Move one waiting patient (1-based positions)
    Move {
        from: usize,
        to: usize,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  EMIT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct EmitArgs {
    /// Event name (e.g. chat:join)
    pub event: String,

    /// JSON payload
    #[arg(default_value = "{}")]
    pub payload: String,

    /// Fire and forget instead of waiting for the acknowledgement
    #[arg(long)]
    pub no_ack: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or extend the config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
