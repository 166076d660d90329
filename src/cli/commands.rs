use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tasker", about = concat!("tasker v", env!("CARGO_PKG_VERSION"), " - a nested to-do list in a JSON file"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use a different config directory (default: $TASKER_HOME or ~/.tasker)
    #[arg(long = "config-dir", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error or off (default: $RUST_LOG)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the config file
    Init(InitArgs),
    /// List tasks in the active (or completed) view
    List(ListArgs),
    /// Append a top-level task
    Add(AddArgs),
    /// Insert a task after task N, at the same depth
    Insert(InsertArgs),
    /// Replace the text of task N
    Edit(EditArgs),
    /// Toggle task N between active and completed
    Done(TaskArgs),
    /// Cycle the star colour of task N
    Star(TaskArgs),
    /// Nest task N one level deeper
    Indent(TaskArgs),
    /// Move task N and its subtasks one level out
    Unindent(TaskArgs),
    /// Move task N and its subtasks above the previous group
    Up(TaskArgs),
    /// Move task N and its subtasks below the next group
    Down(TaskArgs),
    /// Delete task N
    Rm(TaskArgs),
    /// Set or clear the reminder of task N
    Remind(RemindArgs),
    /// Fire the earliest due reminder, if any
    Due,
    /// Replace the Microsoft To Do list with the current tasks
    Sync(SyncArgs),
    /// Show or edit the config
    Config(ConfigCmd),
    /// Run the interactive panel, reading commands from stdin
    Panel,
}

#[derive(Args)]
pub struct InitArgs {
    /// Where to keep the task file (default: <config dir>/tasks.json)
    #[arg(long)]
    pub data_file: Option<PathBuf>,
    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// List completed tasks instead of active ones
    #[arg(long)]
    pub completed: bool,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
    /// Shorten task text to fit this many columns
    #[arg(long)]
    pub width: Option<usize>,
}

#[derive(Args)]
pub struct AddArgs {
    /// Task text
    pub text: String,
}

/// Address of one task: its number in `tasker list` output.
#[derive(Args)]
pub struct TaskArgs {
    /// Task number as shown by `tasker list`
    pub number: usize,
    /// Count N in the completed view
    #[arg(long)]
    pub completed: bool,
}

#[derive(Args)]
pub struct InsertArgs {
    #[command(flatten)]
    pub task: TaskArgs,
    /// Text for the new task (default: empty)
    pub text: Option<String>,
}

#[derive(Args)]
pub struct EditArgs {
    #[command(flatten)]
    pub task: TaskArgs,
    /// New text
    pub text: String,
}

#[derive(Args)]
pub struct RemindArgs {
    #[command(flatten)]
    pub task: TaskArgs,
    /// When: +45m, +2h, +1d, or 2024-05-06T09:00 (default: in one hour)
    #[arg(conflicts_with = "clear")]
    pub when: Option<String>,
    /// Remove the reminder
    #[arg(long)]
    pub clear: bool,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Sign in with a device code if no cached token is usable
    #[arg(short, long)]
    pub interactive: bool,
}

#[derive(Args)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the config file location and values
    Show,
    /// Set a config key
    Set {
        /// Key, e.g. ms_client_id
        key: String,
        /// Value
        value: String,
    },
}
