use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kassabot")]
#[command(author, version, about = "Cash-desk bot deposit reconciliation watcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconcile watcher until Ctrl-C
    Run,

    /// Run a single reconcile poll cycle and exit (for cron or debugging)
    Poll,

    /// Show watcher health keys and recent reconcile attempts
    Status {
        /// Number of reconcile-log rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
