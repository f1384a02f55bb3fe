use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "goalwatch")]
#[command(version)]
#[command(about = "Live football watcher for quick 0-0 -> 1-0 -> 1-1 equalisers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and <env>.toml
    #[arg(short, long, default_value = "config", env = "GOALWATCH_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Override storage.state_dir
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Poll the live feed and send notifications (default)
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Print tracking state counts from the store
    Status,
    /// Validate configuration and print the effective settings
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run { once: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["goalwatch"]);
        assert_eq!(cli.command(), Commands::Run { once: false });
        assert_eq!(cli.config_dir, PathBuf::from("config"));
    }

    #[test]
    fn test_run_once_and_state_dir() {
        let cli = Cli::parse_from(["goalwatch", "--state-dir", "/tmp/gw", "run", "--once"]);
        assert_eq!(cli.command(), Commands::Run { once: true });
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/gw")));
    }

    #[test]
    fn test_check_config_subcommand() {
        let cli = Cli::parse_from(["goalwatch", "check-config"]);
        assert_eq!(cli.command(), Commands::CheckConfig);
    }
}
