use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface for the `plancton` daemon binary.
///
/// The daemonization harness itself (pid-file, fork, signal plumbing) is
/// an external collaborator; these flags only locate the directories
/// and engine socket the core control loop needs.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct DaemonArgs {
    /// Directory holding `config.yaml`
    #[clap(long, default_value = "/etc/plancton")]
    pub confdir: PathBuf,

    /// Directory holding the `drain`/`drain-stop`/`force-stop` sentinel files
    #[clap(long, default_value = "/var/run/plancton")]
    pub rundir: PathBuf,

    /// Directory to write `plancton.log` into
    #[clap(long, default_value = "/var/log/plancton")]
    pub logdir: PathBuf,

    /// Container engine socket URL
    #[clap(long, default_value = "unix:///var/run/docker.sock")]
    pub socket: String,

    /// Log to stderr instead of `<logdir>/plancton.log`
    #[clap(long)]
    pub foreground: bool,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            confdir: PathBuf::from("/etc/plancton"),
            rundir: PathBuf::from("/var/run/plancton"),
            logdir: PathBuf::from("/var/log/plancton"),
            socket: "unix:///var/run/docker.sock".to_owned(),
            foreground: false,
        }
    }
}

/// The sibling control CLI: issues out-of-band commands to a running
/// daemon purely via sentinel-file presence.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct PlanctlArgs {
    /// Directory holding the sentinel files; must match the daemon's `--rundir`
    #[clap(long, default_value = "/var/run/plancton")]
    pub rundir: PathBuf,

    #[command(subcommand)]
    pub command: PlanctlCommand,
}

#[derive(Subcommand, Debug, Clone, Eq, PartialEq)]
pub enum PlanctlCommand {
    /// Stop starting new workers; existing ones keep running
    Drain {
        /// Also exit the daemon once no workers remain
        #[clap(long)]
        stop: bool,
    },
    /// Leave drain mode
    Resume,
    /// Evict all workers this tick, then go back to normal operation
    Kill,
    /// Print which sentinel files are currently present
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_daemon_args_defaults_parse() {
        let args = DaemonArgs::parse_from(["plancton"]);
        assert_eq!(args.confdir, PathBuf::from("/etc/plancton"));
        assert!(!args.foreground);
    }

    #[test]
    fn test_planctl_drain_stop_flag() {
        let args = PlanctlArgs::parse_from(["planctl", "drain", "--stop"]);
        assert_eq!(args.command, PlanctlCommand::Drain { stop: true });
    }

    #[test]
    fn test_planctl_command_is_well_formed() {
        PlanctlArgs::command().debug_assert();
    }
}
