mod activity;
mod child;
mod config;
mod relay;
mod restart;
mod signals;
mod supervisor;
mod watchdog;

use clap::{ArgAction, Parser};
use config::{Overrides, SupervisionConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Run a program and restart it if it freezes: when the child stops
/// producing output for too many watchdog ticks, kill it and (optionally)
/// start it again.
#[derive(Parser, Debug)]
#[command(name = "frostwatch", version, about)]
pub struct Cli {
    /// Relay the child's stdout
    #[arg(short = 'o', long = "stdout", value_name = "BOOL", action = ArgAction::Set)]
    forward_stdout: Option<bool>,

    /// Relay the child's stderr
    #[arg(short = 'e', long = "stderr", value_name = "BOOL", action = ArgAction::Set)]
    forward_stderr: Option<bool>,

    /// Connect our stdin to the child's stdin
    #[arg(short = 'i', long = "stdin", value_name = "BOOL", action = ArgAction::Set)]
    forward_stdin: Option<bool>,

    /// Restart automatically after the child exits or is killed
    #[arg(short, long)]
    restart: bool,

    /// Watchdog tick interval in seconds (default: 30)
    #[arg(short, long, value_name = "SECS")]
    time: Option<u64>,

    /// Number of silent ticks to allow before killing the child (default: 1)
    #[arg(short, long, value_name = "TICKS")]
    limit: Option<u32>,

    /// Max bytes per relay read (default: 1024)
    #[arg(short, long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Seconds to wait for the child after a termination request (default: 10)
    #[arg(long, value_name = "SECS")]
    grace: Option<u64>,

    /// Optional TOML config file; command-line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (silent ticks, signal delivery, relay lifecycle)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Command to supervise, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            forward_stdout: self.forward_stdout,
            forward_stderr: self.forward_stderr,
            forward_stdin: self.forward_stdin,
            relay_buffer_size: self.buffer_size,
            auto_restart: self.restart,
            tick_interval_secs: self.time,
            max_silent_ticks: self.limit,
            termination_grace_secs: self.grace,
        }
    }

    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn print_settings(config: &SupervisionConfig, command: &[String]) {
    println!("frostwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("command:           {}", command.join(" "));
    println!("tick interval:     {}s", config.tick_interval.as_secs());
    println!("max silent ticks:  {}", config.max_silent_ticks);
    println!("auto restart:      {}", config.auto_restart);
    println!("forward stdout:    {}", config.forward_stdout);
    println!("forward stderr:    {}", config.forward_stderr);
    println!("forward stdin:     {}", config.forward_stdin);
    println!("relay buffer size: {}", config.relay_buffer_size);
    println!("termination grace: {}s", config.termination_grace.as_secs());
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout belongs to the child, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("frostwatch={}", cli.log_level()))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match config::load_file_config(cli.config.as_deref())
        .and_then(|file| SupervisionConfig::resolve(file, &cli.overrides()))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("frostwatch: {e}");
            return ExitCode::from(2);
        }
    };

    if cli.dry_run {
        print_settings(&config, &cli.command);
        return ExitCode::SUCCESS;
    }

    let shutdown = match signals::install() {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let code = restart::run(&cli.command, &config, &shutdown).await;
    tracing::debug!(code, "exiting");
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_command_is_required() {
        let err = Cli::try_parse_from(["frostwatch"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_short_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "frostwatch", "-o", "false", "-e", "true", "-i", "false", "-r", "-t", "5", "-l", "3",
            "-b", "4096", "server", "--port", "80",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.forward_stdout, Some(false));
        assert_eq!(overrides.forward_stderr, Some(true));
        assert_eq!(overrides.forward_stdin, Some(false));
        assert!(overrides.auto_restart);
        assert_eq!(overrides.tick_interval_secs, Some(5));
        assert_eq!(overrides.max_silent_ticks, Some(3));
        assert_eq!(overrides.relay_buffer_size, Some(4096));
        assert_eq!(cli.command, vec!["server", "--port", "80"]);
    }

    #[test]
    fn test_child_flags_are_not_ours() {
        let cli = Cli::try_parse_from(["frostwatch", "ls", "-l", "-t"]).unwrap();
        assert_eq!(cli.limit, None);
        assert_eq!(cli.time, None);
        assert_eq!(cli.command, vec!["ls", "-l", "-t"]);
    }

    #[test]
    fn test_defaults_resolve_to_documented_config() {
        let cli = Cli::try_parse_from(["frostwatch", "sleep", "10"]).unwrap();
        let config =
            SupervisionConfig::resolve(config::FileConfig::default(), &cli.overrides()).unwrap();
        assert_eq!(config, SupervisionConfig::default());
        assert_eq!(config.tick_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_log_level_flags() {
        let verbose = Cli::try_parse_from(["frostwatch", "-v", "true"]).unwrap();
        assert_eq!(verbose.log_level(), "debug");
        let quiet = Cli::try_parse_from(["frostwatch", "-q", "true"]).unwrap();
        assert_eq!(quiet.log_level(), "warn");
        let normal = Cli::try_parse_from(["frostwatch", "true"]).unwrap();
        assert_eq!(normal.log_level(), "info");
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["frostwatch", "-v", "-q", "true"]).is_err());
    }
}
