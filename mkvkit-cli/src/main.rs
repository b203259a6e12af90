//! mkvkit CLI - inspect, edit and remux Matroska files.

mod commands;

use clap::{Parser, Subcommand};
use commands::{CmdCompletions, CmdEdit, CmdInfo, CmdRemux, Status};
use console::style;

/// Output mode for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Normal output with progress bar.
    Normal,
    /// JSON output for programmatic parsing.
    Json,
    /// Quiet mode with minimal output.
    Quiet,
    /// Verbose mode with debug logging.
    Verbose,
}

impl OutputMode {
    /// Whether human-readable output is printed.
    pub fn is_interactive(self) -> bool {
        matches!(self, OutputMode::Normal | OutputMode::Verbose)
    }
}

/// Command-line arguments for the mkvkit tool.
#[derive(Parser, Debug)]
#[command(name = "mkvkit")]
#[command(version)]
#[command(about = "Inspect, edit and remux Matroska and WebM files")]
#[command(long_about = "mkvkit reads the element structure of Matroska files, \
    rewrites their metadata in place and remuxes them into new files.\n\n\
    EXAMPLES:\n    \
    mkvkit info movie.mkv\n    \
    mkvkit info movie.mkv --full --json\n    \
    mkvkit edit movie.mkv --title \"Night of the Living Bytes\"\n    \
    mkvkit edit movie.mkv --chapters-from other.mkv --remove-tags\n    \
    mkvkit remux part1.mkv part2.mkv -o joined.mkv\n    \
    mkvkit remux movie.mkv -o movie.mkv --split size:700M --link\n\n\
    EXIT CODES:\n    \
    0  success\n    \
    1  success, but the input had structural anomalies\n    \
    2  failure")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with_all = ["quiet", "json"])]
    verbose: bool,

    /// Quiet mode (no logging, no progress)
    #[arg(short, long, global = true, conflicts_with_all = ["verbose", "json"])]
    quiet: bool,

    /// JSON output mode for programmatic parsing
    #[arg(long, global = true, conflicts_with_all = ["verbose", "quiet"])]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the element layout, tracks and anomalies of a file
    Info(CmdInfo),
    /// Rewrite the metadata of a file in place
    Edit(CmdEdit),
    /// Remux one or more files into new Matroska output
    Remux(CmdRemux),
    /// Generate shell completions
    Completions(CmdCompletions),
}

impl Cli {
    /// Determine the output mode based on flags.
    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else if self.verbose {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        }
    }
}

/// Format bytes as human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable string.
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    if total_seconds >= 3600 {
        format!("{}h{}m{}s", total_seconds / 3600, (total_seconds % 3600) / 60, total_seconds % 60)
    } else if total_seconds >= 60 {
        format!("{}m{}s", total_seconds / 60, total_seconds % 60)
    } else {
        format!("{:.0}s", seconds)
    }
}

fn main() {
    let cli = Cli::parse();
    let output_mode = cli.output_mode();

    // Initialize logging (not in JSON or quiet mode)
    if output_mode.is_interactive() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(if cli.verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            })
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    let result = match &cli.command {
        Command::Info(cmd) => cmd.run(output_mode),
        Command::Edit(cmd) => {
            if output_mode.is_interactive() {
                print_header();
            }
            cmd.run(output_mode)
        }
        Command::Remux(cmd) => {
            if output_mode.is_interactive() {
                print_header();
            }
            cmd.run(output_mode)
        }
        Command::Completions(cmd) => cmd.run::<Cli>().map(|()| Status::Success),
    };

    match result {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(e) => {
            if output_mode == OutputMode::Json {
                let error = serde_json::json!({
                    "type": "error",
                    "message": format!("{:#}", e)
                });
                println!("{}", error);
            } else if output_mode != OutputMode::Quiet {
                eprintln!("{} {:#}", style("Error:").red().bold(), e);
            }
            std::process::exit(Status::FAILURE_EXIT_CODE);
        }
    }
}

fn print_header() {
    println!();
    println!(
        "{}",
        style("+---------------------------------------------------------+").cyan()
    );
    println!(
        "{}  {}  {}",
        style("|").cyan(),
        style("MKVKIT").cyan().bold(),
        style("                                              |").cyan()
    );
    println!(
        "{}  {}  {}",
        style("|").cyan(),
        style("Matroska inspection, in-place editing and remuxing").white(),
        style("|").cyan()
    );
    println!(
        "{}",
        style("+---------------------------------------------------------+").cyan()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    // ===== format_size tests =====

    #[test]
    fn test_format_size_bytes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1023), "1023 B");
    }

    #[test]
    fn test_format_size_kilobytes() {
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(10240), "10.00 KB");
    }

    #[test]
    fn test_format_size_megabytes() {
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(700 * 1024 * 1024), "700.00 MB");
    }

    #[test]
    fn test_format_size_gigabytes() {
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.00 GB");
    }

    // ===== format_duration tests =====

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(30.6), "31s");
    }

    #[test]
    fn test_format_duration_minutes() {
        assert_eq!(format_duration(60.0), "1m0s");
        assert_eq!(format_duration(3599.0), "59m59s");
    }

    #[test]
    fn test_format_duration_hours() {
        assert_eq!(format_duration(3600.0), "1h0m0s");
        assert_eq!(format_duration(7384.0), "2h3m4s");
    }

    // ===== Argument parsing tests =====

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_mode_default() {
        let cli = Cli::try_parse_from(["mkvkit", "info", "movie.mkv"]).unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Normal);
    }

    #[test]
    fn test_output_mode_json_after_subcommand() {
        let cli = Cli::try_parse_from(["mkvkit", "info", "movie.mkv", "--full", "--json"]).unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
        let Command::Info(info) = cli.command else {
            panic!("expected info");
        };
        assert!(info.full);
    }

    #[test]
    fn test_output_mode_quiet() {
        let cli = Cli::try_parse_from(["mkvkit", "-q", "edit", "movie.mkv", "--title", "T"]).unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Quiet);
        assert!(!cli.output_mode().is_interactive());
    }

    #[test]
    fn test_output_mode_verbose() {
        let cli = Cli::try_parse_from(["mkvkit", "remux", "a.mkv", "-o", "b.mkv", "-v"]).unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Verbose);
    }

    #[test]
    fn test_conflicting_modes_rejected() {
        assert!(Cli::try_parse_from(["mkvkit", "--json", "--quiet", "info", "a.mkv"]).is_err());
    }

    #[test]
    fn test_remux_arguments() {
        let cli = Cli::try_parse_from([
            "mkvkit",
            "remux",
            "a.mkv",
            "b.mkv",
            "-o",
            "out.mkv",
            "--split",
            "duration:300s",
            "--link",
            "--cues",
            "2:all",
            "--hack",
            "no_lacing",
            "--hack",
            "no_cue_duration",
            "--cluster-duration",
            "2000",
        ])
        .unwrap();
        let Command::Remux(remux) = cli.command else {
            panic!("expected remux");
        };
        assert_eq!(remux.inputs.len(), 2);
        assert_eq!(remux.split.as_deref(), Some("duration:300s"));
        assert!(remux.link);
        assert_eq!(remux.cues, vec!["2:all".to_string()]);
        assert_eq!(remux.hacks.len(), 2);
        assert_eq!(remux.cluster_duration, Some(2000));
    }

    #[test]
    fn test_remux_requires_output() {
        assert!(Cli::try_parse_from(["mkvkit", "remux", "a.mkv"]).is_err());
    }
}
