//! CLI entrypoint for the mpibridge harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use mpibridge_harness::{HarnessReport, ShutdownPath, run_all};

/// Lifecycle verification for mpibridge.
#[derive(Debug, Parser)]
#[command(name = "mpibridge-harness")]
#[command(about = "Shutdown-path verification harness for mpibridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run shutdown-path scenarios against the simulated runtime.
    Scenario {
        /// `explicit`, `finalize`, `exit`, `degraded`, or `all`.
        #[arg(long, default_value = "all")]
        path: String,
        /// Structured JSONL log path (truncated first).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output report path (if omitted, prints to stdout).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Run identifier recorded in the report.
        #[arg(long, default_value = "mpibridge-harness")]
        run_id: String,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// Log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scenario {
            path,
            log,
            report,
            run_id,
        } => {
            let paths = ShutdownPath::parse_selection(&path)?;
            if let Some(log) = &log {
                if let Some(parent) = log.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::File::create(log)?;
            }

            let outcomes = run_all(&paths, log.as_deref())?;
            for outcome in &outcomes {
                let status = if outcome.passed { "PASS" } else { "FAIL" };
                eprintln!(
                    "{status} {} ({} checks)",
                    outcome.path.as_str(),
                    outcome.checks.len()
                );
                for check in outcome.failed_checks() {
                    eprintln!(
                        "  - {}: {}",
                        check.name,
                        check.detail.as_deref().unwrap_or("failed")
                    );
                }
            }

            let mut harness_report = HarnessReport::new(run_id, outcomes);
            if let Some(log) = &log {
                harness_report.attach_log(log)?;
            }
            let json = harness_report.to_json_pretty()?;
            match report {
                Some(out) => {
                    std::fs::write(&out, json)?;
                    eprintln!("Report written to {}", out.display());
                }
                None => println!("{json}"),
            }

            if !harness_report.passed {
                return Err(format!("{} scenario(s) failed", harness_report.summary.failed).into());
            }
        }
        Command::ValidateLog { log } => {
            let text = std::fs::read_to_string(&log)?;
            match mpibridge_core::structured_log::validate_log_text(&text) {
                Ok(entries) => eprintln!("{}: {} valid entries", log.display(), entries.len()),
                Err(errors) => {
                    for err in &errors {
                        eprintln!("{err}");
                    }
                    return Err(format!("{} invalid field(s)", errors.len()).into());
                }
            }
        }
    }

    Ok(())
}
