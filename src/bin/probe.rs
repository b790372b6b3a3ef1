use std::{
    fs,
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use probewerk::{
    builtin_catalog, filter_scenarios, load_catalog,
    report::{default_out_path, ensure_parent_dir, render_case, render_totals, write_record},
    safety_from_config, BackendRegistry, ProbeConfig, ProbeError, ProbeRunner, SafetyMode,
    Scenario,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "probe")]
#[command(about = "Probe OpenAI-compatible LLM backends and report what they return")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the scenarios that would run
    List {
        /// Scenario file or directory (YAML/JSON); defaults to the built-in catalog
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Run scenarios and print what each backend returned
    Run {
        /// Scenario file or directory (YAML/JSON); defaults to the built-in catalog
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Run only scenarios whose name contains this substring (repeatable)
        #[arg(long)]
        filter: Vec<String>,

        /// Append one JSON line per scenario to this file
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write JSONL records to stdout instead of the rendered report
        #[arg(long)]
        json: bool,

        /// Skip the pretty-printed raw fragments
        #[arg(long)]
        summary_only: bool,
    },
    /// Run one text through the configured safety collaborator
    Check {
        #[arg(long)]
        text: String,

        /// mock, moderations or shield; overrides SAFETY_MODE
        #[arg(long)]
        mode: Option<String>,
    },
}

fn scenarios_from(catalog: Option<PathBuf>) -> Result<Vec<Scenario>, ProbeError> {
    match catalog {
        Some(path) => load_catalog(path),
        None => Ok(builtin_catalog()),
    }
}

/// Configuration problems end the process before anything is sent.
fn fatal(error: ProbeError) -> ! {
    eprintln!("{} {error}", "error:".red().bold());
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,probewerk=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    match args.command {
        Command::List { catalog } => {
            let scenarios = scenarios_from(catalog).unwrap_or_else(|e| fatal(e));
            for scenario in &scenarios {
                println!(
                    "{:<36} {:<20} {:<17} {}",
                    scenario.name,
                    scenario.backend,
                    scenario.api.path(),
                    scenario.model
                );
            }
            Ok(())
        }
        Command::Run {
            catalog,
            filter,
            out,
            json,
            summary_only,
        } => {
            let scenarios = scenarios_from(catalog).unwrap_or_else(|e| fatal(e));
            let scenarios = filter_scenarios(scenarios, &filter);
            if scenarios.is_empty() {
                eprintln!("No scenarios matched.");
                return Ok(());
            }

            let config = ProbeConfig::from_env()
                .map(|config| config.with_credentials_for(&scenarios))
                .unwrap_or_else(|e| fatal(e));
            if let Err(error) = config.preflight(&scenarios) {
                fatal(error);
            }

            let backends = BackendRegistry::from_config(&config).unwrap_or_else(|e| fatal(e));
            let mut runner = ProbeRunner::new(backends, config.credentials.clone());
            if scenarios.iter().any(|scenario| scenario.shield.is_some()) {
                runner = runner.with_safety(safety_from_config(&config).unwrap_or_else(|e| fatal(e)));
            }

            let mut writer = match out {
                Some(path) => {
                    ensure_parent_dir(&path)?;
                    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
                    eprintln!("Writing results to {}", path.display());
                    Some(BufWriter::new(file))
                }
                None if json => None,
                None => {
                    let path = default_out_path();
                    ensure_parent_dir(&path)?;
                    eprintln!("Writing results to {}", path.display());
                    Some(BufWriter::new(fs::File::create(&path)?))
                }
            };

            let stdout = io::stdout();
            let mut failure: Option<io::Error> = None;
            let report = runner
                .run_each(&scenarios, |case| {
                    let mut console = stdout.lock();
                    let written = if json {
                        write_record(&mut console, case)
                    } else {
                        render_case(&mut console, case, !summary_only)
                    }
                    .and_then(|_| match writer.as_mut() {
                        Some(file) => write_record(file, case),
                        None => Ok(()),
                    });
                    if let Err(error) = written {
                        failure.get_or_insert(error);
                    }
                })
                .await;

            if let Some(error) = failure {
                return Err(error.into());
            }
            if let Some(mut file) = writer {
                file.flush()?;
            }
            if !json {
                render_totals(&mut stdout.lock(), &report)?;
            }
            Ok(())
        }
        Command::Check { text, mode } => {
            let mut config = ProbeConfig::from_env().unwrap_or_else(|e| fatal(e));
            if let Some(mode) = mode {
                config.safety.mode = SafetyMode::parse(&mode).unwrap_or_else(|e| fatal(e));
            }

            let safety = safety_from_config(&config).unwrap_or_else(|e| fatal(e));
            let verdict = safety.check(&text).await?;
            if verdict.violation {
                println!(
                    "{} {}",
                    "Safety violation detected:".red().bold(),
                    verdict.message.as_deref().unwrap_or("")
                );
            } else {
                println!("No safety violation detected");
            }
            Ok(())
        }
    }
}
