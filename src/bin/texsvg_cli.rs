//! texsvg CLI - Editor extension entry point
//!
//! Commands: insert, render, probe, source
//! `insert` writes the modified document; the others print JSON or TeX to stdout.
//! Exit codes: 0 success, 1 setup error, 2 pipeline failure.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use texsvg_core::{
    compute_job_hash, select_strategy, tex_source, CompileRequest, DiagnosticLog, EquationPipeline,
    SvgDocument, ToolchainConfig, ENGINE_VERSION,
};

const DEFAULT_FORMULA: &str = r"\(\displaystyle\lim_{n\to \infty}\sum_{k=1}^n\frac{1}{k^2}=\frac{\pi^2}{6}\)";

#[derive(Parser)]
#[command(name = "texsvg-cli")]
#[command(about = "texsvg CLI - LaTeX equations rendered into SVG documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON toolchain configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostic log; insert and render only write it with `--debug true` (default: ~/texsvg.log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct FormulaArgs {
    /// LaTeX formula, math delimiters included
    #[arg(short = 'f', long = "formula", visible_alias = "formule", default_value = DEFAULT_FORMULA)]
    formula: String,

    /// Comma-separated extra packages
    #[arg(short, long, default_value = "")]
    packages: String,

    /// Write the diagnostic log
    #[arg(short, long, action = ArgAction::Set, default_value_t = false)]
    debug: bool,
}

impl FormulaArgs {
    fn request(&self) -> CompileRequest {
        CompileRequest::new(self.formula.as_str())
            .with_packages(&self.packages)
            .with_debug(self.debug)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Insert the equation into the current layer of FILE
    Insert {
        #[command(flatten)]
        formula: FormulaArgs,

        /// Where to write the document (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Host SVG document
        file: PathBuf,
    },

    /// Render the equation group and print a JSON manifest
    Render {
        #[command(flatten)]
        formula: FormulaArgs,

        /// Host document used for naming and page size
        #[arg(long)]
        document: Option<PathBuf>,
    },

    /// Probe the toolchain
    Probe,

    /// Print the generated TeX source
    Source {
        #[command(flatten)]
        formula: FormulaArgs,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match ToolchainConfig::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ToolchainConfig::default(),
    };

    let debug = match &cli.command {
        Commands::Insert { formula, .. } | Commands::Render { formula, .. } => formula.debug,
        Commands::Probe => cli.log_file.is_some(),
        Commands::Source { .. } => false,
    };
    if ignores_log_file(cli.log_file.as_deref(), debug) {
        log::warn!("--log-file has no effect without --debug true");
    }
    let log = match open_log(cli.log_file.as_deref(), debug) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Cannot open diagnostic log: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let pipeline = EquationPipeline::new(config, log);

    match cli.command {
        Commands::Insert { formula, output, file } => {
            let mut document = match SvgDocument::load(&file) {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("Cannot read {}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };

            if let Err(e) = pipeline.insert(&formula.request(), &mut document) {
                eprintln!("{}", e);
                return ExitCode::from(2);
            }

            let xml = document.to_xml_string();
            let written = match &output {
                Some(path) => fs::write(path, xml),
                None => {
                    print!("{}", xml);
                    Ok(())
                }
            };
            match written {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Cannot write document: {}", e);
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Render { formula, document } => {
            let host = match document {
                Some(path) => match SvgDocument::load(&path) {
                    Ok(d) => d,
                    Err(e) => {
                        println!(
                            "{}",
                            serde_json::json!({
                                "success": false,
                                "error": format!("Cannot read {}: {}", path.display(), e),
                            })
                        );
                        return ExitCode::FAILURE;
                    }
                },
                None => SvgDocument::blank(),
            };

            let request = formula.request();
            match pipeline.generate(&request, &host) {
                Ok(outcome) => {
                    let job_hash = compute_job_hash(&request, outcome.strategy, ENGINE_VERSION).ok();
                    let output = serde_json::json!({
                        "success": true,
                        "runId": uuid::Uuid::new_v4(),
                        "groupId": outcome.group.name,
                        "strategy": outcome.strategy,
                        "jobHash": job_hash,
                        "createdAt": chrono::Utc::now().to_rfc3339(),
                        "svg": outcome.group.element.to_xml_string(),
                    });
                    print_json(&output);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                    });
                    println!("{}", output);
                    ExitCode::from(2)
                }
            }
        }

        Commands::Probe => match pipeline.probe() {
            Ok(availability) => {
                let output = serde_json::json!({
                    "tools": availability,
                    "strategy": select_strategy(&availability),
                });
                print_json(&output);
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
                ExitCode::from(2)
            }
        },

        Commands::Source { formula } => {
            print!("{}", tex_source(&formula.request()));
            ExitCode::SUCCESS
        }
    }
}

fn ignores_log_file(path: Option<&Path>, debug: bool) -> bool {
    path.is_some() && !debug
}

fn open_log(path: Option<&Path>, debug: bool) -> io::Result<DiagnosticLog> {
    if !debug {
        return Ok(DiagnosticLog::disabled());
    }
    match path {
        Some(p) => DiagnosticLog::open(p),
        None => DiagnosticLog::open(&DiagnosticLog::default_path()),
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Cannot serialise output: {}", e),
    }
}
