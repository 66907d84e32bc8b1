#![deny(unused)]
//! CodeMentor - sandboxed playground and AI tutor.
//!
//! Command-line front end over the sandbox execution engine and the model
//! gateway. Every subcommand loads the layered configuration first.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codementor_core::config::AppConfig;
use codementor_core::mocks::InMemoryUsageSink;
use codementor_core::telemetry::configure_tracing;
use codementor_core::{AiContext, CallerId, ExecutionRequest, Language};
use codementor_model_gateway::{AiProviderOrchestrator, TutorService};
use codementor_sandbox::{harden_loops, Playground, SafetyValidator};

#[derive(Parser)]
#[command(name = "codementor")]
#[command(about = "Run learner HTML/CSS/JavaScript safely and ask the AI tutor about it")]
#[command(version)]
struct Cli {
    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a file for constructs the sandbox refuses
    Validate {
        file: PathBuf,
        /// Panel language (inferred from the extension when omitted)
        #[arg(short, long)]
        language: Option<Language>,
    },
    /// Print a script with loop guards inserted
    Harden {
        file: PathBuf,
        /// Iterations allowed per loop
        #[arg(long)]
        max_iterations: Option<u64>,
    },
    /// Validate, harden and execute a project in the sandbox
    Run {
        #[arg(long)]
        html: Option<PathBuf>,
        #[arg(long)]
        css: Option<PathBuf>,
        #[arg(long)]
        js: Option<PathBuf>,
        /// Execute the script as written
        #[arg(long)]
        no_harden: bool,
    },
    /// Ask the tutor a question, optionally about a file
    Ask {
        prompt: String,
        #[arg(long)]
        code: Option<PathBuf>,
        /// Return a scored assessment of --code instead of a free answer
        #[arg(long, requires = "code")]
        feedback: bool,
        /// Caller identity charged against the daily quota
        #[arg(long, default_value = "cli")]
        caller: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load().context("failed to load configuration")?;
    if cli.json_logs {
        config.logging.json_logs = true;
    }
    configure_tracing(&config.logging)?;

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting CodeMentor");

    match cli.command {
        Commands::Validate { file, language } => {
            let language = match language {
                Some(language) => language,
                None => infer_language(&file)?,
            };
            let code = read(&file).await?;
            let report = SafetyValidator::new()
                .with_max_length(config.sandbox.max_code_length)
                .validate(&code, language);

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.safe {
                bail!("{} unsafe construct(s) found", report.errors.len());
            }
        }

        Commands::Harden {
            file,
            max_iterations,
        } => {
            let code = read(&file).await?;
            let max = max_iterations.unwrap_or(config.sandbox.max_loop_iterations);
            println!("{}", harden_loops(&code, max));
        }

        Commands::Run {
            html,
            css,
            js,
            no_harden,
        } => {
            if no_harden {
                config.sandbox.harden_loops = false;
            }
            let request = ExecutionRequest::new(
                read_optional(html.as_deref()).await?,
                read_optional(css.as_deref()).await?,
                read_optional(js.as_deref()).await?,
            );

            let playground = Playground::new(&config.sandbox);
            match playground.run(&request).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    return Err(e.into());
                }
            }
            playground.container().destroy();
        }

        Commands::Ask {
            prompt,
            code,
            feedback,
            caller,
        } => {
            let orchestrator = Arc::new(AiProviderOrchestrator::from_config(&config.model_gateway)?);
            tracing::info!(providers = ?orchestrator.available_providers(), "Model gateway ready");

            let caller = CallerId::new(caller);
            let outcome = match code {
                Some(path) if feedback => {
                    let language = infer_language(&path)?;
                    let code = read(&path).await?;
                    let tutor = TutorService::new(
                        orchestrator.clone(),
                        Arc::new(InMemoryUsageSink::new()),
                        &config.tutor,
                    );
                    tutor
                        .feedback(&caller, &code, language)
                        .await
                        .map(|f| serde_json::to_string_pretty(&f))
                }
                Some(path) => {
                    let language = infer_language(&path).unwrap_or(Language::Javascript);
                    let context = AiContext::with_code(read(&path).await?).language(language);
                    orchestrator
                        .get_response(&prompt, Some(&context))
                        .await
                        .map(|r| serde_json::to_string_pretty(&r))
                }
                None => orchestrator
                    .get_response(&prompt, None)
                    .await
                    .map(|r| serde_json::to_string_pretty(&r)),
            };

            match outcome {
                Ok(json) => println!("{}", json?),
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

fn infer_language(path: &Path) -> anyhow::Result<Language> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => Ok(Language::Html),
        "css" => Ok(Language::Css),
        "js" | "mjs" => Ok(Language::Javascript),
        _ => bail!("cannot infer language of {}; pass --language", path.display()),
    }
}

async fn read(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn read_optional(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => read(path).await,
        None => Ok(String::new()),
    }
}
