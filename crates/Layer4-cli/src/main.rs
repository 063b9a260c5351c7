//! SkillForge CLI - Main entry point

mod cli;
mod skills;

use anyhow::Context;
use clap::{Parser, Subcommand};
use skillforge_foundation::{AgentConfig, ConfigLoader, SandboxKind};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SkillForge - autonomous task agent that learns reusable skills
#[derive(Parser, Debug)]
#[command(name = "skillforge")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Extra settings file, applied after the standard layers
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// OpenAI-compatible endpoint of the oracle
    #[arg(long, global = true)]
    oracle_url: Option<String>,

    /// Model to use
    #[arg(long, global = true)]
    model: Option<String>,

    /// Sandbox backend (process, container)
    #[arg(long, global = true)]
    sandbox: Option<SandboxKind>,

    /// Skill library directory
    #[arg(long, global = true)]
    skills_dir: Option<PathBuf>,

    /// Do not verify or save skills from this run
    #[arg(long, global = true)]
    no_learn: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route, plan and execute a request
    Run {
        /// Request text
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Print the routing decision for a request as JSON
    Route {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Manage the skill library
    Skills {
        #[command(subcommand)]
        command: skills::SkillsCommand,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn dispatch(args: Args) -> anyhow::Result<ExitCode> {
    let config = load_config(&args)?;

    match args.command {
        Command::Run { request } => cli::run_once(&config, &request.join(" ")).await,
        Command::Route { request } => {
            cli::print_route(&config, &request.join(" "))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Skills { command } => {
            skills::handle(&config, command).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// stderr 로깅. `RUST_LOG` 가 있으면 그것이 우선
fn init_logging(debug: bool) {
    let default = if debug {
        "warn,skillforge_foundation=debug,skillforge_sandbox=debug,skillforge_oracle=debug,\
         skillforge_skill=debug,skillforge_agent=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Settings layers, then command-line overrides
fn load_config(args: &Args) -> anyhow::Result<AgentConfig> {
    let working_dir = std::env::current_dir().context("cannot read the current directory")?;
    let mut loader = ConfigLoader::new(&working_dir);
    if let Some(path) = &args.config {
        anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
        loader.add_path(path.clone(), u8::MAX);
    }
    let mut config = loader.load().context("failed to load settings")?;

    if let Some(url) = &args.oracle_url {
        config.oracle.base_url = url.clone();
    }
    if let Some(model) = &args.model {
        config.oracle.model = model.clone();
    }
    if let Some(kind) = args.sandbox {
        config.sandbox.kind = kind;
    }
    if let Some(dir) = &args.skills_dir {
        config.skills.dir = Some(dir.clone());
    }
    if args.no_learn {
        config.verification.enabled = false;
    }

    config.validate().context("invalid settings")?;
    debug!(
        "Loaded settings (oracle={}, model={}, sandbox={:?}, learn={})",
        config.oracle.base_url, config.oracle.model, config.sandbox.kind, config.verification.enabled
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_globals() {
        let args = Args::try_parse_from([
            "skillforge",
            "run",
            "--sandbox",
            "docker",
            "--no-learn",
            "calculate",
            "pi",
        ])
        .unwrap();
        assert_eq!(args.sandbox, Some(SandboxKind::Container));
        assert!(args.no_learn);
        match args.command {
            Command::Run { request } => assert_eq!(request.join(" "), "calculate pi"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_sandbox_is_rejected() {
        assert!(Args::try_parse_from(["skillforge", "--sandbox", "vm", "route", "hi"]).is_err());
    }

    #[test]
    fn test_skills_search_top_k() {
        let args =
            Args::try_parse_from(["skillforge", "skills", "search", "prime numbers", "--top-k", "5"])
                .unwrap();
        match args.command {
            Command::Skills {
                command: skills::SkillsCommand::Search { query, top_k },
            } => {
                assert_eq!(query, "prime numbers");
                assert_eq!(top_k, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
