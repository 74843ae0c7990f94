mod platform;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use deploy_engine::EngineHandle;
use deploy_logging::{deploy_error, deploy_info};

use platform::config::{DeployConfig, DEFAULT_CONFIG_FILE};
use platform::driver::Session;
use platform::effects::EffectRunner;
use platform::logging::{self, LogDestination};
use platform::plan::DeployPlan;
use platform::render;

#[derive(Parser)]
#[command(name = "deploy_app")]
#[command(about = "Deploy workbooks between BI projects", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file; defaults to ./deploy.ron when present
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the settings file
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Where log output goes
    #[arg(long, value_enum)]
    log: Option<LogDestination>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the projects visible to the session
    Projects,
    /// List the workbooks of a project with their datasources
    Workbooks {
        /// Project LUID
        project: String,
    },
    /// Configure, verify and run the job described by a plan file
    Run {
        /// Plan file in RON format
        plan: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            deploy_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = DeployConfig::load(cli.config.as_deref(), Path::new(DEFAULT_CONFIG_FILE))?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
        config.validate()?;
    }
    logging::initialize(cli.log.unwrap_or(config.log), cli.verbose);
    deploy_info!("Using backend at {}", config.base_url);

    // Parse the plan before any request goes out.
    let plan = match &cli.command {
        Commands::Run { plan } => Some(DeployPlan::load(plan)?),
        _ => None,
    };

    let engine =
        EngineHandle::new(config.engine_settings()).context("failed to start the engine")?;
    let mut session = Session::new(EffectRunner::new(engine), io::stdout().lock());

    let result = match (cli.command, plan) {
        (Commands::Projects, _) => session.load_projects().and_then(|projects| {
            session.write_lines(&render::project_lines(&projects))?;
            Ok(true)
        }),
        (Commands::Workbooks { project }, _) => {
            session.load_workbooks(&project).and_then(|workbooks| {
                session.write_lines(&render::workbook_lines(&workbooks))?;
                Ok(true)
            })
        }
        (Commands::Run { .. }, Some(plan)) => session.run_plan(&plan).and_then(|outcome| {
            session.write_lines(&render::outcome_lines(&outcome))?;
            Ok(outcome.succeeded())
        }),
        (Commands::Run { plan }, None) => Err(anyhow::anyhow!("plan {plan:?} was not loaded")),
    };

    session.finish();
    result
}
