use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "rlpatch")]
#[command(about = "Turns resource-leak warnings and fix hints into validated patches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Configuration file (default: rlpatch.yml when present)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Directory for prompts, batches, patches and run logs")]
    work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Match warnings with fix hints and write repair prompts and batch requests")]
    Prepare {
        #[arg(help = "Projects to prepare (default: every fix report)")]
        projects: Vec<String>,
    },

    #[command(about = "Write one standalone prompt JSON per matched warning")]
    PromptJson {
        #[arg(help = "Projects to export (default: every fix report)")]
        projects: Vec<String>,

        #[arg(long, help = "Output directory")]
        out: PathBuf,
    },

    #[command(about = "Turn batch responses into unified diff patches")]
    Synthesize {
        #[arg(help = "Response JSONL file, or a directory of them")]
        responses: PathBuf,
    },

    #[command(about = "Apply a project's patches, keeping only those that do not change its compile errors")]
    Apply {
        #[arg(help = "Project root containing src/ and lib/")]
        project_root: PathBuf,

        #[arg(long, help = "Directory of patch files (default: <work-dir>/patches/<project>)")]
        patches: Option<PathBuf>,
    },

    #[command(about = "Compare the findings of two checker runs")]
    Compare {
        before: PathBuf,
        after: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let config = cli::Config::load(cli.config.as_deref(), cli.work_dir, cli.verbose)?;

    match cli.command {
        Commands::Prepare { projects } => {
            cli::prepare(projects, &config).await?;
        }
        Commands::PromptJson { projects, out } => {
            cli::prompt_json(projects, out, &config).await?;
        }
        Commands::Synthesize { responses } => {
            cli::synthesize(responses, &config).await?;
        }
        Commands::Apply { project_root, patches } => {
            cli::apply(project_root, patches, &config).await?;
        }
        Commands::Compare { before, after } => {
            cli::compare(before, after, &config).await?;
        }
    }

    Ok(())
}
