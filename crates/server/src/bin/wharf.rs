use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use wharf_local_deployment::LocalDeployment;
use wharf_utils::config::Config;

#[derive(Parser)]
#[command(name = "wharf")]
#[command(about = "Kanban-style orchestrator for AI coding sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/SSE server.
    Run {
        /// Address to bind the HTTP server to (overrides ADDR).
        #[arg(long)]
        addr: Option<String>,

        /// Directory to store task state in (overrides DATA_DIR).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Host repositories to manage. Defaults to the current directory.
        workspace: Vec<PathBuf>,
    },

    /// Print resolved configuration and exit.
    Env,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    wharf_utils::logging::init(config.log_format, config.no_color);

    match cli.command {
        Commands::Run { addr, data_dir, workspace } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            let workspaces = if workspace.is_empty() {
                vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
            } else {
                workspace
            };

            match run(config, workspaces).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    tracing::error!(error = %err, "wharf failed to start");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Env => {
            print_env(&config);
            ExitCode::SUCCESS
        }
    }
}

async fn run(config: Config, workspaces: Vec<PathBuf>) -> anyhow::Result<()> {
    let addr = config.addr.clone();
    let deployment = LocalDeployment::new(config, workspaces).await?;
    deployment.bootstrap().await?;

    let app = wharf_server::app(deployment);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "wharf listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn print_env(config: &Config) {
    let container_cmd_path = which::which(&config.container_cmd)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| format!("not found on PATH: {}", config.container_cmd));

    println!("data_dir:      {}", config.data_dir.display());
    println!("config_dir:    {}", config.config_dir.display());
    println!("env_file:      {}", config.env_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none)".to_string()));
    println!("container_cmd: {} ({})", config.container_cmd, container_cmd_path);
    println!("sandbox_image: {}", config.sandbox_image);
    println!("addr:          {}", config.addr);
    println!("log_format:    {:?}", config.log_format);
}
