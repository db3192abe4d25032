use std::path::PathBuf;

use directories::ProjectDirs;

/// Runtime configuration resolved once at startup from the process
/// environment (spec §6 "Environment variables") and threaded through every
/// component that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub env_file: Option<PathBuf>,
    pub container_cmd: String,
    pub sandbox_image: String,
    pub addr: String,
    pub log_format: LogFormat,
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> Self {
        let project_dirs = ProjectDirs::from("dev", "wharf", "wharf");

        let data_dir = std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            project_dirs
                .as_ref()
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".wharf/data"))
        });
        let config_dir = project_dirs
            .as_ref()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".wharf/config"));

        let env_file = std::env::var("ENV_FILE").ok().map(PathBuf::from);
        let container_cmd = std::env::var("CONTAINER_CMD").unwrap_or_else(|_| "docker".to_string());
        let sandbox_image =
            std::env::var("SANDBOX_IMAGE").unwrap_or_else(|_| "wharf-sandbox:latest".to_string());
        let addr = std::env::var("ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let no_color = std::env::var("NO_COLOR").is_ok() || std::env::var("TERM").as_deref() == Ok("dumb");

        Self {
            data_dir,
            config_dir,
            env_file,
            container_cmd,
            sandbox_image,
            addr,
            log_format,
            no_color,
        }
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.config_dir.join("worktrees")
    }
}
