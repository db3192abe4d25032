use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::ContainerError;
use crate::types::{ContainerOutput, RunContainerRequest};

const CONTAINER_NAME_PREFIX: &str = "wharf-task";

/// Runtime parameters for the container command, resolved once from
/// `Config` (`CONTAINER_CMD`, `SANDBOX_IMAGE`, `ENV_FILE`).
#[derive(Debug, Clone)]
pub struct ContainerParams {
    pub container_cmd: String,
    pub image: String,
    pub env_file: Option<PathBuf>,
    pub config_dir: PathBuf,
}

/// Invokes a single one-shot agent container and returns a structured
/// result (spec §4.3). A trait so the Runner can be tested against a fake
/// driver without shelling out to a real container runtime.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn run_container(
        &self,
        params: &ContainerParams,
        req: RunContainerRequest,
    ) -> Result<(ContainerOutput, Vec<u8>, Vec<u8>), ContainerError>;
}

#[derive(Default)]
pub struct RealContainerDriver;

impl RealContainerDriver {
    pub fn new() -> Self {
        Self
    }

    fn container_name(task_id: uuid::Uuid) -> String {
        format!("{CONTAINER_NAME_PREFIX}-{task_id}")
    }

    fn build_args(params: &ContainerParams, req: &RunContainerRequest, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            "host".to_string(),
        ];

        if let Some(env_file) = &params.env_file {
            args.push("--env-file".to_string());
            args.push(env_file.display().to_string());
        }

        args.push("-v".to_string());
        args.push(format!("{}:/config:ro", params.config_dir.display()));

        let mounts = req.mount_override.as_ref().unwrap_or(&req.mounts);
        for (host, worktree) in mounts {
            let basename = PathBuf::from(host)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "workspace".to_string());
            args.push("-v".to_string());
            args.push(format!("{worktree}:/workspace/{basename}"));
        }

        args.push(params.image.clone());
        args.push("--print".to_string());
        args.push("--output-format=stream-json".to_string());
        args.push("--verbose".to_string());
        if let Some(session_id) = &req.session_id {
            if !session_id.is_empty() {
                args.push("--resume".to_string());
                args.push(session_id.clone());
            }
        }
        args.push(req.prompt.clone());

        args
    }

    /// Parse a stream of newline-delimited JSON documents; the final one is
    /// authoritative. Falls back to parsing the whole buffer as a single
    /// JSON object when streaming parse yields nothing.
    fn parse_stream(stdout: &[u8]) -> Result<ContainerOutput, ContainerError> {
        let text = String::from_utf8_lossy(stdout);
        let stream = serde_json::Deserializer::from_str(&text).into_iter::<Value>();
        let values: Vec<Value> = stream.filter_map(Result::ok).collect();

        let authoritative = values.into_iter().last().or_else(|| {
            serde_json::from_str::<Value>(text.trim()).ok()
        });

        let Some(value) = authoritative else {
            return Err(ContainerError::OutputParseFailure(
                "no JSON document found on stdout".to_string(),
            ));
        };

        serde_json::from_value(value)
            .map_err(|e| ContainerError::OutputParseFailure(e.to_string()))
    }
}

#[async_trait]
impl ContainerDriver for RealContainerDriver {
    async fn run_container(
        &self,
        params: &ContainerParams,
        req: RunContainerRequest,
    ) -> Result<(ContainerOutput, Vec<u8>, Vec<u8>), ContainerError> {
        let name = Self::container_name(req.task_id);

        // Forcibly remove any container of that name first (stale from a
        // prior crash) -- best-effort, failure here is not fatal.
        let _ = Command::new(&params.container_cmd)
            .args(["rm", "-f", &name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let args = Self::build_args(params, &req, &name);

        let mut child = Command::new(&params.container_cmd)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::SpawnFailure(e.to_string()))?;

        let Some(mut stdout_pipe) = child.stdout.take() else {
            return Err(ContainerError::SpawnFailure("missing stdout pipe".to_string()));
        };
        let Some(mut stderr_pipe) = child.stderr.take() else {
            return Err(ContainerError::SpawnFailure("missing stderr pipe".to_string()));
        };

        let deadline = Duration::from_secs(u64::from(req.timeout_minutes) * 60);

        let wait_fut = async {
            let mut stdout_bytes = Vec::new();
            let mut stderr_bytes = Vec::new();
            let (stdout_res, stderr_res, status_res) = tokio::join!(
                stdout_pipe.read_to_end(&mut stdout_bytes),
                stderr_pipe.read_to_end(&mut stderr_bytes),
                child.wait(),
            );
            stdout_res.map_err(|e| ContainerError::SpawnFailure(e.to_string()))?;
            stderr_res.map_err(|e| ContainerError::SpawnFailure(e.to_string()))?;
            let status = status_res.map_err(|e| ContainerError::SpawnFailure(e.to_string()))?;
            Ok::<_, ContainerError>((status, stdout_bytes, stderr_bytes))
        };

        let (status, stdout_bytes, stderr_bytes) = match tokio::time::timeout(deadline, wait_fut).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = Command::new(&params.container_cmd)
                    .args(["kill", &name])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                return Err(ContainerError::ContextDeadlineExceeded);
            }
        };

        match Self::parse_stream(&stdout_bytes) {
            Ok(output) => {
                if !status.success() {
                    tracing::warn!(container = %name, "container exited non-zero but produced a valid result");
                }
                Ok((output, stdout_bytes, stderr_bytes))
            }
            Err(parse_err) => {
                if status.success() {
                    Err(parse_err)
                } else {
                    Err(ContainerError::ExitNonZeroNoOutput(
                        String::from_utf8_lossy(&stderr_bytes).to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_stream_takes_final_document_as_authoritative() {
        let stdout = b"{\"subtype\":\"init\"}\n{\"result\":\"ok\",\"stop_reason\":\"end_turn\",\"session_id\":\"s1\",\"is_error\":false,\"total_cost_usd\":0.01,\"usage\":{\"input\":10,\"output\":5,\"cache_read\":0,\"cache_creation\":0}}\n";
        let output = RealContainerDriver::parse_stream(stdout).unwrap();
        assert_eq!(output.result.as_deref(), Some("ok"));
        assert_eq!(output.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(output.usage.input, 10);
    }

    #[test]
    fn parse_stream_falls_back_to_single_object() {
        let stdout = b"{\"result\":\"ok\",\"session_id\":\"s1\",\"is_error\":false}";
        let output = RealContainerDriver::parse_stream(stdout).unwrap();
        assert_eq!(output.result.as_deref(), Some("ok"));
    }

    #[test]
    fn parse_stream_fails_on_garbage() {
        let stdout = b"not json at all";
        assert!(RealContainerDriver::parse_stream(stdout).is_err());
    }

    #[test]
    fn build_args_includes_one_mount_per_workspace() {
        let params = ContainerParams {
            container_cmd: "docker".to_string(),
            image: "wharf-sandbox:latest".to_string(),
            env_file: None,
            config_dir: PathBuf::from("/cfg"),
        };
        let req = RunContainerRequest {
            task_id: uuid::Uuid::new_v4(),
            prompt: "hi".to_string(),
            session_id: None,
            mounts: HashMap::from([("/home/user/repo".to_string(), "/tmp/wt".to_string())]),
            mount_override: None,
            timeout_minutes: 5,
        };
        let args = RealContainerDriver::build_args(&params, &req, "wharf-task-x");
        assert!(args.iter().any(|a| a == "/tmp/wt:/workspace/repo"));
        assert!(args.contains(&"hi".to_string()));
    }
}
