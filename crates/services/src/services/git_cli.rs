use std::path::Path;
use std::process::Command;

use wharf_utils::shell::resolve_executable_path;

use super::error::GitOpsError;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// stdout and stderr concatenated, for error messages and conflict
    /// detection where the exact stream a phrase lands on doesn't matter.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Abstracts the actual git subprocess invocation so GitOps can be tested
/// against a scripted fake without a real git binary or repository.
pub trait GitRunner: Send + Sync {
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitOpsError>;
}

/// All git commands are invoked as subprocesses with combined output
/// captured (spec §4.4): `git -C <dir> <args...>`.
#[derive(Clone, Default)]
pub struct RealGitRunner;

impl RealGitRunner {
    pub fn new() -> Self {
        Self
    }
}

impl GitRunner for RealGitRunner {
    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitOpsError> {
        let git = resolve_executable_path("git").ok_or(GitOpsError::NotAvailable)?;
        let output = Command::new(git)
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .map_err(|e| GitOpsError::CommandFailed(e.to_string()))?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    pub struct RecordedCall {
        pub dir: PathBuf,
        pub args: Vec<String>,
    }

    /// Records every invocation and replays queued canned responses,
    /// modeled on the mock git runner used to test worktree management in
    /// the reference pack.
    #[derive(Default)]
    pub struct MockGitRunner {
        pub calls: Mutex<Vec<RecordedCall>>,
        pub responses: Mutex<VecDeque<Result<GitOutput, GitOpsError>>>,
    }

    impl MockGitRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_ok(&self, stdout: &str) {
            self.responses.lock().unwrap().push_back(Ok(GitOutput {
                success: true,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }));
        }

        pub fn push_err(&self, stdout: &str, stderr: &str) {
            self.responses.lock().unwrap().push_back(Ok(GitOutput {
                success: false,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }));
        }
    }

    impl GitRunner for MockGitRunner {
        fn run_git(&self, dir: &Path, args: &[&str]) -> Result<GitOutput, GitOpsError> {
            self.calls.lock().unwrap().push(RecordedCall {
                dir: dir.to_path_buf(),
                args: args.iter().map(|a| a.to_string()).collect(),
            });
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(GitOutput {
                        success: true,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                })
        }
    }
}
