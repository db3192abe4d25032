use std::path::Path;

use wharf_db::Workspace;

use super::error::GitOpsError;
use super::git_cli::{GitOutput, GitRunner};

/// Pure functions over repository paths (spec §4.4). Generic over
/// `GitRunner` so Runner-level tests can substitute a scripted fake.
pub struct GitOps<R: GitRunner> {
    runner: R,
}

impl<R: GitRunner> GitOps<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn is_git_repo(&self, path: &Path) -> bool {
        path.join(".git").exists()
            || self
                .runner
                .run_git(path, &["rev-parse", "--git-dir"])
                .map(|o| o.success)
                .unwrap_or(false)
    }

    /// Prefers `origin/HEAD`'s symref, falls back to the current branch,
    /// falls back to `main`.
    pub fn default_branch(&self, repo: &Path) -> String {
        if let Ok(out) = self
            .runner
            .run_git(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"])
        {
            if out.success {
                if let Some(branch) = out.stdout.rsplit('/').next() {
                    if !branch.is_empty() {
                        return branch.to_string();
                    }
                }
            }
        }

        if let Ok(out) = self.runner.run_git(repo, &["rev-parse", "--abbrev-ref", "HEAD"]) {
            if out.success && !out.stdout.is_empty() && out.stdout != "HEAD" {
                return out.stdout;
            }
        }

        "main".to_string()
    }

    pub fn get_commit_hash(&self, path: &Path) -> Result<String, GitOpsError> {
        let out = self.runner.run_git(path, &["rev-parse", "HEAD"])?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }

    /// Create `branch_name` at HEAD and check it out at `worktree_path`.
    /// Recovers from a stale branch left by a prior failed cleanup.
    pub fn create_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        branch_name: &str,
    ) -> Result<(), GitOpsError> {
        let worktree_str = worktree_path.display().to_string();
        let first = self
            .runner
            .run_git(repo, &["worktree", "add", "-b", branch_name, &worktree_str, "HEAD"])?;
        if first.success {
            return Ok(());
        }

        let combined = first.combined();
        if !is_already_exists_output(&combined) {
            return Err(GitOpsError::CommandFailed(combined));
        }

        // Stale branch from a prior failed cleanup: force-delete and retry.
        let _ = self.runner.run_git(repo, &["branch", "-D", branch_name]);
        let retry = self
            .runner
            .run_git(repo, &["worktree", "add", "-b", branch_name, &worktree_str, "HEAD"])?;
        if retry.success {
            return Ok(());
        }

        let retry_combined = retry.combined();
        if is_already_exists_output(&retry_combined) {
            // The branch (or a registered worktree for it) still exists;
            // recover by attaching a worktree to it directly.
            let forced = self
                .runner
                .run_git(repo, &["worktree", "add", "--force", &worktree_str, branch_name])?;
            if forced.success {
                return Ok(());
            }
            return Err(GitOpsError::CommandFailed(forced.combined()));
        }

        Err(GitOpsError::CommandFailed(retry_combined))
    }

    /// Always idempotent: removing an already-absent worktree succeeds.
    pub fn remove_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        branch_name: &str,
    ) -> Result<(), GitOpsError> {
        let worktree_str = worktree_path.display().to_string();
        let removed = self
            .runner
            .run_git(repo, &["worktree", "remove", "--force", &worktree_str])?;
        if !removed.success {
            // Not a known worktree any more: prune stale refs instead of failing.
            let _ = self.runner.run_git(repo, &["worktree", "prune"]);
        }

        // Best-effort branch delete; a missing branch is not an error.
        let _ = self.runner.run_git(repo, &["branch", "-D", branch_name]);
        Ok(())
    }

    pub fn stash_if_dirty(&self, repo: &Path) -> Result<bool, GitOpsError> {
        let status = self.runner.run_git(repo, &["status", "--porcelain"])?;
        if !status.success {
            return Err(GitOpsError::CommandFailed(status.combined()));
        }
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }
        let stashed = self.runner.run_git(repo, &["stash", "push", "-u"])?;
        if !stashed.success {
            return Err(GitOpsError::CommandFailed(stashed.combined()));
        }
        Ok(true)
    }

    pub fn stash_pop(&self, repo: &Path) -> Result<(), GitOpsError> {
        let out = self.runner.run_git(repo, &["stash", "pop"])?;
        if out.success {
            Ok(())
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }

    /// Count of commits the default branch has beyond the worktree HEAD.
    pub fn commits_behind(&self, repo: &Path, worktree_path: &Path) -> Result<u32, GitOpsError> {
        let default_branch = self.default_branch(repo);
        count_commits(&self.runner, worktree_path, "HEAD", &default_branch)
    }

    /// True iff `path` HEAD has commits not reachable from `reference`.
    pub fn has_commits_ahead_of(&self, path: &Path, reference: &str) -> Result<bool, GitOpsError> {
        Ok(count_commits(&self.runner, path, reference, "HEAD")? > 0)
    }

    /// Rebase the worktree onto the repo's default branch. On conflict,
    /// returns `GitOpsError::Conflict`; on any other failure, aborts the
    /// rebase first.
    pub fn rebase_onto_default(&self, repo: &Path, worktree_path: &Path) -> Result<(), GitOpsError> {
        let default_branch = self.default_branch(repo);
        let out = self.runner.run_git(worktree_path, &["rebase", &default_branch])?;
        if out.success {
            return Ok(());
        }

        let combined = out.combined();
        if is_conflict_output(&combined) {
            return Err(GitOpsError::Conflict(combined));
        }

        let _ = self.runner.run_git(worktree_path, &["rebase", "--abort"]);
        Err(GitOpsError::CommandFailed(combined))
    }

    /// Fast-forward-only merge of `branch_name` into the current branch.
    pub fn ff_merge(&self, repo: &Path, branch_name: &str) -> Result<(), GitOpsError> {
        let out = self.runner.run_git(repo, &["merge", "--ff-only", branch_name])?;
        if out.success {
            Ok(())
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }

    pub fn workspace_status(&self, path: &Path) -> Workspace {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        if !self.is_git_repo(path) {
            return Workspace {
                path: path.display().to_string(),
                name,
                is_git_repo: false,
                has_remote: false,
                branch: None,
                ahead_count: 0,
                behind_count: 0,
            };
        }

        let has_remote = self
            .runner
            .run_git(path, &["remote"])
            .map(|o| o.success && !o.stdout.trim().is_empty())
            .unwrap_or(false);

        let branch = self
            .runner
            .run_git(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .ok()
            .filter(|o| o.success)
            .map(|o| o.stdout);

        let default_branch = self.default_branch(path);
        let ahead_count = count_commits(&self.runner, path, &default_branch, "HEAD").unwrap_or(0);
        let behind_count = count_commits(&self.runner, path, "HEAD", &default_branch).unwrap_or(0);

        Workspace {
            path: path.display().to_string(),
            name,
            is_git_repo: true,
            has_remote,
            branch,
            ahead_count,
            behind_count,
        }
    }

    /// `git init` a fresh repository, used to turn a non-git workspace
    /// snapshot into a throwaway repo (spec §4.5 step 2, §9 "Non-git
    /// workspaces").
    pub fn init(&self, path: &Path) -> Result<(), GitOpsError> {
        let out = self.runner.run_git(path, &["init"])?;
        if out.success {
            Ok(())
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }

    pub fn add_all(&self, worktree_path: &Path) -> Result<(), GitOpsError> {
        let out = self.runner.run_git(worktree_path, &["add", "-A"])?;
        if out.success {
            Ok(())
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }

    pub fn has_changes(&self, worktree_path: &Path) -> Result<bool, GitOpsError> {
        let out = self.runner.run_git(worktree_path, &["status", "--porcelain"])?;
        if out.success {
            Ok(!out.stdout.trim().is_empty())
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }

    pub fn diff_stat(&self, worktree_path: &Path) -> Result<String, GitOpsError> {
        let out = self.runner.run_git(worktree_path, &["diff", "--cached", "--stat"])?;
        Ok(out.stdout)
    }

    pub fn recent_log(&self, worktree_path: &Path, n: u32) -> Result<String, GitOpsError> {
        let out = self
            .runner
            .run_git(worktree_path, &["log", "--oneline", &format!("-{n}")])?;
        Ok(out.stdout)
    }

    pub fn commit(&self, worktree_path: &Path, message: &str) -> Result<(), GitOpsError> {
        let out = self.runner.run_git(worktree_path, &["commit", "-m", message])?;
        if out.success {
            Ok(())
        } else {
            Err(GitOpsError::CommandFailed(out.combined()))
        }
    }
}

fn count_commits<R: GitRunner>(runner: &R, dir: &Path, from: &str, to: &str) -> Result<u32, GitOpsError> {
    let out = runner.run_git(dir, &["rev-list", "--count", &format!("{from}..{to}")])?;
    if !out.success {
        return Err(GitOpsError::CommandFailed(out.combined()));
    }
    out.stdout
        .trim()
        .parse()
        .map_err(|_| GitOpsError::CommandFailed(format!("unexpected rev-list output: {}", out.stdout)))
}

fn is_already_exists_output(s: &str) -> bool {
    let lower = s.to_lowercase();
    lower.contains("already exists") || lower.contains("already registered")
}

/// Pattern-matches known conflict phrases in combined git output.
pub fn is_conflict_output(s: &str) -> bool {
    let lower = s.to_lowercase();
    lower.contains("conflict (content):") || lower.contains("merge conflict") || lower.contains("conflict")
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::git_cli::mock::MockGitRunner;
    use std::path::PathBuf;

    fn repo() -> PathBuf {
        PathBuf::from("/repo")
    }

    fn worktree() -> PathBuf {
        PathBuf::from("/repo/.worktrees/abc")
    }

    #[test]
    fn default_branch_falls_back_to_main() {
        let mock = MockGitRunner::new();
        mock.push_err("", "fatal: no such ref");
        mock.push_err("", "fatal: no upstream");
        let ops = GitOps::new(mock);
        assert_eq!(ops.default_branch(&repo()), "main");
    }

    #[test]
    fn default_branch_prefers_origin_head() {
        let mock = MockGitRunner::new();
        mock.push_ok("refs/remotes/origin/develop");
        let ops = GitOps::new(mock);
        assert_eq!(ops.default_branch(&repo()), "develop");
    }

    #[test]
    fn create_worktree_recovers_from_stale_branch() {
        let mock = MockGitRunner::new();
        mock.push_err("", "fatal: a branch named 'task/abcd1234' already exists");
        mock.push_ok(""); // branch -D
        mock.push_ok(""); // retry succeeds
        let ops = GitOps::new(mock);
        ops.create_worktree(&repo(), &worktree(), "task/abcd1234").unwrap();
    }

    #[test]
    fn remove_worktree_is_idempotent_on_missing_worktree() {
        let mock = MockGitRunner::new();
        mock.push_err("", "fatal: not a working tree");
        mock.push_ok(""); // prune
        mock.push_ok(""); // branch -D
        let ops = GitOps::new(mock);
        ops.remove_worktree(&repo(), &worktree(), "task/abcd1234").unwrap();
    }

    #[test]
    fn rebase_onto_default_detects_conflict() {
        let mock = MockGitRunner::new();
        mock.push_ok("main"); // default_branch rev-parse (no origin/HEAD set, falls back)
        mock.push_err(
            "",
            "CONFLICT (content): Merge conflict in src/lib.rs",
        );
        let ops = GitOps::new(mock);
        let err = ops.rebase_onto_default(&repo(), &worktree()).unwrap_err();
        assert!(matches!(err, GitOpsError::Conflict(_)));
    }

    #[test]
    fn is_conflict_output_matches_known_phrases() {
        assert!(is_conflict_output("CONFLICT (content): Merge conflict in a.rs"));
        assert!(is_conflict_output("there was a conflict"));
        assert!(!is_conflict_output("nothing to commit"));
    }

    #[test]
    fn ff_merge_reports_failure_with_combined_output() {
        let mock = MockGitRunner::new();
        mock.push_err("", "fatal: Not possible to fast-forward, aborting.");
        let ops = GitOps::new(mock);
        let err = ops.ff_merge(&repo(), "task/abcd1234").unwrap_err();
        assert!(matches!(err, GitOpsError::CommandFailed(_)));
    }
}
