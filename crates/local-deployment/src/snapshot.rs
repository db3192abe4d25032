use std::path::Path;

use wharf_services::{GitOps, RealGitRunner};

use crate::error::RunnerError;

/// VCS/build noise excluded from a non-git workspace snapshot (spec §9
/// "Non-git workspaces").
const SNAPSHOT_IGNORE: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    "dist",
    "build",
];

/// Copies `workspace` into `worktree_path`, then turns the copy into a
/// throwaway git repo with one "initial snapshot" commit so downstream
/// diffing/rebase/merge logic works uniformly across git and non-git
/// workspaces (spec §4.5 step 2).
pub fn snapshot_to_throwaway_repo(
    git_ops: &GitOps<RealGitRunner>,
    workspace: &Path,
    worktree_path: &Path,
) -> Result<(), RunnerError> {
    std::fs::create_dir_all(worktree_path)?;
    copy_dir_filtered(workspace, worktree_path)?;

    git_ops.init(worktree_path)?;
    git_ops.add_all(worktree_path)?;
    git_ops.commit(worktree_path, "initial snapshot")?;
    Ok(())
}

/// Copies the snapshot's tracked files back onto the host workspace (the
/// commit pipeline's `extractSnapshotToWorkspace`, spec §4.6 phase 2).
/// File-copy only; no version-control semantics apply to the host side.
pub fn extract_snapshot_to_workspace(worktree_path: &Path, workspace: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(workspace)?;
    copy_dir_filtered(worktree_path, workspace)
}

fn copy_dir_filtered(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if SNAPSHOT_IGNORE.contains(&name.as_ref()) {
            continue;
        }

        let src_path = entry.path();
        let dst_path = dst.join(&file_name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_filtered(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_dir_filtered_skips_ignored_entries() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("keep.txt"), b"hello").unwrap();
        std::fs::create_dir(src.path().join(".git")).unwrap();
        std::fs::write(src.path().join(".git").join("HEAD"), b"ref: refs/heads/main").unwrap();
        std::fs::create_dir(src.path().join("target")).unwrap();

        copy_dir_filtered(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("keep.txt").exists());
        assert!(!dst.path().join(".git").exists());
        assert!(!dst.path().join("target").exists());
    }
}
