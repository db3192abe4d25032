use std::io;
use std::path::Path;

use uuid::Uuid;

/// Write `contents` to `path` via a temp sibling + rename, so readers never
/// observe a partially-written file. Parent directories are created as needed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("atomic"),
        Uuid::new_v4()
    );
    let tmp_path = parent.join(tmp_name);

    let write_result = tokio::fs::write(&tmp_path, contents).await;
    if write_result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return write_result;
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_atomic(&path, b"{\"a\":1}").await.unwrap();
        let read_back = tokio::fs::read(&path).await.unwrap();
        assert_eq!(read_back, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        let read_back = tokio::fs::read(&path).await.unwrap();
        assert_eq!(read_back, b"second");
    }
}
