use anyhow::Result;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

pub async fn remove_dir_if_exists<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path.as_ref()).await {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub async fn remove_file_if_exists<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match tokio::fs::remove_file(path.as_ref()).await {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Moves `from` over `to`, replacing whatever was there.
pub async fn move_dir(from: PathBuf, to: PathBuf) -> io::Result<()> {
    remove_dir_if_exists(&to).await?;
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(&from, &to).await.is_ok() {
        return Ok(());
    }
    // rename fails across filesystems, fall back to copying
    tokio::task::spawn_blocking(move || {
        copy_dir(&from, &to)?;
        std::fs::remove_dir_all(&from)
    })
    .await
    .map_err(io::Error::other)?
}

/// Copies `from` over `to`, overwriting same-named files and keeping the rest, then removes `from`.
pub async fn merge_dir(from: PathBuf, to: PathBuf) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        copy_dir(&from, &to)?;
        std::fs::remove_dir_all(&from)
    })
    .await
    .map_err(io::Error::other)?
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// Extracts a zip archive held in memory into `destination`, overwriting existing files.
pub async fn extract_zip(archive: Vec<u8>, destination: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&destination)?;
        let mut archive = zip::ZipArchive::new(Cursor::new(archive))?;
        archive.extract(&destination)?;
        Ok(())
    })
    .await?
}
