use anyhow::{Result, anyhow};
use directories::UserDirs;
use std::{fs, path::PathBuf};

/// `~/.local/run`, created on demand.
pub fn runtime_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let dir = home.join(".local").join("run");
    fs::create_dir_all(&dir).map_err(|e| anyhow!("failed to create {}: {e}", dir.display()))?;
    Ok(dir)
}

pub fn socket_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("handctl.sock"))
}

/// Where the daemon expects the hand-pose detector to write when the
/// profile names no source.
pub fn default_landmark_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("handctl.landmarks"))
}
