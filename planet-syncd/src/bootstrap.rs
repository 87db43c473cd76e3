//! Bootstrap (planet) file handling: staged download, swap with a
//! single backup, and persisting the address records of a finished update.

use std::io;
use std::path::Path;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use shared::types::BootstrapPaths;
use crate::error::{Result, SyncError};

/// What landed in the staging file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    pub bytes: u64,
    pub sha256: String,
}

/// Download `url` into `staging`. On any failure the staging file is removed.
pub async fn download(client: &reqwest::Client, url: &str, staging: &Path) -> Result<Staged> {
    let result = stream_to_file(client, url, staging).await;
    if result.is_err() {
        let _ = fs::remove_file(staging).await;
    }
    result
}

async fn stream_to_file(client: &reqwest::Client, url: &str, staging: &Path) -> Result<Staged> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SyncError::transport(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::BadStatus {
            url: url.to_string(),
            status,
        });
    }

    let mut file = fs::File::create(staging)
        .await
        .map_err(|e| SyncError::io("creating", staging, e))?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| SyncError::transport(url, e))?
    {
        hasher.update(&chunk);
        bytes += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::io("writing", staging, e))?;
    }

    file.flush()
        .await
        .map_err(|e| SyncError::io("flushing", staging, e))?;
    file.sync_all()
        .await
        .map_err(|e| SyncError::io("syncing", staging, e))?;

    Ok(Staged {
        bytes,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Move the staged file over the live one.
///
/// The live file is first moved to the backup path, but only when no backup
/// exists yet: the first backup is the last file known to work, and a loop of
/// bad updates must not overwrite it with another bad copy.
pub async fn replace(paths: &BootstrapPaths) -> Result<()> {
    let backup_exists = fs::try_exists(&paths.backup)
        .await
        .map_err(|e| SyncError::io("checking", &paths.backup, e))?;

    let mut backed_up = false;
    if !backup_exists {
        match fs::rename(&paths.live, &paths.backup).await {
            Ok(()) => {
                tracing::info!("Backed up {} to {}", paths.live.display(), paths.backup.display());
                backed_up = true;
            }
            // Nothing to back up on a first install
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::io("backing up", &paths.live, e)),
        }
    }

    if let Err(e) = fs::rename(&paths.staging, &paths.live).await {
        // Put the live file back rather than leave the overlay without one
        if backed_up {
            let _ = fs::rename(&paths.backup, &paths.live).await;
        }
        return Err(SyncError::io("replacing", &paths.live, e));
    }

    Ok(())
}

async fn write_record(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io("creating directory", parent, e))?;
    }
    fs::write(path, contents)
        .await
        .map_err(|e| SyncError::io("writing", path, e))
}

/// Store both records of a completed update, exactly as given.
///
/// If the server record cannot be written the domain record is removed
/// again: a missing record restarts detection from scratch, while a
/// mismatched pair would not.
pub async fn persist_records(
    ip_path: &Path,
    ips: &[u8],
    server_ip_path: &Path,
    server_ips: &[u8],
) -> Result<()> {
    write_record(ip_path, ips).await?;

    if let Err(e) = write_record(server_ip_path, server_ips).await {
        if let Err(remove) = fs::remove_file(ip_path).await {
            tracing::warn!("Failed to roll back {}: {}", ip_path.display(), remove);
        }
        return Err(e);
    }

    Ok(())
}
