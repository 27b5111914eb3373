//! Fetching and unpacking the download helper.

use super::unzip::{extract_zip, find_file_by};
use crate::error::{Error, Result};
use reqwest::{Client, redirect};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const HELPER_ARCHIVE: &str = "hytale-downloader.zip";
const HELPER_DIR: &str = "helper";

/// Filename fragment identifying this platform's helper build.
fn platform_tag() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

/// Whether `file_name` is the helper executable for this platform.
pub fn is_platform_executable(file_name: &str) -> bool {
    let name = file_name.to_ascii_lowercase();
    if !name.starts_with("hytale-downloader") || !name.contains(platform_tag()) {
        return false;
    }
    if cfg!(windows) {
        name.ends_with(".exe")
    } else {
        !name.ends_with(".exe")
    }
}

/// Download the helper archive, unpack it under `work_dir` and return the
/// path of the platform executable.
#[tracing::instrument(skip(work_dir))]
pub async fn fetch_helper(url: &str, work_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(work_dir).await?;
    let archive = work_dir.join(HELPER_ARCHIVE);

    let client = Client::builder()
        .redirect(redirect::Policy::limited(1))
        .build()
        .map_err(|e| Error::DownloadFailed(format!("Failed to build HTTP client: {}", e)))?;

    let mut response = client
        .get(url)
        .header("User-Agent", concat!("hytale-panel/", env!("CARGO_PKG_VERSION")))
        .send()
        .await
        .map_err(|e| Error::DownloadFailed(format!("Failed to fetch helper: {}", e)))?;

    if !response.status().is_success() {
        return Err(Error::DownloadFailed(format!(
            "Helper download returned HTTP {}",
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(&archive).await?;
    let mut received: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::DownloadFailed(format!("Error reading helper download: {}", e)))?
    {
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    file.flush().await?;
    tracing::debug!(bytes = received, "Helper archive downloaded");

    let helper_dir = work_dir.join(HELPER_DIR);
    let executable = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        if helper_dir.exists() {
            std::fs::remove_dir_all(&helper_dir)?;
        }
        extract_zip(&archive, &helper_dir)?;
        let _ = std::fs::remove_file(&archive);
        find_file_by(&helper_dir, &is_platform_executable).ok_or_else(|| {
            Error::MissingArtifact(helper_dir.join(format!("hytale-downloader-{}", platform_tag())))
        })
    })
    .await
    .map_err(|e| Error::ExtractionFailure(format!("Helper extraction task failed: {}", e)))??;

    make_executable(&executable)?;
    tracing::info!(path = %executable.display(), "Download helper ready");
    Ok(executable)
}

/// Set the executable bits on Unix; a no-op elsewhere.
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
