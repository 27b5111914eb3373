//! Archive extraction and artifact collection.

use crate::error::{Error, Result};
use async_process::Command;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Extract `archive` into `dest` with the platform's unzip tool.
///
/// Uses `unzip -o` on Unix and `Expand-Archive` on Windows. When the tool is
/// not installed the archive is extracted in-process instead.
#[tracing::instrument(skip_all, fields(archive = %archive.display()))]
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dest).await?;

    let mut command = external_unzip(archive, dest);
    match command.output().await {
        Ok(output) if output.status.success() => {
            tracing::debug!("Extracted with external tool");
            Ok(())
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(code = ?output.status.code(), %stderr, "External extraction failed");
            Err(Error::ExtractionFailure(format!(
                "{} exited with {:?}: {}",
                archive.display(),
                output.status.code(),
                stderr.trim()
            )))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!("No external unzip tool, extracting in-process");
            let archive = archive.to_path_buf();
            let dest = dest.to_path_buf();
            tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
                .await
                .map_err(|e| Error::ExtractionFailure(format!("Extraction task failed: {}", e)))?
        }
        Err(e) => Err(Error::ExtractionFailure(format!(
            "Failed to run unzip: {}",
            e
        ))),
    }
}

#[cfg(not(windows))]
fn external_unzip(archive: &Path, dest: &Path) -> Command {
    let mut command = Command::new("unzip");
    command.arg("-o").arg("-q").arg(archive).arg("-d").arg(dest);
    command
}

#[cfg(windows)]
fn external_unzip(archive: &Path, dest: &Path) -> Command {
    let mut command = Command::new("powershell");
    command.args(["-NoProfile", "-NonInteractive", "-Command"]).arg(format!(
        "Expand-Archive -Force -LiteralPath '{}' -DestinationPath '{}'",
        archive.display(),
        dest.display()
    ));
    command
}

/// Extract a zip archive with the `zip` crate. Blocking.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::ExtractionFailure(format!("{}: {}", archive.display(), e)))?;
    zip.extract(dest)
        .map_err(|e| Error::ExtractionFailure(format!("{}: {}", archive.display(), e)))
}

/// Depth-first search for a file named `name` below `root`.
pub fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    find_file_by(root, &|file_name| file_name == name)
}

/// Depth-first search for the first file whose name satisfies `matches`.
pub fn find_file_by(root: &Path, matches: &dyn Fn(&str) -> bool) -> Option<PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(root).ok()?.flatten().collect();
    // Shallow matches first, then stable order.
    entries.sort_by_key(|entry| (entry.path().is_dir(), entry.file_name()));

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_by(&path, matches) {
                return Some(found);
            }
        } else if entry.file_name().to_str().is_some_and(matches) {
            return Some(path);
        }
    }
    None
}

/// Copy each named artifact found anywhere below `source` into `dest`, then
/// verify all of them are present in `dest`.
#[tracing::instrument(skip_all, fields(source = %source.display(), dest = %dest.display()))]
pub async fn collect_artifacts(source: &Path, dest: &Path, names: &[&str]) -> Result<()> {
    tokio::fs::create_dir_all(dest).await?;

    for name in names {
        let root = source.to_path_buf();
        let lookup = name.to_string();
        let found = tokio::task::spawn_blocking(move || find_file(&root, &lookup))
            .await
            .map_err(|e| Error::Other(format!("Artifact search failed: {}", e)))?;

        match found {
            Some(path) => {
                tracing::debug!(artifact = %name, from = %path.display(), "Copying artifact");
                tokio::fs::copy(&path, dest.join(name)).await?;
            }
            None => tracing::warn!(artifact = %name, "Artifact not found in extracted archive"),
        }
    }

    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| !dest.join(name).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(Error::VerificationFailure(format!(
            "missing from {}: {}",
            dest.display(),
            missing.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn in_process_extraction_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("game.zip");
        write_zip(&archive, &[("Server/HytaleServer.jar", b"jar")]);

        let out = dir.path().join("out");
        extract_zip(&archive, &out).unwrap();
        assert_eq!(
            std::fs::read(out.join("Server/HytaleServer.jar")).unwrap(),
            b"jar"
        );
    }

    #[test]
    fn find_file_searches_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Assets.zip"), b"assets").unwrap();

        assert_eq!(find_file(dir.path(), "Assets.zip"), Some(nested.join("Assets.zip")));
        assert_eq!(find_file(dir.path(), "HytaleServer.jar"), None);
    }

    #[tokio::test]
    async fn missing_artifact_fails_verification() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("HytaleServer.jar"), b"jar").unwrap();

        let result =
            collect_artifacts(source.path(), dest.path(), &["HytaleServer.jar", "Assets.zip"]).await;
        assert!(matches!(result, Err(Error::VerificationFailure(_))));
        assert!(dest.path().join("HytaleServer.jar").is_file());
    }
}
