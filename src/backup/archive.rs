use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::Path;

/// `<server-name>-<timestamp>.tar.gz`, with the name reduced to characters
/// safe in a file name.
pub fn archive_name(server_name: &str, at: DateTime<Utc>) -> String {
    let safe: String = server_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    let safe = safe.trim_matches('-');
    let safe = if safe.is_empty() { "server" } else { safe };
    format!("{}-{}.tar.gz", safe, at.format("%Y-%m-%d_%H-%M-%S-%3f"))
}

/// Write a gzip-compressed tarball of `source` to `dest` off the async
/// runtime and return its size in bytes.
#[tracing::instrument(skip_all, fields(source = %source.display(), dest = %dest.display()))]
pub async fn create_archive(source: &Path, dest: &Path) -> Result<u64> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || write_archive(&source, &dest))
        .await
        .map_err(|e| Error::ExtractionFailure(format!("Archive task failed: {}", e)))?
}

fn write_archive(source: &Path, dest: &Path) -> Result<u64> {
    if !source.is_dir() {
        return Err(Error::MissingArtifact(source.to_path_buf()));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let result = builder
        .append_dir_all(".", source)
        .and_then(|()| builder.into_inner())
        .and_then(|encoder| encoder.finish());

    if let Err(e) = result {
        let _ = std::fs::remove_file(dest);
        return Err(Error::ExtractionFailure(format!(
            "Failed to archive {}: {}",
            source.display(),
            e
        )));
    }

    Ok(std::fs::metadata(dest)?.len())
}

/// Delete an archive, logging instead of failing. Missing files are fine.
pub async fn remove_archive(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed backup archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Backup archive already gone")
        }
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove backup archive"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;

    #[test]
    fn names_are_filesystem_safe() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            archive_name("My Server/1", at),
            "My-Server-1-2026-03-04_05-06-07-000.tar.gz"
        );
        assert!(archive_name("///", at).starts_with("server-"));
    }

    #[tokio::test]
    async fn archive_contains_server_files() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir(source.path().join("universe")).unwrap();
        std::fs::write(source.path().join("universe/world.dat"), b"world").unwrap();
        std::fs::write(source.path().join("config.json"), b"{}").unwrap();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("nested/backup.tar.gz");
        let size = create_archive(source.path(), &dest).await.unwrap();
        assert!(size > 0);

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("universe/world.dat")));
        assert!(names.iter().any(|n| n.ends_with("config.json")));
    }
}
