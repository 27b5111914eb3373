/// Error handling module for Hytale Panel.
///
/// This module defines the error types used throughout the library.
/// Lifecycle and command errors are returned to the caller as typed
/// failures; errors raised inside background tasks are logged and turned
/// into lifecycle events instead.
///
/// # Example
///
/// ```
/// use hytale_panel::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::NotFound(id)) => println!("Server '{}' does not exist", id),
///         Err(Error::AlreadyRunning) => println!("Server is already running"),
///         Err(Error::Timeout(msg)) => println!("Operation timed out: {}", msg),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the hytale-panel library.
///
/// Each variant includes context information to help diagnose and handle
/// the error appropriately.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    ///
    /// This error occurs when:
    /// - The Java runtime path is empty
    /// - An interval or timeout is zero
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No server record exists for the given id.
    #[error("Server not found: {0}")]
    NotFound(String),

    /// The server is already running.
    ///
    /// This error occurs when:
    /// - Attempting to start a server that already has a live instance
    #[error("Already running")]
    AlreadyRunning,

    /// The server is not running.
    ///
    /// This error occurs when:
    /// - Attempting to stop a server with no live instance
    /// - Sending a console command to a stopped server
    #[error("Not running")]
    NotRunning,

    /// A file required to start the server or finish a download is absent.
    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// The process's input stream is closed or was never attached.
    #[error("Process input stream unavailable")]
    StreamUnavailable,

    /// The operating system refused to start a process.
    ///
    /// This error occurs when:
    /// - The runtime executable does not exist or is not executable
    /// - The working directory is invalid
    #[error("Failed to spawn process: {0}")]
    SpawnFailure(String),

    /// Operation timed out.
    ///
    /// This error occurs when:
    /// - The download helper does not finish within its ceiling
    #[error("Timeout: {0}")]
    Timeout(String),

    /// An archive could not be extracted or created.
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// Post-download verification did not find the expected artifacts.
    #[error("Verification failed: {0}")]
    VerificationFailure(String),

    /// A download pipeline is already running for this cache directory.
    #[error("A download is already in progress")]
    DownloadInProgress,

    /// The download helper or the helper fetch failed.
    ///
    /// This error occurs when:
    /// - The helper archive cannot be fetched over HTTPS
    /// - The helper exits with a non-zero status
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The operation was cancelled before it completed.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A backup schedule could not be parsed or registered.
    #[error("Invalid schedule: {0}")]
    Schedule(String),

    /// The record store rejected an operation.
    #[error("Record store error: {0}")]
    Store(String),

    /// Filesystem or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other error not covered by the above categories.
    ///
    /// Also used to aggregate several failures, e.g. when stopping all
    /// servers at shutdown.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for hytale-panel operations.
pub type Result<T> = std::result::Result<T, Error>;
