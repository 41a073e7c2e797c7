//! Error types for boot-time operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Boot operation result type
pub type Result<T> = std::result::Result<T, Error>;

/// Boot operation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Boot command line could not be read
    #[error("Failed to read boot command line")]
    Cmdline(#[source] io::Error),

    /// No block device advertises the requested partition name
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    /// XZ decoder reported an error
    #[error("XZ decode error")]
    Lzma(#[from] liblzma::stream::Error),

    /// XZ input ended without a complete stream
    #[error("XZ stream is corrupt or truncated")]
    InvalidStream,

    /// Archive record does not start with a known magic
    #[error("Invalid archive magic at offset {0}")]
    ArchiveMagic(usize),

    /// Archive ended in the middle of a record
    #[error("Archive truncated inside entry {0}")]
    ArchiveTruncated(String),

    /// Archive header field is not valid ASCII hex
    #[error("Malformed archive header field: {0}")]
    ArchiveField(&'static str),

    /// Byte pattern search found no match
    #[error("Pattern not found in {0}")]
    PatternNotFound(PathBuf),

    /// Binary policy image does not carry the kernel policy magic
    #[error("Invalid policy image magic: {0:#010x}")]
    PolicyMagic(u32),

    /// No policy source branch was applicable
    #[error("No usable SELinux policy source")]
    NoPolicySource,

    /// CIL compiler rejected the job
    #[error("Policy compile failed: {0}")]
    PolicyCompile(String),

    /// Rule injection into the policy image failed
    #[error("Policy rule injection failed: {0}")]
    PolicyRules(String),

    /// Resolved policy could not be written to its canonical path
    #[error("Failed to commit policy to {0}")]
    PolicyCommit(PathBuf, #[source] io::Error),

    /// Policy statement text could not be parsed
    #[error("Malformed policy statement: {0}")]
    Statement(String),

    /// Command line arguments do not form a valid invocation
    #[error("{0}")]
    Usage(&'static str),

    /// Mount or unmount syscall failed
    #[error("Mount operation on {0} failed")]
    Mount(PathBuf, #[source] io::Error),

    /// File operation failed, with the path it failed on
    #[error("File I/O error on {0}")]
    File(PathBuf, #[source] io::Error),

    /// Process replacement failed
    #[error("Handover to {0} failed")]
    Handover(PathBuf, #[source] io::Error),

    /// I/O error without additional context
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Attach a path to a bare I/O error.
    pub fn file(path: impl Into<PathBuf>, err: io::Error) -> Self {
        Error::File(path.into(), err)
    }
}
