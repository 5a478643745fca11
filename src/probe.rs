/// Single-byte read probe against the keep-alive target.
///
/// Each probe opens the target read-only, reads one byte and drops the handle,
/// so the file is never held open between probes.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// A validated file to probe. Always holds an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    path: PathBuf,
}

impl ProbeTarget {
    /// Validate `path` as a probe target.
    ///
    /// The path must exist, point at a regular file and be openable for reading.
    /// Relative paths are resolved against the current directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ProbeError::EmptyPath);
        }

        let resolved = std::fs::canonicalize(path).map_err(|e| ProbeError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        let metadata = std::fs::metadata(&resolved).map_err(|e| ProbeError::Open {
            path: resolved.clone(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(ProbeError::NotAFile { path: resolved });
        }

        File::open(&resolved).map_err(|e| ProbeError::Open {
            path: resolved.clone(),
            source: e,
        })?;

        Ok(Self { path: resolved })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read exactly one byte from the target.
    ///
    /// A read that returns no data (empty file) is a failure.
    pub fn probe(&self) -> Result<(), ProbeError> {
        let mut file = File::open(&self.path).map_err(|e| ProbeError::Open {
            path: self.path.clone(),
            source: e,
        })?;

        let mut buf = [0u8; 1];
        let read = file.read(&mut buf).map_err(|e| ProbeError::Read {
            path: self.path.clone(),
            source: e,
        })?;

        if read == 0 {
            return Err(ProbeError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// [`probe`](Self::probe) on Tokio's blocking pool. A disk spinning up can
    /// hold the read for seconds and must not stall a runtime thread.
    pub async fn probe_async(&self) -> Result<(), ProbeError> {
        let target = self.clone();
        match tokio::task::spawn_blocking(move || target.probe()).await {
            Ok(result) => result,
            Err(e) => Err(ProbeError::Read {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            }),
        }
    }
}

/// Errors from validating or probing a target.
#[derive(Debug)]
pub enum ProbeError {
    EmptyPath,
    NotAFile {
        path: PathBuf,
    },
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Empty {
        path: PathBuf,
    },
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::EmptyPath => write!(f, "no target file given"),
            ProbeError::NotAFile { path } => {
                write!(f, "{} is not a regular file", path.display())
            }
            ProbeError::Open { path, source } => {
                write!(f, "failed to open {}: {source}", path.display())
            }
            ProbeError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ProbeError::Empty { path } => {
                write!(f, "{} is empty, nothing to read", path.display())
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Open { source, .. } => Some(source),
            ProbeError::Read { source, .. } => Some(source),
            ProbeError::EmptyPath | ProbeError::NotAFile { .. } | ProbeError::Empty { .. } => None,
        }
    }
}
