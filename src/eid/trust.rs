//! Per-user trust directory: the enrolled reference and the optional pin anchor.
//!
//! ```text
//! ~/.eid/
//!   authorized_eid      exact bytes of the enrolled identity response
//!   authorized_pubkey   optional SubjectPublicKeyInfo of the issuer (DER or PEM)
//! ```

use crate::eid::pinning::{PinAnchor, PinningError};
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TRUST_DIR_NAME: &str = ".eid";
pub const REFERENCE_FILE: &str = "authorized_eid";
pub const PIN_FILE: &str = "authorized_pubkey";

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("no enrolled reference at {0}")]
    NotEnrolled(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Pinning(#[from] PinningError),
}

impl TrustError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `$HOME/.eid`, if `HOME` is set.
#[must_use]
pub fn home_trust_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(TRUST_DIR_NAME))
}

#[derive(Debug, Clone)]
pub struct TrustStore {
    dir: PathBuf,
}

impl TrustStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn reference_path(&self) -> PathBuf {
        self.dir.join(REFERENCE_FILE)
    }

    #[must_use]
    pub fn pin_path(&self) -> PathBuf {
        self.dir.join(PIN_FILE)
    }

    /// Create the trust directory, owner-only, if it does not exist yet.
    ///
    /// # Errors
    /// Returns `TrustError::Io` if the directory cannot be created.
    pub fn ensure_dir(&self) -> Result<(), TrustError> {
        if self.dir.is_dir() {
            return Ok(());
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(&self.dir)
            .map_err(|e| TrustError::io(&self.dir, e))?;

        info!("created trust directory {}", self.dir.display());
        Ok(())
    }

    #[must_use]
    pub fn is_enrolled(&self) -> bool {
        self.reference_path().is_file()
    }

    /// Open the enrolled reference for reading.
    ///
    /// # Errors
    /// Returns `TrustError::NotEnrolled` if there is no reference.
    pub fn open_reference(&self) -> Result<File, TrustError> {
        let path = self.reference_path();
        match File::open(&path) {
            Ok(file) => {
                debug!("comparing against {}", path.display());
                Ok(file)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TrustError::NotEnrolled(path)),
            Err(e) => Err(TrustError::io(&path, e)),
        }
    }

    /// Start recording a new reference. Nothing replaces the current reference until
    /// [`PendingReference::commit`] is called.
    ///
    /// # Errors
    /// Returns `TrustError::Io` if the directory or the temporary file cannot be created.
    pub fn begin_record(&self) -> Result<PendingReference, TrustError> {
        self.ensure_dir()?;
        let file = NamedTempFile::new_in(&self.dir).map_err(|e| TrustError::io(&self.dir, e))?;
        Ok(PendingReference {
            file,
            target: self.reference_path(),
        })
    }

    /// The pin anchor, if the pin path is a regular file.
    ///
    /// # Errors
    /// Returns an error if the pin file exists but cannot be read or parsed.
    pub fn pin_anchor(&self) -> Result<Option<PinAnchor>, TrustError> {
        let path = self.pin_path();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(PinAnchor::load(&path)?)),
            Ok(_) => {
                warn!("{} is not a regular file, pinning disabled", path.display());
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrustError::io(&path, e)),
        }
    }
}

/// A reference being recorded. Dropping it without [`commit`](Self::commit)
/// discards the bytes written so far.
#[derive(Debug)]
pub struct PendingReference {
    file: NamedTempFile,
    target: PathBuf,
}

impl PendingReference {
    /// Atomically replace the enrolled reference with the recorded bytes.
    ///
    /// # Errors
    /// Returns `TrustError::Io` if the data cannot be synced or renamed into place.
    pub fn commit(mut self) -> Result<PathBuf, TrustError> {
        self.file
            .flush()
            .and_then(|()| self.file.as_file().sync_all())
            .map_err(|e| TrustError::io(self.file.path(), e))?;

        let target = self.target;
        self.file
            .persist(&target)
            .map_err(|e| TrustError::io(&target, e.error))?;

        info!("configured {}", target.display());
        Ok(target)
    }
}

impl Write for PendingReference {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
