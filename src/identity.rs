//! Scoped private-key files for remote sessions.
//!
//! Each lifecycle manager owns exactly one [`IdentityFile`]. The key is written
//! to an owner-only temporary file and removed when the value is dropped, so a
//! key never outlives the deployment that needed it.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::remote::{RemoteConfig, expand_tilde};

/// Errors raised while materialising an identity file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentityError {
    /// Raised when the key material is empty.
    #[error("private key material must not be empty")]
    EmptyKey,
    /// Raised when neither an inline key nor a key file is configured.
    #[error("no private key configured")]
    Missing,
    /// Raised when the key file cannot be read.
    #[error("failed to read private key `{path}`: {message}")]
    Read {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the temporary file cannot be written.
    #[error("failed to write identity file: {0}")]
    Write(String),
}

/// Private key written to a scoped temporary location.
#[derive(Debug)]
pub struct IdentityFile {
    _file: NamedTempFile,
    path: Utf8PathBuf,
}

impl IdentityFile {
    /// Writes `material` to a fresh file in the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::EmptyKey`] for blank material and
    /// [`IdentityError::Write`] when the file cannot be created.
    pub fn from_key_material(material: &str) -> Result<Self, IdentityError> {
        Self::write_in(&std::env::temp_dir(), material)
    }

    /// Writes `material` to a fresh file inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::EmptyKey`] for blank material and
    /// [`IdentityError::Write`] when the file cannot be created.
    pub fn from_key_material_in(dir: &Utf8Path, material: &str) -> Result<Self, IdentityError> {
        Self::write_in(dir.as_std_path(), material)
    }

    /// Materialises the key configured in `config`. Inline key material wins
    /// over a key file; a key file is copied so that dropping the identity
    /// never removes the caller's original.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when no key is configured, the key file cannot
    /// be read, or the copy cannot be written.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, IdentityError> {
        if let Some(material) = config.private_key.as_deref() {
            return Self::from_key_material(material);
        }
        let Some(path) = config.private_key_file.as_deref() else {
            return Err(IdentityError::Missing);
        };
        let expanded = expand_tilde(path);
        let material = read_to_string_ambient(&expanded).map_err(|message| IdentityError::Read {
            path: expanded.clone(),
            message,
        })?;
        Self::from_key_material(&material)
    }

    /// Location of the key file on disk.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn write_in(dir: &std::path::Path, material: &str) -> Result<Self, IdentityError> {
        if material.trim().is_empty() {
            return Err(IdentityError::EmptyKey);
        }

        // NamedTempFile creates the file with mode 0600 on unix.
        let mut file = tempfile::Builder::new()
            .prefix("prbranch-key-")
            .tempfile_in(dir)
            .map_err(|err| IdentityError::Write(err.to_string()))?;
        file.write_all(material.as_bytes())
            .map_err(|err| IdentityError::Write(err.to_string()))?;
        if !material.ends_with('\n') {
            file.write_all(b"\n")
                .map_err(|err| IdentityError::Write(err.to_string()))?;
        }
        file.flush()
            .map_err(|err| IdentityError::Write(err.to_string()))?;

        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf())
            .map_err(|path| IdentityError::Write(format!("non-utf8 path {}", path.display())))?;
        Ok(Self { _file: file, path })
    }
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);
    let (dir_path, file_path) = match (path_buf.parent(), path_buf.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, Utf8Path::new(name)),
        _ => (Utf8Path::new("."), path_buf),
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}
