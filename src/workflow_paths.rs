//! Home-based storage layout for coordinator persistence.
//!
//! Everything durable lives under `~/.delivery-coordinator/`, qualified by a
//! working-directory hash so independent checkouts get independent state:
//! - `state/<wd-hash>/` - workflow instance documents
//! - `logs/<wd-hash>/` - structured event journals

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const COORDINATOR_DIR: &str = ".delivery-coordinator";

/// Returns the coordinator home directory: `~/.delivery-coordinator/`
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined or the
/// directory cannot be created.
pub fn coordinator_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory for state storage")?;
    let dir = home.join(COORDINATOR_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create coordinator directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the state directory for a working directory:
/// `~/.delivery-coordinator/state/<wd-hash>/`
pub fn state_dir(working_dir: &Path) -> Result<PathBuf> {
    let dir = coordinator_home_dir()?
        .join("state")
        .join(working_dir_hash(working_dir));
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the logs directory for a working directory:
/// `~/.delivery-coordinator/logs/<wd-hash>/`
pub fn logs_dir(working_dir: &Path) -> Result<PathBuf> {
    let dir = coordinator_home_dir()?
        .join("logs")
        .join(working_dir_hash(working_dir));
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}

/// Computes a working-directory hash (SHA-256 truncated to 12 hex chars).
///
/// Canonicalizes the path first so symlinked checkouts hash identically;
/// falls back to the raw path bytes when canonicalization fails (deleted
/// directory, non-UTF8 path).
pub fn working_dir_hash(path: &Path) -> String {
    let bytes = match fs::canonicalize(path) {
        Ok(canonical) => canonical.to_string_lossy().into_owned().into_bytes(),
        Err(_) => {
            #[cfg(unix)]
            {
                use std::os::unix::ffi::OsStrExt;
                path.as_os_str().as_bytes().to_vec()
            }
            #[cfg(not(unix))]
            {
                path.to_string_lossy().into_owned().into_bytes()
            }
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();

    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_dir_hash_is_deterministic() {
        let a = working_dir_hash(Path::new("/definitely/missing/project-a"));
        let b = working_dir_hash(Path::new("/definitely/missing/project-a"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_working_dir_hash_distinguishes_directories() {
        let a = working_dir_hash(Path::new("/definitely/missing/project-a"));
        let b = working_dir_hash(Path::new("/definitely/missing/project-b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_working_dir_hash_shape() {
        let hash = working_dir_hash(Path::new("/definitely/missing/project-a"));
        assert_eq!(hash.chars().count(), 12);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
