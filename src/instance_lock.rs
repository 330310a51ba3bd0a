use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Advisory lock that keeps two refreshers from writing the same store
pub struct InstanceLock {
    lock_file: File,
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Lock named after the store it protects, placed in `lock_dir`
    pub fn for_store(store_path: &Path, lock_dir: &Path) -> Result<Self> {
        Self::acquire(lock_dir.join(format!("{}.lock", lock_name(store_path))))
    }

    /// Lock for `store_path` in the runtime directory (`XDG_RUNTIME_DIR` or the temp dir)
    pub fn for_store_in_runtime_dir(store_path: &Path) -> Result<Self> {
        Self::for_store(store_path, &runtime_dir())
    }

    fn acquire(lock_path: PathBuf) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    anyhow::bail!(
                        "Another refresher is already writing this store. Lock file: {}",
                        lock_path.display()
                    );
                }
                return Err(err).context("Failed to acquire lock");
            }
        }

        // Only the holder may replace the PID
        lock_file
            .set_len(0)
            .context("Failed to truncate lock file")?;

        let pid = std::process::id();
        let mut writer = lock_file
            .try_clone()
            .context("Failed to clone file handle")?;
        writeln!(writer, "{}", pid).context("Failed to write PID to lock file")?;

        info!("Acquired instance lock at {}", lock_path.display());
        debug!("Process ID: {}", pid);

        Ok(Self {
            lock_file,
            lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.lock_file.as_raw_fd();
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
        }

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!("Failed to remove lock file {}: {}", self.lock_path.display(), e);
        } else {
            debug!("Released instance lock at {}", self.lock_path.display());
        }
    }
}

fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// `flight-etl-<sanitised store path>`; the store path is made absolute when possible
fn lock_name(store_path: &Path) -> String {
    let absolute = std::path::absolute(store_path).unwrap_or_else(|_| store_path.to_path_buf());
    let sanitised: String = absolute
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("flight-etl-{}", sanitised.trim_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_name_is_filesystem_safe() {
        let name = lock_name(Path::new("/srv/data/flights.db"));
        assert_eq!(name, "flight-etl-srv_data_flights_db");
    }

    #[cfg(unix)]
    #[test]
    fn test_second_lock_on_same_store_fails() {
        let lock_dir = TempDir::new().unwrap();
        let store = Path::new("/srv/data/flights.db");

        let first = InstanceLock::for_store(store, lock_dir.path()).unwrap();
        assert!(first.path().exists());
        assert!(InstanceLock::for_store(store, lock_dir.path()).is_err());

        let other = InstanceLock::for_store(Path::new("/srv/data/other.db"), lock_dir.path());
        assert!(other.is_ok());

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(InstanceLock::for_store(store, lock_dir.path()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_acquire_keeps_holder_pid() {
        let lock_dir = TempDir::new().unwrap();
        let store = Path::new("/srv/data/flights.db");

        let holder = InstanceLock::for_store(store, lock_dir.path()).unwrap();
        let expected = format!("{}\n", std::process::id());
        assert_eq!(std::fs::read_to_string(holder.path()).unwrap(), expected);

        assert!(InstanceLock::for_store(store, lock_dir.path()).is_err());
        assert_eq!(std::fs::read_to_string(holder.path()).unwrap(), expected);
    }
}
