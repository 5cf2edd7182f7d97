use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::layout::InstallRootLayout;

/// Exclusive advisory lock over a shared install root.
///
/// Takes an OS advisory lock on `state/lock`, so exactly one process at a
/// time may mutate the root and the kernel releases the lock when the
/// holding process exits for any reason; a process killed mid-operation
/// never wedges the root. Mutating operations (install, uninstall, manifest
/// update, garbage collection) hold it for their full duration;
/// interleaving pack writes with a concurrent GC pass could delete packs an
/// in-flight install still needs for rollback.
#[derive(Debug)]
pub struct OperationLock {
    _file: File,
    path: PathBuf,
}

impl OperationLock {
    pub fn acquire(layout: &InstallRootLayout) -> Result<Self> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open install root lock: {}", path.display()))?;

        if let Err(err) = try_lock_exclusive(&file) {
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(anyhow!(
                    "another operation holds the install root lock{}: {}",
                    holder_detail(&mut file),
                    path.display()
                ));
            }
            return Err(err).with_context(|| {
                format!("failed to claim install root lock: {}", path.display())
            });
        }

        // Holder pid, for the contention message of the next claimant.
        file.set_len(0)
            .with_context(|| format!("failed to write install root lock: {}", path.display()))?;
        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .with_context(|| format!("failed to write install root lock: {}", path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush install root lock: {}", path.display()))?;

        debug!(lock = %path.display(), "acquired install root lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn holder_detail(file: &mut File) -> String {
    let mut holder = String::new();
    if file.seek(SeekFrom::Start(0)).is_err() {
        return String::new();
    }
    // On Windows the holder's exclusive lock can block this read.
    if file.read_to_string(&mut holder).is_err() {
        return String::new();
    }
    let pid = holder.trim();
    if pid.is_empty() {
        String::new()
    } else {
        format!(" (held by pid {pid})")
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsFd;

    use rustix::fs::{flock, FlockOperation};

    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(|err| io::Error::from_raw_os_error(err.raw_os_error()))
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: OVERLAPPED is a plain data struct that is valid when
    // zero-initialized, and the handle comes from a live File.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };

    if result == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, err));
        }
        Err(err)
    } else {
        Ok(())
    }
}
