use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[cfg(windows)]
use std::os::windows::io::AsRawHandle;

use crate::error::{Error, Result};

/// Name of the lock file inside a store directory.
pub const LOCK_FILE: &str = "ashsrs.lock";

/// Exclusive advisory lock on a store directory, held for the lifetime of
/// the value. The lock file records the owning process id.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Locks the store directory `dir`, failing at once if another process
    /// (or another store in this process) holds it.
    pub fn lock_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::lock(dir.as_ref().join(LOCK_FILE))
    }

    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let describe = |e: io::Error| Error::Lock(path.display().to_string(), e);

        // Not truncated on open: the pid of a current holder must survive a
        // failed attempt.
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(describe)?;

        Self::try_lock(&file).map_err(describe)?;

        file.set_len(0).map_err(describe)?;
        file.seek(SeekFrom::Start(0)).map_err(describe)?;
        writeln!(file, "{}", std::process::id()).map_err(describe)?;
        file.flush().map_err(describe)?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`.
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::OVERLAPPED;
        use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let handle = file.as_raw_handle();
        // SAFETY: an all-zero OVERLAPPED locks from offset 0.
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        // SAFETY: handle is a valid open handle owned by `file`, and
        // `overlapped` outlives the synchronous call.
        let result = unsafe {
            LockFileEx(
                handle as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                &mut overlapped,
            )
        };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Other platforms have no lock: two stores may share a directory.
    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
