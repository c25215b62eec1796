//! Device node handles.
//!
//! A [`DeviceHandle`] owns one open CXL memory device node (`/dev/cxl/memN`) and is the only
//! place in this crate that calls into the kernel.
//!
//! Memory devices can be hot-removed and re-added. When that happens the node is recreated, and a
//! file descriptor opened before the event keeps referring to the dead node. The handle therefore
//! remembers the inode it opened and compares it against the path before every `ioctl`, reopening
//! the node if it was replaced.

use std::{
    ffi::{OsStr, c_int},
    fs::{self, File},
    io,
    os::unix::fs::MetadataExt,
    path::{Component, Path, PathBuf},
};

use crate::{
    Error, MailboxIoctl, Result,
    layout::{CommandInfo, QueryCommands},
    mailbox::Transport,
};

/// Directory that holds the CXL memory device nodes.
pub const DEV_DIR: &str = "/dev/cxl";

/// Options for opening a [`DeviceHandle`].
///
/// # Example
///
/// ```no_run
/// use cxl_mailbox::DeviceOptions;
///
/// let handle = DeviceOptions::new().read_write(false).open("mem0")?;
/// assert!(handle.is_open());
/// # Ok::<(), cxl_mailbox::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    dev_dir: PathBuf,
    read_write: bool,
    detect_replug: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from(DEV_DIR),
            read_write: true,
            detect_replug: true,
        }
    }
}

impl DeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory device names are resolved in. Defaults to [`DEV_DIR`].
    pub fn dev_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dir.into();
        self
    }

    /// Open the node for reading and writing (the default), or only for reading.
    pub fn read_write(mut self, read_write: bool) -> Self {
        self.read_write = read_write;
        self
    }

    /// Check for a replaced device node before every `ioctl`. On by default.
    pub fn detect_replug(mut self, detect: bool) -> Self {
        self.detect_replug = detect;
        self
    }

    /// Resolves `name` to a path inside the device-node directory.
    ///
    /// `name` is either a bare node name like `mem0`, or a path to a node directly inside the
    /// directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        node_name(&self.dev_dir, name)
            .map(|node| self.dev_dir.join(node))
            .ok_or_else(|| Error::InvalidDeviceName(name.to_owned()))
    }

    /// Opens the device node `name`.
    pub fn open(&self, name: &str) -> Result<DeviceHandle> {
        let mut handle = DeviceHandle {
            path: self.resolve(name)?,
            read_write: self.read_write,
            detect_replug: self.detect_replug,
            file: None,
            ino: None,
        };
        handle.open_file()?;
        Ok(handle)
    }
}

fn node_name<'a>(dev_dir: &Path, name: &'a str) -> Option<&'a OsStr> {
    let path = Path::new(name);
    let rel = path.strip_prefix(dev_dir).unwrap_or(path);
    let mut components = rel.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(node)), None) => Some(node),
        _ => None,
    }
}

/// An open CXL memory device node.
///
/// The node is opened on construction and closed when the handle is dropped, on every exit path.
/// [`DeviceHandle::close`] closes it early; closing twice is a no-op.
///
/// A handle is not meant to be shared between threads without a lock: it mutates its replug
/// state on every call. Opening the same node twice with conflicting access modes is not
/// prevented, but is not supported either.
#[derive(Debug)]
pub struct DeviceHandle {
    path: PathBuf,
    read_write: bool,
    detect_replug: bool,
    file: Option<File>,
    ino: Option<u64>,
}

impl DeviceHandle {
    /// Opens `name` under [`DEV_DIR`] with the default [`DeviceOptions`].
    pub fn open(name: &str) -> Result<Self> {
        DeviceOptions::new().open(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Inode of the node the handle currently has open.
    pub fn inode(&self) -> Option<u64> {
        self.ino
    }

    pub fn is_read_write(&self) -> bool {
        self.read_write
    }

    /// Closes the handle (if open) and opens the node again.
    pub fn reopen(&mut self) -> Result<()> {
        self.close();
        self.open_file()
    }

    /// Closes the device node. Does nothing if the handle is already closed.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            self.ino = None;
            tracing::debug!(path = %self.path.display(), "closed device node");
        }
    }

    fn open_file(&mut self) -> Result<()> {
        let file = File::options()
            .read(true)
            .write(self.read_write)
            .open(&self.path)
            .map_err(|e| open_error(&self.path, e))?;
        let ino = file.metadata().map_err(Error::Transport)?.ino();
        tracing::debug!(
            path = %self.path.display(),
            ino,
            read_write = self.read_write,
            "opened device node"
        );
        self.file = Some(file);
        self.ino = Some(ino);
        Ok(())
    }

    /// Reopens the device node if it has been replaced since it was opened.
    ///
    /// Returns whether the node was reopened. A closed handle is left closed. If the reopen
    /// fails, the handle ends up closed and the error is returned.
    pub fn refresh(&mut self) -> Result<bool> {
        let Some(ino) = self.ino else {
            return Ok(false);
        };
        let current = match fs::metadata(&self.path) {
            Ok(meta) => Some(meta.ino()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::Transport(e)),
        };
        if current == Some(ino) {
            return Ok(false);
        }

        tracing::debug!(
            path = %self.path.display(),
            old_ino = ino,
            new_ino = ?current,
            "device node was replaced, reopening"
        );
        self.reopen()?;
        Ok(true)
    }

    /// Issues `op` on the device node, passing `arg` as the argument block.
    ///
    /// Returns the non-negative value `ioctl(2)` returned. Payload-level status (the `retval` of a
    /// sent command) is not inspected here.
    ///
    /// `arg` must be at least as large as the size encoded in the request code. For
    /// [`MailboxIoctl::QueryCommands`] the driver also writes one 16-byte entry per slot named by
    /// the header's `n_commands`, so `arg` must hold the header plus that many slots. Shorter
    /// buffers are rejected with [`io::ErrorKind::InvalidInput`] before reaching the kernel.
    ///
    /// # Safety
    ///
    /// The contents of `arg` are handed to the driver as-is. Any payload addresses embedded in
    /// it must point to memory that is valid for the sizes given next to them, for the duration
    /// of the call.
    pub unsafe fn execute(&mut self, op: MailboxIoctl, arg: &mut [u8]) -> Result<c_int> {
        let needed = required_len(op, arg);
        if needed.is_none_or(|needed| arg.len() < needed) {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{op:?} needs a {}-byte argument, got {}",
                    needed.unwrap_or(usize::MAX),
                    arg.len()
                ),
            )));
        }
        if self.detect_replug {
            self.refresh()?;
        }
        let file = self.file.as_ref().ok_or_else(|| Error::DeviceClosed {
            path: self.path.clone(),
        })?;

        unsafe { op.ioctl().ioctl(file, arg.as_mut_ptr()) }.map_err(Error::Transport)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for DeviceHandle {
    unsafe fn execute(&mut self, op: MailboxIoctl, arg: &mut [u8]) -> Result<c_int> {
        unsafe { DeviceHandle::execute(self, op, arg) }
    }
}

/// Bytes the driver may touch in `arg`, or `None` if the count does not fit in memory.
fn required_len(op: MailboxIoctl, arg: &[u8]) -> Option<usize> {
    match (op, arg.first_chunk::<4>()) {
        (MailboxIoctl::QueryCommands, Some(n_commands)) => {
            let slots = u32::from_le_bytes(*n_commands) as usize;
            slots
                .checked_mul(CommandInfo::LEN)?
                .checked_add(QueryCommands::HEADER_LEN)
        }
        _ => Some(op.arg_size()),
    }
}

fn open_error(path: &Path, e: io::Error) -> Error {
    let missing = e.kind() == io::ErrorKind::NotFound
        || matches!(e.raw_os_error(), Some(libc::ENXIO | libc::ENODEV));
    if missing {
        Error::DeviceNotFound {
            path: path.to_owned(),
            source: e,
        }
    } else {
        Error::Transport(e)
    }
}
