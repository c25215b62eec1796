//! `ioctl` request codes of the `cxl_mem` driver.
//!
//! From `linux/cxl_mem.h`:
//!
//! ```c
//! #define CXL_MEM_QUERY_COMMANDS _IOR(0xCE, 1, struct cxl_mem_query_commands)
//! #define CXL_MEM_SEND_COMMAND _IOWR(0xCE, 2, struct cxl_send_command)
//! ```
//!
//! `struct cxl_mem_query_commands` ends in a flexible array member, so only its 8-byte header
//! is part of the request code.

use std::{ffi::c_int, fmt, io, marker::PhantomData, os::fd::AsRawFd};

use crate::{
    Error,
    layout::{QueryCommands, SendCommand},
};

#[cfg(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
))]
mod bits {
    pub(crate) const _IOC_SIZEBITS: u32 = 13;
    pub(crate) const _IOC_DIRBITS: u32 = 3;

    pub(crate) const _IOC_NONE: u32 = 1;
    pub(crate) const _IOC_READ: u32 = 2;
    pub(crate) const _IOC_WRITE: u32 = 4;
}

#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
)))]
mod bits {
    pub(crate) const _IOC_SIZEBITS: u32 = 14;
    pub(crate) const _IOC_DIRBITS: u32 = 2;

    pub(crate) const _IOC_NONE: u32 = 0;
    pub(crate) const _IOC_READ: u32 = 2;
    pub(crate) const _IOC_WRITE: u32 = 1;
}

use bits::{_IOC_DIRBITS, _IOC_SIZEBITS};

const _IOC_NRBITS: u32 = 8;
const _IOC_TYPEBITS: u32 = 8;

const _IOC_NRMASK: u32 = (1 << _IOC_NRBITS) - 1;
const _IOC_TYPEMASK: u32 = (1 << _IOC_TYPEBITS) - 1;
const _IOC_SIZEMASK: u32 = (1 << _IOC_SIZEBITS) - 1;
const _IOC_DIRMASK: u32 = (1 << _IOC_DIRBITS) - 1;

const _IOC_NRSHIFT: u32 = 0;
const _IOC_TYPESHIFT: u32 = _IOC_NRSHIFT + _IOC_NRBITS;
const _IOC_SIZESHIFT: u32 = _IOC_TYPESHIFT + _IOC_TYPEBITS;
const _IOC_DIRSHIFT: u32 = _IOC_SIZESHIFT + _IOC_SIZEBITS;

/// The largest argument size that can be portably encoded.
const MAX_ARG_SIZE: usize = (1 << 13) - 1;

/// The `ioctl` type (group) byte owned by `cxl_mem`.
pub const CXL_MEM_IOCTL_TYPE: u8 = 0xCE;

/// Direction of an [`Ioctl`], as seen from userspace.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Dir(u32);

impl fmt::Debug for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            _IOC_READ_WRITE => f.write_str("_IOC_READ | _IOC_WRITE"),
            _IOC_READ => f.write_str("_IOC_READ"),
            _IOC_WRITE => f.write_str("_IOC_WRITE"),
            _IOC_NONE => f.write_str("_IOC_NONE"),
            Dir(raw) => write!(f, "{raw:#x}"),
        }
    }
}

/// The `ioctl` neither reads nor writes data through its argument.
pub const _IOC_NONE: Dir = Dir(bits::_IOC_NONE);

/// The kernel writes data to userspace through the pointer argument.
pub const _IOC_READ: Dir = Dir(bits::_IOC_READ);

/// The kernel reads data from userspace through the pointer argument.
pub const _IOC_WRITE: Dir = Dir(bits::_IOC_WRITE);

/// Both directions; `_IOC_READ | _IOC_WRITE` in C.
pub const _IOC_READ_WRITE: Dir = Dir(bits::_IOC_READ | bits::_IOC_WRITE);

/// An `ioctl` request code together with the argument type it is invoked with.
pub struct Ioctl<T: ?Sized> {
    request: u32,
    _p: PhantomData<T>,
}

impl<T: ?Sized> Copy for Ioctl<T> {}
impl<T: ?Sized> Clone for Ioctl<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> fmt::Debug for Ioctl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ioctl")
            .field("request", &format_args!("{:#010x}", self.request))
            .field("dir", &self.dir())
            .field("ty", &format_args!("{:#x}", self.ty()))
            .field("nr", &self.nr())
            .field("size", &self.size())
            .finish()
    }
}

impl<T: ?Sized> Ioctl<T> {
    /// Creates an [`Ioctl`] from a raw request code.
    pub const fn from_raw(request: u32) -> Self {
        Self {
            request,
            _p: PhantomData,
        }
    }

    /// Returns the request code passed to `ioctl(2)` as its second argument.
    pub const fn request(self) -> u32 {
        self.request
    }

    pub const fn dir(self) -> Dir {
        Dir((self.request >> _IOC_DIRSHIFT) & _IOC_DIRMASK)
    }

    pub const fn ty(self) -> u8 {
        ((self.request >> _IOC_TYPESHIFT) & _IOC_TYPEMASK) as u8
    }

    pub const fn nr(self) -> u8 {
        ((self.request >> _IOC_NRSHIFT) & _IOC_NRMASK) as u8
    }

    /// Returns the argument size encoded in the request code.
    pub const fn size(self) -> usize {
        ((self.request >> _IOC_SIZESHIFT) & _IOC_SIZEMASK) as usize
    }
}

impl<T> Ioctl<T> {
    /// Performs the `ioctl` with argument `arg`.
    ///
    /// Returns the non-negative value returned by `ioctl(2)`, or the error from *errno* if it
    /// returned -1.
    ///
    /// # Safety
    ///
    /// `fd` must be open and belong to the driver that defines this request code, and `arg` must
    /// satisfy whatever that driver expects of it (for pointer arguments: valid for reads and/or
    /// writes of [`Ioctl::size`] bytes, including any memory it references in turn).
    pub unsafe fn ioctl(self, fd: &impl AsRawFd, arg: T) -> io::Result<c_int> {
        let res = unsafe { libc::ioctl(fd.as_raw_fd(), self.request as _, arg) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }
}

/// Builds an [`Ioctl`] from its components, like the `_IOC` macro.
///
/// # Panics
///
/// Panics if `size` exceeds the portable argument size limit. In `const` context this is a
/// compile-time error.
#[expect(non_snake_case)]
pub const fn _IOC<T: ?Sized>(dir: Dir, ty: u8, nr: u8, size: usize) -> Ioctl<T> {
    assert!(size <= MAX_ARG_SIZE);

    Ioctl::from_raw(
        dir.0 << _IOC_DIRSHIFT
            | (ty as u32) << _IOC_TYPESHIFT
            | (nr as u32) << _IOC_NRSHIFT
            | (size as u32) << _IOC_SIZESHIFT,
    )
}

/// `CXL_MEM_QUERY_COMMANDS`: `0x8008ce01` on the generic layout.
pub const CXL_MEM_QUERY_COMMANDS: Ioctl<*mut u8> =
    _IOC(_IOC_READ, CXL_MEM_IOCTL_TYPE, 1, QueryCommands::HEADER_LEN);

/// `CXL_MEM_SEND_COMMAND`: `0xc030ce02` on the generic layout.
pub const CXL_MEM_SEND_COMMAND: Ioctl<*mut u8> =
    _IOC(_IOC_READ_WRITE, CXL_MEM_IOCTL_TYPE, 2, SendCommand::LEN);

/// The two `ioctl`s understood by a CXL memory device node.
///
/// No other request code can reach a device through this crate; [`MailboxIoctl::try_from`]
/// rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailboxIoctl {
    /// Enumerate the commands supported by the driver and the device.
    QueryCommands,
    /// Submit a single mailbox command.
    SendCommand,
}

impl MailboxIoctl {
    pub const fn ioctl(self) -> Ioctl<*mut u8> {
        match self {
            MailboxIoctl::QueryCommands => CXL_MEM_QUERY_COMMANDS,
            MailboxIoctl::SendCommand => CXL_MEM_SEND_COMMAND,
        }
    }

    pub const fn request(self) -> u32 {
        self.ioctl().request()
    }

    /// Size of the fixed argument block the kernel accesses for this request.
    pub const fn arg_size(self) -> usize {
        self.ioctl().size()
    }
}

impl TryFrom<u32> for MailboxIoctl {
    type Error = Error;

    fn try_from(request: u32) -> Result<Self, Error> {
        [MailboxIoctl::QueryCommands, MailboxIoctl::SendCommand]
            .into_iter()
            .find(|op| op.request() == request)
            .ok_or(Error::UnsupportedIoctl(request))
    }
}
