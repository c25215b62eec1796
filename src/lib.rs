//! Mailbox commands for CXL memory devices.
//!
//! The Linux `cxl_mem` driver exposes each CXL memory device as a character device
//! (`/dev/cxl/memN`) with two `ioctl`s: one to list the mailbox commands the driver and device
//! support, and one to send a command. This crate binds to those `ioctl`s.
//!
//! From `linux/cxl_mem.h`:
//!
//! ```c
//! struct cxl_command_info {
//! 	__u32 id;
//! 	__u32 flags;
//! 	__u32 size_in;
//! 	__u32 size_out;
//! };
//!
//! struct cxl_mem_query_commands {
//! 	__u32 n_commands;
//! 	__u32 rsvd;
//! 	struct cxl_command_info __user commands[];
//! };
//!
//! struct cxl_send_command {
//! 	__u32 id;
//! 	__u32 flags;
//! 	union {
//! 		struct {
//! 			__u16 opcode;
//! 			__u16 rsvd;
//! 		} raw;
//! 		__u32 rsvd;
//! 	};
//! 	__u32 retval;
//! 	struct {
//! 		__u32 size;
//! 		__u32 rsvd;
//! 		__u64 payload;
//! 	} in;
//! 	struct {
//! 		__u32 size;
//! 		__u32 rsvd;
//! 		__u64 payload;
//! 	} out;
//! };
//!
//! #define CXL_MEM_QUERY_COMMANDS _IOR(0xCE, 1, struct cxl_mem_query_commands)
//! #define CXL_MEM_SEND_COMMAND _IOWR(0xCE, 2, struct cxl_send_command)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cxl_mailbox::*;
//!
//! let mut client = MailboxClient::open("mem0")?;
//!
//! // Find out what the device can do.
//! let supported = client.discover()?;
//! println!("{} commands", supported.len());
//!
//! // Send a command with a caller-owned output buffer.
//! let mut buf = [0; Identify::LEN];
//! let response = client.send_command(Command::new(CommandId::Identify).output(&mut buf))?;
//! if response.retval != 0 {
//!     eprintln!("device said {:?}", response.return_code().description());
//! } else {
//!     let identify = Identify::decode(response.output(&buf))?;
//!     println!("firmware {}", identify.fw_revision);
//! }
//! # Ok::<(), cxl_mailbox::Error>(())
//! ```
//!
//! # Layers
//!
//! - [`layout`] encodes and decodes the `ioctl` arguments byte for byte.
//! - [`DeviceHandle`] owns the open device node, reopens it when the device was replugged, and
//!   performs the `ioctl`s.
//! - [`MailboxClient`] implements command discovery and command submission on top of any
//!   [`Transport`], normally a [`DeviceHandle`].
//! - [`payload`] decodes the output of a few commands into typed records.
//!
//! # Errors
//!
//! The `ioctl` result and the device's return code are separate. A failed `ioctl` is an
//! [`Error::Transport`]. A successful `ioctl` yields a [`CommandResponse`] even if the device
//! rejected the command; [`CommandResponse::check`] converts a nonzero return code into
//! [`Error::DeviceRejected`].
//!
//! # Threads
//!
//! Everything here blocks the calling thread. A [`DeviceHandle`] keeps per-call state and must
//! not be used from several threads at once; put it behind a lock if it has to be shared.

#[doc = include_str!("../README.md")]
mod readme {}

mod catalog;
mod device;
mod enumerate;
mod error;
pub mod ioctl;
pub mod layout;
mod mailbox;
pub mod payload;

pub use catalog::{CommandId, UNKNOWN_COMMAND, name_of};
pub use device::{DEV_DIR, DeviceHandle, DeviceOptions};
pub use enumerate::{memdevs, memdevs_in};
pub use error::{DecodeError, Error, Result, ReturnCode};
pub use ioctl::MailboxIoctl;
pub use layout::{CommandFlags, CommandInfo, PayloadSize, QueryCommands, VARIABLE_SIZE};
pub use mailbox::{Advisory, Command, CommandResponse, MailboxClient, SupportedCommands, Transport};
pub use payload::{ComponentIdentify, Identify, LogEntry, LogUuid, Payload, SupportedLogs};
