//! The mailbox command protocol.
//!
//! Two `ioctl`s make up the protocol:
//!
//! - **Query commands** follows a two-call convention. A first call with room for zero entries
//!   makes the driver report how many commands it knows; a second call with exactly that many
//!   slots fetches their descriptions. Slots the driver leaves untouched keep ID 0 and are
//!   skipped.
//! - **Send command** submits one command. The caller lends an input payload and/or an output
//!   buffer for the duration of the call; the driver reports how much of the output buffer it
//!   filled and the device's return code.
//!
//! A send can fail at two levels, and the two are reported separately. If the `ioctl` fails the
//! command never reached the device (or the driver refused it) and an [`Error::Transport`] is
//! returned. If it succeeds, the device's own verdict is in [`CommandResponse::retval`]; a nonzero
//! value is *data*, not an error, until the caller asks for it to be one with
//! [`CommandResponse::check`].

use std::{collections::BTreeMap, ffi::c_int, io};

use crate::{
    CommandId, DecodeError, DeviceHandle, Error, MailboxIoctl, Result, ReturnCode,
    layout::{
        CommandFlags, CommandInfo, PayloadDesc, PayloadSize, QueryCommands, RawOpcode, SendCommand,
    },
    payload::{ComponentIdentify, Identify, Payload, SupportedLogs},
};

/// Something that can issue the mailbox `ioctl`s.
///
/// [`DeviceHandle`] is the real implementation.
pub trait Transport {
    /// Issues `op` with `arg` as the argument block and returns the raw `ioctl(2)` result.
    ///
    /// # Safety
    ///
    /// Payload addresses embedded in `arg` are dereferenced by the implementation. They must be
    /// valid for the sizes recorded next to them until the call returns. A query argument must
    /// have room for as many entries as its header's `n_commands`.
    unsafe fn execute(&mut self, op: MailboxIoctl, arg: &mut [u8]) -> Result<c_int>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    unsafe fn execute(&mut self, op: MailboxIoctl, arg: &mut [u8]) -> Result<c_int> {
        unsafe { (**self).execute(op, arg) }
    }
}

/// A mailbox command to send, borrowing its payload buffers.
///
/// The buffers are only borrowed for the [`MailboxClient::send_command`] call that consumes the
/// command.
#[derive(Debug)]
pub struct Command<'a> {
    id: u32,
    flags: u32,
    raw_opcode: u16,
    input: Option<&'a [u8]>,
    output: Option<&'a mut [u8]>,
}

impl<'a> Command<'a> {
    /// A command from the driver's command table, by ID.
    pub fn new(id: impl Into<u32>) -> Self {
        Self {
            id: id.into(),
            flags: 0,
            raw_opcode: 0,
            input: None,
            output: None,
        }
    }

    /// A raw command that passes `opcode` through to the device unchecked.
    ///
    /// Raw commands are only accepted by kernels built with `CONFIG_CXL_MEM_RAW_COMMANDS`.
    pub fn raw(opcode: u16) -> Self {
        Self {
            raw_opcode: opcode,
            ..Self::new(CommandId::Raw)
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Payload sent to the device.
    pub fn input(mut self, payload: &'a [u8]) -> Self {
        self.input = Some(payload);
        self
    }

    /// Buffer that receives the device's output. Its length is the capacity offered to the driver.
    pub fn output(mut self, buf: &'a mut [u8]) -> Self {
        self.output = Some(buf);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn input_len(&self) -> usize {
        self.input.map_or(0, <[u8]>::len)
    }

    pub fn output_capacity(&self) -> usize {
        self.output.as_deref().map_or(0, <[u8]>::len)
    }

    fn envelope(&mut self) -> Result<SendCommand> {
        let input = match self.input {
            Some(buf) => PayloadDesc {
                size: payload_len(buf.len())?,
                rsvd: 0,
                payload: buf.as_ptr() as usize as u64,
            },
            None => PayloadDesc::default(),
        };
        let output = match self.output.as_deref_mut() {
            Some(buf) => PayloadDesc {
                size: payload_len(buf.len())?,
                rsvd: 0,
                payload: buf.as_mut_ptr() as usize as u64,
            },
            None => PayloadDesc::default(),
        };
        Ok(SendCommand {
            id: self.id,
            flags: self.flags,
            raw: RawOpcode {
                opcode: self.raw_opcode,
                rsvd: 0,
            },
            retval: 0,
            input,
            output,
        })
    }
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::Transport(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {len} bytes does not fit the command envelope"),
        ))
    })
}

/// What the driver reported back for a sent command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResponse {
    /// Command ID that was sent.
    pub id: u32,
    /// Value returned by `ioctl(2)`. Never negative; failures are [`Error::Transport`].
    pub rc: c_int,
    /// Device return code. 0 means success.
    pub retval: u32,
    /// Bytes written to the output buffer. Never more than its capacity.
    pub out_size: u32,
}

impl CommandResponse {
    pub fn return_code(&self) -> ReturnCode {
        ReturnCode(self.retval)
    }

    pub fn is_success(&self) -> bool {
        self.retval == 0
    }

    /// Turns a nonzero device return code into [`Error::DeviceRejected`].
    pub fn check(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::DeviceRejected {
                id: self.id,
                retval: self.retval,
                rc: self.rc,
            })
        }
    }

    /// The filled part of the output buffer that was passed with the command.
    pub fn output<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[..buf.len().min(self.out_size as usize)]
    }
}

/// The commands reported by the driver, by command ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedCommands {
    commands: BTreeMap<u32, CommandInfo>,
}

impl SupportedCommands {
    /// Collects the entries of a query reply, skipping padding slots.
    pub fn from_query(reply: &QueryCommands) -> Self {
        Self {
            commands: reply.supported().map(|info| (info.id, *info)).collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&CommandInfo> {
        self.commands.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.commands.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandInfo> {
        self.commands.values()
    }
}

/// Result of checking a [`Command`] against the discovered commands.
///
/// Purely informational: [`MailboxClient::send_command`] sends the command either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// No discovery has been run, or the command is a raw command the driver does not list.
    Unchecked,
    Supported,
    /// The driver did not report the command at all.
    Unsupported,
    /// The driver knows the command, but it is not enabled for this device.
    Disabled,
    /// The kernel owns the resource; the driver will answer `EBUSY`.
    Exclusive,
    /// The output buffer is smaller than the command's fixed output size.
    OutputTooSmall { expected: u32, capacity: usize },
    /// The input payload does not match the command's fixed input size.
    InputSizeMismatch { expected: u32, actual: usize },
}

/// Client for the mailbox protocol of one device.
///
/// # Example
///
/// ```no_run
/// use cxl_mailbox::{MailboxClient, name_of};
///
/// let mut client = MailboxClient::open("mem0")?;
/// for info in client.discover()?.iter() {
///     println!("{:3} {}", info.id, name_of(info.id));
/// }
/// let identify = client.identify()?;
/// println!("firmware {}", identify.fw_revision);
/// # Ok::<(), cxl_mailbox::Error>(())
/// ```
#[derive(Debug)]
pub struct MailboxClient<T = DeviceHandle> {
    transport: T,
    supported: Option<SupportedCommands>,
}

impl MailboxClient<DeviceHandle> {
    /// Opens device node `name` under [`DEV_DIR`](crate::DEV_DIR).
    pub fn open(name: &str) -> Result<Self> {
        DeviceHandle::open(name).map(Self::new)
    }
}

impl<T: Transport> MailboxClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            supported: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Asks the driver how many commands it knows, without fetching any of them.
    pub fn query_command_count(&mut self) -> Result<u32> {
        Ok(self.query_commands(0)?.n_commands)
    }

    /// Fetches the first `count` command descriptions.
    ///
    /// The reply always has exactly `count` slots; those past the driver's command count are
    /// padding with ID 0. Counts above [`QueryCommands::MAX_COMMANDS`] fail with
    /// [`DecodeError::Overrun`] before anything is allocated.
    pub fn query_commands(&mut self, count: u32) -> Result<QueryCommands> {
        if count > QueryCommands::MAX_COMMANDS {
            return Err(DecodeError::Overrun {
                what: "n_commands",
                reported: count as usize,
                capacity: QueryCommands::MAX_COMMANDS as usize,
            }
            .into());
        }
        let mut arg = QueryCommands::request(count).encode();
        // SAFETY: the argument carries no payload addresses, and the buffer has room for the
        // `count` entries the driver may write.
        unsafe { self.transport.execute(MailboxIoctl::QueryCommands, &mut arg) }?;
        Ok(QueryCommands::decode(&arg, count as usize)?)
    }

    /// Runs the two-call discovery and remembers the result for [`MailboxClient::validate`].
    pub fn discover(&mut self) -> Result<&SupportedCommands> {
        let count = self.query_command_count()?;
        let reply = self.query_commands(count)?;
        let supported = SupportedCommands::from_query(&reply);
        tracing::debug!(
            n_commands = count,
            listed = supported.len(),
            "discovered mailbox commands"
        );
        Ok(self.supported.insert(supported))
    }

    /// Commands found by the last [`MailboxClient::discover`], if it ran.
    pub fn supported(&self) -> Option<&SupportedCommands> {
        self.supported.as_ref()
    }

    /// Checks `command` against the discovered commands.
    ///
    /// Variable-length (`~0`) sizes are never compared against the buffers.
    pub fn validate(&self, command: &Command<'_>) -> Advisory {
        let Some(supported) = &self.supported else {
            return Advisory::Unchecked;
        };
        let Some(info) = supported.get(command.id) else {
            return if command.id == CommandId::Raw.id() {
                Advisory::Unchecked
            } else {
                Advisory::Unsupported
            };
        };

        if !info.flags.contains(CommandFlags::ENABLED) {
            return Advisory::Disabled;
        }
        if info.flags.contains(CommandFlags::EXCLUSIVE) {
            return Advisory::Exclusive;
        }
        if let PayloadSize::Fixed(expected) = info.output_size() {
            let capacity = command.output_capacity();
            if capacity < expected as usize {
                return Advisory::OutputTooSmall { expected, capacity };
            }
        }
        if let PayloadSize::Fixed(expected) = info.input_size() {
            let actual = command.input_len();
            if actual != expected as usize {
                return Advisory::InputSizeMismatch { expected, actual };
            }
        }
        Advisory::Supported
    }

    /// Sends `command` and reports the driver's answer.
    ///
    /// A nonzero device return code is returned inside the [`CommandResponse`]; only transport
    /// failures and inconsistent replies are errors here.
    pub fn send_command(&mut self, mut command: Command<'_>) -> Result<CommandResponse> {
        let advisory = self.validate(&command);
        if !matches!(advisory, Advisory::Supported | Advisory::Unchecked) {
            tracing::debug!(id = command.id, ?advisory, "sending command despite advisory");
        }

        let capacity = command.output_capacity();
        let mut arg = command.envelope()?.encode();
        // SAFETY: the envelope's payload addresses come from the buffers borrowed by `command`,
        // which outlives this call, and carry their exact lengths.
        let rc = unsafe { self.transport.execute(MailboxIoctl::SendCommand, &mut arg) }?;
        let reply = SendCommand::decode(&arg)?;

        if reply.output.size as usize > capacity {
            return Err(DecodeError::Overrun {
                what: "output size",
                reported: reply.output.size as usize,
                capacity,
            }
            .into());
        }

        Ok(CommandResponse {
            id: command.id,
            rc,
            retval: reply.retval,
            out_size: reply.output.size,
        })
    }

    /// Fetches and decodes payload `P`, offering an output buffer of `capacity` bytes.
    pub fn fetch<P: Payload>(&mut self, capacity: usize) -> Result<P> {
        let mut buf = vec![0; capacity];
        let command = if P::COMMAND == CommandId::Raw {
            Command::raw(P::OPCODE)
        } else {
            Command::new(P::COMMAND)
        };
        let response = self.send_command(command.output(&mut buf))?.check()?;
        Ok(P::decode(response.output(&buf))?)
    }

    /// Runs *Identify* on the memory device.
    pub fn identify(&mut self) -> Result<Identify> {
        self.fetch(Identify::EXTENDED_LEN)
    }

    /// Runs the generic component *Identify* (as a raw command).
    pub fn identify_component(&mut self) -> Result<ComponentIdentify> {
        self.fetch(ComponentIdentify::LEN)
    }

    /// Runs *Get Supported Logs* with room for up to `max_entries` entries.
    pub fn supported_logs(&mut self, max_entries: usize) -> Result<SupportedLogs> {
        self.fetch(SupportedLogs::buffer_len(max_entries))
    }
}
