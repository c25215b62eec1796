//! Byte layouts of the `cxl_mem` ioctl arguments.
//!
//! Every structure here is encoded exactly as the kernel lays it out in `linux/cxl_mem.h`:
//! little-endian integers, declared field order, no padding. The layouts are fixed by the kernel
//! ABI and must not be rearranged.

use std::{fmt, ops::BitOr};

use crate::DecodeError;

/// `size_in`/`size_out` value that marks a variable-length payload (`~0` in C).
pub const VARIABLE_SIZE: u32 = !0;

/// Little-endian cursor over a borrowed byte slice.
///
/// Callers check the total length up front; the cursor still refuses to read past the end.
pub(crate) struct Reader<'a> {
    what: &'static str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(what: &'static str, bytes: &'a [u8]) -> Self {
        Self {
            what,
            bytes,
            pos: 0,
        }
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let chunk = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated {
            what: self.what,
            needed: end,
            actual: self.bytes.len(),
        })?;
        self.pos = end;
        let mut out = [0; N];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        self.array().map(u16::from_le_bytes)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, DecodeError> {
        self.array().map(u64::from_le_bytes)
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

/// Little-endian writer into a fixed, pre-sized buffer.
struct Writer<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn put(&mut self, src: &[u8]) {
        self.bytes[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }
}

/// `CXL_MEM_COMMAND_FLAG_*` bits of a [`CommandInfo`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandFlags(u32);

impl CommandFlags {
    /// The command is supported by the driver and backed by an opcode on the device.
    pub const ENABLED: Self = Self(1 << 0);
    /// The kernel owns the resource; sending the command fails with `EBUSY`.
    pub const EXCLUSIVE: Self = Self(1 << 1);
    /// `GENMASK(1, 0)`
    pub const MASK: Self = Self(0b11);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CommandFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for CommandFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, s: &str| {
            let sep = if first { "" } else { " | " };
            first = false;
            write!(f, "{sep}{s}")
        };
        if self.contains(Self::ENABLED) {
            put(f, "ENABLED")?;
        }
        if self.contains(Self::EXCLUSIVE) {
            put(f, "EXCLUSIVE")?;
        }
        let rest = self.0 & !Self::MASK.0;
        if rest != 0 {
            put(f, &format!("{rest:#x}"))?;
        }
        if self.0 == 0 {
            put(f, "(empty)")?;
        }
        Ok(())
    }
}

/// Expected size of a command payload, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    Fixed(u32),
    Variable,
}

impl From<u32> for PayloadSize {
    fn from(raw: u32) -> Self {
        if raw == VARIABLE_SIZE {
            PayloadSize::Variable
        } else {
            PayloadSize::Fixed(raw)
        }
    }
}

/// `struct cxl_command_info`: one entry of the query-commands array.
///
/// The sizes are descriptive. [`VARIABLE_SIZE`] is not a byte count; see [`PayloadSize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandInfo {
    pub id: u32,
    pub flags: CommandFlags,
    pub size_in: u32,
    pub size_out: u32,
}

impl CommandInfo {
    pub const LEN: usize = 16;

    pub fn input_size(&self) -> PayloadSize {
        self.size_in.into()
    }

    pub fn output_size(&self) -> PayloadSize {
        self.size_out.into()
    }

    /// Whether this slot was left untouched by the driver (ID 0).
    pub fn is_padding(&self) -> bool {
        self.id == 0
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0; Self::LEN];
        self.write(&mut Writer::new(&mut out));
        out
    }

    fn write(&self, w: &mut Writer<'_>) {
        w.u32(self.id);
        w.u32(self.flags.bits());
        w.u32(self.size_in);
        w.u32(self.size_out);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len("command info", Self::LEN, bytes)?;
        Self::read(&mut Reader::new("command info", bytes))
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: r.u32()?,
            flags: CommandFlags::from_bits(r.u32()?),
            size_in: r.u32()?,
            size_out: r.u32()?,
        })
    }
}

/// `struct cxl_mem_query_commands`: an 8-byte header followed by `commands`.
///
/// The number of array slots is fixed when the value is built; growing the array means building
/// a new value. When decoding, the slot count has to be supplied by the caller, since the header's
/// `n_commands` is an in/out field and does not necessarily describe the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCommands {
    pub n_commands: u32,
    pub rsvd: u32,
    pub commands: Vec<CommandInfo>,
}

impl QueryCommands {
    pub const HEADER_LEN: usize = 8;

    /// Largest command count a query is built for.
    ///
    /// The driver's table has 32 entries. Counts above this cap are refused rather than allocated.
    pub const MAX_COMMANDS: u32 = 1024;

    /// Builds a request for `count` entries, with all slots zeroed.
    ///
    /// `count` is not checked against [`QueryCommands::MAX_COMMANDS`]; that is up to the caller.
    pub fn request(count: u32) -> Self {
        Self {
            n_commands: count,
            rsvd: 0,
            commands: vec![CommandInfo::default(); count as usize],
        }
    }

    /// Length in bytes of an encoded value with `count` array slots.
    pub const fn encoded_len(count: usize) -> usize {
        Self::HEADER_LEN + count * CommandInfo::LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0; Self::encoded_len(self.commands.len())];
        let mut w = Writer::new(&mut out);
        w.u32(self.n_commands);
        w.u32(self.rsvd);
        for info in &self.commands {
            info.write(&mut w);
        }
        out
    }

    /// Decodes a header followed by exactly `count` array slots.
    pub fn decode(bytes: &[u8], count: usize) -> Result<Self, DecodeError> {
        DecodeError::check_len("query commands", Self::encoded_len(count), bytes)?;
        let mut r = Reader::new("query commands", bytes);
        let n_commands = r.u32()?;
        let rsvd = r.u32()?;
        let commands = (0..count)
            .map(|_| CommandInfo::read(&mut r))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            n_commands,
            rsvd,
            commands,
        })
    }

    /// Iterates over the filled-in entries, skipping padding slots.
    pub fn supported(&self) -> impl Iterator<Item = &CommandInfo> {
        self.commands.iter().filter(|info| !info.is_padding())
    }
}

/// Input or output block of a [`SendCommand`].
///
/// `payload` is the userspace address of a buffer owned by the caller of the `ioctl`; this
/// type never owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadDesc {
    pub size: u32,
    pub rsvd: u32,
    pub payload: u64,
}

impl PayloadDesc {
    fn write(&self, w: &mut Writer<'_>) {
        w.u32(self.size);
        w.u32(self.rsvd);
        w.u64(self.payload);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            size: r.u32()?,
            rsvd: r.u32()?,
            payload: r.u64()?,
        })
    }
}

/// The `raw` member of the anonymous union in `struct cxl_send_command`.
///
/// Only meaningful for the raw command; for every other command both halves must be zero, which
/// encodes the same 4 bytes as the union's `__u32 rsvd` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawOpcode {
    pub opcode: u16,
    pub rsvd: u16,
}

impl RawOpcode {
    /// The union read through its `__u32 rsvd` member.
    pub fn as_reserved(&self) -> u32 {
        u32::from(self.opcode) | u32::from(self.rsvd) << 16
    }
}

/// `struct cxl_send_command`.
///
/// ```text
/// offset  field
///      0  id
///      4  flags
///      8  raw.opcode / rsvd
///     10  raw.rsvd
///     12  retval
///     16  in.size, in.rsvd, in.payload
///     32  out.size, out.rsvd, out.payload
///     48
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendCommand {
    pub id: u32,
    pub flags: u32,
    pub raw: RawOpcode,
    pub retval: u32,
    pub input: PayloadDesc,
    pub output: PayloadDesc,
}

impl SendCommand {
    pub const LEN: usize = 48;

    /// Byte offset of `retval`.
    pub const RETVAL_OFFSET: usize = 12;
    /// Byte offset of `out.size`.
    pub const OUT_SIZE_OFFSET: usize = 32;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0; Self::LEN];
        let mut w = Writer::new(&mut out);
        w.u32(self.id);
        w.u32(self.flags);
        w.u16(self.raw.opcode);
        w.u16(self.raw.rsvd);
        w.u32(self.retval);
        self.input.write(&mut w);
        self.output.write(&mut w);
        debug_assert_eq!(w.pos, Self::LEN);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len("send command", Self::LEN, bytes)?;
        let mut r = Reader::new("send command", bytes);
        Ok(Self {
            id: r.u32()?,
            flags: r.u32()?,
            raw: RawOpcode {
                opcode: r.u16()?,
                rsvd: r.u16()?,
            },
            retval: r.u32()?,
            input: PayloadDesc::read(&mut r)?,
            output: PayloadDesc::read(&mut r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_info_bytes() {
        let info = CommandInfo {
            id: 1,
            flags: CommandFlags::ENABLED,
            size_in: 0,
            size_out: 0x43,
        };
        assert_eq!(
            info.encode(),
            [1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0x43, 0, 0, 0]
        );
        assert_eq!(CommandInfo::decode(&info.encode()).unwrap(), info);
    }

    #[test]
    fn variable_size_sentinel() {
        let info = CommandInfo {
            id: 3,
            flags: CommandFlags::ENABLED | CommandFlags::EXCLUSIVE,
            size_in: VARIABLE_SIZE,
            size_out: VARIABLE_SIZE,
        };
        let back = CommandInfo::decode(&info.encode()).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.input_size(), PayloadSize::Variable);
        assert_eq!(back.output_size(), PayloadSize::Variable);
        assert_eq!(CommandInfo::default().output_size(), PayloadSize::Fixed(0));
    }

    #[test]
    fn command_info_short() {
        assert_eq!(
            CommandInfo::decode(&[0; 15]),
            Err(DecodeError::Truncated {
                what: "command info",
                needed: 16,
                actual: 15,
            })
        );
    }

    #[test]
    fn flags() {
        let both = CommandFlags::ENABLED | CommandFlags::EXCLUSIVE;
        assert!(both.contains(CommandFlags::ENABLED));
        assert!(both.contains(CommandFlags::EXCLUSIVE));
        assert!(!CommandFlags::ENABLED.contains(CommandFlags::EXCLUSIVE));
        assert_eq!(both, CommandFlags::MASK);
        assert_eq!(format!("{both:?}"), "ENABLED | EXCLUSIVE");
        assert_eq!(format!("{:?}", CommandFlags::empty()), "(empty)");
        assert_eq!(format!("{:?}", CommandFlags::from_bits(0x5)), "ENABLED | 0x4");
    }

    #[test]
    fn query_request() {
        let empty = QueryCommands::request(0);
        assert_eq!(empty.encode(), [0; 8]);

        let query = QueryCommands::request(3);
        let bytes = query.encode();
        assert_eq!(bytes.len(), 8 + 3 * 16);
        assert_eq!(&bytes[..4], &3u32.to_le_bytes());
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn query_decode() {
        let query = QueryCommands {
            n_commands: 3,
            rsvd: 0,
            commands: vec![
                CommandInfo {
                    id: 1,
                    flags: CommandFlags::ENABLED,
                    size_in: 0,
                    size_out: 0x43,
                },
                CommandInfo {
                    id: 10,
                    flags: CommandFlags::ENABLED | CommandFlags::EXCLUSIVE,
                    size_in: VARIABLE_SIZE,
                    size_out: 0,
                },
                CommandInfo::default(),
            ],
        };
        let bytes = query.encode();
        assert_eq!(QueryCommands::decode(&bytes, 3).unwrap(), query);
        assert_eq!(query.supported().map(|c| c.id).collect::<Vec<_>>(), [1, 10]);

        // fewer slots than the buffer holds is fine, more is not
        assert_eq!(QueryCommands::decode(&bytes, 1).unwrap().commands.len(), 1);
        assert_eq!(
            QueryCommands::decode(&bytes, 4),
            Err(DecodeError::Truncated {
                what: "query commands",
                needed: 8 + 4 * 16,
                actual: bytes.len(),
            })
        );
    }

    #[test]
    fn send_command_offsets() {
        let cmd = SendCommand {
            id: 2,
            flags: 0,
            raw: RawOpcode {
                opcode: 0x4000,
                rsvd: 0,
            },
            retval: 0xdead_beef,
            input: PayloadDesc {
                size: 4,
                rsvd: 0,
                payload: 0x1122_3344_5566_7788,
            },
            output: PayloadDesc {
                size: 0x43,
                rsvd: 0,
                payload: 0x8877_6655_4433_2211,
            },
        };
        let bytes = cmd.encode();
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..10], &0x4000u16.to_le_bytes());
        assert_eq!(
            &bytes[SendCommand::RETVAL_OFFSET..][..4],
            &0xdead_beefu32.to_le_bytes()
        );
        assert_eq!(&bytes[16..20], &4u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(
            &bytes[SendCommand::OUT_SIZE_OFFSET..][..4],
            &0x43u32.to_le_bytes()
        );
        assert_eq!(&bytes[40..48], &0x8877_6655_4433_2211u64.to_le_bytes());
        assert_eq!(SendCommand::decode(&bytes).unwrap(), cmd);
        assert_eq!(cmd.raw.as_reserved(), 0x4000);
    }

    #[test]
    fn send_command_short() {
        assert!(matches!(
            SendCommand::decode(&[0; 44]),
            Err(DecodeError::Truncated { needed: 48, actual: 44, .. })
        ));
    }
}
