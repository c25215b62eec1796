//! Decoders for command output payloads.
//!
//! Each decoder takes the bytes the device actually returned (`out.size` of them) and either
//! produces a typed record or a [`DecodeError`]. Nothing is read beyond the supplied slice.

use std::fmt;

use crate::{CommandId, DecodeError, layout::Reader};

/// A typed mailbox output payload.
pub trait Payload: Sized {
    /// Driver command ID used to fetch this payload.
    const COMMAND: CommandId;
    /// Hardware opcode of the payload's command.
    const OPCODE: u16;
    /// Smallest buffer the payload can be decoded from.
    const LEN: usize;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

/// Capacity fields of [`Identify`] count multiples of 256 MiB.
pub const CAPACITY_MULTIPLIER: u64 = 256 * 1024 * 1024;

/// Output of the memory device *Identify* command (opcode `4000h`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identify {
    pub fw_revision: String,
    pub total_capacity: u64,
    pub volatile_capacity: u64,
    pub persistent_capacity: u64,
    pub partition_align: u64,
    pub info_event_log_size: u16,
    pub warning_event_log_size: u16,
    pub failure_event_log_size: u16,
    pub fatal_event_log_size: u16,
    /// Label Storage Area size in bytes.
    pub lsa_size: u32,
    /// Maximum number of media error records in the poison list (24 bits).
    pub poison_list_max_mer: u32,
    pub inject_poison_limit: u16,
    pub poison_caps: u8,
    pub qos_telemetry_caps: u8,
    /// Only reported by devices that return the longer (CXL 3.0) payload.
    pub dc_event_log_size: Option<u16>,
}

impl Identify {
    /// Length of the payload including the dynamic-capacity event log size.
    pub const EXTENDED_LEN: usize = 0x45;

    pub fn total_capacity_bytes(&self) -> u64 {
        self.total_capacity.saturating_mul(CAPACITY_MULTIPLIER)
    }

    pub fn volatile_capacity_bytes(&self) -> u64 {
        self.volatile_capacity.saturating_mul(CAPACITY_MULTIPLIER)
    }

    pub fn persistent_capacity_bytes(&self) -> u64 {
        self.persistent_capacity.saturating_mul(CAPACITY_MULTIPLIER)
    }

    pub fn partition_align_bytes(&self) -> u64 {
        self.partition_align.saturating_mul(CAPACITY_MULTIPLIER)
    }
}

impl Payload for Identify {
    const COMMAND: CommandId = CommandId::Identify;
    const OPCODE: u16 = 0x4000;
    const LEN: usize = 0x43;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len("identify payload", Self::LEN, bytes)?;
        let mut r = Reader::new("identify payload", bytes);
        let fw_revision = ascii_field(&r.array::<16>()?);
        let total_capacity = r.u64()?;
        let volatile_capacity = r.u64()?;
        let persistent_capacity = r.u64()?;
        let partition_align = r.u64()?;
        let info_event_log_size = r.u16()?;
        let warning_event_log_size = r.u16()?;
        let failure_event_log_size = r.u16()?;
        let fatal_event_log_size = r.u16()?;
        let lsa_size = r.u32()?;
        let [lo, mid, hi] = r.array::<3>()?;
        let inject_poison_limit = r.u16()?;
        let poison_caps = r.u8()?;
        let qos_telemetry_caps = r.u8()?;
        let dc_event_log_size = if bytes.len() >= Self::EXTENDED_LEN {
            Some(r.u16()?)
        } else {
            None
        };

        Ok(Self {
            fw_revision,
            total_capacity,
            volatile_capacity,
            persistent_capacity,
            partition_align,
            info_event_log_size,
            warning_event_log_size,
            failure_event_log_size,
            fatal_event_log_size,
            lsa_size,
            poison_list_max_mer: u32::from_le_bytes([lo, mid, hi, 0]),
            inject_poison_limit,
            poison_caps,
            qos_telemetry_caps,
            dc_event_log_size,
        })
    }
}

/// Output of the generic component *Identify* command (opcode `0001h`).
///
/// The driver has no command ID for this opcode; it is sent as a raw command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentIdentify {
    pub pcie_vendor_id: u16,
    pub pcie_device_id: u16,
    pub pcie_subsystem_vendor_id: u16,
    pub pcie_subsystem_device_id: u16,
    pub serial_number: u64,
    /// log2 of the maximum supported message size.
    pub max_supported_message_size: u8,
    pub component_type: u8,
}

impl ComponentIdentify {
    pub fn max_message_bytes(&self) -> Option<u64> {
        1u64.checked_shl(u32::from(self.max_supported_message_size))
    }
}

impl Payload for ComponentIdentify {
    const COMMAND: CommandId = CommandId::Raw;
    const OPCODE: u16 = 0x0001;
    const LEN: usize = 18;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len("component identify payload", Self::LEN, bytes)?;
        let mut r = Reader::new("component identify payload", bytes);
        Ok(Self {
            pcie_vendor_id: r.u16()?,
            pcie_device_id: r.u16()?,
            pcie_subsystem_vendor_id: r.u16()?,
            pcie_subsystem_device_id: r.u16()?,
            serial_number: r.u64()?,
            max_supported_message_size: r.u8()?,
            component_type: r.u8()?,
        })
    }
}

/// A log identifier, in the byte order it appears in the payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogUuid(pub [u8; 16]);

impl LogUuid {
    const fn parse(hex: &str) -> Self {
        const fn nibble(c: u8) -> u8 {
            match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                _ => panic!("invalid hex digit in log UUID"),
            }
        }

        let hex = hex.as_bytes();
        assert!(hex.len() == 32);
        let mut out = [0; 16];
        let mut i = 0;
        while i < 16 {
            out[i] = nibble(hex[2 * i]) << 4 | nibble(hex[2 * i + 1]);
            i += 1;
        }
        Self(out)
    }

    /// Name of a well-known log, if this is one.
    pub fn name(&self) -> Option<&'static str> {
        KNOWN_LOGS
            .iter()
            .find(|(uuid, _)| uuid == self)
            .map(|&(_, name)| name)
    }
}

impl fmt::Display for LogUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LogUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogUuid({self})")
    }
}

/// Command Effects Log.
pub const CEL_UUID: LogUuid = LogUuid::parse("0da9c0b5bf414b788f7996b1623b3f17");

static KNOWN_LOGS: &[(LogUuid, &str)] = &[
    (CEL_UUID, "Command Effects Log (CEL)"),
    (LogUuid::parse("5e1819d911a9400c811fd60719403d86"), "Vendor Debug Log"),
    (LogUuid::parse("b3fab4cf01b64332943e5e9962f23567"), "Component State Dump Log"),
    (LogUuid::parse("f1720d60a7a94306a00311948f9e077c"), "DDR5 Error Check Scrub (ECS) Log"),
    (LogUuid::parse("e6dfa32cd13e4a5c8ca899bebbf731a4"), "Media Test Capability Log"),
    (LogUuid::parse("2c2555228ce411ecb9090242ac120002"), "Media Test Results Short Log"),
    (LogUuid::parse("c1fe0b3e7a00448ea24ea6aabbfe587a"), "Media Test Results Long Log"),
];

/// One entry of [`SupportedLogs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    pub uuid: LogUuid,
    /// Size of the log in bytes.
    pub size: u32,
}

impl LogEntry {
    pub const LEN: usize = 20;
}

/// Output of *Get Supported Logs* (opcode `0400h`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedLogs {
    pub entries: Vec<LogEntry>,
}

impl SupportedLogs {
    pub const HEADER_LEN: usize = 8;

    /// Output buffer size needed to receive up to `max_entries` entries.
    pub const fn buffer_len(max_entries: usize) -> usize {
        Self::HEADER_LEN + max_entries * LogEntry::LEN
    }

    pub fn get(&self, uuid: &LogUuid) -> Option<&LogEntry> {
        self.entries.iter().find(|e| e.uuid == *uuid)
    }
}

impl Payload for SupportedLogs {
    const COMMAND: CommandId = CommandId::GetSupportedLogs;
    const OPCODE: u16 = 0x0400;
    const LEN: usize = Self::HEADER_LEN;

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len("supported logs payload", Self::LEN, bytes)?;
        let mut r = Reader::new("supported logs payload", bytes);
        let count = usize::from(r.u16()?);
        r.array::<6>()?;

        let capacity = (bytes.len() - r.position()) / LogEntry::LEN;
        if count > capacity {
            return Err(DecodeError::Overrun {
                what: "supported log entry count",
                reported: count,
                capacity,
            });
        }

        let entries = (0..count)
            .map(|_| {
                Ok(LogEntry {
                    uuid: LogUuid(r.array()?),
                    size: r.u32()?,
                })
            })
            .collect::<Result<_, DecodeError>>()?;
        Ok(Self { entries })
    }
}

/// Decodes a fixed-width ASCII field, dropping trailing NULs and whitespace.
fn ascii_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim_end().to_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A plausible 0x43-byte Identify payload.
    pub(crate) fn identify_bytes() -> Vec<u8> {
        let mut b = Vec::with_capacity(Identify::LEN);
        b.extend_from_slice(b"FW-1.2.3\0\0\0\0\0\0\0\0");
        b.extend_from_slice(&4u64.to_le_bytes()); // total
        b.extend_from_slice(&2u64.to_le_bytes()); // volatile
        b.extend_from_slice(&2u64.to_le_bytes()); // persistent
        b.extend_from_slice(&1u64.to_le_bytes()); // partition align
        b.extend_from_slice(&16u16.to_le_bytes());
        b.extend_from_slice(&8u16.to_le_bytes());
        b.extend_from_slice(&4u16.to_le_bytes());
        b.extend_from_slice(&2u16.to_le_bytes());
        b.extend_from_slice(&0x2_0000u32.to_le_bytes());
        b.extend_from_slice(&[0x00, 0x01, 0x00]); // 256 media error records
        b.extend_from_slice(&10u16.to_le_bytes());
        b.push(0x07);
        b.push(0x01);
        assert_eq!(b.len(), Identify::LEN);
        b
    }

    #[test]
    fn identify() {
        let id = Identify::decode(&identify_bytes()).unwrap();
        assert_eq!(id.fw_revision, "FW-1.2.3");
        assert_eq!(id.total_capacity, 4);
        assert_eq!(id.total_capacity_bytes(), 1 << 30);
        assert_eq!(id.volatile_capacity_bytes(), 512 << 20);
        assert_eq!(id.persistent_capacity, 2);
        assert_eq!(id.partition_align_bytes(), 256 << 20);
        assert_eq!(id.info_event_log_size, 16);
        assert_eq!(id.warning_event_log_size, 8);
        assert_eq!(id.failure_event_log_size, 4);
        assert_eq!(id.fatal_event_log_size, 2);
        assert_eq!(id.lsa_size, 0x2_0000);
        assert_eq!(id.poison_list_max_mer, 256);
        assert_eq!(id.inject_poison_limit, 10);
        assert_eq!(id.poison_caps, 0x07);
        assert_eq!(id.qos_telemetry_caps, 0x01);
        assert_eq!(id.dc_event_log_size, None);
    }

    #[test]
    fn identify_extended() {
        let mut bytes = identify_bytes();
        bytes.extend_from_slice(&32u16.to_le_bytes());
        assert_eq!(bytes.len(), Identify::EXTENDED_LEN);
        let id = Identify::decode(&bytes).unwrap();
        assert_eq!(id.dc_event_log_size, Some(32));

        // one stray byte is not enough for the extra field
        let id = Identify::decode(&bytes[..Identify::LEN + 1]).unwrap();
        assert_eq!(id.dc_event_log_size, None);
    }

    #[test]
    fn identify_short() {
        let bytes = identify_bytes();
        assert_eq!(
            Identify::decode(&bytes[..10]),
            Err(DecodeError::Truncated {
                what: "identify payload",
                needed: Identify::LEN,
                actual: 10,
            })
        );
        assert!(Identify::decode(&bytes[..Identify::LEN - 1]).is_err());
        assert!(Identify::decode(&[]).is_err());
    }

    #[test]
    fn fw_revision_padding() {
        assert_eq!(ascii_field(b"1.0 \0\0\0"), "1.0");
        assert_eq!(ascii_field(b"ABCDEFGH"), "ABCDEFGH");
        assert_eq!(ascii_field(b"\0garbage"), "");
    }

    #[test]
    fn component_identify() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x1e98u16.to_le_bytes());
        bytes.extend_from_slice(&0x0001u16.to_le_bytes());
        bytes.extend_from_slice(&0x1e98u16.to_le_bytes());
        bytes.extend_from_slice(&0x0002u16.to_le_bytes());
        bytes.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
        bytes.push(20);
        bytes.push(0x03);

        let id = ComponentIdentify::decode(&bytes).unwrap();
        assert_eq!(id.pcie_vendor_id, 0x1e98);
        assert_eq!(id.pcie_device_id, 0x0001);
        assert_eq!(id.pcie_subsystem_device_id, 0x0002);
        assert_eq!(id.serial_number, 0x0102_0304_0506_0708);
        assert_eq!(id.max_message_bytes(), Some(1 << 20));
        assert_eq!(id.component_type, 0x03);

        assert!(ComponentIdentify::decode(&bytes[..17]).is_err());
    }

    fn logs_bytes(count: u16, entries: &[(LogUuid, u32)]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&count.to_le_bytes());
        b.extend_from_slice(&[0; 6]);
        for (uuid, size) in entries {
            b.extend_from_slice(&uuid.0);
            b.extend_from_slice(&size.to_le_bytes());
        }
        b
    }

    #[test]
    fn supported_logs() {
        let vendor = LogUuid::parse("5e1819d911a9400c811fd60719403d86");
        let bytes = logs_bytes(2, &[(CEL_UUID, 0x100), (vendor, 0x2000)]);
        let logs = SupportedLogs::decode(&bytes).unwrap();
        assert_eq!(logs.entries.len(), 2);
        assert_eq!(logs.get(&CEL_UUID).unwrap().size, 0x100);
        assert_eq!(logs.entries[1].uuid.name(), Some("Vendor Debug Log"));

        // trailing slack in the caller's buffer is ignored
        let mut padded = bytes.clone();
        padded.resize(SupportedLogs::buffer_len(8), 0);
        assert_eq!(SupportedLogs::decode(&padded).unwrap(), logs);
    }

    #[test]
    fn supported_logs_overrun() {
        let bytes = logs_bytes(3, &[(CEL_UUID, 0x100)]);
        assert_eq!(
            SupportedLogs::decode(&bytes),
            Err(DecodeError::Overrun {
                what: "supported log entry count",
                reported: 3,
                capacity: 1,
            })
        );
        assert!(SupportedLogs::decode(&bytes[..7]).is_err());
        assert!(
            SupportedLogs::decode(&logs_bytes(0, &[]))
                .unwrap()
                .entries
                .is_empty()
        );
    }

    #[test]
    fn log_uuids() {
        assert_eq!(CEL_UUID.to_string(), "0da9c0b5-bf41-4b78-8f79-96b1623b3f17");
        assert_eq!(CEL_UUID.name(), Some("Command Effects Log (CEL)"));
        assert_eq!(LogUuid([0; 16]).name(), None);
        assert_eq!(KNOWN_LOGS.len(), 7);
    }
}
