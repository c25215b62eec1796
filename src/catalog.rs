//! Command IDs understood by the `cxl_mem` driver.
//!
//! Command IDs are the driver's numbering, not hardware opcodes. Each ID except `Invalid`, `Raw`
//! and `Max` stands for one mailbox opcode; the raw command carries its opcode in the send-command
//! envelope instead.

use crate::Error;

/// Name returned by [`name_of`] for IDs outside the catalog.
pub const UNKNOWN_COMMAND: &str = "unknown";

macro_rules! commands {
    ($($variant:ident = $id:literal, $name:literal, $opcode:expr;)*) => {
        /// A command ID from the driver's fixed command table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum CommandId {
            $( $variant = $id, )*
        }

        static CATALOG: &[(CommandId, &str, Option<u16>)] = &[
            $( (CommandId::$variant, $name, $opcode), )*
        ];
    };
}

commands! {
    Invalid = 0, "Invalid Command", None;
    Identify = 1, "Identify Command", Some(0x4000);
    Raw = 2, "Raw device command", None;
    GetSupportedLogs = 3, "Get Supported Logs", Some(0x0400);
    GetFwInfo = 4, "Get FW Info", Some(0x0200);
    GetPartitionInfo = 5, "Get Partition Information", Some(0x4100);
    GetLsa = 6, "Get Label Storage Area", Some(0x4102);
    GetHealthInfo = 7, "Get Health Info", Some(0x4200);
    GetLog = 8, "Get Log", Some(0x0401);
    SetPartitionInfo = 9, "Set Partition Information", Some(0x4101);
    SetLsa = 10, "Set Label Storage Area", Some(0x4103);
    GetAlertConfig = 11, "Get Alert Configuration", Some(0x4201);
    SetAlertConfig = 12, "Set Alert Configuration", Some(0x4202);
    GetShutdownState = 13, "Get Shutdown State", Some(0x4203);
    SetShutdownState = 14, "Set Shutdown State", Some(0x4204);
    GetPoison = 15, "Get Poison List", Some(0x4300);
    InjectPoison = 16, "Inject Poison", Some(0x4301);
    ClearPoison = 17, "Clear Poison", Some(0x4302);
    GetScanMediaCaps = 18, "Get Scan Media Capabilities", Some(0x4303);
    ScanMedia = 19, "Scan Media", Some(0x4304);
    GetScanMedia = 20, "Get Scan Media Results", Some(0x4305);
    GetTimestamp = 21, "Get timestamp", Some(0x0300);
    SetTimestamp = 22, "Set timestamp", Some(0x0301);
    GetEventRecord = 23, "Get event log", Some(0x0100);
    ClearEventRecord = 24, "Clear event log", Some(0x0101);
    TransferFw = 25, "Transfer FW Package", Some(0x0201);
    ActivateFw = 26, "Activate FW", Some(0x0202);
    Sanitize = 27, "Sanitize Memdev", Some(0x4400);
    GetSldQosControl = 28, "Get SLD QoS Control", Some(0x4700);
    SetSldQosControl = 29, "Set SLD QoS Control", Some(0x4701);
    GetSldQosStatus = 30, "Get SLD QoS Status", Some(0x4702);
    Max = 31, "invalid / last command", None;
}

impl CommandId {
    pub const COUNT: usize = 32;

    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        CATALOG[self as usize].1
    }

    /// The mailbox opcode the driver issues for this command, if it has a fixed one.
    pub fn opcode(self) -> Option<u16> {
        CATALOG[self as usize].2
    }

    pub fn iter() -> impl Iterator<Item = CommandId> {
        CATALOG.iter().map(|&(id, ..)| id)
    }

    /// Finds the command the driver maps to a hardware `opcode`.
    pub fn from_opcode(opcode: u16) -> Option<CommandId> {
        CATALOG
            .iter()
            .find(|&&(_, _, op)| op == Some(opcode))
            .map(|&(id, ..)| id)
    }
}

impl TryFrom<u32> for CommandId {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self, Error> {
        CATALOG
            .get(id as usize)
            .map(|&(cmd, ..)| cmd)
            .ok_or(Error::UnknownCommand(id))
    }
}

impl From<CommandId> for u32 {
    fn from(id: CommandId) -> u32 {
        id.id()
    }
}

/// Returns the name of command `id`, or [`UNKNOWN_COMMAND`] if `id` is not in the catalog.
pub fn name_of(id: u32) -> &'static str {
    CommandId::try_from(id).map_or(UNKNOWN_COMMAND, CommandId::name)
}
