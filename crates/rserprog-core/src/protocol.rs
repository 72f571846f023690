//! Serprog protocol constants and command dispatch
//!
//! Based on the Serial Flasher Protocol Specification version 1. This is
//! the device-side view of the protocol: the command set here is the
//! single source of truth for both dispatch and the Q_CMDMAP bitmap.

use bitflags::bitflags;

/// Protocol version we implement
pub const SERPROG_PROTOCOL_VERSION: u16 = 1;

/// ACK response byte
pub const S_ACK: u8 = 0x06;
/// NAK response byte
pub const S_NAK: u8 = 0x15;

/// Number of bytes in the command map bitmap
pub const CMDMAP_SIZE: usize = 32;

/// Working buffer capacity, also advertised as the serial and operation
/// buffer sizes and as the maximum read-n/write-n length.
pub const WORK_BUF_SIZE: usize = 4096;

/// Programmer name returned for Q_PGMNAME, NUL-padded to 16 bytes
pub const PROGRAMMER_NAME: &[u8; 16] = b"rserprog\0\0\0\0\0\0\0\0";

/// Data-phase timeout: a multi-byte command abandoned by the host for
/// longer than this is silently dropped.
pub const DATA_TIMEOUT_MS: u32 = 300;

/// Length of the SPI operation header (3-byte write length + 3-byte read
/// length, both little-endian)
pub const SPIOP_HEADER_LEN: usize = 6;

bitflags! {
    /// Bus type flags, as used by Q_BUSTYPE and S_BUSTYPE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusType: u8 {
        /// Parallel bus
        const PARALLEL = 1 << 0;
        /// LPC bus
        const LPC      = 1 << 1;
        /// FWH bus
        const FWH      = 1 << 2;
        /// SPI bus
        const SPI      = 1 << 3;
    }
}

/// The commands this device implements
///
/// Discriminants are the wire opcodes. Anything not listed here is
/// answered with a NAK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// No operation
    Nop = 0x00,
    /// Query interface version
    QueryIface = 0x01,
    /// Query supported commands bitmap
    QueryCmdMap = 0x02,
    /// Query programmer name
    QueryPgmName = 0x03,
    /// Query serial buffer size
    QuerySerBuf = 0x04,
    /// Query supported bustypes
    QueryBusType = 0x05,
    /// Query operation buffer size
    QueryOpBuf = 0x07,
    /// Query maximum write-n length
    QueryWriteMaxLen = 0x08,
    /// Special no-operation that returns NAK+ACK (for synchronization)
    SyncNop = 0x10,
    /// Query maximum read-n length
    QueryReadMaxLen = 0x11,
    /// Set used bustype(s)
    SetBusType = 0x12,
    /// Perform SPI operation
    SpiOp = 0x13,
    /// Set SPI clock frequency
    SetSpiFreq = 0x14,
}

impl Command {
    /// Every command this device implements
    pub const ALL: [Command; 13] = [
        Command::Nop,
        Command::QueryIface,
        Command::QueryCmdMap,
        Command::QueryPgmName,
        Command::QuerySerBuf,
        Command::QueryBusType,
        Command::QueryOpBuf,
        Command::QueryWriteMaxLen,
        Command::SyncNop,
        Command::QueryReadMaxLen,
        Command::SetBusType,
        Command::SpiOp,
        Command::SetSpiFreq,
    ];

    /// Look up a wire opcode
    pub fn from_code(code: u8) -> Option<Command> {
        Command::ALL.iter().copied().find(|cmd| cmd.code() == code)
    }

    /// The wire opcode of this command
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether this command takes additional data bytes before responding
    pub const fn is_deferred(self) -> bool {
        matches!(
            self,
            Command::SetBusType | Command::SpiOp | Command::SetSpiFreq
        )
    }
}

/// Supported commands bitmap
#[derive(Debug, Clone)]
pub struct CommandMap {
    /// Raw bitmap of supported commands
    pub bitmap: [u8; CMDMAP_SIZE],
}

impl CommandMap {
    /// Create an empty command map
    pub const fn new() -> Self {
        Self {
            bitmap: [0; CMDMAP_SIZE],
        }
    }

    /// The command map for this device, derived from [`Command::ALL`]
    pub fn supported() -> Self {
        let mut map = Self::new();
        for cmd in Command::ALL {
            map.set_supported(cmd.code());
        }
        map
    }

    /// Check if a command is supported
    pub fn is_supported(&self, cmd: u8) -> bool {
        let byte_idx = (cmd / 8) as usize;
        let bit_idx = cmd % 8;
        if byte_idx >= CMDMAP_SIZE {
            return false;
        }
        (self.bitmap[byte_idx] & (1 << bit_idx)) != 0
    }

    /// Set a command as supported
    pub fn set_supported(&mut self, cmd: u8) {
        let byte_idx = (cmd / 8) as usize;
        let bit_idx = cmd % 8;
        if byte_idx < CMDMAP_SIZE {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        }
    }
}

impl Default for CommandMap {
    fn default() -> Self {
        Self::new()
    }
}
