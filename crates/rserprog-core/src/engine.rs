//! Protocol engine: the serprog command state machine
//!
//! A single-threaded consumer takes received bytes one at a time and
//! drives the two-phase state machine: a byte in `AwaitCommand` is a
//! complete command dispatch, a byte in `AwaitData` feeds the active
//! multi-byte command. All protocol errors are answered with a NAK at
//! the point of detection; nothing propagates out of [`Engine::on_byte`].

use crate::bus::BusDriver;
use crate::protocol::{
    BusType, Command, CommandMap, CMDMAP_SIZE, DATA_TIMEOUT_MS, PROGRAMMER_NAME, S_ACK, S_NAK,
    SERPROG_PROTOCOL_VERSION, SPIOP_HEADER_LEN, WORK_BUF_SIZE,
};

/// Length of the S_SPI_FREQ parameter (little-endian u32)
const FREQ_PARAM_LEN: usize = 4;

/// Queue bytes for transmission
///
/// Implemented by the transmit path. May suspend the caller in bounded
/// intervals while waiting for buffer space; from the engine's view the
/// call is synchronous and infallible.
pub trait ByteSink {
    /// Queue all of `data` for transmission
    fn send(&mut self, data: &[u8]);
}

/// Monotonic millisecond clock, wrapping arithmetic
pub trait Clock {
    /// Milliseconds since an arbitrary epoch
    fn now_ms(&self) -> u32;
}

/// [`Clock`] backed by `std::time::Instant`
#[cfg(feature = "std")]
pub struct StdClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// Coarse protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Next byte is a command opcode
    AwaitCommand,
    /// Next byte belongs to the active multi-byte command
    AwaitData,
}

/// Parsed SPI operation header, valid once all six bytes arrived
#[derive(Debug, Clone, Copy, Default)]
struct SpiOpHeader {
    write_len: u32,
    read_len: u32,
}

/// Mutable protocol session state
///
/// Created once and reused for the process lifetime; `reset` re-arms
/// the state machine without deallocating anything. The work buffer is
/// shared between command parameters, the SPI payload, the SPI read
/// data and immediate responses, with no cross-command persistence.
pub struct Session {
    phase: Phase,
    active: Option<Command>,
    byte_counter: usize,
    last_rx_ms: u32,
    header: SpiOpHeader,
    buf: [u8; WORK_BUF_SIZE],
}

impl Session {
    /// Create a fresh session in `AwaitCommand`
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitCommand,
            active: None,
            byte_counter: 0,
            last_rx_ms: 0,
            header: SpiOpHeader::default(),
            buf: [0; WORK_BUF_SIZE],
        }
    }

    /// Current protocol phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Return to `AwaitCommand`, discarding any partial data
    pub fn reset(&mut self) {
        self.phase = Phase::AwaitCommand;
        self.active = None;
        self.byte_counter = 0;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// The serprog protocol engine
///
/// Owns the session state and the three collaborators: the byte sink
/// (transmit path), the bus driver and a clock for the data-phase
/// timeout. Feed it one received byte at a time, in arrival order.
pub struct Engine<S: ByteSink, B: BusDriver, C: Clock> {
    session: Session,
    sink: S,
    bus: B,
    clock: C,
}

impl<S: ByteSink, B: BusDriver, C: Clock> Engine<S, B, C> {
    /// Create an engine in `AwaitCommand`
    pub fn new(sink: S, bus: B, clock: C) -> Self {
        Self {
            session: Session::new(),
            sink,
            bus,
            clock,
        }
    }

    /// Current session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Access the bus driver
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Process one received byte
    ///
    /// Must be called exactly once per byte, in arrival order, from a
    /// single consumer.
    pub fn on_byte(&mut self, c: u8) {
        self.check_timeout();
        match self.session.phase {
            Phase::AwaitCommand => self.dispatch_command(c),
            Phase::AwaitData => {
                self.session.last_rx_ms = self.clock.now_ms();
                self.handle_data(c);
            }
        }
    }

    /// Drop a partially received command the host abandoned
    ///
    /// Silent on the wire: the host has likely already given up on the
    /// exchange, so a NAK would only desynchronize the next command.
    fn check_timeout(&mut self) {
        if self.session.phase != Phase::AwaitData {
            return;
        }
        let elapsed = self.clock.now_ms().wrapping_sub(self.session.last_rx_ms);
        if elapsed > DATA_TIMEOUT_MS {
            log::warn!(
                "serprog: timeout in command 0x{:02X}, dropping partial data",
                self.session.active.map(|cmd| cmd.code()).unwrap_or(0)
            );
            self.session.reset();
        }
    }

    fn dispatch_command(&mut self, code: u8) {
        let session = &mut self.session;
        session.byte_counter = 0;

        let Some(cmd) = Command::from_code(code) else {
            log::debug!("serprog: unrecognized command 0x{:02X}", code);
            self.sink.send(&[S_NAK]);
            return;
        };
        log::debug!("serprog: command {:?}", cmd);

        let len = match cmd {
            Command::Nop => {
                session.buf[0] = S_ACK;
                1
            }
            Command::QueryIface => {
                session.buf[0] = S_ACK;
                session.buf[1..3].copy_from_slice(&SERPROG_PROTOCOL_VERSION.to_le_bytes());
                3
            }
            Command::QueryCmdMap => {
                session.buf[0] = S_ACK;
                session.buf[1..1 + CMDMAP_SIZE].copy_from_slice(&CommandMap::supported().bitmap);
                1 + CMDMAP_SIZE
            }
            Command::QueryPgmName => {
                session.buf[0] = S_ACK;
                session.buf[1..17].copy_from_slice(PROGRAMMER_NAME);
                17
            }
            Command::SyncNop => {
                session.buf[0] = S_NAK;
                session.buf[1] = S_ACK;
                2
            }
            Command::QuerySerBuf | Command::QueryOpBuf => {
                session.buf[0] = S_ACK;
                session.buf[1..3].copy_from_slice(&(WORK_BUF_SIZE as u16).to_le_bytes());
                3
            }
            Command::QueryWriteMaxLen | Command::QueryReadMaxLen => {
                let max = WORK_BUF_SIZE as u32;
                session.buf[0] = S_ACK;
                session.buf[1] = max as u8;
                session.buf[2] = (max >> 8) as u8;
                session.buf[3] = (max >> 16) as u8;
                4
            }
            Command::QueryBusType => {
                session.buf[0] = S_ACK;
                session.buf[1] = BusType::SPI.bits();
                2
            }
            Command::SetBusType | Command::SpiOp | Command::SetSpiFreq => {
                session.phase = Phase::AwaitData;
                session.active = Some(cmd);
                session.last_rx_ms = self.clock.now_ms();
                return;
            }
        };
        self.sink.send(&session.buf[..len]);
    }

    fn handle_data(&mut self, c: u8) {
        match self.session.active {
            Some(Command::SetBusType) => self.data_set_bus_type(c),
            Some(Command::SpiOp) => self.data_spi_op(c),
            Some(Command::SetSpiFreq) => self.data_set_freq(c),
            // AwaitData without an active deferred command cannot be
            // reached through on_byte; recover anyway.
            _ => self.session.reset(),
        }
    }

    fn data_set_bus_type(&mut self, c: u8) {
        let status = if c == BusType::SPI.bits() {
            S_ACK
        } else {
            log::warn!("serprog: unsupported bus type mask 0x{:02X}", c);
            S_NAK
        };
        self.sink.send(&[status]);
        self.session.reset();
    }

    fn data_spi_op(&mut self, c: u8) {
        if self.session.byte_counter < SPIOP_HEADER_LEN {
            let counter = self.session.byte_counter;
            self.session.buf[counter] = c;
            self.session.byte_counter += 1;
            if self.session.byte_counter < SPIOP_HEADER_LEN {
                return;
            }

            let write_len = u24_le(&self.session.buf[0..3]);
            let read_len = u24_le(&self.session.buf[3..6]);
            log::debug!(
                "serprog: SPI op: write {} byte(s), read {} byte(s)",
                write_len,
                read_len
            );
            if write_len as usize > WORK_BUF_SIZE || read_len as usize > WORK_BUF_SIZE {
                log::warn!(
                    "serprog: SPI op length exceeds {}-byte buffer, rejecting",
                    WORK_BUF_SIZE
                );
                self.nak_and_reset();
                return;
            }
            self.session.header = SpiOpHeader {
                write_len,
                read_len,
            };
            if write_len == 0 {
                self.run_spi_op();
            }
            return;
        }

        let payload_idx = self.session.byte_counter - SPIOP_HEADER_LEN;
        if payload_idx >= WORK_BUF_SIZE {
            self.nak_and_reset();
            return;
        }
        self.session.buf[payload_idx] = c;
        self.session.byte_counter += 1;

        if self.session.byte_counter - SPIOP_HEADER_LEN == self.session.header.write_len as usize {
            self.run_spi_op();
        }
    }

    fn run_spi_op(&mut self) {
        let write_len = self.session.header.write_len as usize;
        let read_len = self.session.header.read_len as usize;
        match self.bus.transfer(&mut self.session.buf, write_len, read_len) {
            Ok(()) => {
                // The executor left the read data at the start of the buffer
                self.sink.send(&[S_ACK]);
                if read_len > 0 {
                    self.sink.send(&self.session.buf[..read_len]);
                }
            }
            Err(err) => {
                log::error!("serprog: SPI transfer failed: {}", err);
                self.sink.send(&[S_NAK]);
            }
        }
        self.session.reset();
    }

    fn data_set_freq(&mut self, c: u8) {
        if self.session.byte_counter >= FREQ_PARAM_LEN {
            self.nak_and_reset();
            return;
        }
        let counter = self.session.byte_counter;
        self.session.buf[counter] = c;
        self.session.byte_counter += 1;
        if self.session.byte_counter < FREQ_PARAM_LEN {
            return;
        }

        let raw = [
            self.session.buf[0],
            self.session.buf[1],
            self.session.buf[2],
            self.session.buf[3],
        ];
        let hz = u32::from_le_bytes(raw);
        if hz == 0 {
            log::warn!("serprog: rejecting zero SPI frequency");
            self.nak_and_reset();
            return;
        }
        match self.bus.set_frequency(hz) {
            Ok(applied) => {
                log::info!("serprog: SPI frequency set to {} Hz", applied);
                let resp = [S_ACK, raw[0], raw[1], raw[2], raw[3]];
                self.sink.send(&resp);
                self.session.reset();
            }
            Err(err) => {
                log::error!("serprog: setting SPI frequency failed: {}", err);
                self.nak_and_reset();
            }
        }
    }

    fn nak_and_reset(&mut self) {
        self.sink.send(&[S_NAK]);
        self.session.reset();
    }
}

fn u24_le(bytes: &[u8]) -> u32 {
    (bytes[0] as u32) | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16)
}
