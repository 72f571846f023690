//! Bus executor: one logical SPI transaction over a platform port
//!
//! A serprog SPI operation is a write phase followed by a read phase
//! with chip select held across both. The platform supplies a
//! [`SpiPort`]; the [`BusExecutor`] sequences the phases, applies the
//! configured frequency, and guarantees chip select is released on
//! every exit path. The protocol engine only sees the [`BusDriver`]
//! trait.

use crate::error::{Error, Result};

/// Platform SPI port, as provided by the surrounding firmware
///
/// The `_held` calls leave chip select asserted when they return, so
/// consecutive phases form one transaction. `release` deasserts it and
/// must be safe to call at any time.
pub trait SpiPort {
    /// Blocking write of `data` at `freq_hz`, chip select held afterwards
    fn write_held(&mut self, freq_hz: u32, data: &[u8]) -> Result<()>;

    /// Blocking read into `buf` at `freq_hz`, chip select held afterwards
    fn read_held(&mut self, freq_hz: u32, buf: &mut [u8]) -> Result<()>;

    /// Deassert chip select
    fn release(&mut self);
}

/// The bus interface consumed by the protocol engine
pub trait BusDriver {
    /// Perform one transaction: write `buf[..write_len]`, then read
    /// `read_len` bytes back into `buf[..read_len]`, chip select held
    /// across both phases.
    fn transfer(&mut self, buf: &mut [u8], write_len: usize, read_len: usize) -> Result<()>;

    /// Set the operating frequency for subsequent transfers, clamping
    /// to the hardware maximum. Returns the frequency actually applied.
    fn set_frequency(&mut self, hz: u32) -> Result<u32>;
}

/// Operating frequency settings, read on every transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Current SPI clock frequency in Hz
    pub frequency: u32,
    /// Upper bound imposed by the hardware
    pub max_frequency: u32,
}

impl BusConfig {
    /// Start at `frequency`, clamped to `max_frequency`
    pub const fn new(frequency: u32, max_frequency: u32) -> Self {
        let frequency = if frequency > max_frequency {
            max_frequency
        } else {
            frequency
        };
        Self {
            frequency,
            max_frequency,
        }
    }
}

/// [`BusDriver`] implementation over a platform [`SpiPort`]
pub struct BusExecutor<P: SpiPort> {
    port: P,
    config: BusConfig,
}

impl<P: SpiPort> BusExecutor<P> {
    /// Create an executor over `port`
    pub fn new(port: P, config: BusConfig) -> Self {
        Self { port, config }
    }

    /// Current frequency settings
    pub fn config(&self) -> BusConfig {
        self.config
    }

    /// Access the underlying port
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn run_phases(&mut self, buf: &mut [u8], write_len: usize, read_len: usize) -> Result<()> {
        let freq = self.config.frequency;
        if write_len > 0 {
            self.port.write_held(freq, &buf[..write_len])?;
        }
        if read_len > 0 {
            self.port.read_held(freq, &mut buf[..read_len])?;
        }
        Ok(())
    }
}

impl<P: SpiPort> BusDriver for BusExecutor<P> {
    fn transfer(&mut self, buf: &mut [u8], write_len: usize, read_len: usize) -> Result<()> {
        if write_len == 0 && read_len == 0 {
            return Err(Error::EmptyTransfer);
        }
        let result = self.run_phases(buf, write_len, read_len);
        // Chip select must not stay asserted after a failed phase
        self.port.release();
        result
    }

    fn set_frequency(&mut self, hz: u32) -> Result<u32> {
        if hz == 0 {
            return Err(Error::InvalidFrequency);
        }
        let applied = hz.min(self.config.max_frequency);
        if applied != hz {
            log::debug!("serprog: clamping requested {} Hz to {} Hz", hz, applied);
        }
        self.config.frequency = applied;
        Ok(applied)
    }
}
