//! rserprog-core - Device-side Serial Flasher Protocol support
//!
//! This crate implements the device end of the serprog protocol: it
//! bridges a byte-stream serial transport to raw SPI transactions so a
//! host-side flashing tool can read, write and erase a flash chip
//! through this device.
//!
//! # Architecture
//!
//! Four pieces, wired together by the surrounding firmware:
//!
//! - [`rx`] - the receive interrupt pushes incoming bytes into a
//!   bounded queue, dropping (and counting) on overflow.
//! - [`engine`] - a single-threaded consumer pops bytes from that
//!   queue and runs the serprog state machine.
//! - [`tx`] - responses go into a circular buffer drained by the
//!   transmit interrupt; the engine blocks in bounded intervals when
//!   the buffer is full.
//! - [`bus`] - SPI operations run as one write-then-read transaction
//!   with chip select held across both phases.
//!
//! The crate is transport and HAL agnostic: the platform supplies a
//! [`SpiPort`](bus::SpiPort), the hardware FIFO closures for the two
//! interrupt paths, and a millisecond [`Clock`](engine::Clock).
//!
//! # Example
//!
//! ```no_run
//! use rserprog_core::bus::{BusConfig, BusExecutor};
//! use rserprog_core::engine::{Engine, StdClock};
//! # struct MyPort;
//! # impl rserprog_core::bus::SpiPort for MyPort {
//! #     fn write_held(&mut self, _: u32, _: &[u8]) -> rserprog_core::Result<()> { Ok(()) }
//! #     fn read_held(&mut self, _: u32, _: &mut [u8]) -> rserprog_core::Result<()> { Ok(()) }
//! #     fn release(&mut self) {}
//! # }
//! # struct MySink;
//! # impl rserprog_core::engine::ByteSink for MySink {
//! #     fn send(&mut self, _: &[u8]) {}
//! # }
//!
//! let bus = BusExecutor::new(MyPort, BusConfig::new(1_000_000, 8_000_000));
//! let mut engine = Engine::new(MySink, bus, StdClock::new());
//!
//! // Feed every received byte, in arrival order:
//! engine.on_byte(0x10); // SYNCNOP -> sink receives NAK, ACK
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod bus;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod rx;
pub mod tx;

// Re-exports
pub use bus::{BusConfig, BusDriver, BusExecutor, SpiPort};
pub use engine::{ByteSink, Clock, Engine, Phase, Session};
pub use error::{Error, Result};
pub use protocol::{BusType, Command, CommandMap, S_ACK, S_NAK};
pub use rx::{RxConsumer, RxProducer, RxQueue};
pub use tx::{TxDrainer, TxRing, TxSender};
