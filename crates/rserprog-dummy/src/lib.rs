//! rserprog-dummy - In-memory SPI flash emulator for testing
//!
//! Provides a [`DummyFlashBus`] that emulates a small read-only SPI
//! NOR flash behind the [`SpiPort`] interface, so the whole protocol
//! path can be exercised without hardware. Useful for tests and for
//! the hosted loopback example.

use rserprog_core::bus::SpiPort;
use rserprog_core::error::{Error, Result};

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// JEDEC ID returned for RDID (0x9F)
    pub jedec_id: [u8; 3],
    /// Flash size in bytes
    pub size: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            jedec_id: [0xEF, 0x40, 0x18], // Winbond W25Q128FV
            size: 64 * 1024,
        }
    }
}

/// SPI port emulating a NOR flash chip
///
/// Understands RDID (0x9F), READ (0x03) and RDSR (0x05). Bytes written
/// while chip select is held accumulate as the current command;
/// `release` ends the transaction and clears it, mirroring the
/// chip-select-hold semantics real hardware gives the bus executor.
pub struct DummyFlashBus {
    config: DummyConfig,
    data: Vec<u8>,
    /// Command bytes received under the currently held chip select
    cmd: Vec<u8>,
    selected: bool,
    last_freq: Option<u32>,
}

impl DummyFlashBus {
    /// Create a dummy flash with the given configuration, erased to 0xFF
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            cmd: Vec::new(),
            selected: false,
            last_freq: None,
        }
    }

    /// Create a dummy flash with default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get a mutable reference to the flash contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Frequency of the most recent transfer, if any
    pub fn last_freq(&self) -> Option<u32> {
        self.last_freq
    }

    /// Whether chip select is currently asserted
    pub fn selected(&self) -> bool {
        self.selected
    }

    fn fill_response(&self, buf: &mut [u8]) {
        match self.cmd.first() {
            Some(0x9F) => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = *self.config.jedec_id.get(i).unwrap_or(&0x00);
                }
            }
            Some(0x03) if self.cmd.len() >= 4 => {
                let addr = ((self.cmd[1] as usize) << 16)
                    | ((self.cmd[2] as usize) << 8)
                    | (self.cmd[3] as usize);
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = *self.data.get(addr + i).unwrap_or(&0xFF);
                }
            }
            Some(0x05) => buf.fill(0x00),
            _ => buf.fill(0xFF),
        }
    }
}

impl SpiPort for DummyFlashBus {
    fn write_held(&mut self, freq_hz: u32, data: &[u8]) -> Result<()> {
        if freq_hz == 0 {
            return Err(Error::InvalidFrequency);
        }
        self.selected = true;
        self.last_freq = Some(freq_hz);
        self.cmd.extend_from_slice(data);
        log::trace!("dummy: write {} byte(s) at {} Hz", data.len(), freq_hz);
        Ok(())
    }

    fn read_held(&mut self, freq_hz: u32, buf: &mut [u8]) -> Result<()> {
        if freq_hz == 0 {
            return Err(Error::InvalidFrequency);
        }
        self.selected = true;
        self.last_freq = Some(freq_hz);
        self.fill_response(buf);
        log::trace!("dummy: read {} byte(s) at {} Hz", buf.len(), freq_hz);
        Ok(())
    }

    fn release(&mut self) {
        self.selected = false;
        self.cmd.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rserprog_core::bus::{BusConfig, BusDriver, BusExecutor};
    use rserprog_core::engine::{ByteSink, Engine, StdClock};
    use rserprog_core::protocol::{S_ACK, S_NAK};
    use rserprog_core::tx::{CondvarSignal, TxDrainer, TxIrqCtl, TxRing, TxSender};
    use rserprog_core::RxQueue;

    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Clone, Default)]
    struct VecSink(Rc<RefCell<Vec<u8>>>);

    impl ByteSink for VecSink {
        fn send(&mut self, data: &[u8]) {
            self.0.borrow_mut().extend_from_slice(data);
        }
    }

    fn dummy_engine(
        flash: DummyFlashBus,
    ) -> (
        Engine<VecSink, BusExecutor<DummyFlashBus>, StdClock>,
        VecSink,
    ) {
        init_logging();
        let sink = VecSink::default();
        let bus = BusExecutor::new(flash, BusConfig::new(1_000_000, 8_000_000));
        let engine = Engine::new(sink.clone(), bus, StdClock::new());
        (engine, sink)
    }

    #[test]
    fn test_wire_session_reads_jedec_id() {
        let (mut engine, sink) = dummy_engine(DummyFlashBus::new_default());

        let script = [
            0x10u8, // SYNCNOP
            0x01, // Q_IFACE
            0x12, 0x08, // S_BUSTYPE = SPI
            0x13, 3, 0, 0, 3, 0, 0, 0x9F, 0x00, 0x00, // SPIOP: RDID
        ];
        for b in script {
            engine.on_byte(b);
        }

        let expected = [
            S_NAK, S_ACK, // SYNCNOP
            S_ACK, 0x01, 0x00, // Q_IFACE
            S_ACK, // S_BUSTYPE
            S_ACK, 0xEF, 0x40, 0x18, // SPIOP
        ];
        assert_eq!(*sink.0.borrow(), expected);
    }

    #[test]
    fn test_wire_read_returns_flash_contents() {
        let mut flash = DummyFlashBus::new_default();
        flash.data_mut()[0x10..0x15].copy_from_slice(b"hello");
        let (mut engine, sink) = dummy_engine(flash);

        // READ 5 bytes from 0x000010
        let script = [0x13u8, 4, 0, 0, 5, 0, 0, 0x03, 0x00, 0x00, 0x10];
        for b in script {
            engine.on_byte(b);
        }

        assert_eq!(*sink.0.borrow(), [S_ACK, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_chip_select_released_after_operation() {
        let (mut engine, _sink) = dummy_engine(DummyFlashBus::new_default());
        let script = [0x13u8, 1, 0, 0, 2, 0, 0, 0x9F];
        for b in script {
            engine.on_byte(b);
        }
        assert!(!engine.bus_mut().port_mut().selected());
    }

    #[test]
    fn test_set_freq_clamp_reaches_the_port() {
        let (mut engine, sink) = dummy_engine(DummyFlashBus::new_default());

        // Request 50 MHz; the executor maximum is 8 MHz
        let script = [0x14u8, 0x80, 0xF0, 0xFA, 0x02];
        for b in script {
            engine.on_byte(b);
        }
        // The echo carries the requested bytes
        assert_eq!(*sink.0.borrow(), [S_ACK, 0x80, 0xF0, 0xFA, 0x02]);
        sink.0.borrow_mut().clear();

        let script = [0x13u8, 1, 0, 0, 0, 0, 0, 0x9F];
        for b in script {
            engine.on_byte(b);
        }
        assert_eq!(engine.bus_mut().port_mut().last_freq(), Some(8_000_000));
    }

    #[derive(Default)]
    struct FlagIrq(AtomicBool);

    impl TxIrqCtl for FlagIrq {
        fn enable(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn disable(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    /// Full pipeline: rx queue -> engine -> tx ring, with the drain on
    /// a second thread standing in for the transmit interrupt.
    #[test]
    fn test_full_pipeline_through_rx_and_tx() {
        init_logging();

        let mut rx: RxQueue<1024> = RxQueue::new();
        let (mut rx_prod, mut rx_cons) = rx.split();

        let mut ring: TxRing<64> = TxRing::new();
        let (tx_prod, tx_drain) = ring.split();
        let signal = CondvarSignal::new();
        let irq = FlagIrq::default();
        let done = AtomicBool::new(false);

        let script = [
            0x10u8, // SYNCNOP
            0x03, // Q_PGMNAME
            0x13, 3, 0, 0, 2, 0, 0, 0x9F, 0x00, 0x00, // SPIOP: 2 ID bytes
        ];
        let mut handed_over = false;
        rx_prod.fill_from(|buf| {
            if handed_over {
                return 0;
            }
            handed_over = true;
            buf[..script.len()].copy_from_slice(&script);
            script.len()
        });

        std::thread::scope(|s| {
            let received = s.spawn(|| {
                let mut drainer = TxDrainer::new(tx_drain, &signal, &irq);
                let mut out = Vec::new();
                loop {
                    if irq.0.load(Ordering::SeqCst) {
                        drainer.on_tx_ready(|chunk| {
                            out.extend_from_slice(chunk);
                            chunk.len()
                        });
                    } else if done.load(Ordering::SeqCst) {
                        break;
                    } else {
                        std::thread::yield_now();
                    }
                }
                out
            });

            let sender = TxSender::new(tx_prod, &signal, &irq);
            let bus = BusExecutor::new(
                DummyFlashBus::new_default(),
                BusConfig::new(1_000_000, 8_000_000),
            );
            let mut engine = Engine::new(sender, bus, StdClock::new());
            while let Some(b) = rx_cons.pop() {
                engine.on_byte(b);
            }
            done.store(true, Ordering::SeqCst);

            let mut expected = vec![S_NAK, S_ACK, S_ACK];
            expected.extend_from_slice(b"rserprog\0\0\0\0\0\0\0\0");
            expected.extend_from_slice(&[S_ACK, 0xEF, 0x40]);
            assert_eq!(received.join().unwrap(), expected);
        });
    }
}
