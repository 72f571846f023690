//! Hosted loopback demo
//!
//! Wires the full device pipeline together on the host: a scripted
//! host session goes into the receive queue, the engine answers
//! through the transmit ring, and a second thread stands in for the
//! transmit interrupt, printing everything the "wire" carries back.
//!
//! Run with `RUST_LOG=debug` to watch the engine work.

use std::sync::atomic::{AtomicBool, Ordering};

use rserprog_core::bus::{BusConfig, BusExecutor};
use rserprog_core::engine::{Engine, StdClock};
use rserprog_core::tx::{CondvarSignal, TxDrainer, TxIrqCtl, TxRing, TxSender};
use rserprog_core::RxQueue;
use rserprog_dummy::DummyFlashBus;

struct FlagIrq(AtomicBool);

impl TxIrqCtl for FlagIrq {
    fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn main() {
    env_logger::init();

    // A host session: synchronize, identify the programmer, pick the
    // SPI bus, set 2 MHz, read the JEDEC ID, read 16 bytes at 0.
    let script: &[u8] = &[
        0x10, // SYNCNOP
        0x01, // Q_IFACE
        0x03, // Q_PGMNAME
        0x05, // Q_BUSTYPE
        0x12, 0x08, // S_BUSTYPE = SPI
        0x14, 0x80, 0x84, 0x1E, 0x00, // S_SPI_FREQ = 2 MHz
        0x13, 3, 0, 0, 3, 0, 0, 0x9F, 0x00, 0x00, // SPIOP: RDID
        0x13, 4, 0, 0, 16, 0, 0, 0x03, 0x00, 0x00, 0x00, // SPIOP: READ 16 @ 0
    ];

    let mut rx: RxQueue<1024> = RxQueue::new();
    let (mut rx_prod, mut rx_cons) = rx.split();
    for &b in script {
        rx_prod.push(b);
    }

    let mut ring: TxRing<1024> = TxRing::new();
    let (tx_prod, tx_drain) = ring.split();
    let signal = CondvarSignal::new();
    let irq = FlagIrq(AtomicBool::new(false));
    let done = AtomicBool::new(false);

    let mut flash = DummyFlashBus::new_default();
    flash.data_mut()[..16].copy_from_slice(b"rserprog says hi");

    std::thread::scope(|s| {
        let wire = s.spawn(|| {
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
        let bus = BusExecutor::new(flash, BusConfig::new(1_000_000, 8_000_000));
        let mut engine = Engine::new(sender, bus, StdClock::new());

        while let Some(b) = rx_cons.pop() {
            engine.on_byte(b);
        }
        done.store(true, Ordering::SeqCst);

        let responses = wire.join().expect("wire thread panicked");
        print!("device sent {} byte(s):", responses.len());
        for (i, b) in responses.iter().enumerate() {
            if i % 16 == 0 {
                println!();
            }
            print!("{:02X} ", b);
        }
        println!();
    });
}
