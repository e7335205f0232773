//! Host-side test support: a simulated SPI register bank and completion
//! recording.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use stm32f411_spi::regs::{self, RegisterBank};
use stm32f411_spi::{Channel, Error, NUM_CHANNELS};

const NUM_REGS: usize = 7;

struct SimChannel {
    regs: [u16; NUM_REGS],
    writes: Vec<u16>,
    rx: VecDeque<u16>,
    auto: bool,
    fail_after: Option<(usize, u16)>,
}

impl SimChannel {
    fn new(auto: bool) -> Self {
        Self {
            regs: [0; NUM_REGS],
            writes: Vec::new(),
            rx: VecDeque::new(),
            auto,
            fail_after: None,
        }
    }
}

/// Simulated register bank for all five channels.
///
/// Two personalities:
/// - `SimBank::new()`: the status register holds whatever the test scripted
///   (`set_status`), so interrupt sequences are stepped one event at a time;
/// - `SimBank::loopback()`: status is synthesized (TXE always ready, RXNE
///   while queued data exists) and every data-register write is echoed into
///   the receive queue, so the blocking engine free-runs.
///
/// Data-register writes are logged per channel; `fail_after` raises chosen
/// status bits once a given number of data units has been written.
pub struct SimBank {
    chans: RefCell<[SimChannel; NUM_CHANNELS]>,
}

impl SimBank {
    pub fn new() -> Self {
        Self {
            chans: RefCell::new(std::array::from_fn(|_| SimChannel::new(false))),
        }
    }

    pub fn loopback() -> Self {
        Self {
            chans: RefCell::new(std::array::from_fn(|_| SimChannel::new(true))),
        }
    }

    /// Script the status register (manual personality).
    pub fn set_status(&self, channel: Channel, bits: u16) {
        self.chans.borrow_mut()[channel.index()].regs[(regs::SR / 4) as usize] = bits;
    }

    /// Queue one inbound data unit.
    pub fn push_rx(&self, channel: Channel, unit: u16) {
        self.chans.borrow_mut()[channel.index()].rx.push_back(unit);
    }

    /// Everything written to the data register, in order.
    pub fn dr_writes(&self, channel: Channel) -> Vec<u16> {
        self.chans.borrow()[channel.index()].writes.clone()
    }

    /// Direct peek at a stored register cell.
    pub fn reg(&self, channel: Channel, offset: u32) -> u16 {
        self.chans.borrow()[channel.index()].regs[(offset / 4) as usize]
    }

    /// Raise `bits` on every status read once `writes` data units went out.
    pub fn fail_after(&self, channel: Channel, writes: usize, bits: u16) {
        self.chans.borrow_mut()[channel.index()].fail_after = Some((writes, bits));
    }
}

impl RegisterBank for SimBank {
    fn read(&self, channel: Channel, offset: u32) -> u16 {
        match offset {
            regs::SR => {
                let chans = self.chans.borrow();
                let chan = &chans[channel.index()];
                let mut sr = chan.regs[(regs::SR / 4) as usize];
                if chan.auto {
                    sr |= regs::SR_TXE;
                    if !chan.rx.is_empty() {
                        sr |= regs::SR_RXNE;
                    }
                }
                if let Some((after, bits)) = chan.fail_after {
                    if chan.writes.len() >= after {
                        sr |= bits;
                    }
                }
                sr
            }
            regs::DR => {
                let mut chans = self.chans.borrow_mut();
                let chan = &mut chans[channel.index()];
                let unit = chan.rx.pop_front().unwrap_or(0);
                if chan.rx.is_empty() {
                    chan.regs[(regs::SR / 4) as usize] &= !regs::SR_RXNE;
                }
                unit
            }
            _ => self.chans.borrow()[channel.index()].regs[(offset / 4) as usize],
        }
    }

    fn write(&self, channel: Channel, offset: u32, value: u16) {
        let mut chans = self.chans.borrow_mut();
        let chan = &mut chans[channel.index()];
        match offset {
            regs::DR => {
                chan.writes.push(value);
                if chan.auto {
                    chan.rx.push_back(value);
                }
            }
            _ => chan.regs[(offset / 4) as usize] = value,
        }
    }
}

/// Records completion notifications delivered to a plain-`fn` handler.
pub struct Notification {
    calls: AtomicUsize,
    last: Mutex<Option<Result<(), Error>>>,
}

impl Notification {
    pub const fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn record(&self, outcome: Result<(), Error>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(outcome);
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Result<(), Error>> {
        *self.last.lock().unwrap()
    }
}

/// Leak a source buffer so the interrupt engine may borrow it for `'static`.
pub fn leak(data: &[u8]) -> &'static [u8] {
    Box::leak(data.to_vec().into_boxed_slice())
}

/// Leak a zeroed destination buffer; the raw pointer lets the test observe
/// the contents after the descriptor (and its exclusive borrow) is gone.
pub fn leak_mut(len: usize) -> (&'static mut [u8], *const u8) {
    let buf = Box::leak(vec![0u8; len].into_boxed_slice());
    let ptr = buf.as_ptr();
    (buf, ptr)
}

/// Read a leaked destination buffer back.
///
/// # Safety
///
/// `ptr`/`len` must come from [`leak_mut`] and the transfer borrowing the
/// buffer must have completed.
pub unsafe fn read_back(ptr: *const u8, len: usize) -> Vec<u8> {
    std::slice::from_raw_parts(ptr, len).to_vec()
}
