//! Transfer descriptors
//!
//! A descriptor borrows the caller's buffers and describes one logical
//! exchange. It is owned exclusively by the engine that runs it: the blocking
//! engine mutates it in place, the interrupt engine consumes it by value and
//! holds it until the completion notification fires.

use core::marker::PhantomData;

use crate::config::{Channel, DataWidth};
use crate::error::Error;

/// Direction of one exchange.
///
/// On a bidirectional (single-line) channel this doubles as the runtime
/// direction flag; it is fixed for the lifetime of one descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    FullDuplex,
    Transmit,
    Receive,
}

impl Direction {
    pub(crate) fn has_tx(self) -> bool {
        !matches!(self, Direction::Receive)
    }

    pub(crate) fn has_rx(self) -> bool {
        !matches!(self, Direction::Transmit)
    }
}

/// Completion notification of the interrupt-driven engine.
///
/// Fires exactly once per started transfer: on completion, hardware fault,
/// or teardown (`Err(Error::Cancelled)`). Invoked from whichever context
/// finished the transfer, usually the interrupt handler.
pub type CompletionHandler = fn(Channel, Result<(), Error>);

/// One logical exchange over a channel.
///
/// Buffers are borrowed, never copied; cursors advance by the unit size
/// (one byte in 8-bit width, two little-endian bytes in 16-bit width).
pub struct Transfer<'b> {
    tx: *const u8,
    rx: *mut u8,
    tx_total: usize,
    rx_total: usize,
    tx_pos: usize,
    rx_pos: usize,
    direction: Direction,
    width: DataWidth,
    _buffers: PhantomData<&'b mut [u8]>,
}

// The descriptor is an exclusive borrow of its buffers; moving it between
// contexts moves that exclusivity with it.
unsafe impl Send for Transfer<'_> {}

impl<'b> Transfer<'b> {
    /// Simultaneous transmit and receive. Buffer lengths must match; the
    /// engines reject a mismatch with `InvalidLength`.
    pub fn full_duplex(tx: &'b [u8], rx: &'b mut [u8], width: DataWidth) -> Self {
        Self {
            tx: tx.as_ptr(),
            rx: rx.as_mut_ptr(),
            tx_total: tx.len(),
            rx_total: rx.len(),
            tx_pos: 0,
            rx_pos: 0,
            direction: Direction::FullDuplex,
            width,
            _buffers: PhantomData,
        }
    }

    /// Transmit only; inbound data is left to the peripheral.
    pub fn transmit(tx: &'b [u8], width: DataWidth) -> Self {
        Self {
            tx: tx.as_ptr(),
            rx: core::ptr::null_mut(),
            tx_total: tx.len(),
            rx_total: 0,
            tx_pos: 0,
            rx_pos: 0,
            direction: Direction::Transmit,
            width,
            _buffers: PhantomData,
        }
    }

    /// Receive only; nothing is fed to the data register.
    pub fn receive(rx: &'b mut [u8], width: DataWidth) -> Self {
        Self {
            tx: core::ptr::null(),
            rx: rx.as_mut_ptr(),
            tx_total: 0,
            rx_total: rx.len(),
            tx_pos: 0,
            rx_pos: 0,
            direction: Direction::Receive,
            width,
            _buffers: PhantomData,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn width(&self) -> DataWidth {
        self.width
    }

    /// Bytes left to feed to the data register.
    pub fn tx_remaining(&self) -> usize {
        self.tx_total - self.tx_pos
    }

    /// Bytes left to drain from the data register.
    pub fn rx_remaining(&self) -> usize {
        self.rx_total - self.rx_pos
    }

    /// Every leg the direction requires has run dry.
    pub fn is_complete(&self) -> bool {
        self.tx_pos == self.tx_total && self.rx_pos == self.rx_total
    }

    /// Rewind the cursors so the descriptor can be run again.
    ///
    /// Reuse after completion is deliberate-only: the blocking engine leaves
    /// the cursors at their final position and never rewinds implicitly.
    pub fn reset(&mut self) {
        self.tx_pos = 0;
        self.rx_pos = 0;
    }

    /// Length/width compatibility, checked by the engines before any
    /// register is armed.
    pub(crate) fn check_length(&self) -> Result<(), Error> {
        if self.width == DataWidth::Sixteen
            && (self.tx_total % 2 != 0 || self.rx_total % 2 != 0)
        {
            return Err(Error::InvalidLength);
        }
        if self.direction == Direction::FullDuplex && self.tx_total != self.rx_total {
            return Err(Error::InvalidLength);
        }
        Ok(())
    }

    /// Next outbound unit; advances the source cursor.
    pub(crate) fn take_tx_unit(&mut self) -> u16 {
        debug_assert!(self.direction.has_tx() && self.tx_remaining() > 0);
        // Safety: cursor stays within the borrowed source buffer, checked by
        // the remaining counter.
        unsafe {
            match self.width {
                DataWidth::Eight => {
                    let unit = *self.tx.add(self.tx_pos) as u16;
                    self.tx_pos += 1;
                    unit
                }
                DataWidth::Sixteen => {
                    let lo = *self.tx.add(self.tx_pos);
                    let hi = *self.tx.add(self.tx_pos + 1);
                    self.tx_pos += 2;
                    u16::from_le_bytes([lo, hi])
                }
            }
        }
    }

    /// Store one inbound unit; advances the destination cursor.
    pub(crate) fn put_rx_unit(&mut self, unit: u16) {
        debug_assert!(self.direction.has_rx() && self.rx_remaining() > 0);
        // Safety: cursor stays within the borrowed destination buffer,
        // checked by the remaining counter.
        unsafe {
            match self.width {
                DataWidth::Eight => {
                    *self.rx.add(self.rx_pos) = unit as u8;
                    self.rx_pos += 1;
                }
                DataWidth::Sixteen => {
                    let [lo, hi] = unit.to_le_bytes();
                    *self.rx.add(self.rx_pos) = lo;
                    *self.rx.add(self.rx_pos + 1) = hi;
                    self.rx_pos += 2;
                }
            }
        }
    }
}
