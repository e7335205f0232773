//! SPI transfer engines
//!
//! [`SpiBus`] owns one runtime-state slot per channel and drives three
//! surfaces over the register view: `init`/`deinit`, the blocking polling
//! engine, and the interrupt-driven engine (`start` / `handle_interrupt` /
//! `cancel`). A per-channel [`SpiChannel`] handle additionally exposes the
//! `embedded-hal` 0.2 SPI traits for device drivers stacked on top.

use core::cell::UnsafeCell;
use core::sync::atomic::{compiler_fence, AtomicU8, Ordering};

use embedded_hal::spi::FullDuplex;

use crate::config::{Channel, LineMode, SpiConfig, NUM_CHANNELS};
use crate::error::{Error, Fault};
use crate::regs::{self, RegisterBank};
use crate::transfer::{CompletionHandler, Direction, Transfer};

/// Observable runtime state of a channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    /// No transfer owned by either engine.
    Idle,
    /// An interrupt-driven transfer is stored and its sources are armed, but
    /// no event has been consumed yet.
    Armed,
    /// A transfer is in flight.
    Active,
}

const STATE_IDLE: u8 = 0;
const STATE_ARMED: u8 = 1;
const STATE_ACTIVE: u8 = 2;

/// Per-channel slot: atomic state tag plus cells owned by whichever engine
/// holds the tag.
struct ChannelSlot {
    state: AtomicU8,
    transfer: UnsafeCell<Option<Transfer<'static>>>,
    handler: UnsafeCell<Option<CompletionHandler>>,
    config: UnsafeCell<Option<SpiConfig>>,
}

/// Driver for the five SPI channels behind a register bank.
///
/// Designed to live in a `static` so the interrupt vectors can reach
/// [`SpiBus::handle_interrupt`].
pub struct SpiBus<B: RegisterBank> {
    bank: B,
    channels: [ChannelSlot; NUM_CHANNELS],
}

// Safety: the slot cells are guarded by the atomic state tag. `start` is the
// only writer while a slot is claimed from thread context, `handle_interrupt`
// the only writer while it is Armed/Active, and reclaiming from thread
// context happens inside a critical section. The `Busy` precondition rules
// out a second concurrent starter; cross-channel state is disjoint.
unsafe impl<B: RegisterBank + Sync> Sync for SpiBus<B> {}

impl<B: RegisterBank> SpiBus<B> {
    pub const fn new(bank: B) -> Self {
        const SLOT: ChannelSlot = ChannelSlot {
            state: AtomicU8::new(STATE_IDLE),
            transfer: UnsafeCell::new(None),
            handler: UnsafeCell::new(None),
            config: UnsafeCell::new(None),
        };
        Self {
            bank,
            channels: [SLOT; NUM_CHANNELS],
        }
    }

    /// Apply a configuration to a channel.
    ///
    /// Quiesces the channel first: interrupt sources are disarmed and a
    /// transfer left in flight is aborted and reported `Cancelled` through
    /// its completion notification, never silently overwritten. Idempotent:
    /// re-applying the same configuration leaves an identical register image.
    pub fn init(&self, channel: Channel, config: &SpiConfig) -> Result<(), Error> {
        // validation happens before any register write
        let image = config.encode()?;
        let aborted = self.reclaim(channel);

        let slot = &self.channels[channel.index()];
        critical_section::with(|_| {
            // configure with the peripheral disabled, raise SPE last
            self.bank.write(channel, regs::CR1, image.cr1 & !regs::CR1_SPE);
            self.bank.write(channel, regs::CR2, image.cr2);
            self.bank.write(channel, regs::CRCPR, image.crcpr);
            if image.cr1 & regs::CR1_SPE != 0 {
                self.bank.write(channel, regs::CR1, image.cr1);
            }
            unsafe { *slot.config.get() = Some(*config) };
        });

        if let Some(handler) = aborted {
            handler(channel, Err(Error::Cancelled));
        }
        Ok(())
    }

    /// Disable a channel and erase its applied configuration.
    pub fn deinit(&self, channel: Channel) {
        let aborted = self.reclaim(channel);
        let slot = &self.channels[channel.index()];
        critical_section::with(|_| {
            let cr2 = self.bank.read(channel, regs::CR2);
            self.bank.write(channel, regs::CR2, cr2 & !regs::CR2_IE_ALL);
            let cr1 = self.bank.read(channel, regs::CR1);
            self.bank.write(channel, regs::CR1, cr1 & !regs::CR1_SPE);
            unsafe { *slot.config.get() = None };
        });
        if let Some(handler) = aborted {
            handler(channel, Err(Error::Cancelled));
        }
    }

    /// Abort an interrupt-driven transfer: disarm the channel's interrupt
    /// sources, discard the descriptor, force the state back to `Idle`.
    ///
    /// The completion notification fires with `Err(Error::Cancelled)`. A
    /// no-op on an idle channel.
    pub fn cancel(&self, channel: Channel) {
        if let Some(handler) = self.reclaim(channel) {
            handler(channel, Err(Error::Cancelled));
        }
    }

    /// Runtime state of a channel.
    pub fn channel_state(&self, channel: Channel) -> ChannelState {
        match self.channels[channel.index()].state.load(Ordering::Acquire) {
            STATE_ARMED => ChannelState::Armed,
            STATE_ACTIVE => ChannelState::Active,
            _ => ChannelState::Idle,
        }
    }

    /// Raw register access. No masking, no validation; offsets are the
    /// caller's responsibility.
    pub fn register_read(&self, channel: Channel, offset: u32) -> u16 {
        self.bank.read(channel, offset)
    }

    /// Raw register access, see [`SpiBus::register_read`].
    pub fn register_write(&self, channel: Channel, offset: u32, value: u16) {
        self.bank.write(channel, offset, value)
    }

    /// Handle to one channel, carrying the `embedded-hal` trait surface.
    pub fn channel(&self, channel: Channel) -> SpiChannel<'_, B> {
        SpiChannel { bus: self, channel }
    }

    /// Synchronously drive a transfer to completion by polling status flags.
    ///
    /// `timeout` is a poll budget: every status-register poll consumes one
    /// unit and exhaustion returns `TimedOut`, with the descriptor's cursors
    /// reflecting exactly the units completed. Hardware faults surface as
    /// `Error::Fault`. Blocks the calling thread for the duration.
    pub fn transfer(
        &self,
        channel: Channel,
        transfer: &mut Transfer<'_>,
        timeout: u32,
    ) -> Result<(), Error> {
        let config = self.setup(channel)?;
        Self::check_descriptor(&config, transfer)?;

        let slot = &self.channels[channel.index()];
        if slot
            .state
            .compare_exchange(STATE_IDLE, STATE_ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }

        let result = if transfer.is_complete() {
            // zero-length: nothing to exchange, no register traffic
            Ok(())
        } else {
            let result = self.run_blocking(channel, &config, transfer, timeout);
            let cr1 = self.bank.read(channel, regs::CR1);
            self.bank
                .write(channel, regs::CR1, cr1 & !(regs::CR1_SPE | regs::CR1_CRCNEXT));
            result
        };

        slot.state.store(STATE_IDLE, Ordering::Release);
        result
    }

    /// Start an interrupt-driven transfer and return immediately.
    ///
    /// The descriptor is stored as the channel's active transfer and the
    /// configured interrupt sources for its direction are armed; progress
    /// happens in [`SpiBus::handle_interrupt`] and completion is observed
    /// through `handler`, which fires exactly once. Buffers must be
    /// `'static`: the engine holds them across interrupt invocations.
    pub fn start(
        &self,
        channel: Channel,
        transfer: Transfer<'static>,
        handler: Option<CompletionHandler>,
    ) -> Result<(), Error> {
        let config = self.setup(channel)?;
        Self::check_descriptor(&config, &transfer)?;
        let direction = transfer.direction();
        // a source the direction needs but the configuration never arms
        // would stall the transfer forever; reject it up front
        if direction.has_tx() && !config.interrupts.txe {
            return Err(Error::InvalidConfig);
        }
        if direction.has_rx() && !config.interrupts.rxne {
            return Err(Error::InvalidConfig);
        }

        let slot = &self.channels[channel.index()];
        if slot
            .state
            .compare_exchange(STATE_IDLE, STATE_ARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }

        if transfer.is_complete() {
            // zero-length: complete on the spot, the slot never arms
            slot.state.store(STATE_IDLE, Ordering::Release);
            if let Some(handler) = handler {
                handler(channel, Ok(()));
            }
            return Ok(());
        }

        // the slot is ours: publish the descriptor before arming any source
        unsafe {
            *slot.transfer.get() = Some(transfer);
            *slot.handler.get() = handler;
        }
        compiler_fence(Ordering::Release);

        let mut cr1 = self.bank.read(channel, regs::CR1);
        if config.line_mode == LineMode::Bidirectional {
            match direction {
                Direction::Transmit => cr1 |= regs::CR1_BIDIOE,
                _ => cr1 &= !regs::CR1_BIDIOE,
            }
        }
        self.bank.write(channel, regs::CR1, cr1 | regs::CR1_SPE);

        let mut enable = 0u16;
        if config.interrupts.error {
            enable |= regs::CR2_ERRIE;
        }
        if direction.has_tx() {
            enable |= regs::CR2_TXEIE;
        }
        if direction.has_rx() {
            enable |= regs::CR2_RXNEIE;
        }
        let cr2 = self.bank.read(channel, regs::CR2);
        self.bank.write(channel, regs::CR2, cr2 | enable);
        Ok(())
    }

    /// Advance the channel's active transfer by one event.
    ///
    /// Invoked from the channel's interrupt vector. Reads the status flags
    /// once and takes exactly one branch: fault, transmit, or receive, in
    /// that priority order, then checks for completion. Faults and
    /// completion disarm the channel, release the slot and fire the
    /// notification; partial transfers stay `Active` awaiting the next
    /// event.
    pub fn handle_interrupt(&self, channel: Channel) {
        let slot = &self.channels[channel.index()];
        let state = slot.state.load(Ordering::Acquire);
        if state != STATE_ARMED && state != STATE_ACTIVE {
            // late or spurious event: nothing owns the channel, disarm it
            let cr2 = self.bank.read(channel, regs::CR2);
            self.bank.write(channel, regs::CR2, cr2 & !regs::CR2_IE_ALL);
            return;
        }

        let sr = self.bank.read(channel, regs::SR);

        // fault path wins over data flags raised in the same event
        if sr & regs::SR_ERR_MASK != 0 {
            let fault = if sr & regs::SR_OVR != 0 {
                Fault::Overrun
            } else if sr & regs::SR_MODF != 0 {
                Fault::ModeFault
            } else {
                Fault::CrcMismatch
            };
            self.finish(channel, Err(Error::Fault(fault)));
            return;
        }

        if state == STATE_ARMED {
            slot.state.store(STATE_ACTIVE, Ordering::Release);
        }

        // single writer: only this handler touches the descriptor while the
        // channel is Armed/Active
        let transfer = match unsafe { &mut *slot.transfer.get() } {
            Some(transfer) => transfer,
            None => {
                let cr2 = self.bank.read(channel, regs::CR2);
                self.bank.write(channel, regs::CR2, cr2 & !regs::CR2_IE_ALL);
                slot.state.store(STATE_IDLE, Ordering::Release);
                return;
            }
        };

        let crc = unsafe { *slot.config.get() }.is_some_and(|c| c.crc.is_enabled());

        if sr & regs::SR_TXE != 0
            && transfer.direction().has_tx()
            && transfer.tx_remaining() > 0
        {
            let unit = transfer.take_tx_unit();
            self.bank.write(channel, regs::DR, unit);
            if crc && transfer.tx_remaining() == 0 {
                // hardware appends the CRC unit after the final data unit
                let cr1 = self.bank.read(channel, regs::CR1);
                self.bank.write(channel, regs::CR1, cr1 | regs::CR1_CRCNEXT);
            }
        } else if sr & regs::SR_RXNE != 0
            && transfer.direction().has_rx()
            && transfer.rx_remaining() > 0
        {
            let unit = self.bank.read(channel, regs::DR);
            transfer.put_rx_unit(unit);
        }

        if transfer.is_complete() {
            self.finish(channel, Ok(()));
        }
    }

    /// Single exit path of the interrupt engine: disarm, release the slot,
    /// notify exactly once.
    fn finish(&self, channel: Channel, outcome: Result<(), Error>) {
        let slot = &self.channels[channel.index()];
        let cr2 = self.bank.read(channel, regs::CR2);
        self.bank.write(channel, regs::CR2, cr2 & !regs::CR2_IE_ALL);
        let cr1 = self.bank.read(channel, regs::CR1);
        self.bank
            .write(channel, regs::CR1, cr1 & !(regs::CR1_SPE | regs::CR1_CRCNEXT));

        let finished = unsafe { &mut *slot.transfer.get() }.take();
        let handler = unsafe { &mut *slot.handler.get() }.take();
        slot.state.store(STATE_IDLE, Ordering::Release);

        // taking the descriptor above makes a second notification impossible
        if finished.is_some() {
            if let Some(handler) = handler {
                handler(channel, outcome);
            }
        }
    }

    /// Tear down whatever the interrupt engine holds for `channel`,
    /// returning the completion handler to notify (outside the critical
    /// section).
    fn reclaim(&self, channel: Channel) -> Option<CompletionHandler> {
        let slot = &self.channels[channel.index()];
        critical_section::with(|_| {
            let was = slot.state.swap(STATE_IDLE, Ordering::AcqRel);
            if was == STATE_IDLE {
                return None;
            }
            let cr2 = self.bank.read(channel, regs::CR2);
            self.bank.write(channel, regs::CR2, cr2 & !regs::CR2_IE_ALL);
            let cr1 = self.bank.read(channel, regs::CR1);
            self.bank
                .write(channel, regs::CR1, cr1 & !(regs::CR1_SPE | regs::CR1_CRCNEXT));

            let transfer = unsafe { &mut *slot.transfer.get() }.take();
            let handler = unsafe { &mut *slot.handler.get() }.take();
            if transfer.is_some() {
                handler
            } else {
                None
            }
        })
    }

    fn setup(&self, channel: Channel) -> Result<SpiConfig, Error> {
        let slot = &self.channels[channel.index()];
        unsafe { *slot.config.get() }.ok_or(Error::InvalidConfig)
    }

    /// Descriptor-vs-configuration validation shared by both engines.
    fn check_descriptor(config: &SpiConfig, transfer: &Transfer<'_>) -> Result<(), Error> {
        if transfer.width() != config.data_width {
            return Err(Error::InvalidConfig);
        }
        transfer.check_length()?;
        let direction = transfer.direction();
        match (config.line_mode, direction) {
            (LineMode::FullDuplex, _) => {}
            (LineMode::ReceiveOnly, Direction::Receive) => {}
            (LineMode::ReceiveOnly, _) => return Err(Error::InvalidConfig),
            // a single-line transfer is either a send or a receive
            (LineMode::Bidirectional, Direction::FullDuplex) => {
                return Err(Error::InvalidConfig)
            }
            (LineMode::Bidirectional, _) => {}
        }
        // a direction handed to an engine must not also be claimed by DMA
        if direction.has_tx() && config.tx_dma {
            return Err(Error::InvalidConfig);
        }
        if direction.has_rx() && config.rx_dma {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    fn run_blocking(
        &self,
        channel: Channel,
        config: &SpiConfig,
        transfer: &mut Transfer<'_>,
        mut budget: u32,
    ) -> Result<(), Error> {
        let mut cr1 = self.bank.read(channel, regs::CR1);
        if config.line_mode == LineMode::Bidirectional {
            match transfer.direction() {
                Direction::Transmit => cr1 |= regs::CR1_BIDIOE,
                _ => cr1 &= !regs::CR1_BIDIOE,
            }
        }
        self.bank.write(channel, regs::CR1, cr1 | regs::CR1_SPE);

        let crc = config.crc.is_enabled();
        match transfer.direction() {
            Direction::FullDuplex => {
                while transfer.rx_remaining() > 0 {
                    self.wait_set(channel, regs::SR_TXE, &mut budget)?;
                    let unit = transfer.take_tx_unit();
                    self.bank.write(channel, regs::DR, unit);
                    if crc && transfer.tx_remaining() == 0 {
                        let cr1 = self.bank.read(channel, regs::CR1);
                        self.bank.write(channel, regs::CR1, cr1 | regs::CR1_CRCNEXT);
                    }
                    self.wait_set(channel, regs::SR_RXNE, &mut budget)?;
                    let unit = self.bank.read(channel, regs::DR);
                    transfer.put_rx_unit(unit);
                }
                self.wait_clear(channel, regs::SR_BSY, &mut budget)?;
            }
            Direction::Transmit => {
                while transfer.tx_remaining() > 0 {
                    self.wait_set(channel, regs::SR_TXE, &mut budget)?;
                    let unit = transfer.take_tx_unit();
                    self.bank.write(channel, regs::DR, unit);
                    if crc && transfer.tx_remaining() == 0 {
                        let cr1 = self.bank.read(channel, regs::CR1);
                        self.bank.write(channel, regs::CR1, cr1 | regs::CR1_CRCNEXT);
                    }
                }
                // last unit must leave the shift register before release
                self.wait_set(channel, regs::SR_TXE, &mut budget)?;
                self.wait_clear(channel, regs::SR_BSY, &mut budget)?;
            }
            Direction::Receive => {
                while transfer.rx_remaining() > 0 {
                    self.wait_set(channel, regs::SR_RXNE, &mut budget)?;
                    let unit = self.bank.read(channel, regs::DR);
                    transfer.put_rx_unit(unit);
                }
            }
        }
        Ok(())
    }

    fn wait_set(&self, channel: Channel, mask: u16, budget: &mut u32) -> Result<(), Error> {
        loop {
            if *budget == 0 {
                return Err(Error::TimedOut);
            }
            *budget -= 1;
            let sr = self.poll_status(channel)?;
            if sr & mask != 0 {
                return Ok(());
            }
        }
    }

    fn wait_clear(&self, channel: Channel, mask: u16, budget: &mut u32) -> Result<(), Error> {
        loop {
            if *budget == 0 {
                return Err(Error::TimedOut);
            }
            *budget -= 1;
            let sr = self.poll_status(channel)?;
            if sr & mask == 0 {
                return Ok(());
            }
        }
    }

    fn poll_status(&self, channel: Channel) -> Result<u16, Error> {
        let sr = self.bank.read(channel, regs::SR);
        if sr & regs::SR_OVR != 0 {
            return Err(Error::Fault(Fault::Overrun));
        }
        if sr & regs::SR_MODF != 0 {
            return Err(Error::Fault(Fault::ModeFault));
        }
        if sr & regs::SR_CRCERR != 0 {
            return Err(Error::Fault(Fault::CrcMismatch));
        }
        Ok(sr)
    }
}

/// Handle to one channel of a [`SpiBus`].
///
/// Carries the `embedded-hal` 0.2 surface: nb-style [`FullDuplex`] plus the
/// blocking `transfer`/`write` default adapters. Exchanges single units
/// directly against the data register, outside the descriptor engines; meant
/// for device drivers layered on a configured 8-bit master channel.
pub struct SpiChannel<'a, B: RegisterBank> {
    bus: &'a SpiBus<B>,
    channel: Channel,
}

impl<B: RegisterBank> FullDuplex<u8> for SpiChannel<'_, B> {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let sr = self.bus.bank.read(self.channel, regs::SR);
        Err(if sr & regs::SR_OVR != 0 {
            nb::Error::Other(Error::Fault(Fault::Overrun))
        } else if sr & regs::SR_MODF != 0 {
            nb::Error::Other(Error::Fault(Fault::ModeFault))
        } else if sr & regs::SR_CRCERR != 0 {
            nb::Error::Other(Error::Fault(Fault::CrcMismatch))
        } else if sr & regs::SR_RXNE != 0 {
            return Ok(self.bus.bank.read(self.channel, regs::DR) as u8);
        } else {
            nb::Error::WouldBlock
        })
    }

    fn send(&mut self, byte: u8) -> nb::Result<(), Error> {
        let sr = self.bus.bank.read(self.channel, regs::SR);
        Err(if sr & regs::SR_OVR != 0 {
            nb::Error::Other(Error::Fault(Fault::Overrun))
        } else if sr & regs::SR_MODF != 0 {
            nb::Error::Other(Error::Fault(Fault::ModeFault))
        } else if sr & regs::SR_CRCERR != 0 {
            nb::Error::Other(Error::Fault(Fault::CrcMismatch))
        } else if sr & regs::SR_TXE != 0 {
            self.bus.bank.write(self.channel, regs::DR, byte as u16);
            return Ok(());
        } else {
            nb::Error::WouldBlock
        })
    }
}

impl<B: RegisterBank> embedded_hal::blocking::spi::transfer::Default<u8> for SpiChannel<'_, B> {}

impl<B: RegisterBank> embedded_hal::blocking::spi::write::Default<u8> for SpiChannel<'_, B> {}
