//! SPI driver core for the STM32F411 peripheral family
//!
//! Five independent channels (SPI1..SPI5), each with its own register file
//! and transfer state. A declarative [`SpiConfig`] is encoded into the
//! control registers by [`SpiBus::init`]; exchanges run either synchronously
//! through the blocking engine ([`SpiBus::transfer`]) or asynchronously
//! through the interrupt-driven engine ([`SpiBus::start`] /
//! [`SpiBus::handle_interrupt`]), which advances a per-channel state machine
//! one event at a time and signals completion exactly once.
//!
//! The register view is a trait ([`RegisterBank`]), so the driver runs
//! unchanged against the memory-mapped peripheral ([`MmioBank`]) or a
//! simulated bank on the host. Board wiring, clock tree and pin mux are the
//! consumer's responsibility and must be set up before `init`.
//!
//! Teardown paths (`cancel`, re-`init`, `deinit`) reclaim the per-channel
//! slot inside a `critical-section`; single-core targets get an
//! implementation through the `critical-section-single-core` feature.
//!
//! ```ignore
//! use stm32f411_spi::{Channel, MmioBank, SpiBus, SpiConfig, Transfer, DataWidth};
//!
//! static SPI: SpiBus<MmioBank> = SpiBus::new(unsafe { MmioBank::new() });
//!
//! fn setup() {
//!     SPI.init(Channel::Spi1, &SpiConfig::default()).unwrap();
//!
//!     static COMMAND: [u8; 4] = [0x9F, 0x00, 0x00, 0x00];
//!     static mut REPLY: [u8; 4] = [0; 4];
//!     let reply = unsafe { &mut *core::ptr::addr_of_mut!(REPLY) };
//!     let descriptor = Transfer::full_duplex(&COMMAND, reply, DataWidth::Eight);
//!     SPI.start(Channel::Spi1, descriptor, Some(on_complete)).unwrap();
//! }
//!
//! fn on_complete(channel: Channel, outcome: Result<(), stm32f411_spi::Error>) {
//!     // runs from interrupt context, exactly once per started transfer
//! }
//!
//! // bound to the SPI1 interrupt vector
//! fn spi1_isr() {
//!     SPI.handle_interrupt(Channel::Spi1);
//! }
//! ```
#![no_std]

pub mod config;
pub mod error;
pub mod regs;
pub mod spi;
pub mod transfer;

pub use config::{
    BaudRate, BitOrder, Channel, CrcMode, DataWidth, FrameFormat, InterruptEnable, LineMode,
    RegisterImage, Role, SlaveManagement, SpiConfig, SsPolarity, NUM_CHANNELS,
};
pub use error::{Error, Fault};
pub use regs::{MmioBank, RegisterBank};
pub use spi::{ChannelState, SpiBus, SpiChannel};
pub use transfer::{CompletionHandler, Direction, Transfer};
