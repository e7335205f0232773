//! Raw register view of the SPI channels
//!
//! Offsets and bit positions follow the STM32F411 reference manual. The
//! [`RegisterBank`] trait is the seam between the logical driver and the
//! memory-mapped hardware; a hosted test environment substitutes its own
//! implementation for [`MmioBank`].

use crate::config::{Channel, NUM_CHANNELS};

/// Control register 1.
pub const CR1: u32 = 0x00;
/// Control register 2.
pub const CR2: u32 = 0x04;
/// Status register.
pub const SR: u32 = 0x08;
/// Data register.
pub const DR: u32 = 0x0C;
/// CRC polynomial register.
pub const CRCPR: u32 = 0x10;
/// Receive CRC register.
pub const RXCRCR: u32 = 0x14;
/// Transmit CRC register.
pub const TXCRCR: u32 = 0x18;

pub const CR1_CPHA: u16 = 1 << 0;
pub const CR1_CPOL: u16 = 1 << 1;
pub const CR1_MSTR: u16 = 1 << 2;
pub const CR1_BR_SHIFT: u16 = 3;
pub const CR1_BR_MASK: u16 = 0b111 << CR1_BR_SHIFT;
pub const CR1_SPE: u16 = 1 << 6;
pub const CR1_LSBFIRST: u16 = 1 << 7;
pub const CR1_SSI: u16 = 1 << 8;
pub const CR1_SSM: u16 = 1 << 9;
pub const CR1_RXONLY: u16 = 1 << 10;
pub const CR1_DFF: u16 = 1 << 11;
pub const CR1_CRCNEXT: u16 = 1 << 12;
pub const CR1_CRCEN: u16 = 1 << 13;
pub const CR1_BIDIOE: u16 = 1 << 14;
pub const CR1_BIDIMODE: u16 = 1 << 15;

pub const CR2_RXDMAEN: u16 = 1 << 0;
pub const CR2_TXDMAEN: u16 = 1 << 1;
pub const CR2_SSOE: u16 = 1 << 2;
pub const CR2_FRF: u16 = 1 << 4;
pub const CR2_ERRIE: u16 = 1 << 5;
pub const CR2_RXNEIE: u16 = 1 << 6;
pub const CR2_TXEIE: u16 = 1 << 7;
/// All interrupt-enable bits of CR2.
pub const CR2_IE_ALL: u16 = CR2_ERRIE | CR2_RXNEIE | CR2_TXEIE;

pub const SR_RXNE: u16 = 1 << 0;
pub const SR_TXE: u16 = 1 << 1;
pub const SR_UDR: u16 = 1 << 3;
pub const SR_CRCERR: u16 = 1 << 4;
pub const SR_MODF: u16 = 1 << 5;
pub const SR_OVR: u16 = 1 << 6;
pub const SR_BSY: u16 = 1 << 7;
pub const SR_FRE: u16 = 1 << 8;
/// Error flags handled by the transfer engines.
pub const SR_ERR_MASK: u16 = SR_CRCERR | SR_MODF | SR_OVR;

/// Access contract over a channel's register file.
///
/// No masking, no validation: callers are responsible for correct offsets.
pub trait RegisterBank {
    fn read(&self, channel: Channel, offset: u32) -> u16;
    fn write(&self, channel: Channel, offset: u32, value: u16);
}

impl<T: RegisterBank> RegisterBank for &T {
    fn read(&self, channel: Channel, offset: u32) -> u16 {
        (**self).read(channel, offset)
    }

    fn write(&self, channel: Channel, offset: u32, value: u16) {
        (**self).write(channel, offset, value)
    }
}

// F411 memory map, SPI1..SPI5
const BASE: [u32; NUM_CHANNELS] = [
    0x4001_3000,
    0x4000_3800,
    0x4000_3C00,
    0x4001_3400,
    0x4001_5000,
];

/// Memory-mapped register bank of the real peripheral.
pub struct MmioBank {
    _private: (),
}

impl MmioBank {
    /// Create the hardware register view.
    ///
    /// # Safety
    ///
    /// Only meaningful on an STM32F411: accesses go straight to the SPI
    /// peripheral addresses. The caller must ensure the peripheral clocks are
    /// gated on before any access.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterBank for MmioBank {
    fn read(&self, channel: Channel, offset: u32) -> u16 {
        unsafe { core::ptr::read_volatile((BASE[channel.index()] + offset) as *const u16) }
    }

    fn write(&self, channel: Channel, offset: u32, value: u16) {
        unsafe { core::ptr::write_volatile((BASE[channel.index()] + offset) as *mut u16, value) }
    }
}
