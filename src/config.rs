//! SPI channel configuration and control-register encoding

use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0};

use crate::error::Error;
use crate::regs;

/// Number of physical SPI instances.
pub const NUM_CHANNELS: usize = 5;

/// SPI peripheral instances of the F411.
///
/// Each channel owns an independent register file and independent transfer
/// state; nothing is shared between channels.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Spi1,
    Spi2,
    Spi3,
    Spi4,
    Spi5,
}

impl Channel {
    pub const ALL: [Channel; NUM_CHANNELS] = [
        Channel::Spi1,
        Channel::Spi2,
        Channel::Spi3,
        Channel::Spi4,
        Channel::Spi5,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Peripheral clock divisor, CR1.BR.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BaudRate {
    Div2 = 0,
    Div4 = 1,
    Div8 = 2,
    Div16 = 3,
    Div32 = 4,
    Div64 = 5,
    Div128 = 6,
    Div256 = 7,
}

impl BaudRate {
    pub fn divisor(self) -> u32 {
        2u32 << (self as u32)
    }

    /// Smallest divisor whose resulting clock does not exceed `target`.
    ///
    /// Saturates at `Div256`; a target above `pclk / 2` yields `Div2`.
    pub fn from_clocks(pclk: u32, target: u32) -> BaudRate {
        match pclk / target {
            0..=2 => BaudRate::Div2,
            3..=4 => BaudRate::Div4,
            5..=8 => BaudRate::Div8,
            9..=16 => BaudRate::Div16,
            17..=32 => BaudRate::Div32,
            33..=64 => BaudRate::Div64,
            65..=128 => BaudRate::Div128,
            _ => BaudRate::Div256,
        }
    }
}

/// Who generates the clock.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Slave,
    Master,
}

/// Wire bit order, applied to the whole transfer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// Frame width, CR1.DFF. Determines data-register access granularity.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataWidth {
    Eight,
    Sixteen,
}

impl DataWidth {
    /// Buffer bytes consumed per data unit.
    pub fn bytes(self) -> usize {
        match self {
            DataWidth::Eight => 1,
            DataWidth::Sixteen => 2,
        }
    }
}

/// Frame format, CR2.FRF.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFormat {
    Motorola,
    Ti,
}

/// Data-line topology of the channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineMode {
    /// Two unidirectional lines, simultaneous transmit and receive.
    FullDuplex,
    /// Clock out, receive only (CR1.RXONLY).
    ReceiveOnly,
    /// One shared data line (CR1.BIDIMODE); each transfer selects its
    /// direction through the descriptor, fixed for that transfer's lifetime.
    Bidirectional,
}

/// Who toggles chip-select.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveManagement {
    Hardware,
    Software,
}

/// Active level of the slave-select line, consumed by board-level CS wiring.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SsPolarity {
    ActiveLow,
    ActiveHigh,
}

/// Hardware CRC handling.
///
/// The polynomial width must match the data width; the encoder rejects a
/// mismatch. CRC units are appended and checked by hardware and are never
/// counted against a descriptor's length.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcMode {
    Disabled,
    Crc8(u8),
    Crc16(u16),
}

impl CrcMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, CrcMode::Disabled)
    }
}

/// Interrupt sources the interrupt-driven engine may arm.
///
/// `init` always leaves every source disarmed; `start` arms the subset a
/// transfer's direction needs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptEnable {
    pub error: bool,
    pub rxne: bool,
    pub txe: bool,
}

impl InterruptEnable {
    pub const fn all() -> Self {
        Self {
            error: true,
            rxne: true,
            txe: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            error: false,
            rxne: false,
            txe: false,
        }
    }
}

impl Default for InterruptEnable {
    fn default() -> Self {
        Self::all()
    }
}

/// Register image produced by the encoder, applied by `init`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegisterImage {
    pub cr1: u16,
    pub cr2: u16,
    pub crcpr: u16,
}

/// Declarative per-channel configuration.
///
/// Immutable once applied; `encode` turns it into the CR1/CR2/CRCPR image.
#[derive(Clone, Copy)]
pub struct SpiConfig {
    /// Enable the peripheral at `init` time (CR1.SPE).
    pub enable: bool,
    pub role: Role,
    /// Clock polarity and phase (SPI modes 0-3).
    pub mode: Mode,
    pub baud_rate: BaudRate,
    pub bit_order: BitOrder,
    pub data_width: DataWidth,
    pub frame_format: FrameFormat,
    pub line_mode: LineMode,
    pub crc: CrcMode,
    pub slave_management: SlaveManagement,
    /// Drive NSS as an output (CR2.SSOE). Master mode only.
    pub ss_output: bool,
    pub ss_polarity: SsPolarity,
    pub interrupts: InterruptEnable,
    pub rx_dma: bool,
    pub tx_dma: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            enable: true,
            role: Role::Master,
            mode: MODE_0,
            baud_rate: BaudRate::Div8,
            bit_order: BitOrder::MsbFirst,
            data_width: DataWidth::Eight,
            frame_format: FrameFormat::Motorola,
            line_mode: LineMode::FullDuplex,
            crc: CrcMode::Disabled,
            slave_management: SlaveManagement::Software,
            ss_output: false,
            ss_polarity: SsPolarity::ActiveLow,
            interrupts: InterruptEnable::all(),
            rx_dma: false,
            tx_dma: false,
        }
    }
}

// CRCPR reset value, used while CRC is disabled
const CRCPR_RESET: u16 = 0x0007;

impl SpiConfig {
    /// Translate the configuration into its register image.
    ///
    /// Pure: no side effect beyond the eventual write performed by `init`.
    /// Physically meaningless combinations are rejected before any register
    /// is touched.
    pub fn encode(&self) -> Result<RegisterImage, Error> {
        self.validate()?;

        let mut cr1 = 0u16;
        if self.mode.phase == Phase::CaptureOnSecondTransition {
            cr1 |= regs::CR1_CPHA;
        }
        if self.mode.polarity == Polarity::IdleHigh {
            cr1 |= regs::CR1_CPOL;
        }
        if self.role == Role::Master {
            cr1 |= regs::CR1_MSTR;
        }
        cr1 |= ((self.baud_rate as u16) << regs::CR1_BR_SHIFT) & regs::CR1_BR_MASK;
        if self.bit_order == BitOrder::LsbFirst {
            cr1 |= regs::CR1_LSBFIRST;
        }
        if self.slave_management == SlaveManagement::Software {
            cr1 |= regs::CR1_SSM;
            // SSI mirrors the role so software management does not fake a
            // mode fault
            if self.role == Role::Master {
                cr1 |= regs::CR1_SSI;
            }
        }
        match self.line_mode {
            LineMode::FullDuplex => {}
            LineMode::ReceiveOnly => cr1 |= regs::CR1_RXONLY,
            LineMode::Bidirectional => cr1 |= regs::CR1_BIDIMODE,
        }
        if self.data_width == DataWidth::Sixteen {
            cr1 |= regs::CR1_DFF;
        }
        if self.crc.is_enabled() {
            cr1 |= regs::CR1_CRCEN;
        }
        if self.enable {
            cr1 |= regs::CR1_SPE;
        }

        let mut cr2 = 0u16;
        if self.frame_format == FrameFormat::Ti {
            cr2 |= regs::CR2_FRF;
        }
        if self.ss_output {
            cr2 |= regs::CR2_SSOE;
        }
        if self.rx_dma {
            cr2 |= regs::CR2_RXDMAEN;
        }
        if self.tx_dma {
            cr2 |= regs::CR2_TXDMAEN;
        }

        let crcpr = match self.crc {
            CrcMode::Disabled => CRCPR_RESET,
            CrcMode::Crc8(poly) => poly as u16,
            CrcMode::Crc16(poly) => poly,
        };

        Ok(RegisterImage { cr1, cr2, crcpr })
    }

    fn validate(&self) -> Result<(), Error> {
        // NSS output is a master-mode notion
        if self.ss_output && self.role == Role::Slave {
            return Err(Error::InvalidConfig);
        }
        // the TI protocol owns NSS, software management cannot coexist
        if self.frame_format == FrameFormat::Ti
            && self.slave_management == SlaveManagement::Software
        {
            return Err(Error::InvalidConfig);
        }
        match self.crc {
            CrcMode::Crc8(_) if self.data_width == DataWidth::Sixteen => {
                return Err(Error::InvalidConfig)
            }
            CrcMode::Crc16(_) if self.data_width == DataWidth::Eight => {
                return Err(Error::InvalidConfig)
            }
            _ => {}
        }
        match self.line_mode {
            // no transmit leg exists to feed
            LineMode::ReceiveOnly if self.tx_dma => return Err(Error::InvalidConfig),
            // a single data line serves one direction at a time
            LineMode::Bidirectional if self.rx_dma && self.tx_dma => {
                return Err(Error::InvalidConfig)
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_mode_bits() {
        let config = SpiConfig {
            mode: embedded_hal::spi::MODE_3,
            ..SpiConfig::default()
        };
        let image = config.encode().unwrap();
        assert_ne!(image.cr1 & regs::CR1_CPOL, 0);
        assert_ne!(image.cr1 & regs::CR1_CPHA, 0);
        assert_ne!(image.cr1 & regs::CR1_MSTR, 0);
        assert_ne!(image.cr1 & regs::CR1_SPE, 0);
    }

    #[test]
    fn encodes_baud_field() {
        let config = SpiConfig {
            baud_rate: BaudRate::Div32,
            ..SpiConfig::default()
        };
        let image = config.encode().unwrap();
        assert_eq!(
            (image.cr1 & regs::CR1_BR_MASK) >> regs::CR1_BR_SHIFT,
            BaudRate::Div32 as u16
        );
    }

    #[test]
    fn software_management_sets_ssm_and_ssi() {
        let image = SpiConfig::default().encode().unwrap();
        assert_ne!(image.cr1 & regs::CR1_SSM, 0);
        assert_ne!(image.cr1 & regs::CR1_SSI, 0);

        let slave = SpiConfig {
            role: Role::Slave,
            ..SpiConfig::default()
        };
        let image = slave.encode().unwrap();
        assert_ne!(image.cr1 & regs::CR1_SSM, 0);
        assert_eq!(image.cr1 & regs::CR1_SSI, 0);
    }

    #[test]
    fn encodes_crc_polynomial() {
        let config = SpiConfig {
            crc: CrcMode::Crc8(0x31),
            ..SpiConfig::default()
        };
        let image = config.encode().unwrap();
        assert_ne!(image.cr1 & regs::CR1_CRCEN, 0);
        assert_eq!(image.crcpr, 0x31);
    }

    #[test]
    fn rejects_ss_output_on_slave() {
        let config = SpiConfig {
            role: Role::Slave,
            ss_output: true,
            ..SpiConfig::default()
        };
        assert_eq!(config.encode(), Err(Error::InvalidConfig));
    }

    #[test]
    fn rejects_crc_width_mismatch() {
        let config = SpiConfig {
            data_width: DataWidth::Sixteen,
            crc: CrcMode::Crc8(0x07),
            ..SpiConfig::default()
        };
        assert_eq!(config.encode(), Err(Error::InvalidConfig));

        let config = SpiConfig {
            crc: CrcMode::Crc16(0x1021),
            ..SpiConfig::default()
        };
        assert_eq!(config.encode(), Err(Error::InvalidConfig));
    }

    #[test]
    fn rejects_ti_with_software_management() {
        let config = SpiConfig {
            frame_format: FrameFormat::Ti,
            ..SpiConfig::default()
        };
        assert_eq!(config.encode(), Err(Error::InvalidConfig));

        let config = SpiConfig {
            frame_format: FrameFormat::Ti,
            slave_management: SlaveManagement::Hardware,
            ss_output: true,
            ..SpiConfig::default()
        };
        let image = config.encode().unwrap();
        assert_ne!(image.cr2 & regs::CR2_FRF, 0);
    }

    #[test]
    fn rejects_dma_on_unused_direction() {
        let config = SpiConfig {
            line_mode: LineMode::ReceiveOnly,
            tx_dma: true,
            ..SpiConfig::default()
        };
        assert_eq!(config.encode(), Err(Error::InvalidConfig));

        let config = SpiConfig {
            line_mode: LineMode::Bidirectional,
            rx_dma: true,
            tx_dma: true,
            ..SpiConfig::default()
        };
        assert_eq!(config.encode(), Err(Error::InvalidConfig));
    }

    #[test]
    fn divisor_ladder() {
        assert_eq!(BaudRate::Div2.divisor(), 2);
        assert_eq!(BaudRate::Div256.divisor(), 256);
        assert_eq!(BaudRate::from_clocks(48_000_000, 24_000_000), BaudRate::Div2);
        assert_eq!(BaudRate::from_clocks(48_000_000, 1_000_000), BaudRate::Div64);
        assert_eq!(BaudRate::from_clocks(48_000_000, 100), BaudRate::Div256);
    }
}
