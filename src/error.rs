//! Driver error taxonomy

use ufmt::derive::uDebug;

/// Peripheral-reported hardware fault, as latched in the status register.
#[derive(uDebug, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// Multi-master contention detected (SR.MODF).
    ModeFault,
    /// Inbound data arrived before the previous unit was read (SR.OVR).
    Overrun,
    /// Hardware CRC check failed on the received frame (SR.CRCERR).
    CrcMismatch,
}

/// Errors produced by the driver.
///
/// Configuration and length errors are rejected synchronously and never reach
/// hardware. `Fault` carries a peripheral-reported condition. None of these is
/// fatal: every error leaves the channel `Idle` and retryable.
#[derive(uDebug, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Value-domain violation in the configuration, or a descriptor
    /// incompatible with the channel's applied configuration.
    InvalidConfig,
    /// Descriptor length incompatible with the data width.
    InvalidLength,
    /// A transfer was requested on a non-idle channel.
    Busy,
    /// The blocking engine exhausted its poll budget.
    TimedOut,
    /// The peripheral reported an error condition.
    Fault(Fault),
    /// The transfer was torn down by `cancel`, `init` or `deinit` before it
    /// completed. Delivered through the completion notification only.
    Cancelled,
}
