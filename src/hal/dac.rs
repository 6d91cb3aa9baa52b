//! Waveform output (dual-channel 12-bit DAC).
//!
//! The board uses an MCP4922 on SPI. Channel A drives the transmit ramp,
//! channel B the optional audible PRF tone.

use super::HalError;

/// Largest code accepted by a 12-bit DAC.
pub const DAC_MAX_CODE: u16 = 0x0FFF;

/// Mid-scale code.
pub const DAC_MID_CODE: u16 = 0x0800;

/// DAC output channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DacChannel {
    A,
    B,
}

impl DacChannel {
    /// MCP4922 command bits for this channel.
    ///
    /// - A: `0011` = channel A, unbuffered, 1x gain, active
    /// - B: `1111` = channel B, buffered, 1x gain, active
    #[inline]
    pub fn select_mask(self) -> u16 {
        match self {
            DacChannel::A => 0x3000,
            DacChannel::B => 0xF000,
        }
    }
}

/// Compose the 16-bit MCP4922 command word for a code.
#[inline]
pub fn mcp4922_word(code: u16, channel: DacChannel) -> u16 {
    (code & DAC_MAX_CODE) | channel.select_mask()
}

/// Waveform output device addressed by 12-bit code plus channel select.
///
/// `write` is called from the chirp timer interrupt: implementations must not
/// allocate, must not take a lock or semaphore, and must complete within one
/// tick.
pub trait WaveformOutput {
    fn write(&mut self, channel: DacChannel, code: u16) -> Result<(), HalError>;
}

impl<W: WaveformOutput + ?Sized> WaveformOutput for &mut W {
    fn write(&mut self, channel: DacChannel, code: u16) -> Result<(), HalError> {
        (**self).write(channel, code)
    }
}
