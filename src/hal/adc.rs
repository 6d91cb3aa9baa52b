//! Continuous (DMA-backed) ADC and calibration abstractions.
//!
//! The driver delivers interleaved conversions from every configured pad.
//! Each conversion names its `(unit, channel)`; the driver resolves that to a
//! physical [`Pad`], and the sampler maps pads to logical channels.

use crate::config::CHANNEL_COUNT;

/// Physical chip pin identifier (distinct from ADC unit/channel numbering).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pad(pub u8);

/// ADC input attenuation.
///
/// Discriminants match the ESP-IDF `adc_atten_t` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Attenuation {
    /// 0 dB, ~0-950 mV full scale.
    Db0 = 0,
    /// 2.5 dB, ~0-1250 mV full scale.
    Db2_5 = 1,
    /// 6 dB, ~0-1750 mV full scale.
    Db6 = 2,
    /// 11/12 dB, ~0-3100 mV full scale.
    Db11 = 3,
}

impl Attenuation {
    /// Convert from the raw settings value.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Attenuation::Db0),
            1 => Some(Attenuation::Db2_5),
            2 => Some(Attenuation::Db6),
            3 => Some(Attenuation::Db11),
            _ => None,
        }
    }

    /// Raw settings value.
    #[inline]
    pub fn raw(self) -> u32 {
        self as u32
    }
}

/// One decoded conversion result from the DMA buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawConversion {
    pub unit: u8,
    pub channel: u8,
    /// Raw unsigned conversion value (12 bits on this hardware).
    pub data: u16,
}

impl RawConversion {
    pub const EMPTY: Self = Self {
        unit: 0,
        channel: 0,
        data: 0,
    };
}

/// Size of one DMA result word in bytes (`SOC_ADC_DIGI_RESULT_BYTES`).
pub const RESULT_BYTES: usize = 4;

/// Decode one type-2 digital output word (ESP32-S3 layout).
///
/// ```text
/// bit 31           17  16   15..13 12   11 .. 0
///     [  reserved   ][unit][channel ][r][  data  ]
/// ```
#[inline]
pub fn decode_type2(word: u32) -> RawConversion {
    RawConversion {
        data: (word & 0x0FFF) as u16,
        channel: ((word >> 13) & 0x0F) as u8,
        unit: ((word >> 17) & 0x01) as u8,
    }
}

/// Decode a little-endian DMA byte buffer into conversions.
///
/// Returns the number of conversions written. Trailing partial words are ignored.
pub fn decode_frame(bytes: &[u8], out: &mut [RawConversion]) -> usize {
    let mut count = 0;
    for (chunk, slot) in bytes.chunks_exact(RESULT_BYTES).zip(out.iter_mut()) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        *slot = decode_type2(word);
        count += 1;
    }
    count
}

/// ADC driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcError {
    /// Driver is in a state that does not allow the operation (e.g. read after
    /// deinit, start while running).
    InvalidState,
    /// No data was available within the read window.
    Timeout,
    /// Pattern or frequency rejected.
    InvalidConfig,
    /// Any other vendor driver error.
    Driver(i32),
}

impl AdcError {
    /// Terminal errors abort the current capture cycle.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, AdcError::Timeout)
    }
}

impl core::fmt::Display for AdcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidState => write!(f, "ADC invalid state"),
            Self::Timeout => write!(f, "ADC read timeout"),
            Self::InvalidConfig => write!(f, "ADC configuration rejected"),
            Self::Driver(code) => write!(f, "ADC driver error {}", code),
        }
    }
}

/// Continuous-mode conversion pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdcPattern {
    /// Pads scanned, in slot order.
    pub pads: [Pad; CHANNEL_COUNT],
    pub attenuation: Attenuation,
    pub bit_width: u8,
    /// Total conversion rate across all slots (Hz).
    pub conversion_hz: u32,
    /// Conversions delivered per DMA frame.
    pub frame_conversions: usize,
}

/// Handle to a configured continuous ADC.
///
/// Dropping the handle stops the converter and releases its DMA memory.
pub trait ContinuousAdc {
    /// Start conversions.
    fn start(&mut self) -> Result<(), AdcError>;

    /// Stop conversions. Stopping a stopped ADC is not an error.
    fn stop(&mut self) -> Result<(), AdcError>;

    fn is_running(&self) -> bool;

    /// Block until the DMA conversion-complete notification arrives.
    ///
    /// No timeout: absence of data is a driver error, not an expected condition.
    fn wait_frame(&mut self) -> Result<(), AdcError>;

    /// Drain available conversions into `out`, returning how many were written.
    fn read(&mut self, out: &mut [RawConversion]) -> Result<usize, AdcError>;

    /// Resolve a `(unit, channel)` pair to the physical pad.
    fn pad_of(&self, unit: u8, channel: u8) -> Option<Pad>;
}

/// Builds ADC handles from a pattern.
pub trait AdcFactory {
    type Handle: ContinuousAdc + Send;

    fn build(&mut self, pattern: &AdcPattern) -> Result<Self::Handle, AdcError>;
}

/// Calibration curve error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    /// Scheme not supported for this unit/attenuation (e.g. eFuse not burnt).
    NotSupported,
    /// Vendor driver error.
    Driver(i32),
}

impl core::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotSupported => write!(f, "calibration scheme not supported"),
            Self::Driver(code) => write!(f, "calibration driver error {}", code),
        }
    }
}

/// Opaque raw → calibrated conversion (vendor curve). Dropping releases it.
pub trait CalibrationCurve {
    fn raw_to_calibrated(&self, raw: u16) -> u16;
}

/// Creates calibration curves for a given attenuation.
pub trait CalibrationScheme {
    type Curve: CalibrationCurve + Send;

    fn create(&mut self, attenuation: Attenuation) -> Result<Self::Curve, CalibrationError>;
}
