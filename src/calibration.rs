//! ADC calibration profile.
//!
//! Wraps a vendor curve built for one attenuation. Dropping the profile
//! releases the curve; a change of attenuation means building a new one.

use crate::hal::adc::{Attenuation, CalibrationCurve, CalibrationError, CalibrationScheme};

/// Raw → calibrated converter bound to an attenuation.
pub struct CalibrationProfile<K> {
    curve: K,
    attenuation: Attenuation,
}

impl<K: CalibrationCurve> CalibrationProfile<K> {
    /// Build a profile for `attenuation` with the given scheme.
    pub fn build<S>(scheme: &mut S, attenuation: Attenuation) -> Result<Self, CalibrationError>
    where
        S: CalibrationScheme<Curve = K>,
    {
        let curve = scheme.create(attenuation)?;
        Ok(Self { curve, attenuation })
    }

    /// Convert one raw (or averaged raw) value.
    #[inline]
    pub fn convert(&self, raw: u16) -> u16 {
        self.curve.raw_to_calibrated(raw)
    }

    #[inline]
    pub fn attenuation(&self) -> Attenuation {
        self.attenuation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Offset(u16);

    impl CalibrationCurve for Offset {
        fn raw_to_calibrated(&self, raw: u16) -> u16 {
            raw.saturating_add(self.0)
        }
    }

    struct Scheme {
        supported: bool,
    }

    impl CalibrationScheme for Scheme {
        type Curve = Offset;

        fn create(&mut self, attenuation: Attenuation) -> Result<Offset, CalibrationError> {
            if self.supported {
                Ok(Offset(attenuation.raw() as u16 * 100))
            } else {
                Err(CalibrationError::NotSupported)
            }
        }
    }

    #[test]
    fn test_build_and_convert() {
        let mut scheme = Scheme { supported: true };
        let profile = CalibrationProfile::build(&mut scheme, Attenuation::Db6).unwrap();
        assert_eq!(profile.attenuation(), Attenuation::Db6);
        assert_eq!(profile.convert(10), 210);
    }

    #[test]
    fn test_build_failure_propagates() {
        let mut scheme = Scheme { supported: false };
        assert!(matches!(
            CalibrationProfile::build(&mut scheme, Attenuation::Db0),
            Err(CalibrationError::NotSupported)
        ));
    }
}
