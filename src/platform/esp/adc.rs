//! `adc_continuous` driver and curve-fitting calibration.
//!
//! The conversion-done ISR gives a binary semaphore; `wait_frame` takes it.
//! Pads are resolved to `(unit, channel)` once at build time and the reverse
//! lookup in `pad_of` is a table scan over the four pattern slots.

use core::ffi::c_void;
use core::ptr;

use esp_idf_svc::sys::{self, adc_cali_handle_t, adc_continuous_handle_t, esp_err_t};

use vradar_firmware::config::CHANNEL_COUNT;
use vradar_firmware::hal::adc::{decode_frame, RESULT_BYTES};
use vradar_firmware::hal::{
    AdcError, AdcFactory, AdcPattern, Attenuation, CalibrationCurve, CalibrationError,
    CalibrationScheme, ContinuousAdc, Pad, RawConversion,
};
use vradar_firmware::sync::Notify;

use super::rtos::BinarySemaphore;
use super::check;

/// DMA pool depth, in frames.
const POOL_FRAMES: usize = 4;

fn adc_error(code: esp_err_t) -> AdcError {
    match code as u32 {
        sys::ESP_ERR_INVALID_STATE => AdcError::InvalidState,
        sys::ESP_ERR_TIMEOUT => AdcError::Timeout,
        sys::ESP_ERR_INVALID_ARG => AdcError::InvalidConfig,
        _ => AdcError::Driver(code),
    }
}

#[inline]
fn adc_check(code: esp_err_t) -> Result<(), AdcError> {
    check(code).map_err(adc_error)
}

unsafe extern "C" fn on_conv_done(
    _handle: adc_continuous_handle_t,
    _edata: *const sys::adc_continuous_evt_data_t,
    user_data: *mut c_void,
) -> bool {
    // SAFETY: registered with a `&'static BinarySemaphore`.
    let done = unsafe { &*(user_data as *const BinarySemaphore) };
    done.notify_from_isr();
    done.take_woken()
}

#[derive(Clone, Copy)]
struct Slot {
    unit: u8,
    channel: u8,
    pad: Pad,
}

/// Configured continuous ADC. Deinitialized on drop.
pub struct EspAdc {
    handle: adc_continuous_handle_t,
    frame_done: &'static BinarySemaphore,
    slots: [Slot; CHANNEL_COUNT],
    running: bool,
    bytes: Vec<u8>,
}

// SAFETY: the handle is only used through `&mut self` or from the owning task.
unsafe impl Send for EspAdc {}

impl ContinuousAdc for EspAdc {
    fn start(&mut self) -> Result<(), AdcError> {
        // SAFETY: valid configured handle.
        adc_check(unsafe { sys::adc_continuous_start(self.handle) })?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AdcError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        // SAFETY: valid running handle.
        adc_check(unsafe { sys::adc_continuous_stop(self.handle) })
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn wait_frame(&mut self) -> Result<(), AdcError> {
        if !self.running {
            return Err(AdcError::InvalidState);
        }
        self.frame_done.wait(None);
        Ok(())
    }

    fn read(&mut self, out: &mut [RawConversion]) -> Result<usize, AdcError> {
        let max = self.bytes.len().min(out.len() * RESULT_BYTES);
        let mut len: u32 = 0;
        // SAFETY: `bytes` is valid for `max` bytes; zero timeout never blocks.
        adc_check(unsafe {
            sys::adc_continuous_read(self.handle, self.bytes.as_mut_ptr(), max as u32, &mut len, 0)
        })?;
        Ok(decode_frame(&self.bytes[..len as usize], out))
    }

    fn pad_of(&self, unit: u8, channel: u8) -> Option<Pad> {
        self.slots
            .iter()
            .find(|slot| slot.unit == unit && slot.channel == channel)
            .map(|slot| slot.pad)
    }
}

impl Drop for EspAdc {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("adc stop on drop: {}", e);
        }
        // SAFETY: handle came from adc_continuous_new_handle and is stopped.
        if let Err(code) = check(unsafe { sys::adc_continuous_deinit(self.handle) }) {
            log::warn!("adc deinit failed ({})", code);
        }
    }
}

/// Builds [`EspAdc`] handles that all signal the same frame semaphore.
pub struct EspAdcFactory {
    frame_done: &'static BinarySemaphore,
}

impl EspAdcFactory {
    pub fn new(frame_done: &'static BinarySemaphore) -> Self {
        Self { frame_done }
    }
}

impl AdcFactory for EspAdcFactory {
    type Handle = EspAdc;

    fn build(&mut self, pattern: &AdcPattern) -> Result<EspAdc, AdcError> {
        let mut slots = [Slot {
            unit: 0,
            channel: 0,
            pad: Pad(0),
        }; CHANNEL_COUNT];
        let mut digi = [sys::adc_digi_pattern_config_t::default(); CHANNEL_COUNT];

        for ((pad, slot), cfg) in pattern.pads.iter().zip(slots.iter_mut()).zip(digi.iter_mut()) {
            let mut unit: sys::adc_unit_t = 0;
            let mut channel: sys::adc_channel_t = 0;
            // SAFETY: out-pointers are valid locals.
            adc_check(unsafe { sys::adc_continuous_io_to_channel(pad.0 as i32, &mut unit, &mut channel) })?;

            *slot = Slot {
                unit: unit as u8,
                channel: channel as u8,
                pad: *pad,
            };
            cfg.atten = pattern.attenuation as u8;
            cfg.channel = channel as u8;
            cfg.unit = unit as u8;
            cfg.bit_width = pattern.bit_width;
        }

        let frame_bytes = pattern.frame_conversions * RESULT_BYTES;
        let handle_cfg = sys::adc_continuous_handle_cfg_t {
            max_store_buf_size: (frame_bytes * POOL_FRAMES) as u32,
            conv_frame_size: frame_bytes as u32,
            ..Default::default()
        };
        let mut handle: adc_continuous_handle_t = ptr::null_mut();
        // SAFETY: config and out-pointer are valid locals.
        adc_check(unsafe { sys::adc_continuous_new_handle(&handle_cfg, &mut handle) })?;

        // From here on `Drop` releases the handle on any early return.
        let adc = EspAdc {
            handle,
            frame_done: self.frame_done,
            slots,
            running: false,
            bytes: vec![0u8; frame_bytes],
        };

        let dig_cfg = sys::adc_continuous_config_t {
            pattern_num: CHANNEL_COUNT as u32,
            adc_pattern: digi.as_mut_ptr(),
            sample_freq_hz: pattern.conversion_hz,
            conv_mode: sys::adc_digi_convert_mode_t_ADC_CONV_SINGLE_UNIT_1,
            format: sys::adc_digi_output_format_t_ADC_DIGI_OUTPUT_FORMAT_TYPE2,
        };
        // SAFETY: `digi` outlives the call; the driver copies the pattern.
        adc_check(unsafe { sys::adc_continuous_config(adc.handle, &dig_cfg) })?;

        let callbacks = sys::adc_continuous_evt_cbs_t {
            on_conv_done: Some(on_conv_done),
            on_pool_ovf: None,
        };
        // SAFETY: the semaphore is 'static, so the ISR context stays valid.
        adc_check(unsafe {
            sys::adc_continuous_register_event_callbacks(
                adc.handle,
                &callbacks,
                self.frame_done as *const BinarySemaphore as *mut c_void,
            )
        })?;

        Ok(adc)
    }
}

/// Curve-fitting calibration on one ADC unit.
pub struct CurveFitting {
    unit: sys::adc_unit_t,
    bit_width: u8,
}

impl CurveFitting {
    pub fn new(unit: sys::adc_unit_t, bit_width: u8) -> Self {
        Self { unit, bit_width }
    }
}

/// Calibration handle. Deleted on drop.
pub struct EspCurve {
    handle: adc_cali_handle_t,
}

// SAFETY: conversion is read-only on the handle.
unsafe impl Send for EspCurve {}

impl CalibrationCurve for EspCurve {
    /// Millivolts. A failed conversion yields 0.
    fn raw_to_calibrated(&self, raw: u16) -> u16 {
        let mut mv: i32 = 0;
        // SAFETY: valid handle and out-pointer.
        match check(unsafe { sys::adc_cali_raw_to_voltage(self.handle, raw as i32, &mut mv) }) {
            Ok(()) => mv.clamp(0, u16::MAX as i32) as u16,
            Err(_) => 0,
        }
    }
}

impl Drop for EspCurve {
    fn drop(&mut self) {
        // SAFETY: handle came from adc_cali_create_scheme_curve_fitting.
        if let Err(code) = check(unsafe { sys::adc_cali_delete_scheme_curve_fitting(self.handle) }) {
            log::warn!("calibration delete failed ({})", code);
        }
    }
}

impl CalibrationScheme for CurveFitting {
    type Curve = EspCurve;

    fn create(&mut self, attenuation: Attenuation) -> Result<EspCurve, CalibrationError> {
        let cfg = sys::adc_cali_curve_fitting_config_t {
            unit_id: self.unit,
            atten: attenuation as sys::adc_atten_t,
            bitwidth: self.bit_width as sys::adc_bitwidth_t,
            ..Default::default()
        };
        let mut handle: adc_cali_handle_t = ptr::null_mut();
        // SAFETY: config and out-pointer are valid locals.
        let err = unsafe { sys::adc_cali_create_scheme_curve_fitting(&cfg, &mut handle) };
        match check(err) {
            Ok(()) => Ok(EspCurve { handle }),
            Err(code) if code as u32 == sys::ESP_ERR_NOT_SUPPORTED => Err(CalibrationError::NotSupported),
            Err(code) => Err(CalibrationError::Driver(code)),
        }
    }
}
