//! ESP-IDF implementation of the HAL.
//!
//! ```text
//! GPTimer ISR ──▶ ChirpIsr ──SPI──▶ MCP4922      (chirp.rs)
//!      │
//!      └──give──▶ BinarySemaphore ──▶ sampler task   (rtos.rs)
//!                                        │
//!                 adc_continuous ◀───────┘          (adc.rs)
//!
//! EspHttpServer: /ws, /system, /restart             (server.rs)
//! ```
//!
//! Timer, ADC, calibration and FreeRTOS go through `esp_idf_svc::sys`; SPI,
//! GPIO and HTTP use the esp-idf-svc wrappers. The core only sees `hal` traits.

pub mod adc;
pub mod chirp;
pub mod rtos;
pub mod server;

use esp_idf_svc::sys::{self, esp_err_t, EspError, ESP_OK};

use vradar_firmware::hal::HalError;
use vradar_firmware::Pipeline;

pub use adc::{CurveFitting, EspAdc, EspAdcFactory, EspCurve};
pub use chirp::{GpChirpTimer, GpioEnable, Mcp4922};
pub use rtos::{BinarySemaphore, EspClock};
pub use server::WsSink;

/// SPI clock for the DAC.
pub const DAC_SPI_CLOCK_HZ: u32 = 20_000_000;

/// The pipeline as instantiated on this board.
pub type Radar = Pipeline<EspAdc, EspCurve, BinarySemaphore, BinarySemaphore, WsSink>;

/// The shared clock. Zero-sized; every service borrows this one.
pub static CLOCK: EspClock = EspClock;

/// Map an `esp_err_t` to a `Result`, keeping the raw code on failure.
#[inline]
pub(crate) fn check(code: esp_err_t) -> Result<(), i32> {
    if code == ESP_OK as esp_err_t {
        Ok(())
    } else {
        Err(code)
    }
}

/// `EspError` into the core's generic driver error.
#[inline]
pub fn hal_error(e: EspError) -> HalError {
    HalError::Driver(e.code())
}

/// Station MAC address.
pub fn station_mac() -> [u8; 6] {
    let mut mac = [0u8; 6];
    // SAFETY: `mac` is a valid 6-byte buffer for the duration of the call.
    let err = unsafe { sys::esp_read_mac(mac.as_mut_ptr(), sys::esp_mac_type_t_ESP_MAC_WIFI_STA) };
    if let Err(code) = check(err) {
        log::warn!("esp_read_mac failed ({}), using zero MAC", code);
    }
    mac
}
