//! Chirp timer, MCP4922 DAC and the radar-enable pin.
//!
//! ```text
//! GPTimer alarm (1 MHz, auto-reload) ──▶ on_alarm ──▶ ChirpIsr::on_alarm
//!                                           │   Retune(t): reprogram alarm
//!                                           └─▶ yield if the sampler woke
//! ```

use core::ffi::c_void;
use core::ptr;

use esp_idf_svc::hal::gpio::{AnyOutputPin, Level, Output, OutputPin, PinDriver};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::spi::{config, SpiAnyPins, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
use esp_idf_svc::hal::units::FromValueType;
use esp_idf_svc::sys::{self, gptimer_handle_t, EspError, TickType_t};

use vradar_firmware::chirp::{AlarmAction, ChirpIsr};
use vradar_firmware::hal::dac::mcp4922_word;
use vradar_firmware::hal::{ChirpTimer, DacChannel, EnableOutput, HalError, WaveformOutput};

use super::rtos::BinarySemaphore;
use super::{check, hal_error, DAC_SPI_CLOCK_HZ};

/// ISR context type registered with the timer.
pub type ChirpContext = ChirpIsr<'static, Mcp4922, BinarySemaphore>;

/// Timer resolution: one count per µs.
const TIMER_RESOLUTION_HZ: u32 = 1_000_000;

/// MCP4922 on a dedicated SPI bus, latched with LDAC.
///
/// The bus is acquired once at construction and kept, so the alarm ISR can
/// run polling transfers without touching the bus lock. Nothing else may use
/// this bus.
pub struct Mcp4922 {
    _spi: SpiDeviceDriver<'static, SpiDriver<'static>>,
    handle: sys::spi_device_handle_t,
    ldac: PinDriver<'static, AnyOutputPin, Output>,
    _shdn: PinDriver<'static, AnyOutputPin, Output>,
}

// SAFETY: the device handle is only used by the owner of `&mut self`.
unsafe impl Send for Mcp4922 {}

impl Mcp4922 {
    pub fn new<SPI: SpiAnyPins>(
        spi: impl Peripheral<P = SPI> + 'static,
        sck: impl Peripheral<P = impl OutputPin> + 'static,
        sdi: impl Peripheral<P = impl OutputPin> + 'static,
        cs: impl Peripheral<P = impl OutputPin> + 'static,
        ldac: AnyOutputPin,
        shdn: AnyOutputPin,
    ) -> Result<Self, EspError> {
        let mut shdn = PinDriver::output(shdn)?;
        shdn.set_high()?;
        let mut ldac = PinDriver::output(ldac)?;
        ldac.set_low()?;

        let spi = SpiDeviceDriver::new_single(
            spi,
            sck,
            sdi,
            Option::<esp_idf_svc::hal::gpio::AnyIOPin>::None,
            Some(cs),
            &SpiDriverConfig::new(),
            &config::Config::new()
                .baudrate(DAC_SPI_CLOCK_HZ.Hz().into())
                .data_mode(config::MODE_0),
        )?;
        let handle = spi.handle();
        // SAFETY: task context, valid device handle; held until drop.
        EspError::convert(unsafe { sys::spi_device_acquire_bus(handle, TickType_t::MAX) })?;

        Ok(Self {
            _spi: spi,
            handle,
            ldac,
            _shdn: shdn,
        })
    }

    /// One 16-bit command with the data inline in the transaction.
    fn transfer(&mut self, word: u16) -> Result<(), HalError> {
        let [hi, lo] = word.to_be_bytes();
        let mut trans = sys::spi_transaction_t {
            flags: sys::SPI_TRANS_USE_TXDATA,
            length: 16,
            ..Default::default()
        };
        trans.__bindgen_anon_1.tx_data = [hi, lo, 0, 0];
        // SAFETY: bus held by this device, so neither call takes a
        // semaphore; `trans` outlives the transfer, which ends before return.
        unsafe {
            check(sys::spi_device_polling_start(self.handle, &mut trans, 0))
                .map_err(HalError::Driver)?;
            check(sys::spi_device_polling_end(self.handle, TickType_t::MAX))
                .map_err(HalError::Driver)
        }
    }
}

impl WaveformOutput for Mcp4922 {
    fn write(&mut self, channel: DacChannel, code: u16) -> Result<(), HalError> {
        self.ldac.set_high().map_err(hal_error)?;
        let sent = self.transfer(mcp4922_word(code, channel));
        self.ldac.set_low().map_err(hal_error)?;
        sent
    }
}

impl Drop for Mcp4922 {
    fn drop(&mut self) {
        // SAFETY: acquired in `new`; the device is removed after this when
        // `_spi` drops.
        unsafe { sys::spi_device_release_bus(self.handle) }
    }
}

/// Radar-enable GPIO.
pub struct GpioEnable {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl GpioEnable {
    pub fn new(pin: AnyOutputPin) -> Result<Self, EspError> {
        Ok(Self {
            pin: PinDriver::output(pin)?,
        })
    }
}

impl EnableOutput for GpioEnable {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), HalError> {
        self.pin.set_level(Level::from(enabled)).map_err(hal_error)
    }
}

fn alarm_config(tick_us: u32) -> sys::gptimer_alarm_config_t {
    let mut alarm = sys::gptimer_alarm_config_t {
        alarm_count: tick_us as u64,
        reload_count: 0,
        ..Default::default()
    };
    alarm.flags.set_auto_reload_on_alarm(1);
    alarm
}

unsafe extern "C" fn on_alarm(
    timer: gptimer_handle_t,
    _edata: *const sys::gptimer_alarm_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    // SAFETY: registered with a leaked `ChirpContext`; only this ISR touches it.
    let isr = unsafe { &mut *(user_ctx as *mut ChirpContext) };
    if let AlarmAction::Retune(tick_us) = isr.on_alarm() {
        // SAFETY: ISR-safe reprogramming of the running timer.
        unsafe {
            sys::gptimer_set_alarm_action(timer, &alarm_config(tick_us));
        }
    }
    isr.chirp_start.take_woken()
}

/// General-purpose timer driving the chirp ISR.
pub struct GpChirpTimer {
    handle: gptimer_handle_t,
    enabled: bool,
    running: bool,
}

// SAFETY: the handle is only used through `&mut self`.
unsafe impl Send for GpChirpTimer {}

impl GpChirpTimer {
    /// Create the timer and register `context` as the alarm ISR context.
    pub fn new(context: &'static mut ChirpContext) -> Result<Self, HalError> {
        let cfg = sys::gptimer_config_t {
            clk_src: sys::soc_periph_gptimer_clk_src_t_GPTIMER_CLK_SRC_DEFAULT,
            direction: sys::gptimer_count_direction_t_GPTIMER_COUNT_UP,
            resolution_hz: TIMER_RESOLUTION_HZ,
            ..Default::default()
        };
        let mut handle: gptimer_handle_t = ptr::null_mut();
        // SAFETY: config and out-pointer are valid locals.
        check(unsafe { sys::gptimer_new_timer(&cfg, &mut handle) }).map_err(HalError::Driver)?;
        let timer = Self {
            handle,
            enabled: false,
            running: false,
        };

        let callbacks = sys::gptimer_event_callbacks_t {
            on_alarm: Some(on_alarm),
        };
        // SAFETY: `context` is 'static and handed over to the ISR.
        check(unsafe {
            sys::gptimer_register_event_callbacks(
                timer.handle,
                &callbacks,
                context as *mut ChirpContext as *mut c_void,
            )
        })
        .map_err(HalError::Driver)?;

        Ok(timer)
    }
}

impl ChirpTimer for GpChirpTimer {
    fn start(&mut self, tick_us: u32) -> Result<(), HalError> {
        if tick_us == 0 {
            return Err(HalError::InvalidArgument);
        }
        // SAFETY: valid handle for every call below.
        check(unsafe { sys::gptimer_set_alarm_action(self.handle, &alarm_config(tick_us)) })
            .map_err(HalError::Driver)?;
        if !self.enabled {
            check(unsafe { sys::gptimer_enable(self.handle) }).map_err(HalError::Driver)?;
            self.enabled = true;
        }
        if !self.running {
            check(unsafe { sys::gptimer_start(self.handle) }).map_err(HalError::Driver)?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HalError> {
        if self.running {
            // SAFETY: valid running handle.
            check(unsafe { sys::gptimer_stop(self.handle) }).map_err(HalError::Driver)?;
            self.running = false;
        }
        Ok(())
    }
}

impl Drop for GpChirpTimer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("chirp timer stop: {}", e);
        }
        // SAFETY: handle came from gptimer_new_timer; disabled before delete.
        unsafe {
            if self.enabled {
                sys::gptimer_disable(self.handle);
            }
            sys::gptimer_del_timer(self.handle);
        }
    }
}
