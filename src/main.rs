//! vRadar firmware entry point.
//!
//! Bring-up order:
//! 1. Logger, MAC, settings
//! 2. Pipeline (leaked to `'static`), chirp ISR context, GPTimer
//! 3. `bring_up`: calibration + ADC + enable pin, then start the timer
//! 4. Sampler task (high priority), consumer task, HTTP server
//! 5. 1 Hz reconfiguration timer; the main task drains the RT log
//!
//! Board pins: DAC SCK 12, SDI 11, CS 10, LDAC 13, SHDN 14, radar enable 9,
//! IF inputs on pads 4..7 (ADC1).

#[cfg(target_os = "espidf")]
mod platform;

#[cfg(target_os = "espidf")]
fn main() {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("{}", env!("VERSION_STRING"));

    if let Err(e) = device::run() {
        log::error!("bring-up failed: {}", e);
        esp_idf_svc::hal::reset::restart();
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!(
        "{}: device firmware; build for an ESP-IDF target (the library runs under `cargo test`)",
        env!("VERSION_STRING")
    );
}

#[cfg(target_os = "espidf")]
mod device {
    use std::thread;
    use std::time::Duration;

    use esp_idf_svc::hal::cpu::Core;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::hal::task::thread::ThreadSpawnConfiguration;
    use esp_idf_svc::sys::{adc_unit_t_ADC_UNIT_1, ESP_ERR_NO_MEM};
    use esp_idf_svc::timer::EspTaskTimerService;

    use vradar_firmware::config::{ChannelMap, Settings, ADC_BIT_WIDTH, RECONFIG_PERIOD_US};
    use vradar_firmware::hal::HalError;
    use vradar_firmware::log_drain::LogDrain;
    use vradar_firmware::{Error, ReconfigOutcome};

    use crate::platform::esp::{
        self, BinarySemaphore, CurveFitting, EspAdcFactory, GpChirpTimer, GpioEnable, Mcp4922,
        Radar, CLOCK,
    };

    const SAMPLER_STACK: usize = 8 * 1024;
    const SAMPLER_PRIORITY: u8 = 20;
    const CONSUMER_STACK: usize = 8 * 1024;

    /// Log drain cadence on the main task.
    const LOG_DRAIN_PERIOD: Duration = Duration::from_millis(50);

    fn spawn_failed(e: std::io::Error) -> Error {
        log::error!("task spawn: {}", e);
        Error::Hal(HalError::Driver(ESP_ERR_NO_MEM as i32))
    }

    pub fn run() -> Result<(), Error> {
        let peripherals = Peripherals::take().map_err(esp::hal_error)?;
        let pins = peripherals.pins;

        let mac = esp::station_mac();
        let settings = Settings::default();

        let radar: &'static Radar = Box::leak(Box::new(Radar::new(
            settings,
            ChannelMap::BOARD_DEFAULT,
            mac,
            BinarySemaphore::new()?,
            BinarySemaphore::new()?,
        )?));
        let frame_done: &'static BinarySemaphore = Box::leak(Box::new(BinarySemaphore::new()?));

        let dac = Mcp4922::new(
            peripherals.spi2,
            pins.gpio12,
            pins.gpio11,
            pins.gpio10,
            pins.gpio13.into(),
            pins.gpio14.into(),
        )
        .map_err(esp::hal_error)?;
        let enable = GpioEnable::new(pins.gpio9.into()).map_err(esp::hal_error)?;

        let chirp_isr = Box::leak(Box::new(radar.chirp_isr(dac)));
        let mut timer = GpChirpTimer::new(chirp_isr)?;

        let mut controller = radar.bring_up(
            &CLOCK,
            &mut timer,
            EspAdcFactory::new(frame_done),
            CurveFitting::new(adc_unit_t_ADC_UNIT_1, ADC_BIT_WIDTH),
            enable,
        )?;

        // Sampler above the network stack, on the core without Wi-Fi.
        ThreadSpawnConfiguration {
            priority: SAMPLER_PRIORITY,
            pin_to_core: Some(Core::Core1),
            ..Default::default()
        }
        .set()
        .map_err(esp::hal_error)?;
        thread::Builder::new()
            .name("sampler".into())
            .stack_size(SAMPLER_STACK)
            .spawn(move || {
                radar.sampler(&CLOCK).run();
            })
            .map_err(spawn_failed)?;

        ThreadSpawnConfiguration::default()
            .set()
            .map_err(esp::hal_error)?;
        thread::Builder::new()
            .name("consumer".into())
            .stack_size(CONSUMER_STACK)
            .spawn(move || {
                radar.consumer(&CLOCK).run();
            })
            .map_err(spawn_failed)?;

        let _server = esp::server::start(radar).map_err(esp::hal_error)?;

        let timer_service = EspTaskTimerService::new().map_err(esp::hal_error)?;
        let reconfig = timer_service
            .timer(move || {
                if let ReconfigOutcome::Failed(e) = controller.poll(&radar.settings) {
                    log::warn!("reconfiguration failed, retrying: {}", e);
                }
            })
            .map_err(esp::hal_error)?;
        reconfig
            .every(Duration::from_micros(RECONFIG_PERIOD_US))
            .map_err(esp::hal_error)?;

        log::info!("vRadar running");

        let mut drain = LogDrain::new();
        loop {
            radar.drain_logs(&mut drain, &CLOCK);
            if let Some(fault) = radar.faults.take() {
                log::debug!("fault {} data={} ({} total)", fault.code.as_str(), fault.data, fault.count);
            }
            thread::sleep(LOG_DRAIN_PERIOD);
        }
    }
}
