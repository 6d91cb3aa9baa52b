//! FreeRTOS notification and the `esp_timer` clock.

use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use esp_idf_svc::sys::{self, BaseType_t, QueueHandle_t, TickType_t};

use vradar_firmware::hal::{Clock, HalError};
use vradar_firmware::sync::Notify;

const PD_TRUE: BaseType_t = 1;

/// Convert µs to FreeRTOS ticks, rounding up. `None` blocks forever.
fn to_ticks(timeout_us: Option<u64>) -> TickType_t {
    match timeout_us {
        None => TickType_t::MAX,
        Some(us) => {
            let hz = sys::configTICK_RATE_HZ as u64;
            let ticks = (us * hz).div_ceil(1_000_000);
            ticks.min(TickType_t::MAX as u64 - 1) as TickType_t
        }
    }
}

/// Binary semaphore: repeated gives before a take collapse into one.
pub struct BinarySemaphore {
    handle: QueueHandle_t,
    /// Set by `notify_from_isr` when a higher-priority task was woken.
    woken: AtomicBool,
}

// SAFETY: FreeRTOS queue handles may be used from any task or ISR.
unsafe impl Send for BinarySemaphore {}
unsafe impl Sync for BinarySemaphore {}

impl BinarySemaphore {
    pub fn new() -> Result<Self, HalError> {
        // SAFETY: plain constructor call; null means out of memory.
        let handle = unsafe {
            sys::xQueueGenericCreate(1, 0, sys::queueQUEUE_TYPE_BINARY_SEMAPHORE as u8)
        };
        if handle.is_null() {
            return Err(HalError::Driver(sys::ESP_ERR_NO_MEM as i32));
        }
        Ok(Self {
            handle,
            woken: AtomicBool::new(false),
        })
    }

    /// Whether the last ISR give woke a higher-priority task. Clears the flag.
    ///
    /// ISR callbacks return this so the driver yields on exit.
    #[inline]
    pub fn take_woken(&self) -> bool {
        self.woken.swap(false, Ordering::Relaxed)
    }
}

impl Notify for BinarySemaphore {
    fn notify(&self) {
        // SAFETY: valid handle; a give on a full binary semaphore just fails.
        unsafe {
            sys::xQueueGenericSend(self.handle, ptr::null(), 0, sys::queueSEND_TO_BACK as BaseType_t);
        }
    }

    fn notify_from_isr(&self) {
        let mut woken: BaseType_t = 0;
        // SAFETY: ISR-safe give on a valid handle.
        unsafe {
            sys::xQueueGiveFromISR(self.handle, &mut woken);
        }
        if woken == PD_TRUE {
            self.woken.store(true, Ordering::Relaxed);
        }
    }

    fn wait(&self, timeout_us: Option<u64>) -> bool {
        // SAFETY: valid handle, task context.
        unsafe { sys::xQueueSemaphoreTake(self.handle, to_ticks(timeout_us)) == PD_TRUE }
    }
}

impl Drop for BinarySemaphore {
    fn drop(&mut self) {
        // SAFETY: handle came from xQueueGenericCreate and is not used afterwards.
        unsafe { sys::vQueueDelete(self.handle) }
    }
}

/// `esp_timer` time base.
///
/// Delays of at least one tick yield to the scheduler; shorter waits spin in
/// ROM so a sub-tick timeout is not stretched to a full tick.
pub struct EspClock;

impl EspClock {
    const TICK_US: u32 = 1_000_000 / sys::configTICK_RATE_HZ as u32;
}

impl Clock for EspClock {
    #[inline]
    fn now_us(&self) -> u64 {
        // SAFETY: always callable after boot.
        unsafe { sys::esp_timer_get_time() as u64 }
    }

    /// Whole ticks, rounded down; shorter requests spin.
    fn delay_us(&self, us: u32) {
        if us < Self::TICK_US {
            self.spin_us(us);
            return;
        }
        // SAFETY: task context only (see `Clock::delay_us`).
        unsafe { sys::vTaskDelay((us / Self::TICK_US) as TickType_t) }
    }

    #[inline]
    fn spin_us(&self, us: u32) {
        // SAFETY: ROM busy-wait, callable from any context.
        unsafe { sys::esp_rom_delay_us(us) }
    }

    #[inline]
    fn tick_us(&self) -> u32 {
        Self::TICK_US
    }
}
