//! Device bindings for the HAL traits.
//!
//! Only ESP-IDF is supported; host builds run the core through the
//! integration-test doubles instead.

#[cfg(target_os = "espidf")]
pub mod esp;
