//! # vRadar firmware core
//!
//! Radar front-end acquisition: chirp generation, continuous ADC capture
//! synchronized to the chirp, and streaming of one capture record per cycle.
//!
//! ## Architecture
//!
//! ```text
//! ChirpGenerator (ISR) ──notify──▶ ContinuousSampler (task)
//!                                        │ CaptureRecord (owned)
//!                                        ▼
//!                                  CaptureQueue (SPSC, drop-newest)
//!                                        │
//!                                        ▼
//!                                  StreamingConsumer ──▶ client
//!
//! ReconfigurationController (1 Hz) ──lock──▶ ADC + CalibrationProfile
//! ```
//!
//! Hardware sits behind the `hal` traits; `platform::esp` implements them on
//! ESP-IDF. Everything else is `no_std` + `alloc` and runs under host tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod calibration;
pub mod chirp;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fault;
pub mod hal;
pub mod log_drain;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod queue;
pub mod reconfig;
pub mod record;
pub mod sampler;
pub mod sync;

pub use calibration::CalibrationProfile;
pub use chirp::{AlarmAction, ChirpControl, ChirpGenerator, ChirpIsr};
pub use config::{ChannelMap, ChirpConfig, SamplingConfig, Settings, SettingsStore};
pub use consumer::{ClientLink, FrameSink, SendError, StreamingConsumer};
pub use error::Error;
pub use fault::{FaultCode, FaultState};
pub use pipeline::Pipeline;
pub use queue::CaptureQueue;
pub use reconfig::{ReconfigOutcome, ReconfigurationController, RuntimeState};
pub use record::{CaptureRecord, RecordLedger};
pub use sampler::{ContinuousSampler, CycleOutcome, SkipReason};
