//! # llama-runtime
//!
//! Process-level runtime pieces for llama.rs sessions:
//! - [`Runtime`] / [`BackendGuard`]: reference-counted engine backend lifecycle.
//!   The backend is initialized when the first session starts and torn down
//!   when the last one ends.
//! - Telemetry hooks (TTFT, tok/s) in [`telemetry`].
//! - [`MockEngine`]: a deterministic in-process engine used by tests and the CLI.

pub mod backend;
pub mod mock;
pub mod telemetry;

pub use backend::{BackendGuard, Runtime};
pub use mock::{
    byte_token, BatchRecord, MockContext, MockEngine, MockEvent, MockModel, BOS_TOKEN, EOS_TOKEN,
};
pub use telemetry::{
    InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook,
    TracingTelemetry,
};
