//! Process-level helpers shared by the facilitator and resource server binaries.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`sig_down`] | Shutdown on SIGTERM/SIGINT through a cancellation token |
//! | [`telemetry`] | `tracing` subscriber, with OpenTelemetry export under the `telemetry` feature |

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
