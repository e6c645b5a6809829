//! Observability infrastructure
//!
//! Cadence logs through `tracing`. Binaries call [`init_tracing`] once at
//! startup; libraries only emit events.

pub mod logging;

pub use logging::init_tracing;
