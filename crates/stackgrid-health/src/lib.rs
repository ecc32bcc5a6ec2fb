//! stackgrid-health — availability probing for deployed stacks.
//!
//! A stack is available when every enabled feature and every resolved VAPI
//! answers its health endpoint with a 2xx status.
//!
//! # Architecture
//!
//! ```text
//! HealthProber::probe_all(targets)
//!   ├── one task per ProbeTarget
//!   │   └── ProbeClient::probe(url) → TCP (+ TLS) → HTTP/1 GET → bool
//!   ├── results over an mpsc channel sized to the target count
//!   └── collector returns early on Deadline expiry
//! ```
//!
//! Timeouts and TLS certificate failures count as "not available". Any other
//! transport error aborts the whole probe.

pub mod checks;
pub mod error;
pub mod probe;
pub mod prober;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_server;

pub use checks::{postgrest_ready, stack_targets, ProbeTarget, VapiCheck};
pub use error::ProbeError;
pub use probe::ProbeClient;
pub use prober::{HealthProber, HEALTH_POLL_INTERVAL, READY_POLL_INTERVAL};
