//! Scheduling, recovery and request routing for dnsgate.
//!
//! Everything here talks to the DNS server through [`dnsgate_api::DnsApi`]
//! and persists through [`dnsgate_store::StateStore`], so the whole crate runs
//! against in-memory fakes in tests.

mod aggregate;
mod allow_status;
mod clock;
mod dispatch;
pub mod errors;
mod identity;
pub mod keys;
mod logger;
mod options;
mod overrides;
mod timer;

#[cfg(test)]
mod testing;

pub use aggregate::aggregate_blocked;
pub use allow_status::{ALLOW_STATUS_WORKERS, AllowStatusBatch, AllowStatusChecker, check_batch};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{Dispatcher, Request};
pub use errors::{GateError, Result};
pub use identity::{HttpsProbe, IdentityResolver, IdentitySettings, Probe, ProbeFut};
pub use logger::QueryLoggerDiscovery;
pub use options::{load_options, save_options, seed_options};
pub use overrides::{BlockingStatus, OverrideManager, RecoveryReport, TempAllow, TempDisable};
pub use timer::{TimerService, TokioTimers};
