//! tcap-core: shared types, configuration, error kinds, and the resilience layer
//!
//! Every network-bound step elsewhere in the workspace goes through
//! [`resilience::resilient`]: a per-attempt timeout inside exponential
//! backoff with jitter.

pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;
pub mod types;

pub use config::TcapConfig;
pub use error::{ConfigError, ErrorKind, NetworkError};
pub use resilience::{
    resilient, with_retry, with_timeout, AttemptError, Classify, ResilienceSettings, RetryClass,
    RetryFailure, RetryPolicy, TimeoutError,
};
pub use types::{
    Clock, FixedClock, MessageRecord, MessageStatus, NewMessageRecord, RedeemPackage, SystemClock,
};
