//! Usage metering side channel.
//!
//! Stores wrapped in [`crate::storage::MeteredStore`] record bytes and
//! requests per customer into a [`UsageMeter`]; the meter flushes one
//! [`UsageEvent`] per active customer per aggregation window to a
//! [`MeteringSink`]. Nothing here can fail a data-path request.

pub mod meter;
pub mod sink;

pub use meter::{FlushSummary, UsageEvent, UsageMeter};
pub use sink::{DynMeteringSink, HttpMeteringSink, MeteringSink, DEFAULT_INGEST_URL};
