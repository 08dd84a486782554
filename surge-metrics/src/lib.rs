//! Concurrent metric aggregation for load runs.
//!
//! Writers go through a [`Registry`], which hands out cheap cloneable [`MetricHandle`]s keyed by
//! metric name and tag set. Percentiles are only available on the frozen [`MetricsSnapshot`].

pub mod error;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod tags;
pub mod trend;

pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind, Observation};
pub use registry::{Registry, WriteGroup};
pub use snapshot::{MetricsSnapshot, SeriesSnapshot, SeriesValue};
pub use tags::TagSet;
pub use trend::{Trend, TrendMode};
