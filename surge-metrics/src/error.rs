use crate::metrics::MetricKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is a {registered}, cannot record it as a {requested}")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    #[error("metrics registry is frozen")]
    Frozen,
}

pub type Result<T> = std::result::Result<T, Error>;
