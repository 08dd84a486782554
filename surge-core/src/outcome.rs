use std::time::Duration;

use surge_http::HttpTransportErrorKind;

/// Why an iteration's request counted as a failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeErrorKind {
    /// No response within the request timeout.
    Timeout,
    /// Connection refused, reset, TLS failure and the like.
    Transport,
    /// The workload could not produce a valid request.
    InvalidRequest,
    UnexpectedStatus,
    CheckFailed,
}

impl From<HttpTransportErrorKind> for OutcomeErrorKind {
    fn from(kind: HttpTransportErrorKind) -> Self {
        match kind {
            HttpTransportErrorKind::Timeout => Self::Timeout,
            HttpTransportErrorKind::Request | HttpTransportErrorKind::BodyRead => Self::Transport,
            HttpTransportErrorKind::InvalidUrl
            | HttpTransportErrorKind::UnsupportedScheme
            | HttpTransportErrorKind::RequestBuild
            | HttpTransportErrorKind::HeaderName
            | HttpTransportErrorKind::HeaderValue => Self::InvalidRequest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOutcome {
    pub status: Option<u16>,
    pub latency: Duration,
    pub success: bool,
    pub error_kind: Option<OutcomeErrorKind>,
}

impl RequestOutcome {
    pub fn succeeded(status: u16, latency: Duration) -> Self {
        Self {
            status: Some(status),
            latency,
            success: true,
            error_kind: None,
        }
    }

    pub fn failed(status: Option<u16>, latency: Duration, kind: OutcomeErrorKind) -> Self {
        Self {
            status,
            latency,
            success: false,
            error_kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationOutcome {
    /// A request went out and was classified.
    Completed(RequestOutcome),
    /// The iteration failed before anything was sent.
    NotSent(OutcomeErrorKind),
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(r) if r.success)
    }

    pub fn error_kind(&self) -> Option<OutcomeErrorKind> {
        match self {
            Self::Completed(r) => r.error_kind,
            Self::NotSent(kind) => Some(*kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kinds_map_to_outcome_kinds() {
        assert_eq!(
            OutcomeErrorKind::from(HttpTransportErrorKind::Timeout),
            OutcomeErrorKind::Timeout
        );
        assert_eq!(
            OutcomeErrorKind::from(HttpTransportErrorKind::Request),
            OutcomeErrorKind::Transport
        );
        assert_eq!(
            OutcomeErrorKind::from(HttpTransportErrorKind::HeaderValue),
            OutcomeErrorKind::InvalidRequest
        );
        assert_eq!(OutcomeErrorKind::UnexpectedStatus.as_ref(), "unexpected_status");
    }

    #[test]
    fn unsent_iterations_are_failures() {
        let unsent = IterationOutcome::NotSent(OutcomeErrorKind::InvalidRequest);
        assert!(!unsent.is_success());
        assert_eq!(unsent.error_kind(), Some(OutcomeErrorKind::InvalidRequest));

        let ok = IterationOutcome::Completed(RequestOutcome::succeeded(202, Duration::ZERO));
        assert!(ok.is_success());
        assert_eq!(ok.error_kind(), None);
    }
}
