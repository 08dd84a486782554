use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use surge_http::{HttpRequest, HttpResponse};
use surge_metrics::Observation;

/// Per-iteration facts a workload may use to build its request.
#[derive(Debug, Clone, Copy)]
pub struct IterationInfo<'a> {
    pub scenario: &'a str,
    /// 1-based VU id within the scenario.
    pub vu: u64,
    /// 0-based iteration number within the scenario.
    pub iteration: u64,
    pub base_url: &'a str,
}

/// Named checks and custom metric observations recorded while classifying a response.
#[derive(Debug, Clone, Default)]
pub struct Checks {
    results: Vec<(String, bool)>,
    custom: Vec<(String, Observation)>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a named check and returns `passed`.
    pub fn check(&mut self, name: impl Into<String>, passed: bool) -> bool {
        self.results.push((name.into(), passed));
        passed
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|(_, passed)| *passed)
    }

    pub fn results(&self) -> &[(String, bool)] {
        &self.results
    }

    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.custom.push((name.into(), Observation::Add(value)));
    }

    pub fn rate(&mut self, name: impl Into<String>, hit: bool) {
        self.custom.push((name.into(), Observation::Bool(hit)));
    }

    pub fn trend(&mut self, name: impl Into<String>, value: f64) {
        self.custom.push((name.into(), Observation::Value(value)));
    }

    pub fn custom(&self) -> &[(String, Observation)] {
        &self.custom
    }
}

/// The caller-provided half of an iteration: what to send and how to judge the answer.
pub trait Workload: Send + Sync {
    /// Builds the iteration's request. A URL starting with `/` is resolved against the base URL.
    fn request(&self, info: &IterationInfo<'_>) -> Result<HttpRequest, String>;

    /// Records named checks for a response. With no checks, any 2xx response is a success.
    fn check(&self, _response: &HttpResponse, _latency: Duration, _checks: &mut Checks) {}
}

impl<F> Workload for F
where
    F: Fn(&IterationInfo<'_>) -> Result<HttpRequest, String> + Send + Sync,
{
    fn request(&self, info: &IterationInfo<'_>) -> Result<HttpRequest, String> {
        self(info)
    }
}

/// Workloads addressable by name from a scenario's `exec`.
#[derive(Clone, Default)]
pub struct Workloads {
    by_name: HashMap<String, Arc<dyn Workload>>,
}

impl Workloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, workload: impl Workload + 'static) {
        self.by_name.insert(name.into(), Arc::new(workload));
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, workload: impl Workload + 'static) -> Self {
        self.insert(name, workload);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workload>> {
        self.by_name.get(name).cloned()
    }

    /// Sorted workload names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Workloads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workloads")
            .field("names", &self.names())
            .finish()
    }
}

/// Joins a workload URL with the base URL when it is a path.
pub(crate) fn resolve_url(base_url: &str, url: &str) -> String {
    if url.starts_with('/') {
        format!("{}{url}", base_url.trim_end_matches('/'))
    } else {
        url.to_string()
    }
}
