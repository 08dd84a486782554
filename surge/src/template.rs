use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use surge_core::{
    Checks, HttpRequest, HttpResponse, IterationInfo, Method, Workload, Workloads, builtin_kind,
};

use crate::scenario_yaml::{ChecksYaml, WorkloadYaml};

/// Per-iteration values a template can reference as `${name}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
enum Var {
    /// Fresh v4 UUID for every occurrence.
    Uuid,
    /// Unix time in milliseconds.
    Timestamp,
    /// RFC 3339 wall-clock time.
    Date,
    Vu,
    Iter,
    Scenario,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Var),
}

/// A string with `${var}` placeholders, split once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start + 2..].find('}') else {
                anyhow::bail!("unterminated placeholder in `{raw}`");
            };
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let name = &rest[start + 2..start + 2 + len];
            let var = name
                .trim()
                .parse::<Var>()
                .map_err(|_| anyhow::anyhow!("unknown placeholder `${{{name}}}` in `{raw}`"))?;
            segments.push(Segment::Var(var));
            rest = &rest[start + 2 + len + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub(crate) fn render(&self, info: &IterationInfo<'_>) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(Var::Uuid) => out.push_str(&uuid::Uuid::new_v4().to_string()),
                Segment::Var(Var::Timestamp) => {
                    let ms = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis())
                        .unwrap_or(0);
                    out.push_str(&ms.to_string());
                }
                Segment::Var(Var::Date) => {
                    out.push_str(&humantime::format_rfc3339_millis(SystemTime::now()).to_string());
                }
                Segment::Var(Var::Vu) => out.push_str(&info.vu.to_string()),
                Segment::Var(Var::Iter) => out.push_str(&info.iteration.to_string()),
                Segment::Var(Var::Scenario) => out.push_str(info.scenario),
            }
        }
        out
    }
}

/// Response checks declared in YAML.
#[derive(Debug, Clone, Default)]
struct ResponseChecks {
    status: Vec<u16>,
    json_fields: Vec<String>,
    max_duration: Option<Duration>,
}

impl From<ChecksYaml> for ResponseChecks {
    fn from(c: ChecksYaml) -> Self {
        Self {
            status: c.status,
            json_fields: c.json_fields,
            max_duration: c.max_duration.map(|d| d.into_inner()),
        }
    }
}

impl ResponseChecks {
    fn run(&self, response: &HttpResponse, latency: Duration, checks: &mut Checks) {
        match self.status.as_slice() {
            [] => {}
            [one] => {
                checks.check(format!("status is {one}"), response.status == *one);
            }
            many => {
                let list = many
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                checks.check(format!("status in [{list}]"), many.contains(&response.status));
            }
        }

        if !self.json_fields.is_empty() {
            let body: Option<serde_json::Value> = response
                .body_utf8()
                .and_then(|b| serde_json::from_str(b).ok());
            for field in &self.json_fields {
                let present = body
                    .as_ref()
                    .and_then(|v| v.get(field))
                    .is_some_and(|v| !v.is_null());
                checks.check(format!("has {field}"), present);
            }
        }

        if let Some(max) = self.max_duration {
            checks.check(
                format!("duration < {}", humantime::format_duration(max)),
                latency < max,
            );
        }
    }
}

/// Names of the custom series a workload writes per judged response.
#[derive(Debug, Clone, Default)]
struct CustomMetrics {
    latency_trend: Option<String>,
    success_counter: Option<String>,
    error_rate: Option<String>,
}

impl CustomMetrics {
    fn names(&self) -> impl Iterator<Item = &str> {
        [&self.latency_trend, &self.success_counter, &self.error_rate]
            .into_iter()
            .filter_map(|n| n.as_deref())
    }

    fn record(&self, success: bool, latency: Duration, checks: &mut Checks) {
        if let Some(name) = &self.latency_trend {
            checks.trend(name.clone(), latency.as_secs_f64() * 1000.0);
        }
        if success && let Some(name) = &self.success_counter {
            checks.counter(name.clone(), 1);
        }
        if let Some(name) = &self.error_rate {
            checks.rate(name.clone(), !success);
        }
    }
}

/// A workload described in YAML: one templated request plus optional checks.
#[derive(Debug, Clone)]
pub(crate) struct TemplateWorkload {
    method: Method,
    base_url: Option<String>,
    url: Template,
    headers: Vec<(String, Template)>,
    body: Option<Template>,
    timeout: Option<Duration>,
    checks: Option<ResponseChecks>,
    metrics: CustomMetrics,
}

impl TemplateWorkload {
    pub(crate) fn from_yaml(w: WorkloadYaml) -> anyhow::Result<Self> {
        let method = Method::from_bytes(w.method.trim().to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid method `{}`", w.method))?;

        let headers = w
            .headers
            .into_iter()
            .map(|(k, v)| Template::parse(&v).map(|t| (k, t)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let declared = w.metrics.unwrap_or_default();
        let metrics = CustomMetrics {
            latency_trend: w.latency_metric,
            success_counter: declared.success_counter,
            error_rate: declared.error_rate,
        };
        if let Some(name) = metrics.names().find(|n| builtin_kind(n).is_some()) {
            anyhow::bail!("custom metric `{name}` clashes with a built-in metric");
        }

        Ok(Self {
            method,
            base_url: w.base_url,
            url: Template::parse(&w.path)?,
            headers,
            body: w.body.as_deref().map(Template::parse).transpose()?,
            timeout: w.timeout.map(|d| d.into_inner()),
            checks: w.checks.map(ResponseChecks::from),
            metrics,
        })
    }
}

impl Workload for TemplateWorkload {
    fn request(&self, info: &IterationInfo<'_>) -> Result<HttpRequest, String> {
        let mut url = self.url.render(info);
        if let Some(base) = &self.base_url
            && url.starts_with('/')
        {
            url = format!("{}{url}", base.trim_end_matches('/'));
        }
        let mut req = HttpRequest::new(self.method.clone(), url);
        for (name, value) in &self.headers {
            req = req.with_header(name.clone(), value.render(info));
        }
        if let Some(body) = &self.body {
            req = req.with_body(body.render(info));
        }
        if let Some(timeout) = self.timeout {
            req = req.with_timeout(timeout);
        }
        Ok(req)
    }

    fn check(&self, response: &HttpResponse, latency: Duration, checks: &mut Checks) {
        if let Some(c) = &self.checks {
            c.run(response, latency, checks);
        }
        // Same rule the engine applies when it classifies the response.
        let success = if checks.is_empty() {
            response.is_success()
        } else {
            checks.all_passed()
        };
        self.metrics.record(success, latency, checks);
    }
}

pub(crate) fn build_workloads(raw: BTreeMap<String, WorkloadYaml>) -> anyhow::Result<Workloads> {
    let mut out = Workloads::new();
    for (name, w) in raw {
        let workload =
            TemplateWorkload::from_yaml(w).with_context(|| format!("invalid workload `{name}`"))?;
        out.insert(name, workload);
    }
    Ok(out)
}
