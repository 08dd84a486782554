use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

/// A whole scenario document: shared request defaults, named workloads, scenarios and thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioDocYaml {
    #[serde(default)]
    pub base_url: Option<String>,

    /// Headers sent with every request unless a workload sets them itself.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub workloads: BTreeMap<String, WorkloadYaml>,

    pub scenarios: Vec<ScenarioYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct WorkloadYaml {
    #[serde(default = "default_method")]
    pub method: String,

    /// Absolute URL, or a path joined onto the base URL.
    pub path: String,

    /// Base URL for this workload's paths, in place of the run-wide one.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default, deserialize_with = "deserialize_tags")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub checks: Option<ChecksYaml>,

    /// Custom trend that receives every response latency in milliseconds.
    #[serde(default)]
    pub latency_metric: Option<String>,

    #[serde(default)]
    pub metrics: Option<MetricsYaml>,
}

/// Custom series fed from every response the workload judges.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct MetricsYaml {
    /// Counter incremented once per successful response.
    #[serde(default)]
    pub success_counter: Option<String>,

    /// Rate of unsuccessful responses.
    #[serde(default)]
    pub error_rate: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ChecksYaml {
    /// Accepted status codes.
    #[serde(default)]
    pub status: Vec<u16>,

    /// Top-level JSON fields the response body must carry (non-null).
    #[serde(default)]
    pub json_fields: Vec<String>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    /// Scenario name (metrics scenario tag).
    pub name: Option<String>,

    /// Workload name.
    pub exec: Option<String>,

    /// Scenario-level tags.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,

    /// Executor kind: constant-vus | ramping-vus | ramping-arrival-rate
    pub executor: Option<String>,

    #[serde(default)]
    pub start_time: Option<YamlDuration>,
    #[serde(default)]
    pub think_time: Option<YamlDuration>,

    pub vus: Option<u64>,
    pub iterations: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    // ramping-vus
    #[serde(rename = "startVUs")]
    pub start_vus: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    // ramping-arrival-rate
    pub start_rate: Option<u64>,

    #[serde(default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(rename = "preAllocatedVUs")]
    pub pre_allocated_vus: Option<u64>,

    #[serde(rename = "maxVUs")]
    pub max_vus: Option<u64>,

    /// How long a grown worker may sit idle before it is retired.
    #[serde(default)]
    pub idle_timeout: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 30s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// A scenario document lowered into engine inputs.
#[derive(Debug, Clone)]
pub(crate) struct LoadedDoc {
    pub base_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub request_timeout: Option<Duration>,
    pub workloads: BTreeMap<String, WorkloadYaml>,
    pub scenarios: Vec<surge_core::ScenarioOptions>,
    pub thresholds: Vec<surge_core::ThresholdSet>,
}

pub(crate) async fn load_scenario_doc(path: &Path) -> anyhow::Result<LoadedDoc> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario YAML: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main");

    parse_scenario_doc(&bytes, default_name)
        .with_context(|| format!("failed to parse YAML: {}", path.display()))
}

pub(crate) fn parse_scenario_doc(bytes: &[u8], default_name: &str) -> anyhow::Result<LoadedDoc> {
    let doc: ScenarioDocYaml = serde_yaml::from_slice(bytes)?;

    let only_workload = (doc.workloads.len() == 1)
        .then(|| doc.workloads.keys().next().cloned())
        .flatten();

    let total = doc.scenarios.len();
    let scenarios = doc
        .scenarios
        .into_iter()
        .enumerate()
        .map(|(idx, scenario)| {
            let default_name = if total <= 1 {
                default_name.to_string()
            } else {
                format!("scenario_{}", idx + 1)
            };
            scenario_yaml_into_options(scenario, default_name, only_workload.as_deref())
        })
        .collect();

    Ok(LoadedDoc {
        base_url: doc.base_url,
        headers: doc.headers.into_iter().collect(),
        request_timeout: doc.request_timeout.map(YamlDuration::into_inner),
        workloads: doc.workloads,
        scenarios,
        thresholds: parse_thresholds_map(doc.thresholds),
    })
}

fn scenario_yaml_into_options(
    scenario: ScenarioYaml,
    default_name: String,
    only_workload: Option<&str>,
) -> surge_core::ScenarioOptions {
    let ScenarioYaml {
        name,
        exec,
        tags,
        executor,
        start_time,
        think_time,
        vus,
        iterations,
        duration,
        start_vus,
        stages,
        start_rate,
        time_unit,
        pre_allocated_vus,
        max_vus,
        idle_timeout,
    } = scenario;

    // A document with a single workload does not need to name it in every scenario.
    let exec = exec.or_else(|| only_workload.map(str::to_string));

    surge_core::ScenarioOptions {
        name: name.unwrap_or(default_name),
        exec,
        tags: tags.into_iter().collect(),
        executor,
        start_time: start_time.map(YamlDuration::into_inner),
        think_time: think_time.map(YamlDuration::into_inner),
        vus,
        iterations,
        duration: duration.map(YamlDuration::into_inner),

        start_vus,
        stages: stages
            .into_iter()
            .map(|s| surge_core::Stage::new(s.duration.into_inner(), s.target))
            .collect(),

        start_rate,
        time_unit: time_unit.map(YamlDuration::into_inner),
        pre_allocated_vus,
        max_vus,
        idle_timeout: idle_timeout.map(YamlDuration::into_inner),
    }
}

fn parse_thresholds_map(raw: BTreeMap<String, ThresholdExprYaml>) -> Vec<surge_core::ThresholdSet> {
    raw.into_iter()
        .map(|(metric, v)| surge_core::ThresholdSet {
            metric,
            expressions: match v {
                ThresholdExprYaml::One(s) => vec![s],
                ThresholdExprYaml::Many(v) => v,
            },
        })
        .collect()
}
