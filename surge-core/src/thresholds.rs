use std::fmt;

use surge_metrics::MetricKind;

use crate::collector::builtin_kind;
use crate::error::{Error, Result};

/// Thresholds declared for one metric key, e.g. `http_req_duration{scenario:load}`.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Lte,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Gte,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
}

impl ThresholdOp {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Lte => left <= right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    P(f64),
}

impl ThresholdAgg {
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Self::Count | Self::Rate),
            MetricKind::Rate => matches!(self, Self::Rate),
            MetricKind::Trend => !matches!(self, Self::Rate),
        }
    }
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Count => f.write_str("count"),
            Self::Rate => f.write_str("rate"),
            Self::P(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// One parsed assertion, ready for evaluation.
#[derive(Debug, Clone)]
pub struct Threshold {
    /// Metric key as declared, selector included.
    pub key: String,
    pub metric: String,
    pub selector: Vec<(String, String)>,
    /// Expression as declared.
    pub expression: String,
    pub expr: ThresholdExpr,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` never matches as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("missing operator in `{raw}`"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("malformed threshold `{raw}`"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}` in `{raw}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in `{raw}`"))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile out of range in `{raw}`"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in `{raw}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in `{raw}`"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// Splits `name{tag:value,...}` into the metric name and its tag selector.
pub fn parse_metric_key(raw: &str) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let raw = raw.trim();
    let Some(open) = raw.find('{') else {
        if raw.is_empty() || raw.contains('}') {
            return Err(format!("invalid metric key `{raw}`"));
        }
        return Ok((raw.to_string(), Vec::new()));
    };

    let name = raw[..open].trim();
    let inner = raw[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag selector in `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("missing metric name in `{raw}`"));
    }

    let mut selector = Vec::new();
    for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once(':')
            .or_else(|| pair.split_once('='))
            .ok_or_else(|| format!("invalid tag selector `{pair}` in `{raw}`"))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(format!("empty tag name in `{raw}`"));
        }
        selector.push((k.to_string(), v.to_string()));
    }

    Ok((name.to_string(), selector))
}

/// Parses every declared threshold. Any error is fatal to the run.
pub fn parse_thresholds(sets: &[ThresholdSet]) -> Result<Vec<Threshold>> {
    let mut out = Vec::new();

    for set in sets {
        let invalid = |reason: String| Error::InvalidThreshold {
            metric: set.metric.clone(),
            reason,
        };

        let (metric, selector) = parse_metric_key(&set.metric).map_err(invalid)?;
        if set.expressions.is_empty() {
            return Err(invalid("no expressions".to_string()));
        }

        for raw in &set.expressions {
            let expr = parse_threshold_expr(raw).map_err(invalid)?;
            if let Some(kind) = builtin_kind(&metric)
                && !expr.agg.applies_to(kind)
            {
                return Err(invalid(format!(
                    "aggregation `{}` does not apply to {kind} metric",
                    expr.agg
                )));
            }

            out.push(Threshold {
                key: set.metric.clone(),
                metric: metric.clone(),
                selector: selector.clone(),
                expression: raw.trim().to_string(),
                expr,
            });
        }
    }

    Ok(out)
}
