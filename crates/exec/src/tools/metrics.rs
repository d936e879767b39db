//! `pulse_metrics`: history, baselines and patterns from the metrics store,
//! sensor and I/O counters from agent-reported hosts.

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{bad_args, json_result};
use crate::executor::ToolContext;
use crate::model::{HostInfo, MetricPoint};
use crate::state::Snapshot;

const TOOL: &str = "pulse_metrics";
const TYPES: &[&str] = &["performance", "temperatures", "network", "diskio", "disks", "baselines", "patterns"];
const MAX_METRIC_POINTS: usize = 120;
const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct MetricsParams {
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    period: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    health: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    offset: Option<i64>,
}

impl MetricsParams {
    /// `(label, hours)`; anything but `7d` means a day.
    fn period(&self) -> (&'static str, u32) {
        match self.period.as_deref() {
            Some("7d") => ("7d", 7 * 24),
            _ => ("24h", 24),
        }
    }

    fn page(&self) -> (usize, usize) {
        let limit = self.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(DEFAULT_LIMIT);
        let offset = self.offset.filter(|o| *o > 0).map(|o| o as usize).unwrap_or(0);
        (limit, offset)
    }

    fn host_matches(&self, host: &HostInfo) -> bool {
        self.host
            .as_deref()
            .is_none_or(|want| host.hostname == want || host.id == want)
    }
}

pub struct MetricsTool;

#[async_trait]
impl Tool<ToolContext> for MetricsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Performance metrics, baselines and sensor data: CPU/memory history, temperatures, \
                          network and disk I/O counters, physical disk health, learned baselines and \
                          detected patterns."
                .into(),
            params: vec![
                ToolParam::required("type", "Metric type to query").one_of(TYPES),
                ToolParam::optional("resource_id", "Filter by resource ID (performance, baselines)"),
                ToolParam::optional("resource_type", "Filter by resource type: vm, container, node"),
                ToolParam::optional("host", "Filter by hostname (temperatures, network, diskio, disks)"),
                ToolParam::optional("period", "Time period for performance").one_of(&["24h", "7d"]),
                ToolParam::optional("health", "Filter disks by health: PASSED, FAILED, UNKNOWN"),
                ToolParam::optional("limit", "Maximum number of results").typed(ParamType::Integer),
                ToolParam::optional("offset", "Number of results to skip").typed(ParamType::Integer),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Read,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().state.is_some() || cx.providers().metrics.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: MetricsParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let snapshot = cx.providers().snapshot();
        match params.kind.as_deref().unwrap_or_default() {
            "performance" => performance(cx, &snapshot, &params),
            "temperatures" => temperatures(&snapshot, &params),
            "network" => host_counters(&snapshot, &params, "interfaces", |h| json!(h.network), "network statistics"),
            "diskio" => host_counters(&snapshot, &params, "devices", |h| json!(h.disk_io), "disk I/O statistics"),
            "disks" => disks(cx, &snapshot, &params),
            "baselines" => baselines(cx, &snapshot, &params),
            "patterns" => patterns(cx),
            other => CallToolResult::error(format!(
                "unknown type: {other}. Use: performance, temperatures, network, diskio, disks, baselines, patterns"
            )),
        }
    }
}

/// `(id, type)` for every node and guest, sorted by id.
fn resource_ids(snapshot: &Snapshot) -> Vec<(String, &'static str)> {
    let mut ids: Vec<(String, &'static str)> = snapshot
        .nodes
        .iter()
        .map(|n| (n.id.clone(), "node"))
        .chain(snapshot.vms.iter().map(|g| (g.id.clone(), "vm")))
        .chain(snapshot.containers.iter().map(|g| (g.id.clone(), "container")))
        .collect();
    ids.sort();
    ids
}

/// Average into at most `target` buckets, each stamped with its midpoint.
pub(crate) fn downsample(mut points: Vec<MetricPoint>, target: usize) -> Vec<MetricPoint> {
    if points.len() <= target || target == 0 {
        return points;
    }
    points.sort_by_key(|p| p.timestamp);
    let bucket = (points.len() / target).max(1);
    points
        .chunks(bucket)
        .take(target)
        .map(|chunk| {
            let n = chunk.len() as f64;
            MetricPoint {
                timestamp: chunk[chunk.len() / 2].timestamp,
                cpu: chunk.iter().map(|p| p.cpu).sum::<f64>() / n,
                memory: chunk.iter().map(|p| p.memory).sum::<f64>() / n,
                disk: chunk.iter().map(|p| p.disk).sum::<f64>() / n,
            }
        })
        .collect()
}

fn performance(cx: &ToolContext, snapshot: &Snapshot, params: &MetricsParams) -> CallToolResult {
    let resource_type = params
        .resource_type
        .as_deref()
        .map(|t| t.trim().to_lowercase())
        .map(|t| if t == "system-container" { "container".to_string() } else { t });
    if let Some(t) = resource_type.as_deref() {
        if !["vm", "container", "node"].contains(&t) {
            return CallToolResult::error(format!("invalid resource_type: {t}. Use vm, container, or node"));
        }
    }
    let Some(history) = cx.providers().metrics.as_ref() else {
        return CallToolResult::text("Metrics history not available. The system may still be collecting data.");
    };
    let (period, hours) = params.period();

    if let Some(resource_id) = params.resource_id.as_deref() {
        let points = history.resource_metrics(resource_id, hours);
        let original = points.len();
        let points = downsample(points, MAX_METRIC_POINTS);
        let mut response = json!({"period": period, "resource_id": resource_id, "points": points});
        if points_were_cut(original, &response) {
            response["original_count"] = json!(original);
            response["downsampled"] = json!(true);
        }
        return json_result(response);
    }

    let (limit, offset) = params.page();
    let ids: Vec<_> = resource_ids(snapshot)
        .into_iter()
        .filter(|(_, t)| resource_type.as_deref().is_none_or(|want| want == *t))
        .collect();
    let mut summary = Map::new();
    for (id, _) in ids.iter().skip(offset).take(limit) {
        if let Some(s) = history.metrics_summary(id, hours) {
            summary.insert(id.clone(), json!(s));
        }
    }
    json_result(json!({
        "period": period,
        "summary": summary,
        "pagination": {"total": ids.len(), "limit": limit, "offset": offset},
    }))
}

fn points_were_cut(original: usize, response: &Value) -> bool {
    response["points"].as_array().is_some_and(|p| p.len() < original)
}

fn temperatures(snapshot: &Snapshot, params: &MetricsParams) -> CallToolResult {
    let mut readings = Vec::new();
    for node in snapshot.nodes.iter().filter(|n| params.host.as_deref().is_none_or(|h| n.name == h)) {
        if let Some(cpu) = node.cpu_temperature {
            readings.push(json!({"host": node.name, "sensors": {"cpu": cpu}}));
        }
    }
    for host in snapshot.hosts.iter().filter(|h| params.host_matches(h)) {
        let disks: Map<String, Value> = host
            .disks
            .iter()
            .filter_map(|d| d.temperature.map(|t| (d.device.clone(), json!(t))))
            .collect();
        if host.temperatures.is_empty() && disks.is_empty() {
            continue;
        }
        readings.push(json!({"host": host.hostname, "sensors": host.temperatures, "disks": disks}));
    }
    if readings.is_empty() {
        return CallToolResult::text(
            "No temperature data available. Ensure Pulse unified agents are installed on hosts and lm-sensors is available.",
        );
    }
    json_result(json!({"total": readings.len(), "hosts": readings}))
}

fn host_counters(
    snapshot: &Snapshot,
    params: &MetricsParams,
    key: &str,
    pick: impl Fn(&HostInfo) -> Value,
    what: &str,
) -> CallToolResult {
    let hosts: Vec<Value> = snapshot
        .hosts
        .iter()
        .filter(|h| params.host_matches(h))
        .filter_map(|h| {
            let counters = pick(h);
            let empty = counters.as_array().is_none_or(|a| a.is_empty());
            (!empty).then(|| json!({"host": h.hostname, key: counters}))
        })
        .collect();
    if hosts.is_empty() {
        return CallToolResult::text(format!(
            "No {what} available. Ensure Pulse agents are reporting {what}."
        ));
    }
    json_result(json!({"total": hosts.len(), "hosts": hosts}))
}

fn disks(cx: &ToolContext, snapshot: &Snapshot, params: &MetricsParams) -> CallToolResult {
    let hosts = match cx.providers().disk_health.as_ref() {
        Some(p) => p.hosts(),
        None => snapshot.hosts.clone(),
    };
    let (limit, offset) = params.page();
    let health = params.health.as_deref().map(str::to_uppercase);
    let all: Vec<Value> = hosts
        .iter()
        .filter(|h| params.host_matches(h))
        .flat_map(|h| h.disks.iter().map(move |d| (h, d)))
        .filter(|(_, d)| {
            health.as_deref().is_none_or(|want| {
                let have = if d.health.is_empty() { "UNKNOWN" } else { d.health.as_str() };
                have.eq_ignore_ascii_case(want)
            })
        })
        .map(|(h, d)| {
            json!({
                "host": h.hostname,
                "device": d.device,
                "model": d.model,
                "health": d.health,
                "temperature": d.temperature,
                "wearout": d.wearout,
            })
        })
        .collect();
    if all.is_empty() {
        return CallToolResult::text(
            "No physical disk data available. Physical disk information is collected from Proxmox nodes.",
        );
    }
    let total = all.len();
    let page: Vec<Value> = all.into_iter().skip(offset).take(limit).collect();
    json_result(json!({"disks": page, "total": total, "limit": limit, "offset": offset}))
}

fn baselines(cx: &ToolContext, snapshot: &Snapshot, params: &MetricsParams) -> CallToolResult {
    let Some(history) = cx.providers().metrics.as_ref() else {
        return CallToolResult::text(
            "Baseline data not available. The system needs time to learn normal behavior patterns.",
        );
    };
    let ids: Vec<String> = match params.resource_id.as_deref() {
        Some(id) => vec![id.to_string()],
        None => {
            let (limit, offset) = params.page();
            resource_ids(snapshot)
                .into_iter()
                .filter(|(_, t)| params.resource_type.as_deref().is_none_or(|want| want == *t))
                .skip(offset)
                .take(limit)
                .map(|(id, _)| id)
                .collect()
        }
    };

    let mut baselines = Map::new();
    for id in ids {
        let learned = history.baselines(&id);
        if learned.is_empty() {
            continue;
        }
        let metrics: Map<String, Value> = learned.into_iter().map(|(name, b)| (name, json!(b))).collect();
        baselines.insert(id, Value::Object(metrics));
    }
    json_result(json!({"total": baselines.len(), "baselines": baselines}))
}

fn patterns(cx: &ToolContext) -> CallToolResult {
    let Some(history) = cx.providers().metrics.as_ref() else {
        return CallToolResult::text("Pattern detection not available. The system needs more historical data.");
    };
    let patterns = history.patterns();
    json_result(json!({"total": patterns.len(), "patterns": patterns}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn points(n: usize) -> Vec<MetricPoint> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| MetricPoint {
                timestamp: start + Duration::minutes(i as i64),
                cpu: i as f64,
                memory: 50.0,
                disk: 0.0,
            })
            .collect()
    }

    #[test]
    fn downsample_keeps_short_series() {
        assert_eq!(downsample(points(10), 120).len(), 10);
    }

    #[test]
    fn downsample_averages_buckets() {
        let out = downsample(points(1000), 100);
        assert_eq!(out.len(), 100);
        // First bucket covers cpu 0..=9.
        assert!((out[0].cpu - 4.5).abs() < 1e-9);
        assert_eq!(out[0].memory, 50.0);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn period_defaults_to_a_day() {
        let mut params = MetricsParams::default();
        assert_eq!(params.period(), ("24h", 24));
        params.period = Some("7d".into());
        assert_eq!(params.period(), ("7d", 168));
    }
}
