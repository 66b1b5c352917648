use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCost {
    pub date: String,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCost {
    pub name: String,
    pub value: f64,
}

/// Canonical shape every report format normalizes into. `chart_data` keeps the
/// input's day order; `service_data` is sorted by descending cost so the
/// dashboard's breakdown is stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub chart_data: Vec<DailyCost>,
    pub service_data: Vec<ServiceCost>,
    pub total_cost: f64,
    pub avg_cost: f64,
}

/// Normalize a raw cost report. Three shapes are recognized, tried in order:
/// Cost Explorer (`ResultsByTime`), the mock report (`details`), and the
/// generic breakdown (`daily_costs` + `service_breakdown`). An unrecognized
/// document falls through the last branch and comes out as all zeros.
pub fn parse_cost_data(raw: &Value) -> CostSummary {
    if let Some(results) = raw.get("ResultsByTime").and_then(Value::as_array) {
        let mut chart = Vec::with_capacity(results.len());
        let mut services: HashMap<String, f64> = HashMap::new();

        for result in results {
            chart.push(DailyCost {
                date: period_start(result),
                cost: metric_amount(result.get("Total")),
            });

            if let Some(groups) = result.get("Groups").and_then(Value::as_array) {
                for group in groups {
                    // first key is the service name
                    let name = group
                        .pointer("/Keys/0")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    *services.entry(name.to_string()).or_insert(0.0) +=
                        metric_amount(group.get("Metrics"));
                }
            }
        }

        return summarize(chart, sorted_services(services));
    }

    if let Some(details) = raw.get("details").and_then(Value::as_array) {
        let chart = details
            .iter()
            .map(|entry| DailyCost {
                date: period_start(entry),
                cost: amount(entry.pointer("/Total/BlendedCost/Amount")),
            })
            .collect();
        // the mock report carries no per-service breakdown
        return summarize(chart, Vec::new());
    }

    let chart = raw
        .get("daily_costs")
        .and_then(Value::as_array)
        .map(|days| {
            days.iter()
                .map(|entry| DailyCost {
                    date: entry
                        .get("date")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    cost: amount(entry.get("total_cost")),
                })
                .collect()
        })
        .unwrap_or_default();

    let services = raw
        .get("service_breakdown")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(name, cost)| (name.clone(), amount(Some(cost))))
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();

    summarize(chart, sorted_services(services))
}

fn summarize(chart: Vec<DailyCost>, services: Vec<ServiceCost>) -> CostSummary {
    let total: f64 = chart.iter().map(|d| d.cost).sum();
    let avg = total / chart.len().max(1) as f64;
    CostSummary {
        chart_data: chart,
        service_data: services,
        total_cost: total,
        avg_cost: avg,
    }
}

fn sorted_services(services: HashMap<String, f64>) -> Vec<ServiceCost> {
    let mut out: Vec<ServiceCost> = services
        .into_iter()
        .map(|(name, value)| ServiceCost { name, value })
        .collect();
    out.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
    out
}

fn period_start(entry: &Value) -> String {
    entry
        .pointer("/TimePeriod/Start")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Cost Explorer reports blended cost for most accounts and unblended for
/// some consolidated-billing setups; take whichever is present.
fn metric_amount(metrics: Option<&Value>) -> f64 {
    let Some(metrics) = metrics else { return 0.0 };
    metrics
        .pointer("/BlendedCost/Amount")
        .or_else(|| metrics.pointer("/UnblendedCost/Amount"))
        .map(|v| amount(Some(v)))
        .unwrap_or(0.0)
}

// Amounts arrive as JSON strings or numbers; anything else counts as zero.
fn amount(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cost_explorer_shape_with_groups() {
        let raw = json!({
            "ResultsByTime": [
                {
                    "TimePeriod": {"Start": "2025-06-01", "End": "2025-06-02"},
                    "Total": {"BlendedCost": {"Amount": "10.50", "Unit": "USD"}},
                    "Groups": [
                        {"Keys": ["AmazonEC2"], "Metrics": {"BlendedCost": {"Amount": "8.00"}}},
                        {"Keys": ["AmazonS3"], "Metrics": {"BlendedCost": {"Amount": "2.50"}}}
                    ]
                },
                {
                    "TimePeriod": {"Start": "2025-06-02", "End": "2025-06-03"},
                    "Total": {"BlendedCost": {"Amount": "4.50", "Unit": "USD"}},
                    "Groups": [
                        {"Keys": ["AmazonEC2"], "Metrics": {"BlendedCost": {"Amount": "4.50"}}}
                    ]
                }
            ]
        });

        let summary = parse_cost_data(&raw);
        assert_eq!(summary.chart_data.len(), 2);
        assert_eq!(summary.chart_data[0].date, "2025-06-01");
        assert!((summary.total_cost - 15.0).abs() < 1e-9);
        assert!((summary.avg_cost - 7.5).abs() < 1e-9);

        // services aggregate across periods, largest first
        assert_eq!(summary.service_data[0].name, "AmazonEC2");
        assert!((summary.service_data[0].value - 12.5).abs() < 1e-9);
        assert_eq!(summary.service_data[1].name, "AmazonS3");
    }

    #[test]
    fn unblended_cost_is_a_fallback() {
        let raw = json!({
            "ResultsByTime": [{
                "TimePeriod": {"Start": "2025-06-01", "End": "2025-06-02"},
                "Total": {"UnblendedCost": {"Amount": "3.25"}}
            }]
        });
        let summary = parse_cost_data(&raw);
        assert!((summary.total_cost - 3.25).abs() < 1e-9);
    }

    #[test]
    fn details_shape_has_no_service_breakdown() {
        let raw = json!({
            "total_cost": 10.23,
            "details": [
                {"TimePeriod": {"Start": "2025-10-30", "End": "2025-10-31"},
                 "Total": {"BlendedCost": {"Amount": "10.23", "Unit": "USD"}}}
            ]
        });

        let summary = parse_cost_data(&raw);
        assert_eq!(summary.chart_data.len(), 1);
        assert!(summary.service_data.is_empty());
        assert!((summary.total_cost - 10.23).abs() < 1e-9);
        assert!((summary.avg_cost - 10.23).abs() < 1e-9);
    }

    #[test]
    fn generic_shape_with_breakdown() {
        let raw = json!({
            "daily_costs": [
                {"date": "2025-06-01", "total_cost": "1.00"},
                {"date": "2025-06-02", "total_cost": 2.0}
            ],
            "service_breakdown": {"AmazonRDS": "2.5", "AWSLambda": 0.5}
        });

        let summary = parse_cost_data(&raw);
        assert!((summary.total_cost - 3.0).abs() < 1e-9);
        assert!((summary.avg_cost - 1.5).abs() < 1e-9);
        assert_eq!(summary.service_data[0].name, "AmazonRDS");
        assert!((summary.service_data[1].value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_document_normalizes_to_zeros() {
        let summary = parse_cost_data(&json!({"whatever": true}));
        assert!(summary.chart_data.is_empty());
        assert!(summary.service_data.is_empty());
        assert_eq!(summary.total_cost, 0.0);
        // divisor floors at 1, so an empty series averages to zero
        assert_eq!(summary.avg_cost, 0.0);
    }

    #[test]
    fn non_numeric_amounts_count_as_zero() {
        let raw = json!({
            "daily_costs": [{"date": "2025-06-01", "total_cost": "n/a"}]
        });
        assert_eq!(parse_cost_data(&raw).total_cost, 0.0);
    }
}
