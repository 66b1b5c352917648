use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::{json, Value};

use crate::cost::CostSummary;

// Slack rejects payloads over 50 blocks, so the daily breakdown is capped.
const REPORT_MAX_DAYS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn color(self) -> &'static str {
        match self {
            Severity::Info => "#3B82F6",
            Severity::Warning => "#F59E0B",
            Severity::Error => "#EF4444",
        }
    }
}

#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn send_alert(&self, webhook: &str, message: &str, severity: Severity) -> Result<()> {
        self.post(webhook, &alert_payload(message, severity)).await
    }

    /// Budget rule: alert iff utilization is strictly over the threshold.
    /// Returns whether a message went out.
    pub async fn send_cost_alert(
        &self,
        webhook: &str,
        total_cost: f64,
        budget: f64,
        threshold_percent: f64,
    ) -> Result<bool> {
        if !should_alert(total_cost, budget, threshold_percent) {
            return Ok(false);
        }
        let percent = budget_percent(total_cost, budget);
        let message = format!(
            "⚠️ Budget Alert: You've used {percent:.1}% of your monthly budget (${total_cost:.2} of ${budget})"
        );
        self.send_alert(webhook, &message, Severity::Warning).await?;
        Ok(true)
    }

    /// Full Block Kit cost report: header, total, one line per recent day,
    /// and a context line flagging mock data.
    pub async fn send_cost_report(
        &self,
        webhook: &str,
        summary: &CostSummary,
        mocked: bool,
    ) -> Result<()> {
        self.post(webhook, &report_payload(summary, mocked)).await
    }

    async fn post(&self, webhook: &str, payload: &Value) -> Result<()> {
        let resp = self.client.post(webhook).json(payload).send().await?;
        if !resp.status().is_success() {
            bail!("Slack webhook returned {}", resp.status());
        }
        Ok(())
    }
}

pub fn budget_percent(total_cost: f64, budget: f64) -> f64 {
    (total_cost / budget) * 100.0
}

pub fn should_alert(total_cost: f64, budget: f64, threshold_percent: f64) -> bool {
    budget_percent(total_cost, budget) > threshold_percent
}

fn alert_payload(message: &str, severity: Severity) -> Value {
    json!({
        "attachments": [{
            "color": severity.color(),
            "title": "AWS Cost Alert",
            "text": message,
            "footer": "AWS Cost Dashboard",
            "ts": Utc::now().timestamp(),
        }]
    })
}

fn report_payload(summary: &CostSummary, mocked: bool) -> Value {
    let mut blocks = vec![
        json!({"type": "header", "text": {"type": "plain_text", "text": "💸 AWS Cost Report"}}),
        json!({"type": "section", "text": {"type": "mrkdwn",
            "text": format!("*Total Cost:* ${:.2} USD", summary.total_cost)}}),
        json!({"type": "divider"}),
    ];

    let start = summary.chart_data.len().saturating_sub(REPORT_MAX_DAYS);
    for day in &summary.chart_data[start..] {
        blocks.push(json!({"type": "section", "text": {"type": "mrkdwn",
            "text": format!("• {}: *${:.2}*", day.date, day.cost)}}));
    }

    blocks.push(json!({"type": "divider"}));
    blocks.push(json!({"type": "context", "elements": [{"type": "mrkdwn",
        "text": format!("⚙️ Mode: {}", if mocked { "Mock" } else { "Real" })}]}));

    json!({ "blocks": blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{DailyCost, CostSummary};

    #[test]
    fn alert_fires_only_strictly_over_threshold() {
        assert!(!should_alert(700.0, 1000.0, 70.0)); // exactly at threshold
        assert!(should_alert(700.01, 1000.0, 70.0));
        assert!(!should_alert(0.0, 1000.0, 70.0));
    }

    #[test]
    fn zero_budget_always_alerts() {
        // utilization of a zero budget is infinite
        assert!(should_alert(1.0, 0.0, 70.0));
    }

    #[test]
    fn alert_payload_carries_severity_color() {
        let payload = alert_payload("msg", Severity::Warning);
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], "#F59E0B");
        assert_eq!(attachment["title"], "AWS Cost Alert");
        assert_eq!(attachment["text"], "msg");
        assert!(attachment["ts"].is_i64());

        assert_eq!(alert_payload("x", Severity::Info)["attachments"][0]["color"], "#3B82F6");
        assert_eq!(alert_payload("x", Severity::Error)["attachments"][0]["color"], "#EF4444");
    }

    fn summary_of(days: usize) -> CostSummary {
        CostSummary {
            chart_data: (0..days)
                .map(|d| DailyCost { date: format!("2025-06-{:02}", d + 1), cost: 1.0 })
                .collect(),
            service_data: vec![],
            total_cost: days as f64,
            avg_cost: 1.0,
        }
    }

    #[test]
    fn report_payload_structure() {
        let payload = report_payload(&summary_of(2), true);
        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks.len(), 7); // header, total, divider, 2 days, divider, context
        assert!(blocks[6]["elements"][0]["text"].as_str().unwrap().contains("Mock"));
    }

    #[test]
    fn report_payload_caps_daily_lines() {
        let payload = report_payload(&summary_of(60), false);
        let blocks = payload["blocks"].as_array().unwrap();
        assert!(blocks.len() <= 5 + REPORT_MAX_DAYS);
        // most recent days survive the cap
        let last_day = &blocks[blocks.len() - 3]["text"]["text"];
        assert!(last_day.as_str().unwrap().contains("2025-06-60"));
    }
}
