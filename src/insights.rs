use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::{fs, io::{AsyncBufReadExt, AsyncWriteExt}, sync::Mutex};

use crate::cost::CostSummary;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";

/// Thin client for the Google generative-language API.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateReq<'a> {
    contents: Vec<Content<'a>>,
}
#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}
#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}
#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}
#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartOwned>,
}
#[derive(Deserialize)]
struct PartOwned {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self { client, base_url: GEMINI_BASE.to_string(), api_key, model }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let req = GenerateReq {
            contents: vec![Content { role: "user", parts: vec![Part { text: prompt }] }],
        };
        let resp = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<GenerateResp>()
            .await?;

        let text: String = resp
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(anyhow!("generative API returned no text"));
        }
        Ok(text)
    }
}

pub fn insights_prompt(summary: &CostSummary) -> String {
    let recent = recent_days(summary, 7);
    format!(
        "Analyze these AWS cost data and provide actionable insights:\n\
Total Cost: ${:.2}\n\
Average Daily Cost: ${:.2}\n\
Service Breakdown: {}\n\
Recent Daily Costs: {}\n\n\
Provide:\n\
1. Key cost drivers\n\
2. Cost optimization recommendations\n\
3. Trend analysis\n\
4. Budget alert if needed\n\n\
Keep response concise and actionable.",
        summary.total_cost,
        summary.avg_cost,
        serde_json::to_string(&summary.service_data).unwrap_or_default(),
        serde_json::to_string(recent).unwrap_or_default(),
    )
}

pub fn anomalies_prompt(summary: &CostSummary) -> String {
    let recent = recent_days(summary, 7);
    let avg_recent = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(|d| d.cost).sum::<f64>() / recent.len() as f64
    };
    format!(
        "Identify cost anomalies in this AWS data:\n\
Recent 7-day average: ${avg_recent:.2}\n\
Daily breakdown: {}\n\n\
Identify any spikes or unusual patterns and suggest remediation steps.",
        serde_json::to_string(recent).unwrap_or_default(),
    )
}

fn recent_days(summary: &CostSummary, n: usize) -> &[crate::cost::DailyCost] {
    let start = summary.chart_data.len().saturating_sub(n);
    &summary.chart_data[start..]
}

/// Append-only JSONL cache of generated commentary, keyed by model + prompt.
/// A report that has not changed costs nothing to summarize twice.
pub struct InsightsCache {
    path: PathBuf,
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl InsightsCache {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let mut map = HashMap::new();
        if let Ok(f) = fs::File::open(&path).await {
            let mut lines = tokio::io::BufReader::new(f).lines();
            while let Some(line) = lines.next_line().await? {
                if let Ok((k, v)) = serde_json::from_str::<(String, String)>(&line) {
                    map.insert(k, v);
                }
            }
        }
        Ok(Self { path, map: Arc::new(Mutex::new(map)) })
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.map.lock().await.get(key).cloned()
    }

    pub async fn put(&self, key: &str, val: &str) -> Result<()> {
        {
            self.map.lock().await.insert(key.to_string(), val.to_string());
        }
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        let line = serde_json::to_string(&(key, val))?;
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        Ok(())
    }
}

pub fn cache_key(model: &str, prompt: &str) -> String {
    let mut h = Sha256::new();
    h.update(model.as_bytes());
    h.update(b"\x1f");
    h.update(prompt.as_bytes());
    format!("{:x}", h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{DailyCost, ServiceCost};

    fn summary() -> CostSummary {
        CostSummary {
            chart_data: (1..=10)
                .map(|d| DailyCost { date: format!("2025-06-{d:02}"), cost: d as f64 })
                .collect(),
            service_data: vec![ServiceCost { name: "AmazonEC2".into(), value: 40.0 }],
            total_cost: 55.0,
            avg_cost: 5.5,
        }
    }

    #[test]
    fn insights_prompt_embeds_totals_and_recent_week() {
        let prompt = insights_prompt(&summary());
        assert!(prompt.contains("Total Cost: $55.00"));
        assert!(prompt.contains("Average Daily Cost: $5.50"));
        assert!(prompt.contains("AmazonEC2"));
        // only the trailing 7 days make it into the prompt
        assert!(prompt.contains("2025-06-04"));
        assert!(!prompt.contains("2025-06-03"));
    }

    #[test]
    fn anomalies_prompt_averages_recent_days() {
        // last 7 of 1..=10 -> mean of 4..=10 = 7
        let prompt = anomalies_prompt(&summary());
        assert!(prompt.contains("Recent 7-day average: $7.00"));
    }

    #[test]
    fn anomalies_prompt_handles_empty_series() {
        let empty = CostSummary {
            chart_data: vec![],
            service_data: vec![],
            total_cost: 0.0,
            avg_cost: 0.0,
        };
        assert!(anomalies_prompt(&empty).contains("$0.00"));
    }

    #[test]
    fn cache_keys_separate_models() {
        assert_ne!(cache_key("gemini-1.5-flash", "p"), cache_key("gemini-1.5-pro", "p"));
        assert_eq!(cache_key("m", "p"), cache_key("m", "p"));
    }

    #[tokio::test]
    async fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insights.jsonl");

        let cache = InsightsCache::load(path.clone()).await.unwrap();
        assert!(cache.get("k").await.is_none());
        cache.put("k", "cached commentary").await.unwrap();

        let reloaded = InsightsCache::load(path).await.unwrap();
        assert_eq!(reloaded.get("k").await.as_deref(), Some("cached commentary"));
    }
}
