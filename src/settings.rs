use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Typed view of the settings document. The file may carry extra keys written
/// by older dashboard builds; those survive merges untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub slack_webhook: Option<String>,
    pub report_frequency: Option<String>,
    pub report_time: Option<String>,
    pub timezone: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub interval_minutes: Option<u64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub monthly_budget: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub alert_threshold: Option<f64>,
    pub s3_bucket: Option<String>,
    pub region: Option<String>,
    pub google_api_key: Option<String>,
    pub model: Option<String>,
}

// The settings form posts numbers as strings; accept both.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw settings map. Any read or parse failure yields an empty map so the
    /// dashboard always gets an object back.
    pub async fn read(&self) -> Map<String, Value> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => serde_json::from_str(&txt).unwrap_or_default(),
            Err(_) => Map::new(),
        }
    }

    /// Typed view over the current map. Fields that fail to parse come back
    /// as `None` rather than failing the whole read.
    pub async fn load(&self) -> Settings {
        serde_json::from_value(Value::Object(self.read().await)).unwrap_or_default()
    }

    /// Shallow-merge `patch` onto the file content and rewrite the file.
    /// Plain overwrite, no locking.
    pub async fn merge(&self, patch: Map<String, Value>) -> anyhow::Result<Map<String, Value>> {
        let mut current = self.read().await;
        for (k, v) in patch {
            current.insert(k, v);
        }
        let out = serde_json::to_string_pretty(&Value::Object(current.clone()))?;
        tokio::fs::write(&self.path, out).await?;
        Ok(current)
    }
}
