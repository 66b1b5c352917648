use anyhow::{bail, Context, Result};
use aws_sdk_s3::config::Region;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

const DEFAULT_FALLBACK: &str = "mock-cost-data.json";

/// Where cost reports come from. `S3` keeps a local file as a fallback so the
/// dashboard stays usable when credentials or connectivity are missing.
enum ReportSource {
    S3 {
        client: aws_sdk_s3::Client,
        bucket: String,
        key: String,
        fallback: PathBuf,
    },
    File {
        path: PathBuf,
    },
    Mock {
        days: u32,
        seed: u64,
    },
}

pub struct ReportFetcher {
    source: ReportSource,
}

impl ReportFetcher {
    /// Resolve the report source from the environment. `COSTBOARD_REPORT_SOURCE`
    /// picks `s3` (default), `file`, or `mock`; S3 needs `COST_REPORT_BUCKET`
    /// and `COST_REPORT_KEY`, with the region from `AWS_REGION`.
    pub async fn from_env() -> Self {
        let source_name = std::env::var("COSTBOARD_REPORT_SOURCE").unwrap_or_else(|_| "s3".into());
        let fallback = std::env::var("COSTBOARD_FALLBACK_REPORT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_FALLBACK));

        match source_name.as_str() {
            "mock" => {
                let days = std::env::var("COSTBOARD_MOCK_DAYS").ok().and_then(|v| v.parse().ok()).unwrap_or(30);
                let seed = std::env::var("COSTBOARD_MOCK_SEED").ok().and_then(|v| v.parse().ok()).unwrap_or(42);
                info!(days, seed, "serving synthesized cost reports");
                Self { source: ReportSource::Mock { days, seed } }
            }
            "file" => {
                info!(path = %fallback.display(), "serving cost reports from a local file");
                Self { source: ReportSource::File { path: fallback } }
            }
            _ => match (std::env::var("COST_REPORT_BUCKET"), std::env::var("COST_REPORT_KEY")) {
                (Ok(bucket), Ok(key)) => {
                    let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into());
                    let cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
                        .region(Region::new(region.clone()))
                        .load()
                        .await;
                    info!(%bucket, %key, %region, "cost reports come from S3");
                    Self {
                        source: ReportSource::S3 {
                            client: aws_sdk_s3::Client::new(&cfg),
                            bucket,
                            key,
                            fallback,
                        },
                    }
                }
                _ => {
                    warn!(
                        "COST_REPORT_BUCKET/COST_REPORT_KEY not set, serving cost reports from {}",
                        fallback.display()
                    );
                    Self { source: ReportSource::File { path: fallback } }
                }
            },
        }
    }

    /// Fetch and parse the raw cost report. Any S3 failure (request error,
    /// empty body, bad JSON) falls back to the local file before giving up.
    pub async fn fetch(&self) -> Result<Value> {
        match &self.source {
            ReportSource::Mock { days, seed } => Ok(crate::mock::build_dataset(*days, *seed)),
            ReportSource::File { path } => read_report_file(path).await,
            ReportSource::S3 { client, bucket, key, fallback } => {
                match fetch_s3(client, bucket, key).await {
                    Ok(report) => Ok(report),
                    Err(e) => {
                        warn!("S3 fetch failed, falling back to local report: {e:#}");
                        read_report_file(fallback)
                            .await
                            .context("unable to fetch cost data from S3 or the local fallback file")
                    }
                }
            }
        }
    }
}

async fn fetch_s3(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> Result<Value> {
    let out = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("S3 GetObject failed: {e}"))?;

    let bytes = out
        .body
        .collect()
        .await
        .context("reading S3 response body")?
        .into_bytes();
    if bytes.is_empty() {
        bail!("empty response from S3");
    }

    serde_json::from_slice(&bytes).context("cost report is not valid JSON")
}

async fn read_report_file(path: &PathBuf) -> Result<Value> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading local cost report {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("local cost report {} is not valid JSON", path.display()))
}
