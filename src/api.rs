use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info, warn};

use crate::{
    cost::{self, CostSummary},
    insights::{self, GeminiClient, InsightsCache},
    report::ReportFetcher,
    settings::{Settings, SettingsStore},
    slack::{Severity, SlackNotifier},
};

#[derive(Clone)]
pub struct AppState {
    settings: SettingsStore,
    fetcher: Arc<ReportFetcher>,
    slack: SlackNotifier,
    http: reqwest::Client,
    insights_cache: Option<Arc<InsightsCache>>,
    public_dir: PathBuf,
}

impl AppState {
    pub async fn new(
        settings_path: PathBuf,
        public_dir: PathBuf,
        fetcher: ReportFetcher,
        insights_cache_path: Option<PathBuf>,
    ) -> Result<Self> {
        let http = reqwest::Client::new();
        let insights_cache = match insights_cache_path {
            Some(path) => Some(Arc::new(InsightsCache::load(path).await?)),
            None => None,
        };
        Ok(Self {
            settings: SettingsStore::new(settings_path),
            fetcher: Arc::new(fetcher),
            slack: SlackNotifier::new(http.clone()),
            http,
            insights_cache,
            public_dir,
        })
    }

    /// Build a Gemini client from settings, falling back to the environment.
    fn gemini(&self, settings: &Settings) -> Result<GeminiClient, ApiErr> {
        let api_key = settings
            .google_api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .ok_or_else(|| {
                ApiErr::internal_msg("Failed to generate insights", "Google API key is not configured")
            })?;
        let model = settings
            .model
            .clone()
            .or_else(|| std::env::var("GOOGLE_MODEL").ok())
            .unwrap_or_else(|| "gemini-1.5-flash".to_string());
        Ok(GeminiClient::new(self.http.clone(), api_key, model))
    }

    async fn normalized_report(&self) -> Result<(Value, CostSummary), anyhow::Error> {
        let raw = self.fetcher.fetch().await?;
        let summary = cost::parse_cost_data(&raw);
        Ok((raw, summary))
    }
}

pub async fn serve(bind: String, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/api/cost", get(get_cost))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/insights", get(get_insights))
        .route("/api/insights/anomalies", get(get_anomalies))
        .route("/api/notify", post(post_notify))
        .route("/api/report", post(post_report))
        .route("/api/schedule", get(get_schedule).post(post_schedule))
        .route("/api/settings/test-slack", post(test_slack))
        .route("/api/settings/test-schedule", post(test_schedule))
        .fallback_service(ServeDir::new(&state.public_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("costboard API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct CostResponse {
    success: bool,
    data: CostSummary,
    timestamp: String,
}

async fn get_cost(State(st): State<AppState>) -> Result<Json<CostResponse>, ApiErr> {
    let (_, data) = st
        .normalized_report()
        .await
        .map_err(|e| ApiErr::upstream("Failed to fetch cost data", &e))?;
    Ok(Json(CostResponse {
        success: true,
        data,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn get_settings(State(st): State<AppState>) -> Json<Value> {
    Json(Value::Object(st.settings.read().await))
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
}

async fn post_settings(
    State(st): State<AppState>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<StatusResponse>, ApiErr> {
    st.settings
        .merge(patch)
        .await
        .map_err(|e| ApiErr::upstream("Failed to save settings", &e))?;
    Ok(Json(StatusResponse { success: true }))
}

#[derive(Serialize)]
struct InsightsResponse {
    success: bool,
    insights: String,
    data: CostSummary,
    timestamp: String,
}

async fn get_insights(State(st): State<AppState>) -> Result<Json<InsightsResponse>, ApiErr> {
    let (_, data) = st
        .normalized_report()
        .await
        .map_err(|e| ApiErr::upstream("Failed to generate insights", &e))?;
    let text = generate_cached(&st, insights::insights_prompt(&data)).await?;
    Ok(Json(InsightsResponse {
        success: true,
        insights: text,
        data,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn get_anomalies(State(st): State<AppState>) -> Result<Json<InsightsResponse>, ApiErr> {
    let (_, data) = st
        .normalized_report()
        .await
        .map_err(|e| ApiErr::upstream("Failed to generate insights", &e))?;
    let text = generate_cached(&st, insights::anomalies_prompt(&data)).await?;
    Ok(Json(InsightsResponse {
        success: true,
        insights: text,
        data,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn generate_cached(st: &AppState, prompt: String) -> Result<String, ApiErr> {
    let settings = st.settings.load().await;
    let client = st.gemini(&settings)?;

    let key = insights::cache_key(client.model(), &prompt);
    if let Some(cache) = &st.insights_cache {
        if let Some(hit) = cache.get(&key).await {
            return Ok(hit);
        }
    }

    let text = client
        .generate(&prompt)
        .await
        .map_err(|e| ApiErr::upstream("Failed to generate insights", &e))?;

    if let Some(cache) = &st.insights_cache {
        if let Err(e) = cache.put(&key, &text).await {
            warn!("failed to persist insight to cache: {e:#}");
        }
    }
    Ok(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyResponse {
    success: bool,
    cost_used: f64,
    budget: f64,
    threshold: f64,
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

async fn post_notify(State(st): State<AppState>) -> Result<Json<NotifyResponse>, ApiErr> {
    let (_, data) = st
        .normalized_report()
        .await
        .map_err(|e| ApiErr::upstream("Failed to send notification", &e))?;

    let settings = st.settings.load().await;
    let budget = settings
        .monthly_budget
        .or_else(|| env_f64("MONTHLY_BUDGET"))
        .unwrap_or(1000.0);
    let threshold = settings
        .alert_threshold
        .or_else(|| env_f64("ALERT_THRESHOLD"))
        .unwrap_or(70.0);

    match settings.slack_webhook.as_deref() {
        Some(webhook) => {
            let sent = st
                .slack
                .send_cost_alert(webhook, data.total_cost, budget, threshold)
                .await
                .map_err(|e| ApiErr::upstream("Failed to send notification", &e))?;
            if sent {
                info!(total = data.total_cost, budget, threshold, "budget alert sent");
            }
        }
        None => warn!("Slack webhook not configured, skipping budget alert"),
    }

    Ok(Json(NotifyResponse {
        success: true,
        cost_used: data.total_cost,
        budget,
        threshold,
    }))
}

async fn post_report(State(st): State<AppState>) -> Result<Json<StatusResponse>, ApiErr> {
    let (raw, data) = st
        .normalized_report()
        .await
        .map_err(|e| ApiErr::upstream("Failed to send cost report", &e))?;
    let mocked = raw.get("mocked").and_then(Value::as_bool).unwrap_or(false);

    let settings = st.settings.load().await;
    let Some(webhook) = settings.slack_webhook.as_deref() else {
        return Err(ApiErr::bad_request("Slack webhook not configured"));
    };

    st.slack
        .send_cost_report(webhook, &data, mocked)
        .await
        .map_err(|e| ApiErr::upstream("Failed to send cost report", &e))?;
    Ok(Json(StatusResponse { success: true }))
}

#[derive(Deserialize)]
struct ScheduleRequest {
    action: String,
    #[serde(default)]
    interval_minutes: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ScheduleResponse {
    status: &'static str,
    message: String,
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval_minutes: Option<u64>,
    timestamp: String,
}

async fn post_schedule(
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiErr> {
    if !matches!(req.action.as_str(), "create" | "update" | "delete") {
        return Err(ApiErr::bad_request("Invalid action"));
    }
    if req.action != "delete" && req.interval_minutes.map_or(true, |m| m < 1) {
        return Err(ApiErr::bad_request("Invalid interval_minutes"));
    }

    // TODO: invoke the dynamic-scheduler Lambda once its ARN is plumbed
    // through settings; until then this endpoint only acknowledges.
    let message = match (req.action.as_str(), req.interval_minutes) {
        ("delete", _) => "Schedule deleted".to_string(),
        (action, Some(minutes)) => format!("Schedule {action}d for every {minutes} minutes"),
        (action, None) => format!("Schedule {action}d"),
    };

    Ok(Json(ScheduleResponse {
        status: "success",
        message,
        action: req.action,
        interval_minutes: req.interval_minutes,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize)]
struct ScheduleStatus {
    rule_exists: bool,
    interval_minutes: u64,
    status: &'static str,
}

async fn get_schedule() -> Json<ScheduleStatus> {
    // Stub until the scheduler Lambda is wired up.
    Json(ScheduleStatus {
        rule_exists: false,
        interval_minutes: 5,
        status: "not_implemented_yet",
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestSlackRequest {
    #[serde(default)]
    webhook_url: Option<String>,
}

async fn test_slack(
    State(st): State<AppState>,
    Json(req): Json<TestSlackRequest>,
) -> Result<Json<StatusResponse>, ApiErr> {
    let webhook = match req.webhook_url.as_deref() {
        Some(url) if !url.trim().is_empty() => url.to_string(),
        _ => return Err(ApiErr::bad_request("Webhook URL is required")),
    };

    st.slack
        .send_alert(&webhook, "Test connection from AWS Cost Dashboard", Severity::Info)
        .await
        .map_err(|e| ApiErr::upstream("Failed to send test message", &e))?;
    Ok(Json(StatusResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestScheduleRequest {
    #[serde(default)]
    report_frequency: Option<String>,
    #[serde(default)]
    report_time: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    interval_minutes: Option<u64>,
}

async fn test_schedule(
    State(st): State<AppState>,
    Json(req): Json<TestScheduleRequest>,
) -> Result<Json<StatusResponse>, ApiErr> {
    let settings = st.settings.load().await;
    let Some(webhook) = settings.slack_webhook.as_deref() else {
        return Err(ApiErr::bad_request("Slack webhook not configured"));
    };

    let frequency = match req.report_frequency.as_deref() {
        Some("minutes") => format!("every {} minute(s)", req.interval_minutes.unwrap_or(5)),
        Some(other) => other.to_string(),
        None => "daily".to_string(),
    };
    let message = format!(
        "✅ *Report Schedule Updated*\n\n📅 Frequency: {}\n🕐 Time: {}\n🌍 Timezone: {}\n\n\
         Your AWS cost reports will now be sent according to this schedule.",
        frequency,
        req.report_time.as_deref().unwrap_or("-"),
        req.timezone.as_deref().unwrap_or("-"),
    );

    st.slack
        .send_alert(webhook, &message, Severity::Info)
        .await
        .map_err(|e| ApiErr::upstream("Failed to send confirmation", &e))?;
    Ok(Json(StatusResponse { success: true }))
}

#[derive(Debug)]
pub struct ApiErr {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<String>,
}

impl ApiErr {
    fn internal(e: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error".to_string(),
            message: format!("Internal error: {e}"),
            details: None,
        }
    }

    fn internal_msg(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error".to_string(),
            message: message.into(),
            details: Some(details.into()),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// A failure in an external service (S3, Gemini, Slack): flat message for
    /// the dashboard, full error chain in `details`.
    fn upstream(message: &str, e: &anyhow::Error) -> Self {
        error!("{message}: {e:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "upstream_error".to_string(),
            message: message.to_string(),
            details: Some(format!("{e:#}")),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiErr {
    fn from(e: E) -> Self {
        Self::internal(e.into())
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code,
                details: self.details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schedule_rejects_unknown_action() {
        let err = post_schedule(Json(ScheduleRequest {
            action: "pause".into(),
            interval_minutes: Some(5),
        }))
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid action");
    }

    #[tokio::test]
    async fn schedule_requires_interval_unless_deleting() {
        let err = post_schedule(Json(ScheduleRequest {
            action: "create".into(),
            interval_minutes: Some(0),
        }))
        .await
        .unwrap_err();
        assert_eq!(err.message, "Invalid interval_minutes");

        let ok = post_schedule(Json(ScheduleRequest {
            action: "delete".into(),
            interval_minutes: None,
        }))
        .await
        .unwrap();
        assert_eq!(ok.0.message, "Schedule deleted");
        assert_eq!(ok.0.status, "success");
    }

    #[tokio::test]
    async fn schedule_acknowledges_create() {
        let ok = post_schedule(Json(ScheduleRequest {
            action: "create".into(),
            interval_minutes: Some(15),
        }))
        .await
        .unwrap();
        assert_eq!(ok.0.message, "Schedule created for every 15 minutes");
        assert_eq!(ok.0.interval_minutes, Some(15));
    }

    #[test]
    fn api_err_maps_to_flat_json() {
        let resp = ApiErr::bad_request("Invalid action").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
