//! Hand-off to the website analysis pipeline.
//!
//! The analysis stages themselves (performance audit, content scrape, model
//! analysis, report rendering) run elsewhere. This module validates the
//! target URL and defines the narrow contract the HTTP layer calls once a
//! request has passed rate limiting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;
use uuid::Uuid;

/// Errors raised by the analysis pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Analysis backend unavailable: {0}")]
    Unavailable(String),
}

/// A validated analysis target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    /// The URL as submitted, with a scheme added when missing
    pub url: String,
    /// Canonical form used to recognize repeat analyses of one site
    pub normalized: String,
}

impl TargetUrl {
    /// Validate a user supplied URL.
    ///
    /// A missing scheme defaults to `https`. Only `http` and `https` URLs
    /// with a host are accepted.
    pub fn parse(input: &str) -> Option<Self> {
        let full = add_protocol(input.trim())?;
        let parsed = Url::parse(&full).ok()?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?;
        if host.is_empty() {
            return None;
        }

        Some(Self {
            normalized: normalize(&parsed),
            url: full,
        })
    }
}

fn add_protocol(input: &str) -> Option<String> {
    if input.is_empty() {
        return None;
    }
    if input.contains("://") {
        Some(input.to_string())
    } else {
        Some(format!("https://{}", input))
    }
}

/// Lowercase host without `www.`, no fragment, no trailing slash.
fn normalize(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut normalized = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

/// One admitted analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub target: TargetUrl,
    /// Authenticated owner, if any
    pub user_id: Option<String>,
    /// Identifier the request was rate limited under
    pub client_id: String,
}

/// State of an analysis as reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Queued for the analysis workers
    Pending,
}

/// Acknowledgement returned by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReceipt {
    pub analysis_id: Uuid,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
}

/// The expensive analysis work gated by the rate limiter.
#[async_trait]
pub trait AnalysisPipeline: Send + Sync {
    async fn submit(&self, job: AnalysisJob) -> Result<AnalysisReceipt, PipelineError>;
}

/// Pipeline that records the job and leaves it pending for the workers.
#[derive(Debug, Default)]
pub struct QueuedPipeline;

#[async_trait]
impl AnalysisPipeline for QueuedPipeline {
    async fn submit(&self, job: AnalysisJob) -> Result<AnalysisReceipt, PipelineError> {
        let receipt = AnalysisReceipt {
            analysis_id: Uuid::new_v4(),
            status: AnalysisStatus::Pending,
            created_at: Utc::now(),
        };

        info!(
            analysis_id = %receipt.analysis_id,
            url = %job.target.url,
            normalized_url = %job.target.normalized,
            client = %job.client_id,
            authenticated = job.user_id.is_some(),
            "Analysis queued"
        );

        Ok(receipt)
    }
}
