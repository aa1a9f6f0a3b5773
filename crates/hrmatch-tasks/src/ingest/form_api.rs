//! Client for the hosted form service's submissions API.

use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use hrmatch_core::defaults::{FORM_API_TIMEOUT_SECS, FORM_API_URL, FORM_PAGE_SIZE, SLOW_CALL_MS};
use hrmatch_core::{Error, Result};

/// One answered question.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormQuestion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: JsonValue,
}

/// One form submission as delivered by the API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    pub submission_id: String,
    #[serde(default)]
    pub submission_time: Option<String>,
    #[serde(default)]
    pub last_updated_at: Option<String>,
    #[serde(default)]
    pub questions: Vec<FormQuestion>,
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl FormSubmission {
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.submission_time.as_deref())
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.last_updated_at.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionsPage {
    #[serde(default)]
    responses: Vec<FormSubmission>,
    #[serde(default)]
    total_responses: u64,
    #[serde(default)]
    page_count: u64,
}

/// Form API settings.
#[derive(Debug, Clone)]
pub struct FormApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub resume_form_id: Option<String>,
    pub job_form_id: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for FormApiConfig {
    fn default() -> Self {
        Self {
            base_url: FORM_API_URL.to_string(),
            api_key: None,
            resume_form_id: None,
            job_form_id: None,
            page_size: FORM_PAGE_SIZE,
            timeout_secs: FORM_API_TIMEOUT_SECS,
        }
    }
}

impl FormApiConfig {
    /// Read settings from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FILLOUT_BASE_URL` | `https://api.fillout.com` |
    /// | `FILLOUT_API_KEY` | none |
    /// | `CV_FORM_ID` | none |
    /// | `JOB_FORM_ID` | none |
    /// | `FILLOUT_PAGE_SIZE` | `150` |
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();
        Self {
            base_url: non_empty("FILLOUT_BASE_URL").unwrap_or(defaults.base_url),
            api_key: non_empty("FILLOUT_API_KEY"),
            resume_form_id: non_empty("CV_FORM_ID"),
            job_form_id: non_empty("JOB_FORM_ID"),
            page_size: non_empty("FILLOUT_PAGE_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.page_size),
            timeout_secs: defaults.timeout_secs,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_resume_form(mut self, form_id: impl Into<String>) -> Self {
        self.resume_form_id = Some(form_id.into());
        self
    }

    pub fn with_job_form(mut self, form_id: impl Into<String>) -> Self {
        self.job_form_id = Some(form_id.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Paginating client for form submissions.
#[derive(Debug, Clone)]
pub struct FormApiClient {
    client: Client,
    config: FormApiConfig,
}

impl FormApiClient {
    pub fn new(config: FormApiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn from_env() -> Self {
        Self::new(FormApiConfig::from_env())
    }

    pub fn config(&self) -> &FormApiConfig {
        &self.config
    }

    /// All applicant submissions updated after `after`.
    pub async fn fetch_resume_submissions(
        &self,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<FormSubmission>> {
        let form_id = self
            .config
            .resume_form_id
            .as_deref()
            .ok_or_else(|| Error::Config("CV_FORM_ID is not set".into()))?;
        self.fetch_submissions(form_id, after).await
    }

    /// All employer submissions updated after `after`.
    pub async fn fetch_job_submissions(
        &self,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<FormSubmission>> {
        let form_id = self
            .config
            .job_form_id
            .as_deref()
            .ok_or_else(|| Error::Config("JOB_FORM_ID is not set".into()))?;
        self.fetch_submissions(form_id, after).await
    }

    /// Page through `GET /v1/api/forms/{form_id}/submissions` until
    /// `pageCount` pages were read or a page comes back empty.
    #[instrument(
        skip(self),
        fields(subsystem = "ingest", component = "form_api", op = "fetch_submissions")
    )]
    pub async fn fetch_submissions(
        &self,
        form_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<FormSubmission>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("FILLOUT_API_KEY is not set".into()))?;
        let url = format!(
            "{}/v1/api/forms/{}/submissions",
            self.config.base_url.trim_end_matches('/'),
            form_id
        );
        let after = after.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));

        let start = Instant::now();
        let mut submissions = Vec::new();
        let mut offset: u64 = 0;
        let mut pages: u64 = 0;

        loop {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(api_key)
                .query(&[("limit", self.config.page_size.to_string())])
                .query(&[("offset", offset.to_string())]);
            if let Some(after) = &after {
                request = request.query(&[("afterDate", after.as_str())]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(status_error(status, &body));
            }
            let page: SubmissionsPage = response.json().await?;
            pages += 1;

            let received = page.responses.len() as u64;
            debug!(
                page = pages,
                received,
                total = page.total_responses,
                "Fetched submissions page"
            );
            submissions.extend(page.responses);

            if received == 0
                || pages >= page.page_count
                || submissions.len() as u64 >= page.total_responses
            {
                break;
            }
            offset += received;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > SLOW_CALL_MS {
            warn!(duration_ms, pages, slow = true, "Slow form API fetch");
        }
        info!(
            form_id,
            result_count = submissions.len(),
            pages,
            duration_ms,
            "Fetched form submissions"
        );
        Ok(submissions)
    }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let detail = format!("form API returned {}: {}", status, body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Config(detail),
        StatusCode::NOT_FOUND => Error::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => Error::Unavailable(detail),
        s if s.is_server_error() => Error::Unavailable(detail),
        s if s.is_client_error() => Error::InvalidInput(detail),
        _ => Error::Request(detail),
    }
}
