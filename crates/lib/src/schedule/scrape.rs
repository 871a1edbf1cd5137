//! Schedule source: log in to the shift system and fetch the schedule page.

use super::entry::ScheduleEntry;
use super::parse::{is_login_page, parse_schedule};
use async_trait::async_trait;

/// Result of one scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Authenticated; entries may be empty ("no data").
    Loaded(Vec<ScheduleEntry>),
    LoginFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("schedule request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("schedule server error: {0}")]
    Api(String),
    #[error("schedule parse worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch(&self) -> Result<ScrapeOutcome, ScrapeError>;
}

/// Form-login scraper. Cookies from the login response carry the session to the schedule request.
pub struct HttpScheduleSource {
    client: reqwest::Client,
    login_url: String,
    schedule_url: String,
    login: String,
    password: String,
}

impl HttpScheduleSource {
    pub fn new(
        login_url: impl Into<String>,
        schedule_url: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            login_url: login_url.into(),
            schedule_url: schedule_url.into(),
            login: login.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl ScheduleSource for HttpScheduleSource {
    async fn fetch(&self) -> Result<ScrapeOutcome, ScrapeError> {
        let form = [("login", self.login.as_str()), ("password", self.password.as_str())];
        let res = self.client.post(&self.login_url).form(&form).send().await?;
        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            log::warn!("schedule: login rejected with {}", status);
            return Ok(ScrapeOutcome::LoginFailed);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ScrapeError::Api(format!("login {} {}", status, body)));
        }

        let res = self.client.get(&self.schedule_url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ScrapeError::Api(format!("schedule {} {}", status, body)));
        }
        let html = res.text().await?;

        let outcome = tokio::task::spawn_blocking(move || {
            if is_login_page(&html) {
                ScrapeOutcome::LoginFailed
            } else {
                ScrapeOutcome::Loaded(parse_schedule(&html))
            }
        })
        .await?;
        match &outcome {
            ScrapeOutcome::Loaded(entries) => log::info!("schedule: scraped {} entries", entries.len()),
            ScrapeOutcome::LoginFailed => log::warn!("schedule: still on login page after authenticating"),
        }
        Ok(outcome)
    }
}
