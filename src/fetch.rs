//! Processed-crash retrieval from a crash-stats API.

use reqwest::{header, Client, StatusCode};

const APP_USER_AGENT: &str = "siggen/1.0";

/// A fetch failed. Authentication and rate-limit failures are fatal for
/// the whole run; anything else only skips the one crash id.
#[derive(Debug)]
pub enum FetchError {
    /// The API token was rejected; no further requests will succeed.
    Auth(StatusCode),
    /// The API rate limit was hit; the whole run should stop.
    RateLimited,
    /// Anything else; the crash id can be skipped.
    Other(anyhow::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Auth(status) => {
                write!(f, "authentication failed ({status}); is the API token valid?")
            }
            FetchError::RateLimited => write!(f, "rate limited by the API; try again later"),
            FetchError::Other(error) => write!(f, "{error:#}"),
        }
    }
}

impl std::error::Error for FetchError {}

pub struct CrashStats {
    client: Client,
    host: String,
}

impl CrashStats {
    pub fn new(host: String, api_token: Option<&str>) -> anyhow::Result<CrashStats> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = api_token {
            headers.insert(
                "Auth-Token",
                token
                    .parse()
                    .map_err(|_| anyhow::anyhow!("API token is not a valid header value"))?,
            );
        }
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(CrashStats { client, host })
    }

    /// Fetches the processed crash for one crash id.
    pub async fn processed_crash(&self, crash_id: &str) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(format!("{}/api/ProcessedCrash/", self.host))
            .query(&[("crash_id", crash_id), ("datatype", "processed")])
            .send()
            .await
            .map_err(|error| FetchError::Other(error.into()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::Auth(response.status()))
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            status if !status.is_success() => {
                return Err(FetchError::Other(anyhow::anyhow!(
                    "unexpected response status {status}"
                )))
            }
            _ => (),
        }

        response
            .json()
            .await
            .map_err(|error| FetchError::Other(error.into()))
    }
}
