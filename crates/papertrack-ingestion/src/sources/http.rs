//! Shared HTTP plumbing for feed clients: retry policy and a GET loop that
//! backs off on timeouts, connection failures and 429/5xx responses.

use papertrack_common::sandbox::SandboxClient;
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::sources::FeedError;

const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
    /// Timeout of the first attempt.
    pub timeout: Duration,
    /// Factor applied to the timeout on each further attempt.
    pub timeout_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(20),
            jitter: Duration::from_millis(500),
            timeout: Duration::from_secs(45),
            timeout_multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Timeout for attempt `attempt` (1-based).
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        self.timeout.mul_f64(self.timeout_multiplier.max(1.0).powi(exp))
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.jitter)
        };
        (self.backoff(attempt) + jitter).min(self.max_delay)
    }
}

/// Headers every feed request carries.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeaders {
    pub user_agent: &'static str,
    pub accept: &'static str,
}

/// GET `endpoint` with `params`, retrying transient failures per `retry`.
/// Non-retryable statuses are returned at once.
pub async fn get_with_retry(
    client: &SandboxClient,
    endpoint: &str,
    params: &[(&str, String)],
    headers: RequestHeaders,
    retry: &RetryPolicy,
) -> Result<String, FeedError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        debug!(attempt, max_attempts, endpoint, "Feed request");
        let result = client
            .get(endpoint)?
            .query(params)
            .header(reqwest::header::USER_AGENT, headers.user_agent)
            .header(reqwest::header::ACCEPT, headers.accept)
            .timeout(retry.timeout_for(attempt))
            .send()
            .await;

        let err = match result {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => return Ok(body),
                Err(e) => FeedError::Transport(e),
            },
            Ok(resp) => {
                let status = resp.status();
                let err = FeedError::Status {
                    status: status.as_u16(),
                    url: endpoint.to_string(),
                };
                if !is_retryable_status(status) {
                    return Err(err);
                }
                err
            }
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                FeedError::Transport(e)
            }
            Err(e) => return Err(FeedError::Transport(e)),
        };

        debug!(attempt, error = %err, "Feed attempt failed");
        last_err = Some(err);
        if attempt < max_attempts {
            tokio::time::sleep(retry.delay_with_jitter(attempt)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| FeedError::Blocked(endpoint.to_string())))
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUS.contains(&status.as_u16())
}
