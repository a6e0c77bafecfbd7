//! One retry/backoff policy shared by every outbound call.
//!
//! Callers describe each try as an [`Attempt`]: `Done` returns immediately,
//! `Fatal` fails immediately, `Retry` sleeps and tries again until the attempt
//! bound is reached, after which the policy fails with
//! [`Error::RetriesExhausted`].

use crate::{Error, Result};
use rand::Rng;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

/// Outcome of one try
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(Error),
    Fatal(Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    multiplier: f64,
    jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1)).with_jitter(0.1)
    }
}

impl RetryPolicy {
    /// Backoff doubles after every retry
    pub fn exponential(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }

    /// Same delay between every try
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: delay,
            multiplier: 1.0,
            jitter_ratio: 0.0,
        }
    }

    /// Add up to `ratio * backoff` of random delay on top of each sleep
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.max(0.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn jittered(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return backoff;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        backoff + backoff.mul_f64(extra)
    }

    /// Run `op` under this policy using tokio's timer
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        self.run_with_sleep(label, op, tokio::time::sleep).await
    }

    /// Run `op` with an injected sleep, so tests can observe every delay.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run_with_sleep<T, F, Fut, S, SFut>(
        &self,
        label: &str,
        mut op: F,
        mut sleep: S,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
        S: FnMut(Duration) -> SFut,
        SFut: Future<Output = ()>,
    {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Attempt::Done(value) => {
                    if attempt > 1 {
                        tracing::info!(label = %label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Attempt::Fatal(error) => return Err(error),
                Attempt::Retry(error) => {
                    if attempt < self.max_attempts {
                        let delay = self.jittered(backoff);
                        tracing::warn!(
                            label = %label,
                            attempt,
                            max_attempts = self.max_attempts,
                            "{}; retrying in {:.1}s",
                            error,
                            delay.as_secs_f64()
                        );
                        sleep(delay).await;
                        backoff = backoff.mul_f64(self.multiplier);
                    } else {
                        tracing::warn!(
                            label = %label,
                            attempt,
                            max_attempts = self.max_attempts,
                            "{}; no attempts left",
                            error
                        );
                    }
                    last_error = Some(error);
                }
            }
        }

        let last = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(label = %label, attempts = self.max_attempts, "Retries exhausted: {}", last);
        Err(Error::RetriesExhausted {
            attempts: self.max_attempts,
            last,
        })
    }
}

/// Classify an HTTP response for a JSON endpoint.
///
/// 2xx decodes the body, 429 asks for a retry, anything else (including
/// transport errors and undecodable bodies) is fatal.
pub async fn json_attempt<T: DeserializeOwned>(
    sent: std::result::Result<Response, reqwest::Error>,
) -> Attempt<T> {
    let response = match sent {
        Ok(response) => response,
        Err(e) => return Attempt::Fatal(e.into()),
    };

    let status = response.status();
    if status.is_success() {
        return match response.json::<T>().await {
            Ok(body) => Attempt::Done(body),
            Err(e) => Attempt::Fatal(e.into()),
        };
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        Attempt::Retry(Error::RateLimited(body))
    } else {
        Attempt::Fatal(Error::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Sleeps = Arc<Mutex<Vec<Duration>>>;

    fn recorder() -> (Sleeps, impl FnMut(Duration) -> std::future::Ready<()>) {
        let sleeps: Sleeps = Arc::new(Mutex::new(Vec::new()));
        let sink = sleeps.clone();
        let sleep = move |d: Duration| {
            sink.lock().unwrap().push(d);
            std::future::ready(())
        };
        (sleeps, sleep)
    }

    fn scripted(statuses: Vec<u16>) -> impl FnMut(u32) -> std::future::Ready<Attempt<&'static str>> {
        let mut statuses = statuses.into_iter();
        move |_attempt| {
            let outcome = match statuses.next() {
                Some(200) => Attempt::Done("payload"),
                Some(429) => Attempt::Retry(Error::RateLimited("slow down".to_string())),
                Some(status) => Attempt::Fatal(Error::Http {
                    status,
                    body: "nope".to_string(),
                }),
                None => Attempt::Fatal(Error::Provider("script exhausted".to_string())),
            };
            std::future::ready(outcome)
        }
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let policy = RetryPolicy::default();
        let (sleeps, sleep) = recorder();

        let result = policy
            .run_with_sleep("test", scripted(vec![429, 429, 200]), sleep)
            .await
            .unwrap();

        assert_eq!(result, "payload");
        let sleeps = sleeps.lock().unwrap();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[1] > sleeps[0], "backoff should grow: {:?}", *sleeps);
        assert!(sleeps[0] >= Duration::from_secs(1) && sleeps[0] <= Duration::from_millis(1100));
        assert!(sleeps[1] >= Duration::from_secs(2) && sleeps[1] <= Duration::from_millis(2200));
    }

    #[tokio::test]
    async fn test_server_error_fails_fast() {
        let policy = RetryPolicy::default();
        let (sleeps, sleep) = recorder();

        let result = policy.run_with_sleep("test", scripted(vec![500]), sleep).await;

        assert!(matches!(result, Err(Error::Http { status: 500, .. })));
        assert!(sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausts_on_repeated_rate_limits() {
        let policy = RetryPolicy::default();
        let (sleeps, sleep) = recorder();

        let result = policy
            .run_with_sleep("test", scripted(vec![429, 429, 429, 200]), sleep)
            .await;

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3, .. })));
        // no sleep after the final attempt
        assert_eq!(sleeps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fixed_policy_keeps_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        let (sleeps, sleep) = recorder();

        let _ = policy
            .run_with_sleep("test", scripted(vec![429, 429, 429]), sleep)
            .await;

        assert_eq!(
            *sleeps.lock().unwrap(),
            vec![Duration::from_millis(250), Duration::from_millis(250)]
        );
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_one_based() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        let result = policy
            .run_with_sleep(
                "test",
                move |attempt| {
                    log.lock().unwrap().push(attempt);
                    std::future::ready(if attempt == 2 {
                        Attempt::Done(attempt)
                    } else {
                        Attempt::Retry(Error::Provider("flaky".to_string()))
                    })
                },
                |_| std::future::ready(()),
            )
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_json_attempt_classifies_statuses() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body(r#"{"value": 1}"#)
            .create_async()
            .await;
        let limited = server
            .mock("GET", "/limited")
            .with_status(429)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let get = |path: &str| client.get(format!("{}{}", server.url(), path)).send();

        let done: Attempt<serde_json::Value> = json_attempt(get("/ok").await).await;
        assert!(matches!(done, Attempt::Done(ref v) if v["value"] == 1));

        let retry: Attempt<serde_json::Value> = json_attempt(get("/limited").await).await;
        assert!(matches!(retry, Attempt::Retry(Error::RateLimited(_))));

        let fatal: Attempt<serde_json::Value> = json_attempt(get("/missing").await).await;
        assert!(matches!(fatal, Attempt::Fatal(Error::Http { status: 404, ref body }) if body == "not found"));

        ok.assert_async().await;
        limited.assert_async().await;
        missing.assert_async().await;
    }
}
