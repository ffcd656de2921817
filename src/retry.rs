//! Pluggable retry policy for hop fetches.
//!
//! The distribution protocol does not require retries, so the default policy
//! performs a single attempt. Deployments that front flaky hosts can raise
//! `max_attempts`; retries then back off exponentially with jitter and draw
//! from a shared budget so a dead host cannot multiply load.

use std::{
    fmt,
    future::Future,
    num::NonZeroU32,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use rand::Rng;
use reqwest::{Client, Method, Request, Response};
use thiserror::Error;
use tower::retry::{budget::Budget, Policy};
use tower::{retry::Retry, Service};

/// Retry settings applied to every hop request.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    budget: Arc<Budget>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: NonZeroU32,
        base_delay: Duration,
        max_delay: Duration,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: jitter.clamp(0.0, 1.0),
            budget: Arc::new(Budget::new(Duration::from_secs(10), 10, 0.2)),
        }
    }

    /// Policy performing exactly one attempt.
    pub fn none() -> Self {
        Self::new(
            NonZeroU32::MIN,
            Duration::from_millis(200),
            Duration::from_secs(2),
            0.0,
        )
    }

    pub fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    pub fn is_method_retryable(&self, method: &Method) -> bool {
        matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn backoff_jitter(&self) -> f64 {
        self.jitter
    }

    fn budget_handle(&self) -> Arc<Budget> {
        Arc::clone(&self.budget)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Error returned when a retryable operation exhausts its attempts.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The underlying request failed even after all retry attempts were exhausted.
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    /// The retry budget rejected the attempt.
    #[error("retry budget exhausted: {source}")]
    BudgetExhausted { source: reqwest::Error },
}

/// Executes the provided request using the supplied retry policy.
pub async fn execute_with_retry(
    client: Client,
    request: Request,
    policy: RetryPolicy,
) -> RetryAttempt {
    let shared_policy = Arc::new(SharedPolicy::new(policy));
    shared_policy.budget.deposit();

    let retry_policy = ExponentialBackoffPolicy::new(shared_policy.clone());
    let mut retry_service = Retry::new(retry_policy, ReqwestService::new(client));

    let result = match retry_service.call(request).await {
        Ok(response) => Ok(response),
        Err(error) => {
            if shared_policy.circuit_open.load(Ordering::SeqCst) {
                Err(RetryError::BudgetExhausted { source: error })
            } else {
                Err(RetryError::Request(error))
            }
        }
    };

    RetryAttempt {
        attempts: shared_policy.attempts(),
        result,
    }
}

pub struct RetryAttempt {
    attempts: u32,
    result: Result<Response, RetryError>,
}

impl RetryAttempt {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn into_result(self) -> Result<Response, RetryError> {
        self.result
    }
}

#[derive(Clone)]
struct ExponentialBackoffPolicy {
    shared: Arc<SharedPolicy>,
    attempt: u32,
}

impl ExponentialBackoffPolicy {
    fn new(shared: Arc<SharedPolicy>) -> Self {
        Self { shared, attempt: 1 }
    }
}

impl Policy<Request, Response, reqwest::Error> for ExponentialBackoffPolicy {
    type Future = Pin<Box<dyn Future<Output = Self> + Send>>;

    fn retry(
        &self,
        request: &Request,
        result: Result<&Response, &reqwest::Error>,
    ) -> Option<Self::Future> {
        match result {
            Ok(_) => None,
            Err(error) => {
                if !self.shared.should_retry(request, error) {
                    return None;
                }

                if self.attempt >= self.shared.max_attempts() {
                    return None;
                }

                if self.shared.budget.withdraw().is_err() {
                    self.shared.circuit_open.store(true, Ordering::SeqCst);
                    return None;
                }

                let delay = self.shared.backoff_delay(self.attempt);
                let shared = self.shared.clone();
                let next_attempt = self.attempt + 1;
                self.shared.record_attempt(next_attempt);
                tracing::debug!(
                    url = %request.url(),
                    attempt = next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "retrying hop request"
                );

                Some(Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    Self {
                        shared,
                        attempt: next_attempt,
                    }
                }))
            }
        }
    }

    fn clone_request(&self, request: &Request) -> Option<Request> {
        request.try_clone()
    }
}

struct SharedPolicy {
    policy: RetryPolicy,
    budget: Arc<Budget>,
    circuit_open: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

impl SharedPolicy {
    fn new(policy: RetryPolicy) -> Self {
        let budget = policy.budget_handle();
        Self {
            policy,
            budget,
            circuit_open: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU32::new(1)),
        }
    }

    fn should_retry(&self, request: &Request, error: &reqwest::Error) -> bool {
        if !self.policy.is_method_retryable(request.method()) {
            return false;
        }

        error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_attempts().get()
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff_delay(attempt);
        let jitter = self.policy.backoff_jitter();
        if jitter <= f64::EPSILON {
            return base;
        }

        let mut rng = rand::thread_rng();
        let factor: f64 = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record_attempt(&self, attempt: u32) {
        self.attempts.store(attempt, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct ReqwestService {
    client: Client,
}

impl ReqwestService {
    fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Service<Request> for ReqwestService {
    type Response = Response;
    type Error = reqwest::Error;
    type Future = BoxFuture<'static, Result<Response, reqwest::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move { client.execute(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_performs_a_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts().get(), 1);
        assert!(policy.is_method_retryable(&Method::GET));
        assert!(!policy.is_method_retryable(&Method::POST));
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy::new(
            NonZeroU32::new(5).unwrap(),
            Duration::from_millis(100),
            Duration::from_millis(350),
            0.0,
        );
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn connection_failures_are_retried_up_to_the_limit() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new();
        let request = client
            .get(format!("http://{addr}/unreachable"))
            .build()
            .unwrap();
        let policy = RetryPolicy::new(
            NonZeroU32::new(3).unwrap(),
            Duration::from_millis(1),
            Duration::from_millis(2),
            0.0,
        );

        let attempt = execute_with_retry(client, request, policy).await;
        assert_eq!(attempt.attempts(), 3);
        let error = attempt.into_result().expect_err("request should fail");
        assert!(matches!(&error, RetryError::Request(source) if source.is_connect()));
    }
}
