//! Bounded exponential-backoff retry of transient errors (§4.C).
//!
//! The sleep routine is a process-wide function pointer so embedders can
//! swap in a host-loop-friendly delay instead of `tokio::time::sleep`; it is
//! set once at initialization and never re-bound after first use (§9).

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::ErrorKind;

/// Backoff schedule for one client.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self { max_retries, initial_delay, multiplier }
    }

    /// Sleep duration before the `(attempt + 1)`th retry, `attempt` counted
    /// from zero. `initial_delay * multiplier^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 0, initial_delay: Duration::from_millis(500), multiplier: 2.0 }
    }
}

type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type SleepFn = fn(Duration) -> SleepFuture;

static SLEEP_FN: OnceLock<SleepFn> = OnceLock::new();

fn default_sleep(delay: Duration) -> SleepFuture {
    Box::pin(tokio::time::sleep(delay))
}

/// Overrides the process-wide sleep routine. Must be called before the
/// first retry occurs anywhere in the process; later calls have no effect
/// since the slot is filled on first use.
pub fn init_sleep_fn(f: SleepFn) {
    let _ = SLEEP_FN.set(f);
}

fn sleep_fn() -> SleepFn {
    *SLEEP_FN.get_or_init(|| default_sleep as SleepFn)
}

async fn sleep(delay: Duration) {
    (sleep_fn())(delay).await;
}

/// Runs `op` up to `1 + policy.max_retries` times, retrying only on
/// `ErrorKind::is_retriable()` errors with exponential backoff between
/// attempts. `op` receives the zero-based attempt number.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ErrorKind>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ErrorKind>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Like `retry`, but with the G2-only auth escalation from §4.C: the first
/// `AuthError` triggers `reauth` and one extra attempt that does not count
/// against `policy.max_retries`. If that extra attempt also fails, normal
/// retry/terminal classification resumes from there.
pub async fn retry_with_reauth<T, F, Fut, R, RFut>(
    policy: &RetryPolicy,
    mut op: F,
    mut reauth: R,
) -> Result<T, ErrorKind>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ErrorKind>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<(), ErrorKind>>,
{
    let mut attempt = 0u32;
    let mut reauthed = false;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(ErrorKind::AuthError(msg)) if !reauthed => {
                reauthed = true;
                reauth().await.map_err(|_| ErrorKind::AuthError(msg))?;
                match op(attempt).await {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                        sleep(policy.delay_for(attempt)).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
