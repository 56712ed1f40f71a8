//! Bounded retry with exponential backoff and jitter.
//!
//! Every network call a node initiates (registration, submission) goes
//! through this; the attempt count is always finite and exhaustion
//! surfaces the last error to the caller.

use std::time::Duration;

use rand::{thread_rng, Rng};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay, 0.0 - 1.0.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Fixed-delay policy: `attempts` total tries, `delay` between them.
    pub fn fixed(attempts: usize, delay: Duration) -> Self {
        Self {
            max_retries: attempts.saturating_sub(1),
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }
}

pub async fn retry_async<F, Fut, T, E>(cfg: &RetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= cfg.max_retries => return Err(e),
            Err(_) => {
                let exp = cfg.base_delay.mul_f64(2f64.powi(attempt as i32));
                let mut delay = std::cmp::min(exp, cfg.max_delay);
                if cfg.jitter > 0.0 {
                    let jitter_ms = (delay.as_millis() as f64 * cfg.jitter) as u64;
                    if jitter_ms > 0 {
                        let offset: i64 =
                            thread_rng().gen_range(-(jitter_ms as i64)..(jitter_ms as i64 + 1));
                        let base_ms = delay.as_millis() as i64 + offset;
                        delay = Duration::from_millis(base_ms.max(0) as u64);
                    }
                }
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}
