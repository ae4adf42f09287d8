use std::thread;
use std::time::Duration;

/// Attempts made before an artifact is declared leaked.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause between two attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded retry with a fixed pause between attempts.
/// 固定間隔、有上限次數的重試策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF)
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// `true` when the last error was retryable but no attempts were left.
    pub exhausted: bool,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to at least one.
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            backoff,
        }
    }

    /// Longest time [`RetryPolicy::run`] can spend sleeping.
    pub fn max_total_delay(&self) -> Duration {
        self.backoff
            .saturating_mul(self.max_attempts.max(1).saturating_sub(1))
    }

    /// Runs `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the attempt budget is spent. `on_retry` fires before every pause.
    /// 依策略重複執行 `op`，直到成功、遇到不可重試的錯誤或用盡次數。
    pub fn run<T, E, Op, Retryable, OnRetry>(
        &self,
        mut op: Op,
        retryable: Retryable,
        mut on_retry: OnRetry,
    ) -> RetryOutcome<T, E>
    where
        Op: FnMut(u32) -> Result<T, E>,
        Retryable: Fn(&E) -> bool,
        OnRetry: FnMut(u32, &E),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op(attempt) {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        exhausted: false,
                    }
                }
                Err(err) => err,
            };

            if !retryable(&err) {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    exhausted: false,
                };
            }
            if attempt >= max_attempts {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    exhausted: true,
                };
            }

            on_retry(attempt, &err);
            if !self.backoff.is_zero() {
                thread::sleep(self.backoff);
            }
            attempt += 1;
        }
    }
}
