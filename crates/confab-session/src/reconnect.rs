use std::time::Duration;

use confab_foundation::SessionError;

use crate::client::SessionClient;

/// Bounded reconnect policy applied by the orchestrator, not by the client:
/// the state machine stays retry-agnostic.
///
/// The inter-attempt delay is fixed, not exponential.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Consecutive-failure counter; resets to zero on any successful open.
#[derive(Debug, Default)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn on_failure(&mut self, policy: &RetryPolicy) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= policy.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(policy.delay)
        }
    }
}

/// Drive `connect` under the policy. A manual call resets the attempt
/// counter before trying. Exhaustion leaves the session `Failed` and stops;
/// resuming after that requires another explicit call.
pub async fn connect_with_retry(
    client: &mut SessionClient,
    model: &str,
    generation_config: Option<serde_json::Value>,
    policy: &RetryPolicy,
    retry: &mut RetryState,
) -> Result<(), SessionError> {
    retry.reset();
    loop {
        match client.connect(model, generation_config.clone()).await {
            Ok(()) => {
                retry.reset();
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Connect attempt failed: {}", e);
                match retry.on_failure(policy) {
                    RetryDecision::RetryAfter(delay) => {
                        client.notify_status(format!(
                            "retrying in {}s (attempt {}/{})",
                            delay.as_secs(),
                            retry.attempts() + 1,
                            policy.max_attempts
                        ));
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        client.mark_failed();
                        return Err(SessionError::RetryExhausted {
                            attempts: retry.attempts(),
                        });
                    }
                }
            }
        }
    }
}
