//! Join retry policy
//!
//! A failed programmatic join is retried after an alternate strategy: text
//! messages sent to the channel, each followed by a fixed pause. The policy
//! is independent of the transport; the coordinator plugs the call layer and
//! the connection in as closures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DEFAULT_START_NOTICE;
use crate::provider::ProviderResult;

/// Bounded join retry
#[derive(Debug, Clone)]
pub struct JoinPolicy {
    /// Programmatic join attempts, the first one included
    pub max_attempts: u32,
    /// Messages sent to the channel, in order, between attempts
    pub fallback_messages: Vec<String>,
    /// Pause after each fallback message and after the start notice
    pub fallback_delay: Duration,
    /// Posted to a channel without a live call before the first attempt
    pub start_notice: String,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            fallback_messages: vec!["/join".to_string(), "🎧".to_string()],
            fallback_delay: Duration::from_secs(2),
            start_notice: DEFAULT_START_NOTICE.to_string(),
        }
    }
}

impl JoinPolicy {
    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    pub fn with_start_notice(mut self, notice: impl Into<String>) -> Self {
        self.start_notice = notice.into();
        self
    }

    /// Wait out `fallback_delay`
    pub async fn pause(&self) {
        if !self.fallback_delay.is_zero() {
            sleep(self.fallback_delay).await;
        }
    }
}

/// How a successful join came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSuccess {
    /// Programmatic attempts made, the successful one included
    pub attempts: u32,
    /// Whether the alternate strategy ran
    pub used_fallback: bool,
}

/// Run `join` under `policy`
///
/// `fallback` receives each fallback message in turn. When it fails, the
/// policy stops and returns that error instead of attempting the join again.
pub async fn join_with_fallback<J, JFut, F, FFut>(
    policy: &JoinPolicy,
    mut join: J,
    mut fallback: F,
) -> ProviderResult<JoinSuccess>
where
    J: FnMut() -> JFut,
    JFut: Future<Output = ProviderResult<()>>,
    F: FnMut(String) -> FFut,
    FFut: Future<Output = ProviderResult<()>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut used_fallback = false;

    loop {
        attempt += 1;

        match join().await {
            Ok(()) => {
                return Ok(JoinSuccess {
                    attempts: attempt,
                    used_fallback,
                });
            }
            Err(e) if attempt < max_attempts => {
                warn!(attempt, error = %e, "Join failed, trying fallback messages");

                for message in &policy.fallback_messages {
                    fallback(message.clone()).await?;
                    policy.pause().await;
                }
                used_fallback = true;
            }
            Err(e) => {
                debug!(attempts = attempt, error = %e, "Join attempts exhausted");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> JoinPolicy {
        JoinPolicy::default().with_fallback_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let fallbacks = AtomicU32::new(0);

        let result = join_with_fallback(
            &policy(),
            || async { Ok(()) },
            |_| async {
                fallbacks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(result.attempts, 1);
        assert!(!result.used_fallback);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_then_success() {
        let joins = AtomicU32::new(0);
        let commands = parking_lot::Mutex::new(Vec::new());

        let result = join_with_fallback(
            &policy(),
            || async {
                if joins.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::other("rejected"))
                } else {
                    Ok(())
                }
            },
            |command| {
                commands.lock().push(command);
                async { Ok(()) }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, JoinSuccess { attempts: 2, used_fallback: true });
        assert_eq!(
            commands.lock().as_slice(),
            ["/join".to_string(), "🎧".to_string()]
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_two_attempts() {
        let joins = AtomicU32::new(0);

        let result = join_with_fallback(
            &policy(),
            || async {
                joins.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::other("rejected"))
            },
            |_| async { Ok(()) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(joins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fallback_stops_retry() {
        let joins = AtomicU32::new(0);

        let result = join_with_fallback(
            &policy(),
            || async {
                joins.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::other("rejected"))
            },
            |_| async { Err(ProviderError::NotConnected) },
        )
        .await;

        assert_eq!(result, Err(ProviderError::NotConnected));
        assert_eq!(joins.load(Ordering::SeqCst), 1);
    }
}
