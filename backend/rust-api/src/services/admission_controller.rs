use std::sync::Arc;
use std::time::Duration;

use crate::config::{AdmissionFailureMode, AdmissionSettings};
use crate::metrics::record_admission;
use crate::models::Identity;
use crate::storage::{CacheStore, WindowCheck, WindowOutcome};
use crate::utils::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    /// The window just filled up; a block starts now.
    Denied { retry_after: Duration },
    /// An earlier block is still running.
    Blocked { retry_after: Duration },
    /// Counting store unreachable, let through.
    FailedOpen,
    /// Counting store unreachable, refused.
    FailedClosed,
    Disabled,
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            AdmissionDecision::Allowed | AdmissionDecision::FailedOpen | AdmissionDecision::Disabled
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionDecision::Denied { retry_after } | AdmissionDecision::Blocked { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AdmissionDecision::Allowed => "allowed",
            AdmissionDecision::Denied { .. } => "denied",
            AdmissionDecision::Blocked { .. } => "blocked",
            AdmissionDecision::FailedOpen => "fail_open",
            AdmissionDecision::FailedClosed => "fail_closed",
            AdmissionDecision::Disabled => "disabled",
        }
    }
}

pub fn window_key(identity: &Identity) -> String {
    format!("admission:window:{}", identity)
}

pub fn block_key(identity: &Identity) -> String {
    format!("admission:block:{}", identity)
}

/// Sliding-window admission per identity, with an escalating block once the
/// window is full. Counters live in the shared cache store under the
/// `admission:` prefix.
pub struct AdmissionController {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    settings: AdmissionSettings,
}

impl AdmissionController {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, settings: AdmissionSettings) -> Self {
        Self {
            cache,
            clock,
            settings,
        }
    }

    pub async fn admit(&self, identity: &Identity) -> AdmissionDecision {
        let decision = self.evaluate(identity).await;
        record_admission(decision.label());
        decision
    }

    async fn evaluate(&self, identity: &Identity) -> AdmissionDecision {
        if !self.settings.enabled {
            return AdmissionDecision::Disabled;
        }

        let now_ms = self.clock.now().timestamp_millis();
        let counter_key = window_key(identity);
        let block_key = block_key(identity);
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());
        let block = self.settings.block();

        let check = WindowCheck {
            counter_key: &counter_key,
            block_key: &block_key,
            member: &member,
            now_ms,
            window_ms: self.settings.window().as_millis() as i64,
            limit: self.settings.max_requests,
            block_ms: block.as_millis() as i64,
        };

        match self.cache.check_window(&check).await {
            Ok(WindowOutcome::Admitted { count }) => {
                tracing::debug!(identity = %identity, count, "Request admitted");
                AdmissionDecision::Allowed
            }
            Ok(WindowOutcome::Rejected) => {
                tracing::warn!(identity = %identity, "Admission window full, blocking identity");
                AdmissionDecision::Denied { retry_after: block }
            }
            Ok(WindowOutcome::Blocked { remaining_ms }) => AdmissionDecision::Blocked {
                retry_after: Duration::from_millis(remaining_ms.max(0) as u64),
            },
            Err(e) => match self.settings.failure_mode {
                AdmissionFailureMode::Open => {
                    tracing::warn!(identity = %identity, error = %e, "Admission store unavailable, failing open");
                    AdmissionDecision::FailedOpen
                }
                AdmissionFailureMode::Closed => {
                    tracing::error!(identity = %identity, error = %e, "Admission store unavailable, failing closed");
                    AdmissionDecision::FailedClosed
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCache;
    use crate::utils::time::ManualClock;

    fn controller(
        settings: AdmissionSettings,
    ) -> (Arc<ManualClock>, Arc<MemoryCache>, AdmissionController) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let controller = AdmissionController::new(cache.clone(), clock.clone(), settings);
        (clock, cache, controller)
    }

    #[tokio::test]
    async fn hundred_admitted_then_blocked_until_block_expires() {
        let (clock, _cache, controller) = controller(AdmissionSettings::default());
        let identity = Identity::user("u1");

        for _ in 0..100 {
            assert_eq!(controller.admit(&identity).await, AdmissionDecision::Allowed);
        }
        assert_eq!(
            controller.admit(&identity).await,
            AdmissionDecision::Denied {
                retry_after: Duration::from_secs(300)
            }
        );

        // Window has long passed but the block holds.
        clock.advance(chrono::Duration::seconds(120));
        assert!(matches!(
            controller.admit(&identity).await,
            AdmissionDecision::Blocked { .. }
        ));

        clock.advance(chrono::Duration::seconds(181));
        assert_eq!(controller.admit(&identity).await, AdmissionDecision::Allowed);
    }

    #[tokio::test]
    async fn identities_do_not_interfere() {
        let settings = AdmissionSettings {
            max_requests: 1,
            ..AdmissionSettings::default()
        };
        let (_clock, _cache, controller) = controller(settings);

        assert!(controller.admit(&Identity::user("a")).await.is_allowed());
        assert!(!controller.admit(&Identity::user("a")).await.is_allowed());
        assert!(controller.admit(&Identity::user("b")).await.is_allowed());
        assert!(controller.admit(&Identity::ip("a")).await.is_allowed());
    }

    #[tokio::test]
    async fn store_failure_follows_failure_mode() {
        let (_clock, cache, open) = controller(AdmissionSettings::default());
        cache.set_unavailable(true);
        assert_eq!(
            open.admit(&Identity::ip("1.1.1.1")).await,
            AdmissionDecision::FailedOpen
        );

        let closed_settings = AdmissionSettings {
            failure_mode: AdmissionFailureMode::Closed,
            ..AdmissionSettings::default()
        };
        let closed = AdmissionController::new(
            cache.clone(),
            Arc::new(ManualClock::default()),
            closed_settings,
        );
        let decision = closed.admit(&Identity::ip("1.1.1.1")).await;
        assert_eq!(decision, AdmissionDecision::FailedClosed);
        assert!(!decision.is_allowed());
    }
}
