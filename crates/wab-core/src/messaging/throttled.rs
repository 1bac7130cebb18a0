use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{GroupDescriptor, RecipientId},
    messaging::port::MessagingPort,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound calls (account-wide flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same recipient.
    pub per_recipient_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(250),
            per_recipient_min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that spaces outbound calls.
///
/// Broadcasts hit many groups back to back; the backend bans accounts that
/// burst, so every call reserves a global slot and a per-recipient slot.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_recipient: Mutex<HashMap<RecipientId, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_recipient: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, recipient: &RecipientId) -> Arc<Mutex<IntervalLimiter>> {
        let now = Instant::now();
        let mut map = self.per_recipient.lock().await;
        // A lapsed limiter behaves exactly like a fresh one, so it can go.
        map.retain(|_, lim| {
            Arc::strong_count(lim) > 1 || lim.try_lock().map_or(true, |l| l.next > now)
        });
        map.entry(recipient.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_recipient_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_recipient(&self, recipient: &RecipientId) {
        let global_wait = { self.global.lock().await.reserve() };
        let recipient_wait = {
            let lim = self.limiter_for(recipient).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(recipient_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<()> {
        self.throttle_recipient(to).await;
        self.inner.send_text(to, text).await
    }

    async fn list_groups(&self) -> Result<Vec<GroupDescriptor>> {
        // Not addressed to anyone; global spacing only.
        self.throttle_global().await;
        self.inner.list_groups().await
    }
}

#[cfg(test)]
impl ThrottledMessenger {
    async fn tracked_recipients(&self) -> usize {
        self.per_recipient.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rid, FakeMessenger};

    #[tokio::test]
    async fn first_reservation_is_immediate_then_spaced() {
        let mut lim = IntervalLimiter::new(Duration::from_secs(10));
        assert_eq!(lim.reserve(), Duration::ZERO);

        let second = lim.reserve();
        assert!(second > Duration::from_secs(9), "got {second:?}");
        assert!(second <= Duration::from_secs(10));

        let third = lim.reserve();
        assert!(third > Duration::from_secs(19), "got {third:?}");
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let mut lim = IntervalLimiter::new(Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(lim.reserve(), Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn lapsed_recipient_limiters_are_dropped() {
        let fake = FakeMessenger::new();
        let m = ThrottledMessenger::new(
            fake.clone(),
            ThrottleConfig {
                global_min_interval: Duration::ZERO,
                per_recipient_min_interval: Duration::from_millis(20),
            },
        );

        m.send_text(&rid("a@s.whatsapp.net"), "hi").await.unwrap();
        m.send_text(&rid("b@s.whatsapp.net"), "hi").await.unwrap();
        assert_eq!(m.tracked_recipients().await, 2);

        sleep(Duration::from_millis(60)).await;
        m.send_text(&rid("c@s.whatsapp.net"), "hi").await.unwrap();
        assert_eq!(m.tracked_recipients().await, 1);
        assert_eq!(fake.sent().len(), 3);
    }

    #[tokio::test]
    async fn recipient_spacing_still_applies_while_tracked() {
        let fake = FakeMessenger::new();
        let m = ThrottledMessenger::new(
            fake,
            ThrottleConfig {
                global_min_interval: Duration::ZERO,
                per_recipient_min_interval: Duration::from_millis(50),
            },
        );
        let a = rid("a@s.whatsapp.net");

        let start = Instant::now();
        m.send_text(&a, "one").await.unwrap();
        m.send_text(&a, "two").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
