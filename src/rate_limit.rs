use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

// Per-client bookkeeping: every admitted request's timestamp plus an optional block
#[derive(Debug, Default)]
pub struct ClientRecord {
    pub hits: VecDeque<Instant>,
    pub blocked_since: Option<Instant>,
}

// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    RateLimited,
    Blocked { retry_after: Duration },
}

/// Sliding-window limiter with a temporary block list layered on top.
///
/// A client has one window shared by every route; each request compares
/// that window against the ceiling of the route being invoked. Tripping a
/// ceiling rejects the request *and* blocks the client for
/// `block_duration`; while blocked, every request is refused without
/// touching the counters.
pub struct RateLimiter {
    clients: DashMap<String, ClientRecord>,
    window: Duration,
    block_duration: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration, block_duration: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            window,
            block_duration,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    pub fn check(&self, client: &str, ceiling: u32) -> Admission {
        self.check_at(client, ceiling, Instant::now())
    }

    pub fn check_at(&self, client: &str, ceiling: u32, now: Instant) -> Admission {
        let mut entry = self.clients.entry(client.to_string()).or_default();
        let record = &mut *entry;

        // block check comes first and never touches the counters
        if let Some(since) = record.blocked_since {
            let elapsed = now.saturating_duration_since(since);
            if elapsed < self.block_duration {
                return Admission::Blocked {
                    retry_after: self.block_duration - elapsed,
                };
            }
            record.blocked_since = None;
        }

        let hits = &mut record.hits;
        if let Some(window_start) = now.checked_sub(self.window) {
            while hits.front().is_some_and(|t| *t <= window_start) {
                hits.pop_front();
            }
        }

        if hits.len() >= ceiling as usize {
            record.blocked_since = Some(now);
            return Admission::RateLimited;
        }

        hits.push_back(now);
        Admission::Allowed {
            remaining: ceiling.saturating_sub(hits.len() as u32),
        }
    }

    pub fn is_blocked(&self, client: &str) -> bool {
        self.is_blocked_at(client, Instant::now())
    }

    pub fn is_blocked_at(&self, client: &str, now: Instant) -> bool {
        self.clients
            .get(client)
            .and_then(|r| r.blocked_since)
            .is_some_and(|since| now.saturating_duration_since(since) < self.block_duration)
    }

    // Drop clients with no live timestamps and no active block
    pub fn purge_idle(&self, now: Instant) -> usize {
        let before = self.clients.len();
        let window = self.window;
        let block = self.block_duration;

        self.clients.retain(|_, record| {
            let blocked = record
                .blocked_since
                .is_some_and(|since| now.saturating_duration_since(since) < block);
            let recent = record
                .hits
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window);
            blocked || recent
        });

        before - self.clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(60), Duration::from_secs(120))
    }

    #[test]
    fn allows_up_to_ceiling_then_blocks() {
        let rl = limiter();
        let base = Instant::now();

        for i in 0..5 {
            let at = base + Duration::from_secs(i);
            assert!(matches!(rl.check_at("10.0.0.2", 5, at), Admission::Allowed { .. }));
        }

        let at = base + Duration::from_secs(6);
        assert_eq!(rl.check_at("10.0.0.2", 5, at), Admission::RateLimited);
        assert!(rl.is_blocked_at("10.0.0.2", at));
    }

    #[test]
    fn remaining_counts_down() {
        let rl = limiter();
        let now = Instant::now();
        assert_eq!(rl.check_at("a", 3, now), Admission::Allowed { remaining: 2 });
        assert_eq!(rl.check_at("a", 3, now), Admission::Allowed { remaining: 1 });
        assert_eq!(rl.check_at("a", 3, now), Admission::Allowed { remaining: 0 });
    }

    #[test]
    fn blocked_for_exactly_block_duration() {
        let rl = limiter();
        let base = Instant::now();

        assert!(matches!(rl.check_at("c", 1, base), Admission::Allowed { .. }));
        assert_eq!(rl.check_at("c", 1, base), Admission::RateLimited);

        // even a generous route is refused while blocked
        let at = base + Duration::from_secs(119);
        assert!(matches!(
            rl.check_at("c", 1000, at),
            Admission::Blocked { .. }
        ));

        // expiry clears the block and the old hit has left the window
        let at = base + Duration::from_secs(120);
        assert!(matches!(rl.check_at("c", 1, at), Admission::Allowed { .. }));
        assert!(!rl.is_blocked_at("c", at));
    }

    #[test]
    fn blocked_requests_do_not_touch_counters() {
        let rl = limiter();
        let base = Instant::now();

        rl.check_at("c", 1, base);
        rl.check_at("c", 1, base);
        for i in 1..50 {
            rl.check_at("c", 5, base + Duration::from_secs(i));
        }

        let after = base + Duration::from_secs(121);
        for _ in 0..5 {
            assert!(matches!(rl.check_at("c", 5, after), Admission::Allowed { .. }));
        }
    }

    #[test]
    fn blocked_reports_retry_after() {
        let rl = limiter();
        let base = Instant::now();
        rl.check_at("c", 0, base);

        match rl.check_at("c", 10, base + Duration::from_secs(20)) {
            Admission::Blocked { retry_after } => assert_eq!(retry_after, Duration::from_secs(100)),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn window_slides() {
        let rl = limiter();
        let base = Instant::now();

        rl.check_at("c", 2, base);
        rl.check_at("c", 2, base + Duration::from_secs(30));

        // first hit falls out of the window at base + 60
        let at = base + Duration::from_secs(60);
        assert!(matches!(rl.check_at("c", 2, at), Admission::Allowed { .. }));
    }

    #[test]
    fn window_is_shared_across_routes() {
        let rl = limiter();
        let base = Instant::now();

        // five polls under a generous ceiling
        for i in 0..5 {
            let at = base + Duration::from_secs(i);
            assert!(matches!(rl.check_at("c", 1000, at), Admission::Allowed { .. }));
        }

        // a critical route sees the same window
        let at = base + Duration::from_secs(6);
        assert_eq!(rl.check_at("c", 2, at), Admission::RateLimited);
        assert!(rl.is_blocked_at("c", at));
    }

    #[test]
    fn clients_are_independent() {
        let rl = limiter();
        let now = Instant::now();

        rl.check_at("a", 1, now);
        assert_eq!(rl.check_at("a", 1, now), Admission::RateLimited);
        assert!(matches!(rl.check_at("b", 1, now), Admission::Allowed { .. }));
    }

    #[test]
    fn purge_drops_idle_clients_only() {
        let rl = limiter();
        let base = Instant::now();

        rl.check_at("idle", 10, base);
        rl.check_at("blocked", 0, base + Duration::from_secs(100));
        rl.check_at("busy", 10, base + Duration::from_secs(150));

        let removed = rl.purge_idle(base + Duration::from_secs(180));
        assert_eq!(removed, 1);
        assert_eq!(rl.tracked_clients(), 2);
    }
}
