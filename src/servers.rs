//! Server pool: ordering, failure tracking, failover probing and the
//! per-server latency metrics that drive the adaptive timeout.

use crate::config::{Config, ServerSpec};
use crate::io::clamp;
use crate::sockets::{RngSource, SocketId};
use log::debug;
use std::time::{Duration, Instant};

/// Lower bound of the adaptive timeout: roughly an RTT half-way around the
/// world.
const MIN_TIMEOUT_MS: u64 = 250;

/// Multiplier applied to average latency to produce a timeout.
const AVG_TIMEOUT_MULTIPLIER: u64 = 5;

/// Upper bound of the adaptive timeout when the user has set none larger.
const MAX_TIMEOUT_MS: u64 = 5000;

/// Metric bucket windows, in seconds. Zero means "since inception".
const BUCKET_WINDOWS: [u64; 5] = [60, 15 * 60, 60 * 60, 24 * 60 * 60, 0];

#[derive(Clone, Copy, Debug, Default)]
struct MetricBucket {
    /// Which window period the counts belong to; a bucket whose period has
    /// rolled over is reset before reuse.
    ts: u64,
    total_count: u64,
    total_ms: u64,
}

impl MetricBucket {
    fn timestamp(window: u64, now_secs: u64) -> u64 {
        if window == 0 {
            1 // inception bucket never rolls over
        } else {
            now_secs / window
        }
    }
}

/// One configured server plus its runtime state.
pub(crate) struct ServerState {
    pub spec: ServerSpec,

    /// Position in the configured list; the ordering tie-break.
    pub index: usize,

    /// Consecutive failures; reset to zero by any success.
    pub failures: u32,

    /// Earliest instant at which this server may be probed again after
    /// failing.
    pub next_probe: Option<Instant>,

    /// Lazily opened per-transport sockets.
    pub udp: Option<SocketId>,
    pub tcp: Option<SocketId>,

    /// Bumped whenever the TCP connection is torn down, so stale replies
    /// on a reused stream are never mis-attributed.
    pub tcp_generation: u64,

    metrics: [MetricBucket; BUCKET_WINDOWS.len()],
}

impl ServerState {
    fn new(spec: ServerSpec, index: usize) -> ServerState {
        ServerState {
            spec,
            index,
            failures: 0,
            next_probe: None,
            udp: None,
            tcp: None,
            tcp_generation: 0,
            metrics: Default::default(),
        }
    }

    /// Records the latency of a successful exchange into every bucket.
    pub fn record_latency(&mut self, now_secs: u64, latency: Duration) {
        let ms = (latency.as_millis() as u64).max(1);

        for (bucket, window) in self.metrics.iter_mut().zip(BUCKET_WINDOWS) {
            let ts = MetricBucket::timestamp(window, now_secs);
            if ts != bucket.ts {
                *bucket = MetricBucket {
                    ts,
                    ..MetricBucket::default()
                };
            }
            bucket.total_count += 1;
            bucket.total_ms += ms;
        }
    }

    /// The next-query timeout for this server: five times the average
    /// latency from the narrowest bucket that still has samples, clamped
    /// to `[250ms, max(user_max, 5000ms)]`. A server with no samples uses
    /// the configured base timeout.
    pub fn adaptive_timeout(
        &self,
        now_secs: u64,
        base: Duration,
        user_max: Option<Duration>,
    ) -> Duration {
        let upper = MAX_TIMEOUT_MS.max(user_max.map_or(0, |d| d.as_millis() as u64));

        for (bucket, window) in self.metrics.iter().zip(BUCKET_WINDOWS) {
            if bucket.ts != MetricBucket::timestamp(window, now_secs) || bucket.total_count == 0 {
                continue;
            }

            let avg = bucket.total_ms / bucket.total_count;
            let ms = clamp(avg * AVG_TIMEOUT_MULTIPLIER, MIN_TIMEOUT_MS, upper);
            return Duration::from_millis(ms);
        }

        base
    }
}

/// Ordered collection of servers.
pub(crate) struct ServerPool {
    pub servers: Vec<ServerState>,

    rotate: bool,
    rr_next: usize,
    retry_chance: u32,
    retry_delay: Duration,
}

impl ServerPool {
    pub fn new(config: &Config) -> ServerPool {
        let servers = config
            .servers
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, spec)| ServerState::new(spec, i))
            .collect();

        ServerPool {
            servers,
            rotate: config.rotate,
            rr_next: 0,
            retry_chance: config.server_retry_chance,
            retry_delay: config.server_retry_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Index of the best server by (failures asc, configured order asc).
    fn best(&self) -> usize {
        self.servers
            .iter()
            .min_by_key(|s| (s.failures, s.index))
            .map(|s| s.index)
            .expect("server pool is never empty")
    }

    /// Picks the server for the next attempt.
    ///
    /// In rotation mode servers take strict turns. Otherwise the best
    /// server wins, except that with probability `1/retry_chance` a
    /// previously failed server whose probe delay has elapsed is chosen
    /// instead, so a recovered server is eventually noticed.
    pub fn pick(&mut self, now: Instant, rng: &mut dyn RngSource) -> usize {
        if self.rotate {
            let idx = self.rr_next % self.servers.len();
            self.rr_next = (self.rr_next + 1) % self.servers.len();
            return idx;
        }

        let best = self.best();

        if self.servers[best].failures == 0 {
            let probe = self
                .servers
                .iter()
                .filter(|s| s.failures > 0)
                .filter(|s| s.next_probe.map_or(true, |at| now >= at))
                .map(|s| s.index)
                .next();

            if let Some(idx) = probe {
                if rng.one_in(self.retry_chance) {
                    debug!("probing previously failed server {}", idx);
                    self.servers[idx].next_probe = Some(now + self.retry_delay);
                    return idx;
                }
            }
        }

        best
    }

    /// The server to fail over to after `tried` failed: the best server
    /// other than `tried`, or `tried` itself when it is the only one.
    pub fn next_after(&self, tried: usize) -> usize {
        self.servers
            .iter()
            .filter(|s| s.index != tried)
            .min_by_key(|s| (s.failures, s.index))
            .map_or(tried, |s| s.index)
    }

    pub fn note_success(&mut self, idx: usize) {
        let server = &mut self.servers[idx];
        server.failures = 0;
        server.next_probe = None;
    }

    pub fn note_failure(&mut self, idx: usize) {
        let server = &mut self.servers[idx];
        server.failures = server.failures.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    struct FixedRng {
        hit: bool,
    }

    impl RngSource for FixedRng {
        fn rand_u16(&mut self) -> u16 {
            0x1234
        }

        fn one_in(&mut self, _n: u32) -> bool {
            self.hit
        }
    }

    fn pool(n: usize) -> ServerPool {
        let servers: Vec<IpAddr> = (0..n)
            .map(|i| IpAddr::V4(std::net::Ipv4Addr::new(192, 0, 2, i as u8 + 1)))
            .collect();
        ServerPool::new(&Config::with_servers(servers))
    }

    #[test]
    fn best_orders_by_failures_then_index() {
        let mut p = pool(3);
        assert_eq!(p.best(), 0);

        p.note_failure(0);
        assert_eq!(p.best(), 1);

        p.note_failure(1);
        p.note_failure(1);
        assert_eq!(p.best(), 2);

        p.note_success(0);
        assert_eq!(p.best(), 0);
    }

    #[test]
    fn pick_probes_failed_server_on_rng_hit() {
        let mut p = pool(2);
        p.note_failure(0);

        let now = Instant::now();

        let mut miss = FixedRng { hit: false };
        assert_eq!(p.pick(now, &mut miss), 1);

        let mut hit = FixedRng { hit: true };
        assert_eq!(p.pick(now, &mut hit), 0);

        // Probe delay now blocks a second probe.
        assert_eq!(p.pick(now, &mut hit), 1);
    }

    #[test]
    fn rotation_takes_turns() {
        let mut config = Config::with_servers(vec![
            "192.0.2.1".parse::<IpAddr>().unwrap(),
            "192.0.2.2".parse::<IpAddr>().unwrap(),
        ]);
        config.rotate = true;

        let mut p = ServerPool::new(&config);
        let mut rng = FixedRng { hit: false };
        let now = Instant::now();
        assert_eq!(p.pick(now, &mut rng), 0);
        assert_eq!(p.pick(now, &mut rng), 1);
        assert_eq!(p.pick(now, &mut rng), 0);
    }

    #[test]
    fn adaptive_timeout_bounds() {
        let base = Duration::from_millis(2000);
        let mut s = ServerState::new(ServerSpec::new("192.0.2.1".parse().unwrap()), 0);

        // No samples: base timeout.
        assert_eq!(s.adaptive_timeout(1000, base, None), base);

        // Fast server: clamped up to the minimum.
        s.record_latency(1000, Duration::from_millis(10));
        assert_eq!(
            s.adaptive_timeout(1000, base, None),
            Duration::from_millis(MIN_TIMEOUT_MS)
        );

        // Slow server: clamped down to the default maximum.
        let mut slow = ServerState::new(ServerSpec::new("192.0.2.2".parse().unwrap()), 1);
        slow.record_latency(1000, Duration::from_millis(30_000));
        assert_eq!(
            slow.adaptive_timeout(1000, base, None),
            Duration::from_millis(MAX_TIMEOUT_MS)
        );

        // A larger user maximum raises the ceiling.
        assert_eq!(
            slow.adaptive_timeout(1000, base, Some(Duration::from_secs(60))),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn buckets_roll_over() {
        let base = Duration::from_millis(2000);
        let mut s = ServerState::new(ServerSpec::new("192.0.2.1".parse().unwrap()), 0);

        s.record_latency(100, Duration::from_millis(100));

        // Two days later every windowed bucket has rolled over, but the
        // inception bucket still answers.
        let later = 100 + 2 * 24 * 60 * 60;
        assert_eq!(
            s.adaptive_timeout(later, base, None),
            Duration::from_millis(500)
        );
    }
}
