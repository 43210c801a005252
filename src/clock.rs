/// Wall-clock-immune elapsed-seconds sources for the liveness monitor.
///
/// Timeout decisions must survive operator clock steps: a jump backward must
/// not make the subject look freshly alive, and a jump forward must not fire
/// a spurious timeout. Both implementations here count seconds since daemon
/// start from sources the wall clock cannot touch.
use tokio::time::Instant;

/// Elapsed-seconds source. `now()` is non-decreasing across calls.
pub trait Clock {
    fn now(&mut self) -> u64;
}

/// Clock backed by a high-resolution monotonic instant. This is the
/// implementation used in production.
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&mut self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Clock backed by a wrapping raw tick counter (an OS or hardware tick
/// source that rolls over at `tick_mask`). Overflow is corrected by assuming
/// exactly one wrap whenever a sample is smaller than its predecessor, which
/// holds as long as sampling happens more often than the wrap period; the
/// monitor's poll interval (seconds) is far below any realistic wrap period.
#[allow(dead_code)]
pub struct TickClock<F> {
    source: F,
    tick_mask: u64,
    ticks_per_sec: u64,
    last_ticks: u64,
    extra_secs: u64,
}

impl<F> TickClock<F>
where
    F: FnMut() -> u64,
{
    /// `source` yields raw tick values; `tick_mask` is the counter's maximum
    /// value (a power of two minus one); `ticks_per_sec` is its resolution.
    #[allow(dead_code)]
    pub fn new(source: F, tick_mask: u64, ticks_per_sec: u64) -> Self {
        Self {
            source,
            tick_mask,
            ticks_per_sec: ticks_per_sec.max(1),
            last_ticks: 0,
            extra_secs: 0,
        }
    }
}

impl<F> Clock for TickClock<F>
where
    F: FnMut() -> u64,
{
    fn now(&mut self) -> u64 {
        let ticks = (self.source)() & self.tick_mask;
        if ticks < self.last_ticks {
            self.extra_secs += (self.tick_mask + 1) / self.ticks_per_sec;
        }
        self.last_ticks = ticks;
        ticks / self.ticks_per_sec + self.extra_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scripted(samples: Vec<u64>) -> TickClock<impl FnMut() -> u64> {
        let mut iter = samples.into_iter();
        TickClock::new(move || iter.next().expect("ran out of tick samples"), 0xFF, 1)
    }

    #[test]
    fn test_tick_clock_basic_elapsed() {
        let mut clock = scripted(vec![10, 25, 200]);
        assert_eq!(clock.now(), 10);
        assert_eq!(clock.now(), 25);
        assert_eq!(clock.now(), 200);
    }

    #[test]
    fn test_tick_clock_corrects_single_wraparound() {
        // Mask 0xFF: range is 256 ticks. 200 -> 50 wrapped once, so the
        // elapsed delta is (256 - 200) + 50 = 106 seconds.
        let mut clock = scripted(vec![200, 50]);
        assert_eq!(clock.now(), 200);
        assert_eq!(clock.now(), 50 + 256);
    }

    #[test]
    fn test_tick_clock_monotonic_across_multiple_wraps() {
        let mut clock = scripted(vec![10, 250, 40, 200, 30, 30, 100]);
        let mut prev = 0;
        for _ in 0..7 {
            let now = clock.now();
            assert!(now >= prev, "clock went backwards: {} < {}", now, prev);
            prev = now;
        }
        // Two wraps happened: 250->40 and 200->30.
        assert_eq!(prev, 100 + 2 * 256);
    }

    #[test]
    fn test_tick_clock_divides_by_resolution() {
        let mut iter = vec![500u64, 1000].into_iter();
        let mut clock = TickClock::new(move || iter.next().unwrap(), 0x7FFF_FFFF, 100);
        assert_eq!(clock.now(), 5);
        assert_eq!(clock.now(), 10);
    }

    #[test]
    fn test_tick_clock_equal_samples_do_not_wrap() {
        let mut clock = scripted(vec![42, 42, 42]);
        assert_eq!(clock.now(), 42);
        assert_eq!(clock.now(), 42);
        assert_eq!(clock.now(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_tracks_elapsed_seconds() {
        let mut clock = MonotonicClock::new();
        assert_eq!(clock.now(), 0);
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(clock.now(), 7);
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(clock.now(), 107);
    }
}
