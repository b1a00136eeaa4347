#[cfg(test)]
mod tests {
    use crate::clock::{elapsed_since, secs_to_ns, Clock, MockClock, MonotonicClock};

    #[test]
    fn mock_clock_starts_at_zero() {
        let clock = MockClock::new();
        assert_eq!(clock.now_ns(), 0);
    }

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::new();
        clock.advance_secs(3);
        assert_eq!(clock.now_ns(), 3_000_000_000);
        clock.advance(500);
        assert_eq!(clock.now_ns(), 3_000_000_500);
    }

    #[test]
    fn mock_clock_set_is_absolute() {
        let clock = MockClock::new();
        clock.advance_secs(10);
        clock.set(1);
        assert_eq!(clock.now_ns(), 1);
    }

    #[test]
    fn elapsed_since_never_underflows() {
        // a clock read taken before `stamp_ns` must not panic or wrap.
        assert_eq!(elapsed_since(5, 10), 0);
        assert_eq!(elapsed_since(10, 5), 5);
    }

    #[test]
    fn secs_to_ns_matches_nanos_per_sec() {
        assert_eq!(secs_to_ns(1), 1_000_000_000);
        assert_eq!(secs_to_ns(0), 0);
    }

    #[test]
    fn monotonic_clock_is_nondecreasing() {
        let clock = MonotonicClock::new();
        let first = clock.now_ns();
        let second = clock.now_ns();
        assert!(second >= first);
    }
}
