use super::*;

const MINUTE: i64 = 60_000;

fn default_assigner() -> SlidingWindows {
    // The production default: 5-minute windows sliding every minute.
    SlidingWindows::of(Duration::from_secs(300), Duration::from_secs(60))
}

// ── TimeWindow ────────────────────────────────────────────────────────────

#[test]
fn test_time_window_contains_half_open() {
    let w = TimeWindow::new(0, 10_000);
    assert!(w.contains(0));
    assert!(w.contains(9_999));
    assert!(!w.contains(10_000)); // end is exclusive
    assert!(!w.contains(-1));
}

#[test]
fn test_time_window_closed_at_watermark() {
    let w = TimeWindow::new(0, 10_000);
    assert!(!w.is_closed_at(9_999));
    assert!(w.is_closed_at(10_000));
    assert!(w.is_closed_at(20_000));
}

// ── SlidingWindows ────────────────────────────────────────────────────────

#[test]
fn test_event_belongs_to_length_over_slide_windows() {
    let wins = default_assigner().assign_windows(7 * MINUTE + 30_000);
    assert_eq!(wins.len(), 5);
    for w in &wins {
        assert!(w.contains(7 * MINUTE + 30_000), "{w} should contain event");
    }
}

#[test]
fn test_assignment_matches_window_set_definition() {
    // For all t: assigned set == {[s, s+L) : s multiple of S, s <= t < s+L}.
    let assigner = default_assigner();
    for t in [0, 1, 59_999, 60_000, 299_999, 300_000, 12_345_678] {
        let mut expected = Vec::new();
        let mut s = (t / MINUTE - 5) * MINUTE;
        while s <= t {
            if s % MINUTE == 0 && t < s + 5 * MINUTE && t >= s {
                expected.push(TimeWindow::new(s, s + 5 * MINUTE));
            }
            s += MINUTE;
        }
        expected.sort();
        let mut actual = assigner.assign_windows(t);
        actual.sort();
        assert_eq!(actual, expected, "window set mismatch for t={t}");
    }
}

#[test]
fn test_boundary_timestamp_joins_starting_window() {
    // t exactly on a slide boundary: member of the window starting at t,
    // not of the one ending at t.
    let wins = default_assigner().assign_windows(5 * MINUTE);
    assert!(wins.contains(&TimeWindow::new(5 * MINUTE, 10 * MINUTE)));
    assert!(!wins.contains(&TimeWindow::new(0, 5 * MINUTE)));
}

#[test]
fn test_negative_timestamps_align_correctly() {
    let assigner = SlidingWindows::of(Duration::from_secs(10), Duration::from_secs(5));
    let wins = assigner.assign_windows(-7_000);
    assert_eq!(wins.len(), 2);
    for w in &wins {
        assert!(w.contains(-7_000), "{w} should contain -7000");
        assert_eq!(w.start.rem_euclid(5_000), 0);
    }
}

#[test]
fn test_tumbling_degenerate_case() {
    // length == slide: exactly one window per event.
    let assigner = SlidingWindows::of(Duration::from_secs(60), Duration::from_secs(60));
    let wins = assigner.assign_windows(90_000);
    assert_eq!(wins, vec![TimeWindow::new(60_000, 120_000)]);
}

// ── AverageAggregate ──────────────────────────────────────────────────────

#[test]
fn test_average_accumulates_and_finalizes() {
    let agg = AverageAggregate;
    let mut acc = agg.create_accumulator();
    agg.add(&mut acc, 10.0);
    agg.add(&mut acc, 20.0);
    agg.add(&mut acc, 30.0);
    assert_eq!(acc.count, 3);
    assert_eq!(agg.get_result(acc), Some(20.0));
}

#[test]
fn test_average_empty_accumulator_yields_none() {
    let agg = AverageAggregate;
    let acc = agg.create_accumulator();
    assert_eq!(agg.get_result(acc), None);
}

#[test]
fn test_average_merge_combines_partials() {
    let agg = AverageAggregate;
    let mut left = agg.create_accumulator();
    agg.add(&mut left, 10.0);
    let mut right = agg.create_accumulator();
    agg.add(&mut right, 30.0);
    agg.add(&mut right, 50.0);
    agg.merge(&mut left, right);
    assert_eq!(left.count, 3);
    assert_eq!(agg.get_result(left), Some(30.0));
}

#[test]
fn test_custom_aggregate_is_pluggable() {
    // The trait supports shapes other than averaging.
    struct MaxAggregate;
    impl AggregateFunction for MaxAggregate {
        type Acc = Option<f64>;
        fn create_accumulator(&self) -> Option<f64> {
            None
        }
        fn add(&self, acc: &mut Option<f64>, value: f64) {
            *acc = Some(acc.map_or(value, |m: f64| m.max(value)));
        }
        fn merge(&self, acc: &mut Option<f64>, other: Option<f64>) {
            if let Some(v) = other {
                self.add(acc, v);
            }
        }
        fn get_result(&self, acc: Option<f64>) -> Option<f64> {
            acc
        }
    }

    let agg = MaxAggregate;
    let mut acc = agg.create_accumulator();
    agg.add(&mut acc, 3.0);
    agg.add(&mut acc, 7.0);
    agg.add(&mut acc, 5.0);
    assert_eq!(agg.get_result(acc), Some(7.0));
}
