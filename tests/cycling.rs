// tests/cycling.rs

mod common;
use crate::common::init_tracing;

use proptest::prelude::*;

use cycleflow::cycling::{CyclePoint, Interval, Sequence};
use cycleflow::errors::CycleflowError;
use cycleflow::types::CyclingMode;

fn int_point(p: i64) -> CyclePoint {
    CyclePoint::Integer(p)
}

fn dt_point(s: &str) -> CyclePoint {
    CyclePoint::parse(s, CyclingMode::Datetime).expect("valid date-time point")
}

#[test]
fn integer_sequence_next_prev_and_membership() {
    init_tracing();

    // 1, 3, 5, 7, 9
    let seq = Sequence::new(int_point(1), Some(int_point(9)), Interval::Integer(2)).unwrap();

    assert_eq!(seq.first_point().unwrap(), Some(int_point(1)));
    assert_eq!(seq.next_after(&int_point(1)).unwrap(), Some(int_point(3)));
    assert_eq!(seq.next_after(&int_point(2)).unwrap(), Some(int_point(3)));
    assert_eq!(seq.next_after(&int_point(-5)).unwrap(), Some(int_point(1)));
    assert_eq!(seq.next_after(&int_point(9)).unwrap(), None);

    assert!(seq.is_on_sequence(&int_point(5)).unwrap());
    assert!(!seq.is_on_sequence(&int_point(4)).unwrap());
    assert!(!seq.is_on_sequence(&int_point(11)).unwrap());

    assert_eq!(seq.prev_or_equal(&int_point(8)).unwrap(), Some(int_point(7)));
    assert_eq!(seq.prev_or_equal(&int_point(7)).unwrap(), Some(int_point(7)));
    assert_eq!(seq.prev_or_equal(&int_point(0)).unwrap(), None);
    // Past the end, prev clamps back onto the sequence.
    assert_eq!(seq.prev_or_equal(&int_point(50)).unwrap(), Some(int_point(9)));
}

#[test]
fn excluded_points_are_skipped_not_stepped_over() {
    init_tracing();

    let mut seq = Sequence::new(int_point(1), Some(int_point(9)), Interval::Integer(2)).unwrap();
    seq.exclude(int_point(5));

    assert!(!seq.is_on_sequence(&int_point(5)).unwrap());
    assert_eq!(seq.next_after(&int_point(3)).unwrap(), Some(int_point(7)));
    assert_eq!(seq.prev_or_equal(&int_point(5)).unwrap(), Some(int_point(3)));
}

#[test]
fn included_points_are_members_even_off_grid() {
    init_tracing();

    let mut seq = Sequence::new(int_point(0), Some(int_point(10)), Interval::Integer(5)).unwrap();
    seq.include(int_point(3));

    assert!(seq.is_on_sequence(&int_point(3)).unwrap());
    assert_eq!(seq.next_after(&int_point(0)).unwrap(), Some(int_point(3)));
    assert_eq!(seq.next_after(&int_point(3)).unwrap(), Some(int_point(5)));
}

#[test]
fn never_skips_a_non_excluded_in_bound_point() {
    init_tracing();

    let mut seq = Sequence::new(int_point(2), Some(int_point(20)), Interval::Integer(3)).unwrap();
    seq.exclude(int_point(8));

    // Walking next_after from before the start visits every member exactly
    // once, in order.
    let mut points = Vec::new();
    let mut cursor = int_point(-10);
    while let Some(p) = seq.next_after(&cursor).unwrap() {
        points.push(p);
        cursor = p;
    }
    assert_eq!(
        points,
        vec![
            int_point(2),
            int_point(5),
            int_point(11),
            int_point(14),
            int_point(17),
            int_point(20),
        ]
    );

    // next(prev_or_equal(P)) is P itself when P is a member.
    for p in &points {
        let prev = seq.prev_or_equal(p).unwrap().unwrap();
        assert_eq!(prev, *p);
    }
}

#[test]
fn datetime_sequence_stepping() {
    init_tracing();

    let seq = Sequence::new(
        dt_point("20260101T0000Z"),
        Some(dt_point("20260102T0000Z")),
        Interval::parse("PT6H", CyclingMode::Datetime).unwrap(),
    )
    .unwrap();

    assert_eq!(
        seq.next_after(&dt_point("20260101T0000Z")).unwrap(),
        Some(dt_point("20260101T0600Z"))
    );
    assert!(seq.is_on_sequence(&dt_point("20260101T1800Z")).unwrap());
    assert!(!seq.is_on_sequence(&dt_point("20260101T1900Z")).unwrap());
    assert_eq!(seq.next_after(&dt_point("20260102T0000Z")).unwrap(), None);
}

#[test]
fn month_offsets_clamp_and_do_not_round_trip() {
    init_tracing();

    let jan31 = dt_point("20260131T0000Z");
    let plus_month = jan31.add(&Interval::Months(1)).unwrap();
    assert_eq!(plus_month, dt_point("20260228T0000Z"));

    // Month-end clamping makes calendar offsets non-invertible.
    let back = plus_month.add(&Interval::Months(-1)).unwrap();
    assert_ne!(back, jan31);
    assert_eq!(back, dt_point("20260128T0000Z"));
}

#[test]
fn cross_mode_operations_fail_with_mode_mismatch() {
    init_tracing();

    let err = int_point(1).try_cmp(&dt_point("20260101T0000Z")).unwrap_err();
    assert!(matches!(err, CycleflowError::CyclingModeMismatch(_)));

    let err = int_point(1).add(&Interval::Seconds(60)).unwrap_err();
    assert!(matches!(err, CycleflowError::CyclingModeMismatch(_)));

    let err = dt_point("20260101T0000Z")
        .add(&Interval::Integer(1))
        .unwrap_err();
    assert!(matches!(err, CycleflowError::CyclingModeMismatch(_)));
}

#[test]
fn interval_parsing() {
    init_tracing();

    assert_eq!(
        Interval::parse("P3", CyclingMode::Integer).unwrap(),
        Interval::Integer(3)
    );
    assert_eq!(
        Interval::parse("-P2", CyclingMode::Integer).unwrap(),
        Interval::Integer(-2)
    );
    assert_eq!(
        Interval::parse("PT90S", CyclingMode::Datetime).unwrap(),
        Interval::Seconds(90)
    );
    assert_eq!(
        Interval::parse("P1DT6H", CyclingMode::Datetime).unwrap(),
        Interval::Seconds(108_000)
    );
    assert_eq!(
        Interval::parse("P1Y2M", CyclingMode::Datetime).unwrap(),
        Interval::Months(14)
    );
    // Calendar and exact parts don't mix.
    assert!(Interval::parse("P1M3D", CyclingMode::Datetime).is_err());
    assert!(Interval::parse("garbage", CyclingMode::Integer).is_err());
}

proptest! {
    /// Integer-mode point arithmetic is a group under interval addition.
    #[test]
    fn integer_interval_addition_is_associative(
        p in -1_000_000i64..1_000_000,
        a in -10_000i64..10_000,
        b in -10_000i64..10_000,
    ) {
        let point = CyclePoint::Integer(p);
        let left = point
            .add(&Interval::Integer(a)).unwrap()
            .add(&Interval::Integer(b)).unwrap();
        let right = point.add(&Interval::Integer(a + b)).unwrap();
        prop_assert_eq!(left, right);
    }

    /// Integer offsets round-trip exactly.
    #[test]
    fn integer_offset_round_trips(
        p in -1_000_000i64..1_000_000,
        a in -10_000i64..10_000,
    ) {
        let point = CyclePoint::Integer(p);
        let round = point
            .add(&Interval::Integer(a)).unwrap()
            .sub(&Interval::Integer(a)).unwrap();
        prop_assert_eq!(round, point);
    }

    /// next_after from a member's predecessor always returns the member:
    /// the sequence never skips a non-excluded in-bound point.
    #[test]
    fn next_after_prev_returns_the_point(
        start in -100i64..100,
        step in 1i64..20,
        k in 0i64..50,
    ) {
        let seq = Sequence::new(
            CyclePoint::Integer(start),
            None,
            Interval::Integer(step),
        ).unwrap();
        let member = CyclePoint::Integer(start + k * step);
        prop_assert!(seq.is_on_sequence(&member).unwrap());

        let just_before = CyclePoint::Integer(start + k * step - 1);
        prop_assert_eq!(seq.next_after(&just_before).unwrap(), Some(member));
    }
}
