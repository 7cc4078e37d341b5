use super::*;

fn space(length: u32) -> KeySpace {
    KeySpace::new(length).unwrap()
}

fn range(space: KeySpace, start: u32, length: u32) -> KeyRange {
    space.range(start, length).unwrap()
}

#[test]
fn construction() {
    assert_eq!(KeySpace::new(0), Err(KeyspaceError::EmptyKeyspace));

    let ks = space(360);
    assert_eq!(
        ks.range(0, 361),
        Err(KeyspaceError::LengthOutOfBounds {
            length: 361,
            space: 360
        })
    );

    // Start is reduced modulo the ring.
    let r = range(ks, 365, 10);
    assert_eq!(r.start(), 5);
    assert_eq!(r.end(), 15);

    // Full ranges are anchored at zero.
    assert_eq!(range(ks, 100, 360), ks.full_range());
    assert!(ks.full_range().is_full());
    assert!(ks.empty_range(7).is_empty());
    assert_eq!(range(ks, 350, 20).end(), 10);
}

#[test]
fn contains_positions_across_zero() {
    let ks = space(100);
    let wrapping = range(ks, 90, 20);

    for pos in (90..100).chain(0..10) {
        assert!(wrapping.contains_position(pos), "{pos} should be in {wrapping}");
    }
    for pos in 10..90 {
        assert!(!wrapping.contains_position(pos), "{pos} should not be in {wrapping}");
    }
    assert!(!ks.empty_range(0).contains_position(0));
}

#[test]
fn containment() {
    let ks = space(100);
    let wrapping = range(ks, 90, 20);

    assert!(wrapping.contains(&range(ks, 95, 5)));
    assert!(wrapping.contains(&range(ks, 95, 10)));
    assert!(wrapping.contains(&range(ks, 0, 10)));
    assert!(!wrapping.contains(&range(ks, 0, 11)));
    assert!(!wrapping.contains(&range(ks, 85, 10)));
    assert!(wrapping.contains(&ks.empty_range(50)));
    assert!(ks.full_range().contains(&wrapping));
    assert!(!ks.empty_range(0).contains(&wrapping));

    // Different keyspace sizes never contain each other.
    assert!(!range(space(200), 90, 20).contains(&range(ks, 95, 5)));
}

#[test]
fn overlaps() {
    let ks = space(100);
    let wrapping = range(ks, 90, 20);

    assert!(wrapping.overlaps_with(&range(ks, 5, 10)));
    assert!(range(ks, 5, 10).overlaps_with(&wrapping));
    assert!(!wrapping.overlaps_with(&range(ks, 10, 80)));
    assert!(!range(ks, 10, 80).overlaps_with(&wrapping));

    // Adjacent ranges touch but do not overlap.
    assert!(!range(ks, 0, 10).overlaps_with(&range(ks, 10, 10)));
    assert!(!ks.empty_range(5).overlaps_with(&range(ks, 0, 10)));
    assert!(ks.full_range().overlaps_with(&range(ks, 42, 1)));
}

#[test]
fn intersections() {
    let ks = space(100);
    let wrapping = range(ks, 90, 20);

    assert_eq!(wrapping.intersection(&range(ks, 5, 10)), range(ks, 5, 5));
    assert_eq!(range(ks, 5, 10).intersection(&wrapping), range(ks, 5, 5));
    assert_eq!(wrapping.intersection(&range(ks, 80, 15)), range(ks, 90, 5));
    assert_eq!(wrapping.intersection(&ks.full_range()), wrapping);

    let disjoint = wrapping.intersection(&range(ks, 20, 10));
    assert!(disjoint.is_empty());
    assert_eq!(disjoint.start(), 90);

    // Two arcs meeting twice: [60, 20) and [10, 70) share [60, 80) and [10, 20).
    let a = range(ks, 60, 60);
    let b = range(ks, 10, 70);
    assert_eq!(a.intersection(&b), range(ks, 60, 20));
    assert_eq!(b.intersection(&a), range(ks, 60, 20));

    // Equal pieces resolve to the lower start regardless of order.
    let c = range(ks, 50, 60);
    let d = range(ks, 0, 60);
    assert_eq!(c.intersection(&d), range(ks, 0, 10));
    assert_eq!(d.intersection(&c), range(ks, 0, 10));
}

#[test]
fn unions() {
    let ks = space(100);
    let wrapping = range(ks, 90, 20);

    assert_eq!(wrapping.union(&range(ks, 5, 10)).unwrap(), range(ks, 90, 25));
    assert_eq!(range(ks, 5, 10).union(&wrapping).unwrap(), range(ks, 90, 25));
    assert_eq!(wrapping.union(&wrapping).unwrap(), wrapping);

    // Adjacent ranges merge.
    assert_eq!(range(ks, 0, 10).union(&range(ks, 10, 10)).unwrap(), range(ks, 0, 20));
    assert_eq!(range(ks, 10, 10).union(&range(ks, 0, 10)).unwrap(), range(ks, 0, 20));
    assert_eq!(range(ks, 80, 20).union(&range(ks, 0, 5)).unwrap(), range(ks, 80, 25));

    // Empty ranges are the identity.
    assert_eq!(wrapping.union(&ks.empty_range(40)).unwrap(), wrapping);
    assert_eq!(ks.empty_range(40).union(&wrapping).unwrap(), wrapping);

    // Arcs closing the ring become the full range.
    assert_eq!(range(ks, 0, 60).union(&range(ks, 50, 60)).unwrap(), ks.full_range());

    assert!(matches!(
        wrapping.union(&range(ks, 30, 10)),
        Err(KeyspaceError::DisjointRanges(_, _))
    ));
    assert_eq!(
        wrapping.union(&range(space(200), 0, 5)),
        Err(KeyspaceError::KeyspaceMismatch(100, 200))
    );
}

#[test]
fn linear_allocation() {
    let ks = space(1024);

    assert_eq!(ks.linear_range(0, 4, 1).unwrap(), range(ks, 0, 256));
    assert_eq!(ks.linear_range(3, 4, 2).unwrap(), range(ks, 768, 512));
    assert!(ks.linear_range(3, 4, 2).unwrap().contains_position(100));
    assert_eq!(ks.linear_range(1, 3, 3).unwrap(), ks.full_range());
    assert_eq!(
        ks.linear_range(4, 4, 1),
        Err(KeyspaceError::IndexOutOfBounds { index: 4, count: 4 })
    );

    // Uneven divisions still tile the ring.
    let ks = space(10);
    let total: u32 = (0..3).map(|i| ks.linear_range(i, 3, 1).unwrap().length()).sum();
    assert_eq!(total, 10);
}

#[test]
fn key_positions() {
    let ks = space(1024);
    let pos = ks.position("photos/2024/cat.jpg");
    assert!(pos < 1024);
    assert_eq!(pos, ks.position(b"photos/2024/cat.jpg"));
}

#[test]
fn serde_validates() {
    let ks = space(100);
    let r = range(ks, 90, 20);
    let json = serde_json::to_string(&r).unwrap();
    assert_eq!(serde_json::from_str::<KeyRange>(&json).unwrap(), r);

    assert!(serde_json::from_str::<KeyRange>(r#"{"space":100,"start":0,"length":101}"#).is_err());
    assert!(serde_json::from_str::<KeySpace>("0").is_err());
}
