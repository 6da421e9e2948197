//! Counting Bloom Filter integration tests
//!
//! Covers construction, counted add/remove semantics, the fill estimate and
//! directory persistence.

use fading_bloom::{CountingBloomFilter, FilterError};

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_construction_derives_dimensions() {
    let filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    assert_eq!(filter.num_buckets(), 11028);
    assert_eq!(filter.num_hashes(), 8);
    assert_eq!(filter.capacity(), 1000);
    assert_eq!(filter.num_non_zero(), 0);
}

#[test]
fn test_construction_rejects_bad_parameters() {
    assert!(matches!(
        CountingBloomFilter::new(0, 0.005),
        Err(FilterError::InvalidConfig { param: "capacity", .. })
    ));
    assert!(matches!(
        CountingBloomFilter::new(1000, 0.0),
        Err(FilterError::InvalidConfig { param: "error", .. })
    ));
    assert!(CountingBloomFilter::new(1000, 1.2).is_err());
}

// ============================================================================
// Membership and counts
// ============================================================================

#[test]
fn test_basic_membership() {
    let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    for i in 0..100u32 {
        filter.add(format!("key_{i}").as_bytes());
    }
    for i in 0..100u32 {
        assert!(filter.contains(format!("key_{i}").as_bytes()));
    }
    assert!(!filter.contains(b"never added"));
}

#[test]
fn test_counts_survive_partial_removal() {
    let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    filter.add(b"target");
    filter.add(b"target");
    filter.remove(b"target");

    assert!(filter.contains(b"target"), "one count must remain");
    assert_eq!(filter.num_non_zero(), filter.num_hashes());

    filter.remove(b"target");
    assert!(!filter.contains(b"target"));
    assert_eq!(filter.num_non_zero(), 0);
}

#[test]
fn test_multi_count_operations() {
    let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    filter.add_n(b"bulk", 5);
    filter.remove_n(b"bulk", 3);
    assert!(filter.contains(b"bulk"));
    filter.remove_n(b"bulk", 3);
    assert!(!filter.contains(b"bulk"));
}

#[test]
fn test_remove_all_acts_as_expiration() {
    let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    filter.add_n(b"twice", 2);
    filter.add(b"once");

    filter.remove_all();
    assert!(filter.contains(b"twice"));
    assert!(!filter.contains(b"once"));

    filter.remove_all();
    assert!(!filter.contains(b"twice"));
    assert_eq!(filter.num_non_zero(), 0);
}

#[test]
fn test_size_tracks_insertions() {
    let mut filter = CountingBloomFilter::new(2000, 0.005).unwrap();
    assert_eq!(filter.size(), 0.0);

    let mut previous = 0.0;
    for batch in 1..=5u32 {
        for i in 0..100u32 {
            filter.add(format!("key_{batch}_{i}").as_bytes());
        }
        let size = filter.size();
        assert!(size > previous, "estimate must grow with insertions");
        previous = size;
    }
    assert!((previous - 500.0).abs() < 25.0, "estimate {previous} off 500");
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_save_load_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting");

    let mut filter = CountingBloomFilter::new(1000, 0.005).unwrap();
    for i in 0..200u32 {
        filter.add(format!("key_{i}").as_bytes());
    }
    filter.save_to(&path).unwrap();
    assert!(path.join("meta.json").exists());
    assert!(path.join("bloom.npy").exists());

    let restored = CountingBloomFilter::load(&path).unwrap();
    assert_eq!(restored.num_non_zero(), filter.num_non_zero());
    assert_eq!(restored.num_buckets(), filter.num_buckets());
    for i in 0..200u32 {
        assert!(restored.contains(format!("key_{i}").as_bytes()));
    }
    assert!(!restored.contains(b"key_900"));
}

#[test]
fn test_repeat_saves_replace_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting");

    let mut filter =
        CountingBloomFilter::with_options(1000, 0.005, Some(7), Some(path.clone())).unwrap();
    filter.add(b"first");
    filter.save().unwrap();

    let mut second = CountingBloomFilter::load(&path).unwrap();
    assert_eq!(second.id(), Some(7));
    second.add(b"second");
    second.save().unwrap();

    let third = CountingBloomFilter::load(&path).unwrap();
    assert!(third.contains(b"first"));
    assert!(third.contains(b"second"));
}

#[test]
fn test_save_without_data_path_is_disabled() {
    let filter = CountingBloomFilter::new(100, 0.01).unwrap();
    assert!(matches!(
        filter.save(),
        Err(FilterError::PersistenceDisabled)
    ));
}

#[test]
fn test_load_rejects_truncated_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counting");

    let filter = CountingBloomFilter::new(100, 0.01).unwrap();
    filter.save_to(&path).unwrap();

    std::fs::write(path.join("bloom.npy"), b"short").unwrap();
    assert!(matches!(
        CountingBloomFilter::load(&path),
        Err(FilterError::Corrupted(_))
    ));
}
