//! Hash function tests
//!
//! The bucket-index derivation is part of the persistence format: the exact
//! murmur words and the double-hashed indices are pinned so a filter written
//! by one build is readable by every other.

use fading_bloom::common::hash::{bucket_indexes, murmur3_x64_128};

#[test]
fn test_empty_input_is_zero() {
    assert_eq!(murmur3_x64_128(b"", 0), (0, 0));
}

#[test]
fn test_reference_digest() {
    let (h1, h2) = murmur3_x64_128(b"The quick brown fox jumps over the lazy dog", 0);
    assert_eq!(h1, 0xe34b_bc7b_bc07_1b6c);
    assert_eq!(h2, 0x7a43_3ca9_c49a_9347);
}

#[test]
fn test_pinned_words_for_test_key() {
    let (h1, h2) = murmur3_x64_128(b"test", 0);
    assert_eq!(h1, 0xac7d_28cc_74bd_e19d);
    assert_eq!(h2, 0x9a12_8231_f9bd_4d82);
}

#[test]
fn test_pinned_bucket_indexes() {
    // Twelve indices for key "test" over 17281 buckets; stable forever
    let indexes: Vec<usize> = bucket_indexes(b"test", 17281, 12).collect();
    assert_eq!(
        indexes,
        vec![4858, 15635, 7431, 927, 11704, 3500, 14277, 6073, 16850, 10346, 2142, 12919]
    );
}

#[test]
fn test_double_hashing_matches_words() {
    let (h1, h2) = murmur3_x64_128(b"any key", 0);
    let m = 9973u64;
    let manual: Vec<usize> = (0..5u64)
        .map(|i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
        .collect();
    let derived: Vec<usize> = bucket_indexes(b"any key", 9973, 5).collect();
    assert_eq!(manual, derived);
}

#[test]
fn test_distribution_covers_buckets() {
    // 2000 keys over 128 buckets should leave no bucket untouched
    let mut hits = vec![0u32; 128];
    for i in 0..2000u32 {
        for index in bucket_indexes(format!("key_{i}").as_bytes(), 128, 4) {
            hits[index] += 1;
        }
    }
    assert!(hits.iter().all(|&count| count > 0));
}
