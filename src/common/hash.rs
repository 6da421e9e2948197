//! Hash functions for the filter family
//!
//! Every filter in this crate derives its bucket indices from
//! MurmurHash3-x64-128, a non-cryptographic hash designed by Austin Appleby
//! with excellent distribution and speed. The hash is part of the persistence
//! format: a filter restored from disk must index the same buckets for the
//! same keys, so the function is fixed for the lifetime of the crate.

/// MurmurHash3-x64-128
///
/// Returns the two 64-bit words of the 128-bit digest. The pair feeds the
/// double-hashing scheme in [`bucket_indexes`]; `h1` alone is a high-quality
/// 64-bit hash of the key.
///
/// # Arguments
/// * `data` - The data to hash
/// * `seed` - The hash seed
///
/// # Examples
/// ```
/// use fading_bloom::common::hash::murmur3_x64_128;
///
/// let (h1, h2) = murmur3_x64_128(b"hello world", 0);
/// assert_ne!(h1, h2);
/// ```
pub fn murmur3_x64_128(data: &[u8], seed: u32) -> (u64, u64) {
    const C1: u64 = 0x87c3_7b91_1142_53d5;
    const C2: u64 = 0x4cf5_ad43_2745_937f;

    let mut h1 = u64::from(seed);
    let mut h2 = u64::from(seed);

    let mut blocks = data.chunks_exact(16);
    for block in blocks.by_ref() {
        let k1 = u64::from_le_bytes(block[0..8].try_into().unwrap());
        let k2 = u64::from_le_bytes(block[8..16].try_into().unwrap());

        h1 ^= k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        let mut k2: u64 = 0;
        for (i, &byte) in tail[8..].iter().enumerate() {
            k2 ^= u64::from(byte) << (i * 8);
        }
        h2 ^= k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
    }
    if !tail.is_empty() {
        let mut k1: u64 = 0;
        for (i, &byte) in tail[..tail.len().min(8)].iter().enumerate() {
            k1 ^= u64::from(byte) << (i * 8);
        }
        h1 ^= k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// Finalization mix for 64-bit murmur words
#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Derives `num_hashes` bucket indices for a key via double hashing
///
/// Index `i` is `(h1 + i * h2) mod num_buckets` in wrapping 64-bit
/// arithmetic, with `(h1, h2)` the murmur words of the key under seed 0.
///
/// # Examples
/// ```
/// use fading_bloom::common::hash::bucket_indexes;
///
/// let indexes: Vec<usize> = bucket_indexes(b"key", 1000, 4).collect();
/// assert_eq!(indexes.len(), 4);
/// assert!(indexes.iter().all(|&i| i < 1000));
/// ```
pub fn bucket_indexes(
    key: &[u8],
    num_buckets: usize,
    num_hashes: usize,
) -> impl Iterator<Item = usize> {
    let (h1, h2) = murmur3_x64_128(key, 0);
    let m = num_buckets as u64;
    (0..num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(murmur3_x64_128(b"", 0), (0, 0));
    }

    #[test]
    fn test_known_digest() {
        // Published reference digest for the x64 128-bit variant
        let (h1, h2) = murmur3_x64_128(b"The quick brown fox jumps over the lazy dog", 0);
        assert_eq!(h1, 0xe34b_bc7b_bc07_1b6c);
        assert_eq!(h2, 0x7a43_3ca9_c49a_9347);
    }

    #[test]
    fn test_block_and_tail_lengths() {
        // Exercise every tail length around the 16-byte block boundary
        let data: Vec<u8> = (0u8..48).collect();
        let mut seen = std::collections::HashSet::new();
        for len in 0..=data.len() {
            assert!(seen.insert(murmur3_x64_128(&data[..len], 0)));
        }
    }

    #[test]
    fn test_seed_changes_hash() {
        let a = murmur3_x64_128(b"key", 0);
        let b = murmur3_x64_128(b"key", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bucket_indexes_deterministic() {
        let first: Vec<usize> = bucket_indexes(b"key", 1000, 8).collect();
        let second: Vec<usize> = bucket_indexes(b"key", 1000, 8).collect();
        assert_eq!(first, second);
    }
}
