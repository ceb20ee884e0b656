/// Fixed bucketing hash for tile → split assignment.
///
/// 64-bit FNV-1a over the UTF-8 bytes of the tile's canonical string
/// (`tile_<x>_<y>`), reduced modulo 100. The constants and the input format are
/// part of the on-disk contract: changing either reshuffles every dataset.

pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Number of buckets; one per integer percentage point.
pub const BUCKETS: u64 = 100;

pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET_BASIS;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Bucket in `[0, 100)` for a canonical tile string.
pub fn bucket(canonical: &str) -> u8 {
    (fnv1a_64(canonical.as_bytes()) % BUCKETS) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn bucket_in_range_and_stable() {
        for x in -50..50 {
            let key = format!("tile_{x}_{}", x * 3);
            let b = bucket(&key);
            assert!(b < 100);
            assert_eq!(b, bucket(&key));
        }
    }

    #[test]
    fn buckets_spread_over_many_tiles() {
        let mut counts = [0usize; 10];
        for x in -50..50 {
            for y in -50..50 {
                counts[bucket(&format!("tile_{x}_{y}")) as usize / 10] += 1;
            }
        }
        // 10_000 tiles over 10 deciles: each should hold roughly 1000.
        for (i, &c) in counts.iter().enumerate() {
            assert!((700..1300).contains(&c), "decile {i} holds {c}");
        }
    }
}
