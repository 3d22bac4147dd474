//! Deterministic hashing for variant draws
//!
//! `std::collections::hash_map::DefaultHasher` uses random keys per process;
//! everything here produces the same output for the same input on every run
//! and platform, so a hashed draw for a disambiguator is reproducible.

/// Mix a seed with two words (splitmix64 finalizer over the combination)
pub fn mix(seed: u64, a: u64, b: u64) -> u64 {
    let mut z = seed
        .wrapping_add(a.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(b.rotate_left(32) ^ 0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Hash a byte slice with a seed
///
/// FNV-1a over the bytes, periodically re-mixed, with a final [`mix`].
pub fn hash_bytes_with_seed(bytes: &[u8], seed: u64) -> u64 {
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut h = seed ^ 0xcbf2_9ce4_8422_2325;
    for (i, &b) in bytes.iter().enumerate() {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
        if i % 8 == 7 {
            h = mix(seed, h, i as u64);
        }
    }
    mix(seed, h, bytes.len() as u64)
}

/// Hash a string with a seed
pub fn hash_str_with_seed(s: &str, seed: u64) -> u64 {
    hash_bytes_with_seed(s.as_bytes(), seed)
}
