//! Sign encoding of the strongest wavelets and min-hash band keys
//!
//! An image's top coefficients are encoded as a sparse bit vector, two bits per
//! coefficient (positive, negative). Each permutation reduces that vector to a
//! single byte: the first position in the permutation whose bit is set. Bytes
//! are grouped `keys_per_table` at a time into one `i32` per hash band.

use crate::config::FingerprintConfig;

pub struct MinHashService {
    permutations: Vec<Vec<u32>>,
    hash_tables: usize,
    keys_per_table: usize,
}

impl MinHashService {
    pub fn new(config: &FingerprintConfig) -> Self {
        let universe = 2 * config.image_length * config.log_bins;
        Self {
            permutations: generate_permutations(
                config.permutation_count(),
                config.permutation_length,
                universe,
                config.permutation_seed,
            ),
            hash_tables: config.hash_tables,
            keys_per_table: config.keys_per_table,
        }
    }

    pub fn permutations(&self) -> &[Vec<u32>] {
        &self.permutations
    }

    /// Min-hash signature, one byte per permutation. A permutation that hits no
    /// set bit yields its length.
    pub fn signature(&self, bits: &[bool]) -> Vec<u8> {
        self.permutations
            .iter()
            .map(|permutation| {
                permutation
                    .iter()
                    .position(|&index| bits[index as usize])
                    .unwrap_or(permutation.len()) as u8
            })
            .collect()
    }

    /// Pack the signature into one little-endian `i32` per band
    pub fn group_into_bins(&self, signature: &[u8]) -> Vec<i32> {
        signature
            .chunks(self.keys_per_table)
            .take(self.hash_tables)
            .map(|keys| {
                let mut bytes = [0u8; 4];
                bytes[..keys.len()].copy_from_slice(keys);
                i32::from_le_bytes(bytes)
            })
            .collect()
    }

    /// Hash bins of a decomposed image, `None` for a silent image
    pub fn hash_image(&self, image: &[Vec<f32>], top_wavelets: usize) -> Option<Vec<i32>> {
        let bits = encode_top_wavelets(image, top_wavelets);
        if !bits.iter().any(|&b| b) {
            return None;
        }
        Some(self.group_into_bins(&self.signature(&bits)))
    }
}

/// Sign-encode the `top` largest coefficients by magnitude
///
/// Coefficient `k` of the flattened image sets bit `2k` when positive and bit
/// `2k + 1` when negative. Zero coefficients set nothing.
pub fn encode_top_wavelets(image: &[Vec<f32>], top: usize) -> Vec<bool> {
    let flat: Vec<f32> = image.iter().flatten().copied().collect();
    let mut bits = vec![false; 2 * flat.len()];
    if flat.is_empty() || top == 0 {
        return bits;
    }

    let mut indexes: Vec<usize> = (0..flat.len()).collect();
    let by_magnitude =
        |a: &usize, b: &usize| flat[*b].abs().total_cmp(&flat[*a].abs()).then(a.cmp(b));
    if top < indexes.len() {
        indexes.select_nth_unstable_by(top - 1, by_magnitude);
        indexes.truncate(top);
    }

    for k in indexes {
        let value = flat[k];
        if value > 0.0 {
            bits[2 * k] = true;
        } else if value < 0.0 {
            bits[2 * k + 1] = true;
        }
    }
    bits
}

/// `count` permutations, each `length` distinct indexes out of `universe`,
/// drawn with a partial Fisher-Yates shuffle from a seeded xorshift generator
pub fn generate_permutations(count: usize, length: usize, universe: usize, seed: u64) -> Vec<Vec<u32>> {
    let mut state = seed | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let length = length.min(universe);
    (0..count)
        .map(|_| {
            let mut pool: Vec<u32> = (0..universe as u32).collect();
            for i in 0..length {
                let j = i + (next() % (universe - i) as u64) as usize;
                pool.swap(i, j);
            }
            pool.truncate(length);
            pool
        })
        .collect()
}
