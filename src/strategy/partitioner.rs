use super::Partitioner;

const MURMUR_MULTIPLIER: u64 = 0xc6a4_a793_5bd1_e995;
const MURMUR_SHIFT: u32 = 47;
const MURMUR_SEED: u64 = 1;

/// MurmurHash64A over `data`.
pub fn murmur_hash64(
    data: &[u8],
    seed: u64,
) -> u64 {
    let m = MURMUR_MULTIPLIER;
    let mut h = seed ^ (data.len() as u64).wrapping_mul(m);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(bytes);
        k = k.wrapping_mul(m);
        k ^= k >> MURMUR_SHIFT;
        k = k.wrapping_mul(m);
        h ^= k;
        h = h.wrapping_mul(m);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate() {
            h ^= (*byte as u64) << (8 * i);
        }
        h = h.wrapping_mul(m);
    }

    h ^= h >> MURMUR_SHIFT;
    h = h.wrapping_mul(m);
    h ^= h >> MURMUR_SHIFT;
    h
}

/// Partitions by the absolute value of the signed 64-bit murmur hash, modulo the
/// partition count.
#[derive(Debug, Default, Clone, Copy)]
pub struct Murmur64Partitioner;

impl Partitioner for Murmur64Partitioner {
    fn partition(
        &self,
        key: &[u8],
        num_partitions: u32,
    ) -> u32 {
        let hash = murmur_hash64(key, MURMUR_SEED) as i64;
        (hash % num_partitions.max(1) as i64).unsigned_abs() as u32
    }
}
