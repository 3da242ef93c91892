use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher13;

use crate::types::Queue;

/// Stable 64-bit key for a queue identity.
///
/// Uses SipHash-1-3 with fixed keys so the same queue hashes identically
/// across processes and restarts, unlike `DefaultHasher`.
pub fn queue_key(queue: &Queue) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    queue.topic.hash(&mut hasher);
    queue.broker_name.hash(&mut hasher);
    queue.queue_id.hash(&mut hasher);
    hasher.finish()
}

/// Jump consistent hash: maps `key` onto one of `num_buckets` buckets.
///
/// Growing from N to N+1 buckets moves only ~1/(N+1) of the keys, and every
/// moved key lands in the new bucket.
///
/// Lamping & Veach, "A Fast, Minimal Memory, Consistent Hash Algorithm",
/// https://arxiv.org/abs/1406.2294
pub fn jump_consistent_hash(mut key: u64, num_buckets: u32) -> u32 {
    assert!(num_buckets > 0, "num_buckets must be positive");

    let mut bucket: i64 = -1;
    let mut next: i64 = 0;
    while next < i64::from(num_buckets) {
        bucket = next;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        let ratio = f64::from(1u32 << 31) / ((key >> 33).wrapping_add(1) as f64);
        next = ((bucket + 1) as f64 * ratio) as i64;
    }

    bucket as u32
}
