//! Property-Based Tests for the Fast Tier
//!
//! Uses proptest to check capacity, byte accounting and LRU behaviour over
//! arbitrary operation sequences.

use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::{CacheStats, FastTier};

// == Test Configuration ==
const TEST_TTL: Duration = Duration::from_secs(300);

// == Strategies ==
/// Small key space so operations collide often
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e][0-9]".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum TierOp {
    Insert { key: String, size: usize },
    Get { key: String },
    Remove { key: String },
}

fn tier_op_strategy() -> impl Strategy<Value = TierOp> {
    prop_oneof![
        (key_strategy(), 1usize..64).prop_map(|(key, size)| TierOp::Insert { key, size }),
        key_strategy().prop_map(|key| TierOp::Get { key }),
        key_strategy().prop_map(|key| TierOp::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Item count and byte size never exceed their limits, and the running
    // byte counter always equals the sum of stored entry sizes.
    #[test]
    fn prop_limits_and_byte_accounting(
        max_items in 1usize..8,
        max_bytes in 64usize..256,
        ops in prop::collection::vec(tier_op_strategy(), 1..80)
    ) {
        let now = Instant::now();
        let mut tier: FastTier<usize> = FastTier::new(max_items, max_bytes);
        let mut sizes: HashMap<String, usize> = HashMap::new();

        for op in ops {
            match op {
                TierOp::Insert { key, size } => {
                    tier.insert(key.clone(), size, TEST_TTL, size, now);
                    sizes.insert(key, size);
                }
                TierOp::Get { key } => {
                    tier.get(&key, now);
                }
                TierOp::Remove { key } => {
                    tier.remove(&key);
                }
            }

            prop_assert!(tier.len() <= max_items, "item cap exceeded");
            prop_assert!(tier.size_bytes() <= max_bytes, "byte cap exceeded");

            let expected: usize = sizes
                .iter()
                .filter(|(key, _)| tier.peek(key).is_some())
                .map(|(_, size)| *size)
                .sum();
            prop_assert_eq!(tier.size_bytes(), expected);
        }
    }

    // Hits and misses counted from `get` results match what a stats
    // recorder fed the same outcomes reports.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(tier_op_strategy(), 1..50)) {
        let now = Instant::now();
        let mut tier: FastTier<usize> = FastTier::new(100, 1024 * 1024);
        let mut stats = CacheStats::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                TierOp::Insert { key, size } => {
                    tier.insert(key, size, TEST_TTL, size, now);
                }
                TierOp::Get { key } => match tier.get(&key, now) {
                    Some(_) => {
                        expected_hits += 1;
                        stats.record_fast_tier_hit();
                    }
                    None => {
                        expected_misses += 1;
                        stats.record_miss();
                    }
                },
                TierOp::Remove { key } => {
                    tier.remove(&key);
                }
            }
        }

        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        let total = expected_hits + expected_misses;
        if total > 0 {
            let rate = expected_hits as f64 / total as f64;
            prop_assert!((stats.hit_rate() - rate).abs() < 1e-9);
        }
    }

    // Filling the tier with distinct keys always evicts in insertion order
    // unless a key was read in between.
    #[test]
    fn prop_recently_read_key_survives(extra in 1usize..5) {
        let now = Instant::now();
        let capacity = 4;
        let mut tier: FastTier<usize> = FastTier::new(capacity, 1024);

        for i in 0..capacity {
            tier.insert(format!("k{i}"), i, TEST_TTL, 1, now);
        }
        tier.get("k0", now);

        for i in 0..extra.min(capacity - 1) {
            tier.insert(format!("new{i}"), i, TEST_TTL, 1, now);
        }

        prop_assert!(tier.peek("k0").is_some(), "recently read key was evicted");
        prop_assert!(tier.peek("k1").is_none(), "oldest unread key survived");
    }
}
