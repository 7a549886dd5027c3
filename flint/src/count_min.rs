//! Count-min sketch: a `depth x width` counter matrix with independently
//! seeded hash functions. Counts never underestimate. Increments are relaxed
//! atomics, so concurrent inserts from many threads are safe.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct CountMinSketch<K> {
    width: usize,
    depth: usize,
    counters: Vec<AtomicU32>,
    _key: PhantomData<fn(&K)>,
}

impl<K: Hash> CountMinSketch<K> {
    /// Panics if either dimension is zero.
    pub fn new(width: usize, depth: usize) -> Self {
        assert!(width > 0 && depth > 0, "width and depth must be positive");
        let mut counters = Vec::with_capacity(width * depth);
        counters.resize_with(width * depth, || AtomicU32::new(0));
        Self {
            width,
            depth,
            counters,
            _key: PhantomData,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Column for `item` in `row`, using the row index as the hash seed.
    fn column(&self, row: usize, item: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(0x9E37_79B9_7F4A_7C15u64.wrapping_mul(row as u64 + 1));
        item.hash(&mut hasher);
        (hasher.finish() % self.width as u64) as usize
    }

    pub fn insert(&self, item: &K) {
        for row in 0..self.depth {
            let column = self.column(row, item);
            self.counters[row * self.width + column].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Estimated count: the row-wise minimum, never below the true count.
    pub fn count(&self, item: &K) -> u32 {
        let mut min_count = u32::MAX;
        for row in 0..self.depth {
            let column = self.column(row, item);
            let current = self.counters[row * self.width + column].load(Ordering::Relaxed);
            min_count = min_count.min(current);
        }
        min_count
    }

    /// Adds `other` element-wise. Panics on mismatched dimensions.
    pub fn merge(&self, other: &CountMinSketch<K>) {
        assert!(
            self.width == other.width && self.depth == other.depth,
            "cannot merge sketches of different dimensions"
        );
        for (target, source) in self.counters.iter().zip(&other.counters) {
            target.fetch_add(source.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// The `k` candidates with the highest estimated counts, descending.
    /// Ties break arbitrarily.
    pub fn top_k(&self, k: usize, candidates: &[K]) -> Vec<(K, u32)>
    where
        K: Clone,
    {
        let mut counted: Vec<(K, u32)> = candidates
            .iter()
            .map(|candidate| (candidate.clone(), self.count(candidate)))
            .collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1));
        counted.truncate(k);
        counted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_never_underestimate() {
        let sketch = CountMinSketch::new(64, 4);
        for i in 0..200i64 {
            for _ in 0..(i % 5 + 1) {
                sketch.insert(&i);
            }
        }
        for i in 0..200i64 {
            assert!(sketch.count(&i) >= (i % 5 + 1) as u32);
        }

        let empty: CountMinSketch<i64> = CountMinSketch::new(64, 4);
        assert_eq!(empty.count(&-1), 0);
    }

    #[test]
    fn merge_adds_counts() {
        let a = CountMinSketch::new(32, 3);
        let b = CountMinSketch::new(32, 3);
        for _ in 0..3 {
            a.insert(&"x");
        }
        for _ in 0..4 {
            b.insert(&"x");
        }
        a.merge(&b);
        assert!(a.count(&"x") >= 7);
    }

    #[test]
    #[should_panic(expected = "different dimensions")]
    fn merge_rejects_mismatched_dimensions() {
        let a: CountMinSketch<i64> = CountMinSketch::new(32, 3);
        let b: CountMinSketch<i64> = CountMinSketch::new(16, 3);
        a.merge(&b);
    }

    #[test]
    fn top_k_ranks_candidates_by_estimate() {
        let sketch = CountMinSketch::new(128, 4);
        for _ in 0..10 {
            sketch.insert(&"hot");
        }
        for _ in 0..5 {
            sketch.insert(&"warm");
        }
        sketch.insert(&"cold");

        let top = sketch.top_k(2, &["cold", "warm", "hot"]);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "hot");
        assert_eq!(top[1].0, "warm");
    }

    #[test]
    fn clear_zeroes_the_matrix() {
        let sketch = CountMinSketch::new(16, 2);
        sketch.insert(&7i64);
        sketch.clear();
        assert_eq!(sketch.count(&7i64), 0);
    }

    #[test]
    fn concurrent_inserts_do_not_lose_updates() {
        let sketch = Arc::new(CountMinSketch::new(64, 4));
        let threads = 8;
        let per_thread = 1000;

        let mut handles = Vec::new();
        for _ in 0..threads {
            let sketch = Arc::clone(&sketch);
            handles.push(std::thread::spawn(move || {
                for _ in 0..per_thread {
                    sketch.insert(&42i64);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(sketch.count(&42i64) >= threads * per_thread);
    }
}
