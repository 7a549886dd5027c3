use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use flint::btree::BPlusTree;
use flint::buffer_pool::BufferPoolManager;
use flint::pager::Pager;
use flint::Rid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{tempdir, TempDir};

fn setup(frames: usize) -> (TempDir, Arc<BufferPoolManager>) {
    let dir = tempdir().unwrap();
    let pager = Pager::open(dir.path().join("index.db")).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(pager, frames));
    (dir, bpm)
}

fn tree(bpm: &Arc<BufferPoolManager>, leaf_max: usize, internal_max: usize, tomb_cap: usize) -> BPlusTree {
    let header = bpm.new_page().unwrap();
    BPlusTree::new(Arc::clone(bpm), header, leaf_max, internal_max, tomb_cap).unwrap()
}

fn rid(key: i64) -> Rid {
    (key as u32, (key % 100) as u16)
}

#[test]
fn sequential_inserts_split_and_round_trip() {
    let (_dir, bpm) = setup(32);
    let index = tree(&bpm, 3, 3, 2);

    for key in 1..=6 {
        assert!(index.insert(key, rid(key)).unwrap());
    }
    assert!(!index.is_empty().unwrap());

    for key in 1..=6 {
        assert_eq!(index.get_value(key).unwrap(), Some(rid(key)));
    }
    assert_eq!(index.get_value(0).unwrap(), None);
    assert_eq!(index.get_value(7).unwrap(), None);

    let keys: Vec<i64> = index
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn duplicate_insert_is_rejected() {
    let (_dir, bpm) = setup(16);
    let index = tree(&bpm, 4, 4, 2);

    assert!(index.insert(7, rid(7)).unwrap());
    assert!(!index.insert(7, rid(8)).unwrap());
    assert_eq!(index.get_value(7).unwrap(), Some(rid(7)));
}

#[test]
fn removed_key_resurrects_with_new_value() {
    let (_dir, bpm) = setup(16);
    let index = tree(&bpm, 4, 4, 2);

    assert!(index.insert(10, (1, 1)).unwrap());
    index.remove(10).unwrap();
    assert_eq!(index.get_value(10).unwrap(), None);

    assert!(index.insert(10, (2, 2)).unwrap());
    assert_eq!(index.get_value(10).unwrap(), Some((2, 2)));
}

#[test]
fn remove_of_absent_key_is_a_no_op() {
    let (_dir, bpm) = setup(16);
    let index = tree(&bpm, 4, 4, 2);

    index.remove(99).unwrap();
    index.insert(1, rid(1)).unwrap();
    index.remove(99).unwrap();
    assert_eq!(index.get_value(1).unwrap(), Some(rid(1)));
}

#[test]
fn iterator_skips_tombstones_and_crosses_leaves() {
    let (_dir, bpm) = setup(32);
    let index = tree(&bpm, 3, 3, 2);

    for key in 1..=9 {
        index.insert(key, rid(key)).unwrap();
    }
    index.remove(4).unwrap();
    index.remove(7).unwrap();

    let keys: Vec<i64> = index
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![1, 2, 3, 5, 6, 8, 9]);
}

#[test]
fn iter_from_starts_at_lower_bound() {
    let (_dir, bpm) = setup(32);
    let index = tree(&bpm, 3, 3, 0);

    for key in [2, 4, 6, 8, 10, 12] {
        index.insert(key, rid(key)).unwrap();
    }

    let keys: Vec<i64> = index
        .iter_from(5)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![6, 8, 10, 12]);

    assert!(index.iter_from(13).unwrap().is_end());
}

#[test]
fn deleting_everything_empties_the_tree() {
    let (_dir, bpm) = setup(64);
    // No tombstones: every remove shrinks a leaf physically and exercises
    // merges and redistribution on the way down.
    let index = tree(&bpm, 3, 3, 0);

    for key in 0..100 {
        assert!(index.insert(key, rid(key)).unwrap());
    }
    for key in 0..100 {
        index.remove(key).unwrap();
    }
    assert!(index.is_empty().unwrap());

    // The tree is reusable after collapsing to empty.
    for key in 0..20 {
        assert!(index.insert(key, rid(key)).unwrap());
    }
    for key in 0..20 {
        assert_eq!(index.get_value(key).unwrap(), Some(rid(key)));
    }
}

#[test]
fn interleaved_inserts_and_removes_keep_leaves_ordered() {
    let (_dir, bpm) = setup(64);
    let index = tree(&bpm, 4, 4, 2);

    let mut live = BTreeSet::new();
    for round in 0..300i64 {
        let key = (round * 37) % 101;
        if round % 3 == 2 {
            index.remove(key).unwrap();
            live.remove(&key);
        } else {
            index.insert(key, rid(key)).unwrap();
            live.insert(key);
        }
    }

    let scanned: Vec<i64> = index
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    let expected: Vec<i64> = live.iter().copied().collect();
    assert_eq!(scanned, expected, "leaf chain must enumerate live keys in strict order");

    let mut sorted = scanned.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(scanned, sorted, "no duplicates, strictly ascending");

    for key in 0..101 {
        let expect_hit = live.contains(&key);
        assert_eq!(index.get_value(key).unwrap().is_some(), expect_hit, "key {key}");
    }
}

#[test]
fn tombstone_overflow_keeps_lookups_consistent() {
    let (_dir, bpm) = setup(32);
    let index = tree(&bpm, 8, 4, 1);

    for key in 0..8 {
        index.insert(key, rid(key)).unwrap();
    }
    // With a single tombstone slot, every second remove physically evicts
    // the previous one.
    for key in 0..6 {
        index.remove(key).unwrap();
    }
    for key in 0..6 {
        assert_eq!(index.get_value(key).unwrap(), None, "key {key}");
    }
    for key in 6..8 {
        assert_eq!(index.get_value(key).unwrap(), Some(rid(key)), "key {key}");
    }
}

#[test]
fn reverse_order_inserts_build_a_valid_tree() {
    let (_dir, bpm) = setup(64);
    let index = tree(&bpm, 3, 4, 2);

    for key in (0..60).rev() {
        assert!(index.insert(key, rid(key)).unwrap());
    }
    let keys: Vec<i64> = index
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, (0..60).collect::<Vec<i64>>());
}

#[test]
fn randomized_workload_matches_an_ordered_map() {
    let (_dir, bpm) = setup(64);
    let index = tree(&bpm, 4, 4, 2);
    let mut model: BTreeMap<i64, Rid> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..2_000 {
        let key = rng.gen_range(0..200);
        if rng.gen_bool(0.6) {
            let value = rid(key);
            // A live duplicate is rejected; an absent or tombstoned key
            // goes in (the latter as a resurrection).
            let was_live = model.contains_key(&key);
            assert_eq!(index.insert(key, value).unwrap(), !was_live, "key {key}");
            model.insert(key, value);
        } else {
            index.remove(key).unwrap();
            model.remove(&key);
        }
    }

    for key in 0..200 {
        assert_eq!(
            index.get_value(key).unwrap(),
            model.get(&key).copied(),
            "key {key}"
        );
    }
    let scanned: Vec<(i64, Rid)> = index
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect();
    let expected: Vec<(i64, Rid)> = model.into_iter().collect();
    assert_eq!(scanned, expected);
}

#[test]
fn concurrent_inserts_from_disjoint_ranges() {
    let (_dir, bpm) = setup(128);
    let index = Arc::new(tree(&bpm, 8, 8, 2));

    let threads = 4;
    let per_thread = 200i64;
    let mut handles = Vec::new();
    for t in 0..threads {
        let index = Arc::clone(&index);
        handles.push(std::thread::spawn(move || {
            let base = t as i64 * per_thread;
            for key in base..base + per_thread {
                assert!(index.insert(key, rid(key)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let total = threads as i64 * per_thread;
    for key in 0..total {
        assert_eq!(index.get_value(key).unwrap(), Some(rid(key)), "key {key}");
    }
    let keys: Vec<i64> = index
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, (0..total).collect::<Vec<i64>>());
}

#[test]
fn concurrent_readers_during_writes_observe_consistent_leaves() {
    let (_dir, bpm) = setup(128);
    let index = Arc::new(tree(&bpm, 8, 8, 2));

    for key in 0..500 {
        index.insert(key, rid(key)).unwrap();
    }

    let writer = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || {
            for key in 500..700 {
                index.insert(key, rid(key)).unwrap();
            }
            for key in 0..100 {
                index.remove(key).unwrap();
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..3 {
        let index = Arc::clone(&index);
        readers.push(std::thread::spawn(move || {
            for _ in 0..20 {
                // Keys 100..500 are never touched by the writer.
                for key in (100..500).step_by(97) {
                    assert_eq!(index.get_value(key).unwrap(), Some(rid(key)));
                }
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for key in 0..100 {
        assert_eq!(index.get_value(key).unwrap(), None);
    }
    for key in 100..700 {
        assert_eq!(index.get_value(key).unwrap(), Some(rid(key)));
    }
}
