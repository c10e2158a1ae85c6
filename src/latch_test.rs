use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{sync::Arc, thread};

use super::*;

#[test]
fn test_latch() {
    let seed: u64 = random();
    println!("test_latch seed:{}", seed);

    let n_readers = 4;
    let n_writers = 2;
    let n_ops = 100_000;
    let size = 64;

    let latch: Arc<Latch<Vec<u64>>> = Arc::new(Latch::new(vec![0; size]));

    let writer = |latch: Arc<Latch<Vec<u64>>>, seed: u64, n_ops: usize| {
        let mut rng = SmallRng::seed_from_u64(seed);
        for _i in 0..n_ops {
            let n = rng.gen::<u64>();
            {
                let mut value = latch.write();
                for slot in value.iter_mut() {
                    *slot = n;
                }
            }
        }
    };

    let reader = |latch: Arc<Latch<Vec<u64>>>, n_ops: usize| {
        for _i in 0..n_ops {
            let value = latch.read();
            let first = value[0];
            for slot in value.iter() {
                assert_eq!(*slot, first, "torn read");
            }
        }
    };

    let mut handles = vec![];
    for id in 0..n_writers {
        let latch = Arc::clone(&latch);
        let seed = seed + ((id as u64) * 100);
        handles.push(thread::spawn(move || writer(latch, seed, n_ops)));
    }
    for _id in 0..n_readers {
        let latch = Arc::clone(&latch);
        handles.push(thread::spawn(move || reader(latch, n_ops)));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = latch.to_stats();
    assert!(!stats.write_latched);
    assert_eq!(stats.n_readers, 0);
    println!("test_latch stats:{}", stats);
}

#[test]
fn test_latch_write_exclusion() {
    let latch = Latch::new(10_u64);
    {
        let mut w = latch.write();
        *w += 1;
    }
    {
        let r = latch.read();
        assert_eq!(*r, 11);
    }
    assert_eq!(latch.into_inner(), 11);
}
