use super::*;

fn live_keys(chain: &Chain<u64, u64>) -> Vec<u64> {
    let mut keys = vec![];
    let mut ptr = chain.first_live();
    while !chain.is_end(ptr) {
        let entry = unsafe { &*ptr };
        keys.push(*entry.as_key().unwrap());
        ptr = entry.as_next();
    }
    keys
}

#[test]
fn test_chain_reservoir() {
    let chain: Chain<u64, u64> = Chain::new(4);
    assert_eq!(chain.to_allocated(), 4);
    assert_eq!(chain.live_count(), 0);

    for i in 0..6 {
        let ptr = chain.take();
        unsafe { (*ptr).init(i, i * 10, i as u32) };
        chain.advance();
    }
    // 4 pre-allocated, one batch to cover the overflow.
    assert_eq!(chain.to_allocated(), 4 + RESERVOIR_BATCH);
    assert_eq!(chain.live_count(), 6);
    assert_eq!(live_keys(&chain), vec![0, 1, 2, 3, 4, 5]);
    chain.validate().unwrap();
}

#[test]
fn test_chain_recycle() {
    let chain: Chain<u64, u64> = Chain::new(8);
    let mut ptrs = vec![];
    for i in 0..3 {
        let ptr = chain.take();
        unsafe { (*ptr).init(i, i, i as u32) };
        chain.advance();
        ptrs.push(ptr);
    }

    // surviving entries keep their order after an unlink.
    chain.unlink(ptrs[1]);
    chain.recycle(ptrs[1]);
    assert_eq!(live_keys(&chain), vec![0, 2]);
    chain.validate().unwrap();

    // the recycled entry is the next allocation, blank again.
    let ptr = chain.take();
    assert_eq!(ptr, ptrs[1]);
    assert!(unsafe { &*ptr }.is_blank());
    assert_eq!(chain.to_allocated(), 8);
}

#[test]
fn test_chain_reset_keep() {
    let chain: Chain<u64, u64> = Chain::new(4);
    for i in 0..4 {
        let ptr = chain.take();
        unsafe { (*ptr).init(i, i, i as u32) };
        chain.advance();
    }
    assert_eq!(chain.live_count(), 4);

    chain.reset_keep();
    assert_eq!(chain.live_count(), 0);
    // entries went back to the pool, not to the allocator.
    assert_eq!(chain.to_allocated(), 4);
    for i in 0..4 {
        let ptr = chain.take();
        assert!(unsafe { &*ptr }.is_blank());
        unsafe { (*ptr).init(i + 100, i, i as u32) };
        chain.advance();
    }
    assert_eq!(chain.to_allocated(), 4);
    assert_eq!(live_keys(&chain), vec![100, 101, 102, 103]);
}

#[test]
fn test_chain_reset_abandon() {
    let chain: Chain<u64, u64> = Chain::new(4);
    for i in 0..4 {
        let ptr = chain.take();
        unsafe { (*ptr).init(i, i, i as u32) };
        chain.advance();
    }

    chain.reset_abandon();
    assert_eq!(chain.live_count(), 0);
    // reservoir went with the old chain, the next take re-allocates.
    let ptr = chain.take();
    assert!(unsafe { &*ptr }.is_blank());
    assert_eq!(chain.to_allocated(), 4 + RESERVOIR_BATCH);
}
