use super::*;

#[test]
fn test_ticker_gate() {
    let ticker = Ticker::new(50);
    assert_eq!(ticker.to_next_tick(), 0);
    assert!(ticker.skip_cleanup());

    ticker.set_next_tick(49);
    assert!(ticker.skip_cleanup());

    ticker.set_next_tick(50);
    assert!(!ticker.skip_cleanup());

    ticker.mark_cleanup();
    assert!(ticker.skip_cleanup());

    ticker.set_next_tick(99);
    assert!(ticker.skip_cleanup());
    ticker.set_next_tick(100);
    assert!(!ticker.skip_cleanup());
}

#[test]
fn test_ticker_backwards() {
    // a clock stepping backwards must not underflow the gate.
    let ticker = Ticker::new(50);
    ticker.set_next_tick(1000);
    ticker.mark_cleanup();
    ticker.set_next_tick(10);
    assert!(ticker.skip_cleanup());
}

#[test]
fn test_system_clock() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(a > 0);
    assert!(b >= a);
}
