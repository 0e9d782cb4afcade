//! Validity-time expiry under a paused clock, plus window properties

use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use network::dupset::{DuplicateResult, DuplicateSet};
use types::Address;

fn orig() -> Address {
    "10.0.0.1".parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn duplicate_entries_expire_with_wall_clock() {
    let vtime = Duration::from_secs(5);
    let mut set = DuplicateSet::new();

    assert_eq!(
        set.add(1, orig(), 10, vtime, Instant::now()),
        DuplicateResult::Newest
    );
    assert_eq!(
        set.add(1, orig(), 10, vtime, Instant::now()),
        DuplicateResult::Current
    );

    tokio::time::advance(Duration::from_secs(5)).await;

    // the entry was evicted, the same number is newest again
    assert_eq!(
        set.add(1, orig(), 10, vtime, Instant::now()),
        DuplicateResult::Newest
    );
}

#[tokio::test(start_paused = true)]
async fn fresh_numbers_rearm_the_validity_timer() {
    let vtime = Duration::from_secs(5);
    let mut set = DuplicateSet::new();

    set.add(1, orig(), 10, vtime, Instant::now());
    tokio::time::advance(Duration::from_secs(4)).await;
    // a newer number re-arms the timer
    set.add(1, orig(), 11, vtime, Instant::now());
    tokio::time::advance(Duration::from_secs(4)).await;

    // 8s after creation but only 4s after the re-arm
    assert_eq!(
        set.add(1, orig(), 11, vtime, Instant::now()),
        DuplicateResult::Current
    );
}

proptest! {
    /// Whatever the arrival order, a sequence number the set called
    /// fresh is never fresh again while the entry lives.
    #[test]
    fn fresh_results_never_repeat(seqnos in prop::collection::vec(any::<u16>(), 1..200)) {
        let now = Instant::now();
        let vtime = Duration::from_secs(600);
        let mut set = DuplicateSet::new();

        for s in seqnos {
            let first = set.add(1, orig(), s, vtime, now);
            let again = set.add(1, orig(), s, vtime, now);
            if first.is_fresh() {
                prop_assert!(
                    matches!(again, DuplicateResult::Current | DuplicateResult::Duplicate),
                    "seqno {} was fresh twice ({:?} then {:?})", s, first, again
                );
            }
        }
    }
}
