//! Duplicate detection with a sliding sequence number window
//!
//! Each protocol keeps one set for "already processed" and one for
//! "already forwarded"; each interface keeps one for received packet
//! identities. Entries are keyed by `(message type, originator)` and
//! hold the highest sequence number seen plus a 32-bit history window
//! (bit k set means `current - k` was observed).
//!
//! A long run of sequence numbers far behind the window is taken as an
//! originator reboot and resets the entry. Entries expire with their
//! validity time; the clock is `tokio::time::Instant` so tests can run
//! paused and advance time explicitly.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use types::{seqno_difference, Address, DUPLICATE_WINDOW};

/// Consecutive too-old results after which the entry resets.
const MAX_TOO_OLD: u8 = 8;

/// Classification of one sequence number against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateResult {
    /// More than 31 behind the newest and not (yet) a reboot.
    TooOld,
    /// Inside the window and already seen.
    Duplicate,
    /// Exactly the newest seen number.
    Current,
    /// Inside the window, seen for the first time (out of order).
    New,
    /// Newer than everything seen before.
    Newest,
}

impl DuplicateResult {
    /// True for results that allow processing/forwarding.
    pub fn is_fresh(self) -> bool {
        matches!(self, DuplicateResult::New | DuplicateResult::Newest)
    }
}

#[derive(Debug)]
struct DuplicateEntry {
    current: u16,
    history: u32,
    too_old_count: u8,
    expires: Instant,
}

impl DuplicateEntry {
    fn fresh(seqno: u16, expires: Instant) -> Self {
        Self {
            current: seqno,
            history: 1,
            too_old_count: 0,
            expires,
        }
    }

    fn classify(&mut self, seqno: u16, update: bool) -> DuplicateResult {
        let diff = seqno_difference(seqno, self.current);

        if diff == 0 {
            return DuplicateResult::Current;
        }

        if diff > 0 {
            if update {
                if diff >= DUPLICATE_WINDOW {
                    self.history = 1;
                } else {
                    self.history <<= diff as u32;
                    self.history |= 1;
                }
                self.current = seqno;
                self.too_old_count = 0;
            }
            return DuplicateResult::Newest;
        }

        if diff < -(DUPLICATE_WINDOW - 1) {
            if update {
                self.too_old_count = self.too_old_count.saturating_add(1);
                if self.too_old_count > MAX_TOO_OLD {
                    // long series of too-old numbers: the originator
                    // most likely rebooted with a new sequence space
                    self.current = seqno;
                    self.history = 1;
                    self.too_old_count = 0;
                    return DuplicateResult::Newest;
                }
            }
            return DuplicateResult::TooOld;
        }

        let bit = 1u32 << (-diff) as u32;
        let seen = self.history & bit != 0;
        if update {
            self.history |= bit;
            self.too_old_count = 0;
        }
        if seen {
            DuplicateResult::Duplicate
        } else {
            DuplicateResult::New
        }
    }
}

/// One duplicate set, bounded by the validity timers of its entries.
#[derive(Debug, Default)]
pub struct DuplicateSet {
    entries: HashMap<(u8, Address), DuplicateEntry>,
}

impl DuplicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify and record `seqno` for `(msg_type, originator)`. A
    /// fresh result re-arms the entry's validity timer with `vtime`.
    pub fn add(
        &mut self,
        msg_type: u8,
        originator: Address,
        seqno: u16,
        vtime: Duration,
        now: Instant,
    ) -> DuplicateResult {
        let key = (msg_type, originator);
        if let Some(entry) = self.entries.get(&key) {
            if entry.expires <= now {
                self.entries.remove(&key);
            }
        }

        let result = match self.entries.get_mut(&key) {
            None => {
                self.entries
                    .insert(key, DuplicateEntry::fresh(seqno, now + vtime));
                DuplicateResult::Newest
            }
            Some(entry) => {
                let result = entry.classify(seqno, true);
                if result.is_fresh() {
                    entry.expires = now + vtime;
                }
                result
            }
        };
        trace!(msg_type, %originator, seqno, ?result, "duplicate set");
        result
    }

    /// Classify without recording anything.
    pub fn test(&mut self, msg_type: u8, originator: Address, seqno: u16, now: Instant) -> DuplicateResult {
        let key = (msg_type, originator);
        match self.entries.get_mut(&key) {
            Some(entry) if entry.expires > now => entry.classify(seqno, false),
            _ => DuplicateResult::Newest,
        }
    }

    /// Drop entries whose validity time has passed.
    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.expires > now);
    }

    /// Earliest validity expiry, for the event loop's timer.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.expires).min()
    }
}
