//! Received byte range tracking for one incoming message.
//!
//! Chunks may arrive out of order, may overlap when a sender retransmits, and the
//! `$` flag may be seen before the holes are filled. [`Counter`] keeps the set of
//! received byte ranges so the message can be declared complete exactly once all
//! of `[0, size)` is present and the end flag has been seen.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Counter {
    /// Disjoint, non-adjacent `start -> end` (exclusive) ranges.
    ranges: BTreeMap<u64, u64>,
    size: Option<u64>,
    count: u64,
    end_of_message: bool,
}

impl Counter {
    /// A counter for a message whose total size is known up front.
    pub fn with_size(size: u64) -> Self {
        Self { size: Some(size), ..Default::default() }
    }

    /// A counter for a message of unknown size.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// Number of distinct bytes registered so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Marks `[start, start + len)` as received.
    ///
    /// Returns true when the call marked at least one byte that was not present
    /// before. Overlapping registrations only count the new bytes.
    pub fn register(&mut self, start: u64, len: u64) -> bool {
        let mut end = start.saturating_add(len);
        if let Some(size) = self.size {
            end = end.min(size);
        }
        if end <= start {
            return false;
        }

        let touching: Vec<(u64, u64)> =
            self.ranges.range(..=end).rev().take_while(|(_, range_end)| **range_end >= start).map(|(s, e)| (*s, *e)).collect();

        let mut already_present = 0;
        let (mut merged_start, mut merged_end) = (start, end);
        for (range_start, range_end) in touching {
            let overlap_start = range_start.max(start);
            let overlap_end = range_end.min(end);
            if overlap_end > overlap_start {
                already_present += overlap_end - overlap_start;
            }
            merged_start = merged_start.min(range_start);
            merged_end = merged_end.max(range_end);
            self.ranges.remove(&range_start);
        }
        self.ranges.insert(merged_start, merged_end);

        let added = (end - start) - already_present;
        self.count += added;
        added > 0
    }

    /// Records that a chunk carrying the `$` flag was received.
    pub fn received_end_of_message(&mut self) {
        self.end_of_message = true;
    }

    pub fn is_end_of_message_received(&self) -> bool {
        self.end_of_message
    }

    /// Length of the contiguous run of received bytes starting at offset 0.
    pub fn consecutive_prefix_length(&self) -> u64 {
        match self.ranges.first_key_value() {
            Some((0, end)) => *end,
            _ => 0,
        }
    }

    pub fn has_holes(&self) -> bool {
        match self.size {
            Some(size) => self.consecutive_prefix_length() < size,
            None => self.ranges.len() > 1 || self.consecutive_prefix_length() != self.count,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.end_of_message && !self.has_holes()
    }
}
