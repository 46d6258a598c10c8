//! Present-Set (spec §4.2): the set of UUIDs announced during a
//! refresh's present phase, organized as a 65,536-way bucketed tree so
//! that insert/find/delete stay effectively O(1) at 10^7+ entries
//! without the quadratic behavior a single flat set would show once
//! hashing collisions start dominating a single large bucket.

use std::collections::HashSet;

use dirsync_primitives::Uuid16;

pub struct PresentSet {
    buckets: Vec<HashSet<[u8; 14]>>,
    len: usize,
}

impl Default for PresentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: (0..=u16::MAX).map(|_| HashSet::new()).collect(),
            len: 0,
        }
    }

    /// Inserts `uuid`. Returns `false` if it was already present.
    pub fn insert(&mut self, uuid: Uuid16) -> bool {
        let bucket = &mut self.buckets[usize::from(uuid.bucket())];
        let inserted = bucket.insert(uuid.suffix());
        if inserted {
            self.len += 1;
        }
        inserted
    }

    #[must_use]
    pub fn find(&self, uuid: Uuid16) -> bool {
        self.buckets[usize::from(uuid.bucket())].contains(&uuid.suffix())
    }

    /// Removes `uuid`. Returns `true` if it was present.
    pub fn delete(&mut self, uuid: Uuid16) -> bool {
        let removed = self.buckets[usize::from(uuid.bucket())].remove(&uuid.suffix());
        if removed {
            self.len -= 1;
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tears the set down, reporting its final population for
    /// diagnostics (spec §4.2 `freeAll`).
    pub fn free_all(self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(tag: u8) -> Uuid16 {
        let mut bytes = [0_u8; 16];
        bytes[15] = tag;
        Uuid16::from_bytes(bytes)
    }

    #[test]
    fn insert_reports_duplicates() {
        let mut set = PresentSet::new();
        assert!(set.insert(uuid(1)));
        assert!(!set.insert(uuid(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn find_and_delete_round_trip() {
        let mut set = PresentSet::new();
        assert!(!set.find(uuid(2)));
        set.insert(uuid(2));
        assert!(set.find(uuid(2)));
        assert!(set.delete(uuid(2)));
        assert!(!set.find(uuid(2)));
        assert!(!set.delete(uuid(2)));
    }

    #[test]
    fn distinct_buckets_do_not_collide() {
        let mut set = PresentSet::new();
        let mut a = [0_u8; 16];
        a[0] = 1;
        let mut b = [0_u8; 16];
        b[0] = 2;
        set.insert(Uuid16::from_bytes(a));
        assert!(!set.find(Uuid16::from_bytes(b)));
    }
}
