//! CSN Vector Algebra (spec §4.1) and the data types it operates on
//! (spec §3): change stamps, server IDs, and sync cookies.
//!
//! This is the lowest-level, dependency-free component in the system:
//! pure comparisons and merges over small vectors, with no I/O and no
//! knowledge of the directory, the wire format, or concurrency.

use std::cmp::Ordering;
use std::fmt;

use crate::error::CsnError;

/// Integer in `[0, 4095]` naming a provider in a multi-master cluster.
/// `NONE` (`-1` on the wire) marks "no sid" / a hole in a cookie
/// vector; every vector operation skips it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ServerId(i16);

impl ServerId {
    pub const NONE: Self = Self(-1);
    pub const MAX: i16 = 4095;

    pub fn new(raw: i32) -> Result<Self, CsnError> {
        if raw == -1 {
            return Ok(Self::NONE);
        }
        if !(0..=i32::from(Self::MAX)).contains(&raw) {
            return Err(CsnError::ServerIdOutOfRange(raw));
        }
        #[allow(clippy::cast_possible_truncation, reason = "range checked above")]
        Ok(Self(raw as i16))
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == -1
    }

    #[must_use]
    pub const fn get(self) -> i16 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A totally ordered opaque identifier produced by a provider. Ordering
/// is lexicographic on the underlying bytes; the embedded serverID is
/// never needed for comparison, only for routing (spec §3).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeStamp(Box<str>);

impl ChangeStamp {
    #[must_use]
    pub fn new(raw: impl Into<Box<str>>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChangeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeStamp({:?})", self.0)
    }
}

/// Outcome of [`CookieVector::compare`]: the ordering plus the index
/// (in the shorter/right-hand argument) that witnessed it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CompareResult {
    pub ordering: Ordering,
    pub witness_index: usize,
}

/// Outcome of [`CookieVector::check_age`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AgeCheck {
    /// The incoming stamp is newer than anything recorded for this sid;
    /// apply it.
    Ok,
    /// The incoming stamp is not newer than what's already recorded;
    /// drop the update.
    TooOld,
    /// This sid has never been seen; `insert_at` is where it belongs in
    /// the (sid-ascending) vector.
    NewSid { insert_at: usize },
}

/// A vector of `(sid, changeStamp)` pairs, kept sorted by `sid`
/// ascending (spec §3 invariant: `|ctxcsn| == |sids|`, `sids` strictly
/// ascending apart from `-1` holes).
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct CookieVector {
    sids: Vec<ServerId>,
    stamps: Vec<ChangeStamp>,
}

impl CookieVector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(ServerId, ChangeStamp)>) -> Result<Self, CsnError> {
        let mut sids = Vec::with_capacity(pairs.len());
        let mut stamps = Vec::with_capacity(pairs.len());
        for (sid, stamp) in pairs {
            sids.push(sid);
            stamps.push(stamp);
        }
        let out = Self { sids, stamps };
        out.check_shape()?;
        Ok(out)
    }

    fn check_shape(&self) -> Result<(), CsnError> {
        if self.sids.len() != self.stamps.len() {
            return Err(CsnError::VectorShapeMismatch {
                ctxcsn: self.stamps.len(),
                sids: self.sids.len(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (ServerId, &ChangeStamp)> {
        self.sids.iter().copied().zip(self.stamps.iter())
    }

    /// Current stamp recorded for `sid`, skipping the `-1` hole.
    #[must_use]
    pub fn get(&self, sid: ServerId) -> Option<&ChangeStamp> {
        if sid.is_none() {
            return None;
        }
        self.sids
            .iter()
            .position(|s| *s == sid)
            .map(|i| &self.stamps[i])
    }

    fn insert_at(&mut self, index: usize, sid: ServerId, stamp: ChangeStamp) {
        self.sids.insert(index, sid);
        self.stamps.insert(index, stamp);
    }

    fn set_at(&mut self, index: usize, stamp: ChangeStamp) {
        self.stamps[index] = stamp;
    }

    /// `compare(a, b)` from spec §4.1.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CompareResult {
        if self.len() < other.len() {
            let witness_index = self
                .sids
                .iter()
                .zip(other.sids.iter())
                .position(|(a, b)| a != b)
                .unwrap_or(self.len());
            return CompareResult {
                ordering: Ordering::Less,
                witness_index,
            };
        }

        let mut overall = Ordering::Equal;
        for (index, (sid, b_stamp)) in other.iter().enumerate() {
            if sid.is_none() {
                continue;
            }
            match self.get(sid) {
                None => {
                    return CompareResult {
                        ordering: Ordering::Less,
                        witness_index: index,
                    };
                }
                Some(a_stamp) => match a_stamp.cmp(b_stamp) {
                    Ordering::Less => {
                        return CompareResult {
                            ordering: Ordering::Less,
                            witness_index: index,
                        };
                    }
                    Ordering::Greater => overall = Ordering::Greater,
                    Ordering::Equal => {}
                },
            }
        }

        CompareResult {
            ordering: overall,
            witness_index: other.len(),
        }
    }

    /// `merge(dst, src)` from spec §4.1: adopts the element-wise
    /// maximum stamp per sid. Returns whether anything moved.
    pub fn merge(&mut self, src: &Self) -> bool {
        // Fast path: identical sid sets in identical order.
        if self.sids == src.sids {
            let mut changed = false;
            for (dst_stamp, src_stamp) in self.stamps.iter_mut().zip(src.stamps.iter()) {
                if *src_stamp > *dst_stamp {
                    *dst_stamp = src_stamp.clone();
                    changed = true;
                }
            }
            return changed;
        }

        // Slow path: ordered union over sids, taking the max stamp per sid.
        let mut changed = false;
        for (sid, stamp) in src.iter() {
            if sid.is_none() {
                continue;
            }
            match self.sids.iter().position(|s| *s == sid) {
                Some(i) => {
                    if *stamp > self.stamps[i] {
                        self.set_at(i, stamp.clone());
                        changed = true;
                    }
                }
                None => {
                    let insert_at = self.sids.iter().take_while(|s| **s < sid).count();
                    self.insert_at(insert_at, sid, stamp.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// `checkAge(vector, sid, csn)` from spec §4.1.
    #[must_use]
    pub fn check_age(&self, sid: ServerId, csn: &ChangeStamp) -> AgeCheck {
        let insert_at = self.sids.iter().take_while(|s| **s < sid).count();
        match self.sids.get(insert_at) {
            Some(found) if *found == sid => {
                if self.stamps[insert_at] >= *csn {
                    AgeCheck::TooOld
                } else {
                    AgeCheck::Ok
                }
            }
            _ => AgeCheck::NewSid { insert_at },
        }
    }

    /// Applies the outcome of a prior `check_age` call, inserting or
    /// overwriting the slot for `sid`.
    pub fn apply(&mut self, sid: ServerId, stamp: ChangeStamp, age: AgeCheck) {
        match age {
            AgeCheck::Ok => {
                if let Some(i) = self.sids.iter().position(|s| *s == sid) {
                    self.set_at(i, stamp);
                }
            }
            AgeCheck::NewSid { insert_at } => self.insert_at(insert_at, sid, stamp),
            AgeCheck::TooOld => {}
        }
    }

    /// Inserts or overwrites the slot for `sid`, regardless of age.
    /// Used to restore a pending slot from a committed value on
    /// rollback, not by the comparison algebra itself.
    pub fn upsert(&mut self, sid: ServerId, stamp: ChangeStamp) {
        match self.sids.iter().position(|s| *s == sid) {
            Some(i) => self.set_at(i, stamp),
            None => {
                let insert_at = self.sids.iter().take_while(|s| **s < sid).count();
                self.insert_at(insert_at, sid, stamp);
            }
        }
    }

    /// Removes the slot for `sid` if present.
    pub fn remove(&mut self, sid: ServerId) {
        if let Some(i) = self.sids.iter().position(|s| *s == sid) {
            self.sids.remove(i);
            self.stamps.remove(i);
        }
    }
}

/// An opaque sync cookie: this consumer's `rid`, the `sid` it
/// advertises, and the context-CSN vector (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCookie {
    pub rid: u32,
    pub sid: ServerId,
    pub vector: CookieVector,
}

impl SyncCookie {
    #[must_use]
    pub fn new(rid: u32, sid: ServerId, vector: CookieVector) -> Self {
        Self { rid, sid, vector }
    }

    /// Parses the consumer's private wire format:
    /// `rid=<u32>,sid=<i16>,csn=<sid>:<stamp>;<sid>:<stamp>;...`
    pub fn parse(blob: &str) -> Result<Self, CsnError> {
        let mut rid = None;
        let mut sid = ServerId::NONE;
        let mut pairs = Vec::new();

        for field in blob.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| CsnError::MalformedCookie(blob.to_owned()))?;
            match key {
                "rid" => {
                    rid = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| CsnError::MalformedCookie(blob.to_owned()))?,
                    );
                }
                "sid" => {
                    let raw = value
                        .parse::<i32>()
                        .map_err(|_| CsnError::MalformedCookie(blob.to_owned()))?;
                    sid = ServerId::new(raw)?;
                }
                "csn" => {
                    if !value.is_empty() {
                        for entry in value.split(';') {
                            let (s, stamp) = entry
                                .split_once(':')
                                .ok_or_else(|| CsnError::MalformedCookie(blob.to_owned()))?;
                            let s = ServerId::new(
                                s.parse::<i32>()
                                    .map_err(|_| CsnError::MalformedCookie(blob.to_owned()))?,
                            )?;
                            pairs.push((s, ChangeStamp::new(stamp.to_owned())));
                        }
                    }
                }
                _ => return Err(CsnError::MalformedCookie(blob.to_owned())),
            }
        }

        let rid = rid.ok_or_else(|| CsnError::MalformedCookie(blob.to_owned()))?;
        let vector = CookieVector::from_pairs(pairs)?;
        Ok(Self::new(rid, sid, vector))
    }

    #[must_use]
    pub fn compose(&self) -> String {
        let mut out = format!("rid={},sid={},csn=", self.rid, self.sid);
        for (i, (sid, stamp)) in self.vector.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(&format!("{sid}:{stamp}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: i32) -> ServerId {
        ServerId::new(n).unwrap()
    }

    fn cs(s: &str) -> ChangeStamp {
        ChangeStamp::new(s.to_owned())
    }

    fn vec_of(pairs: &[(i32, &str)]) -> CookieVector {
        CookieVector::from_pairs(pairs.iter().map(|(s, c)| (sid(*s), cs(c))).collect()).unwrap()
    }

    #[test]
    fn compare_is_antisymmetric() {
        let a = vec_of(&[(1, "b")]);
        let b = vec_of(&[(1, "a")]);
        assert_eq!(a.compare(&b).ordering, Ordering::Greater);
        assert_eq!(b.compare(&a).ordering, Ordering::Less);
    }

    #[test]
    fn merge_is_idempotent_and_commutative() {
        let a = vec_of(&[(1, "b"), (2, "x")]);
        let b = vec_of(&[(1, "a"), (3, "y")]);

        let mut m1 = a.clone();
        m1.merge(&b);

        let mut m2 = b.clone();
        m2.merge(&a);

        assert_eq!(m1, m2);

        let mut m1_again = m1.clone();
        let changed = m1_again.merge(&b);
        assert!(!changed);
        assert_eq!(m1_again, m1);
    }

    #[test]
    fn merge_prefers_the_later_stamp_per_sid() {
        let mut a = vec_of(&[(1, "aaa")]);
        let b = vec_of(&[(1, "zzz")]);
        let changed = a.merge(&b);
        assert!(changed);
        assert_eq!(a.get(sid(1)).unwrap().as_str(), "zzz");
    }

    #[test]
    fn check_age_classifies_ok_too_old_and_new_sid() {
        let v = vec_of(&[(1, "m")]);

        assert_eq!(v.check_age(sid(1), &cs("z")), AgeCheck::Ok);
        assert_eq!(v.check_age(sid(1), &cs("a")), AgeCheck::TooOld);
        assert_eq!(v.check_age(sid(1), &cs("m")), AgeCheck::TooOld);
        assert!(matches!(
            v.check_age(sid(2), &cs("a")),
            AgeCheck::NewSid { insert_at: 1 }
        ));
    }

    #[test]
    fn cookie_round_trips_through_compose_and_parse() {
        let cookie = SyncCookie::new(1, sid(1), vec_of(&[(1, "20240101T000000.000001Z#1")]));
        let composed = cookie.compose();
        let parsed = SyncCookie::parse(&composed).unwrap();
        assert_eq!(parsed, cookie);
    }

    #[test]
    fn holes_are_skipped_by_compare_and_merge() {
        let mut a = CookieVector::from_pairs(vec![(ServerId::NONE, cs("x")), (sid(2), cs("m"))])
            .unwrap();
        let b = CookieVector::from_pairs(vec![(ServerId::NONE, cs("y")), (sid(2), cs("n"))])
            .unwrap();
        let changed = a.merge(&b);
        assert!(changed);
        assert_eq!(a.get(sid(2)).unwrap().as_str(), "n");
    }
}
