//! Cookie State (spec §4.3): the per-database shared owner of the local
//! `contextCSN` vector, the refresh mutual-exclusion latch, and the
//! per-message pending-slot reservation used while an entry is being
//! applied but not yet committed.
//!
//! Locking discipline follows spec §9's nested-locking note: refresh
//! mutex, then the committed-vector lock, then the pending gate. The
//! pending gate and the commit gate are `tokio::sync::Mutex` because
//! both are held across an `.await` (a directory round trip); the
//! refresh arbiter and the committed vector are `parking_lot` since
//! they're only ever touched for the duration of a plain field update.

use std::collections::VecDeque;
use std::sync::Arc;

use dirsync_primitives::{ChangeStamp, CookieVector, Dn, ServerId, SyncCookie};
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use crate::directory::{AddOp, DirectoryError, DirectoryOps, OpFlags};
use crate::error::{CoreError, CoreResult};
use crate::shutdown::ShutdownFlag;

/// Opaque identity of a source, for refresh arbitration only. The
/// source state machine owns its own richer identity; this is just
/// enough to dedup and to report who was woken.
pub type SourceId = u64;

struct Committed {
    vector: CookieVector,
    age: u64,
}

#[derive(Default)]
struct RefreshArbiter {
    holder: Option<SourceId>,
    paused: VecDeque<SourceId>,
}

/// Outcome of [`CookieState::try_begin_refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshGrant {
    Granted,
    Busy,
}

/// Outcome of [`CookieState::end_refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndRefreshOutcome {
    pub released: bool,
    pub woken: Option<SourceId>,
}

/// Outcome of [`CookieState::pre_commit`].
pub enum PreCommitOutcome {
    Granted(PendingSlot),
    TooOld,
    Shutdown,
}

/// A reservation held between a successful `pre_commit` and the
/// matching `rollback_pending` or `release_pending` call. Dropping it
/// without calling either still releases the pending gate, but leaves
/// the provisional mutation in place — callers should always route
/// through one of the two methods (spec §8 property 2).
pub struct PendingSlot {
    guard: OwnedMutexGuard<CookieVector>,
    sid: ServerId,
    previous: Option<ChangeStamp>,
}

impl PendingSlot {
    #[must_use]
    pub fn sid(&self) -> ServerId {
        self.sid
    }
}

pub struct CookieState {
    local_rid: u32,
    local_sid: ServerId,
    shutdown: ShutdownFlag,
    refresh: SyncMutex<RefreshArbiter>,
    pending: Arc<AsyncMutex<CookieVector>>,
    committed: RwLock<Committed>,
    updating: AsyncMutex<()>,
    notify: Notify,
}

impl CookieState {
    #[must_use]
    pub fn new(local_rid: u32, local_sid: ServerId, shutdown: ShutdownFlag) -> Self {
        Self {
            local_rid,
            local_sid,
            shutdown,
            refresh: SyncMutex::new(RefreshArbiter::default()),
            pending: Arc::new(AsyncMutex::new(CookieVector::new())),
            committed: RwLock::new(Committed {
                vector: CookieVector::new(),
                age: 0,
            }),
            updating: AsyncMutex::new(()),
            notify: Notify::new(),
        }
    }

    /// Seeds `committed`/`pending` from the directory's `contextCSN` on
    /// first use.
    #[instrument(skip(self, directory))]
    pub async fn load_from_storage(
        &self,
        directory: &dyn DirectoryOps,
        context_dn: &Dn,
    ) -> CoreResult<()> {
        let stored = directory
            .read_context_csn(context_dn)
            .await
            .map_err(CoreError::Directory)?;
        let vector = stored.map_or_else(CookieVector::new, |cookie| cookie.vector);
        *self.pending.lock().await = vector.clone();
        let mut committed = self.committed.write();
        committed.vector = vector;
        Ok(())
    }

    #[must_use]
    pub fn vector(&self) -> CookieVector {
        self.committed.read().vector.clone()
    }

    #[must_use]
    pub fn age(&self) -> u64 {
        self.committed.read().age
    }

    pub fn try_begin_refresh(&self, source: SourceId) -> RefreshGrant {
        let mut arbiter = self.refresh.lock();
        if arbiter.holder.is_none() {
            arbiter.holder = Some(source);
            RefreshGrant::Granted
        } else {
            if !arbiter.paused.contains(&source) {
                arbiter.paused.push_back(source);
            }
            RefreshGrant::Busy
        }
    }

    pub fn end_refresh(&self, source: SourceId, reschedule: bool) -> EndRefreshOutcome {
        let mut arbiter = self.refresh.lock();
        if arbiter.holder != Some(source) {
            return EndRefreshOutcome {
                released: false,
                woken: None,
            };
        }
        arbiter.holder = None;
        let woken = if reschedule {
            arbiter.paused.pop_front()
        } else {
            None
        };
        EndRefreshOutcome {
            released: true,
            woken,
        }
    }

    /// Blocking acquire of the pending gate, age-checked against the
    /// pending vector (a superset of committed, since every granted
    /// slot is folded into it immediately).
    #[instrument(skip(self, csn))]
    pub async fn pre_commit(&self, sid: ServerId, csn: &ChangeStamp) -> PreCommitOutcome {
        if self.shutdown.is_set() {
            return PreCommitOutcome::Shutdown;
        }
        let guard = Arc::clone(&self.pending).lock_owned().await;
        self.apply_under_gate(guard, sid, csn)
    }

    /// Non-blocking variant for the `cn=config` source: yields
    /// cooperatively instead of parking, so a thread-pool-wide pause
    /// request can't deadlock against it.
    pub async fn pre_commit_non_blocking(
        &self,
        sid: ServerId,
        csn: &ChangeStamp,
    ) -> PreCommitOutcome {
        loop {
            if self.shutdown.is_set() {
                return PreCommitOutcome::Shutdown;
            }
            match Arc::clone(&self.pending).try_lock_owned() {
                Ok(guard) => return self.apply_under_gate(guard, sid, csn),
                Err(_) => tokio::task::yield_now().await,
            }
        }
    }

    fn apply_under_gate(
        &self,
        mut guard: OwnedMutexGuard<CookieVector>,
        sid: ServerId,
        csn: &ChangeStamp,
    ) -> PreCommitOutcome {
        let age = guard.check_age(sid, csn);
        if matches!(age, dirsync_primitives::AgeCheck::TooOld) {
            return PreCommitOutcome::TooOld;
        }
        let previous = guard.get(sid).cloned();
        guard.apply(sid, csn.clone(), age);
        PreCommitOutcome::Granted(PendingSlot {
            guard,
            sid,
            previous,
        })
    }

    /// Restores the pending slot to its pre-reservation value (or
    /// clears it if there was none), then releases the pending gate.
    pub fn rollback_pending(&self, slot: PendingSlot) {
        let PendingSlot {
            mut guard,
            sid,
            previous,
        } = slot;
        match previous {
            Some(stamp) => guard.upsert(sid, stamp),
            None => guard.remove(sid),
        }
    }

    /// Keeps the slot's provisional mutation and releases the pending
    /// gate, without touching the committed vector or the directory.
    /// Used when the entry applied locally but hasn't yet earned a
    /// `contextCSN` write (the Cookie Updater decides that separately).
    pub fn release_pending(&self, slot: PendingSlot) {
        drop(slot.guard);
    }

    /// Folds `received` into the committed vector and persists it as a
    /// single modify-replace on `contextCSN`, tagged non-replicated.
    /// Returns whether anything actually moved.
    #[instrument(skip(self, directory, received))]
    pub async fn commit_and_persist(
        &self,
        directory: &dyn DirectoryOps,
        context_dn: &Dn,
        received: &CookieVector,
        op_csn: ChangeStamp,
    ) -> CoreResult<bool> {
        let _gate = self.updating.lock().await;

        let mut candidate = self.committed.read().vector.clone();
        if !candidate.merge(received) {
            return Ok(false);
        }

        let cookie = SyncCookie::new(self.local_rid, self.local_sid, candidate.clone());
        match directory
            .write_context_csn(context_dn, &cookie, op_csn.clone())
            .await
        {
            Ok(()) => {
                self.swap_in(candidate);
                Ok(true)
            }
            Err(DirectoryError::NoSuchObject(_)) => {
                self.materialize_context_entry(directory, context_dn).await?;
                directory
                    .write_context_csn(context_dn, &cookie, op_csn)
                    .await
                    .map_err(CoreError::Directory)?;
                self.swap_in(candidate);
                Ok(true)
            }
            Err(other) => Err(CoreError::Directory(other)),
        }
    }

    fn swap_in(&self, vector: CookieVector) {
        let mut committed = self.committed.write();
        committed.vector = vector;
        committed.age += 1;
        drop(committed);
        self.notify.notify_waiters();
    }

    async fn materialize_context_entry(
        &self,
        directory: &dyn DirectoryOps,
        context_dn: &Dn,
    ) -> CoreResult<()> {
        debug!(%context_dn, "context entry missing, creating before retrying contextCSN write");
        let result = directory
            .add(AddOp {
                dn: context_dn.clone(),
                attributes: Vec::new(),
                op_csn: None,
                flags: OpFlags {
                    non_replicated: true,
                    ignore_schema: true,
                },
            })
            .await;
        match result {
            Ok(()) | Err(DirectoryError::AlreadyExists(_)) => Ok(()),
            Err(other) => {
                warn!(error = %other, "failed to materialize context entry");
                Err(CoreError::Directory(other))
            }
        }
    }

    /// Waits until the next successful commit, for callers that need
    /// to observe a fresher vector than the one they last read.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::mock::MockDirectory;

    fn sid(n: i32) -> ServerId {
        ServerId::new(n).unwrap()
    }

    fn cs(s: &str) -> ChangeStamp {
        ChangeStamp::new(s.to_owned())
    }

    #[tokio::test]
    async fn refresh_arbitration_wakes_exactly_one_sibling() {
        let state = CookieState::new(1, sid(1), ShutdownFlag::new());
        assert_eq!(state.try_begin_refresh(10), RefreshGrant::Granted);
        assert_eq!(state.try_begin_refresh(20), RefreshGrant::Busy);
        assert_eq!(state.try_begin_refresh(30), RefreshGrant::Busy);

        let outcome = state.end_refresh(10, true);
        assert!(outcome.released);
        assert_eq!(outcome.woken, Some(20));

        // 20 is still the nominal holder only once it actually calls
        // try_begin_refresh again; until then the latch is free.
        assert_eq!(state.try_begin_refresh(20), RefreshGrant::Granted);
    }

    #[tokio::test]
    async fn pre_commit_rejects_stale_and_rollback_restores_previous() {
        let state = CookieState::new(1, sid(1), ShutdownFlag::new());
        match state.pre_commit(sid(1), &cs("A")).await {
            PreCommitOutcome::Granted(slot) => state.release_pending(slot),
            _ => panic!("expected grant"),
        }

        match state.pre_commit(sid(1), &cs("B")).await {
            PreCommitOutcome::Granted(slot) => state.rollback_pending(slot),
            _ => panic!("expected grant"),
        }

        match state.pre_commit(sid(1), &cs("A")).await {
            PreCommitOutcome::TooOld => {}
            _ => panic!("expected too-old after rollback restored A"),
        }
    }

    #[tokio::test]
    async fn commit_and_persist_bumps_age_exactly_once_per_success() {
        let directory = MockDirectory::new();
        let state = CookieState::new(1, sid(1), ShutdownFlag::new());
        let context_dn = Dn::new("cn=config");

        let received = dirsync_primitives::CookieVector::from_pairs(vec![(sid(1), cs("A"))])
            .unwrap();
        let changed = state
            .commit_and_persist(&directory, &context_dn, &received, cs("A"))
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(state.age(), 1);

        let unchanged = state
            .commit_and_persist(&directory, &context_dn, &received, cs("A"))
            .await
            .unwrap();
        assert!(!unchanged);
        assert_eq!(state.age(), 1);
    }
}
