//! Source State Machine (spec §4.4): drives one configured remote
//! through connect → refresh → persist → retry/backoff, consuming
//! already-decoded messages (spec.md §1 places BER wire decoding and
//! the client connection itself out of scope; this module owns the
//! state machine built on top of them).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dirsync_core::applier::{apply_entry, locate_peer, ApplyContext, ApplyOutcome};
use dirsync_core::conflict::{self, NewerRecord};
use dirsync_core::cookie_state::{CookieState, PreCommitOutcome, RefreshGrant};
use dirsync_core::decoder::{DecodedMessage, EntryMessage, OpMessage, RefreshPhase};
use dirsync_core::directory::DirectoryOps;
use dirsync_core::nonpresent;
use dirsync_core::present_set::PresentSet;
use dirsync_core::schema::AttributeSchema;
use dirsync_core::CoreError;
use dirsync_primitives::{ChangeStamp, CookieVector, Dn, OperatingMode, ServerId, SyncCookie, SyncState, Uuid16};
use tracing::{instrument, warn};

use crate::error::{NodeError, NodeResult};
use crate::retry::{RetryOutcome, RetrySchedule};
use crate::scheduler::{Scheduler, TaskId};

/// What a tick actually did, for the scheduler to map onto a reschedule
/// decision (spec §7's tick result enum).
#[derive(Debug)]
pub enum TickOutcome {
    Ok,
    Timeout,
    Repoll,
    Paused,
    Busy,
    Shutdown,
    Error(CoreError),
}

/// The provider connection's message stream. A real LDAPv3 client is an
/// external collaborator (spec.md §1); this crate only consumes
/// whatever already-decoded messages it hands back.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    async fn recv(&mut self, timeout: Duration) -> eyre::Result<Option<DecodedMessage>>;
}

/// Per-target-DN access to log records newer than a given stamp, used
/// by the Conflict Resolver (spec §4.10 step 2). Only delta dialects
/// need this; the plain dialect never calls it.
#[async_trait]
pub trait ChangeLogReader: Send + Sync {
    async fn newer_records(&self, target: &Dn, since: &ChangeStamp) -> eyre::Result<Vec<NewerRecord>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Refreshing(RefreshPhase),
    Persisting,
}

/// A configured remote, owning its own retry schedule and refresh
/// phase, sharing a [`CookieState`] with every other source on the
/// same database (spec §4.3).
pub struct Source {
    pub rid: u32,
    pub sid: ServerId,
    pub base: Dn,
    pub suffix: Dn,
    pub mode: OperatingMode,
    filter: Box<str>,
    task: TaskId,
    phase: Phase,
    present: Option<PresentSet>,
    too_old: AtomicBool,
    retry: RetrySchedule,
    cookie: Arc<CookieState>,
    scheduler: Arc<Scheduler>,
}

impl Source {
    #[must_use]
    pub fn new(
        rid: u32,
        sid: ServerId,
        base: Dn,
        suffix: Dn,
        mode: OperatingMode,
        filter: impl Into<Box<str>>,
        retry: RetrySchedule,
        cookie: Arc<CookieState>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let task = u64::from(rid);
        scheduler.insert(task, retry.current_interval());
        Self {
            rid,
            sid,
            base,
            suffix,
            mode,
            filter: filter.into(),
            task,
            phase: Phase::Idle,
            present: None,
            too_old: AtomicBool::new(false),
            retry,
            cookie,
            scheduler,
        }
    }

    #[must_use]
    pub fn too_old_latch(&self) -> bool {
        self.too_old.load(Ordering::Relaxed)
    }

    /// Drives one tick: attempt to enter refresh if idle, then drain
    /// whatever messages are ready, per spec §4.4 steps 3–6.
    #[instrument(skip(self, conn, directory, schema, log), fields(rid = %self.rid))]
    pub async fn tick(
        &mut self,
        conn: &mut dyn ProviderConnection,
        directory: &dyn DirectoryOps,
        schema: &dyn AttributeSchema,
        log: Option<&dyn ChangeLogReader>,
        shutdown_set: impl Fn() -> bool,
    ) -> TickOutcome {
        if shutdown_set() {
            return TickOutcome::Shutdown;
        }

        if self.phase == Phase::Idle {
            match self.cookie.try_begin_refresh(u64::from(self.rid)) {
                RefreshGrant::Granted => {
                    self.phase = Phase::Refreshing(RefreshPhase::Present);
                    self.present = Some(PresentSet::new());
                }
                RefreshGrant::Busy => {
                    self.scheduler.resched(self.task, true);
                    return TickOutcome::Busy;
                }
            }
        }

        let message = match conn.recv(self.retry.current_interval()).await {
            Ok(Some(message)) => message,
            Ok(None) => return TickOutcome::Timeout,
            Err(err) => return self.on_transient_failure(err),
        };

        match self
            .handle_message(message, directory, schema, log)
            .await
        {
            Ok(outcome) => outcome,
            Err(NodeError::Core(err)) => TickOutcome::Error(err),
            Err(NodeError::Protocol(msg)) => {
                warn!(error = %msg, "protocol violation, closing connection");
                self.on_transient_failure(eyre::eyre!(msg))
            }
            Err(NodeError::FatalConfiguration(msg)) => {
                unreachable!("fatal configuration ({msg}) must be rejected before a source runs")
            }
        }
    }

    fn on_transient_failure(&mut self, err: eyre::Report) -> TickOutcome {
        warn!(%err, "transient failure, consulting retry schedule");
        match self.retry.on_failure() {
            RetryOutcome::Retry(interval) => {
                self.scheduler.resched(self.task, false);
                let _ = interval;
                TickOutcome::Ok
            }
            RetryOutcome::Exhausted => {
                self.scheduler.remove(self.task);
                TickOutcome::Shutdown
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: DecodedMessage,
        directory: &dyn DirectoryOps,
        schema: &dyn AttributeSchema,
        log: Option<&dyn ChangeLogReader>,
    ) -> NodeResult<TickOutcome> {
        match message {
            DecodedMessage::Entry(entry) => self.handle_entry(entry, directory, schema).await,
            DecodedMessage::Op(op) => self.handle_op(op, directory, schema, log).await,
            DecodedMessage::CookieOnly(msg) => {
                let _ = SyncCookie::parse(&msg.cookie)
                    .map_err(|e| NodeError::Protocol(e.to_string()))?;
                Ok(TickOutcome::Ok)
            }
            DecodedMessage::RefreshPhase(msg) => {
                self.phase = Phase::Refreshing(msg.phase);
                if msg.refresh_done {
                    let outcome = self.cookie.end_refresh(u64::from(self.rid), true);
                    if outcome.released {
                        self.retry.reset();
                        self.phase = Phase::Persisting;
                    }
                }
                Ok(TickOutcome::Ok)
            }
            DecodedMessage::PresentSet(msg) => {
                if msg.refresh_deletes {
                    let present = self.present.get_or_insert_with(PresentSet::new);
                    for uuid in msg.uuids {
                        present.delete(uuid);
                    }
                } else if let Some(present) = self.present.as_mut() {
                    for uuid in msg.uuids {
                        present.insert(uuid);
                    }
                }
                Ok(TickOutcome::Ok)
            }
            DecodedMessage::FinalResult(msg) => self.handle_final_result(msg, directory, schema).await,
        }
    }

    async fn handle_entry(
        &mut self,
        entry: EntryMessage,
        directory: &dyn DirectoryOps,
        schema: &dyn AttributeSchema,
    ) -> NodeResult<TickOutcome> {
        let ctx = ApplyContext {
            directory,
            suffix: &self.suffix,
            schema,
            is_refresh: matches!(self.phase, Phase::Refreshing(_)),
            modifiers_name: "cn=replicator",
        };

        let Some((op_sid, op_stamp)) = entry_change_stamp(&entry) else {
            // No usable stamp to age-check against; apply unconditionally,
            // matching spec §4.4 step 5's "no cookie accompanies the entry"
            // case, where ordering is already guaranteed by the stream.
            // `ServerId::NONE` makes the age check in `apply_entry` a no-op.
            let committed = self.cookie.vector();
            let outcome = apply_entry(
                &ctx,
                &self.base,
                entry,
                ServerId::NONE,
                &ChangeStamp::new(""),
                &committed,
                self.present.as_mut(),
            )
            .await?;
            return Ok(self.map_apply_outcome(outcome));
        };

        let raw_cookie = entry.cookie.clone();
        match raw_cookie.as_deref() {
            None => {
                let committed = self.cookie.vector();
                let outcome = apply_entry(
                    &ctx,
                    &self.base,
                    entry,
                    op_sid,
                    &op_stamp,
                    &committed,
                    self.present.as_mut(),
                )
                .await?;
                Ok(self.map_apply_outcome(outcome))
            }
            Some(raw) => {
                let cookie =
                    SyncCookie::parse(raw).map_err(|e| NodeError::Protocol(e.to_string()))?;
                let Some((sid, stamp)) = cookie.vector.iter().next() else {
                    return Err(NodeError::Protocol("empty entry-level cookie".into()));
                };
                let stamp = stamp.clone();
                match self.cookie.pre_commit(sid, &stamp).await {
                    PreCommitOutcome::Shutdown => Ok(TickOutcome::Shutdown),
                    PreCommitOutcome::TooOld => {
                        self.too_old.store(true, Ordering::Relaxed);
                        Ok(TickOutcome::Ok)
                    }
                    PreCommitOutcome::Granted(slot) => {
                        let committed = self.cookie.vector();
                        match apply_entry(&ctx, &self.base, entry, op_sid, &op_stamp, &committed, self.present.as_mut()).await {
                            Ok(ApplyOutcome::Applied) => {
                                self.cookie.release_pending(slot);
                                let received = CookieVector::from_pairs(vec![(sid, stamp.clone())])
                                    .map_err(|e| NodeError::Protocol(e.to_string()))?;
                                self.cookie
                                    .commit_and_persist(directory, &self.base, &received, stamp)
                                    .await?;
                                Ok(TickOutcome::Ok)
                            }
                            Ok(ApplyOutcome::TooOld) => {
                                self.cookie.rollback_pending(slot);
                                self.too_old.store(true, Ordering::Relaxed);
                                Ok(TickOutcome::Ok)
                            }
                            Ok(ApplyOutcome::Restart) => {
                                self.cookie.rollback_pending(slot);
                                Ok(TickOutcome::Error(CoreError::Protocol(
                                    "add raced a local delete during persist".into(),
                                )))
                            }
                            Err(err) => {
                                self.cookie.rollback_pending(slot);
                                Err(NodeError::Core(err))
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_op(
        &mut self,
        op: OpMessage,
        directory: &dyn DirectoryOps,
        schema: &dyn AttributeSchema,
        log: Option<&dyn ChangeLogReader>,
    ) -> NodeResult<TickOutcome> {
        let uuid = op.uuid.unwrap_or_else(|| Uuid16::from_bytes([0; 16]));
        let peer = locate_peer(directory, &self.base, uuid).await?;

        let modifications = match (&peer, &op.change_stamp, log) {
            (Some(peer), Some(stamp), Some(log)) if *stamp < peer.entry_csn => {
                let newer = log
                    .newer_records(&op.dn, stamp)
                    .await
                    .map_err(|e| NodeError::Protocol(e.to_string()))?;
                conflict::reconcile(op.modifications, &newer, schema)
            }
            _ => op.modifications,
        };

        let dn = match (&op.new_rdn, &peer) {
            (Some(new_rdn), Some(peer)) => {
                let parent = op.new_superior.clone().or_else(|| peer.dn.parent());
                match parent {
                    Some(parent) => Dn::new(format!("{new_rdn},{parent}")),
                    None => Dn::new(new_rdn.clone()),
                }
            }
            _ => op.dn,
        };

        let state = match op.change_type {
            dirsync_primitives::ChangeType::Add => SyncState::Add,
            dirsync_primitives::ChangeType::Delete => SyncState::Delete,
            dirsync_primitives::ChangeType::Modify | dirsync_primitives::ChangeType::ModRdn => {
                SyncState::Modify
            }
        };

        let entry = EntryMessage {
            dn,
            uuid,
            state,
            modifications,
            cookie: None,
        };

        let ctx = ApplyContext {
            directory,
            suffix: &self.suffix,
            schema,
            is_refresh: matches!(self.phase, Phase::Refreshing(_)),
            modifiers_name: "cn=replicator",
        };
        let committed = self.cookie.vector();
        let op_stamp = op.change_stamp.unwrap_or_else(|| ChangeStamp::new(""));
        let op_sid = embedded_sid(&op_stamp).unwrap_or(ServerId::NONE);

        let outcome = apply_entry(&ctx, &self.base, entry, op_sid, &op_stamp, &committed, self.present.as_mut())
            .await?;
        Ok(self.map_apply_outcome(outcome))
    }

    async fn handle_final_result(
        &mut self,
        msg: dirsync_core::decoder::FinalResultMessage,
        directory: &dyn DirectoryOps,
        schema: &dyn AttributeSchema,
    ) -> NodeResult<TickOutcome> {
        let Some(raw) = msg.cookie.as_deref() else {
            return self.finish_refresh_or_repoll();
        };
        let cookie = SyncCookie::parse(raw).map_err(|e| NodeError::Protocol(e.to_string()))?;

        if !msg.refresh_deletes {
            let local = self.cookie.vector();
            if local.compare(&cookie.vector).ordering == std::cmp::Ordering::Less {
                if let Some(present) = self.present.as_mut() {
                    let ctx = ApplyContext {
                        directory,
                        suffix: &self.suffix,
                        schema,
                        is_refresh: true,
                        modifiers_name: "cn=replicator",
                    };
                    let max_received = cookie.vector.iter().map(|(_, s)| s).max().cloned().unwrap_or_else(|| ChangeStamp::new(""));
                    let search = dirsync_core::directory::SearchOp {
                        base: self.base.clone(),
                        filter: self.bounded_reconciliation_filter(&cookie.vector),
                        size_limit: None,
                    };
                    nonpresent::reconcile(&ctx, search, present, &max_received).await?;
                }
            }
        }

        self.cookie
            .commit_and_persist(
                directory,
                &self.base,
                &cookie.vector,
                cookie.vector.iter().next().map_or_else(|| ChangeStamp::new(""), |(_, s)| s.clone()),
            )
            .await?;

        self.finish_refresh_or_repoll()
    }

    fn finish_refresh_or_repoll(&mut self) -> NodeResult<TickOutcome> {
        match self.mode {
            OperatingMode::RefreshOnly | OperatingMode::DirSync => {
                if matches!(self.phase, Phase::Refreshing(_)) {
                    self.cookie.end_refresh(u64::from(self.rid), true);
                }
                self.phase = Phase::Idle;
                self.retry.reset();
                Ok(TickOutcome::Ok)
            }
            OperatingMode::RefreshAndPersist => {
                if matches!(self.phase, Phase::Refreshing(_)) {
                    Err(NodeError::Protocol(
                        "final result received in refresh-and-persist mode".into(),
                    ))
                } else {
                    Ok(TickOutcome::Repoll)
                }
            }
        }
    }

    /// Spec §4.7: search with the source's configured filter, ANDed
    /// with `entryCSN ≤ maxReceivedStamp` so a just-locally-added entry
    /// racing the search (stamped past the cookie we just received)
    /// isn't mistaken for something that vanished upstream.
    fn bounded_reconciliation_filter(&self, received: &CookieVector) -> Box<str> {
        let Some(max_stamp) = received.iter().map(|(_, stamp)| stamp).max() else {
            return self.filter.clone();
        };
        format!("(&{}(entryCSN<={max_stamp}))", self.filter).into_boxed_str()
    }

    fn map_apply_outcome(&self, outcome: ApplyOutcome) -> TickOutcome {
        match outcome {
            ApplyOutcome::Applied => TickOutcome::Ok,
            ApplyOutcome::TooOld => {
                self.too_old.store(true, Ordering::Relaxed);
                TickOutcome::Ok
            }
            ApplyOutcome::Restart => {
                TickOutcome::Error(CoreError::Protocol("restart requested".into()))
            }
        }
    }
}

/// Extracts the per-entry `(sid, stamp)` the Entry Applier age-checks
/// against (spec §4.6 step 6) from the entry's own `entryCSN`
/// modification, independent of whatever sync cookie accompanies the
/// message — the cookie only drives the Cookie State commit path.
fn entry_change_stamp(entry: &EntryMessage) -> Option<(ServerId, ChangeStamp)> {
    let raw = entry
        .modifications
        .iter()
        .find(|m| m.attribute.eq_ignore_ascii_case("entryCSN"))
        .and_then(|m| m.values.first())?;
    let text = std::str::from_utf8(raw).ok()?;
    let stamp = ChangeStamp::new(text.to_owned());
    let sid = embedded_sid(&stamp)?;
    Some((sid, stamp))
}

/// The consumer's own stamp format always ends in `#<sid>` (see
/// `dirsync_primitives::csn::SyncCookie::compose`'s `sid:stamp`
/// convention extended to bare stamps). Parsing failures fall back to
/// `None`, which callers treat as "skip the age check".
fn embedded_sid(stamp: &ChangeStamp) -> Option<ServerId> {
    let (_, tail) = stamp.as_str().rsplit_once('#')?;
    ServerId::new(tail.parse::<i32>().ok()?).ok()
}
