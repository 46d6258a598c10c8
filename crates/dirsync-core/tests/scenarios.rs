//! End-to-end scenarios exercising the cookie state, entry applier, and
//! refresh arbitration together against the in-memory mock directory.

use dirsync_core::applier::{apply_entry, ApplyContext};
use dirsync_core::cookie_state::{CookieState, PreCommitOutcome, RefreshGrant};
use dirsync_core::decoder::EntryMessage;
use dirsync_core::directory::mock::MockDirectory;
use dirsync_core::directory::Modification;
use dirsync_core::schema::PermissiveSchema;
use dirsync_core::ShutdownFlag;
use dirsync_primitives::{ChangeStamp, CookieVector, Dn, ModOp, ServerId, SyncState, Uuid16};

fn sid(n: i32) -> ServerId {
    ServerId::new(n).unwrap()
}

fn stamp(s: &str) -> ChangeStamp {
    ChangeStamp::new(s.to_owned())
}

fn apply_ctx<'a>(
    directory: &'a MockDirectory,
    suffix: &'a Dn,
    schema: &'a PermissiveSchema,
    is_refresh: bool,
) -> ApplyContext<'a> {
    ApplyContext {
        directory,
        suffix,
        schema,
        is_refresh,
        modifiers_name: "cn=admin",
    }
}

/// S1 (steady state): one add with no cookie, then a final result
/// carrying the new cookie. The add succeeds, the committed vector
/// advances, and `cs_age` goes up by exactly one.
#[tokio::test]
async fn s1_steady_state_add_advances_cookie_by_one() {
    let directory = MockDirectory::new();
    let suffix = Dn::new("dc=example,dc=com");
    let schema = PermissiveSchema;
    let state = CookieState::new(1, sid(1), ShutdownFlag::new());
    let context_dn = Dn::new("cn=config");

    let msg = EntryMessage {
        dn: Dn::new("uid=alice,dc=example,dc=com"),
        uuid: Uuid16::from_bytes([1; 16]),
        state: SyncState::Add,
        modifications: vec![Modification {
            attribute: "mail".into(),
            op: ModOp::Replace,
            values: vec![b"alice@example.com".to_vec()],
        }],
        cookie: None,
    };
    let op_stamp = stamp("20240101T000000.000001Z#1");

    let outcome = apply_entry(
        &apply_ctx(&directory, &suffix, &schema, true),
        &suffix,
        msg,
        sid(1),
        &op_stamp,
        &state.vector(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(outcome, dirsync_core::applier::ApplyOutcome::Applied);
    assert!(directory.get(&Dn::new("uid=alice,dc=example,dc=com")).is_some());

    let final_vector =
        CookieVector::from_pairs(vec![(sid(1), stamp("20240101T000000.000002Z#1"))]).unwrap();
    let changed = state
        .commit_and_persist(&directory, &context_dn, &final_vector, final_vector.get(sid(1)).unwrap().clone())
        .await
        .unwrap();
    assert!(changed);
    assert_eq!(state.age(), 1);
    assert_eq!(
        state.vector().get(sid(1)),
        Some(&stamp("20240101T000000.000002Z#1"))
    );
}

/// S2 (stale drop): an entry stamped behind the committed vector for
/// its sid is dropped without touching the directory.
#[tokio::test]
async fn s2_stale_entry_is_dropped() {
    let directory = MockDirectory::new();
    let suffix = Dn::new("dc=example,dc=com");
    let schema = PermissiveSchema;
    let state = CookieState::new(1, sid(1), ShutdownFlag::new());
    let context_dn = Dn::new("cn=config");

    let seed = CookieVector::from_pairs(vec![(sid(1), stamp("20240101T000000.000010Z#1"))]).unwrap();
    state
        .commit_and_persist(&directory, &context_dn, &seed, stamp("20240101T000000.000010Z#1"))
        .await
        .unwrap();

    let msg = EntryMessage {
        dn: Dn::new("uid=bob,dc=example,dc=com"),
        uuid: Uuid16::from_bytes([2; 16]),
        state: SyncState::Add,
        modifications: Vec::new(),
        cookie: None,
    };

    let outcome = apply_entry(
        &apply_ctx(&directory, &suffix, &schema, true),
        &suffix,
        msg,
        sid(1),
        &stamp("20240101T000000.000005Z#1"),
        &state.vector(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome, dirsync_core::applier::ApplyOutcome::TooOld);
    assert!(directory.get(&Dn::new("uid=bob,dc=example,dc=com")).is_none());
}

/// S3 (refresh arbitration): two sources share a Cookie State. The
/// second is turned away while the first holds refresh, then woken
/// exactly once when the first finishes with `reschedule = true`.
#[tokio::test]
async fn s3_refresh_arbitration_hands_off_to_the_paused_sibling() {
    let state = CookieState::new(1, sid(1), ShutdownFlag::new());
    const R1: u64 = 1;
    const R2: u64 = 2;

    assert_eq!(state.try_begin_refresh(R1), RefreshGrant::Granted);
    assert_eq!(state.try_begin_refresh(R2), RefreshGrant::Busy);

    let outcome = state.end_refresh(R1, true);
    assert!(outcome.released);
    assert_eq!(outcome.woken, Some(R2));
    assert_eq!(state.try_begin_refresh(R2), RefreshGrant::Granted);
}

/// S4 (multi-master merge): committing a vector with a newer stamp for
/// sid 1 and a brand-new sid 3 merges cleanly with an existing sid 2
/// entry untouched by either side.
#[tokio::test]
async fn s4_multi_master_merge_keeps_the_untouched_sid() {
    let directory = MockDirectory::new();
    let state = CookieState::new(1, sid(1), ShutdownFlag::new());
    let context_dn = Dn::new("cn=config");

    let initial = CookieVector::from_pairs(vec![
        (sid(1), stamp("20240101T000000.000001Z#1")),
        (sid(2), stamp("20240101T000000.000003Z#2")),
    ])
    .unwrap();
    state
        .commit_and_persist(&directory, &context_dn, &initial, stamp("20240101T000000.000003Z#2"))
        .await
        .unwrap();

    let received = CookieVector::from_pairs(vec![
        (sid(1), stamp("20240101T000000.000005Z#1")),
        (sid(3), stamp("20240101T000000.000002Z#3")),
    ])
    .unwrap();
    state
        .commit_and_persist(&directory, &context_dn, &received, stamp("20240101T000000.000005Z#1"))
        .await
        .unwrap();

    let merged = state.vector();
    assert_eq!(merged.get(sid(1)), Some(&stamp("20240101T000000.000005Z#1")));
    assert_eq!(merged.get(sid(2)), Some(&stamp("20240101T000000.000003Z#2")));
    assert_eq!(merged.get(sid(3)), Some(&stamp("20240101T000000.000002Z#3")));
}

/// S6 (non-leaf delete): deleting a UUID whose local peer still has
/// children converts it into a glue entry instead of failing outright,
/// and the children are left in place.
#[tokio::test]
async fn s6_non_leaf_delete_becomes_glue() {
    use dirsync_core::directory::PeerEntry;

    let directory = MockDirectory::new();
    let suffix = Dn::new("dc=example,dc=com");
    let schema = PermissiveSchema;

    let parent_uuid = Uuid16::from_bytes([5; 16]);
    let parent = Dn::new("ou=people,dc=example,dc=com");
    directory.seed(PeerEntry {
        dn: parent.clone(),
        ndn: parent.normalize(),
        uuid: parent_uuid,
        entry_csn: stamp("x"),
        attributes: vec![("objectClass".into(), vec![b"organizationalUnit".to_vec()])],
        has_children: true,
    });
    let child = Dn::new("uid=carol,ou=people,dc=example,dc=com");
    directory.seed(PeerEntry {
        dn: child.clone(),
        ndn: child.normalize(),
        uuid: Uuid16::from_bytes([6; 16]),
        entry_csn: stamp("x"),
        attributes: Vec::new(),
        has_children: false,
    });

    let msg = EntryMessage {
        dn: parent.clone(),
        uuid: parent_uuid,
        state: SyncState::Delete,
        modifications: Vec::new(),
        cookie: None,
    };

    let outcome = apply_entry(
        &apply_ctx(&directory, &suffix, &schema, true),
        &suffix,
        msg,
        sid(1),
        &stamp("20240101T000000.000001Z#1"),
        &CookieVector::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome, dirsync_core::applier::ApplyOutcome::Applied);
    let glued = directory.get(&parent).unwrap();
    assert!(glued
        .attributes
        .iter()
        .any(|(name, values)| &**name == "structuralObjectClass"
            && values == &vec![b"glue".to_vec()]));
    assert!(directory.get(&child).is_some());
}

/// Restart signal: an add racing a local delete of its parent during
/// persist mode (not refresh) is not silently swallowed or glued —
/// the source is told to restart.
#[tokio::test]
async fn add_during_persist_against_a_missing_parent_asks_for_a_restart() {
    let directory = MockDirectory::new();
    let suffix = Dn::new("dc=example,dc=com");
    let schema = PermissiveSchema;

    let msg = EntryMessage {
        dn: Dn::new("uid=dana,ou=gone,dc=example,dc=com"),
        uuid: Uuid16::from_bytes([7; 16]),
        state: SyncState::Add,
        modifications: Vec::new(),
        cookie: None,
    };

    let outcome = apply_entry(
        &apply_ctx(&directory, &suffix, &schema, false),
        &suffix,
        msg,
        sid(1),
        &stamp("20240101T000000.000001Z#1"),
        &CookieVector::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome, dirsync_core::applier::ApplyOutcome::Restart);
}

/// Waiting on `pre_commit` after a rollback should see the previous
/// stamp restored rather than the rolled-back one sticking around,
/// matching the pending-slot contract cookie_state.rs relies on.
#[tokio::test]
async fn rollback_pending_leaves_room_for_a_same_aged_retry() {
    let state = CookieState::new(1, sid(1), ShutdownFlag::new());
    match state.pre_commit(sid(1), &stamp("A")).await {
        PreCommitOutcome::Granted(slot) => state.rollback_pending(slot),
        _ => panic!("expected grant"),
    }
    match state.pre_commit(sid(1), &stamp("A")).await {
        PreCommitOutcome::Granted(slot) => state.release_pending(slot),
        _ => panic!("rollback should have cleared the reservation"),
    }
}
