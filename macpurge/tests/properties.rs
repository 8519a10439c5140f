// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! End-to-end behavior of the purge coordinator, driven against the stub
//! ASIC.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use slog::{o, Drain};

use aal::{PurgeMatch, PurgeTarget};
use asic::stub::{LearnedEntry, PortConfig};
use asic::{AsicConfig, Handle};
use common::network::{RemoteId, VlanId};
use common::ports::{Glort, PortId};
use macpurge::{
    Admission, EntryDump, FlushMode, PurgeCoordinator, PurgeHandler,
    PurgeScope, PurgeShape, RegistryDump, RequestStats, ShapeTally,
};

type Coordinator = PurgeCoordinator<Handle>;

fn test_log() -> slog::Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, o!())
}

fn glort(p: u16) -> Glort {
    Glort(0x100 + p)
}

fn setup(nports: u16) -> anyhow::Result<(Arc<Handle>, Coordinator)> {
    let log = test_log();
    let config = AsicConfig {
        ports: (1..=nports)
            .map(|p| PortConfig {
                port: PortId(p),
                glort: glort(p),
            })
            .collect(),
    };
    let hdl = Arc::new(Handle::new(&log, &config)?);
    let coord = PurgeCoordinator::new(&log, hdl.clone())?;
    Ok((hdl, coord))
}

fn vlan(v: u16) -> VlanId {
    VlanId::new(v).unwrap()
}

fn remid(r: u16) -> RemoteId {
    RemoteId::new(r).unwrap()
}

fn port(p: u16) -> PurgeScope {
    PurgeScope::Port(PortId(p))
}

fn counting_handler(context: u64) -> (PurgeHandler, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let c = count.clone();
    let h = PurgeHandler::from_fn(
        move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        },
        context,
    );
    (h, count)
}

fn entry_for(dump: &RegistryDump, scope: PurgeScope) -> Option<&EntryDump> {
    dump.entries.iter().find(|e| e.scope == scope)
}

fn outcome_total(r: &RequestStats) -> ShapeTally {
    let mut t = r.duplicates;
    t.merge(&r.suppressed);
    t.merge(&r.enqueued);
    t
}

#[test]
fn test_all_vlans_is_idempotent() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(0)?;
    let g = PurgeScope::AllPorts;
    assert_eq!(
        coord.enqueue(g, PurgeShape::AllVlans, None)?,
        Admission::Enqueued
    );
    assert_eq!(
        coord.enqueue(g, PurgeShape::AllVlans, None)?,
        Admission::Duplicate
    );
    assert_eq!(coord.pending_obligations(), 1);

    let stats = coord.stats();
    assert_eq!(stats.global.enqueued.all_vlans, 1);
    assert_eq!(stats.global.duplicates.all_vlans, 1);
    Ok(())
}

#[test]
fn test_vid1_dominates_pair() -> anyhow::Result<()> {
    let (hdl, coord) = setup(1)?;
    coord.enqueue(port(1), PurgeShape::Vid1Vid2(vlan(5), vlan(7)), None)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(5)), None)?;

    let dump = coord.dump();
    let entry = entry_for(&dump, port(1)).unwrap();
    assert_eq!(entry.pending, vec![PurgeShape::Vid1(vlan(5))]);
    assert_eq!(coord.stats().cancelled.vid1_vid2, 1);

    assert_eq!(coord.drain(), 1);
    assert_eq!(
        hdl.executed(),
        vec![PurgeTarget::Match(PurgeMatch {
            port: Some(PortId(1)),
            glort: Some(glort(1)),
            vid1: Some(vlan(5)),
            vid2: None,
            remote_id: None,
        })]
    );
    Ok(())
}

#[test]
fn test_port_all_vlans_suppresses_everything_finer() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(1)?;
    coord.enqueue(port(1), PurgeShape::AllVlans, None)?;
    let before = coord.dump();

    let finer = [
        PurgeShape::Vid1(vlan(1)),
        PurgeShape::Vid2(vlan(2)),
        PurgeShape::RemoteId(remid(3)),
        PurgeShape::Vid1Vid2(vlan(4), vlan(5)),
        PurgeShape::Vid1RemoteId(vlan(6), remid(7)),
    ];
    for shape in finer {
        assert_eq!(
            coord.enqueue(port(1), shape, None)?,
            Admission::Suppressed
        );
    }

    assert_eq!(coord.dump(), before);
    assert_eq!(coord.stats().port.suppressed.total(), 5);
    Ok(())
}

#[test]
fn test_global_vid1_suppresses_port_pairs() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(3)?;
    coord.enqueue(PurgeScope::AllPorts, PurgeShape::Vid1(vlan(9)), None)?;
    let pair = PurgeShape::Vid1Vid2(vlan(9), vlan(2));
    for p in 1..=3 {
        assert_eq!(
            coord.enqueue(port(p), pair, None)?,
            Admission::Suppressed
        );
    }
    // No entries were created for the suppressed requests
    assert_eq!(coord.dump().entries.len(), 1);
    assert_eq!(coord.pending_obligations(), 1);
    Ok(())
}

#[test]
fn test_global_vid2_suppresses_port_pair() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(7)?;
    coord.enqueue(PurgeScope::AllPorts, PurgeShape::Vid2(vlan(42)), None)?;
    let pair = PurgeShape::Vid1Vid2(vlan(3), vlan(42));
    assert_eq!(
        coord.enqueue(port(7), pair, None)?,
        Admission::Suppressed
    );
    assert_eq!(coord.pending_obligations(), 1);

    let dump = coord.dump();
    let global = entry_for(&dump, PurgeScope::AllPorts).unwrap();
    assert_eq!(global.pending, vec![PurgeShape::Vid2(vlan(42))]);
    Ok(())
}

#[test]
fn test_global_request_cancels_same_shape_on_ports() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(2)?;
    let r = remid(12);
    coord.enqueue(port(1), PurgeShape::RemoteId(r), None)?;
    coord.enqueue(port(2), PurgeShape::Vid1RemoteId(vlan(1), r), None)?;
    coord.enqueue(
        port(2),
        PurgeShape::Vid1RemoteId(vlan(1), remid(13)),
        None,
    )?;
    coord.enqueue(PurgeScope::AllPorts, PurgeShape::RemoteId(r), None)?;

    let dump = coord.dump();
    assert_eq!(entry_for(&dump, port(1)).unwrap().pending, vec![]);
    assert_eq!(
        entry_for(&dump, port(2)).unwrap().pending,
        vec![PurgeShape::Vid1RemoteId(vlan(1), remid(13))]
    );
    let cancelled = coord.stats().cancelled;
    assert_eq!(cancelled.remote_id, 1);
    assert_eq!(cancelled.vid1_remote_id, 1);
    Ok(())
}

#[test]
fn test_round_robin_across_ports() -> anyhow::Result<()> {
    const N: u16 = 6;
    let (_hdl, coord) = setup(N)?;
    for p in 1..=N {
        coord.enqueue(port(p), PurgeShape::Vid1(vlan(p * 10)), None)?;
        coord.enqueue(port(p), PurgeShape::Vid1(vlan(p * 10 + 1)), None)?;
    }

    for _ in 0..2 {
        let mut seen = BTreeSet::new();
        for _ in 0..N {
            let req = coord.next_request().unwrap();
            assert!(seen.insert(req.port().unwrap()), "revisited {req}");
            coord.complete(&req);
        }
        assert_eq!(seen.len(), usize::from(N));
    }
    assert!(coord.next_request().is_none());
    Ok(())
}

#[test]
fn test_scan_survives_reclaimed_cursor() -> anyhow::Result<()> {
    let (hdl, coord) = setup(3)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(1)), None)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(2)), None)?;
    coord.enqueue(port(2), PurgeShape::Vid1(vlan(5)), None)?;
    coord.enqueue(port(3), PurgeShape::Vid1(vlan(1)), None)?;

    assert_eq!(coord.next_request().unwrap().port(), Some(PortId(1)));
    assert_eq!(coord.dump().cursor, port(2));

    // Port 2 goes away and its only request is swept up by a global one,
    // so the entry under the cursor is reclaimed.
    hdl.port_delete(PortId(2))?;
    coord.port_removed(PortId(2));
    coord.enqueue(PurgeScope::AllPorts, PurgeShape::Vid1(vlan(5)), None)?;
    assert!(entry_for(&coord.dump(), port(2)).is_none());

    assert_eq!(coord.next_request().unwrap().port(), Some(PortId(3)));
    let global = coord.next_request().unwrap();
    assert_eq!(global.port(), None);
    assert_eq!(global.vid1(), Some(vlan(5)));
    assert_eq!(coord.next_request().unwrap().port(), Some(PortId(1)));
    assert!(coord.next_request().is_none());
    Ok(())
}

// A small deterministic generator, so the mixed-workload tests are
// reproducible without pulling in a random number crate.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u16 {
        (self.next() % n) as u16
    }
}

fn random_request(rng: &mut XorShift, nports: u16) -> (PurgeScope, PurgeShape) {
    let scope = match rng.below(u64::from(nports) + 1) {
        0 => PurgeScope::AllPorts,
        p => port(p),
    };
    // Keep the value ranges small so requests collide often
    let v1 = vlan(rng.below(4));
    let v2 = vlan(rng.below(4));
    let r = remid(rng.below(4));
    let shape = match rng.below(6) {
        0 => PurgeShape::AllVlans,
        1 => PurgeShape::Vid1(v1),
        2 => PurgeShape::Vid2(v2),
        3 => PurgeShape::RemoteId(r),
        4 => PurgeShape::Vid1Vid2(v1, v2),
        _ => PurgeShape::Vid1RemoteId(v1, r),
    };
    (scope, shape)
}

#[test]
fn test_drain_completeness() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(4)?;
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);

    for round in 0..20 {
        for _ in 0..50 {
            let (scope, shape) = random_request(&mut rng, 4);
            coord.enqueue(scope, shape, None)?;
        }
        let pending = coord.pending_obligations();
        let listed: usize =
            coord.dump().entries.iter().map(|e| e.pending.len()).sum();
        assert_eq!(pending, listed, "round {round}");

        // Interleave partial drains with new requests
        if round % 3 == 0 {
            coord.drain_batch(5);
        }
    }

    let pending = coord.pending_obligations();
    assert_eq!(coord.drain(), pending);
    assert!(coord.next_request().is_none());
    assert_eq!(coord.pending_obligations(), 0);
    Ok(())
}

#[test]
fn test_stats_account_for_every_request() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(3)?;
    let mut rng = XorShift(12345);
    for _ in 0..500 {
        let (scope, shape) = random_request(&mut rng, 3);
        coord.enqueue(scope, shape, None)?;
    }

    let stats = coord.stats();
    assert_eq!(stats.global.requests, outcome_total(&stats.global));
    assert_eq!(stats.port.requests, outcome_total(&stats.port));
    assert_eq!(
        stats.global.requests.total() + stats.port.requests.total(),
        500
    );

    // Everything enqueued is either dispatched or cancelled
    coord.drain();
    let stats = coord.stats();
    let mut enqueued = stats.global.enqueued;
    enqueued.merge(&stats.port.enqueued);
    let mut gone = stats.dispatched;
    gone.merge(&stats.cancelled);
    assert_eq!(enqueued, gone);
    Ok(())
}

#[test]
fn test_removed_port_reclaimed_after_dispatch() -> anyhow::Result<()> {
    let (hdl, coord) = setup(2)?;
    coord.enqueue(port(2), PurgeShape::Vid2(vlan(30)), None)?;
    hdl.port_delete(PortId(2))?;
    assert!(coord.port_removed(PortId(2)));

    // The entry survives until its work is done
    let dump = coord.dump();
    assert!(!entry_for(&dump, port(2)).unwrap().port_exists);

    let req = coord.next_request().unwrap();
    assert_eq!(req.port(), Some(PortId(2)));
    assert!(entry_for(&coord.dump(), port(2)).is_none());

    // New requests for the removed port are refused
    assert!(coord.enqueue(port(2), PurgeShape::AllVlans, None).is_err());
    Ok(())
}

#[test]
fn test_recreated_port_revives_entry() -> anyhow::Result<()> {
    let (hdl, coord) = setup(1)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(3)), None)?;
    hdl.port_delete(PortId(1))?;
    coord.port_removed(PortId(1));

    // Same glort, so the old entry picks up where it left off
    hdl.port_add(PortId(1), glort(1))?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(4)), None)?;
    let dump = coord.dump();
    assert_eq!(dump.entries.len(), 2);
    let entry = entry_for(&dump, port(1)).unwrap();
    assert!(entry.port_exists);
    assert_eq!(
        entry.pending,
        vec![PurgeShape::Vid1(vlan(3)), PurgeShape::Vid1(vlan(4))]
    );

    assert_eq!(coord.drain(), 2);
    let stats = coord.stats();
    assert_eq!(stats.entries_allocated, 1);
    assert_eq!(stats.entries_freed, 0);
    Ok(())
}

#[test]
fn test_recreated_port_new_glort_keeps_old_work() -> anyhow::Result<()> {
    let (hdl, coord) = setup(1)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(3)), None)?;
    hdl.port_delete(PortId(1))?;
    coord.port_removed(PortId(1));

    let new_glort = Glort(0x201);
    hdl.port_add(PortId(1), new_glort)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(4)), None)?;
    let dump = coord.dump();
    let entries: Vec<_> = dump
        .entries
        .iter()
        .filter(|e| e.scope == port(1))
        .map(|e| (e.glort, e.port_exists, e.pending.clone()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Some(glort(1)), false, vec![PurgeShape::Vid1(vlan(3))]),
            (Some(new_glort), true, vec![PurgeShape::Vid1(vlan(4))]),
        ]
    );

    // Work queued before the port went away still goes out under the glort
    // the port had back then.
    assert_eq!(coord.drain(), 2);
    let target = |g: Glort, v: u16| {
        PurgeTarget::Match(PurgeMatch {
            port: Some(PortId(1)),
            glort: Some(g),
            vid1: Some(vlan(v)),
            ..PurgeMatch::ALL
        })
    };
    assert_eq!(
        hdl.executed(),
        vec![target(glort(1), 3), target(new_glort, 4)]
    );

    let stats = coord.stats();
    assert_eq!(stats.entries_allocated, 2);
    assert_eq!(stats.entries_freed, 1);
    let dump = coord.dump();
    assert_eq!(dump.entries.len(), 2);
    assert_eq!(entry_for(&dump, port(1)).unwrap().glort, Some(new_glort));
    Ok(())
}

#[test]
fn test_callback_fires_once_via_dominating_purge() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(2)?;
    let (h, count) = counting_handler(1);
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(3)), Some(&h))?;
    coord.enqueue(port(1), PurgeShape::AllVlans, None)?;

    let req = coord.next_request().unwrap();
    assert_eq!(req.target, PurgeTarget::Match(PurgeMatch {
        port: Some(PortId(1)),
        glort: Some(glort(1)),
        ..PurgeMatch::ALL
    }));
    coord.complete(&req);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    coord.enqueue(port(2), PurgeShape::AllVlans, None)?;
    coord.enqueue(PurgeScope::AllPorts, PurgeShape::Vid1(vlan(3)), None)?;
    coord.drain();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(coord.stats().callbacks.fired, 1);
    Ok(())
}

#[test]
fn test_callback_waits_for_covering_purge() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(2)?;
    let (h, count) = counting_handler(1);
    coord.enqueue(port(1), PurgeShape::AllVlans, None)?;
    coord.enqueue(port(2), PurgeShape::Vid1(vlan(8)), Some(&h))?;

    // Port 1's purge does not cover port 2
    let req = coord.next_request().unwrap();
    assert_eq!(req.port(), Some(PortId(1)));
    coord.complete(&req);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    let req = coord.next_request().unwrap();
    assert_eq!(req.port(), Some(PortId(2)));
    coord.complete(&req);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_late_registration_is_restamped() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(1)?;
    let (h, count) = counting_handler(1);
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(2)), Some(&h))?;
    let first = coord.next_request().unwrap();

    // The same interest registered again while the first purge is in
    // flight must wait for a later one.
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(2)), Some(&h))?;
    coord.complete(&first);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    coord.drain();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let stats = coord.stats();
    assert_eq!(stats.callbacks.registered, 1);
    assert_eq!(stats.callbacks.refreshed, 1);
    Ok(())
}

#[test]
fn test_expired_flush() -> anyhow::Result<()> {
    let (hdl, coord) = setup(1)?;
    hdl.learn(LearnedEntry {
        port: PortId(1),
        vid1: vlan(10),
        vid2: None,
        remote_id: None,
        expired: true,
    });
    let fresh = LearnedEntry {
        port: PortId(1),
        vid1: vlan(11),
        vid2: None,
        remote_id: None,
        expired: false,
    };
    hdl.learn(fresh);

    let (h, count) = counting_handler(5);
    coord.flush(FlushMode::Expired, Some(&h))?;
    coord.flush(FlushMode::Expired, None)?;
    assert!(coord.dump().flush_expired);
    assert_eq!(coord.drain(), 1);
    assert_eq!(hdl.learned(), vec![fresh]);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(coord.stats().expired_requests, 2);
    Ok(())
}

#[test]
fn test_flush_modes_purge_stub_table() -> anyhow::Result<()> {
    let (hdl, coord) = setup(2)?;
    let learned = |p: u16, v1: u16, v2: Option<u16>, r: Option<u16>| {
        LearnedEntry {
            port: PortId(p),
            vid1: vlan(v1),
            vid2: v2.map(vlan),
            remote_id: r.map(remid),
            expired: false,
        }
    };
    hdl.learn(learned(1, 10, Some(20), None));
    hdl.learn(learned(1, 10, None, Some(30)));
    hdl.learn(learned(2, 10, Some(20), None));
    hdl.learn(learned(2, 11, None, None));

    coord.flush(
        FlushMode::PortVid1Vid2 {
            port: PortId(1),
            vid1: vlan(10),
            vid2: vlan(20),
        },
        None,
    )?;
    coord.flush(FlushMode::RemoteId { remote_id: remid(30) }, None)?;
    coord.flush(
        FlushMode::PortVlan {
            port: PortId(2),
            vid1: vlan(11),
        },
        None,
    )?;
    coord.drain();

    assert_eq!(hdl.learned(), vec![learned(2, 10, Some(20), None)]);
    Ok(())
}

#[test]
fn test_raw_requests() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(1)?;
    assert_eq!(
        coord.enqueue_raw(port(1), Some(4), None, Some(9), None)?,
        Admission::Enqueued
    );
    assert!(coord
        .enqueue_raw(port(1), Some(4), Some(5), Some(9), None)
        .is_err());
    assert!(coord
        .enqueue_raw(PurgeScope::AllPorts, None, Some(4096), None, None)
        .is_err());
    assert_eq!(coord.stats().invalid_requests, 2);
    Ok(())
}

#[test]
fn test_kick_per_request() -> anyhow::Result<()> {
    let (hdl, coord) = setup(1)?;
    coord.enqueue(port(1), PurgeShape::AllVlans, None)?;
    coord.enqueue(port(1), PurgeShape::AllVlans, None)?;
    coord.flush(FlushMode::Expired, None)?;
    let _ = coord.enqueue(port(9), PurgeShape::AllVlans, None);
    assert_eq!(hdl.kick_count(), 3);
    Ok(())
}

#[test]
fn test_shutdown_detaches_callbacks() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(2)?;
    let (h, count) = counting_handler(3);
    coord.enqueue(port(1), PurgeShape::AllVlans, Some(&h))?;
    coord.enqueue(port(2), PurgeShape::Vid2(vlan(1)), Some(&h))?;
    coord.flush(FlushMode::Expired, None)?;

    let detached = coord.shutdown();
    assert_eq!(detached.len(), 2);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(coord.pending_obligations(), 0);
    assert!(coord.next_request().is_none());

    let stats = coord.stats();
    assert_eq!(stats.callbacks.cancelled, 2);
    assert_eq!(stats.cancelled.total(), 2);
    assert_eq!(
        coord.dump(),
        RegistryDump {
            cursor: PurgeScope::AllPorts,
            flush_expired: false,
            next_seq: 1,
            callbacks: 0,
            entries: vec![EntryDump {
                scope: PurgeScope::AllPorts,
                glort: None,
                port_exists: true,
                pending: vec![],
            }],
        }
    );
    Ok(())
}

#[test]
fn test_dump_lists_pending_in_dispatch_order() -> anyhow::Result<()> {
    let (_hdl, coord) = setup(1)?;
    coord.enqueue(port(1), PurgeShape::RemoteId(remid(2)), None)?;
    coord.enqueue(port(1), PurgeShape::Vid2(vlan(9)), None)?;
    coord.enqueue(port(1), PurgeShape::Vid1Vid2(vlan(7), vlan(1)), None)?;
    coord.enqueue(port(1), PurgeShape::Vid1(vlan(3)), None)?;

    let dump = coord.dump();
    let pending = entry_for(&dump, port(1)).unwrap().pending.clone();
    assert_eq!(
        pending,
        vec![
            PurgeShape::Vid1(vlan(3)),
            PurgeShape::Vid1Vid2(vlan(7), vlan(1)),
            PurgeShape::Vid2(vlan(9)),
            PurgeShape::RemoteId(remid(2)),
        ]
    );

    let mut dispatched = Vec::new();
    while let Some(req) = coord.next_request() {
        if let PurgeTarget::Match(m) = req.target {
            let shape = PurgeShape::from_fields(
                m.vid1.map(u16::from),
                m.vid2.map(u16::from),
                m.remote_id.map(u16::from),
            )?;
            dispatched.push(shape);
        }
    }
    assert_eq!(dispatched, pending);
    Ok(())
}

#[test]
fn test_concurrent_enqueue_and_drain() -> anyhow::Result<()> {
    const PORTS: u16 = 4;
    const VLANS: u16 = 8;

    let (hdl, coord) = setup(PORTS)?;
    for p in 1..=PORTS {
        for v in 1..=VLANS {
            hdl.learn(LearnedEntry {
                port: PortId(p),
                vid1: vlan(v),
                vid2: None,
                remote_id: None,
                expired: false,
            });
        }
    }
    let before = hdl.learned();

    // Odd VLANs are purged port by port, VLAN 2 everywhere at once
    let purged = |e: &LearnedEntry| {
        let v = e.vid1.as_u16();
        v % 2 == 1 || v == 2
    };

    let producing = AtomicU64::new(u64::from(PORTS) + 1);
    std::thread::scope(|s| {
        for p in 1..=PORTS {
            let coord = &coord;
            let producing = &producing;
            s.spawn(move || {
                for v in (1..=VLANS).filter(|v| v % 2 == 1) {
                    coord
                        .enqueue(port(p), PurgeShape::Vid1(vlan(v)), None)
                        .unwrap();
                    // Purge of VLAN 2 on this port, possibly already
                    // covered by the global one
                    if v == 3 {
                        coord
                            .enqueue(port(p), PurgeShape::Vid1(vlan(2)), None)
                            .unwrap();
                    }
                }
                producing.fetch_sub(1, Ordering::SeqCst);
            });
        }
        s.spawn(|| {
            coord
                .enqueue(PurgeScope::AllPorts, PurgeShape::Vid1(vlan(2)), None)
                .unwrap();
            producing.fetch_sub(1, Ordering::SeqCst);
        });
        s.spawn(|| {
            while producing.load(Ordering::SeqCst) > 0 {
                coord.drain_batch(4);
                std::thread::yield_now();
            }
        });
    });
    coord.drain();

    let expected: Vec<LearnedEntry> =
        before.into_iter().filter(|e| !purged(e)).collect();
    assert_eq!(hdl.learned(), expected);
    assert_eq!(coord.pending_obligations(), 0);

    let stats = coord.stats();
    let requests = u64::from(PORTS) * (u64::from(VLANS) / 2 + 1);
    assert_eq!(stats.port.requests.total(), requests);
    assert_eq!(stats.global.requests.total(), 1);
    let enqueued =
        stats.port.enqueued.total() + stats.global.enqueued.total();
    assert_eq!(enqueued, stats.cancelled.total() + stats.dispatched.total());
    Ok(())
}
