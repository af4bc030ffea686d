//! Connection migration scenarios driven end to end through the path manager

use std::net::SocketAddr;

/// Address the handshake completed on.
pub fn home() -> SocketAddr {
    SocketAddr::from(([198, 51, 100, 1], 4433))
}

/// Address after the client switched networks.
pub fn roaming() -> SocketAddr {
    SocketAddr::from(([203, 0, 113, 7], 5555))
}

/// Same host as [`home`] behind a NAT that picked a new port.
pub fn rebound() -> SocketAddr {
    SocketAddr::from(([198, 51, 100, 1], 61000))
}

/// Builds a datagram payload of the given frames.
pub fn frames_payload(frames: &[tengine_quic::QuicFrame]) -> Vec<u8> {
    let len = frames.iter().map(|f| f.encoded_len()).sum();
    let mut buf = vec![0u8; len];
    let mut w = tengine_wire::Writer::new(&mut buf);
    for frame in frames {
        if frame.encode(&mut w).is_err() {
            break;
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{init_test_tracing, MigrationHarness};
    use tengine_quic::{PacketDisposition, PathEvent, PathTag, QuicError, QuicFrame};

    fn accept(d: PacketDisposition) -> tengine_quic::PathId {
        match d {
            PacketDisposition::Accept(id) => id,
            PacketDisposition::Drop => panic!("datagram dropped"),
        }
    }

    #[test]
    fn test_migration_validated_by_wire_response() {
        init_test_tracing();
        let mut h = MigrationHarness::new(11, home(), 4);
        let a = h.manager.active_id().unwrap();

        let b = accept(h.recv(roaming(), 1, false).unwrap());
        assert_eq!(h.manager.active_id(), Some(b));
        assert_eq!(h.manager.path(a).unwrap().tag(), PathTag::Backup);

        let sent = h.drain_transmits();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|t| t.remote == roaming() && t.payload.len() == 1200));

        // the peer echoes the second challenge alongside a PING
        let (_, c2) = h.manager.path(b).unwrap().challenges();
        let payload = frames_payload(&[QuicFrame::PathResponse(c2), QuicFrame::Ping]);
        let pkt = h.packet(roaming(), 2, 1, false);
        let now = h.now;
        accept(h.manager.process_packet(&pkt, &payload, now).unwrap());

        let path_b = h.manager.path(b).unwrap();
        assert!(path_b.is_validated());
        assert!(!path_b.is_limited());
        let events = h.drain_events();
        assert!(events.contains(&PathEvent::Validated { path: b }));
        assert!(events.contains(&PathEvent::NewTokenRequested { path: b }));

        // no further timer activity once validated
        assert!(h.fire_timer().map_or(true, |r| r.is_ok()));
        assert!(h.drain_transmits().is_empty());
    }

    #[test]
    fn test_failed_validation_returns_to_backup() {
        init_test_tracing();
        let mut h = MigrationHarness::new(5, home(), 4);
        let a = h.manager.active_id().unwrap();
        let b = accept(h.recv(roaming(), 1, false).unwrap());
        h.drain_transmits();

        let mut fired = 0;
        let mut retransmits = 0;
        while h.manager.path(b).is_some() {
            h.fire_timer().unwrap().unwrap();
            fired += 1;
            retransmits += h.drain_transmits().len();
        }
        assert_eq!(fired, 10);
        // one 1200 byte datagram from B leaves room for three in total
        assert_eq!(retransmits, 1);
        assert_eq!(h.manager.active_id(), Some(a));
        assert_eq!(h.manager.active_path().unwrap().tag(), PathTag::Active);
        assert_eq!(h.manager.client_ids().retire_requests(), &[1]);

        let events = h.drain_events();
        assert!(events.contains(&PathEvent::RestoredFromBackup { path: a }));
        assert!(events.contains(&PathEvent::ConnectionPathChanged {
            path: a,
            remote: home()
        }));
    }

    #[test]
    fn test_probe_then_migrate() {
        let mut h = MigrationHarness::new(2, home(), 4);
        let a = h.manager.active_id().unwrap();

        // client probes the new path before moving
        let challenge = frames_payload(&[QuicFrame::PathChallenge([9; 8])]);
        let pkt = h.packet(roaming(), 1, 1, true);
        let now = h.now;
        let b = accept(h.manager.process_packet(&pkt, &challenge, now).unwrap());
        assert_eq!(h.manager.active_id(), Some(a));
        assert_eq!(h.manager.path(b).unwrap().tag(), PathTag::Probe);

        let sent = h.drain_transmits();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].remote, roaming());
        assert_eq!(sent[0].payload[0], 0x1b);
        assert!(h.manager.take_frames().is_empty());

        let b2 = accept(h.recv_pn(roaming(), 2, 1, false).unwrap());
        assert_eq!(b2, b);
        assert_eq!(h.manager.active_id(), Some(b));
        assert!(h.manager.path(b).unwrap().is_validating());
    }

    #[test]
    fn test_nat_rebinding_keeps_congestion_state() {
        let mut h = MigrationHarness::new(3, home(), 4);
        h.manager.on_rtt_sample(std::time::Duration::from_millis(30));
        let a = h.manager.active_id().unwrap();

        // same DCID from a new port
        let b = accept(h.recv(rebound(), 0, false).unwrap());
        assert_eq!(h.manager.active_id(), Some(b));
        assert!(h.manager.path(a).unwrap().is_validating());
        assert_eq!(h.manager.path(a).unwrap().tag(), PathTag::Backup);

        let sent = h.drain_transmits();
        assert_eq!(sent.iter().filter(|t| t.remote == home()).count(), 2);
        assert_eq!(sent.iter().filter(|t| t.remote == rebound()).count(), 2);

        let cc = h.manager.congestion().clone();
        assert!(h.answer_challenge(b).unwrap());
        assert_eq!(h.manager.congestion(), &cc);
        assert!(h.manager.rtt().has_sample());

        assert!(h.answer_challenge(a).unwrap());
        assert!(!h.manager.path(a).unwrap().is_validating());
    }

    #[test]
    fn test_no_backup_closes_connection() {
        let config = tengine_quic::PathConfig {
            path_retries: 3,
            ..Default::default()
        };
        let mut h = MigrationHarness::with_config(config, 8, home(), 4);
        let a = h.manager.active_id().unwrap();

        // rebinding puts both addresses under validation and neither answers
        let b = accept(h.recv(rebound(), 0, false).unwrap());
        assert!(h.manager.path(a).unwrap().is_validating());

        let err = loop {
            match h.fire_timer() {
                Some(Ok(())) => continue,
                Some(Err(e)) => break e,
                None => panic!("timer disarmed before failure"),
            }
        };
        assert_eq!(err, QuicError::NoViablePath);
        assert!(h.manager.path(a).is_none());
        assert_eq!(h.manager.active_id(), Some(b));
        assert!(h
            .drain_events()
            .contains(&PathEvent::ValidationFailed { path: a }));
    }

    #[test]
    fn test_exhausted_client_ids_drop_new_paths() {
        let mut h = MigrationHarness::new(4, home(), 2);
        let b = accept(h.recv(roaming(), 1, true).unwrap());
        assert_eq!(h.manager.path(b).unwrap().tag(), PathTag::Probe);

        // retiring the old probe does not return its id to the pool
        let third: SocketAddr = "192.0.2.77:7000".parse().unwrap();
        assert_eq!(h.recv(third, 2, true).unwrap(), PacketDisposition::Drop);
        assert!(h.manager.path(b).is_none());
        assert_eq!(h.manager.paths().len(), 1);
    }
}
