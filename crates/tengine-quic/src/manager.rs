//! Path validation and connection migration (RFC 9000, 8.2 and 9).
//!
//! [`PathManager`] owns every path of one connection and is driven by the
//! connection's event loop: decrypted packets go to [`PathManager::on_packet`]
//! or [`PathManager::process_packet`], PATH_CHALLENGE and PATH_RESPONSE
//! frames to their handlers, and the single validation timer to
//! [`PathManager::on_validation_timer`]. It performs no I/O. Datagrams to
//! send, frames for the active path and state changes are queued and
//! drained by the caller. Time is always passed in.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::RngCore;
use tracing::{debug, info};

use crate::cid::ClientIdSource;
use crate::config::PathConfig;
use crate::congestion::{Congestion, RttEstimator};
use crate::error::{QuicError, QuicResult};
use crate::frame::{decode_frames, encode_padded, QuicFrame};
use crate::packet::{EncryptionLevel, IncomingPacket};
use crate::path::{PathId, PathTag, QuicPath};
use crate::registry::PathRegistry;

/// A datagram ready to be protected and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub path: PathId,
    pub remote: SocketAddr,
    /// Plaintext frames, padded as required.
    pub payload: Bytes,
}

/// Observable state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEvent {
    Migrated { from: Option<PathId>, to: PathId },
    Validated { path: PathId },
    ValidationFailed { path: PathId },
    RestoredFromBackup { path: PathId },
    /// A fresh address validation token should be sent on `path`.
    NewTokenRequested { path: PathId },
    /// The connection now sends to `remote`.
    ConnectionPathChanged { path: PathId, remote: SocketAddr },
    Retired { path: PathId },
}

/// What to do with the rest of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Continue processing; the packet arrived on `path`.
    Accept(PathId),
    /// Stop processing the datagram.
    Drop,
}

/// Path state of one connection.
#[derive(Debug)]
pub struct PathManager<C, R> {
    config: PathConfig,
    paths: PathRegistry,
    active: Option<PathId>,
    cids: C,
    rng: R,
    largest_pn: [Option<u64>; 3],
    used_dcids: HashSet<u64>,
    first_packet_seen: bool,
    congestion: Congestion,
    rtt: RttEstimator,
    validation_timer: Option<Instant>,
    transmits: VecDeque<Transmit>,
    frames: VecDeque<QuicFrame>,
    events: VecDeque<PathEvent>,
}

impl<C: ClientIdSource, R: RngCore> PathManager<C, R> {
    /// Creates the manager with the handshake path to `remote` as active.
    pub fn new(
        config: PathConfig,
        remote: SocketAddr,
        mut cids: C,
        rng: R,
        now: Instant,
    ) -> QuicResult<Self> {
        config.validate().map_err(|e| QuicError::InvalidConfig {
            reason: e.to_string(),
        })?;
        let cid = cids.next_client_id().ok_or(QuicError::NoClientId)?;
        let mut paths = PathRegistry::new();
        let id = paths.insert(remote, Some(cid));
        if let Some(path) = paths.get_mut(id) {
            path.tag = PathTag::Active;
        }
        Ok(Self {
            congestion: Congestion::new(config.max_udp_payload_size, now),
            rtt: RttEstimator::new(config.initial_rtt()),
            config,
            paths,
            active: Some(id),
            cids,
            rng,
            largest_pn: [None; 3],
            used_dcids: HashSet::new(),
            first_packet_seen: false,
            validation_timer: None,
            transmits: VecDeque::new(),
            frames: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    pub fn active_id(&self) -> Option<PathId> {
        self.active
    }

    pub fn active_path(&self) -> Option<&QuicPath> {
        self.active.and_then(|id| self.paths.get(id))
    }

    pub fn path(&self, id: PathId) -> Option<&QuicPath> {
        self.paths.get(id)
    }

    pub fn paths(&self) -> &PathRegistry {
        &self.paths
    }

    pub fn path_by_tag(&self, tag: PathTag) -> Option<PathId> {
        self.paths.find_by_tag(tag)
    }

    pub fn client_ids(&self) -> &C {
        &self.cids
    }

    pub fn client_ids_mut(&mut self) -> &mut C {
        &mut self.cids
    }

    pub fn congestion(&self) -> &Congestion {
        &self.congestion
    }

    pub fn congestion_mut(&mut self) -> &mut Congestion {
        &mut self.congestion
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Feeds an RTT sample from the loss detector.
    pub fn on_rtt_sample(&mut self, sample: Duration) {
        self.rtt.update(sample);
    }

    /// Current probe timeout.
    pub fn pto(&self) -> Duration {
        self.rtt.pto(self.config.max_ack_delay())
    }

    /// Largest packet number seen at `level`.
    pub fn largest_pn(&self, level: EncryptionLevel) -> Option<u64> {
        self.largest_pn[level.index()]
    }

    /// When the validation timer fires next.
    pub fn validation_deadline(&self) -> Option<Instant> {
        self.validation_timer
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Frames to send on the active path in regular packets.
    pub fn take_frames(&mut self) -> Vec<QuicFrame> {
        self.frames.drain(..).collect()
    }

    pub fn poll_event(&mut self) -> Option<PathEvent> {
        self.events.pop_front()
    }

    /// Marks the active address validated, as a completed handshake or a
    /// valid Retry token does.
    pub fn validate_active_address(&mut self) {
        if let Some(path) = self.active.and_then(|id| self.paths.get_mut(id)) {
            path.validated = true;
            path.limited = false;
            debug!(seqnum = path.seqnum, "active address validated by handshake");
        }
    }

    /// Decodes the frames of a packet and runs it through path selection,
    /// migration and the PATH_CHALLENGE / PATH_RESPONSE handlers.
    ///
    /// `pkt.probing` is recomputed from the decoded frames. An empty packet
    /// or a client NEW_TOKEN frame is a protocol violation.
    pub fn process_packet(
        &mut self,
        pkt: &IncomingPacket,
        payload: &[u8],
        now: Instant,
    ) -> QuicResult<PacketDisposition> {
        let frames = decode_frames(payload)?;
        if frames.is_empty() {
            return Err(QuicError::ProtocolViolation {
                reason: "packet carries no frames".to_string(),
            });
        }
        if frames.iter().any(|f| matches!(f, QuicFrame::NewToken(_))) {
            return Err(QuicError::ProtocolViolation {
                reason: "NEW_TOKEN received from client".to_string(),
            });
        }
        let pkt = IncomingPacket {
            probing: frames.iter().all(QuicFrame::is_probing),
            ..*pkt
        };
        let disposition = self.on_packet(&pkt, now)?;
        let PacketDisposition::Accept(path) = disposition else {
            return Ok(disposition);
        };
        for frame in &frames {
            match frame {
                QuicFrame::PathChallenge(data) => self.handle_path_challenge(path, data)?,
                QuicFrame::PathResponse(data) => self.handle_path_response(data, now)?,
                _ => {}
            }
        }
        Ok(disposition)
    }

    /// Attributes a decrypted packet to a path and applies migration for
    /// non-probing packets that arrive off the active path.
    pub fn on_packet(&mut self, pkt: &IncomingPacket, now: Instant) -> QuicResult<PacketDisposition> {
        let slot = &mut self.largest_pn[pkt.level.index()];
        let largest = slot.map_or(pkt.pn, |l| l.max(pkt.pn));
        *slot = Some(largest);

        let (id, rebound) = match self.set_path(pkt, largest)? {
            Some(found) => found,
            None => return Ok(PacketDisposition::Drop),
        };

        if !pkt.probing && pkt.level == EncryptionLevel::Application && Some(id) != self.active {
            self.handle_migration(pkt, id, rebound, largest, now)?;
        }
        Ok(PacketDisposition::Accept(id))
    }

    fn set_path(&mut self, pkt: &IncomingPacket, largest: u64) -> QuicResult<Option<(PathId, bool)>> {
        let mut rebound = false;

        let id = if !self.first_packet_seen {
            self.first_packet_seen = true;
            self.active
        } else {
            self.paths.find_by_addr(&pkt.remote)
        };

        let id = match id {
            Some(id) => id,
            None => {
                // only the highest-numbered packet may open a path, so
                // probing with replayed packets cannot drain client ids
                if pkt.pn != largest {
                    debug!(pn = pkt.pn, largest, addr = %pkt.remote, "packet from unknown path is not the largest, dropped");
                    return Ok(None);
                }

                if let Some(probe) = self.paths.find_by_tag(PathTag::Probe) {
                    self.free_path(probe)?;
                }

                let Some(cid) = self.cids.next_client_id() else {
                    info!(addr = %pkt.remote, "no available client ids for new path");
                    return Ok(None);
                };

                let id = self.paths.insert(pkt.remote, Some(cid));
                if let Some(path) = self.paths.get_mut(id) {
                    path.tag = PathTag::Probe;
                }

                // a known DCID on a new address means NAT rebinding
                rebound = self.used_dcids.contains(&pkt.dcid_seq);
                id
            }
        };

        self.used_dcids.insert(pkt.dcid_seq);
        let path = self.paths.get_mut(id).ok_or(QuicError::UnknownPath(id))?;
        path.received_bytes += pkt.len as u64;
        debug!(
            len = pkt.len,
            dcid_seq = pkt.dcid_seq,
            seqnum = path.seqnum,
            received = path.received_bytes,
            "packet via path"
        );
        Ok(Some((id, rebound)))
    }

    fn handle_migration(
        &mut self,
        pkt: &IncomingPacket,
        next: PathId,
        rebound: bool,
        largest: u64,
        now: Instant,
    ) -> QuicResult<()> {
        // only the highest-numbered non-probing packet moves the connection
        if pkt.pn != largest {
            debug!(pn = pkt.pn, largest, "stale non-probing packet, no migration");
            return Ok(());
        }

        let prev = self.active;

        if let Some(prev) = prev {
            if rebound {
                self.validate_path(prev, now)?;
            }

            let prev_validated = self.paths.get(prev).is_some_and(|p| p.validated);
            if prev_validated {
                let next_is_backup = self.paths.get(next).is_some_and(|p| p.tag == PathTag::Backup);
                if !next_is_backup {
                    if let Some(bkp) = self.paths.find_by_tag(PathTag::Backup) {
                        self.free_path(bkp)?;
                    }
                }
                if let Some(path) = self.paths.get_mut(prev) {
                    path.tag = PathTag::Backup;
                    debug!(seqnum = path.seqnum, "path is now backup");
                }
            } else {
                self.active = None;
                self.free_path(prev)?;
            }
        }

        self.set_active(next)?;

        let (validated, validating) = self
            .paths
            .get(next)
            .map(|p| (p.validated, p.validating))
            .ok_or(QuicError::UnknownPath(next))?;
        if !validated && !validating {
            self.validate_path(next, now)?;
        }

        if let Some(path) = self.paths.get(next) {
            info!(seqnum = path.seqnum, addr = %path.addr_text, "migrated to path");
        }
        self.events.push_back(PathEvent::Migrated {
            from: prev,
            to: next,
        });
        Ok(())
    }

    fn set_active(&mut self, id: PathId) -> QuicResult<()> {
        let path = self.paths.get_mut(id).ok_or(QuicError::UnknownPath(id))?;
        path.tag = PathTag::Active;
        let remote = path.remote;
        debug!(seqnum = path.seqnum, addr = %path.addr_text, "send path set");
        self.active = Some(id);
        self.events
            .push_back(PathEvent::ConnectionPathChanged { path: id, remote });
        Ok(())
    }

    /// Starts validating `id`: two fresh challenges, each in its own padded
    /// datagram, with the retry timer armed one PTO out.
    pub fn validate_path(&mut self, id: PathId, now: Instant) -> QuicResult<()> {
        let pto = self.pto();
        let retries = self.config.path_retries;
        let path = self.paths.get_mut(id).ok_or(QuicError::UnknownPath(id))?;
        debug!(seqnum = path.seqnum, "initiated path validation");

        path.validating = true;
        self.rng
            .try_fill_bytes(&mut path.challenge1)
            .map_err(|e| QuicError::Random {
                reason: e.to_string(),
            })?;
        self.rng
            .try_fill_bytes(&mut path.challenge2)
            .map_err(|e| QuicError::Random {
                reason: e.to_string(),
            })?;

        self.send_path_challenge(id)?;

        if let Some(path) = self.paths.get_mut(id) {
            path.expires = Some(now + pto);
            path.tries = retries;
        }
        if self.validation_timer.is_none() {
            self.validation_timer = Some(now + pto);
        }
        Ok(())
    }

    fn send_path_challenge(&mut self, id: PathId) -> QuicResult<()> {
        let (c1, c2) = {
            let path = self.paths.get(id).ok_or(QuicError::UnknownPath(id))?;
            debug!(seqnum = path.seqnum, tries = path.tries, "send path_challenge");
            path.challenges()
        };
        let min = self.config.min_probe_datagram;
        self.send_frame(id, &QuicFrame::PathChallenge(c1), min)?;
        self.send_frame(id, &QuicFrame::PathChallenge(c2), min)
    }

    /// Queues `frame` as a datagram on `id`, padded towards `min_len` as
    /// far as the anti-amplification allowance permits.
    fn send_frame(&mut self, id: PathId, frame: &QuicFrame, min_len: usize) -> QuicResult<()> {
        let factor = self.config.amplification_factor;
        let path = self.paths.get_mut(id).ok_or(QuicError::UnknownPath(id))?;
        let frame_len = frame.encoded_len();

        let target = match path.send_allowance(factor) {
            None => min_len.max(frame_len),
            Some(allowance) => {
                let allowance = usize::try_from(allowance).unwrap_or(usize::MAX);
                if allowance < frame_len {
                    debug!(
                        seqnum = path.seqnum,
                        allowance,
                        frame_type = frame.frame_type(),
                        "amplification limit reached, frame not sent"
                    );
                    return Ok(());
                }
                min_len.min(allowance).max(frame_len)
            }
        };

        let payload = encode_padded(frame, target)?;
        path.sent_bytes += payload.len() as u64;
        let remote = path.remote;
        self.congestion.on_packet_sent(payload.len());
        self.transmits.push_back(Transmit {
            path: id,
            remote,
            payload: Bytes::from(payload),
        });
        Ok(())
    }

    /// Answers a PATH_CHALLENGE on the path it arrived on. A challenge on
    /// the active path also queues a PING so a non-probing packet follows.
    pub fn handle_path_challenge(&mut self, arrival: PathId, data: &[u8; 8]) -> QuicResult<()> {
        self.send_frame(
            arrival,
            &QuicFrame::PathResponse(*data),
            self.config.min_probe_datagram,
        )?;
        if Some(arrival) == self.active {
            self.frames.push_back(QuicFrame::Ping);
        }
        Ok(())
    }

    /// Matches a PATH_RESPONSE against the challenges of every validating
    /// path, whichever path it arrived on.
    pub fn handle_path_response(&mut self, data: &[u8; 8], now: Instant) -> QuicResult<()> {
        let found = self
            .paths
            .iter()
            .find(|(_, p)| p.validating && p.matches_challenge(data))
            .map(|(id, p)| (id, p.remote));
        let Some((id, remote)) = found else {
            debug!("stale PATH_RESPONSE ignored");
            return Ok(());
        };

        // keep congestion state when only the port changed
        let same_addr = self
            .paths
            .find_by_tag(PathTag::Backup)
            .and_then(|bkp| self.paths.get(bkp))
            .is_some_and(|bkp| bkp.same_peer(&remote, false));
        if !same_addr {
            self.congestion.reset(self.config.max_udp_payload_size, now);
            self.rtt.reset();
        }

        self.events.push_back(PathEvent::NewTokenRequested { path: id });

        let path = self.paths.get_mut(id).ok_or(QuicError::UnknownPath(id))?;
        info!(seqnum = path.seqnum, addr = %path.addr_text, "path successfully validated");
        path.validated = true;
        path.validating = false;
        path.limited = false;
        self.events.push_back(PathEvent::Validated { path: id });
        Ok(())
    }

    /// Runs the validation timer.
    ///
    /// Paths whose deadline passed lose one try and retransmit, or fail
    /// when none are left. A failed active path falls back to the
    /// validated backup; without one the connection has no viable path.
    pub fn on_validation_timer(&mut self, now: Instant) -> QuicResult<()> {
        match self.validation_timer {
            Some(deadline) if deadline <= now => self.validation_timer = None,
            _ => return Ok(()),
        }

        let pto = self.pto();
        let mut next: Option<Duration> = None;

        for id in self.paths.ids() {
            let Some(path) = self.paths.get_mut(id) else {
                continue;
            };
            if !path.validating {
                continue;
            }

            let expires = path.expires.unwrap_or(now);
            if expires > now {
                let left = expires - now;
                next = Some(next.map_or(left, |n| n.min(left)));
                continue;
            }

            path.tries = path.tries.saturating_sub(1);
            if path.tries > 0 {
                path.expires = Some(now + pto);
                next = Some(next.map_or(pto, |n| n.min(pto)));
                if let Err(e) = self.send_path_challenge(id) {
                    debug!(error = %e, "path_challenge retransmit failed");
                }
                continue;
            }

            debug!(seqnum = path.seqnum, "path validation failed");
            path.validated = false;
            path.validating = false;
            path.limited = true;
            self.events.push_back(PathEvent::ValidationFailed { path: id });

            if Some(id) == self.active {
                let backup = self
                    .paths
                    .find_by_tag(PathTag::Backup)
                    .filter(|bkp| self.paths.get(*bkp).is_some_and(|p| p.validated));
                let Some(bkp) = backup else {
                    return Err(QuicError::NoViablePath);
                };
                self.set_active(bkp)?;
                if let Some(path) = self.paths.get(bkp) {
                    info!(seqnum = path.seqnum, addr = %path.addr_text, "path is restored from backup");
                }
                self.events.push_back(PathEvent::RestoredFromBackup { path: bkp });
            }

            self.free_path(id)?;
        }

        if let Some(next) = next {
            self.validation_timer = Some(now + next);
        }
        Ok(())
    }

    /// Retires a path: its slot is recycled and its client id released.
    pub fn free_path(&mut self, id: PathId) -> QuicResult<()> {
        let path = self.paths.remove(id).ok_or(QuicError::UnknownPath(id))?;
        if self.active == Some(id) {
            self.active = None;
        }
        if let Some(cid) = path.cid {
            self.cids.free_client_id(cid)?;
        }
        debug!(seqnum = path.seqnum, addr = %path.addr_text, "path retired");
        self.events.push_back(PathEvent::Retired { path: id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::ClientIdPool;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type Manager = PathManager<ClientIdPool, StdRng>;

    fn addr_a() -> SocketAddr {
        "198.51.100.1:4433".parse().unwrap()
    }

    fn addr_b() -> SocketAddr {
        "203.0.113.7:5555".parse().unwrap()
    }

    fn create_test_manager(now: Instant) -> Manager {
        let mut m = PathManager::new(
            PathConfig::default(),
            addr_a(),
            ClientIdPool::with_ids(4),
            StdRng::seed_from_u64(7),
            now,
        )
        .unwrap();
        m.on_packet(&packet(addr_a(), 0, 0, false), now).unwrap();
        m.validate_active_address();
        m
    }

    fn packet(remote: SocketAddr, pn: u64, dcid_seq: u64, probing: bool) -> IncomingPacket {
        IncomingPacket {
            level: EncryptionLevel::Application,
            pn,
            len: 1200,
            remote,
            dcid_seq,
            probing,
        }
    }

    fn drain_events(m: &mut Manager) -> Vec<PathEvent> {
        std::iter::from_fn(|| m.poll_event()).collect()
    }

    fn drain_transmits(m: &mut Manager) -> Vec<Transmit> {
        std::iter::from_fn(|| m.poll_transmit()).collect()
    }

    fn migrate_to_b(m: &mut Manager, now: Instant) -> (PathId, PathId) {
        let a = m.active_id().unwrap();
        let disposition = m.on_packet(&packet(addr_b(), 1, 1, false), now).unwrap();
        let PacketDisposition::Accept(b) = disposition else {
            panic!("packet dropped");
        };
        (a, b)
    }

    #[test]
    fn test_initial_path_is_active() {
        let now = Instant::now();
        let m = create_test_manager(now);
        let active = m.active_path().unwrap();
        assert_eq!(active.tag(), PathTag::Active);
        assert!(active.is_validated());
        assert!(!active.is_limited());
        assert_eq!(active.received_bytes(), 1200);
    }

    #[test]
    fn test_new_client_requires_client_id() {
        let now = Instant::now();
        let err = PathManager::new(
            PathConfig::default(),
            addr_a(),
            ClientIdPool::new(),
            StdRng::seed_from_u64(1),
            now,
        )
        .unwrap_err();
        assert_eq!(err, QuicError::NoClientId);
    }

    #[test]
    fn test_migration_demotes_active_and_validates_new() {
        let now = Instant::now();
        let mut m = create_test_manager(now);
        drain_events(&mut m);
        let (a, b) = migrate_to_b(&mut m, now);

        assert_eq!(m.active_id(), Some(b));
        assert_eq!(m.path(a).unwrap().tag(), PathTag::Backup);
        let path_b = m.path(b).unwrap();
        assert_eq!(path_b.tag(), PathTag::Active);
        assert!(path_b.is_validating());
        assert_eq!(path_b.tries(), 10);
        let (c1, c2) = path_b.challenges();
        assert_ne!(c1, c2);

        let sent = drain_transmits(&mut m);
        assert_eq!(sent.len(), 2);
        for (tx, challenge) in sent.iter().zip([c1, c2]) {
            assert_eq!(tx.path, b);
            assert_eq!(tx.remote, addr_b());
            assert_eq!(tx.payload.len(), 1200);
            assert_eq!(tx.payload[0], 0x1a);
            assert_eq!(&tx.payload[1..9], &challenge);
        }
        assert_eq!(m.validation_deadline(), Some(now + m.pto()));

        let events = drain_events(&mut m);
        assert!(events.contains(&PathEvent::ConnectionPathChanged {
            path: b,
            remote: addr_b()
        }));
        assert!(events.contains(&PathEvent::Migrated {
            from: Some(a),
            to: b
        }));
    }

    #[test]
    fn test_validation_fails_after_exact_retries_and_restores_backup() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let (a, b) = migrate_to_b(&mut m, t0);
        drain_transmits(&mut m);
        drain_events(&mut m);

        let mut now = t0;
        let mut retransmits = 0;
        for expiration in 1..=10 {
            now = m.validation_deadline().unwrap();
            m.on_validation_timer(now).unwrap();
            retransmits += drain_transmits(&mut m).len();
            if expiration < 10 {
                assert_eq!(m.active_id(), Some(b));
                assert_eq!(m.path(b).unwrap().tries(), 10 - expiration);
            }
        }
        // B is still amplification limited: 3 x 1200 received covers one
        // retransmission after the first two challenges
        assert_eq!(retransmits, 1);

        assert_eq!(m.active_id(), Some(a));
        assert_eq!(m.path(a).unwrap().tag(), PathTag::Active);
        assert!(m.path(b).is_none());
        assert!(drain_transmits(&mut m).is_empty());
        assert_eq!(m.validation_deadline(), None);

        let events = drain_events(&mut m);
        assert!(events.contains(&PathEvent::ValidationFailed { path: b }));
        assert!(events.contains(&PathEvent::RestoredFromBackup { path: a }));
        assert!(events.contains(&PathEvent::Retired { path: b }));
        assert!(now > t0);
    }

    #[test]
    fn test_validation_failure_without_backup_is_fatal() {
        let t0 = Instant::now();
        let mut m = PathManager::new(
            PathConfig {
                path_retries: 2,
                ..Default::default()
            },
            addr_a(),
            ClientIdPool::with_ids(4),
            StdRng::seed_from_u64(3),
            t0,
        )
        .unwrap();
        // handshake never validated the address, so A is freed on migration
        m.on_packet(&packet(addr_a(), 0, 0, false), t0).unwrap();
        let (a, b) = migrate_to_b(&mut m, t0);
        assert!(m.path(a).is_none());
        assert!(m.path_by_tag(PathTag::Backup).is_none());

        let first = m.validation_deadline().unwrap();
        m.on_validation_timer(first).unwrap();
        let second = m.validation_deadline().unwrap();
        let err = m.on_validation_timer(second).unwrap_err();
        assert_eq!(err, QuicError::NoViablePath);
        assert_eq!(err.transport_code(), 0x10);
        assert_eq!(m.active_id(), Some(b));
    }

    #[test]
    fn test_timer_before_deadline_is_noop() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let (_, b) = migrate_to_b(&mut m, t0);
        drain_transmits(&mut m);
        m.on_validation_timer(t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(m.path(b).unwrap().tries(), 10);
        assert!(drain_transmits(&mut m).is_empty());
    }

    #[test]
    fn test_path_response_validates_and_resets_congestion() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        m.on_rtt_sample(Duration::from_millis(40));
        m.congestion_mut().on_packet_sent(3000);
        let (_, b) = migrate_to_b(&mut m, t0);
        drain_events(&mut m);
        let (_, c2) = m.path(b).unwrap().challenges();

        let t1 = t0 + Duration::from_millis(50);
        m.handle_path_response(&c2, t1).unwrap();

        let path_b = m.path(b).unwrap();
        assert!(path_b.is_validated());
        assert!(!path_b.is_validating());
        assert!(!path_b.is_limited());
        assert_eq!(m.congestion().recovery_start(), t1);
        assert_eq!(m.congestion().bytes_in_flight(), 0);
        assert_eq!(m.congestion().ssthresh(), u64::MAX);
        assert!(!m.rtt().has_sample());

        let events = drain_events(&mut m);
        assert_eq!(
            events,
            vec![
                PathEvent::NewTokenRequested { path: b },
                PathEvent::Validated { path: b }
            ]
        );
    }

    #[test]
    fn test_port_only_change_keeps_congestion() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        m.on_rtt_sample(Duration::from_millis(40));
        let rebound_addr: SocketAddr = "198.51.100.1:6000".parse().unwrap();
        let PacketDisposition::Accept(b) =
            m.on_packet(&packet(rebound_addr, 1, 1, false), t0).unwrap()
        else {
            panic!("packet dropped");
        };
        let before = m.congestion().clone();
        let (c1, _) = m.path(b).unwrap().challenges();

        m.handle_path_response(&c1, t0 + Duration::from_secs(1)).unwrap();
        assert!(m.path(b).unwrap().is_validated());
        assert_eq!(m.congestion(), &before);
        assert!(m.rtt().has_sample());
    }

    #[test]
    fn test_stale_path_response_ignored() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let (_, b) = migrate_to_b(&mut m, t0);
        drain_events(&mut m);
        m.handle_path_response(&[0xee; 8], t0).unwrap();
        assert!(m.path(b).unwrap().is_validating());
        assert!(drain_events(&mut m).is_empty());

        let (c1, _) = m.path(b).unwrap().challenges();
        m.handle_path_response(&c1, t0).unwrap();
        drain_events(&mut m);
        // duplicate response after validation
        m.handle_path_response(&c1, t0).unwrap();
        assert!(drain_events(&mut m).is_empty());
    }

    #[test]
    fn test_stale_packet_never_migrates() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let a = m.active_id().unwrap();
        m.on_packet(&packet(addr_a(), 10, 0, false), t0).unwrap();

        let disposition = m.on_packet(&packet(addr_b(), 5, 1, false), t0).unwrap();
        assert_eq!(disposition, PacketDisposition::Drop);
        assert_eq!(m.active_id(), Some(a));
        assert_eq!(m.paths().len(), 1);
        assert_eq!(m.largest_pn(EncryptionLevel::Application), Some(10));
    }

    #[test]
    fn test_reordered_packet_on_known_path_does_not_migrate() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let a = m.active_id().unwrap();
        // probe packet opens B, then a newer packet arrives on A
        let PacketDisposition::Accept(b) = m.on_packet(&packet(addr_b(), 1, 1, true), t0).unwrap()
        else {
            panic!("packet dropped");
        };
        m.on_packet(&packet(addr_a(), 3, 0, false), t0).unwrap();
        // delayed non-probing packet on B
        let disposition = m.on_packet(&packet(addr_b(), 2, 1, false), t0).unwrap();
        assert_eq!(disposition, PacketDisposition::Accept(b));
        assert_eq!(m.active_id(), Some(a));
        assert_eq!(m.path(b).unwrap().tag(), PathTag::Probe);
    }

    #[test]
    fn test_client_id_exhaustion_drops_datagram() {
        let t0 = Instant::now();
        let mut m = PathManager::new(
            PathConfig::default(),
            addr_a(),
            ClientIdPool::with_ids(1),
            StdRng::seed_from_u64(1),
            t0,
        )
        .unwrap();
        m.on_packet(&packet(addr_a(), 0, 0, false), t0).unwrap();
        let disposition = m.on_packet(&packet(addr_b(), 1, 1, false), t0).unwrap();
        assert_eq!(disposition, PacketDisposition::Drop);
        assert_eq!(m.paths().len(), 1);
    }

    #[test]
    fn test_new_probe_replaces_old_probe() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let c: SocketAddr = "192.0.2.9:9999".parse().unwrap();
        let PacketDisposition::Accept(b) = m.on_packet(&packet(addr_b(), 1, 1, true), t0).unwrap()
        else {
            panic!("packet dropped");
        };
        let PacketDisposition::Accept(p) = m.on_packet(&packet(c, 2, 2, true), t0).unwrap() else {
            panic!("packet dropped");
        };
        assert!(m.path(b).is_none());
        assert_eq!(m.path(p).unwrap().tag(), PathTag::Probe);
        assert_eq!(m.paths().count_tag(PathTag::Probe), 1);
        assert_eq!(m.client_ids().retire_requests(), &[1]);
    }

    #[test]
    fn test_rebinding_revalidates_previous_path() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let a = m.active_id().unwrap();
        // same DCID as the handshake path, new address
        m.on_packet(&packet(addr_b(), 1, 0, false), t0).unwrap();
        assert_eq!(m.path(a).unwrap().tag(), PathTag::Backup);
        assert!(m.path(a).unwrap().is_validating());
        let sent = drain_transmits(&mut m);
        assert_eq!(sent.iter().filter(|t| t.remote == addr_a()).count(), 2);
        assert_eq!(sent.iter().filter(|t| t.remote == addr_b()).count(), 2);
    }

    #[test]
    fn test_migration_to_validated_backup_keeps_it() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let (a, b) = migrate_to_b(&mut m, t0);
        let (c1, _) = m.path(b).unwrap().challenges();
        m.handle_path_response(&c1, t0).unwrap();

        // peer returns to A
        m.on_packet(&packet(addr_a(), 2, 0, false), t0).unwrap();
        assert_eq!(m.active_id(), Some(a));
        assert_eq!(m.path(b).unwrap().tag(), PathTag::Backup);
        assert!(!m.path(a).unwrap().is_validating());
        assert_eq!(m.paths().len(), 2);
    }

    #[test]
    fn test_path_challenge_echoed_with_ping_on_active() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let a = m.active_id().unwrap();
        m.handle_path_challenge(a, &[5; 8]).unwrap();

        let sent = drain_transmits(&mut m);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].path, a);
        assert_eq!(sent[0].payload.len(), 1200);
        assert_eq!(sent[0].payload[0], 0x1b);
        assert_eq!(&sent[0].payload[1..9], &[5; 8]);
        assert_eq!(m.take_frames(), vec![QuicFrame::Ping]);
    }

    #[test]
    fn test_path_challenge_on_probe_no_ping() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let mut challenge = vec![0x1a];
        challenge.extend_from_slice(&[6; 8]);
        let disposition = m
            .process_packet(&packet(addr_b(), 1, 1, false), &challenge, t0)
            .unwrap();
        let PacketDisposition::Accept(b) = disposition else {
            panic!("packet dropped");
        };
        assert_eq!(m.path(b).unwrap().tag(), PathTag::Probe);

        let sent = drain_transmits(&mut m);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].remote, addr_b());
        // 3 x 1200 received allows a full-size response
        assert_eq!(sent[0].payload.len(), 1200);
        assert!(m.take_frames().is_empty());
    }

    #[test]
    fn test_amplification_limits_padding() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let pkt = IncomingPacket {
            len: 100,
            ..packet(addr_b(), 1, 1, true)
        };
        let PacketDisposition::Accept(b) = m.on_packet(&pkt, t0).unwrap() else {
            panic!("packet dropped");
        };
        m.handle_path_challenge(b, &[1; 8]).unwrap();
        m.handle_path_challenge(b, &[2; 8]).unwrap();
        m.handle_path_challenge(b, &[3; 8]).unwrap();

        let sent = drain_transmits(&mut m);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.len(), 300);
        assert_eq!(m.path(b).unwrap().sent_bytes(), 300);
    }

    #[test]
    fn test_process_packet_rejects_bad_frames() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let err = m
            .process_packet(&packet(addr_a(), 1, 0, false), &[0x1b, 1, 2], t0)
            .unwrap_err();
        assert_eq!(err.transport_code(), 0x07);
    }

    #[test]
    fn test_process_packet_rejects_empty_payload() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let a = m.active_id().unwrap();
        let err = m
            .process_packet(&packet(addr_b(), 1, 1, false), &[], t0)
            .unwrap_err();
        assert!(matches!(err, QuicError::ProtocolViolation { .. }));
        assert_eq!(err.transport_code(), 0x0a);
        assert_eq!(m.active_id(), Some(a));
        assert_eq!(m.paths().len(), 1);
    }

    #[test]
    fn test_process_packet_rejects_client_new_token() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let err = m
            .process_packet(&packet(addr_a(), 1, 0, false), &[0x07, 0x01, 0xaa], t0)
            .unwrap_err();
        assert!(matches!(err, QuicError::ProtocolViolation { .. }));
        assert_eq!(err.transport_code(), 0x0a);
    }

    #[test]
    fn test_new_rejects_zero_retries() {
        let config = PathConfig {
            path_retries: 0,
            ..Default::default()
        };
        let err = PathManager::new(
            config,
            addr_a(),
            ClientIdPool::with_ids(4),
            StdRng::seed_from_u64(1),
            Instant::now(),
        )
        .unwrap_err();
        assert!(matches!(err, QuicError::InvalidConfig { .. }));
    }

    #[test]
    fn test_handshake_level_packet_does_not_migrate() {
        let t0 = Instant::now();
        let mut m = create_test_manager(t0);
        let a = m.active_id().unwrap();
        let pkt = IncomingPacket {
            level: EncryptionLevel::Handshake,
            ..packet(addr_b(), 0, 1, false)
        };
        m.on_packet(&pkt, t0).unwrap();
        assert_eq!(m.active_id(), Some(a));
    }

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "entropy unavailable",
            )))
        }
    }

    #[test]
    fn test_random_failure_is_error() {
        let t0 = Instant::now();
        let mut m = PathManager::new(
            PathConfig::default(),
            addr_a(),
            ClientIdPool::with_ids(4),
            FailingRng,
            t0,
        )
        .unwrap();
        m.on_packet(&packet(addr_a(), 0, 0, false), t0).unwrap();
        let err = m.on_packet(&packet(addr_b(), 1, 1, false), t0).unwrap_err();
        assert!(matches!(err, QuicError::Random { .. }));
    }
}
