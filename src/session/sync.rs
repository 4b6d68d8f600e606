//! clock sync and receiver feedback engine
//!
//! Keeps the per session timing state: the offset estimate produced by the
//! initiator's three step sync rounds, the 1 second receiver feedback
//! cadence, and the 60 second liveness window.  The participant feeds it
//! decoded packets and timestamps; it hands back the frames owed in return.
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::common::apple_packet::{FeedbackPacket, SyncPacket};
use crate::common::sync_timer::TickTimer;

/// How long the initiator may go silent before the session is dead
/// (60 seconds in 100 microsecond units)
pub const SYNC_TIMEOUT: u64 = 60 * 10_000;

/// Receiver feedback cadence (1 second in 100 microsecond units)
pub const FEEDBACK_PERIOD: u64 = 10_000;

/// counters worth surfacing in a status report
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub rounds: u64,
    pub offset_estimate: u64,
    pub rx_sequence: u16,
}

pub struct SyncEngine {
    initiator_ssrc: u32,
    local_ssrc: u32,
    offset_estimate: u64,
    last_sync_time: u64,
    rx_sequence: u16,
    last_feedback_sequence: u16,
    feedback_timer: TickTimer,
    rounds: u64,
}

impl SyncEngine {
    pub fn new() -> SyncEngine {
        SyncEngine {
            initiator_ssrc: 0,
            local_ssrc: 0,
            offset_estimate: 0,
            last_sync_time: 0,
            rx_sequence: 0,
            last_feedback_sequence: 0,
            feedback_timer: TickTimer::new(0, FEEDBACK_PERIOD),
            rounds: 0,
        }
    }

    /// Arm the engine for a freshly accepted session.
    pub fn start_session(&mut self, initiator_ssrc: u32, local_ssrc: u32, now: u64) {
        self.initiator_ssrc = initiator_ssrc;
        self.local_ssrc = local_ssrc;
        self.last_sync_time = now;
        self.feedback_timer.reset(now);
    }

    /// Count a valid exchange against the liveness window.
    pub fn touch(&mut self, now: u64) {
        self.last_sync_time = now;
    }

    /// Handle a CK frame.  Returns the count=1 reply when one is owed.
    ///
    /// Only counts 0 and 2 from the session's initiator are accepted;
    /// everything else is logged and dropped without touching the liveness
    /// window.
    pub fn handle_sync(&mut self, packet: &SyncPacket, now: u64) -> Option<SyncPacket> {
        if packet.sender_ssrc != self.initiator_ssrc || (packet.count != 0 && packet.count != 2) {
            error!(
                "unexpected sync packet (ssrc {:08x}, count {})",
                packet.sender_ssrc, packet.count
            );
            return None;
        }

        let mut reply = None;
        if packet.count == 0 {
            // echo the initiator's timestamp and add our own
            reply = Some(SyncPacket {
                sender_ssrc: self.local_ssrc,
                count: 1,
                timestamps: [packet.timestamps[0], now, 0],
            });
        } else {
            self.offset_estimate = (packet.timestamps[2].wrapping_add(packet.timestamps[0]) / 2)
                .wrapping_sub(packet.timestamps[1]);
            self.rounds += 1;
            info!("offset estimate: {}", self.offset_estimate);
        }
        self.last_sync_time = now;
        reply
    }

    /// Note the sequence number of a received RTP-MIDI packet.
    pub fn note_sequence(&mut self, sequence: u16) {
        self.rx_sequence = sequence;
    }

    /// Produce a receiver feedback frame if the cadence has elapsed and new
    /// data arrived since the last one.  The cadence timer advances either
    /// way so a quiet stream does not emit repeats.
    pub fn feedback_due(&mut self, now: u64) -> Option<FeedbackPacket> {
        if !self.feedback_timer.expired(now) {
            return None;
        }
        self.feedback_timer.reset(now);
        if self.rx_sequence == self.last_feedback_sequence {
            return None;
        }
        self.last_feedback_sequence = self.rx_sequence;
        Some(FeedbackPacket::from_sequence(self.local_ssrc, self.rx_sequence))
    }

    /// True when the initiator has been silent past the liveness window.
    pub fn timed_out(&self, now: u64) -> bool {
        now.saturating_sub(self.last_sync_time) > SYNC_TIMEOUT
    }

    /// Zero every per session field.  Nothing from a dead session may leak
    /// into the next one.
    pub fn reset(&mut self) {
        self.initiator_ssrc = 0;
        self.local_ssrc = 0;
        self.offset_estimate = 0;
        self.last_sync_time = 0;
        self.rx_sequence = 0;
        self.last_feedback_sequence = 0;
        self.feedback_timer = TickTimer::new(0, FEEDBACK_PERIOD);
        self.rounds = 0;
    }

    pub fn offset_estimate(&self) -> u64 {
        self.offset_estimate
    }

    pub fn last_sync_time(&self) -> u64 {
        self.last_sync_time
    }

    pub fn rx_sequence(&self) -> u16 {
        self.rx_sequence
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            rounds: self.rounds,
            offset_estimate: self.offset_estimate,
            rx_sequence: self.rx_sequence,
        }
    }
}
