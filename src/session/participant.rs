//! the AppleMIDI session participant
//!
//! Owns the control and data sockets, walks the invitation handshake with a
//! remote initiator, answers sync rounds, forwards the decoded MIDI stream
//! to the sink and reports receiver feedback.  One session at a time; loss
//! of the initiator tears the session down and the participant goes back to
//! listening for the next invitation.
use log::{debug, error, info};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::common::apple_packet::{
    self, ControlCommand, EndSessionPacket, InvitationPacket, SyncPacket, FEEDBACK_PACKET_SIZE,
    INVITATION_HEADER_SIZE, MAX_NAME_SIZE, SYNC_PACKET_SIZE,
};
use crate::common::box_error::BoxError;
use crate::common::rtp_packet;
use crate::common::sync_timer::SyncClock;
use crate::session::session_socket::SessionSocket;
use crate::session::sync::SyncEngine;
use crate::session::{EntropySource, MidiSink};

/// Default control port per RFC 6295.  The data port is always control + 1.
pub const DEFAULT_CONTROL_PORT: u16 = 5004;
/// Name echoed in accepted invitations unless configured otherwise.
pub const DEFAULT_SESSION_NAME: &str = "mt32-pi";

// Big enough for any datagram the session will see.
const RECV_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ControlInvitation,
    MIDIInvitation,
    Connected,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::ControlInvitation => "control_invitation",
            State::MIDIInvitation => "midi_invitation",
            State::Connected => "connected",
        }
    }
}

pub struct Participant {
    control_sock: SessionSocket,
    midi_sock: SessionSocket,
    control_buf: [u8; RECV_BUFFER_SIZE],
    midi_buf: [u8; RECV_BUFFER_SIZE],

    clock: Box<dyn SyncClock + Send>,
    entropy: Box<dyn EntropySource + Send>,
    sink: Box<dyn MidiSink + Send>,
    name: String,

    state: State,
    initiator_addr: Option<IpAddr>,
    initiator_control_port: u16,
    initiator_midi_port: u16,
    initiator_token: u32,
    initiator_ssrc: u32,
    local_ssrc: u32,
    sync: SyncEngine,

    running: Arc<AtomicBool>,
}

impl Participant {
    /// Bind both ports and build the participant.  A failed bind surfaces
    /// here; the poll loop never starts on half an endpoint pair.
    pub fn build(
        control_port: u16,
        name: &str,
        sink: Box<dyn MidiSink + Send>,
        entropy: Box<dyn EntropySource + Send>,
        clock: Box<dyn SyncClock + Send>,
    ) -> Result<Participant, BoxError> {
        let control_sock = SessionSocket::build(control_port)?;
        let midi_sock = SessionSocket::build(control_port + 1)?;
        Ok(Participant {
            control_sock,
            midi_sock,
            control_buf: [0; RECV_BUFFER_SIZE],
            midi_buf: [0; RECV_BUFFER_SIZE],
            clock,
            entropy,
            sink,
            name: String::from(name),
            state: State::ControlInvitation,
            initiator_addr: None,
            initiator_control_port: 0,
            initiator_midi_port: 0,
            initiator_token: 0,
            initiator_ssrc: 0,
            local_ssrc: 0,
            sync: SyncEngine::new(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Handle the caller can use to stop the poll loop from another thread;
    /// store false and the loop exits cleanly at its next yield point.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Poll loop.  Drains at most one datagram per endpoint per pass, then
    /// yields so the rest of the process gets scheduled.  Returns only on a
    /// fatal socket error or after a stop request.
    pub fn run(&mut self) -> Result<(), BoxError> {
        info!(
            "session participant listening on ports {}/{}",
            self.control_sock.port(),
            self.midi_sock.port()
        );
        while self.running.load(Ordering::Relaxed) {
            self.tick()?;
            thread::yield_now();
        }
        info!("session participant stopped");
        Ok(())
    }

    /// One pass of the loop: drain, stamp the time, dispatch by state.
    pub fn tick(&mut self) -> Result<(), BoxError> {
        let control_rcv = self.control_sock.receive(&mut self.control_buf)?;
        let midi_rcv = self.midi_sock.receive(&mut self.midi_buf)?;
        let now = self.clock.now_100us();

        match self.state {
            State::ControlInvitation => self.control_invitation_state(control_rcv, now),
            State::MIDIInvitation => self.midi_invitation_state(midi_rcv, now),
            State::Connected => self.connected_state(control_rcv, midi_rcv, now),
        }
        Ok(())
    }

    // Waiting for an initiator.  The only thing we answer is a control port
    // invitation; everything else is logged and dropped.
    fn control_invitation_state(&mut self, rcv: Option<(usize, SocketAddr)>, now: u64) {
        let Some((amt, src)) = rcv else { return };

        let invite =
            match InvitationPacket::parse(&self.control_buf[..amt], ControlCommand::Invitation) {
                Ok(packet) => packet,
                Err(e) => {
                    // recognizable but out of place commands get named in the log
                    match apple_packet::peek_command(&self.control_buf[..amt]) {
                        Some(command) => error!("ignoring {:?} on control port", command),
                        None => error!("unexpected packet on control port: {}", e),
                    }
                    return;
                }
            };
        debug!("<-- control invitation {}", invite);

        self.initiator_token = invite.initiator_token;
        self.initiator_ssrc = invite.ssrc;
        self.initiator_addr = Some(src.ip());
        self.initiator_control_port = src.port();
        self.local_ssrc = self.mint_ssrc();

        if !self.send_invitation_accepted(true) {
            error!("couldn't accept control invitation");
            return;
        }

        self.sync
            .start_session(self.initiator_ssrc, self.local_ssrc, now);
        self.state = State::MIDIInvitation;
    }

    // Control invitation accepted; the same peer now has 60 seconds to
    // invite us on the data port.
    fn midi_invitation_state(&mut self, rcv: Option<(usize, SocketAddr)>, now: u64) {
        if let Some((amt, src)) = rcv {
            let invite =
                match InvitationPacket::parse(&self.midi_buf[..amt], ControlCommand::Invitation) {
                    Ok(packet) => packet,
                    Err(e) => {
                        error!("unexpected packet on data port: {}", e);
                        return;
                    }
                };

            if Some(src.ip()) != self.initiator_addr {
                error!("data invitation from {} is not the session peer", src.ip());
                return;
            }
            debug!("<-- data invitation {}", invite);

            self.initiator_midi_port = src.port();
            if self.send_invitation_accepted(false) {
                info!(
                    "connection to {} ({}) established",
                    invite.name,
                    src.ip()
                );
                self.sync.touch(now);
                self.state = State::Connected;
            } else {
                error!("couldn't accept data invitation");
                self.reset();
            }
        } else if self.sync.timed_out(now) {
            error!("data port invitation timed out");
            self.reset();
        }
    }

    // Session up: watch for end session on control, midi and sync on data,
    // and keep the feedback and liveness clocks honest.
    fn connected_state(
        &mut self,
        control_rcv: Option<(usize, SocketAddr)>,
        midi_rcv: Option<(usize, SocketAddr)>,
        now: u64,
    ) {
        if let Some((amt, _src)) = control_rcv {
            if let Ok(bye) = EndSessionPacket::parse(&self.control_buf[..amt]) {
                debug!("<-- end session");
                if bye.ssrc == self.initiator_ssrc {
                    info!("initiator ended session");
                    self.reset();
                    return;
                }
            }
            // other control traffic while connected is of no interest
        }

        if let Some((amt, _src)) = midi_rcv {
            match rtp_packet::parse_rtp_midi(&self.midi_buf[..amt]) {
                Ok((header, payload)) => {
                    self.sync.note_sequence(header.sequence);
                    if let Err(e) = self.sink.deliver(payload) {
                        error!("midi sink error: {}", e);
                    }
                }
                Err(_) => match SyncPacket::parse(&self.midi_buf[..amt]) {
                    Ok(ck) => {
                        debug!("<-- sync {}", ck.count);
                        if let Some(reply) = self.sync.handle_sync(&ck, now) {
                            self.send_sync_reply(&reply);
                        }
                    }
                    Err(e) => {
                        error!("unexpected packet on data port: {}", e);
                    }
                },
            }
        }

        if let Some(feedback) = self.sync.feedback_due(now) {
            debug!("--> feedback {:08x}", feedback.sequence);
            let mut buf = [0u8; FEEDBACK_PACKET_SIZE];
            match feedback.encode(&mut buf) {
                Ok(amt) => {
                    if let Some(dest) = self.control_dest() {
                        self.control_sock.send(&buf[..amt], dest);
                    }
                }
                Err(e) => error!("couldn't encode feedback: {}", e),
            }
        }

        if self.sync.timed_out(now) {
            error!("initiator timed out");
            self.reset();
        }
    }

    // Accept packet goes out on whichever endpoint the invitation came in on.
    fn send_invitation_accepted(&mut self, control: bool) -> bool {
        let accept = InvitationPacket {
            initiator_token: self.initiator_token,
            ssrc: self.local_ssrc,
            name: self.name.clone(),
        };
        let mut buf = [0u8; INVITATION_HEADER_SIZE + MAX_NAME_SIZE];
        let amt = match accept.encode(ControlCommand::InvitationAccepted, &mut buf) {
            Ok(amt) => amt,
            Err(e) => {
                error!("couldn't encode invitation accept: {}", e);
                return false;
            }
        };
        debug!("--> accept invitation");
        let (sock, dest) = if control {
            (&self.control_sock, self.control_dest())
        } else {
            (&self.midi_sock, self.midi_dest())
        };
        match dest {
            Some(dest) => sock.send(&buf[..amt], dest),
            None => false,
        }
    }

    // Sync replies are data port traffic and leave through the data socket.
    fn send_sync_reply(&mut self, reply: &SyncPacket) {
        let mut buf = [0u8; SYNC_PACKET_SIZE];
        match reply.encode(&mut buf) {
            Ok(amt) => {
                debug!("--> sync 1");
                if let Some(dest) = self.midi_dest() {
                    self.midi_sock.send(&buf[..amt], dest);
                }
            }
            Err(e) => error!("couldn't encode sync reply: {}", e),
        }
    }

    fn control_dest(&self) -> Option<SocketAddr> {
        self.initiator_addr
            .map(|ip| SocketAddr::new(ip, self.initiator_control_port))
    }

    fn midi_dest(&self) -> Option<SocketAddr> {
        self.initiator_addr
            .map(|ip| SocketAddr::new(ip, self.initiator_midi_port))
    }

    fn mint_ssrc(&mut self) -> u32 {
        // reroll the rare zero so an active session always has a nonzero ssrc
        loop {
            let ssrc = self.entropy.next_u32();
            if ssrc != 0 {
                return ssrc;
            }
        }
    }

    /// Back to square one.  Every per session field is zeroed before we
    /// listen for the next invitation.
    fn reset(&mut self) {
        self.state = State::ControlInvitation;
        self.initiator_addr = None;
        self.initiator_control_port = 0;
        self.initiator_midi_port = 0;
        self.initiator_token = 0;
        self.initiator_ssrc = 0;
        self.local_ssrc = 0;
        self.sync.reset();
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn offset_estimate(&self) -> u64 {
        self.sync.offset_estimate()
    }

    pub fn control_port(&self) -> u16 {
        self.control_sock.port()
    }

    /// JSON snapshot of the session for a status page or u/x.
    pub fn get_status(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state.name(),
            "peer": self.initiator_addr.map(|ip| ip.to_string()),
            "initiator_ssrc": self.initiator_ssrc,
            "local_ssrc": self.local_ssrc,
            "sync": self.sync.stats(),
        })
    }
}
