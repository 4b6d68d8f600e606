//! wire format for the AppleMIDI session control packets
//!
//! This is the stuff that goes over the control and data ports to manage a
//! session: invitations, end session, clock sync and receiver feedback.
//! Everything on the wire is big endian and every field is read or written
//! explicitly from the byte slice.  No casting buffers into structs.
use byteorder::{ByteOrder, NetworkEndian};
use simple_error::bail;
use std::fmt;

use super::box_error::BoxError;

/// Every session control packet leads with this signature.
pub const APPLEMIDI_SIGNATURE: u16 = 0xFFFF;
/// Protocol version carried by invitation and end session packets.
pub const APPLEMIDI_VERSION: u32 = 2;

/// Fixed part of an invitation or end session packet (everything before the name).
pub const INVITATION_HEADER_SIZE: usize = 16;
/// Sync packets are exactly this long.
pub const SYNC_PACKET_SIZE: usize = 36;
/// Receiver feedback packets are exactly this long.
pub const FEEDBACK_PACKET_SIZE: usize = 12;
/// Longest name carried in an invitation, including the terminating NUL.
pub const MAX_NAME_SIZE: usize = 256;

/// What an invitation with no readable name decodes as.
const UNKNOWN_NAME: &str = "<unknown>";

const fn command_word(cmd: &[u8; 2]) -> u16 {
    (cmd[0] as u16) << 8 | cmd[1] as u16
}

/// The two letter command codes of the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Invitation,         // IN
    InvitationAccepted, // OK
    InvitationRejected, // NO
    EndSession,         // BY
    Sync,               // CK
    ReceiverFeedback,   // RS
}

impl ControlCommand {
    pub fn as_u16(&self) -> u16 {
        match self {
            ControlCommand::Invitation => command_word(b"IN"),
            ControlCommand::InvitationAccepted => command_word(b"OK"),
            ControlCommand::InvitationRejected => command_word(b"NO"),
            ControlCommand::EndSession => command_word(b"BY"),
            ControlCommand::Sync => command_word(b"CK"),
            ControlCommand::ReceiverFeedback => command_word(b"RS"),
        }
    }
    pub fn from_u16(word: u16) -> Option<ControlCommand> {
        match word {
            w if w == command_word(b"IN") => Some(ControlCommand::Invitation),
            w if w == command_word(b"OK") => Some(ControlCommand::InvitationAccepted),
            w if w == command_word(b"NO") => Some(ControlCommand::InvitationRejected),
            w if w == command_word(b"BY") => Some(ControlCommand::EndSession),
            w if w == command_word(b"CK") => Some(ControlCommand::Sync),
            w if w == command_word(b"RS") => Some(ControlCommand::ReceiverFeedback),
            _ => None,
        }
    }
}

/// Classify a packet by its signature and command word without decoding the body.
pub fn peek_command(buf: &[u8]) -> Option<ControlCommand> {
    if buf.len() < 4 {
        return None;
    }
    if NetworkEndian::read_u16(&buf[0..2]) != APPLEMIDI_SIGNATURE {
        return None;
    }
    ControlCommand::from_u16(NetworkEndian::read_u16(&buf[2..4]))
}

/// An invitation (IN), acceptance (OK) or rejection (NO) packet.
///
/// The three share one layout: a 16 byte header followed by a NUL terminated
/// UTF-8 name.  The name is optional on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct InvitationPacket {
    pub initiator_token: u32,
    pub ssrc: u32,
    pub name: String,
}

impl InvitationPacket {
    /// Decode from the wire.  `expected` says which of IN/OK/NO the caller wants;
    /// anything else is an error.
    pub fn parse(buf: &[u8], expected: ControlCommand) -> Result<InvitationPacket, BoxError> {
        if buf.len() < INVITATION_HEADER_SIZE {
            bail!("invitation too short ({} bytes)", buf.len());
        }
        if NetworkEndian::read_u16(&buf[0..2]) != APPLEMIDI_SIGNATURE {
            bail!("bad signature");
        }
        let command = NetworkEndian::read_u16(&buf[2..4]);
        if command != expected.as_u16() {
            bail!("not an invitation command: {:04x}", command);
        }
        let version = NetworkEndian::read_u32(&buf[4..8]);
        if version != APPLEMIDI_VERSION {
            bail!("unsupported protocol version {}", version);
        }
        Ok(InvitationPacket {
            initiator_token: NetworkEndian::read_u32(&buf[8..12]),
            ssrc: NetworkEndian::read_u32(&buf[12..16]),
            name: decode_name(&buf[INVITATION_HEADER_SIZE..]),
        })
    }

    /// Encode into `out`, returning the number of bytes used.  Only the
    /// populated prefix of the name goes on the wire: 16 byte header plus
    /// the name and its NUL.
    pub fn encode(&self, command: ControlCommand, out: &mut [u8]) -> Result<usize, BoxError> {
        let name = self.name.as_bytes();
        if name.len() >= MAX_NAME_SIZE {
            bail!("session name too long ({} bytes)", name.len());
        }
        let total = INVITATION_HEADER_SIZE + name.len() + 1;
        if out.len() < total {
            bail!("encode buffer too small");
        }
        NetworkEndian::write_u16(&mut out[0..2], APPLEMIDI_SIGNATURE);
        NetworkEndian::write_u16(&mut out[2..4], command.as_u16());
        NetworkEndian::write_u32(&mut out[4..8], APPLEMIDI_VERSION);
        NetworkEndian::write_u32(&mut out[8..12], self.initiator_token);
        NetworkEndian::write_u32(&mut out[12..16], self.ssrc);
        out[INVITATION_HEADER_SIZE..INVITATION_HEADER_SIZE + name.len()].copy_from_slice(name);
        out[total - 1] = 0;
        Ok(total)
    }
}

impl fmt::Display for InvitationPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ token: {:08x}, ssrc: {:08x}, name: {} }}",
            self.initiator_token, self.ssrc, self.name
        )
    }
}

// Name field rules: bounded to 256 bytes, ends at the first NUL.  A missing
// or unterminated name decodes as "<unknown>".
fn decode_name(buf: &[u8]) -> String {
    let bounded = &buf[..buf.len().min(MAX_NAME_SIZE)];
    match bounded.iter().position(|&b| b == 0) {
        Some(nul) => String::from_utf8_lossy(&bounded[..nul]).into_owned(),
        None => String::from(UNKNOWN_NAME),
    }
}

/// An end session (BY) packet.  Same header as an invitation, no name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndSessionPacket {
    pub initiator_token: u32,
    pub ssrc: u32,
}

impl EndSessionPacket {
    pub fn parse(buf: &[u8]) -> Result<EndSessionPacket, BoxError> {
        if buf.len() < INVITATION_HEADER_SIZE {
            bail!("end session too short ({} bytes)", buf.len());
        }
        if NetworkEndian::read_u16(&buf[0..2]) != APPLEMIDI_SIGNATURE {
            bail!("bad signature");
        }
        if NetworkEndian::read_u16(&buf[2..4]) != ControlCommand::EndSession.as_u16() {
            bail!("not an end session command");
        }
        if NetworkEndian::read_u32(&buf[4..8]) != APPLEMIDI_VERSION {
            bail!("unsupported protocol version");
        }
        Ok(EndSessionPacket {
            initiator_token: NetworkEndian::read_u32(&buf[8..12]),
            ssrc: NetworkEndian::read_u32(&buf[12..16]),
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, BoxError> {
        if out.len() < INVITATION_HEADER_SIZE {
            bail!("encode buffer too small");
        }
        NetworkEndian::write_u16(&mut out[0..2], APPLEMIDI_SIGNATURE);
        NetworkEndian::write_u16(&mut out[2..4], ControlCommand::EndSession.as_u16());
        NetworkEndian::write_u32(&mut out[4..8], APPLEMIDI_VERSION);
        NetworkEndian::write_u32(&mut out[8..12], self.initiator_token);
        NetworkEndian::write_u32(&mut out[12..16], self.ssrc);
        Ok(INVITATION_HEADER_SIZE)
    }
}

/// A clock sync (CK) packet.  Fixed 36 bytes, three 64 bit timestamps.
///
/// `count` says which step of the three way handshake this is; it selects
/// which of the timestamps are meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPacket {
    pub sender_ssrc: u32,
    pub count: u8,
    pub timestamps: [u64; 3],
}

impl SyncPacket {
    pub fn parse(buf: &[u8]) -> Result<SyncPacket, BoxError> {
        if buf.len() != SYNC_PACKET_SIZE {
            bail!("sync packet wrong length ({} bytes)", buf.len());
        }
        if NetworkEndian::read_u16(&buf[0..2]) != APPLEMIDI_SIGNATURE {
            bail!("bad signature");
        }
        if NetworkEndian::read_u16(&buf[2..4]) != ControlCommand::Sync.as_u16() {
            bail!("not a sync command");
        }
        Ok(SyncPacket {
            sender_ssrc: NetworkEndian::read_u32(&buf[4..8]),
            count: buf[8],
            timestamps: [
                NetworkEndian::read_u64(&buf[12..20]),
                NetworkEndian::read_u64(&buf[20..28]),
                NetworkEndian::read_u64(&buf[28..36]),
            ],
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, BoxError> {
        if out.len() < SYNC_PACKET_SIZE {
            bail!("encode buffer too small");
        }
        NetworkEndian::write_u16(&mut out[0..2], APPLEMIDI_SIGNATURE);
        NetworkEndian::write_u16(&mut out[2..4], ControlCommand::Sync.as_u16());
        NetworkEndian::write_u32(&mut out[4..8], self.sender_ssrc);
        out[8] = self.count;
        out[9..12].fill(0);
        NetworkEndian::write_u64(&mut out[12..20], self.timestamps[0]);
        NetworkEndian::write_u64(&mut out[20..28], self.timestamps[1]);
        NetworkEndian::write_u64(&mut out[28..36], self.timestamps[2]);
        Ok(SYNC_PACKET_SIZE)
    }
}

/// A receiver feedback (RS) packet.  Acknowledges the highest RTP sequence
/// seen so the initiator can flush its retransmission journal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackPacket {
    pub ssrc: u32,
    pub sequence: u32,
}

impl FeedbackPacket {
    /// Build a feedback packet from a 16 bit RTP sequence.  The sequence
    /// rides in the high 16 bits of the field, low bits zero.
    pub fn from_sequence(ssrc: u32, sequence: u16) -> FeedbackPacket {
        FeedbackPacket {
            ssrc,
            sequence: (sequence as u32) << 16,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<FeedbackPacket, BoxError> {
        if buf.len() != FEEDBACK_PACKET_SIZE {
            bail!("feedback packet wrong length ({} bytes)", buf.len());
        }
        if NetworkEndian::read_u16(&buf[0..2]) != APPLEMIDI_SIGNATURE {
            bail!("bad signature");
        }
        if NetworkEndian::read_u16(&buf[2..4]) != ControlCommand::ReceiverFeedback.as_u16() {
            bail!("not a feedback command");
        }
        Ok(FeedbackPacket {
            ssrc: NetworkEndian::read_u32(&buf[4..8]),
            sequence: NetworkEndian::read_u32(&buf[8..12]),
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, BoxError> {
        if out.len() < FEEDBACK_PACKET_SIZE {
            bail!("encode buffer too small");
        }
        NetworkEndian::write_u16(&mut out[0..2], APPLEMIDI_SIGNATURE);
        NetworkEndian::write_u16(&mut out[2..4], ControlCommand::ReceiverFeedback.as_u16());
        NetworkEndian::write_u32(&mut out[4..8], self.ssrc);
        NetworkEndian::write_u32(&mut out[8..12], self.sequence);
        Ok(FEEDBACK_PACKET_SIZE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_words() {
        assert_eq!(ControlCommand::Invitation.as_u16(), 0x494E);
        assert_eq!(ControlCommand::InvitationAccepted.as_u16(), 0x4F4B);
        assert_eq!(ControlCommand::InvitationRejected.as_u16(), 0x4E4F);
        assert_eq!(ControlCommand::EndSession.as_u16(), 0x4259);
        assert_eq!(ControlCommand::Sync.as_u16(), 0x434B);
        assert_eq!(ControlCommand::ReceiverFeedback.as_u16(), 0x5253);
    }

    #[test]
    fn invitation_round_trip() {
        let packet = InvitationPacket {
            initiator_token: 0xDEADBEEF,
            ssrc: 0xCAFEBABE,
            name: String::from("host"),
        };
        let mut buf = [0u8; 64];
        let amt = packet
            .encode(ControlCommand::Invitation, &mut buf)
            .unwrap();
        assert_eq!(amt, INVITATION_HEADER_SIZE + 5);
        let parsed = InvitationPacket::parse(&buf[..amt], ControlCommand::Invitation).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn invitation_wire_layout() {
        // byte for byte check against the layout from the protocol
        let packet = InvitationPacket {
            initiator_token: 0xDEADBEEF,
            ssrc: 0xCAFEBABE,
            name: String::from("host"),
        };
        let mut buf = [0u8; 64];
        let amt = packet
            .encode(ControlCommand::Invitation, &mut buf)
            .unwrap();
        let expected: &[u8] = &[
            0xFF, 0xFF, 0x49, 0x4E, // signature, "IN"
            0x00, 0x00, 0x00, 0x02, // version
            0xDE, 0xAD, 0xBE, 0xEF, // token
            0xCA, 0xFE, 0xBA, 0xBE, // ssrc
            b'h', b'o', b's', b't', 0x00,
        ];
        assert_eq!(&buf[..amt], expected);
    }

    #[test]
    fn invitation_rejects_garbage() {
        let mut buf = [0u8; 32];
        let packet = InvitationPacket {
            initiator_token: 1,
            ssrc: 2,
            name: String::from("x"),
        };
        let amt = packet
            .encode(ControlCommand::Invitation, &mut buf)
            .unwrap();

        // short frame
        assert!(InvitationPacket::parse(&buf[..15], ControlCommand::Invitation).is_err());
        // wrong signature
        let mut bad = buf;
        bad[0] = 0x12;
        assert!(InvitationPacket::parse(&bad[..amt], ControlCommand::Invitation).is_err());
        // wrong version
        let mut bad = buf;
        bad[7] = 9;
        assert!(InvitationPacket::parse(&bad[..amt], ControlCommand::Invitation).is_err());
        // wrong command for what the caller expects
        assert!(InvitationPacket::parse(&buf[..amt], ControlCommand::InvitationAccepted).is_err());
    }

    #[test]
    fn invitation_name_missing() {
        let packet = InvitationPacket {
            initiator_token: 7,
            ssrc: 8,
            name: String::new(),
        };
        let mut buf = [0u8; 32];
        let amt = packet
            .encode(ControlCommand::Invitation, &mut buf)
            .unwrap();
        // chop the name off entirely; decoder substitutes a placeholder
        let parsed =
            InvitationPacket::parse(&buf[..INVITATION_HEADER_SIZE], ControlCommand::Invitation)
                .unwrap();
        assert_eq!(parsed.name, "<unknown>");
        // with the NUL present an empty name stays empty
        let parsed = InvitationPacket::parse(&buf[..amt], ControlCommand::Invitation).unwrap();
        assert_eq!(parsed.name, "");
    }

    #[test]
    fn invitation_name_unterminated() {
        let mut buf = [0u8; 32];
        let packet = InvitationPacket {
            initiator_token: 7,
            ssrc: 8,
            name: String::from("longname"),
        };
        let amt = packet
            .encode(ControlCommand::Invitation, &mut buf)
            .unwrap();
        // drop the NUL terminator
        let parsed = InvitationPacket::parse(&buf[..amt - 1], ControlCommand::Invitation).unwrap();
        assert_eq!(parsed.name, "<unknown>");
    }

    #[test]
    fn invitation_name_too_long_to_encode() {
        let packet = InvitationPacket {
            initiator_token: 7,
            ssrc: 8,
            name: "x".repeat(MAX_NAME_SIZE),
        };
        let mut buf = [0u8; 512];
        assert!(packet.encode(ControlCommand::Invitation, &mut buf).is_err());
    }

    #[test]
    fn peek_commands() {
        let packet = EndSessionPacket {
            initiator_token: 1,
            ssrc: 2,
        };
        let mut buf = [0u8; 16];
        let amt = packet.encode(&mut buf).unwrap();
        assert_eq!(peek_command(&buf[..amt]), Some(ControlCommand::EndSession));

        // a rejection must at least be recognizable
        NetworkEndian::write_u16(&mut buf[2..4], 0x4E4F);
        assert_eq!(
            peek_command(&buf[..amt]),
            Some(ControlCommand::InvitationRejected)
        );

        assert_eq!(peek_command(&[0xFF, 0xFF]), None);
        assert_eq!(peek_command(&[0x00, 0x01, 0x49, 0x4E]), None);
    }

    #[test]
    fn end_session_round_trip() {
        let packet = EndSessionPacket {
            initiator_token: 0x01020304,
            ssrc: 0x0A0B0C0D,
        };
        let mut buf = [0u8; 16];
        let amt = packet.encode(&mut buf).unwrap();
        assert_eq!(amt, INVITATION_HEADER_SIZE);
        assert_eq!(EndSessionPacket::parse(&buf[..amt]).unwrap(), packet);
    }

    #[test]
    fn sync_round_trip() {
        let packet = SyncPacket {
            sender_ssrc: 0xCAFEBABE,
            count: 1,
            timestamps: [1000, 2000, 0],
        };
        let mut buf = [0u8; SYNC_PACKET_SIZE];
        let amt = packet.encode(&mut buf).unwrap();
        assert_eq!(amt, SYNC_PACKET_SIZE);
        assert_eq!(SyncPacket::parse(&buf).unwrap(), packet);
    }

    #[test]
    fn sync_rejects_wrong_length() {
        let packet = SyncPacket {
            sender_ssrc: 1,
            count: 0,
            timestamps: [0; 3],
        };
        let mut buf = [0u8; SYNC_PACKET_SIZE + 4];
        packet.encode(&mut buf).unwrap();
        assert!(SyncPacket::parse(&buf[..SYNC_PACKET_SIZE - 1]).is_err());
        assert!(SyncPacket::parse(&buf).is_err());
        assert!(SyncPacket::parse(&buf[..SYNC_PACKET_SIZE]).is_ok());
    }

    #[test]
    fn feedback_round_trip() {
        let packet = FeedbackPacket::from_sequence(0x11223344, 0x1234);
        assert_eq!(packet.sequence, 0x12340000);
        let mut buf = [0u8; FEEDBACK_PACKET_SIZE];
        let amt = packet.encode(&mut buf).unwrap();
        assert_eq!(amt, FEEDBACK_PACKET_SIZE);
        assert_eq!(FeedbackPacket::parse(&buf).unwrap(), packet);
    }
}
