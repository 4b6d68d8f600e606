//! RTP-MIDI data packets
//!
//! The data port carries MIDI inside RTP: a 12 byte RTP header, then a
//! variable length command header giving the size of the MIDI list, then
//! the MIDI bytes and an optional journal.  The journal is for initiators
//! recovering lost packets and is ignored here.
use byteorder::{ByteOrder, NetworkEndian};
use simple_error::bail;

use super::box_error::BoxError;

/// Fixed RTP header size.
pub const RTP_HEADER_SIZE: usize = 12;
/// RTP version in the top two flag bits.
pub const RTP_VERSION: u8 = 2;
/// The RTP payload type assigned to MIDI.
pub const RTP_MIDI_PAYLOAD_TYPE: u8 = 0x61;

/// The RTP header fields the session cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Decode an RTP-MIDI packet.  Returns the header and the MIDI bytes with
/// any SysEx segmentation escapes already stripped.
pub fn parse_rtp_midi(buf: &[u8]) -> Result<(RtpHeader, &[u8]), BoxError> {
    if buf.len() < RTP_HEADER_SIZE + 1 {
        bail!("rtp packet too short ({} bytes)", buf.len());
    }

    let flags = NetworkEndian::read_u16(&buf[0..2]);
    if ((flags >> 14) & 0x03) as u8 != RTP_VERSION {
        bail!("bad rtp version");
    }
    // no CSRC identifiers expected from an AppleMIDI initiator
    if (flags >> 8) & 0x0F != 0 {
        bail!("unexpected csrc count");
    }
    if (flags & 0xFF) as u8 != RTP_MIDI_PAYLOAD_TYPE {
        bail!("not an rtp midi payload");
    }

    let header = RtpHeader {
        sequence: NetworkEndian::read_u16(&buf[2..4]),
        timestamp: NetworkEndian::read_u32(&buf[4..8]),
        ssrc: NetworkEndian::read_u32(&buf[8..12]),
    };

    // Variable length command header.  Low nibble is the MIDI list length;
    // with the B flag set the length grows to 12 bits using the next byte.
    let command = buf[12];
    let mut offset = RTP_HEADER_SIZE + 1;
    let mut length = (command & 0x0F) as usize;
    if command & 0x80 != 0 {
        if buf.len() < offset + 1 {
            bail!("rtp midi long header truncated");
        }
        length = length << 8 | buf[offset] as usize;
        offset += 1;
    }

    if buf.len() < offset + length {
        bail!("rtp midi list truncated");
    }

    // bytes past the MIDI list are the journal, which we ignore
    let payload = strip_sysex_escapes(&buf[offset..offset + length])?;
    Ok((header, payload))
}

/// Strip the segmentation escape bytes from the edges of a SysEx segment.
///
/// Segmented SysEx marks its boundaries with 0xF0/0xF7 escapes; the real
/// message bytes sit between them.  Reassembly across segments is the
/// sink's job, this only removes the framing of the one segment in hand.
pub fn strip_sysex_escapes(payload: &[u8]) -> Result<&[u8], BoxError> {
    if payload.is_empty() {
        return Ok(payload);
    }
    let head = payload[0];
    let tail = payload[payload.len() - 1];
    if payload.len() < 2 {
        // one lone escape byte is not a usable segment
        if head == 0xF0 || head == 0xF7 {
            bail!("sysex segment too short");
        }
        return Ok(payload);
    }

    let stripped = match (head, tail) {
        // first segment: keep the leading F0, drop the trailing continuation mark
        (0xF0, 0xF0) => &payload[..payload.len() - 1],
        // middle segment: escapes on both ends
        (0xF7, 0xF0) => &payload[1..payload.len() - 1],
        // last segment: drop the leading continuation mark
        (0xF7, 0xF7) => &payload[1..],
        // cancelled segment collapses to a single F4
        (0xF7, 0xF4) => &payload[payload.len() - 1..],
        // anything else is a plain MIDI list, pass it through
        _ => payload,
    };
    Ok(stripped)
}
