//! rtpmidi - AppleMIDI session participant library
//!
//! provides the pieces needed to accept a Network MIDI (RTP-MIDI) session
//! from a remote initiator: the wire codec for the session control and data
//! packets, the invitation/sync/feedback state machine, and a poll loop that
//! drives it all over a pair of UDP ports.  Received MIDI bytes are handed
//! to a caller supplied sink.
pub mod common;
pub mod session;
