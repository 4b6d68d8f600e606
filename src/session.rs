//! components used to make the AppleMIDI session participant
use rand::Rng;

use crate::common::box_error::BoxError;

/// Downstream consumer of the decoded MIDI byte stream.
///
/// Called on the participant's task for every received packet; the bytes are
/// the MIDI list with SysEx segmentation escapes already stripped.
/// Implementations must not block.
pub trait MidiSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<(), BoxError>;
}

/// Source of the random values used to mint the local SSRC.
///
/// Quality only needs to avoid trivial collisions across restarts.
pub trait EntropySource {
    fn next_u32(&mut self) -> u32;
}

/// Default entropy source backed by the thread local generator.
pub struct ThreadRngEntropy;

impl EntropySource for ThreadRngEntropy {
    fn next_u32(&mut self) -> u32 {
        rand::thread_rng().gen::<u32>()
    }
}

pub mod participant;
pub mod session_socket;
pub mod sync;
