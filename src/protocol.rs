//! Wire protocol constants shared with the host peer.
//!
//! All scalars on the wire are big-endian, independent of host byte order.
//! Every request is an opcode word followed by an opcode-specific payload;
//! every response is a status word (0 = success) followed by a payload.

/// Fixed render block length, in frames.
pub const BLOCK_FRAMES: usize = 4096;

/// Number of instance slots kept alive while rendering.
pub const NUM_SLOTS: usize = 3;

/// Command opcodes. The wire values are stable; renumbering breaks the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Exit = 0,
    GetChunk = 1,
    SetChunk = 2,
    HasEditor = 3,
    DisplayEditorModal = 4,
    SetSampleRate = 5,
    Reset = 6,
    SendMidiEvent = 7,
    SendSysexEvent = 8,
    RenderSamples = 9,
    SendMidiEventWithTimestamp = 10,
    SendSysexEventWithTimestamp = 11,
}

impl Opcode {
    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Opcode::Exit,
            1 => Opcode::GetChunk,
            2 => Opcode::SetChunk,
            3 => Opcode::HasEditor,
            4 => Opcode::DisplayEditorModal,
            5 => Opcode::SetSampleRate,
            6 => Opcode::Reset,
            7 => Opcode::SendMidiEvent,
            8 => Opcode::SendSysexEvent,
            9 => Opcode::RenderSamples,
            10 => Opcode::SendMidiEventWithTimestamp,
            11 => Opcode::SendSysexEventWithTimestamp,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_wire_values_stable() {
        assert_eq!(Opcode::from_wire(0), Some(Opcode::Exit));
        assert_eq!(Opcode::from_wire(1), Some(Opcode::GetChunk));
        assert_eq!(Opcode::from_wire(2), Some(Opcode::SetChunk));
        assert_eq!(Opcode::from_wire(3), Some(Opcode::HasEditor));
        assert_eq!(Opcode::from_wire(4), Some(Opcode::DisplayEditorModal));
        assert_eq!(Opcode::from_wire(5), Some(Opcode::SetSampleRate));
        assert_eq!(Opcode::from_wire(6), Some(Opcode::Reset));
        assert_eq!(Opcode::from_wire(7), Some(Opcode::SendMidiEvent));
        assert_eq!(Opcode::from_wire(8), Some(Opcode::SendSysexEvent));
        assert_eq!(Opcode::from_wire(9), Some(Opcode::RenderSamples));
        assert_eq!(Opcode::from_wire(10), Some(Opcode::SendMidiEventWithTimestamp));
        assert_eq!(Opcode::from_wire(11), Some(Opcode::SendSysexEventWithTimestamp));
    }

    #[test]
    fn test_opcode_unknown_is_none() {
        assert_eq!(Opcode::from_wire(12), None);
        assert_eq!(Opcode::from_wire(0xFFFF_FFFF), None);
    }
}
