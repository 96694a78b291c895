//! Pending MIDI/sysex events awaiting the next render cycle.
//!
//! Events arrive between render requests and are routed to their destination
//! slot in one batch per port when rendering starts. Relative order within a
//! port is preserved. The queue is cleared after every render cycle whether
//! or not the drained events reached a live instance.

use crate::protocol::NUM_SLOTS;
use smallvec::SmallVec;

const LAST_PORT: u8 = (NUM_SLOTS - 1) as u8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Channel-voice message, raw status + two data bytes.
    Midi { data: [u8; 3] },
    /// System-exclusive dump, payload owned by the event.
    Sysex { dump: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEvent {
    pub port: u8,
    pub frame_offset: u32,
    pub payload: EventPayload,
}

/// References into the queue for one destination port, in append order.
pub type EventRefs<'a> = SmallVec<[&'a PluginEvent; 16]>;

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<PluginEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a channel-voice message from its wire word. The low 7 bits of
    /// the top byte select the port (clamped to the last slot); the three
    /// low-order bytes are the message in ascending byte significance.
    pub fn push_midi(&mut self, word: u32, frame_offset: u32) {
        let port = (((word & 0x7F00_0000) >> 24) as u8).min(LAST_PORT);
        let data = [word as u8, (word >> 8) as u8, (word >> 16) as u8];
        self.events.push(PluginEvent {
            port,
            frame_offset,
            payload: EventPayload::Midi { data },
        });
    }

    /// Appends a sysex dump. Out-of-range ports are pinned to the last slot.
    pub fn push_sysex(&mut self, port: u32, dump: Vec<u8>) {
        let port = (port.min(LAST_PORT as u32)) as u8;
        self.events.push(PluginEvent {
            port,
            frame_offset: 0,
            payload: EventPayload::Sysex { dump },
        });
    }

    /// Appends a timestamped sysex dump. Out-of-range ports fall back to
    /// port 0 here, unlike the untimestamped path which pins them to the
    /// last slot; the peer has always depended on both behaviors, so the
    /// asymmetry stays.
    pub fn push_sysex_at(&mut self, port: u32, frame_offset: u32, dump: Vec<u8>) {
        let port = if port > LAST_PORT as u32 { 0 } else { port as u8 };
        self.events.push(PluginEvent {
            port,
            frame_offset,
            payload: EventPayload::Sysex { dump },
        });
    }

    /// Splits the queue into one append-ordered reference list per port.
    pub fn partition(&self) -> [EventRefs<'_>; NUM_SLOTS] {
        let mut parts: [EventRefs<'_>; NUM_SLOTS] = Default::default();
        for event in &self.events {
            parts[event.port as usize].push(event);
        }
        parts
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midi_word(port: u32, status: u8, data1: u8, data2: u8) -> u32 {
        (port << 24) | ((data2 as u32) << 16) | ((data1 as u32) << 8) | status as u32
    }

    #[test]
    fn test_midi_word_decoding() {
        let mut q = EventQueue::new();
        q.push_midi(midi_word(1, 0x90, 60, 100), 0);

        let parts = q.partition();
        assert_eq!(parts[1].len(), 1);
        match &parts[1][0].payload {
            EventPayload::Midi { data } => assert_eq!(*data, [0x90, 60, 100]),
            other => panic!("expected MIDI payload, got {:?}", other),
        }
    }

    #[test]
    fn test_midi_port_clamps_to_last_slot() {
        let mut q = EventQueue::new();
        q.push_midi(midi_word(5, 0x90, 60, 100), 0);
        q.push_midi(midi_word(0x7F, 0x80, 60, 0), 0);

        let parts = q.partition();
        assert!(parts[0].is_empty());
        assert!(parts[1].is_empty());
        assert_eq!(parts[2].len(), 2);
    }

    #[test]
    fn test_sysex_port_clamps_to_last_slot() {
        let mut q = EventQueue::new();
        q.push_sysex(9, vec![0xF0, 0x7E, 0xF7]);

        let parts = q.partition();
        assert_eq!(parts[2].len(), 1);
    }

    #[test]
    fn test_timestamped_sysex_clamps_to_port_zero() {
        let mut q = EventQueue::new();
        q.push_sysex_at(9, 128, vec![0xF0, 0xF7]);

        let parts = q.partition();
        assert_eq!(parts[0].len(), 1);
        assert!(parts[2].is_empty());
        assert_eq!(parts[0][0].frame_offset, 128);
    }

    #[test]
    fn test_in_range_ports_unchanged() {
        let mut q = EventQueue::new();
        q.push_sysex_at(2, 0, vec![0xF0, 0xF7]);
        q.push_sysex(0, vec![0xF0, 0xF7]);

        let parts = q.partition();
        assert_eq!(parts[0].len(), 1);
        assert_eq!(parts[2].len(), 1);
    }

    #[test]
    fn test_partition_preserves_relative_order() {
        let mut q = EventQueue::new();
        q.push_midi(midi_word(1, 0x90, 60, 100), 0);
        q.push_midi(midi_word(0, 0x90, 61, 100), 0);
        q.push_midi(midi_word(1, 0x90, 62, 100), 5);
        q.push_midi(midi_word(1, 0x80, 60, 0), 9);

        let parts = q.partition();
        let notes: Vec<u8> = parts[1]
            .iter()
            .map(|e| match &e.payload {
                EventPayload::Midi { data } => data[1],
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(notes, vec![60, 62, 60]);
        assert_eq!(parts[1][1].frame_offset, 5);
        assert_eq!(parts[0].len(), 1);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut q = EventQueue::new();
        q.push_sysex(0, vec![0u8; 1024]);
        q.push_midi(0x90, 0);
        assert_eq!(q.len(), 2);

        q.clear();
        assert!(q.is_empty());
        assert!(q.partition().iter().all(|p| p.is_empty()));
    }
}
