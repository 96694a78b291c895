//! Persistent-state codec.
//!
//! Layout (all scalars big-endian):
//!
//! ```text
//! identityTag(4) . isOpaque(1) . paramCount(4) . paramCount x f32   (parameter form)
//! identityTag(4) . isOpaque(1) . byteLen(4) . byteLen bytes         (opaque form)
//! ```
//!
//! Applying a buffer is best-effort by design: an identity or opacity
//! mismatch, a parameter-count mismatch, or a truncated buffer leaves the
//! target untouched and reports nothing. The peer treats state transfer as
//! advisory and the wire format cannot change to say otherwise.

use crate::instance::AudioPlugin;
use tracing::trace;

/// Serializes the instance's persistent state.
pub fn get_state(plugin: &mut impl AudioPlugin) -> Vec<u8> {
    let info = plugin.info().clone();

    let mut out = Vec::new();
    out.extend_from_slice(&info.unique_id.to_be_bytes());
    out.push(info.uses_chunks as u8);

    if info.uses_chunks {
        let chunk = plugin.get_chunk();
        out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        out.extend_from_slice(&chunk);
    } else {
        out.extend_from_slice(&info.num_params.to_be_bytes());
        for index in 0..info.num_params {
            out.extend_from_slice(&plugin.get_parameter(index).to_be_bytes());
        }
    }

    out
}

/// Applies a serialized state buffer to the instance, silently rejecting
/// anything that does not match it.
pub fn set_state(plugin: &mut impl AudioPlugin, data: &[u8]) {
    if data.is_empty() {
        return;
    }

    let mut r = Reader::new(data);

    let Some(tag) = r.u32() else { return };
    if tag != plugin.info().unique_id {
        trace!(
            "state tag {tag:#010x} does not match instance {:#010x}; ignoring",
            plugin.info().unique_id
        );
        return;
    }

    let Some(marker) = r.u8() else { return };
    let opaque = marker != 0;
    if opaque != plugin.info().uses_chunks {
        trace!("state opacity marker does not match instance capability; ignoring");
        return;
    }

    if opaque {
        let Some(len) = r.u32() else { return };
        let Some(bytes) = r.bytes(len as usize) else { return };
        plugin.set_chunk(bytes);
    } else {
        let Some(count) = r.u32() else { return };
        if count != plugin.info().num_params {
            return;
        }
        for index in 0..count {
            let Some(value) = r.f32() else { return };
            plugin.set_parameter(index, value);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.data.len() {
            return None;
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Option<f32> {
        self.u32().map(f32::from_bits)
    }
}
