//! Transport codec over the worker's pipe pair.
//!
//! The only I/O primitive the other components use. All scalars travel
//! big-endian regardless of host byte order. The peer owns both ends of the
//! pipe pair, so faults are masked rather than surfaced: a short read
//! zero-fills the destination and processing continues, and writes are
//! best-effort. Both cases are logged. A zero-filled opcode decodes as
//! `Exit`, which is how a closed pipe shuts the worker down.

use std::io::{Read, Write};
use tracing::warn;

pub struct Transport<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> Transport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Fills `buf` from the peer. On any failure or short read the whole
    /// buffer is zeroed and the caller proceeds with a well-typed but
    /// logically wrong value.
    pub fn get_bytes(&mut self, buf: &mut [u8]) {
        if let Err(e) = self.reader.read_exact(buf) {
            buf.fill(0);
            warn!("short read of {} bytes ({e}); zero-filling", buf.len());
        }
    }

    pub fn get_u32(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        self.get_bytes(&mut raw);
        u32::from_be_bytes(raw)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        if let Err(e) = self.writer.write_all(bytes) {
            warn!("write of {} bytes failed: {e}", bytes.len());
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_be_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.put_bytes(&value.to_be_bytes());
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("flush failed: {e}");
        }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}
