//! Command dispatcher.
//!
//! One session per process: handshake, then a blocking command loop until
//! the peer sends Exit, closes the pipe, or a fatal condition ends the
//! session. Whatever the outcome, teardown runs and the session's exit code
//! is written to the pipe as the final word before the process exits with
//! the same code.

use crate::chunk;
use crate::error::BridgeError;
use crate::events::EventQueue;
use crate::instance::{AudioPlugin, PluginModule};
use crate::mixer::Mixer;
use crate::pool::InstancePool;
use crate::protocol::Opcode;
use crate::transport::Transport;
use crate::Result;
use std::io::{Read, Write};
use tracing::{debug, error};

const SYSEX_LEN_MASK: u32 = 0x00FF_FFFF;

pub struct HostSession<M: PluginModule> {
    pool: InstancePool<M>,
    events: EventQueue,
    mixer: Mixer,
    sample_rate: u32,
    /// Last state pushed or pulled over the wire; seeds secondaries and
    /// survives resets.
    last_state: Vec<u8>,
}

/// Runs a full session over the given transport and returns the exit code.
pub fn serve<M, R, W>(module: M, transport: &mut Transport<R, W>) -> u32
where
    M: PluginModule,
    R: Read,
    W: Write,
{
    let mut session = match HostSession::open(module) {
        Ok(session) => session,
        Err(e) => {
            error!("session open failed: {e}");
            let code = e.exit_code();
            transport.put_u32(code);
            transport.flush();
            return code;
        }
    };

    session.send_handshake(transport);

    let code = session.run(transport);

    session.teardown();
    transport.put_u32(code);
    transport.flush();
    code
}

impl<M: PluginModule> HostSession<M> {
    /// Opens slot 0 and applies the synth gate: only MIDI-receiving synth
    /// modules are served.
    pub fn open(module: M) -> Result<Self> {
        let pool = InstancePool::open(module)?;

        let info = pool.primary().info();
        if !info.is_synth || !info.receives_midi {
            return Err(BridgeError::NotASynth);
        }
        debug!(name = %info.name, unique_id = info.unique_id, "module accepted");

        Ok(Self {
            pool,
            events: EventQueue::new(),
            mixer: Mixer::new(),
            sample_rate: 44100,
            last_state: Vec::new(),
        })
    }

    /// Announces the module: status word, four facts, three counted strings.
    pub fn send_handshake<R: Read, W: Write>(&self, transport: &mut Transport<R, W>) {
        let info = self.pool.primary().info();

        transport.put_u32(0);
        transport.put_u32(info.name.len() as u32);
        transport.put_u32(info.vendor.len() as u32);
        transport.put_u32(info.product.len() as u32);
        transport.put_u32(info.vendor_version);
        transport.put_u32(info.unique_id);
        transport.put_u32(info.num_outputs.min(2));

        if !info.name.is_empty() {
            transport.put_bytes(info.name.as_bytes());
        }
        if !info.vendor.is_empty() {
            transport.put_bytes(info.vendor.as_bytes());
        }
        if !info.product.is_empty() {
            transport.put_bytes(info.product.as_bytes());
        }
        transport.flush();
    }

    /// Command loop. Returns the session exit code; 0 means the peer asked
    /// to exit (a closed pipe reads as Exit too).
    pub fn run<R: Read, W: Write>(&mut self, transport: &mut Transport<R, W>) -> u32 {
        loop {
            let word = transport.get_u32();
            let Some(op) = Opcode::from_wire(word) else {
                error!(opcode = word, "unrecognized opcode");
                return BridgeError::UnknownOpcode(word).exit_code();
            };

            if op == Opcode::Exit {
                return 0;
            }

            if let Err(e) = self.handle(op, transport) {
                error!("fatal while handling {op:?}: {e}");
                return e.exit_code();
            }
            transport.flush();
        }
    }

    fn handle<R: Read, W: Write>(
        &mut self,
        op: Opcode,
        transport: &mut Transport<R, W>,
    ) -> Result<()> {
        match op {
            Opcode::Exit => {}

            Opcode::GetChunk => {
                self.last_state = chunk::get_state(self.pool.primary_mut());
                transport.put_u32(0);
                transport.put_u32(self.last_state.len() as u32);
                transport.put_bytes(&self.last_state);
            }

            Opcode::SetChunk => {
                let len = transport.get_u32() as usize;
                let mut state = vec![0u8; len];
                if len > 0 {
                    transport.get_bytes(&mut state);
                }
                self.pool.apply_state_all(&state);
                self.last_state = state;
                transport.put_u32(0);
            }

            Opcode::HasEditor => {
                let has_editor = self.pool.primary().info().has_editor;
                transport.put_u32(0);
                transport.put_u32(has_editor as u32);
            }

            Opcode::DisplayEditorModal => {
                if self.pool.primary().info().has_editor {
                    self.pool.primary_mut().show_editor_modal();
                    // Whatever the editor changed on slot 0 becomes the
                    // shared state.
                    self.last_state = self.pool.mirror_primary();
                }
                transport.put_u32(0);
            }

            Opcode::SetSampleRate => {
                let size = transport.get_u32();
                if size != 4 {
                    return Err(BridgeError::SampleRatePayload(size));
                }
                self.sample_rate = transport.get_u32();
                debug!(rate = self.sample_rate, "sample rate set");
                transport.put_u32(0);
            }

            Opcode::Reset => {
                let primed = self.mixer.is_primed();
                self.mixer.invalidate();
                self.events.clear();
                self.pool.reset(primed, Some(self.last_state.as_slice()))?;
                transport.put_u32(0);
            }

            Opcode::SendMidiEvent => {
                let word = transport.get_u32();
                self.events.push_midi(word, 0);
                transport.put_u32(0);
            }

            Opcode::SendSysexEvent => {
                let word = transport.get_u32();
                let port = word >> 24;
                let mut dump = vec![0u8; (word & SYSEX_LEN_MASK) as usize];
                transport.get_bytes(&mut dump);
                self.events.push_sysex(port, dump);
                transport.put_u32(0);
            }

            Opcode::RenderSamples => {
                self.mixer.prepare(
                    &mut self.pool,
                    &self.events,
                    self.sample_rate as f32,
                    Some(self.last_state.as_slice()),
                )?;

                let count = transport.get_u32();
                transport.put_u32(0);
                self.mixer.render_blocks(&mut self.pool, transport, count as usize);
                self.events.clear();
            }

            Opcode::SendMidiEventWithTimestamp => {
                let word = transport.get_u32();
                let timestamp = transport.get_u32();
                self.events.push_midi(word, timestamp);
                transport.put_u32(0);
            }

            Opcode::SendSysexEventWithTimestamp => {
                let word = transport.get_u32();
                let port = word >> 24;
                let len = (word & SYSEX_LEN_MASK) as usize;
                let timestamp = transport.get_u32();
                let mut dump = vec![0u8; len];
                transport.get_bytes(&mut dump);
                self.events.push_sysex_at(port, timestamp, dump);
                transport.put_u32(0);
            }
        }
        Ok(())
    }

    /// Reverse-order shutdown of whatever is still live.
    pub fn teardown(&mut self) {
        let primed = self.mixer.is_primed();
        self.pool.shutdown(primed);
    }
}
