//! Render engine: primes the pool on first use, routes queued events,
//! renders per-slot blocks and streams the summed interleaved PCM.
//!
//! All three instances render every block; their outputs are summed per
//! channel and at most two channels are delivered to the peer. Blocks are
//! independent renders of up to `BLOCK_FRAMES` frames each, so a long
//! request streams as a sequence of self-contained blocks.

use crate::events::EventQueue;
use crate::instance::{AudioPlugin, PluginInfo, PluginModule};
use crate::pool::InstancePool;
use crate::protocol::{BLOCK_FRAMES, NUM_SLOTS};
use crate::transport::Transport;
use crate::Result;
use smallvec::SmallVec;
use std::io::{Read, Write};
use tracing::debug;

/// Blocks rendered and discarded while warming up a module that asked for
/// idle callbacks.
const WARMUP_BLOCKS: usize = 200;

struct RenderState {
    num_inputs: usize,
    num_outputs: usize,
    /// Channels actually delivered to the peer, `min(num_outputs, 2)`.
    delivered: usize,
    /// Shared zero block fed to every input channel.
    silent: Vec<f32>,
    /// Per-slot, per-channel output regions.
    outputs: Vec<Vec<Vec<f32>>>,
    /// Interleaved big-endian scratch for one outgoing block.
    wire: Vec<u8>,
}

impl RenderState {
    fn new(info: &PluginInfo) -> Self {
        let num_inputs = info.num_inputs as usize;
        let num_outputs = info.num_outputs as usize;
        let delivered = num_outputs.min(2);
        Self {
            num_inputs,
            num_outputs,
            delivered,
            silent: vec![0.0; BLOCK_FRAMES],
            outputs: (0..NUM_SLOTS)
                .map(|_| (0..num_outputs).map(|_| vec![0.0; BLOCK_FRAMES]).collect())
                .collect(),
            wire: Vec::with_capacity(BLOCK_FRAMES * delivered * 4),
        }
    }
}

#[derive(Default)]
pub struct Mixer {
    state: Option<RenderState>,
    // Warm-up latch. Lives for the whole process, across resets.
    idle_started: bool,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the pool has been primed for rendering and not reset since.
    pub fn is_primed(&self) -> bool {
        self.state.is_some()
    }

    /// Drops the render buffers; the next render re-primes the pool.
    pub fn invalidate(&mut self) {
        self.state = None;
    }

    /// Everything that precedes reading the sample count of a render
    /// request: bring secondaries up, prime on first use, idle and warm up
    /// if the module asked for it, route the queued events.
    pub fn prepare<M: PluginModule>(
        &mut self,
        pool: &mut InstancePool<M>,
        events: &EventQueue,
        sample_rate: f32,
        last_state: Option<&[u8]>,
    ) -> Result<()> {
        pool.ensure_secondaries(last_state)?;

        if self.state.is_none() {
            for instance in pool.live_mut() {
                instance.set_sample_rate(sample_rate);
                instance.set_block_size(BLOCK_FRAMES);
                instance.set_active(true);
                instance.start_process();
            }
            let state = RenderState::new(pool.primary().info());
            debug!(
                outputs = state.num_outputs,
                delivered = state.delivered,
                sample_rate,
                "render state primed"
            );
            self.state = Some(state);
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let wants_idle = pool.module().wants_idle();

        if wants_idle {
            for instance in pool.live_mut() {
                instance.idle();
            }
            if !self.idle_started {
                for _ in 0..WARMUP_BLOCKS {
                    render_block(pool, state, BLOCK_FRAMES);
                    for instance in pool.live_mut() {
                        instance.idle();
                    }
                }
                debug!(blocks = WARMUP_BLOCKS, "warm-up complete");
            }
        }

        let parts = events.partition();
        for (slot, batch) in parts.iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            if let Some(instance) = pool.slot_mut(slot) {
                instance.process_events(batch);
            }
        }

        if wants_idle {
            for instance in pool.live_mut() {
                instance.idle();
            }
            if !self.idle_started {
                // The batches are delivered a second time on the very first
                // render, after the warm-up. Peers rely on it.
                for (slot, batch) in parts.iter().enumerate() {
                    if batch.is_empty() {
                        continue;
                    }
                    if let Some(instance) = pool.slot_mut(slot) {
                        instance.process_events(batch);
                    }
                }
                self.idle_started = true;
            }
        }

        Ok(())
    }

    /// Streams `remaining` frames as summed interleaved big-endian f32
    /// blocks of at most `BLOCK_FRAMES` frames each.
    pub fn render_blocks<M, R, W>(
        &mut self,
        pool: &mut InstancePool<M>,
        transport: &mut Transport<R, W>,
        mut remaining: usize,
    ) where
        M: PluginModule,
        R: Read,
        W: Write,
    {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        while remaining > 0 {
            let frames = remaining.min(BLOCK_FRAMES);
            render_block(pool, state, frames);

            state.wire.clear();
            for frame in 0..frames {
                for channel in 0..state.delivered {
                    let mut sample = 0.0f32;
                    for slot in 0..NUM_SLOTS {
                        sample += state.outputs[slot][channel][frame];
                    }
                    state.wire.extend_from_slice(&sample.to_be_bytes());
                }
            }
            transport.put_bytes(&state.wire);
            transport.flush();

            remaining -= frames;
        }
    }
}

/// One block through every live slot, into that slot's output region.
fn render_block<M: PluginModule>(
    pool: &mut InstancePool<M>,
    state: &mut RenderState,
    frames: usize,
) {
    let inputs: SmallVec<[&[f32]; 8]> =
        (0..state.num_inputs).map(|_| state.silent.as_slice()).collect();

    for slot in 0..NUM_SLOTS {
        let Some(instance) = pool.slot_mut(slot) else {
            continue;
        };
        let mut outs: SmallVec<[&mut [f32]; 8]> = state.outputs[slot]
            .iter_mut()
            .map(|channel| channel.as_mut_slice())
            .collect();
        instance.render(&inputs, &mut outs, frames);
    }
}
