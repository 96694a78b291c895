//! Three-slot instance pool.
//!
//! Slot 0 is opened at session start and answers every non-render command.
//! Slots 1 and 2 come up lazily on the first render request and are seeded
//! from the last state the peer pushed, so the three copies stay
//! interchangeable. Teardown always walks slots in reverse.

use crate::chunk;
use crate::error::BridgeError;
use crate::instance::{AudioPlugin, PluginModule};
use crate::protocol::NUM_SLOTS;
use crate::Result;
use tracing::debug;

pub struct InstancePool<M: PluginModule> {
    // Declared before `module` so instances drop before the library that
    // backs their code.
    slots: [Option<M::Instance>; NUM_SLOTS],
    module: M,
}

impl<M: PluginModule> InstancePool<M> {
    /// Opens slot 0. Secondaries stay down until the first render.
    pub fn open(module: M) -> Result<Self> {
        let primary = module.instantiate(0)?;
        Ok(Self {
            slots: [Some(primary), None, None],
            module,
        })
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Slot 0 is live from `open` until `shutdown`; a failed `reset` ends
    /// the session before anything can observe the empty slot.
    pub fn primary(&self) -> &M::Instance {
        self.slots[0].as_ref().expect("slot 0 live for the session")
    }

    pub fn primary_mut(&mut self) -> &mut M::Instance {
        self.slots[0].as_mut().expect("slot 0 live for the session")
    }

    pub fn slot_mut(&mut self, slot: usize) -> Option<&mut M::Instance> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut M::Instance> {
        self.slots.iter_mut().flatten()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn all_live(&self) -> bool {
        self.live_count() == NUM_SLOTS
    }

    /// Brings slots 1 and 2 up if they are down, seeding each from the
    /// last-known state. Failure here is fatal to the session.
    pub fn ensure_secondaries(&mut self, state: Option<&[u8]>) -> Result<()> {
        for slot in 1..NUM_SLOTS {
            if self.slots[slot].is_some() {
                continue;
            }
            let mut instance = self
                .module
                .instantiate(slot)
                .map_err(|_| BridgeError::SecondaryInstance)?;
            if let Some(data) = state {
                chunk::set_state(&mut instance, data);
            }
            debug!(slot, "secondary instance up");
            self.slots[slot] = Some(instance);
        }
        Ok(())
    }

    /// Pushes one state buffer to every live slot.
    pub fn apply_state_all(&mut self, data: &[u8]) {
        for instance in self.live_mut() {
            chunk::set_state(instance, data);
        }
    }

    /// Pulls slot 0's current state and copies it onto the live
    /// secondaries, returning the pulled buffer. Used after the editor has
    /// been open on slot 0 and may have changed anything.
    pub fn mirror_primary(&mut self) -> Vec<u8> {
        let state = chunk::get_state(self.primary_mut());
        for slot in 1..NUM_SLOTS {
            if let Some(instance) = self.slots[slot].as_mut() {
                chunk::set_state(instance, &state);
            }
        }
        state
    }

    /// Tears every slot down in reverse order and reopens slot 0 with the
    /// given state. `primed` says whether processing was started, which
    /// decides whether stop-process precedes close.
    pub fn reset(&mut self, primed: bool, state: Option<&[u8]>) -> Result<()> {
        for slot in (0..NUM_SLOTS).rev() {
            if let Some(mut instance) = self.slots[slot].take() {
                if primed {
                    instance.stop_process();
                }
            }
        }

        let mut primary = self.module.instantiate(0)?;
        if let Some(data) = state {
            chunk::set_state(&mut primary, data);
        }
        self.slots[0] = Some(primary);
        debug!("pool reset, slot 0 reopened");
        Ok(())
    }

    /// Final teardown, reverse order, no reopen.
    pub fn shutdown(&mut self, primed: bool) {
        for slot in (0..NUM_SLOTS).rev() {
            if let Some(mut instance) = self.slots[slot].take() {
                if primed {
                    instance.stop_process();
                }
            }
        }
    }
}
