//! Plugin capability interface.
//!
//! The native module's function-pointer table is modeled as one trait so the
//! rest of the worker never touches the foreign ABI. `vst2::Vst2Module` is
//! the concrete implementation; tests substitute a scripted synth.

use crate::events::PluginEvent;
use crate::Result;

/// Static facts an instance reports once it has been opened.
#[derive(Debug, Clone, Default)]
pub struct PluginInfo {
    /// 32-bit identity tag validating chunk applicability.
    pub unique_id: u32,
    pub name: String,
    pub vendor: String,
    pub product: String,
    pub vendor_version: u32,
    pub num_params: u32,
    pub num_inputs: u32,
    pub num_outputs: u32,
    pub has_editor: bool,
    /// Persistent state travels as an opaque blob instead of a parameter array.
    pub uses_chunks: bool,
    pub is_synth: bool,
    pub receives_midi: bool,
}

/// One loaded, independently-stateful copy of the plugin module.
///
/// Dropping an instance closes it; `stop_process` must be called first if
/// processing was started.
pub trait AudioPlugin {
    fn info(&self) -> &PluginInfo;

    /// Normalized 0..1.
    fn get_parameter(&self, index: u32) -> f32;

    /// Normalized 0..1.
    fn set_parameter(&mut self, index: u32, value: f32);

    /// Opaque persistent state, only meaningful when `uses_chunks`.
    fn get_chunk(&mut self) -> Vec<u8>;

    fn set_chunk(&mut self, data: &[u8]);

    fn set_sample_rate(&mut self, rate: f32);

    fn set_block_size(&mut self, frames: usize);

    fn set_active(&mut self, active: bool);

    fn start_process(&mut self);

    fn stop_process(&mut self);

    /// Deprecated-style idle tick, only issued when the module asked for it.
    fn idle(&mut self);

    /// Delivers one batch of events destined for this instance's port.
    fn process_events(&mut self, events: &[&PluginEvent]);

    /// Renders one block, replacing the contents of every output channel.
    /// `inputs` and `outputs` carry exactly the channel counts from `info`.
    fn render(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize);

    /// Blocks in the platform editor dialog until dismissed. Only called
    /// when `info().has_editor`; the window loop itself belongs to the
    /// platform collaborator.
    fn show_editor_modal(&mut self);
}

/// Factory for plugin instances, one per slot identity.
pub trait PluginModule {
    type Instance: AudioPlugin;

    /// Creates and opens a fresh instance bound to the given slot identity.
    /// The identity is visible to the plugin through the host callback, so
    /// the three instances cannot be confused inside it.
    fn instantiate(&self, slot: usize) -> Result<Self::Instance>;

    /// True once any instance has asked for idle callbacks through the host
    /// callback.
    fn wants_idle(&self) -> bool;
}
