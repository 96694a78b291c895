//! Scripted deterministic plugin used by the unit tests in place of a
//! native module. Every lifecycle call is appended to a shared log so tests
//! can assert ordering, and rendered samples are a pure function of
//! (slot, channel, frame) so mixes and block splits are exactly checkable.

use crate::error::BridgeError;
use crate::events::PluginEvent;
use crate::instance::{AudioPlugin, PluginInfo, PluginModule};
use crate::Result;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const TEST_UNIQUE_ID: u32 = 0x5453_594E;
pub const TEST_NUM_PARAMS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Instantiate(usize),
    SetSampleRate(usize, f32),
    SetBlockSize(usize, usize),
    SetActive(usize, bool),
    StartProcess(usize),
    StopProcess(usize),
    Idle(usize),
    /// slot, number of events in the batch
    ProcessEvents(usize, usize),
    /// slot, frames rendered
    Render(usize, usize),
    ShowEditor(usize),
    Close(usize),
}

pub type CallLog = Rc<RefCell<Vec<Call>>>;

/// Expected output of the scripted synth for one sample. Values are exact
/// small multiples of 1/64 so three-way sums are exact in f32.
pub fn sample_value(slot: usize, channel: usize, frame: usize) -> f32 {
    (slot + 1) as f32 * 8.0 + channel as f32 * 0.5 + (frame % 64) as f32 * 0.015625
}

#[derive(Clone)]
struct Config {
    uses_chunks: bool,
    num_outputs: u32,
    is_synth: bool,
    receives_midi: bool,
    has_editor: bool,
}

pub struct TestModule {
    log: CallLog,
    config: Config,
    wants_idle: Cell<bool>,
    fail_slots: RefCell<Vec<usize>>,
}

impl TestModule {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
            config: Config {
                uses_chunks: false,
                num_outputs: 2,
                is_synth: true,
                receives_midi: true,
                has_editor: false,
            },
            wants_idle: Cell::new(false),
            fail_slots: RefCell::new(Vec::new()),
        }
    }

    pub fn uses_chunks(mut self, v: bool) -> Self {
        self.config.uses_chunks = v;
        self
    }

    pub fn outputs(mut self, n: u32) -> Self {
        self.config.num_outputs = n;
        self
    }

    pub fn wanting_idle(self, v: bool) -> Self {
        self.wants_idle.set(v);
        self
    }

    pub fn not_a_synth(mut self) -> Self {
        self.config.is_synth = false;
        self
    }

    pub fn with_editor(mut self) -> Self {
        self.config.has_editor = true;
        self
    }

    /// Every later `instantiate` for this slot fails.
    pub fn fail_slot(self, slot: usize) -> Self {
        self.fail_slots.borrow_mut().push(slot);
        self
    }

    pub fn log(&self) -> CallLog {
        Rc::clone(&self.log)
    }
}

impl PluginModule for TestModule {
    type Instance = TestSynth;

    fn instantiate(&self, slot: usize) -> Result<TestSynth> {
        if self.fail_slots.borrow().contains(&slot) {
            return Err(BridgeError::InstanceOpen);
        }
        self.log.borrow_mut().push(Call::Instantiate(slot));

        let c = &self.config;
        Ok(TestSynth {
            info: PluginInfo {
                unique_id: TEST_UNIQUE_ID,
                name: "Test Synth".into(),
                vendor: "Test Vendor".into(),
                product: "Test Product".into(),
                vendor_version: 1,
                num_params: TEST_NUM_PARAMS,
                num_inputs: 0,
                num_outputs: c.num_outputs,
                has_editor: c.has_editor,
                uses_chunks: c.uses_chunks,
                is_synth: c.is_synth,
                receives_midi: c.receives_midi,
            },
            slot,
            log: Rc::clone(&self.log),
            params: vec![0.5; TEST_NUM_PARAMS as usize],
            chunk: Vec::new(),
        })
    }

    fn wants_idle(&self) -> bool {
        self.wants_idle.get()
    }
}

pub struct TestSynth {
    info: PluginInfo,
    slot: usize,
    log: CallLog,
    params: Vec<f32>,
    chunk: Vec<u8>,
}

impl AudioPlugin for TestSynth {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn get_parameter(&self, index: u32) -> f32 {
        self.params[index as usize]
    }

    fn set_parameter(&mut self, index: u32, value: f32) {
        self.params[index as usize] = value;
    }

    fn get_chunk(&mut self) -> Vec<u8> {
        self.chunk.clone()
    }

    fn set_chunk(&mut self, data: &[u8]) {
        self.chunk = data.to_vec();
    }

    fn set_sample_rate(&mut self, rate: f32) {
        self.log.borrow_mut().push(Call::SetSampleRate(self.slot, rate));
    }

    fn set_block_size(&mut self, frames: usize) {
        self.log.borrow_mut().push(Call::SetBlockSize(self.slot, frames));
    }

    fn set_active(&mut self, active: bool) {
        self.log.borrow_mut().push(Call::SetActive(self.slot, active));
    }

    fn start_process(&mut self) {
        self.log.borrow_mut().push(Call::StartProcess(self.slot));
    }

    fn stop_process(&mut self) {
        self.log.borrow_mut().push(Call::StopProcess(self.slot));
    }

    fn idle(&mut self) {
        self.log.borrow_mut().push(Call::Idle(self.slot));
    }

    fn process_events(&mut self, events: &[&PluginEvent]) {
        self.log
            .borrow_mut()
            .push(Call::ProcessEvents(self.slot, events.len()));
    }

    fn render(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        for (channel, out) in outputs.iter_mut().enumerate() {
            for (frame, sample) in out[..frames].iter_mut().enumerate() {
                *sample = sample_value(self.slot, channel, frame);
            }
        }
        self.log.borrow_mut().push(Call::Render(self.slot, frames));
    }

    fn show_editor_modal(&mut self) {
        self.log.borrow_mut().push(Call::ShowEditor(self.slot));
    }
}

impl Drop for TestSynth {
    fn drop(&mut self) {
        self.log.borrow_mut().push(Call::Close(self.slot));
    }
}
