//! VST2 module loading and the concrete `PluginModule`/`AudioPlugin`
//! implementation over the raw plugin ABI.
//!
//! All FFI stays inside this file. Instances are opened through the
//! module's entry point with our host callback; each instance carries a
//! serial number in the effect's user field so the callback can tell the
//! three copies apart. The idle request latch and the module directory are
//! process-global, mirroring how the callback is reached without any
//! context of ours.

use crate::error::BridgeError;
use crate::events::{EventPayload, PluginEvent};
use crate::instance::{AudioPlugin, PluginInfo, PluginModule};
use crate::Result;
use smallvec::SmallVec;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::{c_void, CStr, CString};
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::{debug, warn};

// --- ABI constants ---

const K_EFFECT_MAGIC: i32 = 0x5673_7450; // 'VstP'
const K_VST_VERSION: isize = 2400;

const EFF_OPEN: i32 = 0;
const EFF_CLOSE: i32 = 1;
const EFF_SET_SAMPLE_RATE: i32 = 10;
const EFF_SET_BLOCK_SIZE: i32 = 11;
const EFF_MAINS_CHANGED: i32 = 12;
const EFF_GET_CHUNK: i32 = 23;
const EFF_SET_CHUNK: i32 = 24;
const EFF_PROCESS_EVENTS: i32 = 25;
const EFF_GET_PLUG_CATEGORY: i32 = 35;
const EFF_GET_EFFECT_NAME: i32 = 45;
const EFF_GET_VENDOR_STRING: i32 = 47;
const EFF_GET_PRODUCT_STRING: i32 = 48;
const EFF_GET_VENDOR_VERSION: i32 = 49;
const EFF_CAN_DO: i32 = 51;
const EFF_IDLE: i32 = 53; // deprecated opcode, still honored
const EFF_START_PROCESS: i32 = 71;
const EFF_STOP_PROCESS: i32 = 72;

const K_PLUG_CATEG_SYNTH: isize = 2;

const EFF_FLAGS_HAS_EDITOR: i32 = 1 << 0;
const EFF_FLAGS_PROGRAM_CHUNKS: i32 = 1 << 5;

const K_VST_MIDI_TYPE: i32 = 1;
const K_VST_SYSEX_TYPE: i32 = 6;

const AUDIO_MASTER_VERSION: i32 = 1;
const AUDIO_MASTER_CURRENT_ID: i32 = 2;
const AUDIO_MASTER_NEED_IDLE: i32 = 14; // deprecated
const AUDIO_MASTER_GET_VENDOR_STRING: i32 = 32;
const AUDIO_MASTER_GET_PRODUCT_STRING: i32 = 33;
const AUDIO_MASTER_GET_VENDOR_VERSION: i32 = 34;
const AUDIO_MASTER_GET_LANGUAGE: i32 = 38;
const AUDIO_MASTER_GET_DIRECTORY: i32 = 41;

const K_VST_LANG_ENGLISH: isize = 1;

const HOST_VENDOR: &CStr = c"NoWork, Inc.";
const HOST_PRODUCT: &CStr = c"VSTi Host Bridge";

// --- ABI types ---

type DispatcherProc =
    unsafe extern "C" fn(*mut AEffect, i32, i32, isize, *mut c_void, f32) -> isize;
type ProcessProc = unsafe extern "C" fn(*mut AEffect, *const *const f32, *const *mut f32, i32);
type SetParameterProc = unsafe extern "C" fn(*mut AEffect, i32, f32);
type GetParameterProc = unsafe extern "C" fn(*mut AEffect, i32) -> f32;
type HostCallbackProc =
    unsafe extern "C" fn(*mut AEffect, i32, i32, isize, *mut c_void, f32) -> isize;
type MainProc = unsafe extern "C" fn(HostCallbackProc) -> *mut AEffect;

#[repr(C)]
struct AEffect {
    magic: i32,
    dispatcher: DispatcherProc,
    process: Option<ProcessProc>,
    set_parameter: SetParameterProc,
    get_parameter: GetParameterProc,
    num_programs: i32,
    num_params: i32,
    num_inputs: i32,
    num_outputs: i32,
    flags: i32,
    resvd1: isize,
    resvd2: isize,
    initial_delay: i32,
    real_qualities: i32,
    off_qualities: i32,
    io_ratio: f32,
    object: *mut c_void,
    user: *mut c_void,
    unique_id: i32,
    version: i32,
    process_replacing: Option<ProcessProc>,
    process_double_replacing: Option<unsafe extern "C" fn(*mut AEffect, *const *const f64, *const *mut f64, i32)>,
    future: [u8; 56],
}

#[repr(C)]
struct VstMidiEvent {
    kind: i32,
    byte_size: i32,
    delta_frames: i32,
    flags: i32,
    note_length: i32,
    note_offset: i32,
    midi_data: [u8; 4],
    detune: i8,
    note_off_velocity: u8,
    reserved1: u8,
    reserved2: u8,
}

#[repr(C)]
struct VstMidiSysexEvent {
    kind: i32,
    byte_size: i32,
    delta_frames: i32,
    flags: i32,
    dump_bytes: i32,
    resvd1: isize,
    sysex_dump: *const u8,
    resvd2: isize,
}

/// Header of the variable-length event batch handed to the plugin. The
/// pointer array extends past `events`.
#[repr(C)]
struct VstEvents {
    num_events: i32,
    reserved: isize,
    events: [*const c_void; 2],
}

// --- process-global host state ---

static NEED_IDLE: AtomicBool = AtomicBool::new(false);
static MODULE_DIR: OnceLock<CString> = OnceLock::new();

/// Serial number stored behind the effect's user pointer, one per slot.
struct InstanceContext {
    serial: isize,
}

unsafe extern "C" fn host_callback(
    effect: *mut AEffect,
    opcode: i32,
    _index: i32,
    _value: isize,
    ptr: *mut c_void,
    _opt: f32,
) -> isize {
    match opcode {
        AUDIO_MASTER_VERSION => K_VST_VERSION,

        AUDIO_MASTER_CURRENT_ID => {
            // The user field is unset while the entry point is still
            // constructing the effect.
            if !effect.is_null() {
                let user = unsafe { (*effect).user };
                if !user.is_null() {
                    return unsafe { (*(user as *const InstanceContext)).serial };
                }
            }
            0
        }

        AUDIO_MASTER_GET_VENDOR_STRING => {
            unsafe { copy_cstr(ptr, HOST_VENDOR) };
            0
        }

        AUDIO_MASTER_GET_PRODUCT_STRING => {
            unsafe { copy_cstr(ptr, HOST_PRODUCT) };
            0
        }

        AUDIO_MASTER_GET_VENDOR_VERSION => 1000,

        AUDIO_MASTER_GET_LANGUAGE => K_VST_LANG_ENGLISH,

        AUDIO_MASTER_GET_DIRECTORY => match MODULE_DIR.get() {
            Some(dir) => dir.as_ptr() as isize,
            None => 0,
        },

        AUDIO_MASTER_NEED_IDLE => {
            NEED_IDLE.store(true, Ordering::Relaxed);
            0
        }

        _ => 0,
    }
}

/// Writes a nul-terminated string into a plugin-provided 64-byte buffer.
unsafe fn copy_cstr(dst: *mut c_void, src: &CStr) {
    if dst.is_null() {
        return;
    }
    let bytes = src.to_bytes_with_nul();
    let len = bytes.len().min(64);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, len);
    }
}

// --- module ---

pub struct Vst2Module {
    entry: MainProc,
    // Keeps the code mapped; every instance pointer dangles without it.
    _library: libloading::Library,
}

impl Vst2Module {
    /// Loads the shared library and resolves the plugin entry point,
    /// trying the canonical symbol first and the two legacy spellings
    /// after it.
    pub fn load(path: &Path) -> Result<Self> {
        let library = unsafe {
            libloading::Library::new(path)
                .map_err(|e| BridgeError::ModuleLoad(e.to_string()))?
        };

        let entry = unsafe {
            let symbol = library
                .get::<MainProc>(b"VSTPluginMain\0")
                .or_else(|_| library.get::<MainProc>(b"main\0"))
                .or_else(|_| library.get::<MainProc>(b"MAIN\0"))
                .map_err(|_| BridgeError::EntryPointMissing)?;
            *symbol
        };

        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = MODULE_DIR.set(CString::new(dir).unwrap_or_default());

        debug!(path = %path.display(), "module loaded");
        Ok(Self {
            entry,
            _library: library,
        })
    }
}

impl PluginModule for Vst2Module {
    type Instance = Vst2Instance;

    fn instantiate(&self, slot: usize) -> Result<Vst2Instance> {
        let effect = unsafe { (self.entry)(host_callback) };
        if effect.is_null() || unsafe { (*effect).magic } != K_EFFECT_MAGIC {
            return Err(BridgeError::InstanceOpen);
        }

        let context = Box::new(InstanceContext {
            serial: slot as isize,
        });
        unsafe {
            (*effect).user = &*context as *const InstanceContext as *mut c_void;
            dispatch(effect, EFF_OPEN, 0, 0, std::ptr::null_mut(), 0.0);
        }

        let info = unsafe { query_info(effect) };
        debug!(slot, name = %info.name, "instance opened");

        Ok(Vst2Instance {
            effect,
            info,
            _context: context,
        })
    }

    fn wants_idle(&self) -> bool {
        NEED_IDLE.load(Ordering::Relaxed)
    }
}

unsafe fn dispatch(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    unsafe { ((*effect).dispatcher)(effect, opcode, index, value, ptr, opt) }
}

unsafe fn query_info(effect: *mut AEffect) -> PluginInfo {
    unsafe {
        let mut name = [0u8; 256];
        let mut vendor = [0u8; 256];
        let mut product = [0u8; 256];

        dispatch(effect, EFF_GET_EFFECT_NAME, 0, 0, name.as_mut_ptr().cast(), 0.0);
        dispatch(effect, EFF_GET_VENDOR_STRING, 0, 0, vendor.as_mut_ptr().cast(), 0.0);
        dispatch(effect, EFF_GET_PRODUCT_STRING, 0, 0, product.as_mut_ptr().cast(), 0.0);

        let vendor_version =
            dispatch(effect, EFF_GET_VENDOR_VERSION, 0, 0, std::ptr::null_mut(), 0.0) as u32;
        let category =
            dispatch(effect, EFF_GET_PLUG_CATEGORY, 0, 0, std::ptr::null_mut(), 0.0);
        let receives_midi = dispatch(
            effect,
            EFF_CAN_DO,
            0,
            0,
            c"receiveVstMidiEvent".as_ptr() as *mut c_void,
            0.0,
        ) >= 1;

        let flags = (*effect).flags;

        PluginInfo {
            unique_id: (*effect).unique_id as u32,
            name: buffer_string(&name),
            vendor: buffer_string(&vendor),
            product: buffer_string(&product),
            vendor_version,
            num_params: (*effect).num_params as u32,
            num_inputs: (*effect).num_inputs as u32,
            num_outputs: (*effect).num_outputs as u32,
            has_editor: flags & EFF_FLAGS_HAS_EDITOR != 0,
            uses_chunks: flags & EFF_FLAGS_PROGRAM_CHUNKS != 0,
            is_synth: category == K_PLUG_CATEG_SYNTH,
            receives_midi,
        }
    }
}

fn buffer_string(buf: &[u8; 256]) -> String {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

// --- instance ---

pub struct Vst2Instance {
    effect: *mut AEffect,
    info: PluginInfo,
    // The effect holds a raw pointer to this; the box keeps the address
    // stable for the instance's lifetime.
    _context: Box<InstanceContext>,
}

impl AudioPlugin for Vst2Instance {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn get_parameter(&self, index: u32) -> f32 {
        unsafe { ((*self.effect).get_parameter)(self.effect, index as i32) }
    }

    fn set_parameter(&mut self, index: u32, value: f32) {
        unsafe { ((*self.effect).set_parameter)(self.effect, index as i32, value) }
    }

    fn get_chunk(&mut self) -> Vec<u8> {
        let mut data: *mut u8 = std::ptr::null_mut();
        let size = unsafe {
            dispatch(
                self.effect,
                EFF_GET_CHUNK,
                0,
                0,
                &mut data as *mut *mut u8 as *mut c_void,
                0.0,
            )
        };
        if size <= 0 || data.is_null() {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(data, size as usize).to_vec() }
    }

    fn set_chunk(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        unsafe {
            dispatch(
                self.effect,
                EFF_SET_CHUNK,
                0,
                data.len() as isize,
                data.as_ptr() as *mut c_void,
                0.0,
            );
        }
    }

    fn set_sample_rate(&mut self, rate: f32) {
        unsafe {
            dispatch(self.effect, EFF_SET_SAMPLE_RATE, 0, 0, std::ptr::null_mut(), rate);
        }
    }

    fn set_block_size(&mut self, frames: usize) {
        unsafe {
            dispatch(
                self.effect,
                EFF_SET_BLOCK_SIZE,
                0,
                frames as isize,
                std::ptr::null_mut(),
                0.0,
            );
        }
    }

    fn set_active(&mut self, active: bool) {
        unsafe {
            dispatch(
                self.effect,
                EFF_MAINS_CHANGED,
                0,
                active as isize,
                std::ptr::null_mut(),
                0.0,
            );
        }
    }

    fn start_process(&mut self) {
        unsafe {
            dispatch(self.effect, EFF_START_PROCESS, 0, 0, std::ptr::null_mut(), 0.0);
        }
    }

    fn stop_process(&mut self) {
        unsafe {
            dispatch(self.effect, EFF_STOP_PROCESS, 0, 0, std::ptr::null_mut(), 0.0);
        }
    }

    fn idle(&mut self) {
        unsafe {
            dispatch(self.effect, EFF_IDLE, 0, 0, std::ptr::null_mut(), 0.0);
        }
    }

    fn process_events(&mut self, events: &[&PluginEvent]) {
        if events.is_empty() {
            return;
        }

        // Owned ABI structs first; their addresses must not move once the
        // pointer array is built.
        let owned: Vec<OwnedVstEvent> = events.iter().map(|e| OwnedVstEvent::from(*e)).collect();

        let batch = EventBatch::new(&owned);
        unsafe {
            dispatch(
                self.effect,
                EFF_PROCESS_EVENTS,
                0,
                0,
                batch.as_ptr() as *mut c_void,
                0.0,
            );
        }
    }

    fn render(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let Some(process_replacing) = (unsafe { (*self.effect).process_replacing }) else {
            warn!("module has no replacing process; output left as-is");
            return;
        };

        let input_ptrs: SmallVec<[*const f32; 8]> =
            inputs.iter().map(|ch| ch.as_ptr()).collect();
        let output_ptrs: SmallVec<[*mut f32; 8]> =
            outputs.iter_mut().map(|ch| ch.as_mut_ptr()).collect();

        unsafe {
            process_replacing(
                self.effect,
                input_ptrs.as_ptr(),
                output_ptrs.as_ptr(),
                frames as i32,
            );
        }
    }

    fn show_editor_modal(&mut self) {
        // The window loop lives in the platform host, not here.
        debug!("editor display requested; no embedded window host in this build");
    }
}

impl Drop for Vst2Instance {
    fn drop(&mut self) {
        unsafe {
            dispatch(self.effect, EFF_CLOSE, 0, 0, std::ptr::null_mut(), 0.0);
        }
    }
}

enum OwnedVstEvent {
    Midi(VstMidiEvent),
    Sysex(VstMidiSysexEvent),
}

impl OwnedVstEvent {
    fn from(event: &PluginEvent) -> Self {
        match &event.payload {
            EventPayload::Midi { data } => OwnedVstEvent::Midi(VstMidiEvent {
                kind: K_VST_MIDI_TYPE,
                byte_size: mem::size_of::<VstMidiEvent>() as i32,
                delta_frames: event.frame_offset as i32,
                flags: 0,
                note_length: 0,
                note_offset: 0,
                midi_data: [data[0], data[1], data[2], 0],
                detune: 0,
                note_off_velocity: 0,
                reserved1: 0,
                reserved2: 0,
            }),
            EventPayload::Sysex { dump } => OwnedVstEvent::Sysex(VstMidiSysexEvent {
                kind: K_VST_SYSEX_TYPE,
                byte_size: mem::size_of::<VstMidiSysexEvent>() as i32,
                delta_frames: event.frame_offset as i32,
                flags: 0,
                dump_bytes: dump.len() as i32,
                resvd1: 0,
                sysex_dump: dump.as_ptr(),
                resvd2: 0,
            }),
        }
    }

    fn as_ptr(&self) -> *const c_void {
        match self {
            OwnedVstEvent::Midi(e) => e as *const VstMidiEvent as *const c_void,
            OwnedVstEvent::Sysex(e) => e as *const VstMidiSysexEvent as *const c_void,
        }
    }
}

/// Heap allocation for the header-plus-pointer-array batch the ABI wants.
struct EventBatch {
    ptr: *mut VstEvents,
    layout: Layout,
}

impl EventBatch {
    fn new(events: &[OwnedVstEvent]) -> Self {
        let count = events.len().max(2);
        let size = mem::offset_of!(VstEvents, events)
            + count * mem::size_of::<*const c_void>();
        // align_of is a power of two and the size cannot overflow isize
        // for any batch the queue can hold.
        let layout =
            unsafe { Layout::from_size_align_unchecked(size, mem::align_of::<VstEvents>()) };

        let ptr = unsafe { alloc_zeroed(layout) } as *mut VstEvents;
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }

        unsafe {
            (*ptr).num_events = events.len() as i32;
            (*ptr).reserved = 0;
            // The pointer array extends past the declared two slots; index
            // from the allocation base, not through the array field.
            let slots = (ptr as *mut u8).add(mem::offset_of!(VstEvents, events))
                as *mut *const c_void;
            for (i, event) in events.iter().enumerate() {
                *slots.add(i) = event.as_ptr();
            }
        }

        Self { ptr, layout }
    }

    fn as_ptr(&self) -> *const VstEvents {
        self.ptr
    }
}

impl Drop for EventBatch {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr as *mut u8, self.layout);
        }
    }
}
