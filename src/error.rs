//! Error types for the bridge worker.
//!
//! Every fatal condition maps to the process exit status the supervising
//! host expects; the same code is also written to the pipe as the session's
//! final word.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("expected exactly two arguments: <module path> <integrity token>")]
    BadInvocation,

    #[error("integrity token is not valid hexadecimal")]
    MalformedToken,

    #[error("integrity token does not match the module path")]
    TokenMismatch,

    /// Reserved for the platform UI bootstrap collaborator.
    #[error("UI subsystem initialization failed")]
    UiInit,

    /// Reserved for the platform COM bootstrap collaborator.
    #[error("COM initialization failed")]
    ComInit,

    #[error("failed to load plugin module: {0}")]
    ModuleLoad(String),

    #[error("plugin entry point not found in module")]
    EntryPointMissing,

    #[error("plugin instance creation or open failed")]
    InstanceOpen,

    #[error("module is not a MIDI-receiving synth")]
    NotASynth,

    #[error("sample-rate payload must be 4 bytes, got {0}")]
    SampleRatePayload(u32),

    #[error("secondary instance creation failed")]
    SecondaryInstance,

    #[error("unrecognized opcode {0}")]
    UnknownOpcode(u32),
}

impl BridgeError {
    /// Process exit status for this condition. 0 is reserved for clean exit.
    pub fn exit_code(&self) -> u32 {
        match self {
            BridgeError::BadInvocation => 1,
            BridgeError::MalformedToken => 2,
            BridgeError::TokenMismatch => 3,
            BridgeError::UiInit => 4,
            BridgeError::ComInit => 5,
            BridgeError::ModuleLoad(_) => 6,
            BridgeError::EntryPointMissing => 7,
            BridgeError::InstanceOpen => 8,
            BridgeError::NotASynth => 9,
            BridgeError::SampleRatePayload(_) => 10,
            BridgeError::SecondaryInstance => 11,
            BridgeError::UnknownOpcode(_) => 12,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
