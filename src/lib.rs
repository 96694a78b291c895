//! Out-of-process VST2 synth host.
//!
//! This crate is the worker side of a bridged plugin host: the binary loads
//! one third-party synth module, keeps three independent instances of it,
//! and serves a parent process over a big-endian binary protocol on the
//! standard pipes. It is spawned and supervised by the parent and is not
//! intended for direct use.

pub mod chunk;
pub mod error;
pub mod events;
pub mod instance;
pub mod mixer;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod vst2;

#[cfg(test)]
mod test_synth;

// Re-exports
pub use error::{BridgeError, Result};
pub use instance::{AudioPlugin, PluginInfo, PluginModule};
pub use pool::InstancePool;
pub use protocol::{Opcode, BLOCK_FRAMES, NUM_SLOTS};
pub use server::{serve, HostSession};
pub use transport::Transport;
pub use vst2::Vst2Module;

/// Multiplier for the path checksum the parent passes as the second
/// argument.
pub const TOKEN_MULTIPLIER: u32 = 820_109;

/// Checksum over the module path, compared against the integrity token.
pub fn path_token(path: &str) -> u32 {
    path.bytes()
        .fold(0u32, |sum, b| sum.wrapping_add((b as u32).wrapping_mul(TOKEN_MULTIPLIER)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_token_matches_reference_sum() {
        // "ab" = (97 + 98) * 820109
        assert_eq!(path_token("ab"), 195u32.wrapping_mul(TOKEN_MULTIPLIER));
        assert_eq!(path_token(""), 0);
    }

    #[test]
    fn test_path_token_is_order_insensitive_by_construction() {
        // The reference checksum is a plain sum; both spellings collide.
        assert_eq!(path_token("ab"), path_token("ba"));
    }
}
