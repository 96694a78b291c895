//! Bridge worker binary. Spawned by the parent host with a module path and
//! an integrity token; speaks the wire protocol on stdin/stdout until told
//! to exit, then exits with the session's final code.

use std::env;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use tracing::error;
use vst_bridge_server::{path_token, serve, BridgeError, Transport, Vst2Module};

fn main() -> ExitCode {
    // stdout carries the protocol; diagnostics go to stderr only.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    // Invocation faults are reported through the exit status alone; the
    // pipe is not touched before the token has been verified.
    let [_, module_path, token] = args.as_slice() else {
        return exit_with(BridgeError::BadInvocation.exit_code());
    };

    let Ok(cookie) = u32::from_str_radix(token.trim_start_matches("0x"), 16) else {
        return exit_with(BridgeError::MalformedToken.exit_code());
    };
    if path_token(module_path) != cookie {
        return exit_with(BridgeError::TokenMismatch.exit_code());
    }

    let mut transport = Transport::new(io::stdin().lock(), io::stdout().lock());

    let code = match Vst2Module::load(Path::new(module_path)) {
        Ok(module) => serve(module, &mut transport),
        Err(e) => {
            error!("{e}");
            let code = e.exit_code();
            transport.put_u32(code);
            transport.flush();
            code
        }
    };

    exit_with(code)
}

fn exit_with(code: u32) -> ExitCode {
    ExitCode::from(code.min(u8::MAX as u32) as u8)
}
