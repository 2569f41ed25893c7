//! Coral Shell: guest command set for the coral virtual-machine bridge.
//!
//! This crate is the "virtual machine implementation" the host engine loads:
//! a small POSIX-like shell (lexer, parser, evaluator) plus the builtin
//! commands available inside the sandbox. The guest is fully isolated from
//! the host — every filesystem operation goes through the [`GuestFs`]
//! callback trait, and host-side actions can only be requested by writing
//! files into the reserved request directory (see the `subagent` builtin).

pub mod builtins;
mod fs;
mod interp;
mod parser;

#[cfg(test)]
pub(crate) mod testing;

pub use builtins::{Builtin, CommandSet, RPC_REQUEST_DIR};
pub use fs::{FsError, GuestEntry, GuestFs, GuestMetadata, resolve_path};
pub use interp::{
    CommandCtx, EXIT_COMMAND_NOT_FOUND, EXIT_SYNTAX_ERROR, Interpreter, OutputBuffer, ShellLimits,
    ShellOutput,
};
pub use parser::{
    AndOrList, Connector, ParseError, Pipeline, RedirKind, Redirect, SimpleCommand, parse,
};
