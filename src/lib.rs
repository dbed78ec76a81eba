//! LexFlow core: an interpreter for a visual dataflow/control-flow
//! language. Node graphs (JSON or YAML) are preprocessed, lowered to a
//! linear instruction form, and executed by an async, concurrency-aware
//! runtime — variables and lexical scopes, stack-based evaluation, opcode
//! dispatch, cross-workflow calls, background tasks, bounded channels,
//! timeouts, and fork/join.
//!
//! The top-level entry point is [`engine::Engine`]; programs are produced
//! by [`compiler::Parser`].

pub mod channel;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod opcodes;
pub mod output;
pub mod program;
pub mod runtime;
pub mod tasks;
pub mod value;

pub use compiler::Parser;
pub use engine::{Engine, EngineConfig};
pub use error::{LexFlowError, Result};
pub use program::Program;
pub use value::Value;
