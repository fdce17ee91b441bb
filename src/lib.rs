//! jitcore is the lifecycle and scheduling core of a just-in-time compiler.
//!
//! It sits between "this method should be compiled" and "this compiled code is safely retired":
//!
//! * [`compiler`]: compile tasks, per-tier compile queues, the [`CompileBroker`] that accepts
//!   compile requests, and the worker threads that run an external [`CodeGenerator`].
//! * [`code`]: compiled artifacts and their lifecycle states, the [`CodeCache`] that owns them,
//!   and the lock-free root marking protocol a concurrent garbage collector uses on them.
//! * [`JitCore`]: one instance tying both together, built by a [`JitCoreBuilder`].
//!
//! Code generation, the execution engine, and the garbage collector itself are outside this
//! crate.  They plug in through [`CodeGenerator`], [`OopsDoProcessor`](code::OopsDoProcessor) and
//! the closures passed to the code cache.
//!
//! [`CompileBroker`]: compiler::CompileBroker
//! [`CodeGenerator`]: codegen::CodeGenerator
//! [`CodeCache`]: code::CodeCache

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod build_info;
pub mod code;
pub mod codegen;
pub mod compiler;
mod jitcore;
pub mod method;
pub mod util;

pub use crate::jitcore::{JitCore, JitCoreBuilder};
