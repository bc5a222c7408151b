//! Root of the `anneal-core` library: the refinement engine behind the
//! tool surface. Sessions bind a repository to evaluation commands and a
//! halting policy; candidates flow through apply, evaluate, score, and
//! halt, with checkpoint/undo/baseline recovery alongside.

// Library code must not write to stdout/stderr directly; stdout is the
// transport wire and diagnostics go through `tracing`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod candidate;
pub mod context;
pub mod correlate;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fs;
pub mod git;
pub mod halt;
pub mod limits;
pub mod outputs;
pub mod path_guard;
pub mod registry;
pub mod score;
pub mod session;

pub use candidate::Candidate;
pub use engine::SessionEngine;
pub use engine::StartParams;
pub use error::EngineError;
pub use error::Result;
pub use registry::SessionRegistry;
