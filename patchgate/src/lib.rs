//! Guarded patch application and branch lifecycle engine.
//!
//! A planner proposes a [`Plan`](crate::core::plan::Plan): a list of file
//! operations. The engine validates it against guardrails, applies it on an
//! isolated git branch, commits, optionally verifies it with an allow-listed
//! command, and only merges into trunk once verification passes. Failed
//! applications are rolled back.
//!
//! - **[`core`]**: Pure logic (plan normalization, guardrails, line edits,
//!   naming, lifecycle transitions). No I/O.
//! - **[`io`]**: Side effects (filesystem, git, processes, records).
//!   Behind traits where tests need fakes.
//! - **[`engine`]**: Orchestrates core and io into the plan lifecycle.
//! - **[`worker`]**: Latest-wins trigger queue for front ends.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
