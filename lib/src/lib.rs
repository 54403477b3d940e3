//! Deterministic crash signature generation.
//!
//! Converts a crashing process's stack trace and crash annotations into a
//! short, stable signature string used to group crash reports by root
//! cause. Generation runs a fixed, ordered pipeline of rules over the
//! crash data: the first rule builds a base signature from the crashing
//! thread's normalized frames (or from Java exception text), and later
//! rules conditionally rewrite it for specific crash types such as OOMs,
//! aborts, shutdown hangs, and IPC errors.
//!
//! Generation is pure, synchronous, and never fails: missing input data
//! and rule faults degrade to explanatory notes on the result, with
//! `EMPTY: ...` sentinel signatures for crashes carrying no usable data.

pub use data::{parse_crashid, CrashData, Frame, InlineFrame, Thread, UnloadedModule};
pub use generator::{default_ruleset, ErrorHandler, SignatureGenerator, SignatureResult};
pub use rules::{Rule, RuleError, SIGNATURE_MAX_LENGTH};
pub use siglists::{Sentinel, SigListError, SignatureLists};

pub mod data;
mod generator;
pub mod java;
pub mod native;
pub mod rules;
pub mod siglists;
pub mod text;

/// A base signature plus the notes its tool produced, before the rule
/// pipeline applies crash-type rewrites.
#[derive(Debug)]
pub struct GeneratedSignature {
    pub signature: String,
    pub notes: Vec<String>,
    pub debug_notes: Vec<String>,
}
