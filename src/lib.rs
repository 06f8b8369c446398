//! Source-to-source compiler that memoizes reactive functions. Input and
//! output are ESTree-shaped JSON ASTs; in between, functions are lowered to
//! a CFG-based HIR, run through SSA and effect/range inference, carved into
//! reactive scopes, rebuilt as a structured tree, and emitted with per-scope
//! cache guards over a `useMemoCache` slot array.

pub mod ast;
pub mod codegen;
pub mod diagnostics;
pub mod environment;
pub mod hir;
pub mod index;
pub mod inference;
pub mod pipeline;
pub mod reactive;
pub mod ssa;

pub use diagnostics::{CompilerError, ErrorCategory};
pub use environment::{Config, Environment, GatingConfig};
pub use pipeline::{
    compile, compile_declaration, compile_with_snapshots, PassSnapshot, SnapshotKind,
};
