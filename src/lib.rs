//! # cilsil - CIL to SIL translation
//!
//! Translates .NET CIL method bodies into a SIL-style intermediate representation: one
//! control-flow graph per method, with typed load/store/prune/call instructions, serialized as
//! JSON for a downstream static analyzer.
//!
//! ## Features
//!
//! - **Symbolic stack translation** - CIL's operand stack is replaced by expressions and
//!   temporaries, so the graph only contains memory effects
//! - **Exception flow** - try/catch/finally regions become explicit exceptional edges, type-test
//!   prune pairs and a shared finally body
//! - **Bounded work** - loops close over memoized nodes, with a visit threshold and an iteration
//!   cap per method
//! - **Parallel batches** - independent methods are translated on a rayon pool and merged in
//!   input order
//!
//! ## Quick Start
//!
//! ```rust
//! use cilsil::bytecode::Program;
//! use cilsil::translate::{TranslateOptions, Translator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let program = Program::from_json(r#"{"methods": []}"#)?;
//! let translator = Translator::new(TranslateOptions::default());
//! let report = translator.translate_program(&program);
//!
//! assert_eq!(report.translated(), 0);
//! let json = report.cfg.to_json()?;
//! assert!(json.contains("\"procs\""));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! bytecode::Program ──► translate::Translator ──► ir::Cfg ──► JSON
//!                          │
//!                          ├─ ProgramState      (operand stack, work-stack, memo)
//!                          ├─ ExceptionAnalyzer (protected regions of one method)
//!                          └─ opcode handlers   (one per OpcodeFamily)
//! ```
//!
//! - [`bytecode`] - method bodies as handed over by a metadata reader
//! - [`translate`] - the worklist translator and batch driver
//! - [`ir`] - expressions, types, instructions, nodes and the aggregate graph
//! - [`error`] - the crate error type and its severity classification

/// Version of the translator
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bytecode;
pub mod error;
pub mod ir;
pub mod translate;

// Re-export main types
pub use error::{Error, ErrorSeverity, Result};
pub use ir::Cfg;
pub use translate::{TranslateOptions, TranslationReport, Translator};
