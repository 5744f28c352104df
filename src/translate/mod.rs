//! # Translation driver
//!
//! Turns method bodies into procedures of the shared [`Cfg`]. Each method is translated by a
//! worklist over its instructions; independent methods run on a rayon pool and are merged back
//! in input order.
//!
//! ```text
//! Program ──► skip filter ──► translate_method (per method, parallel)
//!                                   │
//!                                   ├─ ProgramState (stack, work-stack, memo, node arena)
//!                                   ├─ translate_instruction (one handler per opcode family)
//!                                   └─ finalize | rollback
//!                                                  │
//!                           ordered merge ──► TranslationReport { cfg, failures, ... }
//! ```

mod diagnostics;
mod exception_flow;
pub mod exceptions;
mod parsers;
pub mod stack;
pub mod state;

pub use diagnostics::{UnknownInstructionCounter, UNHANDLED_EXCEPTION_KEY};
pub use parsers::translate_instruction;
pub use state::{procedure_name, ProgramState};

use crate::bytecode::{MethodDef, Program, TypeTable};
use crate::error::{Error, ErrorSeverity, Result};
use crate::ir::expr::THIS_IDENTIFIER;
use crate::ir::node::DEFAULT_BLOCK_END_OFFSET;
use crate::ir::{
    Cfg, CfgNode, Expression, IdAllocator, IdentKind, Instruction, NodeId, NodeKind,
    ProcedureDescription, StatementNodeKind, Typ,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const BOOLEAN_TYPE_NAME: &str = "System.Boolean";

/// Translation limits and switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateOptions {
    /// Memo entries allowed per offset before a method is abandoned
    pub visit_threshold: usize,
    /// Worklist iterations allowed per method
    pub max_iterations: usize,
    /// Worker threads (default: num_cpus)
    pub max_parallelism: usize,
    pub parallel: bool,
    /// Store `false` into boolean fields at the start of constructors
    pub initialize_boolean_fields: bool,
    pub skip_methods_without_debug_info: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            visit_threshold: 1000,
            max_iterations: 100_000,
            max_parallelism: num_cpus::get(),
            parallel: true,
            initialize_boolean_fields: true,
            skip_methods_without_debug_info: true,
        }
    }
}

impl TranslateOptions {
    /// Options from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sequential translation, for reproducible ids
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// A finished procedure, ready to be merged into a [`Cfg`]
#[derive(Debug, Clone)]
pub struct TranslatedProcedure {
    pub signature: String,
    pub procedure: ProcedureDescription,
    pub nodes: Vec<CfgNode>,
}

/// A method that was attempted and abandoned
#[derive(Debug, Clone, Serialize)]
pub struct MethodFailure {
    pub method: String,
    pub error: String,
    pub severity: ErrorSeverity,
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct TranslationReport {
    pub cfg: Cfg,
    pub failures: Vec<MethodFailure>,
    /// Signatures skipped without an attempt
    pub skipped: Vec<String>,
    pub unknown_instructions: BTreeMap<String, usize>,
    /// Methods abandoned by the visit threshold or the iteration cap
    pub timed_out: usize,
}

impl TranslationReport {
    pub fn translated(&self) -> usize {
        self.cfg.procs.len()
    }

    /// Whether any failure points at a translator bug
    pub fn has_fatal(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.severity == ErrorSeverity::Fatal)
    }
}

/// Batch translator; owns the run-wide id counters and diagnostics
pub struct Translator {
    options: TranslateOptions,
    ids: IdAllocator,
    unknown: UnknownInstructionCounter,
}

impl Translator {
    pub fn new(options: TranslateOptions) -> Self {
        Self {
            options,
            ids: IdAllocator::new(),
            unknown: UnknownInstructionCounter::new(),
        }
    }

    pub fn options(&self) -> &TranslateOptions {
        &self.options
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn unknown_instructions(&self) -> &UnknownInstructionCounter {
        &self.unknown
    }

    /// Translate one method. On failure every id it took is given back when possible.
    pub fn translate_method(&self, method: &MethodDef, types: &TypeTable) -> Result<TranslatedProcedure> {
        let result = self.translate_body(method, types);
        if let Err(e) = &result {
            self.unknown.record_error(e);
        }
        result
    }

    fn translate_body(&self, method: &MethodDef, types: &TypeTable) -> Result<TranslatedProcedure> {
        let signature = method.signature();
        if self.options.skip_methods_without_debug_info && !method.has_debug_info() {
            return Err(Error::MissingDebugInfo { name: signature });
        }
        tracing::debug!("Translating {}", signature);

        let mut state = ProgramState::new(method, types, &self.ids, self.options.visit_threshold)?;
        if let Err(e) = run_worklist(&mut state, &self.options) {
            if !state.rollback() {
                tracing::debug!("Ids of {} left as a gap", signature);
            }
            return Err(e);
        }
        let (procedure, nodes) = state.finalize();
        Ok(TranslatedProcedure {
            signature,
            procedure,
            nodes,
        })
    }

    /// Translate every method of `program` into one graph
    pub fn translate_program(&self, program: &Program) -> TranslationReport {
        tracing::info!("Translating {} methods", program.methods.len());
        let mut report = TranslationReport::default();

        // Step 1: skips are decided in input order so duplicates resolve deterministically
        let mut seen = HashSet::new();
        let mut work = Vec::with_capacity(program.methods.len());
        for method in &program.methods {
            let signature = method.signature();
            if !seen.insert(signature.clone()) {
                tracing::warn!("Method with duplicate full name found: {}", signature);
                report.skipped.push(signature);
            } else if self.options.skip_methods_without_debug_info && !method.has_debug_info() {
                tracing::warn!("Skipping method without debug information: {}", signature);
                report.skipped.push(signature);
            } else {
                work.push(method);
            }
        }

        // Step 2: translate
        let outcomes = if self.options.parallel && work.len() > 1 {
            self.translate_parallel(&work, &program.types)
        } else {
            work.iter()
                .map(|m| self.translate_method(m, &program.types))
                .collect()
        };

        // Step 3: merge in input order
        for (method, outcome) in work.iter().zip(outcomes) {
            let merged = outcome.and_then(|t| {
                report
                    .cfg
                    .register_procedure(t.signature, t.procedure, t.nodes)
            });
            if let Err(e) = merged {
                report.record_failure(method.signature(), e);
            }
        }

        report.unknown_instructions = self.unknown.snapshot();
        tracing::info!(
            "Translated {} methods, {} failed, {} skipped, {} timed out",
            report.translated(),
            report.failures.len(),
            report.skipped.len(),
            report.timed_out
        );
        report
    }

    fn translate_parallel(&self, work: &[&MethodDef], types: &TypeTable) -> Vec<Result<TranslatedProcedure>> {
        let threads = match self.options.max_parallelism {
            0 => num_cpus::get(),
            n => n,
        };
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(threads.min(work.len()))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!("Failed to create thread pool, translating sequentially: {}", e);
                return work.iter().map(|m| self.translate_method(m, types)).collect();
            }
        };

        let finished = Mutex::new(BTreeMap::new());
        pool.install(|| {
            work.par_iter().enumerate().for_each(|(i, method)| {
                let outcome = self.translate_method(method, types);
                finished.lock().insert(i, outcome);
            })
        });
        finished.into_inner().into_values().collect()
    }
}

impl TranslationReport {
    fn record_failure(&mut self, method: String, error: Error) {
        let severity = error.classify();
        match severity {
            ErrorSeverity::Fatal => tracing::error!("Translation of {} failed: {:?}", method, error),
            _ => tracing::warn!("Abandoning {}: {}", method, error),
        }
        if matches!(
            error,
            Error::VisitThresholdExceeded { .. } | Error::IterationLimitExceeded { .. }
        ) {
            self.timed_out += 1;
        }
        self.failures.push(MethodFailure {
            method,
            error: error.to_string(),
            severity,
        });
    }
}

/// Translate the body of the method held by `state`
fn run_worklist(state: &mut ProgramState<'_>, options: &TranslateOptions) -> Result<()> {
    let method = state.method;
    if method.is_abstract || method.instructions.is_empty() {
        return Ok(());
    }

    let init = if options.initialize_boolean_fields && method.reference.is_constructor() {
        initialize_boolean_fields(state)?
    } else {
        None
    };
    state.push_continuation(0, init);

    let mut iterations = 0;
    while let Some(index) = state.pop_continuation() {
        iterations += 1;
        if iterations > options.max_iterations {
            return Err(Error::IterationLimitExceeded {
                limit: options.max_iterations,
            });
        }
        let instr = method
            .instructions
            .get(index)
            .ok_or_else(|| Error::translation(format!("no instruction at index {}", index)))?;

        if let Some(node) = state.find_reusable(instr.offset)? {
            let previous = state.previous;
            state.link(previous, node);
            continue;
        }
        state.begin_instruction();
        translate_instruction(state, instr)?;
    }
    Ok(())
}

/// `n = *&this` followed by `n.f = 0` for each instance boolean field
fn initialize_boolean_fields(state: &mut ProgramState<'_>) -> Result<Option<NodeId>> {
    let method = state.method;
    let fields: Vec<_> = method
        .declaring_fields
        .iter()
        .filter(|f| !f.is_static && f.field_type.full_name() == BOOLEAN_TYPE_NAME)
        .collect();
    if fields.is_empty() {
        return Ok(None);
    }

    let this = state.fresh_identifier(IdentKind::Normal);
    let mut instructions = vec![Instruction::load(
        this.clone(),
        state.local_expression(THIS_IDENTIFIER),
        Typ::from_type_ref(&method.reference.declaring_type)?,
        state.location.clone(),
    )];
    for field in fields {
        instructions.push(Instruction::store(
            parsers::field_expression(Expression::var(this.clone()), field)?,
            Expression::int(0),
            Typ::from_type_ref_no_pointer(&field.declaring_type)?,
            state.location.clone(),
        ));
    }

    let mut node = state.new_node(NodeKind::statement(StatementNodeKind::MethodBody));
    node.instructions = instructions;
    let id = state.register_untracked_node(node);
    if let Some(node) = state.node_mut(id) {
        node.block_end_offset = DEFAULT_BLOCK_END_OFFSET;
    }
    Ok(Some(id))
}
