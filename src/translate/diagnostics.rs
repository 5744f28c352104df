//! Run-wide counts of instructions that stopped a translation

use crate::error::Error;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Key recorded for methods abandoned over their exception handlers
pub const UNHANDLED_EXCEPTION_KEY: &str = "unhandled-exception";

/// Thread-safe tally of unknown instructions, keyed by mnemonic
#[derive(Debug, Default)]
pub struct UnknownInstructionCounter {
    counts: DashMap<String, usize>,
}

impl UnknownInstructionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: impl Into<String>) {
        *self.counts.entry(key.into()).or_insert(0) += 1;
    }

    /// Record the instruction behind `error`, if it names one
    pub fn record_error(&self, error: &Error) {
        match error {
            Error::UnsupportedOpcode { opcode, .. } | Error::InvalidOperand { opcode, .. } => {
                self.record(opcode.as_str())
            }
            Error::UnsupportedExceptionHandler { .. } | Error::UnsupportedExceptionNesting { .. } => {
                self.record(UNHANDLED_EXCEPTION_KEY)
            }
            _ => {}
        }
    }

    pub fn get(&self, key: &str) -> usize {
        self.counts.get(key).map_or(0, |c| *c)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sorted copy of the counts
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn clear(&self) {
        self.counts.clear();
    }
}
