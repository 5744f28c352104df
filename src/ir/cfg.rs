//! Graph aggregate across all procedures

use super::expr::ProcedureName;
use super::node::{CfgNode, NodeId};
use super::procedure::ProcedureDescription;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

/// Character written in place of any non-ASCII output character
pub const NON_ASCII_PLACEHOLDER: char = '_';

/// Run-wide node and procedure id counters
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: AtomicI64,
    next_proc: AtomicI64,
}

/// Counter values at the start of a procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCheckpoint {
    pub node: i64,
    pub proc: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_node_id(&self) -> NodeId {
        self.next_node.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_proc_id(&self) -> i64 {
        self.next_proc.fetch_add(1, Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> IdCheckpoint {
        IdCheckpoint {
            node: self.next_node.load(Ordering::SeqCst),
            proc: self.next_proc.load(Ordering::SeqCst),
        }
    }

    /// Return the ids allocated since `checkpoint`.
    ///
    /// A counter is only rewound when everything allocated after the checkpoint belongs to the
    /// caller. Otherwise the ids are left as a gap. Returns whether both counters were rewound.
    pub fn rollback(&self, checkpoint: IdCheckpoint, nodes_allocated: i64, procs_allocated: i64) -> bool {
        let nodes = self
            .next_node
            .compare_exchange(
                checkpoint.node + nodes_allocated,
                checkpoint.node,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        let procs = self
            .next_proc
            .compare_exchange(
                checkpoint.proc + procs_allocated,
                checkpoint.proc,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        nodes && procs
    }
}

/// All translated procedures and their nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cfg {
    pub procs: BTreeMap<String, ProcedureDescription>,
    pub nodes: Vec<CfgNode>,
    pub priority_set: Vec<ProcedureName>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_procedure(&self, signature: &str) -> bool {
        self.procs.contains_key(signature)
    }

    /// Add a finished procedure with its nodes
    pub fn register_procedure(
        &mut self,
        signature: impl Into<String>,
        proc: ProcedureDescription,
        nodes: Vec<CfgNode>,
    ) -> Result<()> {
        let signature = signature.into();
        if self.procs.contains_key(&signature) {
            return Err(Error::DuplicateProcedure { name: signature });
        }
        self.nodes.extend(nodes);
        self.procs.insert(signature, proc);
        Ok(())
    }

    /// Drop every node owned by the procedure
    pub fn deregister_procedure_nodes(&mut self, proc_id: i64) {
        self.nodes.retain(|n| n.proc_id != proc_id);
    }

    pub fn node(&self, id: NodeId) -> Option<&CfgNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes of one procedure, in registration order
    pub fn procedure_nodes<'a>(&'a self, proc: &'a ProcedureDescription) -> Vec<&'a CfgNode> {
        let index: HashMap<NodeId, &CfgNode> = self.nodes.iter().map(|n| (n.id, n)).collect();
        proc.pd_nodes
            .iter()
            .filter_map(|id| index.get(id).copied())
            .collect()
    }

    /// Find a procedure whose signature contains `fragment`
    pub fn find_procedure(&self, fragment: &str) -> Option<&ProcedureDescription> {
        self.procs
            .iter()
            .find(|(sig, _)| sig.contains(fragment))
            .map(|(_, p)| p)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write ASCII-only JSON
    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<()> {
        let json = to_ascii(&self.to_json()?);
        writer.write_all(json.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Write ASCII-only JSON to `path`, replacing any existing file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_json(std::io::BufWriter::new(file))
    }

    /// Text dump restricted to procedures whose signature contains one of `filter`
    pub fn to_string_filtered(&self, filter: &[&str]) -> String {
        self.procs
            .iter()
            .filter(|(sig, _)| filter.is_empty() || filter.iter().any(|f| sig.contains(f)))
            .map(|(sig, proc)| format!("{}\n===============\n{}", sig, self.procedure_text(proc)))
            .collect::<Vec<_>>()
            .join("\n\n\n")
    }

    /// Attributes followed by each node of the procedure
    pub fn procedure_text(&self, proc: &ProcedureDescription) -> String {
        let mut parts = vec![proc.pd_attributes.to_string()];
        parts.extend(self.procedure_nodes(proc).iter().map(|n| n.to_string()));
        parts.join("\n\n")
    }
}

/// Replace every non-ASCII character with the placeholder
pub fn to_ascii(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c } else { NON_ASCII_PLACEHOLDER })
        .collect()
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_filtered(&[]))
    }
}
