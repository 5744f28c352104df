//! CFG nodes
//!
//! Nodes reference each other by id. The owning procedure keeps them in an arena, so cycles
//! (loops, exception edges back into handlers) need no shared ownership.

use super::expr::{Identifier, ProgramVariable};
use super::instruction::{IfKind, Instruction, Location};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier, unique across the whole run
pub type NodeId = i64;

/// Block end offset of nodes outside any protected region
pub const DEFAULT_BLOCK_END_OFFSET: i32 = -1;

fn default_block_end_offset() -> i32 {
    DEFAULT_BLOCK_END_OFFSET
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementNodeKind {
    AssertionFailure,
    BetweenJoinAndExit,
    BinaryConditionalStmtInit,
    BinaryOperatorStmt,
    Call,
    CallObjCNew,
    ClassCastException,
    ConditionalStmtBranch,
    ConstructorInit,
    CXXDynamicCast,
    CXXNewExpr,
    CXXStdInitializerListExpr,
    CXXTypeidExpr,
    DeclStmt,
    DefineBody,
    Destruction,
    ExceptionHandler,
    ExceptionsSink,
    FallbackNode,
    FinallyBranch,
    GCCAsmStmt,
    GenericSelectionExpr,
    IfStmtBranch,
    InitializeDynamicArrayLength,
    InitListExp,
    MessageCall,
    MethodBody,
    MonitorEnter,
    MonitorExit,
    ObjCCPPThrow,
    OutOfBound,
    ReturnStmt,
    Skip,
    SwitchStmt,
    ThisNotNull,
    Throw,
    ThrowNPE,
    UnaryOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PruneNodeKind {
    ExceptionHandler,
    TrueBranch,
    FalseBranch,
    InBound,
    IsInstance,
    MethodBody,
    NotNull,
}

/// Node kind with its kind-specific payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "nd_kind")]
pub enum NodeKind {
    StartNode,
    ExitNode,
    StatementNode {
        stmt_node_kind: StatementNodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stmt_node_comment: Option<String>,
    },
    JoinNode,
    PruneNode {
        true_branch: bool,
        prune_node_kind: PruneNodeKind,
        if_kind: IfKind,
    },
    SkipNode {
        skip_node_comment: String,
    },
}

impl NodeKind {
    pub fn statement(kind: StatementNodeKind) -> Self {
        NodeKind::StatementNode {
            stmt_node_kind: kind,
            stmt_node_comment: None,
        }
    }

    pub fn commented(kind: StatementNodeKind, comment: impl Into<String>) -> Self {
        NodeKind::StatementNode {
            stmt_node_kind: kind,
            stmt_node_comment: Some(comment.into()),
        }
    }

    pub fn prune(true_branch: bool, kind: PruneNodeKind, if_kind: IfKind) -> Self {
        NodeKind::PruneNode {
            true_branch,
            prune_node_kind: kind,
            if_kind,
        }
    }

    /// Label used by the text dump
    fn label(&self) -> String {
        match self {
            NodeKind::StartNode => "StartNode".to_string(),
            NodeKind::ExitNode => "ExitNode".to_string(),
            NodeKind::StatementNode { stmt_node_kind, .. } => format!("{:?}", stmt_node_kind),
            NodeKind::JoinNode => "JoinNode".to_string(),
            NodeKind::PruneNode {
                prune_node_kind, ..
            } => format!("{:?}", prune_node_kind),
            NodeKind::SkipNode { .. } => "SkipNode".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgNode {
    #[serde(rename = "nd_id")]
    pub id: NodeId,
    #[serde(rename = "nd_temps")]
    pub temps: Vec<Identifier>,
    pub nd_dead_pvars_before: Vec<ProgramVariable>,
    pub nd_dead_pvars_after: Vec<ProgramVariable>,
    #[serde(rename = "nd_exn_ids")]
    pub exn: Vec<NodeId>,
    #[serde(rename = "nd_instrs")]
    pub instructions: Vec<Instruction>,
    #[serde(rename = "nd_loc")]
    pub location: Location,
    #[serde(rename = "nd_pred_ids")]
    pub preds: Vec<NodeId>,
    #[serde(rename = "nd_succ_ids")]
    pub succs: Vec<NodeId>,
    #[serde(rename = "nd_proc_id")]
    pub proc_id: i64,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// End offset of the protected region the node was translated in
    #[serde(skip, default = "default_block_end_offset")]
    pub block_end_offset: i32,
}

impl CfgNode {
    pub fn new(id: NodeId, proc_id: i64, kind: NodeKind, location: Location) -> Self {
        CfgNode {
            id,
            temps: Vec::new(),
            nd_dead_pvars_before: Vec::new(),
            nd_dead_pvars_after: Vec::new(),
            exn: Vec::new(),
            instructions: Vec::new(),
            location,
            preds: Vec::new(),
            succs: Vec::new(),
            proc_id,
            kind,
            block_end_offset: DEFAULT_BLOCK_END_OFFSET,
        }
    }

    /// Add a successor, ignoring duplicates
    pub fn add_succ(&mut self, id: NodeId) {
        if !self.succs.contains(&id) {
            self.succs.push(id);
        }
    }

    pub fn add_pred(&mut self, id: NodeId) {
        if !self.preds.contains(&id) {
            self.preds.push(id);
        }
    }

    pub fn add_exn(&mut self, id: NodeId) {
        if !self.exn.contains(&id) {
            self.exn.push(id);
        }
    }

    pub fn is_statement(&self, kind: StatementNodeKind) -> bool {
        matches!(self.kind, NodeKind::StatementNode { stmt_node_kind, .. } if stmt_node_kind == kind)
    }

    pub fn is_prune(&self) -> bool {
        matches!(self.kind, NodeKind::PruneNode { .. })
    }

    /// Clone under a new id, dropping incoming edges
    pub fn clone_with_id(&self, id: NodeId) -> Self {
        let mut node = self.clone();
        node.id = id;
        node.preds.clear();
        node
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" ")
}

impl fmt::Display for CfgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node{} preds: {} succs: {} exn: {} {}",
            self.id,
            join_ids(&self.preds),
            join_ids(&self.succs),
            join_ids(&self.exn),
            self.kind.label()
        )?;
        for instr in &self.instructions {
            write!(f, "\n{}", instr)?;
        }
        Ok(())
    }
}
