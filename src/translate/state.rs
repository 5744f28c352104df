//! Per-method translation state
//!
//! Holds the symbolic operand stack, the continuation work-stack and the node arena of the
//! procedure being built. Nodes are owned here until [`ProgramState::finalize`] hands them
//! over; an abandoned procedure is dropped with [`ProgramState::rollback`].

use super::exception_flow::{ExceptionFlow, PendingKey};
use super::exceptions::{ExceptionAnalyzer, RegionMapping};
use super::stack::{is_sub_stack_of, ProgramStack, StackEntry};
use crate::bytecode::{Instruction as CilInstruction, MethodDef, MethodRef, SequencePoint, TypeTable};
use crate::error::{Error, Result};
use crate::ir::instruction::SYNTHETIC_LINE;
use crate::ir::node::DEFAULT_BLOCK_END_OFFSET;
use crate::ir::procedure::VariableDescription;
use crate::ir::{
    BinopKind, CfgNode, Expression, IdAllocator, IdCheckpoint, IdentKind, Identifier,
    Instruction, Local, Location, NodeId, NodeKind, ProcedureAttributes, ProcedureDescription,
    ProcedureName, StatementNodeKind, Typ,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Finally body a continuation belongs to, if any
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReplayContext {
    #[default]
    Normal,
    Finally(usize),
}

/// Deferred translation of one instruction
#[derive(Debug, Clone)]
pub struct Continuation {
    pub index: usize,
    pub previous: NodeId,
    pub stack: ProgramStack,
    pub append: bool,
    pub replay: ReplayContext,
}

#[derive(Debug, Clone)]
struct MemoEntry {
    node: NodeId,
    stack: ProgramStack,
    block_end: i32,
    replay: ReplayContext,
}

pub struct ProgramState<'a> {
    pub method: &'a MethodDef,
    pub types: &'a TypeTable,
    pub proc_name: ProcedureName,
    pub handlers: ExceptionAnalyzer,
    pub(crate) flow: ExceptionFlow,
    attributes: ProcedureAttributes,

    ids: &'a IdAllocator,
    checkpoint: IdCheckpoint,
    nodes_allocated: i64,
    proc_id: i64,
    nodes: Vec<CfgNode>,
    node_index: HashMap<NodeId, usize>,
    pub start: NodeId,
    pub exit: NodeId,
    pub sink: NodeId,

    /// Node the next registered node is linked from
    pub previous: NodeId,
    /// Add the next method-body instructions to `previous` instead of a new node
    pub append: bool,
    pub replay: ReplayContext,
    pub location: Location,
    stack: ProgramStack,
    continuations: Vec<Continuation>,
    current: usize,
    parsed: Vec<String>,

    memo: HashMap<i32, Vec<MemoEntry>>,
    remember_node: bool,
    stack_before: ProgramStack,
    visit_threshold: usize,

    next_temp: i32,
    next_synthetic: usize,
    /// Boxed type last stored into a local
    pub boxed_locals: HashMap<u16, Typ>,
    /// Locals holding an `isinst` result
    pub isinst_locals: HashSet<u16>,
}

impl<'a> ProgramState<'a> {
    pub fn new(
        method: &'a MethodDef,
        types: &'a TypeTable,
        ids: &'a IdAllocator,
        visit_threshold: usize,
    ) -> Result<Self> {
        let handlers = ExceptionAnalyzer::new(method)?;
        let proc_name = procedure_name(&method.reference);

        let mut formals = Vec::new();
        if method.reference.has_this {
            formals.push(VariableDescription {
                name: crate::ir::expr::THIS_IDENTIFIER.to_string(),
                ty: Typ::from_type_ref(&method.reference.declaring_type)?,
            });
        }
        for p in &method.reference.parameters {
            formals.push(VariableDescription {
                name: p.name.clone(),
                ty: Typ::from_type_ref(&p.ty)?,
            });
        }

        let location = method
            .sequence_points
            .first()
            .and_then(|sp| location_of(sp))
            .unwrap_or_default();
        let exit_location = method
            .sequence_points
            .get(1)
            .and_then(|sp| location_of(sp))
            .unwrap_or_else(|| location.clone());

        let mut attributes = ProcedureAttributes::new(proc_name.clone(), location.clone());
        attributes.access = method.access;
        attributes.formals = formals;
        attributes.ret_type = Typ::from_type_ref(&method.reference.return_type)?;
        attributes.is_abstract = method.is_abstract;

        let proc_id = ids.next_proc_id();
        let start_node = CfgNode::new(ids.next_node_id(), proc_id, NodeKind::StartNode, location.clone());
        let exit_node = CfgNode::new(ids.next_node_id(), proc_id, NodeKind::ExitNode, exit_location);
        let sink_node = CfgNode::new(
            ids.next_node_id(),
            proc_id,
            NodeKind::statement(StatementNodeKind::ExceptionsSink),
            location.clone(),
        );
        let checkpoint = IdCheckpoint {
            node: start_node.id,
            proc: proc_id,
        };

        let mut state = ProgramState {
            method,
            types,
            proc_name,
            handlers,
            flow: ExceptionFlow::default(),
            attributes,
            ids,
            checkpoint,
            nodes_allocated: 3,
            proc_id,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            start: start_node.id,
            exit: exit_node.id,
            sink: sink_node.id,
            previous: start_node.id,
            append: false,
            replay: ReplayContext::Normal,
            location,
            stack: Vec::new(),
            continuations: Vec::new(),
            current: 0,
            parsed: Vec::new(),
            memo: HashMap::new(),
            remember_node: false,
            stack_before: Vec::new(),
            visit_threshold,
            next_temp: 0,
            next_synthetic: 0,
            boxed_locals: HashMap::new(),
            isinst_locals: HashSet::new(),
        };
        state.add_node(start_node);
        state.add_node(exit_node);
        state.add_node(sink_node);
        Ok(state)
    }

    // ---- identifiers -------------------------------------------------------------------

    /// Fresh temporary; stamps are never reused within the procedure
    pub fn fresh_identifier(&mut self, kind: IdentKind) -> Identifier {
        let id = Identifier::new(kind, self.next_temp);
        self.next_temp += 1;
        id
    }

    /// Fresh `bcvar<n>` name
    pub fn synthetic_name(&mut self) -> String {
        let name = format!("{}{}", crate::ir::expr::SYNTHETIC_IDENTIFIER, self.next_synthetic);
        self.next_synthetic += 1;
        name
    }

    // ---- operand stack -----------------------------------------------------------------

    pub fn push(&mut self, expression: Expression, ty: Typ) {
        self.stack.push((expression, ty));
    }

    pub fn pop(&mut self) -> Result<StackEntry> {
        match self.stack.pop() {
            Some(entry) => Ok(entry),
            None => Err(self.underflow()),
        }
    }

    pub fn peek(&self) -> Result<&StackEntry> {
        match self.stack.last() {
            Some(entry) => Ok(entry),
            None => Err(self.underflow()),
        }
    }

    /// Pop `count` entries, returned bottom first
    pub fn pop_many(&mut self, count: usize) -> Result<Vec<StackEntry>> {
        if self.stack.len() < count {
            return Err(self.underflow());
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn stack(&self) -> &[StackEntry] {
        &self.stack
    }

    /// Pop right then left operand and combine them.
    ///
    /// `Gt` on an `isinst` result yields the result itself, `Gt` against null is a non-null
    /// test. The combined value takes the right operand's type.
    pub fn pop_two_and_apply_binop(&mut self, kind: BinopKind) -> Result<StackEntry> {
        let (right, right_type) = self.pop()?;
        let (left, left_type) = self.pop()?;
        if kind == BinopKind::Gt && left_type.is_isinst_result() {
            return Ok((left, left_type));
        }
        let kind = if kind == BinopKind::Gt && right.is_null() {
            BinopKind::Ne
        } else {
            kind
        };
        Ok((Expression::binop(kind, left, right), right_type))
    }

    /// Push a fresh temporary holding `*expression` and return the load
    pub fn push_and_load(&mut self, expression: Expression, ty: Typ) -> Instruction {
        let id = self.fresh_identifier(IdentKind::Normal);
        self.push(Expression::var(id.clone()), ty.clone());
        Instruction::load(id, expression, ty, self.location.clone())
    }

    fn underflow(&self) -> Error {
        Error::StackUnderflow {
            method: self.method.signature(),
            instruction: self
                .method
                .instructions
                .get(self.current)
                .map(|i| i.to_string())
                .unwrap_or_default(),
            location: self.location.to_string(),
            parsed: self.parsed.clone(),
            procedure: self.procedure_text(),
        }
    }

    // ---- work-stack --------------------------------------------------------------------

    /// Schedule the instruction at `index`, snapshotting the current stack
    pub fn push_continuation(&mut self, index: usize, previous: Option<NodeId>) {
        self.continuations.push(Continuation {
            index,
            previous: previous.unwrap_or(self.previous),
            stack: self.stack.clone(),
            append: self.append,
            replay: self.replay,
        });
    }

    pub fn push_continuation_with(&mut self, continuation: Continuation) {
        self.continuations.push(continuation);
    }

    /// Schedule the instruction following the current one
    pub fn push_next(&mut self, previous: Option<NodeId>) -> Result<()> {
        let next = self.current + 1;
        if next >= self.method.instructions.len() {
            let offset = self.current_offset();
            return Err(Error::translation(format!(
                "control falls off the end of the method after IL_{:04x}",
                offset
            )));
        }
        self.push_continuation(next, previous);
        Ok(())
    }

    pub fn has_continuation(&self) -> bool {
        !self.continuations.is_empty()
    }

    /// Restore the next continuation; returns its instruction index
    pub fn pop_continuation(&mut self) -> Option<usize> {
        let c = self.continuations.pop()?;
        self.previous = c.previous;
        self.stack = c.stack;
        self.append = c.append;
        self.replay = c.replay;
        self.current = c.index;
        if let Some(instr) = self.method.instructions.get(c.index) {
            if let Some(location) = self.method.sequence_point(instr.offset).and_then(location_of) {
                self.location = location;
            }
            self.parsed.push(instr.to_string());
        }
        Some(c.index)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_instruction(&self) -> Option<&'a CilInstruction> {
        self.method.instructions.get(self.current)
    }

    pub fn current_offset(&self) -> i32 {
        self.current_instruction().map_or(-1, |i| i.offset)
    }

    pub fn index_of(&self, offset: i32) -> Result<usize> {
        self.method
            .index_of_offset(offset)
            .ok_or(Error::MissingInstruction { offset })
    }

    /// Instructions translated so far, in visit order
    pub fn parsed_instructions(&self) -> &[String] {
        &self.parsed
    }

    // ---- memo ------------------------------------------------------------------------

    /// Called before an instruction is dispatched
    pub fn begin_instruction(&mut self) {
        self.remember_node = true;
        self.stack_before = self.stack.clone();
    }

    /// Node previously created at `offset` that can stand in for translating it again
    pub fn find_reusable(&self, offset: i32) -> Result<Option<NodeId>> {
        let entries = match self.memo.get(&offset) {
            Some(entries) => entries,
            None => return Ok(None),
        };
        if entries.len() > self.visit_threshold {
            return Err(Error::VisitThresholdExceeded {
                offset,
                visits: entries.len(),
            });
        }
        let block_end = self.block_end_of(self.previous);
        Ok(entries
            .iter()
            .find(|e| {
                e.block_end == block_end
                    && e.replay == self.replay
                    && is_sub_stack_of(&e.stack, &self.stack)
            })
            .map(|e| e.node))
    }

    /// Number of memo entries at `offset`
    pub fn visits(&self, offset: i32) -> usize {
        self.memo.get(&offset).map_or(0, |e| e.len())
    }

    // ---- nodes -----------------------------------------------------------------------

    /// New node of this procedure at the current location
    pub fn new_node(&mut self, kind: NodeKind) -> CfgNode {
        let id = self.next_node_id();
        CfgNode::new(id, self.proc_id, kind, self.location.clone())
    }

    pub fn next_node_id(&mut self) -> NodeId {
        self.nodes_allocated += 1;
        self.ids.next_node_id()
    }

    /// Put a node in the arena without linking it
    pub fn add_node(&mut self, node: CfgNode) -> NodeId {
        let id = node.id;
        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&CfgNode> {
        self.node_index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut CfgNode> {
        match self.node_index.get(&id) {
            Some(&i) => self.nodes.get_mut(i),
            None => None,
        }
    }

    pub fn nodes(&self) -> &[CfgNode] {
        &self.nodes
    }

    pub fn link(&mut self, from: NodeId, to: NodeId) {
        if let Some(node) = self.node_mut(from) {
            node.add_succ(to);
        }
    }

    pub fn link_exn(&mut self, from: NodeId, to: NodeId) {
        if let Some(node) = self.node_mut(from) {
            node.add_exn(to);
        }
    }

    fn block_end_of(&self, id: NodeId) -> i32 {
        self.node(id)
            .map_or(DEFAULT_BLOCK_END_OFFSET, |n| n.block_end_offset)
    }

    /// Link `node` after the previous node and record it.
    ///
    /// The first node registered while translating an instruction is memoized at that
    /// instruction's offset. The node joins the pending list of the protected region it is
    /// in, so it can later get an exceptional edge to the region's handler.
    pub fn register_node(&mut self, node: CfgNode) -> NodeId {
        self.register(node, false, true)
    }

    /// Like [`register_node`](Self::register_node), but as an exceptional successor
    pub fn register_exceptional_node(&mut self, node: CfgNode) -> NodeId {
        self.register(node, true, true)
    }

    /// Register a node that never receives exceptional edges
    pub fn register_untracked_node(&mut self, node: CfgNode) -> NodeId {
        self.register(node, false, false)
    }

    fn register(&mut self, mut node: CfgNode, exceptional: bool, track: bool) -> NodeId {
        let offset = self.current_offset();
        let previous = self.previous;
        let previous_block_end = self.block_end_of(previous);
        node.block_end_offset = self.handlers.block_end_offset(offset);
        let id = self.add_node(node);

        if exceptional {
            self.link_exn(previous, id);
        } else {
            self.link(previous, id);
        }
        if self.remember_node {
            self.memo.entry(offset).or_default().push(MemoEntry {
                node: id,
                stack: self.stack_before.clone(),
                block_end: previous_block_end,
                replay: self.replay,
            });
            self.remember_node = false;
        }
        if track {
            if let Some(key) = self.pending_key(offset) {
                self.flow.add_pending(key, id);
            }
        }
        self.append = false;
        id
    }

    /// Add instructions to the previous node when appending, else to a new MethodBody node
    pub fn add_method_body_instructions(&mut self, instructions: Vec<Instruction>) -> NodeId {
        if self.append {
            let previous = self.previous;
            if let Some(node) = self.node_mut(previous) {
                node.instructions.extend(instructions);
            }
            self.append = false;
            return previous;
        }
        let mut node = self.new_node(NodeKind::statement(StatementNodeKind::MethodBody));
        node.instructions = instructions;
        self.register_node(node)
    }

    /// Pending list a node created at `offset` belongs to
    pub(crate) fn pending_key(&self, offset: i32) -> Option<PendingKey> {
        match self.handlers.mapping(offset) {
            RegionMapping::TryToCatch { group } => Some(PendingKey::Group(group)),
            RegionMapping::TryToFinally { finally } => Some(PendingKey::Finally(finally)),
            RegionMapping::CatchToCatch { group, .. } => {
                self.handlers.arm_finally(group).map(PendingKey::Finally)
            }
            RegionMapping::FinallyToFinally { .. } | RegionMapping::None => None,
        }
    }

    // ---- procedure -----------------------------------------------------------------

    pub fn return_type(&self) -> &Typ {
        &self.attributes.ret_type
    }

    pub fn attributes(&self) -> &ProcedureAttributes {
        &self.attributes
    }

    /// Record a local on first use
    pub fn register_local(&mut self, name: &str, ty: Typ) {
        if self.attributes.find_local(name).is_none() {
            self.attributes.locals.push(Local::new(name, ty));
        }
    }

    /// Type a local was registered with
    pub fn local_type(&self, name: &str) -> Option<&Typ> {
        self.attributes.find_local(name).map(|l| &l.ty)
    }

    pub fn local_expression(&self, name: &str) -> Expression {
        Expression::lvar(crate::ir::ProgramVariable::local(name, &self.proc_name))
    }

    /// Attributes followed by every node, for diagnostics
    pub fn procedure_text(&self) -> String {
        let mut parts = vec![self.attributes.to_string()];
        parts.extend(self.nodes.iter().map(|n| n.to_string()));
        parts.join("\n\n")
    }

    /// Finish the procedure: default exceptional edges, predecessor lists, sink edge
    pub fn finalize(mut self) -> (ProcedureDescription, Vec<CfgNode>) {
        self.finish_exception_flow();

        let (start, exit, sink) = (self.start, self.exit, self.sink);
        for node in &mut self.nodes {
            if node.exn.is_empty() {
                node.exn.push(sink);
            }
            node.preds.clear();
        }
        if let Some(n) = self.node_mut(start) {
            n.exn = vec![exit];
        }
        if let Some(n) = self.node_mut(sink) {
            n.exn = vec![exit];
        }
        if let Some(n) = self.node_mut(exit) {
            n.exn.clear();
        }

        // Step: predecessors by BFS from the start node
        let mut done = HashSet::new();
        let mut todo = VecDeque::from([start]);
        while let Some(id) = todo.pop_front() {
            if !done.insert(id) {
                continue;
            }
            let (succs, first_exn) = match self.node(id) {
                Some(n) => (n.succs.clone(), n.exn.first().copied()),
                None => continue,
            };
            for s in succs {
                if let Some(succ) = self.node_mut(s) {
                    succ.add_pred(id);
                }
                todo.push_back(s);
            }
            if let Some(e) = first_exn.filter(|&e| e != sink) {
                todo.push_back(e);
            }
        }
        self.link(sink, exit);
        if let Some(n) = self.node_mut(exit) {
            n.add_pred(sink);
        }

        let proc = ProcedureDescription {
            pd_id: self.proc_id,
            pd_attributes: self.attributes,
            pd_nodes: self.nodes.iter().map(|n| n.id).collect(),
            pd_start_node: start,
            pd_exit_node: exit,
            pd_exn_node: sink,
        };
        (proc, self.nodes)
    }

    /// Give back the ids of an abandoned procedure; its nodes are dropped
    pub fn rollback(self) -> bool {
        self.ids
            .rollback(self.checkpoint, self.nodes_allocated, 1)
    }
}

/// Procedure name of a method reference
pub fn procedure_name(r: &MethodRef) -> ProcedureName {
    ProcedureName {
        method_name: r.name.clone(),
        parameters: r
            .parameters
            .iter()
            .map(|p| p.ty.compatible_full_name())
            .collect(),
        class_name: r.declaring_type.compatible_full_name(),
        return_type: r.return_type.compatible_full_name(),
        is_static: !r.has_this,
    }
}

/// Location of a sequence point; compiler-generated lines have none
fn location_of(sp: &SequencePoint) -> Option<Location> {
    (sp.start_line < SYNTHETIC_LINE).then(|| Location::new(sp.start_line, sp.start_column, sp.document.clone()))
}
