//! Exceptional control flow
//!
//! Lowers `leave`, `throw`, `rethrow` and `endfinally` into explicit nodes. A catch group gets
//! one entry node that unwraps the pending exception and tests it against each arm in turn. A
//! finally body is translated once from a head node; normal and exceptional entries store a
//! selector before jumping to the head, and the dispatch after `endfinally` branches on it.

use super::exceptions::RegionMapping;
use super::state::{Continuation, ProgramState, ReplayContext};
use crate::error::{Error, Result};
use crate::ir::expr::{
    BUILTIN_INSTANCEOF, BUILTIN_UNWRAP_EXCEPTION, CATCH_VAR_IDENTIFIER, RETURN_IDENTIFIER,
};
use crate::ir::{
    BinopKind, CallArg, CallFlags, Expression, IdentKind, Identifier, IfKind, Instruction,
    IntKind, NodeId, NodeKind, PruneNodeKind, SizeofKind, StatementNodeKind, Typ,
};
use std::collections::{BTreeMap, HashMap};
use std::mem;

/// Which handler a node inside a protected region reports to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingKey {
    Group(usize),
    Finally(usize),
}

#[derive(Debug, Clone)]
struct GroupEntry {
    primary: NodeId,
    by_site: HashMap<i32, NodeId>,
}

#[derive(Debug, Clone)]
struct Dispatch {
    join: NodeId,
    tail: NodeId,
    selector: Identifier,
}

#[derive(Debug, Clone)]
struct FinallyState {
    selector: String,
    saved_exception: String,
    head: NodeId,
    exceptional_entry: Option<NodeId>,
    /// Resume targets; selector k resumes at `targets[k - 1]`
    targets: Vec<i32>,
    dispatch: Option<Dispatch>,
}

/// Handler nodes created so far, and the nodes still waiting for an exceptional edge
#[derive(Debug, Clone, Default)]
pub struct ExceptionFlow {
    pending: BTreeMap<PendingKey, Vec<NodeId>>,
    groups: BTreeMap<usize, GroupEntry>,
    finallies: BTreeMap<usize, FinallyState>,
}

impl ExceptionFlow {
    pub fn add_pending(&mut self, key: PendingKey, node: NodeId) {
        self.pending.entry(key).or_default().push(node);
    }

    pub fn take_pending(&mut self, key: PendingKey) -> Vec<NodeId> {
        self.pending.remove(&key).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn pending(&self, key: PendingKey) -> &[NodeId] {
        self.pending.get(&key).map_or(&[], |v| v.as_slice())
    }
}

impl<'a> ProgramState<'a> {
    // ---- leave / throw / rethrow / endfinally ----------------------------------------

    /// Exit a protected region towards `target`
    pub fn leave(&mut self, target: i32) -> Result<()> {
        self.clear_stack();
        self.append = false;
        let offset = self.current_offset();

        match self.handlers.mapping(offset) {
            RegionMapping::TryToCatch { group } => {
                let entry = self.group_entry(group, offset)?;
                self.drain_pending(PendingKey::Group(group), entry);
                match self.handlers.arm_finally(group) {
                    Some(finally) if self.handlers.leaves_finally(finally, target) => {
                        self.enter_finally(finally, target)
                    }
                    _ => self.continue_at(target),
                }
            }
            RegionMapping::CatchToCatch { group, .. } => match self.handlers.arm_finally(group) {
                Some(finally) => self.leave_through_finally(finally, target),
                None => self.continue_at(target),
            },
            RegionMapping::TryToFinally { finally } => self.leave_through_finally(finally, target),
            RegionMapping::FinallyToFinally { .. } | RegionMapping::None => {
                self.continue_at(target)
            }
        }
    }

    fn leave_through_finally(&mut self, finally: usize, target: i32) -> Result<()> {
        self.drain_to_finally(finally)?;
        if self.handlers.leaves_finally(finally, target) {
            self.enter_finally(finally, target)
        } else {
            self.continue_at(target)
        }
    }

    fn continue_at(&mut self, target: i32) -> Result<()> {
        let index = self.index_of(target)?;
        self.push_continuation(index, None);
        Ok(())
    }

    /// `throw`: store the exception in the return slot and route it to its handler
    pub fn throw(&mut self) -> Result<()> {
        let (value, _) = self.pop()?;
        let mut node = self.new_node(NodeKind::statement(StatementNodeKind::Throw));
        node.instructions.push(self.store_exception(value));
        let id = self.register_node(node);
        self.route_exception(id)
    }

    /// `rethrow`: throw a fresh instance of the enclosing arm's catch type
    pub fn rethrow(&mut self) -> Result<()> {
        let offset = self.current_offset();
        let (group, arm) = match self.handlers.mapping(offset) {
            RegionMapping::CatchToCatch { group, arm } => (group, arm),
            _ => {
                return Err(Error::translation(format!(
                    "rethrow outside a catch handler at IL_{:04x}",
                    offset
                )))
            }
        };
        let catch_type = self
            .handlers
            .group(group)
            .and_then(|g| g.arms.get(arm))
            .map(|a| a.catch_type.clone())
            .ok_or_else(|| Error::translation("catch arm disappeared"))?;
        let ty = Typ::from_type_ref(&catch_type)?;
        let object = self.allocate_object(&ty);

        let mut node = self.new_node(NodeKind::statement(StatementNodeKind::Throw));
        node.instructions
            .push(self.store_exception(Expression::var(object)));
        let id = self.register_node(node);
        self.route_exception(id)
    }

    fn store_exception(&self, value: Expression) -> Instruction {
        Instruction::store(
            self.return_slot(),
            Expression::exn(value),
            self.return_type().clone(),
            self.location.clone(),
        )
    }

    fn route_exception(&mut self, node: NodeId) -> Result<()> {
        let offset = self.current_offset();
        let handler = match self.handlers.mapping(offset) {
            RegionMapping::TryToCatch { group } => {
                let entry = self.group_entry(group, offset)?;
                self.drain_pending(PendingKey::Group(group), entry);
                Some(entry)
            }
            RegionMapping::TryToFinally { finally } => Some(self.drain_to_finally(finally)?),
            RegionMapping::CatchToCatch { group, .. } => match self.handlers.arm_finally(group) {
                Some(finally) => Some(self.drain_to_finally(finally)?),
                None => None,
            },
            RegionMapping::FinallyToFinally { .. } | RegionMapping::None => None,
        };
        let exit = self.exit;
        self.link(node, handler.unwrap_or(exit));
        Ok(())
    }

    fn drain_to_finally(&mut self, finally: usize) -> Result<NodeId> {
        let entry = self.finally_exceptional_entry(finally)?;
        self.drain_pending(PendingKey::Finally(finally), entry);
        Ok(entry)
    }

    /// `endfinally`: dispatch on the selector
    pub fn end_finally(&mut self) -> Result<()> {
        let offset = self.current_offset();
        let finally = match self.handlers.mapping(offset) {
            RegionMapping::FinallyToFinally { finally } => finally,
            _ => {
                return Err(Error::translation(format!(
                    "endfinally outside a finally body at IL_{:04x}",
                    offset
                )))
            }
        };
        self.ensure_finally(finally)?;
        let (selector_name, saved_name, targets, existing) = match self.flow.finallies.get(&finally) {
            Some(s) => (
                s.selector.clone(),
                s.saved_exception.clone(),
                s.targets.clone(),
                s.dispatch.as_ref().map(|d| d.join),
            ),
            None => return Err(Error::translation("finally state missing")),
        };
        if let Some(join) = existing {
            let previous = self.previous;
            self.link(previous, join);
            return Ok(());
        }

        let selector = self.fresh_identifier(IdentKind::Normal);
        let mut join = self.new_node(NodeKind::JoinNode);
        join.instructions.push(Instruction::load(
            selector.clone(),
            self.local_expression(&selector_name),
            Typ::int(IntKind::IInt),
            self.location.clone(),
        ));
        let join = self.register_node(join);

        // Selector 0: propagate the saved exception
        let (propagate, mut tail) = self.selector_prune_pair(&selector, 0);
        self.link(join, propagate);
        self.link(join, tail);
        let saved = self.fresh_identifier(IdentKind::Normal);
        let mut throw = self.new_node(NodeKind::statement(StatementNodeKind::Throw));
        throw.instructions = vec![
            Instruction::load(
                saved.clone(),
                self.local_expression(&saved_name),
                Typ::object(),
                self.location.clone(),
            ),
            self.store_exception(Expression::var(saved)),
        ];
        let throw = self.add_node(throw);
        let exit = self.exit;
        self.link(propagate, throw);
        self.link(throw, exit);

        for (i, target) in targets.into_iter().enumerate() {
            tail = self.add_resume_arm(tail, &selector, i as i64 + 1, target)?;
        }
        if let Some(state) = self.flow.finallies.get_mut(&finally) {
            state.dispatch = Some(Dispatch {
                join,
                tail,
                selector,
            });
        }
        Ok(())
    }

    /// Prune pair on `selector == k`, returned as (true, false)
    fn selector_prune_pair(&mut self, selector: &Identifier, k: i64) -> (NodeId, NodeId) {
        let condition = Expression::binop(
            BinopKind::Eq,
            Expression::var(selector.clone()),
            Expression::int(k),
        );
        let mut on_true = self.new_node(NodeKind::prune(
            true,
            PruneNodeKind::MethodBody,
            IfKind::Ik_switch,
        ));
        on_true.instructions.push(Instruction::prune(
            condition.clone(),
            true,
            IfKind::Ik_switch,
            self.location.clone(),
        ));
        let mut on_false = self.new_node(NodeKind::prune(
            false,
            PruneNodeKind::MethodBody,
            IfKind::Ik_switch,
        ));
        on_false.instructions.push(Instruction::prune(
            Expression::lnot(condition),
            false,
            IfKind::Ik_switch,
            self.location.clone(),
        ));
        (self.add_node(on_true), self.add_node(on_false))
    }

    /// Hang a `selector == k` arm resuming at `target` off `tail`; returns the new tail
    fn add_resume_arm(
        &mut self,
        tail: NodeId,
        selector: &Identifier,
        k: i64,
        target: i32,
    ) -> Result<NodeId> {
        let index = self.index_of(target)?;
        let (resume, next) = self.selector_prune_pair(selector, k);
        self.link(tail, resume);
        self.link(tail, next);
        self.push_continuation_with(Continuation {
            index,
            previous: resume,
            stack: Vec::new(),
            append: false,
            replay: ReplayContext::Normal,
        });
        Ok(next)
    }

    // ---- finally entries ---------------------------------------------------------------

    /// Create the head of a finally body and schedule the body once
    fn ensure_finally(&mut self, finally: usize) -> Result<()> {
        if self.flow.finallies.contains_key(&finally) {
            return Ok(());
        }
        let block = self
            .handlers
            .finally(finally)
            .copied()
            .ok_or_else(|| Error::translation(format!("no finally block #{}", finally)))?;
        let index = self.index_of(block.handler.start)?;

        let selector = self.synthetic_name();
        let saved_exception = self.synthetic_name();
        self.register_local(&selector, Typ::int(IntKind::IInt));
        self.register_local(&saved_exception, Typ::object());

        let mut head = self.new_node(NodeKind::SkipNode {
            skip_node_comment: "Finally".to_string(),
        });
        head.block_end_offset = block.handler.last;
        let head = self.add_node(head);
        self.push_continuation_with(Continuation {
            index,
            previous: head,
            stack: Vec::new(),
            append: false,
            replay: ReplayContext::Finally(finally),
        });
        self.flow.finallies.insert(
            finally,
            FinallyState {
                selector,
                saved_exception,
                head,
                exceptional_entry: None,
                targets: Vec::new(),
                dispatch: None,
            },
        );
        Ok(())
    }

    /// Normal entry: record `target` as a resume selector and jump to the head
    fn enter_finally(&mut self, finally: usize, target: i32) -> Result<()> {
        self.ensure_finally(finally)?;
        let (k, is_new, selector, head, dispatch) = match self.flow.finallies.get_mut(&finally) {
            Some(state) => {
                let (k, is_new) = match state.targets.iter().position(|&t| t == target) {
                    Some(p) => (p + 1, false),
                    None => {
                        state.targets.push(target);
                        (state.targets.len(), true)
                    }
                };
                (
                    k,
                    is_new,
                    state.selector.clone(),
                    state.head,
                    state.dispatch.clone(),
                )
            }
            None => return Err(Error::translation("finally state missing")),
        };

        let mut node = self.new_node(NodeKind::statement(StatementNodeKind::FinallyBranch));
        node.instructions.push(Instruction::store(
            self.local_expression(&selector),
            Expression::int(k as i64),
            Typ::int(IntKind::IInt),
            self.location.clone(),
        ));
        let id = self.register_untracked_node(node);
        self.link(id, head);

        if let (true, Some(d)) = (is_new, dispatch) {
            let tail = self.add_resume_arm(d.tail, &d.selector, k as i64, target)?;
            if let Some(Dispatch { tail: t, .. }) = self
                .flow
                .finallies
                .get_mut(&finally)
                .and_then(|s| s.dispatch.as_mut())
            {
                *t = tail;
            }
        }
        Ok(())
    }

    /// Exceptional entry of a finally, created on first use
    fn finally_exceptional_entry(&mut self, finally: usize) -> Result<NodeId> {
        self.ensure_finally(finally)?;
        let (selector, saved, head) = match self.flow.finallies.get(&finally) {
            Some(FinallyState {
                exceptional_entry: Some(entry),
                ..
            }) => return Ok(*entry),
            Some(s) => (s.selector.clone(), s.saved_exception.clone(), s.head),
            None => return Err(Error::translation("finally state missing")),
        };

        let (mut instructions, exception) = self.unwrap_pending_exception();
        instructions.extend(self.save_for_finally(&selector, &saved, exception));
        let mut node = self.new_node(NodeKind::statement(StatementNodeKind::ExceptionHandler));
        node.instructions = instructions;
        let id = self.add_node(node);
        self.link(id, head);
        if let Some(state) = self.flow.finallies.get_mut(&finally) {
            state.exceptional_entry = Some(id);
        }
        Ok(id)
    }

    /// `bcvarE = exception; bcvarF = 0`
    fn save_for_finally(&self, selector: &str, saved: &str, exception: Identifier) -> Vec<Instruction> {
        vec![
            Instruction::store(
                self.local_expression(saved),
                Expression::var(exception),
                Typ::object(),
                self.location.clone(),
            ),
            Instruction::store(
                self.local_expression(selector),
                Expression::int(0),
                Typ::int(IntKind::IInt),
                self.location.clone(),
            ),
        ]
    }

    // ---- catch groups ------------------------------------------------------------------

    /// Entry node of a catch group as seen from `site`
    fn group_entry(&mut self, group: usize, site: i32) -> Result<NodeId> {
        let primary = match self.flow.groups.get(&group) {
            Some(entry) => {
                if let Some(&id) = entry.by_site.get(&site) {
                    return Ok(id);
                }
                entry.primary
            }
            None => {
                let primary = self.create_group_entry(group)?;
                self.flow.groups.insert(
                    group,
                    GroupEntry {
                        primary,
                        by_site: HashMap::from([(site, primary)]),
                    },
                );
                return Ok(primary);
            }
        };

        let clone = match self.node(primary) {
            Some(node) => node.clone(),
            None => return Err(Error::translation("catch entry node missing")),
        };
        let fresh = self.next_node_id();
        let id = self.add_node(clone.clone_with_id(fresh));
        if let Some(entry) = self.flow.groups.get_mut(&group) {
            entry.by_site.insert(site, id);
        }
        Ok(id)
    }

    /// Entry node plus one type-test prune pair per arm; arm bodies are scheduled
    fn create_group_entry(&mut self, group: usize) -> Result<NodeId> {
        let def = self
            .handlers
            .group(group)
            .cloned()
            .ok_or_else(|| Error::translation(format!("no catch group #{}", group)))?;

        let (instructions, exception) = self.unwrap_pending_exception();
        let mut entry = self.new_node(NodeKind::statement(StatementNodeKind::ExceptionHandler));
        entry.instructions = instructions;
        entry.block_end_offset = def.try_region.last;
        let entry = self.add_node(entry);

        let mut previous = entry;
        for arm in &def.arms {
            let catch_type = Typ::from_type_ref(&arm.catch_type)?;
            let index = self.index_of(arm.handler.start)?;
            let test = self.fresh_identifier(IdentKind::Normal);
            let instanceof = Instruction::call(
                test.clone(),
                Typ::bool(),
                Expression::fun(BUILTIN_INSTANCEOF.clone()),
                vec![
                    CallArg::new(Expression::var(exception.clone()), Typ::object()),
                    CallArg::new(
                        Expression::sizeof(catch_type.strip_pointer(), SizeofKind::instof),
                        Typ::Tvoid,
                    ),
                ],
                CallFlags::default(),
                self.location.clone(),
            );
            if let Some(node) = self.node_mut(previous) {
                node.instructions.push(instanceof);
            }

            let catch_var = format!("{}{}", CATCH_VAR_IDENTIFIER, arm.handler.start);
            self.register_local(&catch_var, catch_type.clone());

            let mut on_true = self.new_node(NodeKind::prune(
                true,
                PruneNodeKind::ExceptionHandler,
                IfKind::Ik_if,
            ));
            on_true.block_end_offset = arm.handler.last;
            on_true.instructions = vec![
                Instruction::prune(
                    Expression::var(test.clone()),
                    true,
                    IfKind::Ik_if,
                    self.location.clone(),
                ),
                Instruction::store(
                    self.local_expression(&catch_var),
                    Expression::var(exception.clone()),
                    catch_type.clone(),
                    self.location.clone(),
                ),
            ];
            let mut on_false = self.new_node(NodeKind::prune(
                false,
                PruneNodeKind::ExceptionHandler,
                IfKind::Ik_if,
            ));
            on_false.block_end_offset = arm.handler.last;
            on_false.instructions.push(Instruction::prune(
                Expression::lnot(Expression::var(test)),
                false,
                IfKind::Ik_if,
                self.location.clone(),
            ));
            let on_true = self.add_node(on_true);
            let on_false = self.add_node(on_false);
            self.link(previous, on_true);
            self.link(previous, on_false);

            self.push_continuation_with(Continuation {
                index,
                previous: on_true,
                stack: vec![(Expression::var(exception.clone()), catch_type)],
                append: false,
                replay: ReplayContext::Normal,
            });
            previous = on_false;
        }

        // No arm matched
        let onward = match def.finally {
            Some(finally) => {
                self.ensure_finally(finally)?;
                let (selector, saved, head) = match self.flow.finallies.get(&finally) {
                    Some(s) => (s.selector.clone(), s.saved_exception.clone(), s.head),
                    None => return Err(Error::translation("finally state missing")),
                };
                let mut node =
                    self.new_node(NodeKind::statement(StatementNodeKind::ExceptionHandler));
                node.instructions = self.save_for_finally(&selector, &saved, exception);
                let id = self.add_node(node);
                self.link(id, head);
                id
            }
            None => {
                let mut node = self.new_node(NodeKind::statement(StatementNodeKind::Throw));
                node.instructions
                    .push(self.store_exception(Expression::var(exception)));
                let id = self.add_node(node);
                let exit = self.exit;
                self.link(id, exit);
                id
            }
        };
        self.link(previous, onward);
        Ok(entry)
    }

    /// `n$a = *&return; *&return = null; n$b = __unwrap_exception(n$a)`
    fn unwrap_pending_exception(&mut self) -> (Vec<Instruction>, Identifier) {
        let raw = self.fresh_identifier(IdentKind::Normal);
        let exception = self.fresh_identifier(IdentKind::Normal);
        let instructions = vec![
            Instruction::load(
                raw.clone(),
                self.return_slot(),
                Typ::object(),
                self.location.clone(),
            ),
            Instruction::store(
                self.return_slot(),
                Expression::null(),
                Typ::object(),
                self.location.clone(),
            ),
            Instruction::call(
                exception.clone(),
                Typ::object(),
                Expression::fun(BUILTIN_UNWRAP_EXCEPTION.clone()),
                vec![CallArg::new(Expression::var(raw), Typ::object())],
                CallFlags::default(),
                self.location.clone(),
            ),
        ];
        (instructions, exception)
    }

    pub fn return_slot(&self) -> Expression {
        self.local_expression(RETURN_IDENTIFIER)
    }

    fn drain_pending(&mut self, key: PendingKey, handler: NodeId) {
        for node in self.flow.take_pending(key) {
            self.link_exn(node, handler);
        }
    }

    /// Leftover pending nodes and dispatch tails, before default edges are added
    pub(crate) fn finish_exception_flow(&mut self) {
        let pending = mem::take(&mut self.flow.pending);
        for (key, nodes) in pending {
            let handler = match key {
                PendingKey::Group(g) => self.flow.groups.get(&g).map(|e| e.primary),
                PendingKey::Finally(f) => self
                    .flow
                    .finallies
                    .get(&f)
                    .and_then(|s| s.exceptional_entry),
            };
            if let Some(handler) = handler {
                for node in nodes {
                    self.link_exn(node, handler);
                }
            }
        }

        let exit = self.exit;
        let tails: Vec<NodeId> = self
            .flow
            .finallies
            .values()
            .filter_map(|s| s.dispatch.as_ref().map(|d| d.tail))
            .collect();
        for tail in tails {
            self.link(tail, exit);
        }
    }
}
