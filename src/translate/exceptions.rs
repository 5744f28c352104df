//! Protected-region analysis
//!
//! Turns the flat exception-handler table of a method into catch groups (one per protected
//! try region, arms in source order) and finally blocks, and answers "which region is this
//! offset in" queries. The narrowest enclosing region wins.

use crate::bytecode::{ExceptionHandlerEntry, HandlerKind, MethodDef, TypeRef};
use crate::error::{Error, Result};
use crate::ir::node::DEFAULT_BLOCK_END_OFFSET;

const DEFAULT_CATCH_TYPE: &str = "System.Exception";

/// Inclusive offset range `[start, last]`, `last` being the offset of the final instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub start: i32,
    pub last: i32,
}

impl Region {
    pub fn contains(&self, offset: i32) -> bool {
        self.start <= offset && offset <= self.last
    }

    pub fn width(&self) -> i32 {
        self.last - self.start
    }

    fn covers(&self, other: &Region) -> bool {
        self.start <= other.start && other.last <= self.last
    }
}

/// One `catch` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchArm {
    pub handler: Region,
    pub catch_type: TypeRef,
    /// Next arm tried on a type mismatch
    pub next: Option<usize>,
}

/// All catch clauses protecting one try region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchGroup {
    pub try_region: Region,
    pub arms: Vec<CatchArm>,
    /// Finally block lowered together with this group, if any
    pub finally: Option<usize>,
}

impl CatchGroup {
    /// Try region plus every arm
    pub fn extent(&self) -> Region {
        let last = self
            .arms
            .iter()
            .map(|a| a.handler.last)
            .fold(self.try_region.last, i32::max);
        Region {
            start: self.try_region.start,
            last,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinallyBlock {
    pub try_region: Region,
    pub handler: Region,
}

/// Innermost protected region containing an offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionMapping {
    None,
    TryToCatch { group: usize },
    TryToFinally { finally: usize },
    CatchToCatch { group: usize, arm: usize },
    FinallyToFinally { finally: usize },
}

/// Exception regions of one method, immutable once built
#[derive(Debug, Clone, Default)]
pub struct ExceptionAnalyzer {
    pub groups: Vec<CatchGroup>,
    pub finallies: Vec<FinallyBlock>,
}

impl ExceptionAnalyzer {
    /// Build the region maps.
    ///
    /// Fails on filter and fault handlers, on handlers without a body, and on protected
    /// regions starting inside a catch or finally body.
    pub fn new(method: &MethodDef) -> Result<Self> {
        let mut analyzer = ExceptionAnalyzer::default();
        let mut catches: Vec<(Region, CatchArm)> = Vec::new();

        for entry in &method.exception_handlers {
            let try_region = region(method, entry.try_start, entry.try_end)?;
            let handler = handler_region(method, entry)?;
            match entry.kind {
                HandlerKind::Catch => catches.push((
                    try_region,
                    CatchArm {
                        handler,
                        catch_type: entry
                            .catch_type
                            .clone()
                            .unwrap_or_else(|| TypeRef::class(DEFAULT_CATCH_TYPE)),
                        next: None,
                    },
                )),
                HandlerKind::Finally => analyzer.finallies.push(FinallyBlock {
                    try_region,
                    handler,
                }),
                HandlerKind::Filter | HandlerKind::Fault => {
                    return Err(Error::UnsupportedExceptionHandler {
                        kind: entry.kind.to_string(),
                    })
                }
            }
        }

        // Group arms by try region, in handler order
        for (try_region, arm) in catches {
            match analyzer
                .groups
                .iter_mut()
                .find(|g| g.try_region == try_region)
            {
                Some(group) => group.arms.push(arm),
                None => analyzer.groups.push(CatchGroup {
                    try_region,
                    arms: vec![arm],
                    finally: None,
                }),
            }
        }
        for group in &mut analyzer.groups {
            group.arms.sort_by_key(|a| a.handler.start);
            let count = group.arms.len();
            for (i, arm) in group.arms.iter_mut().enumerate() {
                arm.next = (i + 1 < count).then_some(i + 1);
            }
        }

        // A group belongs to the narrowest finally whose try covers the group and its arms
        for group in &mut analyzer.groups {
            let extent = group.extent();
            group.finally = analyzer
                .finallies
                .iter()
                .enumerate()
                .filter(|(_, f)| f.try_region.start == extent.start && f.try_region.covers(&extent))
                .min_by_key(|(_, f)| f.try_region.width())
                .map(|(i, _)| i);
        }

        analyzer.check_nesting()?;
        Ok(analyzer)
    }

    fn check_nesting(&self) -> Result<()> {
        let bodies: Vec<Region> = self
            .groups
            .iter()
            .flat_map(|g| g.arms.iter().map(|a| a.handler))
            .chain(self.finallies.iter().map(|f| f.handler))
            .collect();
        let tries = self
            .groups
            .iter()
            .map(|g| g.try_region)
            .chain(self.finallies.iter().map(|f| f.try_region));
        for try_region in tries {
            if bodies.iter().any(|b| b.contains(try_region.start)) {
                return Err(Error::UnsupportedExceptionNesting {
                    offset: try_region.start,
                });
            }
        }
        Ok(())
    }

    pub fn has_handlers(&self) -> bool {
        !self.groups.is_empty() || !self.finallies.is_empty()
    }

    /// Innermost region containing `offset`.
    ///
    /// On equal widths the earlier kind wins, in the order try-of-catch, try-of-finally,
    /// catch body, finally body.
    pub fn mapping(&self, offset: i32) -> RegionMapping {
        let mut best = RegionMapping::None;
        let mut best_width = i32::MAX;
        let mut consider = |mapping: RegionMapping, region: &Region| {
            if region.contains(offset) && region.width() < best_width {
                best = mapping;
                best_width = region.width();
            }
        };

        for (i, g) in self.groups.iter().enumerate() {
            consider(RegionMapping::TryToCatch { group: i }, &g.try_region);
        }
        for (i, f) in self.finallies.iter().enumerate() {
            consider(RegionMapping::TryToFinally { finally: i }, &f.try_region);
        }
        for (i, g) in self.groups.iter().enumerate() {
            for (j, a) in g.arms.iter().enumerate() {
                consider(RegionMapping::CatchToCatch { group: i, arm: j }, &a.handler);
            }
        }
        for (i, f) in self.finallies.iter().enumerate() {
            consider(RegionMapping::FinallyToFinally { finally: i }, &f.handler);
        }
        best
    }

    /// Last offset of the innermost region containing `offset`, or -1 outside any region
    pub fn block_end_offset(&self, offset: i32) -> i32 {
        match self.mapping(offset) {
            RegionMapping::None => DEFAULT_BLOCK_END_OFFSET,
            RegionMapping::TryToCatch { group } => self.groups[group].try_region.last,
            RegionMapping::TryToFinally { finally } => self.finallies[finally].try_region.last,
            RegionMapping::CatchToCatch { group, arm } => self.groups[group].arms[arm].handler.last,
            RegionMapping::FinallyToFinally { finally } => self.finallies[finally].handler.last,
        }
    }

    pub fn group(&self, index: usize) -> Option<&CatchGroup> {
        self.groups.get(index)
    }

    pub fn finally(&self, index: usize) -> Option<&FinallyBlock> {
        self.finallies.get(index)
    }

    /// The finally a catch arm hands over to, if any
    pub fn arm_finally(&self, group: usize) -> Option<usize> {
        self.groups.get(group).and_then(|g| g.finally)
    }

    /// Whether leaving to `target` exits the try region of `finally`
    pub fn leaves_finally(&self, finally: usize, target: i32) -> bool {
        self.finallies
            .get(finally)
            .map_or(false, |f| !f.try_region.contains(target))
    }
}

/// Inclusive region for the exclusive range `[start, end)`
fn region(method: &MethodDef, start: i32, end: i32) -> Result<Region> {
    method
        .index_of_offset(start)
        .ok_or(Error::MissingInstruction { offset: start })?;
    let last = method
        .instructions
        .iter()
        .take_while(|i| i.offset < end)
        .last()
        .map(|i| i.offset)
        .filter(|&last| last >= start)
        .ok_or(Error::MissingInstruction { offset: start })?;
    Ok(Region { start, last })
}

fn handler_region(method: &MethodDef, entry: &ExceptionHandlerEntry) -> Result<Region> {
    let empty = entry.handler_end <= entry.handler_start
        || method.index_of_offset(entry.handler_start).is_none();
    if empty {
        return Err(Error::UnsupportedExceptionHandler {
            kind: format!("{} without a body", entry.kind),
        });
    }
    region(method, entry.handler_start, entry.handler_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, MethodRef, Opcode, Operand};

    fn method(offsets: &[i32], handlers: Vec<ExceptionHandlerEntry>) -> MethodDef {
        MethodDef {
            reference: MethodRef {
                declaring_type: TypeRef::class("C"),
                name: "M".to_string(),
                parameters: vec![],
                return_type: TypeRef::Void,
                has_this: false,
                declaring_type_is_delegate: false,
            },
            access: Default::default(),
            is_abstract: false,
            locals: vec![],
            instructions: offsets
                .iter()
                .map(|&o| Instruction::new(o, Opcode::Nop, Operand::None))
                .collect(),
            exception_handlers: handlers,
            sequence_points: vec![],
            declaring_fields: vec![],
        }
    }

    fn entry(kind: HandlerKind, t: (i32, i32), h: (i32, i32), ty: Option<&str>) -> ExceptionHandlerEntry {
        ExceptionHandlerEntry {
            kind,
            try_start: t.0,
            try_end: t.1,
            handler_start: h.0,
            handler_end: h.1,
            catch_type: ty.map(TypeRef::class),
        }
    }

    fn offsets() -> Vec<i32> {
        (0..20).map(|i| i * 2).collect()
    }

    #[test]
    fn test_arms_sorted_and_chained() {
        let m = method(
            &offsets(),
            vec![
                entry(HandlerKind::Catch, (0, 10), (16, 22), Some("B")),
                entry(HandlerKind::Catch, (0, 10), (10, 16), Some("A")),
            ],
        );
        let a = ExceptionAnalyzer::new(&m).unwrap();
        assert_eq!(a.groups.len(), 1);
        let g = &a.groups[0];
        assert_eq!(g.try_region, Region { start: 0, last: 8 });
        assert_eq!(g.arms[0].catch_type, TypeRef::class("A"));
        assert_eq!(g.arms[0].next, Some(1));
        assert_eq!(g.arms[1].next, None);
        assert_eq!(g.extent(), Region { start: 0, last: 20 });
    }

    #[test]
    fn test_narrowest_region_wins() {
        // try { try {..} catch {..} } finally {..}
        let m = method(
            &offsets(),
            vec![
                entry(HandlerKind::Catch, (0, 6), (6, 10), Some("E")),
                entry(HandlerKind::Finally, (0, 12), (12, 16), None),
            ],
        );
        let a = ExceptionAnalyzer::new(&m).unwrap();
        assert_eq!(a.mapping(2), RegionMapping::TryToCatch { group: 0 });
        assert_eq!(a.mapping(6), RegionMapping::CatchToCatch { group: 0, arm: 0 });
        assert_eq!(a.mapping(10), RegionMapping::TryToFinally { finally: 0 });
        assert_eq!(a.mapping(14), RegionMapping::FinallyToFinally { finally: 0 });
        assert_eq!(a.mapping(18), RegionMapping::None);
        assert_eq!(a.groups[0].finally, Some(0));
        assert_eq!(a.block_end_offset(2), 4);
        assert_eq!(a.block_end_offset(8), 8);
        assert_eq!(a.block_end_offset(10), 10);
        assert_eq!(a.block_end_offset(30), DEFAULT_BLOCK_END_OFFSET);
        assert!(a.leaves_finally(0, 16));
        assert!(!a.leaves_finally(0, 10));
    }

    #[test]
    fn test_unrelated_finally_not_attached() {
        let m = method(
            &offsets(),
            vec![
                entry(HandlerKind::Catch, (0, 4), (4, 8), Some("E")),
                entry(HandlerKind::Finally, (10, 14), (14, 18), None),
            ],
        );
        let a = ExceptionAnalyzer::new(&m).unwrap();
        assert_eq!(a.groups[0].finally, None);
    }

    #[test]
    fn test_filter_rejected() {
        let m = method(&offsets(), vec![entry(HandlerKind::Filter, (0, 4), (4, 8), None)]);
        assert!(matches!(
            ExceptionAnalyzer::new(&m),
            Err(Error::UnsupportedExceptionHandler { .. })
        ));
    }

    #[test]
    fn test_empty_handler_rejected() {
        let m = method(&offsets(), vec![entry(HandlerKind::Catch, (0, 4), (4, 4), Some("E"))]);
        assert!(matches!(
            ExceptionAnalyzer::new(&m),
            Err(Error::UnsupportedExceptionHandler { .. })
        ));
    }

    #[test]
    fn test_try_inside_catch_rejected() {
        let m = method(
            &offsets(),
            vec![
                entry(HandlerKind::Catch, (0, 4), (4, 16), Some("E")),
                entry(HandlerKind::Catch, (6, 10), (10, 14), Some("E")),
            ],
        );
        assert!(matches!(
            ExceptionAnalyzer::new(&m),
            Err(Error::UnsupportedExceptionNesting { offset: 6 })
        ));
    }
}
