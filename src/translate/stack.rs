//! Symbolic operand stack

use crate::ir::{Expression, Typ};

/// One operand: the expression and its type
pub type StackEntry = (Expression, Typ);

/// Operand stack, bottom first
pub type ProgramStack = Vec<StackEntry>;

/// Whether `memo` matches the top of `arriving`.
///
/// The memoized stack must equal the top-most `memo.len()` entries of the arriving stack, in
/// order. An empty memo matches every stack.
pub fn is_sub_stack_of(memo: &[StackEntry], arriving: &[StackEntry]) -> bool {
    if memo.len() > arriving.len() {
        return false;
    }
    let skip = arriving.len() - memo.len();
    memo == &arriving[skip..]
}
