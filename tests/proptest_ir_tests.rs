//! Property-based tests for the IR helpers and the translator
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Type and string helpers obey their algebraic laws
//! 2. Stack compatibility is a top-aligned suffix check
//! 3. The translator never panics on arbitrary straight-line bodies and is deterministic

use cilsil::bytecode::{Instruction, MethodDef, MethodRef, Opcode, Program, TypeRef};
use cilsil::ir::cfg::to_ascii;
use cilsil::ir::{Expression, IntKind, Typ};
use cilsil::translate::stack::{is_sub_stack_of, StackEntry};
use cilsil::{TranslateOptions, Translator};
use proptest::prelude::*;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

fn arbitrary_type() -> impl Strategy<Value = Typ> {
    let leaf = prop_oneof![
        Just(Typ::int(IntKind::IInt)),
        Just(Typ::bool()),
        Just(Typ::Tvoid),
        "[A-Z][a-z]{0,6}".prop_map(Typ::structure),
    ];
    leaf.prop_recursive(4, 16, 1, |inner| {
        prop_oneof![inner.clone().prop_map(Typ::ptr), inner.prop_map(Typ::array)]
    })
}

fn stack_entry() -> impl Strategy<Value = StackEntry> {
    (-5i64..5).prop_map(|v| (Expression::int(v), Typ::int(IntKind::IInt)))
}

fn arbitrary_stack() -> impl Strategy<Value = Vec<StackEntry>> {
    prop::collection::vec(stack_entry(), 0..8)
}

/// Operand-free opcodes, enough to exercise the stack without control flow
fn straight_line_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Nop),
        Just(Opcode::Ldc_I4_0),
        Just(Opcode::Ldc_I4_1),
        Just(Opcode::Ldnull),
        Just(Opcode::Dup),
        Just(Opcode::Pop),
        Just(Opcode::Add),
        Just(Opcode::Ret),
        Just(Opcode::Throw),
        Just(Opcode::Ldind_I4),
        Just(Opcode::Ldlen),
        Just(Opcode::Calli),
    ]
}

fn straight_line_method() -> impl Strategy<Value = MethodDef> {
    prop::collection::vec(straight_line_opcode(), 0..24).prop_map(|opcodes| {
        let mut instructions: Vec<Instruction> = opcodes
            .into_iter()
            .enumerate()
            .map(|(i, opcode)| Instruction::simple(i as i32, opcode))
            .collect();
        instructions.push(Instruction::simple(instructions.len() as i32, Opcode::Ret));
        MethodDef {
            reference: MethodRef {
                declaring_type: TypeRef::class("Fuzz"),
                name: "Run".to_string(),
                parameters: vec![],
                return_type: TypeRef::Void,
                has_this: false,
                declaring_type_is_delegate: false,
            },
            access: Default::default(),
            is_abstract: false,
            locals: vec![],
            instructions,
            exception_handlers: vec![],
            sequence_points: vec![],
            declaring_fields: vec![],
        }
    })
}

fn options() -> TranslateOptions {
    TranslateOptions {
        skip_methods_without_debug_info: false,
        ..TranslateOptions::sequential()
    }
}

// =============================================================================
// IR LAWS
// =============================================================================

proptest! {
    #[test]
    fn strip_pointer_is_idempotent(ty in arbitrary_type()) {
        let stripped = ty.strip_pointer();
        prop_assert!(!stripped.is_pointer());
        prop_assert_eq!(stripped.strip_pointer(), stripped);
    }

    #[test]
    fn pointer_wrapping_strips_back(ty in arbitrary_type()) {
        prop_assert_eq!(Typ::ptr(Typ::ptr(ty.clone())).strip_pointer(), ty.strip_pointer());
    }

    #[test]
    fn ascii_output_keeps_length(s in "\\PC{0,40}") {
        let out = to_ascii(&s);
        prop_assert!(out.is_ascii());
        prop_assert_eq!(out.chars().count(), s.chars().count());
    }

    #[test]
    fn ascii_input_is_unchanged(s in "[ -~]{0,40}") {
        prop_assert_eq!(to_ascii(&s), s);
    }
}

// =============================================================================
// STACK COMPATIBILITY
// =============================================================================

proptest! {
    #[test]
    fn any_suffix_is_compatible(stack in arbitrary_stack(), cut in 0usize..8) {
        let skip = cut.min(stack.len());
        prop_assert!(is_sub_stack_of(&stack[skip..], &stack));
    }

    #[test]
    fn empty_memo_always_matches(stack in arbitrary_stack()) {
        prop_assert!(is_sub_stack_of(&[], &stack));
    }

    #[test]
    fn longer_memo_never_matches(stack in arbitrary_stack(), extra in stack_entry()) {
        let mut longer = stack.clone();
        longer.insert(0, extra);
        prop_assert!(!is_sub_stack_of(&longer, &stack));
    }
}

// =============================================================================
// TRANSLATOR FUZZ TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every method is either translated or recorded as a failure
    #[test]
    fn translator_never_panics(m in straight_line_method()) {
        let program = Program { methods: vec![m], ..Default::default() };
        let report = Translator::new(options()).translate_program(&program);
        prop_assert_eq!(report.translated() + report.failures.len(), 1);
    }

    /// Fresh translators produce identical graphs for the same input
    #[test]
    fn sequential_translation_is_deterministic(m in straight_line_method()) {
        let program = Program { methods: vec![m], ..Default::default() };
        let first = Translator::new(options()).translate_program(&program);
        let second = Translator::new(options()).translate_program(&program);
        prop_assert_eq!(first.cfg.to_json().unwrap(), second.cfg.to_json().unwrap());
        prop_assert_eq!(first.unknown_instructions, second.unknown_instructions);
    }
}
