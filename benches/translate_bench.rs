use cilsil::bytecode::{
    Instruction, MethodDef, MethodRef, Opcode, Operand, Program, SequencePoint, TypeRef,
};
use cilsil::{TranslateOptions, Translator};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// `count` sequential counting loops over one local
fn loop_method(name: &str, count: usize) -> MethodDef {
    let mut instructions = Vec::new();
    let mut offset = 0;
    let mut at = |opcode: Opcode, operand: Operand, size: i32, out: &mut Vec<Instruction>| {
        out.push(Instruction::new(offset, opcode, operand));
        offset += size;
        offset - size
    };

    for _ in 0..count {
        at(Opcode::Ldc_I4_0, Operand::None, 1, &mut instructions);
        at(Opcode::Stloc_0, Operand::None, 1, &mut instructions);
        let head = at(Opcode::Ldloc_0, Operand::None, 1, &mut instructions);
        at(Opcode::Ldc_I4_1, Operand::None, 1, &mut instructions);
        at(Opcode::Add, Operand::None, 1, &mut instructions);
        at(Opcode::Stloc_0, Operand::None, 1, &mut instructions);
        at(Opcode::Ldloc_0, Operand::None, 1, &mut instructions);
        at(Opcode::Ldc_I4_S, Operand::Int32(100), 2, &mut instructions);
        at(Opcode::Blt_S, Operand::Target(head), 2, &mut instructions);
    }
    at(Opcode::Ret, Operand::None, 1, &mut instructions);

    MethodDef {
        reference: MethodRef {
            declaring_type: TypeRef::class("Bench"),
            name: name.to_string(),
            parameters: vec![],
            return_type: TypeRef::Void,
            has_this: false,
            declaring_type_is_delegate: false,
        },
        access: Default::default(),
        is_abstract: false,
        locals: vec![TypeRef::primitive("System.Int32")],
        instructions,
        exception_handlers: vec![],
        sequence_points: vec![SequencePoint {
            offset: 0,
            start_line: 1,
            start_column: 1,
            document: "Bench.cs".to_string(),
        }],
        declaring_fields: vec![],
    }
}

fn single_method_benchmark(c: &mut Criterion) {
    let program = Program {
        methods: vec![loop_method("Loops", 50)],
        ..Default::default()
    };

    c.bench_function("translate 50 loops", |b| {
        b.iter(|| {
            let translator = Translator::new(TranslateOptions::sequential());
            translator.translate_program(black_box(&program))
        })
    });
}

fn batch_benchmark(c: &mut Criterion) {
    let program = Program {
        methods: (0..64).map(|i| loop_method(&format!("M{}", i), 8)).collect(),
        ..Default::default()
    };

    c.bench_function("translate 64 methods sequential", |b| {
        b.iter(|| {
            let translator = Translator::new(TranslateOptions::sequential());
            translator.translate_program(black_box(&program))
        })
    });

    c.bench_function("translate 64 methods parallel", |b| {
        b.iter(|| {
            let translator = Translator::new(TranslateOptions::default());
            translator.translate_program(black_box(&program))
        })
    });
}

fn serialize_benchmark(c: &mut Criterion) {
    let program = Program {
        methods: (0..16).map(|i| loop_method(&format!("M{}", i), 8)).collect(),
        ..Default::default()
    };
    let report = Translator::new(TranslateOptions::sequential()).translate_program(&program);

    c.bench_function("serialize cfg", |b| {
        b.iter(|| black_box(&report.cfg).to_json().unwrap())
    });
}

criterion_group!(
    benches,
    single_method_benchmark,
    batch_benchmark,
    serialize_benchmark
);
criterion_main!(benches);
