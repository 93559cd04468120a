//! Benchmarks for the stencil compiler.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stencilc::domain::ParametricExpr;
use stencilc::ir::builder::*;
use stencilc::ir::{BoundaryPolicy, ElemType, Program};
use stencilc::{CompileConfig, CompileContext};

/// A 2-d blur over an `H x W` image, repeated `stages` times.
fn blur_chain(stages: usize) -> Program {
    let blur = stencil("blur", vec![array_arg("x", ElemType::Float, 2)], ElemType::Float).returns(div(
        add(
            add(read("x", &[-1, 0]), read("x", &[1, 0])),
            add(read("x", &[0, -1]), read("x", &[0, 1])),
        ),
        float(4.0),
    ));
    let mut pipeline = vector(
        "pipeline",
        vec![sized_arg(
            "input",
            ElemType::Float,
            vec![ParametricExpr::param("H"), ParametricExpr::param("W")],
        )],
        ElemType::Float,
    );
    let mut prev = "input".to_string();
    for i in 0..stages {
        let name = format!("s{}", i);
        pipeline = pipeline.with_stmt(&name, call("blur", vec![arg_with(vid(&prev), BoundaryPolicy::Mirror)]));
        prev = name;
    }
    let pipeline = pipeline.returns(vid(&prev));
    program("pipeline")
        .with_param("H")
        .with_param("W")
        .with_stencil(blur)
        .with_vector(pipeline)
}

/// Benchmark domain inference and boundary lowering.
fn bench_lowering(c: &mut Criterion) {
    let program = blur_chain(8);
    let ctx = CompileContext::new(&program, CompileConfig::default()).unwrap();
    c.bench_function("lower_blur_chain_8", |b| {
        b.iter(|| stencilc::lower(black_box(&ctx)).unwrap())
    });
}

/// Benchmark the full pipeline including C generation.
fn bench_compile(c: &mut Criterion) {
    let program = blur_chain(8);
    let config = CompileConfig::default();
    c.bench_function("compile_blur_chain_8", |b| {
        b.iter(|| stencilc::compile(black_box(&program), &config).unwrap())
    });
}

/// Benchmark parametric domain algebra.
fn bench_domain_ops(c: &mut Criterion) {
    use stencilc::domain::Domain;

    let a = Domain::from_extents([ParametricExpr::param("H"), ParametricExpr::param("W")]);
    let b = Domain::from_extents([ParametricExpr::param("W"), ParametricExpr::param("H")]);
    c.bench_function("domain_intersection_symbolic", |bench| {
        bench.iter(|| {
            let mut d = black_box(&a).clone();
            d.compute_intersection(black_box(&b)).unwrap();
            d
        })
    });
}

criterion_group!(benches, bench_lowering, bench_compile, bench_domain_ops);
criterion_main!(benches);
