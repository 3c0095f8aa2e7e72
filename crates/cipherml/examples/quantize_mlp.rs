//! Quantize a small MLP and compile it for an 8-bit backend.
//!
//! Run with: `cargo run -p cipherml --example quantize_mlp`

use cipherml::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random(rng: &mut StdRng, shape: &[usize]) -> Tensor<f64> {
    let n: usize = shape.iter().product();
    Tensor::from_vec((0..n).map(|_| rng.gen_range(-1.0..1.0)).collect(), shape).unwrap()
}

fn main() {
    println!("=== CipherML MLP Quantization ===\n");

    let mut rng = StdRng::seed_from_u64(42);
    let dense = Attributes::new();
    let graph = GraphBuilder::new()
        .input("x", &[1, 4])
        .initializer("w1", random(&mut rng, &[4, 16]))
        .initializer("b1", random(&mut rng, &[16]))
        .initializer("w2", random(&mut rng, &[16, 2]))
        .initializer("b2", random(&mut rng, &[2]))
        .node_from_op_type("fc1", "Gemm", &dense, &["x", "w1", "b1"], &["h"])
        .node_from_op_type("act", "Sigmoid", &dense, &["h"], &["a"])
        .node_from_op_type("fc2", "Gemm", &dense, &["a", "w2", "b2"], &["y"])
        .output("y")
        .build()
        .unwrap();

    let calibration = random(&mut rng, &[256, 4]);
    let mut module = PostTrainingAffineQuantization::new(6, graph.clone())
        .quantize_module(&[calibration.clone()])
        .unwrap();

    println!("Quantized ops:");
    for op in module.ops() {
        println!("  {:<4} {:<8} scale={:.5}", op.name(), op.tag(), op.output_params().scale);
    }

    let expected = graph.run(&[calibration.clone()]).unwrap().remove(0);
    let actual = module.forward_float(&[calibration.clone()]).unwrap().remove(0);
    let error = expected
        .data()
        .iter()
        .zip(actual.data())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    println!("\nMax abs error vs float: {error:.4}");

    let q = module.quantize_input(&[calibration]).unwrap();
    match module.compile(&q, &CompileConfig::new()) {
        Ok(_) => println!("Compiled within {MAXIMUM_BIT_WIDTH} bits"),
        Err(err) => println!("Strict compile failed: {err}"),
    }

    let circuit = module
        .compile(&q, &CompileConfig::new().use_virtual_lib(true))
        .unwrap();
    println!("Simulation compile: {}", circuit.advisory().unwrap_or("within limits"));
    for (op, bits) in circuit.report().iter() {
        println!("  {op:<4} {bits:>2} bits");
    }
}
