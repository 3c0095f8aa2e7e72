//! End-to-end tests for CipherML: graph construction, constant folding,
//! post-training quantization, integer execution and circuit compilation.

use std::sync::Arc;

use cipherml::prelude::*;
use cipherml::quant::ExecutableCircuit;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Helpers
// =============================================================================

fn uniform(rng: &mut StdRng, shape: &[usize], bound: f64) -> Tensor<f64> {
    let n: usize = shape.iter().product();
    let data = (0..n).map(|_| rng.gen_range(-bound..bound)).collect();
    Tensor::from_vec(data, shape).unwrap()
}

fn gemm() -> OpKind {
    OpKind::Gemm {
        alpha: 1.0,
        beta: 1.0,
        trans_a: false,
        trans_b: false,
    }
}

/// Two affine layers around a ReLU: 4 -> 8 -> 3.
fn mlp(rng: &mut StdRng) -> Graph {
    GraphBuilder::new()
        .input("x", &[1, 4])
        .initializer("w1", uniform(rng, &[4, 8], 1.0))
        .initializer("b1", uniform(rng, &[8], 0.5))
        .initializer("w2", uniform(rng, &[8, 3], 1.0))
        .initializer("b2", uniform(rng, &[3], 0.5))
        .node("fc1", gemm(), &["x", "w1", "b1"], "h")
        .node("act", OpKind::Relu, &["h"], "a")
        .node("fc2", gemm(), &["a", "w2", "b2"], "y")
        .output("y")
        .build()
        .unwrap()
}

fn max_abs_error(a: &Tensor<f64>, b: &Tensor<f64>) -> f64 {
    assert_eq!(a.shape(), b.shape());
    a.data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn value_range(t: &Tensor<f64>) -> f64 {
    t.max().unwrap() - t.min().unwrap()
}

fn quantized_mlp(seed: u64) -> (Graph, QuantizedModule, Tensor<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let graph = mlp(&mut rng);
    let calibration = uniform(&mut rng, &[200, 4], 1.0);
    let module = PostTrainingAffineQuantization::new(8, graph.clone())
        .quantize_module(&[calibration.clone()])
        .unwrap();
    (graph, module, calibration)
}

// =============================================================================
// Constant Folding
// =============================================================================

/// `(0 + 1) + ((0 - 1) * ((0 + 1) + exp(0)))` folds to -1 and, used as a
/// weight factor, leaves a single quantized Gemm.
#[test]
fn test_constant_expression_feeds_gemm_weight() {
    let scalar = |v: f64| OpKind::Constant {
        value: Tensor::scalar(v),
    };
    let base = Tensor::from_vec(vec![0.5, -1.0, 0.25, 2.0], &[2, 2]).unwrap();
    let graph = GraphBuilder::new()
        .input("x", &[1, 2])
        .initializer("w_base", base.clone())
        .node("zero", scalar(0.0), &[], "c0")
        .node("one", scalar(1.0), &[], "c1")
        .node("a", OpKind::Add, &["c0", "c1"], "a")
        .node("b", OpKind::Sub, &["c0", "c1"], "b")
        .node("e", OpKind::Exp, &["c0"], "e")
        .node("c", OpKind::Add, &["a", "e"], "c")
        .node("d", OpKind::Mul, &["b", "c"], "d")
        .node("f", OpKind::Add, &["a", "d"], "factor")
        .node("scale_w", OpKind::Mul, &["w_base", "factor"], "w")
        .node("fc", gemm(), &["x", "w"], "y")
        .output("y")
        .build()
        .unwrap();

    let folded = fold_constants(&graph).unwrap();
    assert_eq!(folded.len(), 1);
    assert_eq!(folded.initializer("w").unwrap(), &base.map(|v| -v));

    let calibration = Tensor::from_vec(vec![-1.0, 1.0, 0.5, -0.5], &[2, 2]).unwrap();
    let module = PostTrainingAffineQuantization::new(8, graph)
        .quantize_module(&[calibration])
        .unwrap();
    assert_eq!(module.len(), 1);

    let (depth, op) = module.get("y").unwrap();
    assert_eq!(depth, 0);
    assert_eq!(op.tag(), OpTag::Gemm);
    let QuantizedInput::Constant { value, .. } = &op.inputs()[1] else {
        panic!("weight should be constant");
    };
    let weight = value.dequantize();
    for (got, want) in weight.data().iter().zip(base.data()) {
        assert!((got + want).abs() <= value.params.scale, "{got} vs {}", -want);
    }
}

// =============================================================================
// Numeric Equivalence
// =============================================================================

#[test]
fn test_mlp_matches_float_within_tolerance() {
    let (graph, module, calibration) = quantized_mlp(7);
    let expected = graph.run(&[calibration.clone()]).unwrap().remove(0);
    let actual = module.forward_float(&[calibration]).unwrap().remove(0);

    let error = max_abs_error(&expected, &actual);
    let range = value_range(&expected);
    assert!(error <= 0.05 * range, "error {error} exceeds 5% of range {range}");
}

#[test]
fn test_mlp_generalizes_to_unseen_inputs() {
    let (graph, module, _) = quantized_mlp(11);
    let mut rng = StdRng::seed_from_u64(99);
    let x = uniform(&mut rng, &[50, 4], 0.5);

    let expected = graph.run(&[x.clone()]).unwrap().remove(0);
    let actual = module.forward_float(&[x]).unwrap().remove(0);
    let output = module.output_params()[0];
    let calibrated_range = output.scale * (output.qmax() - output.qmin()) as f64;
    assert!(max_abs_error(&expected, &actual) <= 0.05 * calibrated_range);
}

#[test]
fn test_round_trip_within_scale() {
    let mut rng = StdRng::seed_from_u64(3);
    let x = uniform(&mut rng, &[1000], 5.0);
    for n_bits in [2, 4, 8, 16] {
        let q = QuantizedArray::from_float(&x, n_bits, false).unwrap();
        let error = max_abs_error(&x, &q.dequantize());
        assert!(error <= q.params.scale, "n_bits={n_bits}: {error} > {}", q.params.scale);
    }
}

#[test]
fn test_normalize_then_tanh() {
    let graph = GraphBuilder::new()
        .input("x", &[1, 3])
        .initializer("mean", Tensor::from_vec(vec![1.0, -2.0, 0.5], &[3]).unwrap())
        .initializer("std", Tensor::from_vec(vec![2.0, 1.5, 1.0], &[3]).unwrap())
        .node("center", OpKind::Sub, &["x", "mean"], "centered")
        .node("scale", OpKind::Div, &["centered", "std"], "z")
        .node("squash", OpKind::Tanh, &["z"], "y")
        .output("y")
        .build()
        .unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    let x = uniform(&mut rng, &[100, 3], 3.0);
    let module = PostTrainingAffineQuantization::new(8, graph.clone())
        .quantize_module(&[x.clone()])
        .unwrap();
    let expected = graph.run(&[x.clone()]).unwrap().remove(0);
    let actual = module.forward_float(&[x]).unwrap().remove(0);
    assert!(max_abs_error(&expected, &actual) <= 0.08 * value_range(&expected));
}

#[test]
fn test_tiny_cnn() {
    let mut rng = StdRng::seed_from_u64(21);
    let conv = Conv2dParams {
        pads: [1, 1, 1, 1],
        ..Conv2dParams::default()
    };
    let graph = GraphBuilder::new()
        .input("image", &[1, 1, 6, 6])
        .initializer("kernel", uniform(&mut rng, &[2, 1, 3, 3], 1.0))
        .initializer("kernel_bias", uniform(&mut rng, &[2], 0.2))
        .initializer("w", uniform(&mut rng, &[18, 2], 1.0))
        .initializer("b", uniform(&mut rng, &[2], 0.2))
        .node("conv", OpKind::Conv(conv), &["image", "kernel", "kernel_bias"], "features")
        .node("act", OpKind::Relu, &["features"], "activated")
        .node("pool", OpKind::AveragePool(Pool2dParams::square(2)), &["activated"], "pooled")
        .node("flatten", OpKind::Flatten { axis: 1 }, &["pooled"], "flat")
        .node("fc", gemm(), &["flat", "w", "b"], "logits")
        .output("logits")
        .build()
        .unwrap();

    let images = uniform(&mut rng, &[20, 1, 6, 6], 1.0);
    let module = PostTrainingAffineQuantization::new(8, graph.clone())
        .quantize_module(&[images.clone()])
        .unwrap();

    let (pool_depth, pool) = module.get("pooled").unwrap();
    let (flat_depth, flat) = module.get("flat").unwrap();
    assert_eq!(flat_depth, pool_depth + 1);
    assert_eq!(flat.output_params(), pool.output_params());

    let expected = graph.run(&[images.clone()]).unwrap().remove(0);
    let actual = module.forward_float(&[images]).unwrap().remove(0);
    assert_eq!(actual.shape(), &[20, 2]);
    assert!(max_abs_error(&expected, &actual) <= 0.08 * value_range(&expected));
}

#[test]
fn test_layout_ops_move_integers_exactly() {
    let graph = GraphBuilder::new()
        .input("x", &[1, 6])
        .node("reshape", OpKind::Reshape { shape: vec![0, 2, 3] }, &["x"], "grid")
        .node("transpose", OpKind::Transpose { perm: vec![0, 2, 1] }, &["grid"], "y")
        .output("y")
        .build()
        .unwrap();
    let x = Tensor::from_vec((0..12).map(|i| i as f64 / 4.0).collect(), &[2, 6]).unwrap();
    let module = PostTrainingAffineQuantization::new(6, graph)
        .quantize_module(&[x.clone()])
        .unwrap();

    let q = module.quantize_input(&[x]).unwrap();
    let y = module.forward(&q).unwrap().remove(0);
    assert_eq!(y.shape(), &[2, 3, 2]);
    let expected = q[0].reshape(&[2, 2, 3]).unwrap().transpose(&[0, 2, 1]).unwrap();
    assert_eq!(y, expected);
    assert_eq!(module.output_params(), module.input_params());
}

// =============================================================================
// Compilation
// =============================================================================

#[test]
fn test_bit_width_enforcement() {
    let (_, mut module, calibration) = quantized_mlp(7);
    let q = module.quantize_input(&[calibration]).unwrap();

    let report = module.bit_width_report(&q).unwrap();
    assert_eq!(report.len(), 3);
    assert!(report.max_bit_width() > MAXIMUM_BIT_WIDTH);

    let err = module.compile(&q, &CompileConfig::new()).unwrap_err();
    assert!(matches!(
        err,
        QuantError::BitWidthExceeded { required, limit, .. }
            if required > MAXIMUM_BIT_WIDTH && limit == MAXIMUM_BIT_WIDTH
    ));
    assert!(!module.is_compiled());

    let circuit = module
        .compile(&q, &CompileConfig::new().use_virtual_lib(true))
        .unwrap();
    assert!(circuit.advisory().is_some());
    assert_eq!(circuit.report(), &report);

    let wide = CompileConfig::new().max_bit_width(report.max_bit_width());
    let circuit = module.compile(&q, &wide).unwrap();
    assert!(circuit.advisory().is_none());
}

#[test]
fn test_simulation_circuit_reproduces_forward() {
    let (_, mut module, calibration) = quantized_mlp(13);
    let q = module.quantize_input(&[calibration]).unwrap();
    assert!(matches!(module.forward_fhe(&q), Err(QuantError::NotCompiled)));

    module
        .compile(&q, &CompileConfig::new().use_virtual_lib(true))
        .unwrap();

    let mut rng = StdRng::seed_from_u64(1);
    let fresh = module
        .quantize_input(&[uniform(&mut rng, &[9, 4], 1.0)])
        .unwrap();
    assert_eq!(module.forward_fhe(&fresh).unwrap(), module.forward(&fresh).unwrap());
}

#[test]
fn test_compile_is_idempotent() {
    let (_, mut module, calibration) = quantized_mlp(17);
    let q = module.quantize_input(&[calibration]).unwrap();
    let config = CompileConfig::new().use_virtual_lib(true);

    let first = module.compile(&q, &config).unwrap();
    let second = module.compile(&q[..], &config).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = module.compile(&q, &config.max_bit_width(32)).unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_ne!(first.fingerprint(), other.fingerprint());
}

#[derive(Debug)]
struct RecordingBackend;

impl CircuitBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn compile(
        &self,
        plan: Arc<cipherml::quant::QuantizedGraph>,
        config: &CompileConfig,
    ) -> cipherml::quant::QuantResult<Box<dyn ExecutableCircuit>> {
        assert!(!plan.is_empty());
        SimulationBackend.compile(plan, config)
    }
}

#[test]
fn test_custom_backend() {
    let (_, mut module, calibration) = quantized_mlp(19);
    let q = module.quantize_input(&[calibration]).unwrap();
    let config = CompileConfig::new().use_virtual_lib(true);

    let simulated = module.compile(&q, &config).unwrap();
    let recorded = module
        .compile_with_backend(&q, &config, &RecordingBackend)
        .unwrap();
    assert_eq!(simulated.backend(), "simulation");
    assert_eq!(recorded.backend(), "recording");
    assert_eq!(recorded.run(&q).unwrap(), module.forward(&q).unwrap());
}

// =============================================================================
// Unsupported Patterns
// =============================================================================

#[test]
fn test_registry_gap_names_kind() {
    let mut rng = StdRng::seed_from_u64(7);
    let graph = mlp(&mut rng);
    let calibration = uniform(&mut rng, &[10, 4], 1.0);
    let registry = OperatorRegistry::standard().without(OpTag::Relu);

    let err = PostTrainingAffineQuantization::new(8, graph)
        .registry(&registry)
        .quantize_module(&[calibration])
        .unwrap_err();
    assert!(matches!(
        err,
        QuantError::UnsupportedOperator {
            kind: OpTag::Relu,
            ..
        }
    ));
    assert!(err.to_string().contains("Relu"));
}

#[test]
fn test_variable_product_is_unsupported() {
    let graph = GraphBuilder::new()
        .input("x", &[1, 2])
        .input("y", &[1, 2])
        .node("product", OpKind::Mul, &["x", "y"], "z")
        .output("z")
        .build()
        .unwrap();
    let sample = Tensor::from_vec(vec![0.5, -0.5], &[1, 2]).unwrap();

    let err = PostTrainingAffineQuantization::new(8, graph)
        .quantize_module(&[sample.clone(), sample])
        .unwrap_err();
    assert!(matches!(
        err,
        QuantError::UnsupportedOperator {
            kind: OpTag::Mul,
            ref node,
            ..
        } if node == "product"
    ));
}

#[test]
fn test_unknown_op_type_is_rejected() {
    let err = GraphBuilder::new()
        .input("x", &[1, 2])
        .node_from_op_type("norm", "LayerNormalization", &Attributes::new(), &["x"], &["y"])
        .output("y")
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedOperator { .. }));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_driven_pipeline() {
    let config = QuantConfig::from_toml_str(
        r#"
        n_bits = 6
        use_virtual_lib = true
        "#,
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(23);
    let graph = mlp(&mut rng);
    let calibration = uniform(&mut rng, &[64, 4], 1.0);
    let mut module = PostTrainingAffineQuantization::from_config(&config, graph)
        .quantize_module(&[calibration.clone()])
        .unwrap();
    assert!(module.input_params().iter().all(|p| p.n_bits == 6));

    let q = module.quantize_input(&[calibration]).unwrap();
    let circuit = module.compile(&q, &config.compile_config()).unwrap();
    assert!(circuit.config().use_virtual_lib);
    assert_eq!(module.forward_fhe(&q).unwrap(), module.forward(&q).unwrap());
}
