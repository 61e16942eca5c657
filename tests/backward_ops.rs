mod common;

use flowcorr::data::random_tensor;
use flowcorr::ops;
use flowcorr::{CorrelationConfig, Tensor};

use common::{assert_approx_eq, numeric_grads, sequence_tensor};

#[test]
fn backward_grads_match_input_shapes() {
    let cases = [
        (0, 1, 1, 1, 1, [1, 3, 3, 1]),
        (2, 3, 2, 1, 1, [2, 6, 5, 3]),
        (3, 1, 4, 2, 2, [1, 9, 8, 4]),
        (1, 2, 1, 1, 1, [3, 4, 6, 2]),
    ];
    for (seed, (pad, kernel, max_disp, s1, s2, shape)) in cases.into_iter().enumerate() {
        let config = CorrelationConfig::new(pad, kernel, max_disp, s1, s2).expect("config");
        let a = random_tensor(shape, seed as u64);
        let b = random_tensor(shape, 50 + seed as u64);
        let out = ops::correlate(&a, &b, &config).expect("forward");
        let grad_out = random_tensor(out.output.shape(), 90 + seed as u64);

        let grads = ops::correlate_backward(&grad_out, &out.padded_a, &out.padded_b, &config)
            .expect("backward");
        assert_eq!(grads.grad_a.shape(), shape);
        assert_eq!(grads.grad_b.shape(), shape);
    }
}

#[test]
fn backward_3x3_single_output_matches_manual_gradient() {
    // out[d] = A[1,1] * B[1+dy, 1+dx]; so dA[1,1] = sum_d g[d] * B[d], dB[d] = g[d] * A[1,1].
    let a = sequence_tensor([1, 3, 3, 1], 1.0);
    let b = sequence_tensor([1, 3, 3, 1], 10.0);
    let config = CorrelationConfig::new(0, 1, 1, 1, 1).expect("config");
    let out = ops::correlate(&a, &b, &config).expect("forward");

    let upstream: Vec<f32> = (0..9).map(|d| 0.1 * (d as f32 + 1.0)).collect();
    let grad_out = Tensor::from_vec(upstream.clone(), [1, 1, 1, 9]);
    let grads = out.backward(&grad_out).expect("backward");

    let centre_grad: f32 = upstream
        .iter()
        .zip(b.data())
        .map(|(g, bv)| g * bv)
        .sum();
    let mut expected_a = vec![0.0; 9];
    expected_a[4] = centre_grad;
    assert_approx_eq(grads.grad_a.data(), &expected_a, 1e-4);

    let expected_b: Vec<f32> = upstream.iter().map(|g| g * 5.0).collect();
    assert_approx_eq(grads.grad_b.data(), &expected_b, 1e-5);
}

#[test]
fn out_of_reach_positions_get_exactly_zero_gradient() {
    // Only one output exists (anchor (2, 2)); displacements of ±2 reach B at {0, 2, 4}².
    let config = CorrelationConfig::new(0, 1, 2, 1, 2).expect("config");
    let a = random_tensor([1, 5, 5, 2], 3);
    let b = random_tensor([1, 5, 5, 2], 4);
    let out = ops::correlate(&a, &b, &config).expect("forward");
    assert_eq!(out.output.shape(), [1, 1, 1, 9]);

    let grad_out = Tensor::full([1, 1, 1, 9], 1.0);
    let grads = out.backward(&grad_out).expect("backward");

    for y in 0..5 {
        for x in 0..5 {
            for c in 0..2 {
                let ga = grads.grad_a.get(0, y, x, c);
                if (y, x) != (2, 2) {
                    assert_eq!(ga, 0.0, "grad_a at ({y}, {x}, {c})");
                }
                let gb = grads.grad_b.get(0, y, x, c);
                if y % 2 == 1 || x % 2 == 1 {
                    assert_eq!(gb, 0.0, "grad_b at ({y}, {x}, {c})");
                } else {
                    let expected = a.get(0, 2, 2, c) / 2.0;
                    assert!((gb - expected).abs() < 1e-6, "grad_b at ({y}, {x}, {c})");
                }
            }
        }
    }

    for c in 0..2 {
        let mut expected = 0.0;
        for y in [0, 2, 4] {
            for x in [0, 2, 4] {
                expected += b.get(0, y, x, c) / 2.0;
            }
        }
        assert!((grads.grad_a.get(0, 2, 2, c) - expected).abs() < 1e-5);
    }
}

#[test]
fn stride_skipped_elements_have_zero_gradient() {
    // stride_1 = 2 with kernel 1 never reads odd-offset anchors of the first input.
    let config = CorrelationConfig::new(0, 1, 1, 2, 1).expect("config");
    let a = random_tensor([1, 7, 7, 1], 8);
    let b = random_tensor([1, 7, 7, 1], 9);
    let out = ops::correlate(&a, &b, &config).expect("forward");
    let grad_out = random_tensor(out.output.shape(), 10);
    let grads = out.backward(&grad_out).expect("backward");

    for y in 0..7 {
        for x in 0..7 {
            let read = y >= 1 && x >= 1 && y <= 5 && x <= 5 && (y - 1) % 2 == 0 && (x - 1) % 2 == 0;
            if !read {
                assert_eq!(grads.grad_a.get(0, y, x, 0), 0.0, "grad_a at ({y}, {x})");
            }
        }
    }
}

#[test]
fn backward_overwrites_instead_of_accumulating() {
    let config = CorrelationConfig::new(1, 3, 1, 1, 1).expect("config");
    let a = random_tensor([2, 5, 4, 3], 21);
    let b = random_tensor([2, 5, 4, 3], 22);
    let out = ops::correlate(&a, &b, &config).expect("forward");
    let grad_out = random_tensor(out.output.shape(), 23);

    let first = out.backward(&grad_out).expect("first backward");
    let second = out.backward(&grad_out).expect("second backward");
    assert_eq!(first.grad_a.data(), second.grad_a.data());
    assert_eq!(first.grad_b.data(), second.grad_b.data());
}

#[test]
fn batch_items_are_independent() {
    let config = CorrelationConfig::new(2, 1, 2, 1, 1).expect("config");
    let a = random_tensor([2, 4, 5, 2], 31);
    let b = random_tensor([2, 4, 5, 2], 32);
    let out = ops::correlate(&a, &b, &config).expect("forward");

    // Upstream gradient only on the first batch item.
    let mut grad_out = random_tensor(out.output.shape(), 33);
    let item_len = grad_out.numel() / 2;
    grad_out.data_mut()[item_len..].fill(0.0);

    let grads = out.backward(&grad_out).expect("backward");
    let input_item = a.numel() / 2;
    assert!(grads.grad_a.data()[input_item..].iter().all(|v| *v == 0.0));
    assert!(grads.grad_b.data()[input_item..].iter().all(|v| *v == 0.0));
    assert!(grads.grad_a.data()[..input_item].iter().any(|v| *v != 0.0));
}

#[test]
fn backward_matches_finite_differences_for_even_kernel() {
    let config = CorrelationConfig::new(1, 2, 1, 1, 1).expect("config");
    let a = random_tensor([1, 4, 5, 2], 41);
    let b = random_tensor([1, 4, 5, 2], 42);
    let out = ops::correlate(&a, &b, &config).expect("forward");
    let weights = random_tensor(out.output.shape(), 43);

    let grads = out.backward(&weights).expect("backward");
    let (numeric_a, numeric_b) = numeric_grads(&a, &b, &config, &weights, 1e-2);
    assert_approx_eq(grads.grad_a.data(), &numeric_a, 2e-3);
    assert_approx_eq(grads.grad_b.data(), &numeric_b, 2e-3);
}
