#![allow(dead_code)]

use flowcorr::{ops, CorrelationConfig, Tensor};

pub fn assert_approx_eq(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Length mismatch: actual={} expected={}",
        actual.len(),
        expected.len()
    );
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (*a - *e).abs() <= tol,
            "Mismatch at index {}: actual={} expected={} with tol={}",
            i,
            a,
            e,
            tol
        );
    }
}

/// Value of `t` at padded coordinates, zero in the border.
fn sample_padded(t: &Tensor, pad: usize, n: usize, y: isize, x: isize, c: usize) -> f32 {
    let y = y - pad as isize;
    let x = x - pad as isize;
    if y < 0 || x < 0 || y >= t.height() as isize || x >= t.width() as isize {
        return 0.0;
    }
    t.get(n, y as usize, x as usize, c)
}

/// Direct evaluation of the correlation definition, without padded buffers.
pub fn reference_correlation(a: &Tensor, b: &Tensor, config: &CorrelationConfig) -> Vec<f32> {
    let geom = config.geometry(a.shape()).expect("reference geometry");
    let k = config.kernel_size as isize;
    let radius = config.neighborhood_grid_radius as isize;
    let width = config.neighborhood_grid_width as isize;
    let mut out = Vec::with_capacity(geom.output_shape().iter().product());
    for n in 0..geom.batch {
        for oy in 0..geom.out_height {
            for ox in 0..geom.out_width {
                let x1 = (ox * config.stride_1 + config.max_displacement) as isize;
                let y1 = (oy * config.stride_1 + config.max_displacement) as isize;
                for d in 0..geom.out_channels as isize {
                    let s2o = (d % width - radius) * config.stride_2 as isize;
                    let s2p = (d / width - radius) * config.stride_2 as isize;
                    let mut sum = 0.0f64;
                    for j in 0..k {
                        for i in 0..k {
                            for c in 0..geom.channels {
                                let va = sample_padded(a, config.pad_size, n, y1 + j, x1 + i, c);
                                let vb = sample_padded(
                                    b,
                                    config.pad_size,
                                    n,
                                    y1 + s2p + j,
                                    x1 + s2o + i,
                                    c,
                                );
                                sum += va as f64 * vb as f64;
                            }
                        }
                    }
                    out.push((sum / geom.patch_len() as f64) as f32);
                }
            }
        }
    }
    out
}

/// Scalar loss `sum(correlate(a, b) * weights)` in f64.
pub fn weighted_loss(a: &Tensor, b: &Tensor, config: &CorrelationConfig, weights: &Tensor) -> f64 {
    let out = ops::correlate(a, b, config).expect("forward for loss");
    out.output
        .data()
        .iter()
        .zip(weights.data())
        .map(|(o, w)| *o as f64 * *w as f64)
        .sum()
}

/// Central finite differences of `weighted_loss` with respect to every element of `a` or `b`.
pub fn numeric_grads(
    a: &Tensor,
    b: &Tensor,
    config: &CorrelationConfig,
    weights: &Tensor,
    eps: f32,
) -> (Vec<f32>, Vec<f32>) {
    let perturb = |target: &Tensor, idx: usize, delta: f32| {
        let mut t = target.clone();
        t.data_mut()[idx] += delta;
        t
    };
    let grad_a = (0..a.numel())
        .map(|idx| {
            let plus = weighted_loss(&perturb(a, idx, eps), b, config, weights);
            let minus = weighted_loss(&perturb(a, idx, -eps), b, config, weights);
            ((plus - minus) / (2.0 * eps as f64)) as f32
        })
        .collect();
    let grad_b = (0..b.numel())
        .map(|idx| {
            let plus = weighted_loss(a, &perturb(b, idx, eps), config, weights);
            let minus = weighted_loss(a, &perturb(b, idx, -eps), config, weights);
            ((plus - minus) / (2.0 * eps as f64)) as f32
        })
        .collect();
    (grad_a, grad_b)
}

pub fn sequence_tensor(shape: [usize; 4], start: f32) -> Tensor {
    let numel: usize = shape.iter().product();
    let data = (0..numel).map(|i| start + i as f32).collect();
    Tensor::from_vec(data, shape)
}
