use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{CorrelationError, Result};
use crate::tensor::Tensor;

/// Configuration for a synthetic pair of feature maps related by a translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticPairConfig {
    pub shape: [usize; 4],
    pub shift_x: isize,
    pub shift_y: isize,
    pub seed: u64,
}

/// Two feature maps where `second` is `first` moved by (shift_x, shift_y).
#[derive(Debug, Clone)]
pub struct FeaturePair {
    pub first: Tensor,
    pub second: Tensor,
}

/// Uniform noise in [-1, 1) with a fixed seed.
pub fn random_tensor(shape: [usize; 4], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let numel: usize = shape.iter().product();
    let data = (0..numel).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    Tensor::from_vec(data, shape)
}

/// Generate a pair with `second[y, x] = first[y - shift_y, x - shift_x]`, zero where undefined.
pub fn make_shifted_pair(config: &SyntheticPairConfig) -> Result<FeaturePair> {
    let [batch, height, width, channels] = config.shape;
    if config.shape.iter().any(|&dim| dim == 0) {
        return Err(CorrelationError::InvalidArgument {
            op: "make_shifted_pair",
            msg: format!("shape extents must be > 0, got {:?}", config.shape),
        });
    }
    if config.shift_x.unsigned_abs() >= width || config.shift_y.unsigned_abs() >= height {
        return Err(CorrelationError::InvalidArgument {
            op: "make_shifted_pair",
            msg: format!(
                "shift ({}, {}) leaves no overlap in a {}x{} map",
                config.shift_x, config.shift_y, width, height
            ),
        });
    }

    let first = random_tensor(config.shape, config.seed);
    let mut second = Tensor::zeros(config.shape);
    for n in 0..batch {
        for y in 0..height {
            let src_y = y as isize - config.shift_y;
            if src_y < 0 || src_y >= height as isize {
                continue;
            }
            for x in 0..width {
                let src_x = x as isize - config.shift_x;
                if src_x < 0 || src_x >= width as isize {
                    continue;
                }
                let src = first.offset(n, src_y as usize, src_x as usize, 0);
                let dst = second.offset(n, y, x, 0);
                second.data_mut()[dst..dst + channels]
                    .copy_from_slice(&first.data()[src..src + channels]);
            }
        }
    }
    Ok(FeaturePair { first, second })
}
