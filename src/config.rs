use serde::{Deserialize, Serialize};

use crate::error::{CorrelationError, Result};

/// Parameters of one correlation call.
///
/// `stride_1` steps the anchor over the first tensor, `stride_2` steps the
/// displacement grid over the second. The grid spans
/// `neighborhood_grid_width²` offsets and becomes the output channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub pad_size: usize,
    pub kernel_size: usize,
    pub max_displacement: usize,
    pub stride_1: usize,
    pub stride_2: usize,
    pub neighborhood_grid_radius: usize,
    pub neighborhood_grid_width: usize,
}

impl CorrelationConfig {
    /// Build a configuration whose neighborhood grid is derived from
    /// `max_displacement / stride_2`.
    pub fn new(
        pad_size: usize,
        kernel_size: usize,
        max_displacement: usize,
        stride_1: usize,
        stride_2: usize,
    ) -> Result<Self> {
        if stride_2 == 0 {
            return Err(CorrelationError::InvalidConfig {
                op: "correlation_config.new",
                msg: "stride_2 must be > 0".to_string(),
            });
        }
        let radius = max_displacement / stride_2;
        let config = Self {
            pad_size,
            kernel_size,
            max_displacement,
            stride_1,
            stride_2,
            neighborhood_grid_radius: radius,
            neighborhood_grid_width: 2 * radius + 1,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| CorrelationError::InvalidConfig {
                op: "correlation_config.from_json",
                msg: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn kernel_radius(&self) -> usize {
        self.kernel_size.saturating_sub(1) / 2
    }

    pub fn output_channels(&self) -> usize {
        self.neighborhood_grid_width * self.neighborhood_grid_width
    }

    pub fn validate(&self) -> Result<()> {
        let op = "correlation_config.validate";
        let fail = |msg: String| Err(CorrelationError::InvalidConfig { op, msg });
        if self.kernel_size == 0 {
            return fail("kernel_size must be > 0".to_string());
        }
        if self.stride_1 == 0 || self.stride_2 == 0 {
            return fail(format!(
                "strides must be > 0 (stride_1={}, stride_2={})",
                self.stride_1, self.stride_2
            ));
        }
        if self.neighborhood_grid_width != 2 * self.neighborhood_grid_radius + 1 {
            return fail(format!(
                "neighborhood_grid_width {} must equal 2 * radius + 1 (radius={})",
                self.neighborhood_grid_width, self.neighborhood_grid_radius
            ));
        }
        if self.neighborhood_grid_radius * self.stride_2 > self.max_displacement {
            return fail(format!(
                "neighborhood reach {} exceeds max_displacement {}",
                self.neighborhood_grid_radius * self.stride_2,
                self.max_displacement
            ));
        }
        Ok(())
    }

    /// Derive padded and output geometry for inputs of `input_shape` (NHWC).
    pub fn geometry(&self, input_shape: [usize; 4]) -> Result<Geometry> {
        self.validate()?;
        let op = "correlation_config.geometry";
        let [batch, height, width, channels] = input_shape;
        if input_shape.iter().any(|&dim| dim == 0) {
            return Err(CorrelationError::InvalidConfig {
                op,
                msg: format!("input extents must be > 0, got {input_shape:?}"),
            });
        }
        let padded_height = height + 2 * self.pad_size;
        let padded_width = width + 2 * self.pad_size;
        // The anchor starts at max_displacement and the patch reaches
        // kernel_size - 1 further; displaced patches reach max_displacement more.
        let border = 2 * self.max_displacement + (self.kernel_size - 1);
        let out_height = output_extent(padded_height, border, self.stride_1);
        let out_width = output_extent(padded_width, border, self.stride_1);
        if out_height == 0 || out_width == 0 {
            return Err(CorrelationError::InvalidConfig {
                op,
                msg: format!(
                    "non-positive output extent {out_height}x{out_width} for padded input {padded_height}x{padded_width} (border {border})"
                ),
            });
        }
        Ok(Geometry {
            batch,
            height,
            width,
            channels,
            pad_size: self.pad_size,
            padded_height,
            padded_width,
            out_height,
            out_width,
            out_channels: self.output_channels(),
            kernel_size: self.kernel_size,
            max_displacement: self.max_displacement,
            stride_1: self.stride_1,
            stride_2: self.stride_2,
            grid_radius: self.neighborhood_grid_radius,
            grid_width: self.neighborhood_grid_width,
        })
    }
}

fn output_extent(padded: usize, border: usize, stride: usize) -> usize {
    if padded <= border {
        return 0;
    }
    (padded - border).div_ceil(stride)
}

/// Constants shared by every kernel of one correlation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub pad_size: usize,
    pub padded_height: usize,
    pub padded_width: usize,
    pub out_height: usize,
    pub out_width: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub max_displacement: usize,
    pub stride_1: usize,
    pub stride_2: usize,
    pub grid_radius: usize,
    pub grid_width: usize,
}

impl Geometry {
    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.height, self.width, self.channels]
    }

    pub fn padded_shape(&self) -> [usize; 4] {
        [
            self.batch,
            self.padded_height,
            self.padded_width,
            self.channels,
        ]
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.out_height, self.out_width, self.out_channels]
    }

    /// Elements of one kernel_size x kernel_size x channels patch.
    pub fn patch_len(&self) -> usize {
        self.kernel_size * self.kernel_size * self.channels
    }

    /// Size of the per-unit staging buffer holding the anchored patch.
    pub fn staging_bytes(&self) -> usize {
        self.patch_len() * std::mem::size_of::<f32>()
    }

    /// Normalization divisor applied to every correlation sum.
    pub fn sumelems(&self) -> f32 {
        self.patch_len() as f32
    }

    /// Grid offset (dx, dy) in pixels for displacement channel `d`.
    #[inline]
    pub fn displacement(&self, d: usize) -> (isize, isize) {
        let radius = self.grid_radius as isize;
        let stride = self.stride_2 as isize;
        let dx = (d % self.grid_width) as isize - radius;
        let dy = (d / self.grid_width) as isize - radius;
        (dx * stride, dy * stride)
    }
}
