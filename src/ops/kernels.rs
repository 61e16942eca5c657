use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Geometry;
use crate::tensor::nhwc_offset;

/// Which forward kernel family to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelPath {
    /// Kernel extent folded to a constant for kernel_size 1, 2 and 3, generic otherwise.
    Specialized,
    /// Always the runtime-sized kernel.
    Generic,
}

/// Copy `src` into the interior of `dst`, which must arrive zero-filled.
///
/// One work unit per padded row. Border rows are left untouched; interior rows
/// receive the whole source row as one contiguous run.
pub fn pad_kernel(src: &[f32], src_shape: [usize; 4], pad: usize, dst: &mut [f32]) {
    let [batch, height, width, channels] = src_shape;
    let padded_height = height + 2 * pad;
    let row_len = (width + 2 * pad) * channels;
    let src_row_len = width * channels;
    debug_assert_eq!(dst.len(), batch * padded_height * row_len);
    if row_len == 0 {
        return;
    }

    let lead = pad * channels;
    dst.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, lanes)| {
            let y = row % padded_height;
            if y < pad || y >= pad + height {
                return;
            }
            let start = nhwc_offset(src_shape, row / padded_height, y - pad, 0, 0);
            lanes[lead..lead + src_row_len].copy_from_slice(&src[start..start + src_row_len]);
        });
}

/// Correlation forward pass over padded inputs; overwrites every element of `out`.
pub fn correlation_forward(
    a_pad: &[f32],
    b_pad: &[f32],
    geom: &Geometry,
    path: KernelPath,
    out: &mut [f32],
) {
    let row_stride = geom.padded_width * geom.channels;
    let channels = geom.channels;
    match (path, geom.kernel_size) {
        (KernelPath::Specialized, 1) => forward_units(a_pad, b_pad, geom, out, |patch, b, base| {
            patch_dot(patch, b, base, row_stride, 1, channels)
        }),
        (KernelPath::Specialized, 2) => forward_units(a_pad, b_pad, geom, out, |patch, b, base| {
            patch_dot(patch, b, base, row_stride, 2, channels)
        }),
        (KernelPath::Specialized, 3) => forward_units(a_pad, b_pad, geom, out, |patch, b, base| {
            patch_dot(patch, b, base, row_stride, 3, channels)
        }),
        (_, kernel_size) => forward_units(a_pad, b_pad, geom, out, |patch, b, base| {
            patch_dot(patch, b, base, row_stride, kernel_size, channels)
        }),
    }
}

/// Runs one unit per output pixel (n, oy, ox).
///
/// Each unit stages the anchored patch of `a_pad` into a worker-local buffer,
/// then scores it against every displaced patch of `b_pad`.
fn forward_units<F>(a_pad: &[f32], b_pad: &[f32], geom: &Geometry, out: &mut [f32], dot: F)
where
    F: Fn(&[f32], &[f32], usize) -> f32 + Sync,
{
    let padded_shape = geom.padded_shape();
    let kernel_size = geom.kernel_size;
    let row_len = kernel_size * geom.channels;
    let sumelems = geom.sumelems();

    out.par_chunks_mut(geom.out_channels)
        .enumerate()
        .for_each_init(
            || vec![0.0f32; geom.patch_len()],
            |staging, (unit, top)| {
                let ox = unit % geom.out_width;
                let oy = (unit / geom.out_width) % geom.out_height;
                let n = unit / (geom.out_width * geom.out_height);

                // Anchor is not re-centred by kernel_radius: the patch starts here.
                let x1 = ox * geom.stride_1 + geom.max_displacement;
                let y1 = oy * geom.stride_1 + geom.max_displacement;

                for j in 0..kernel_size {
                    let src = nhwc_offset(padded_shape, n, y1 + j, x1, 0);
                    staging[j * row_len..(j + 1) * row_len]
                        .copy_from_slice(&a_pad[src..src + row_len]);
                }

                for (d, slot) in top.iter_mut().enumerate() {
                    let (s2o, s2p) = geom.displacement(d);
                    let x2 = (x1 as isize + s2o) as usize;
                    let y2 = (y1 as isize + s2p) as usize;
                    let base = nhwc_offset(padded_shape, n, y2, x2, 0);
                    *slot = dot(staging.as_slice(), b_pad, base) / sumelems;
                }
            },
        );
}

/// Dot product of a staged patch against the patch of `b` starting at `base`.
///
/// Accumulates in (kernel row, kernel column, channel) order. Always inlined so
/// the literal extents passed by the specialized path become loop constants.
#[inline(always)]
fn patch_dot(
    patch: &[f32],
    b: &[f32],
    base: usize,
    row_stride: usize,
    kernel_size: usize,
    channels: usize,
) -> f32 {
    let row_len = kernel_size * channels;
    let mut sum = 0.0f32;
    for j in 0..kernel_size {
        let staged = &patch[j * row_len..(j + 1) * row_len];
        let start = base + j * row_stride;
        for (p, q) in staged.iter().zip(&b[start..start + row_len]) {
            sum += p * q;
        }
    }
    sum
}
