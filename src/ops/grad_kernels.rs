use std::ops::RangeInclusive;

use rayon::prelude::*;

use crate::config::Geometry;
use crate::tensor::nhwc_offset;

/// Floor division for a positive divisor.
#[inline]
fn floor_div(a: isize, b: isize) -> isize {
    a.div_euclid(b)
}

/// Ceiling division for a positive divisor.
#[inline]
fn ceil_div(a: isize, b: isize) -> isize {
    -(-a).div_euclid(b)
}

/// Output pixels whose forward patch covers padded position (`l`, `m`).
///
/// `shift_x`/`shift_y` is the displacement applied to the sampled tensor;
/// zero for the first input. Returns `None` when no output reads the position.
fn covering_outputs(
    l: isize,
    m: isize,
    shift_x: isize,
    shift_y: isize,
    geom: &Geometry,
) -> Option<(RangeInclusive<usize>, RangeInclusive<usize>)> {
    let stride = geom.stride_1 as isize;
    let reach = geom.kernel_size as isize - 1;
    let max_disp = geom.max_displacement as isize;
    let last_x = geom.out_width as isize - 1;
    let last_y = geom.out_height as isize - 1;

    let xmin = ceil_div(l - reach - max_disp - shift_x, stride);
    let ymin = ceil_div(m - reach - max_disp - shift_y, stride);
    let xmax = floor_div(l - max_disp - shift_x, stride);
    let ymax = floor_div(m - max_disp - shift_y, stride);
    if xmax < 0 || ymax < 0 || xmin > last_x || ymin > last_y {
        return None;
    }

    let (xmin, xmax) = (xmin.max(0), xmax.min(last_x));
    let (ymin, ymax) = (ymin.max(0), ymax.min(last_y));
    if xmin > xmax || ymin > ymax {
        return None;
    }
    Some((
        xmin as usize..=xmax as usize,
        ymin as usize..=ymax as usize,
    ))
}

/// Sum of `grad_out[item, y, x, d]` over the covering rectangle.
#[inline]
fn window_sum(
    grad_out: &[f32],
    geom: &Geometry,
    item: usize,
    d: usize,
    xs: &RangeInclusive<usize>,
    ys: &RangeInclusive<usize>,
) -> f32 {
    let out_shape = geom.output_shape();
    let mut sum = 0.0f32;
    for y in ys.clone() {
        for x in xs.clone() {
            sum += grad_out[nhwc_offset(out_shape, item, y, x, d)];
        }
    }
    sum
}

/// Decode a flat unpadded element index into padded (m, l) and channel.
#[inline]
fn padded_position(idx: usize, geom: &Geometry) -> (isize, isize, usize) {
    let c = idx % geom.channels;
    let l = (idx / geom.channels) % geom.width + geom.pad_size;
    let m = idx / (geom.channels * geom.width) + geom.pad_size;
    (m as isize, l as isize, c)
}

/// Gradient of the correlation output with respect to the first input.
///
/// `grad_a` has the unpadded input shape and is fully overwritten.
pub fn grad_first_input(b_pad: &[f32], grad_out: &[f32], geom: &Geometry, grad_a: &mut [f32]) {
    let item_len = geom.height * geom.width * geom.channels;
    let padded_shape = geom.padded_shape();
    let radius = geom.grid_radius as isize;
    let stride_2 = geom.stride_2 as isize;
    let sumelems = geom.sumelems();

    grad_a
        .par_chunks_mut(item_len)
        .enumerate()
        .for_each(|(item, chunk)| {
            chunk.par_iter_mut().enumerate().for_each(|(idx, slot)| {
                let (m, l, c) = padded_position(idx, geom);
                // The anchor does not move with the displacement, so one range serves all.
                let Some((xs, ys)) = covering_outputs(l, m, 0, 0, geom) else {
                    *slot = 0.0;
                    return;
                };

                let mut sum = 0.0f32;
                for p in -radius..=radius {
                    for o in -radius..=radius {
                        let y2 = (m + stride_2 * p) as usize;
                        let x2 = (l + stride_2 * o) as usize;
                        let b_value = b_pad[nhwc_offset(padded_shape, item, y2, x2, c)];
                        let d = ((p + radius) * geom.grid_width as isize + (o + radius)) as usize;
                        sum += window_sum(grad_out, geom, item, d, &xs, &ys) * b_value;
                    }
                }
                *slot = sum / sumelems;
            });
        });
}

/// Gradient of the correlation output with respect to the second input.
///
/// Reads the first input at the position shifted against the displacement;
/// `grad_b` has the unpadded input shape and is fully overwritten.
pub fn grad_second_input(a_pad: &[f32], grad_out: &[f32], geom: &Geometry, grad_b: &mut [f32]) {
    let item_len = geom.height * geom.width * geom.channels;
    let padded_shape = geom.padded_shape();
    let radius = geom.grid_radius as isize;
    let stride_2 = geom.stride_2 as isize;
    let sumelems = geom.sumelems();

    grad_b
        .par_chunks_mut(item_len)
        .enumerate()
        .for_each(|(item, chunk)| {
            chunk.par_iter_mut().enumerate().for_each(|(idx, slot)| {
                let (m, l, c) = padded_position(idx, geom);
                let mut sum = 0.0f32;
                for p in -radius..=radius {
                    for o in -radius..=radius {
                        let s2o = stride_2 * o;
                        let s2p = stride_2 * p;
                        let Some((xs, ys)) = covering_outputs(l, m, s2o, s2p, geom) else {
                            continue;
                        };
                        let y1 = (m - s2p) as usize;
                        let x1 = (l - s2o) as usize;
                        let a_value = a_pad[nhwc_offset(padded_shape, item, y1, x1, c)];
                        let d = ((p + radius) * geom.grid_width as isize + (o + radius)) as usize;
                        sum += window_sum(grad_out, geom, item, d, &xs, &ys) * a_value;
                    }
                }
                *slot = sum / sumelems;
            });
        });
}
