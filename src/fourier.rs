//! Frequency-Domain Helpers
//!
//! 2-D FFT utilities and the fractional Fourier transform used by the ghost
//! ringing pattern. Everything operates on row-major `Complex<f64>` grids;
//! the callers convert to f32 only when uploading to the device.

use std::f64::consts::PI;

use num_complex::Complex;
use rustfft::FftPlanner;

type C64 = Complex<f64>;

fn transform_2d(data: &mut [C64], width: usize, height: usize, inverse: bool) {
    assert_eq!(data.len(), width * height);
    let mut planner = FftPlanner::new();
    let row_fft = if inverse {
        planner.plan_fft_inverse(width)
    } else {
        planner.plan_fft_forward(width)
    };
    let col_fft = if inverse {
        planner.plan_fft_inverse(height)
    } else {
        planner.plan_fft_forward(height)
    };

    for row in data.chunks_exact_mut(width) {
        row_fft.process(row);
    }

    let mut column = vec![C64::default(); height];
    for x in 0..width {
        for y in 0..height {
            column[y] = data[y * width + x];
        }
        col_fft.process(&mut column);
        for y in 0..height {
            data[y * width + x] = column[y];
        }
    }
}

/// Unnormalized forward 2-D FFT.
pub fn fft2(data: &mut [C64], width: usize, height: usize) {
    transform_2d(data, width, height, false);
}

/// Orthonormal forward 2-D FFT (unitary scaling).
pub fn fft2_ortho(data: &mut [C64], width: usize, height: usize) {
    transform_2d(data, width, height, false);
    let norm = 1.0 / ((width * height) as f64).sqrt();
    for v in data.iter_mut() {
        *v *= norm;
    }
}

/// Orthonormal inverse 2-D FFT.
pub fn ifft2_ortho(data: &mut [C64], width: usize, height: usize) {
    transform_2d(data, width, height, true);
    let norm = 1.0 / ((width * height) as f64).sqrt();
    for v in data.iter_mut() {
        *v *= norm;
    }
}

/// Swaps half-spaces along both axes, moving the zero frequency to the
/// centre (rolls each axis by `n / 2`).
pub fn fftshift<T: Copy + Default>(data: &mut [T], width: usize, height: usize) {
    assert_eq!(data.len(), width * height);
    let mut shifted = vec![T::default(); data.len()];
    let dx = width / 2;
    let dy = height / 2;
    for y in 0..height {
        let ty = (y + dy) % height;
        for x in 0..width {
            let tx = (x + dx) % width;
            shifted[ty * width + tx] = data[y * width + x];
        }
    }
    data.copy_from_slice(&shifted);
}

/// FFT frequency index for sample `i` of an `n`-point axis:
/// `0, 1, .. n/2-1, -n/2, .., -1`.
fn freq_index(i: usize, n: usize) -> f64 {
    if i < n.div_ceil(2) {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

/// The quadratic chirp phase argument shared by both chirp factors:
/// `iπ·(fy²/H + fx²/W)` per sample.
fn chirp_arg(width: usize, height: usize) -> Vec<C64> {
    let mut arg = Vec::with_capacity(width * height);
    for y in 0..height {
        let fy = freq_index(y, height);
        for x in 0..width {
            let fx = freq_index(x, width);
            let phase = PI * (fy * fy / height as f64 + fx * fx / width as f64);
            arg.push(C64::new(0.0, phase));
        }
    }
    arg
}

/// Reduces the transform order into `[0.5, 1.5)` by peeling off whole
/// Fourier transforms, flips and inverses, avoiding the `tan(π/2)` pole of
/// the chirp decomposition near integer orders.
fn normalize_order(data: &mut Vec<C64>, width: usize, height: usize, alpha: f64) -> f64 {
    let rel = alpha.rem_euclid(4.0);
    if rel < 0.5 {
        ifft2_ortho(data, width, height);
        rel + 1.0
    } else if rel < 1.5 {
        rel
    } else if rel < 2.5 {
        fft2_ortho(data, width, height);
        rel - 1.0
    } else if rel < 3.5 {
        // flip along both axes
        data.reverse();
        rel - 2.0
    } else {
        ifft2_ortho(data, width, height);
        rel - 3.0
    }
}

/// 2-D fractional Fourier transform of order `alpha` (1.0 is the ordinary
/// orthonormal FFT), via the chirp-multiplication decomposition.
#[must_use]
pub fn frft2(input: &[C64], width: usize, height: usize, alpha: f64) -> Vec<C64> {
    let mut data = input.to_vec();
    let alpha = normalize_order(&mut data, width, height, alpha);

    let phi = alpha * PI / 2.0;
    let cotan_phi = 1.0 / phi.tan();
    let sq_cotan_phi = (1.0 + cotan_phi * cotan_phi).sqrt();

    let n = (width * height) as f64;
    let scale = (C64::new(1.0, -cotan_phi)).sqrt() / n.sqrt();

    let arg = chirp_arg(width, height);
    let chirp1: Vec<C64> = arg.iter().map(|a| (*a * (cotan_phi - sq_cotan_phi)).exp()).collect();
    let mut fft1: Vec<C64> = arg.iter().map(|a| (*a * sq_cotan_phi).exp()).collect();

    fft2_ortho(&mut fft1, width, height);

    let mut fft2_buf: Vec<C64> = chirp1.iter().zip(&data).map(|(c, v)| c * v).collect();
    fft2_ortho(&mut fft2_buf, width, height);

    let mut out: Vec<C64> = fft1.iter().zip(&fft2_buf).map(|(a, b)| a * b).collect();
    ifft2_ortho(&mut out, width, height);

    out.iter()
        .zip(&chirp1)
        .map(|(v, c)| scale * c * v)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(width: usize, height: usize) -> Vec<C64> {
        let mut data = vec![C64::default(); width * height];
        data[0] = C64::new(1.0, 0.0);
        data
    }

    #[test]
    fn fft_of_impulse_is_flat() {
        let mut data = impulse(8, 8);
        fft2_ortho(&mut data, 8, 8);
        for v in &data {
            assert!((v.re - 0.125).abs() < 1e-12 && v.im.abs() < 1e-12);
        }
    }

    #[test]
    fn ortho_round_trip() {
        let mut data: Vec<C64> = (0..64).map(|i| C64::new(f64::from(i), 0.0)).collect();
        let original = data.clone();
        fft2_ortho(&mut data, 8, 8);
        ifft2_ortho(&mut data, 8, 8);
        for (a, b) in data.iter().zip(&original) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn fftshift_involution_for_even_sizes() {
        let mut data: Vec<i32> = (0..24).collect();
        let original = data.clone();
        fftshift(&mut data, 6, 4);
        assert_ne!(data, original);
        fftshift(&mut data, 6, 4);
        assert_eq!(data, original);
    }
}
