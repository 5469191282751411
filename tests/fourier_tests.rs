//! Frequency-Domain Tests
//!
//! Properties of the 2-D FFT helpers and the fractional Fourier
//! transform used by the ghost ringing pattern.

use num_complex::Complex;

use lensflare::fourier::{fft2_ortho, fftshift, frft2, ifft2_ortho};

type C64 = Complex<f64>;

fn square_mask(size: usize, inner: std::ops::Range<usize>) -> Vec<C64> {
    let mut data = vec![C64::default(); size * size];
    for y in inner.clone() {
        for x in inner.clone() {
            data[y * size + x] = C64::new(1.0, 0.0);
        }
    }
    data
}

fn max_norm_diff(a: &[C64], b: &[C64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max)
}

#[test]
fn orthonormal_transforms_preserve_energy() {
    let mut data = square_mask(16, 4..12);
    let energy_before: f64 = data.iter().map(num_complex::Complex::norm_sqr).sum();
    fft2_ortho(&mut data, 16, 16);
    let energy_after: f64 = data.iter().map(num_complex::Complex::norm_sqr).sum();
    assert!((energy_before - energy_after).abs() < 1e-9);
}

#[test]
fn inverse_undoes_forward() {
    let original = square_mask(16, 3..13);
    let mut data = original.clone();
    fft2_ortho(&mut data, 16, 16);
    ifft2_ortho(&mut data, 16, 16);
    assert!(max_norm_diff(&data, &original) < 1e-9);
}

#[test]
fn frft_is_linear() {
    let mask = square_mask(16, 5..11);
    let scaled: Vec<C64> = mask.iter().map(|v| *v * 3.0).collect();

    let out = frft2(&mask, 16, 16, 0.4);
    let out_scaled = frft2(&scaled, 16, 16, 0.4);

    let rescaled: Vec<C64> = out.iter().map(|v| *v * 3.0).collect();
    assert!(max_norm_diff(&out_scaled, &rescaled) < 1e-9);
}

#[test]
fn frft_order_is_periodic_in_four() {
    let mask = square_mask(16, 4..12);
    let a = frft2(&mask, 16, 16, 0.7);
    let b = frft2(&mask, 16, 16, 4.7);
    assert!(max_norm_diff(&a, &b) < 1e-9);
}

#[test]
fn frft_output_is_finite_for_awkward_orders() {
    let mask = square_mask(16, 4..12);
    // orders near the quadrant edges exercise the normalization cases
    for alpha in [0.0, 0.49, 0.5, 1.0, 1.49, 2.0, 3.0, 3.99] {
        let out = frft2(&mask, 16, 16, alpha);
        assert!(
            out.iter().all(|v| v.re.is_finite() && v.im.is_finite()),
            "non-finite output at order {alpha}"
        );
    }
}

#[test]
fn fftshift_centres_the_corner() {
    let mut data = vec![0.0f32; 16];
    data[0] = 1.0;
    fftshift(&mut data, 4, 4);
    assert_eq!(data[2 * 4 + 2], 1.0);
}
