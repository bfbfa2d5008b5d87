//! Host-memory Canny
//!
//! Same stages and arithmetic as `canny.wgsl`: unblurred Sobel of the
//! configured aperture, L1 magnitude, 4-direction non-maximum suppression,
//! then hysteresis between the low and high thresholds.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::Kernel;

use super::{EdgeParams, ProcessingError};

const NONE: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

// tan(22.5°) and tan(67.5°)
const TAN_22_5: f32 = 0.414_213_56;
const TAN_67_5: f32 = 2.414_213_6;

/// Canny over `image`/`imageproc` buffers
#[derive(Debug, Clone)]
pub struct CpuEdgeDetector {
    params: EdgeParams,
    kernel_size: u32,
    /// Row-major correlation kernels
    kernel_x: Vec<f32>,
    kernel_y: Vec<f32>,
}

impl CpuEdgeDetector {
    /// Aperture 5 uses the 5x5 Sobel, anything else the 3x3 one.
    pub fn new(params: EdgeParams) -> Self {
        let (smooth, derive): (&[f32], &[f32]) = if params.aperture == 5 {
            (&[1.0, 4.0, 6.0, 4.0, 1.0], &[-1.0, -2.0, 0.0, 2.0, 1.0])
        } else {
            (&[1.0, 2.0, 1.0], &[-1.0, 0.0, 1.0])
        };

        Self {
            params,
            kernel_size: smooth.len() as u32,
            kernel_x: smooth
                .iter()
                .flat_map(|s| derive.iter().map(move |d| d * s))
                .collect(),
            kernel_y: derive
                .iter()
                .flat_map(|d| smooth.iter().map(move |s| s * d))
                .collect(),
        }
    }

    pub fn thresholds(&self) -> (f32, f32) {
        (self.params.low_threshold, self.params.high_threshold)
    }

    /// Edge map of a `width * height` intensity image, 0 or 255 per pixel.
    pub fn detect(&self, gray: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, ProcessingError> {
        let len = gray.len();
        let image = GrayImage::from_raw(width, height, gray)
            .filter(|_| width > 0 && height > 0)
            .ok_or(ProcessingError::FrameShape { width, height, len })?;

        let gx = self.correlate(&self.kernel_x, &image);
        let gy = self.correlate(&self.kernel_y, &image);
        let magnitude: Vec<f32> = gx
            .iter()
            .zip(gy.iter())
            .map(|(x, y)| x.abs() + y.abs())
            .collect();

        let (w, h) = (width as usize, height as usize);
        let classes = self.suppress(&magnitude, &gx, &gy, w, h);
        Ok(hysteresis(classes, w, h))
    }

    /// Clamp-to-edge correlation, as the shader samples.
    fn correlate(&self, kernel: &[f32], image: &GrayImage) -> Image<Luma<f32>> {
        Kernel::new(kernel, self.kernel_size, self.kernel_size)
            .filter::<Luma<u8>, _, Luma<f32>>(image, |out: &mut f32, acc: f32| *out = acc)
    }

    /// Classify local maxima along the gradient; borders are never edges.
    fn suppress(&self, magnitude: &[f32], gx: &[f32], gy: &[f32], w: usize, h: usize) -> Vec<u8> {
        let (low, high) = self.thresholds();
        let mut classes = vec![NONE; w * h];
        let at = |x: usize, y: usize, dx: isize, dy: isize| {
            magnitude[y.wrapping_add_signed(dy) * w + x.wrapping_add_signed(dx)]
        };

        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let i = y * w + x;
                let m = magnitude[i];
                let (dx, dy) = direction(gx[i], gy[i]);
                if m > low && m > at(x, y, -dx, -dy) && m >= at(x, y, dx, dy) {
                    classes[i] = if m > high { STRONG } else { WEAK };
                }
            }
        }
        classes
    }
}

/// Neighbour offset across the edge for a gradient direction.
fn direction(gx: f32, gy: f32) -> (isize, isize) {
    let (ax, ay) = (gx.abs(), gy.abs());
    if ay <= ax * TAN_22_5 {
        (1, 0)
    } else if ay >= ax * TAN_67_5 {
        (0, 1)
    } else if (gx >= 0.0) == (gy >= 0.0) {
        (1, 1)
    } else {
        (-1, 1)
    }
}

/// Promote weak pixels 8-connected to a strong one, then binarize.
fn hysteresis(mut classes: Vec<u8>, w: usize, h: usize) -> Vec<u8> {
    let mut stack: Vec<usize> = classes
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c == STRONG)
        .map(|(i, _)| i)
        .collect();

    while let Some(i) = stack.pop() {
        let (x, y) = (i % w, i / w);
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let n = ny * w + nx;
                if classes[n] == WEAK {
                    classes[n] = STRONG;
                    stack.push(n);
                }
            }
        }
    }

    classes
        .into_iter()
        .map(|c| if c == STRONG { 255 } else { 0 })
        .collect()
}
