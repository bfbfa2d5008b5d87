use serde::{Deserialize, Serialize};

use crate::params::{FourCc, ResolutionOption};

/// Decoded frame owned by a single pipeline cycle
#[derive(Debug, Clone)]
pub struct Frame {
    /// Tightly packed pixels, `width * height * layout.bytes_per_pixel()` bytes
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

/// Byte layouts a frame can be in between capture and sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// Capture-side layout
    Bgr24,
    /// Loopback-side layout
    Rgb24,
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Bgr24 | PixelLayout::Rgb24 => 3,
            PixelLayout::Gray8 => 1,
        }
    }

    pub fn fourcc(&self) -> FourCc {
        match self {
            PixelLayout::Bgr24 => FourCc::BGR3,
            PixelLayout::Rgb24 => FourCc::RGB3,
            PixelLayout::Gray8 => FourCc(*b"GREY"),
        }
    }

    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
            layout,
        }
    }

    pub fn resolution(&self) -> ResolutionOption {
        ResolutionOption::new(self.width, self.height)
    }

    /// True when the buffer length matches the declared shape.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.layout.frame_size(self.width, self.height)
    }

    /// Single-channel intensity using BT.601 weights.
    pub fn to_gray(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Gray8 => self.data.clone(),
            PixelLayout::Bgr24 => self
                .data
                .chunks_exact(3)
                .map(|px| luma(px[2], px[1], px[0]))
                .collect(),
            PixelLayout::Rgb24 => self
                .data
                .chunks_exact(3)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
        }
    }

    /// Replace the pixels with a single-channel image expanded to `layout`,
    /// keeping dimensions and timing metadata.
    pub fn replace_with_gray(&mut self, gray: &[u8], layout: PixelLayout) {
        self.data = match layout {
            PixelLayout::Gray8 => gray.to_vec(),
            PixelLayout::Bgr24 | PixelLayout::Rgb24 => {
                gray.iter().flat_map(|&v| [v, v, v]).collect()
            }
        };
        self.layout = layout;
    }

    /// Convert to `layout`; a no-op when already there.
    pub fn into_layout(mut self, layout: PixelLayout) -> Frame {
        if self.layout == layout {
            return self;
        }
        match (self.layout, layout) {
            (PixelLayout::Bgr24, PixelLayout::Rgb24) | (PixelLayout::Rgb24, PixelLayout::Bgr24) => {
                swap_red_blue(&mut self.data);
                self.layout = layout;
            }
            (_, PixelLayout::Gray8) => {
                let gray = self.to_gray();
                self.replace_with_gray(&gray, layout);
            }
            (PixelLayout::Gray8, _) => {
                let gray = std::mem::take(&mut self.data);
                self.replace_with_gray(&gray, layout);
            }
            _ => unreachable!("identical layouts handled above"),
        }
        self
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29 + 128) >> 8) as u8
}

/// Swap the first and third byte of every packed 3-byte pixel.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_to_rgb_swaps_channels() {
        let frame = Frame::new(2, 1, PixelLayout::Bgr24, vec![1, 2, 3, 4, 5, 6]);
        let rgb = frame.into_layout(PixelLayout::Rgb24);
        assert_eq!(rgb.layout, PixelLayout::Rgb24);
        assert_eq!(rgb.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn gray_expands_to_three_channels() {
        let frame = Frame::new(2, 1, PixelLayout::Gray8, vec![0, 255]);
        let bgr = frame.into_layout(PixelLayout::Bgr24);
        assert_eq!(bgr.data, vec![0, 0, 0, 255, 255, 255]);
        assert!(bgr.is_well_formed());
    }

    #[test]
    fn luma_of_extremes() {
        let frame = Frame::new(2, 1, PixelLayout::Bgr24, vec![0, 0, 0, 255, 255, 255]);
        assert_eq!(frame.to_gray(), vec![0, 255]);
    }

    #[test]
    fn luma_weights_green_highest() {
        let frame = Frame::new(3, 1, PixelLayout::Rgb24, vec![255, 0, 0, 0, 255, 0, 0, 0, 255]);
        let gray = frame.to_gray();
        assert!(gray[1] > gray[0] && gray[0] > gray[2]);
    }

    #[test]
    fn well_formed_checks_length() {
        let frame = Frame::new(4, 4, PixelLayout::Rgb24, vec![0; 47]);
        assert!(!frame.is_well_formed());
    }
}
