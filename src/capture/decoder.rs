use zune_jpeg::JpegDecoder;

use super::frame::{swap_red_blue, PixelLayout};
use crate::params::FourCc;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty buffer")]
    Empty,
    #[error("jpeg: {0}")]
    Jpeg(String),
    #[error("expected {expected} bytes for {fourcc}, got {actual}")]
    ShortBuffer {
        fourcc: FourCc,
        expected: usize,
        actual: usize,
    },
    #[error("decoded {width}x{height}, device reported {expected_width}x{expected_height}")]
    Dimensions {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("no decoder for {0}")]
    Unsupported(FourCc),
}

pub fn is_supported(fourcc: FourCc) -> bool {
    matches!(
        fourcc,
        FourCc::MJPG | FourCc::YUYV | FourCc::RGB3 | FourCc::BGR3
    )
}

/// Decode one raw capture buffer into the capture-side layout (BGR24).
pub fn decode_frame(
    data: &[u8],
    fourcc: FourCc,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let pixels = width as usize * height as usize;
    match fourcc {
        FourCc::MJPG => {
            let mut decoder = JpegDecoder::new(data);
            let mut rgb = decoder
                .decode()
                .map_err(|e| DecodeError::Jpeg(format!("{e:?}")))?;
            let (w, h) = decoder
                .dimensions()
                .map(|(w, h)| (w as u32, h as u32))
                .unwrap_or((0, 0));
            if (w, h) != (width, height) || rgb.len() != pixels * 3 {
                return Err(DecodeError::Dimensions {
                    width: w,
                    height: h,
                    expected_width: width,
                    expected_height: height,
                });
            }
            swap_red_blue(&mut rgb);
            Ok(rgb)
        }
        FourCc::YUYV => {
            let expected = pixels * 2;
            check_len(fourcc, data, expected)?;
            Ok(yuyv_to_bgr(&data[..expected]))
        }
        FourCc::BGR3 | FourCc::RGB3 => {
            let expected = PixelLayout::Bgr24.frame_size(width, height);
            check_len(fourcc, data, expected)?;
            let mut out = data[..expected].to_vec();
            if fourcc == FourCc::RGB3 {
                swap_red_blue(&mut out);
            }
            Ok(out)
        }
        other => Err(DecodeError::Unsupported(other)),
    }
}

fn check_len(fourcc: FourCc, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::ShortBuffer {
            fourcc,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// YUYV 4:2:2 to packed BGR using integer BT.601 coefficients.
fn yuyv_to_bgr(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        out.extend_from_slice(&yuv_to_bgr(y0, u, v));
        out.extend_from_slice(&yuv_to_bgr(y1, u, v));
    }
    out
}

fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    [clamp_u8(b), clamp_u8(g), clamp_u8(r)]
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}
