//! Image to tensor conversion

use image::imageops::FilterType;
use image::DynamicImage;

use crate::config::{Normalization, ResizeFilter};
use crate::error::{BatchrError, BatchrResult};

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Linear => FilterType::Triangle,
            ResizeFilter::Cubic => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Resize an image to `height x width` and flatten it channel-major.
///
/// The result holds `channels` planes of `height * width` values, row-major
/// inside each plane, so its length is always `channels * height * width`
/// whatever the source size. Pixel values stay in `0..=255` unless a
/// normalization is given.
pub fn image_to_chw(
    img: &DynamicImage,
    channels: usize,
    height: usize,
    width: usize,
    filter: ResizeFilter,
    normalization: Option<&Normalization>,
) -> BatchrResult<Vec<f32>> {
    let resized = img.resize_exact(width as u32, height as u32, filter.into());
    let plane = height * width;
    let mut out = vec![0f32; channels * plane];

    match channels {
        3 => {
            for (x, y, px) in resized.to_rgb8().enumerate_pixels() {
                let i = y as usize * width + x as usize;
                out[i] = px[0] as f32;
                out[plane + i] = px[1] as f32;
                out[2 * plane + i] = px[2] as f32;
            }
        }
        1 => {
            for (x, y, px) in resized.to_luma8().enumerate_pixels() {
                out[y as usize * width + x as usize] = px[0] as f32;
            }
        }
        other => {
            return Err(BatchrError::Config(format!(
                "cannot convert images to {other} channels"
            )))
        }
    }

    if let Some(norm) = normalization {
        normalize_planes(&mut out, plane, norm);
    }
    Ok(out)
}

fn normalize_planes(data: &mut [f32], plane: usize, norm: &Normalization) {
    for (c, values) in data.chunks_mut(plane).enumerate() {
        let mean = norm.mean.get(c).copied().unwrap_or(0.0);
        let std = norm
            .std
            .as_ref()
            .and_then(|s| s.get(c).copied())
            .unwrap_or(1.0);
        for v in values {
            *v = (*v - mean) / std;
        }
    }
}
