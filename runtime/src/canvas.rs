//! Software stand-in for a 2D canvas element.
//!
//! Coordinates follow the usual canvas convention: origin top-left, y grows
//! downward, and a pixel is covered when its centre lies inside the shape.
//! Fills blend source-over using the colour's alpha.

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::{Color, Error, Result};

/// Size a fresh canvas element starts with.
pub const DEFAULT_SIZE: (u32, u32) = (300, 150);

/// Longest side a surface may have.
pub const MAX_SIDE: u32 = 32_767;

/// Largest pixel count a surface may hold (256 MiB of RGBA).
pub const MAX_PIXELS: u64 = 1 << 26;

/// Rejects sizes the host will not allocate a bitmap for.
pub fn check_size(width: u32, height: u32) -> Result<()> {
    let pixels = u64::from(width) * u64::from(height);
    if width > MAX_SIDE || height > MAX_SIDE || pixels > MAX_PIXELS {
        return Err(Error::SurfaceTooLarge { width, height });
    }
    Ok(())
}

pub struct Canvas {
    pixels: RgbaImage,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            pixels: RgbaImage::new(DEFAULT_SIZE.0, DEFAULT_SIZE.1),
        }
    }
}

impl Canvas {
    /// Transparent canvas of the given size.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        check_size(width, height)?;
        Ok(Self {
            pixels: RgbaImage::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Resizes the bitmap. Like assigning `canvas.width`, this always clears it.
    /// An oversized request leaves the current bitmap untouched.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        check_size(width, height)?;
        self.pixels = RgbaImage::new(width, height);
        Ok(())
    }

    pub fn clear_with_color(&mut self, color: Color) {
        let (width, height) = (self.width() as f64, self.height() as f64);
        self.fill_rect(0.0, 0.0, width, height, color);
    }

    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) {
        let (left, right) = ordered(x, x + w);
        let (top, bottom) = ordered(y, y + h);
        let (columns, rows) = (
            covered(left, right, self.width()),
            covered(top, bottom, self.height()),
        );
        for py in rows {
            for px in columns.clone() {
                self.blend(px, py, color);
            }
        }
    }

    pub fn fill_circle(&mut self, x: f64, y: f64, radius: f64, color: Color) {
        let radius = radius.abs();
        let columns = covered(x - radius, x + radius, self.width());
        let rows = covered(y - radius, y + radius, self.height());
        let limit = radius * radius;
        for py in rows {
            let dy = py as f64 + 0.5 - y;
            for px in columns.clone() {
                let dx = px as f64 + 0.5 - x;
                if dx * dx + dy * dy <= limit {
                    self.blend(px, py, color);
                }
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.pixels
            .get_pixel_checked(x, y)
            .map(|p| Color(u32::from_le_bytes(p.0)))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Writes the current bitmap as a PNG.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.pixels
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|err| Error::Snapshot(err.to_string()))
    }

    fn blend(&mut self, x: u32, y: u32, color: Color) {
        let src = color.channels();
        let dst = self.pixels.get_pixel_mut(x, y);
        *dst = source_over(src, dst.0);
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Pixel indices in `0..extent` whose centres fall inside `[from, to)`.
fn covered(from: f64, to: f64, extent: u32) -> std::ops::Range<u32> {
    if !(from.is_finite() && to.is_finite()) {
        return 0..0;
    }
    let first = (from - 0.5).ceil().clamp(0.0, extent as f64) as u32;
    let last = (to - 0.5).ceil().clamp(0.0, extent as f64) as u32;
    first..last.max(first)
}

fn source_over(src: [u8; 4], dst: [u8; 4]) -> Rgba<u8> {
    let src_a = src[3] as f32 / 255.0;
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = (src[i] as f32 * src_a + dst[i] as f32 * dst_a * (1.0 - src_a)) / out_a;
        out[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color(0xFF00_00FF);
    const BLUE: Color = Color(0xFFFF_0000);

    #[test]
    fn starts_transparent_at_html_default_size() {
        let canvas = Canvas::default();
        assert_eq!((canvas.width(), canvas.height()), (300, 150));
        assert_eq!(canvas.pixel(0, 0), Some(Color(0)));
    }

    #[test]
    fn clear_covers_everything() {
        let mut canvas = Canvas::new(4, 3).unwrap();
        canvas.clear_with_color(RED);
        assert!(canvas.image().pixels().all(|p| p.0 == [0xFF, 0, 0, 0xFF]));
    }

    #[test]
    fn fill_rect_uses_pixel_centres() {
        let mut canvas = Canvas::new(10, 10).unwrap();
        canvas.fill_rect(2.0, 3.0, 4.0, 2.0, BLUE);

        assert_eq!(canvas.pixel(2, 3), Some(BLUE));
        assert_eq!(canvas.pixel(5, 4), Some(BLUE));
        assert_eq!(canvas.pixel(6, 4), Some(Color(0)));
        assert_eq!(canvas.pixel(2, 5), Some(Color(0)));
        assert_eq!(canvas.pixel(1, 3), Some(Color(0)));
    }

    #[test]
    fn negative_extent_fills_backwards() {
        let mut canvas = Canvas::new(10, 10).unwrap();
        canvas.fill_rect(6.0, 6.0, -2.0, -2.0, RED);
        assert_eq!(canvas.pixel(4, 4), Some(RED));
        assert_eq!(canvas.pixel(5, 5), Some(RED));
        assert_eq!(canvas.pixel(6, 6), Some(Color(0)));
    }

    #[test]
    fn shapes_are_clipped() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        canvas.fill_rect(-10.0, -10.0, 100.0, 100.0, RED);
        canvas.fill_circle(100.0, 100.0, 5.0, BLUE);
        assert!(canvas.image().pixels().all(|p| p.0 == [0xFF, 0, 0, 0xFF]));
    }

    #[test]
    fn fill_circle_covers_disc() {
        let mut canvas = Canvas::new(20, 20).unwrap();
        canvas.fill_circle(10.0, 10.0, 4.0, RED);

        assert_eq!(canvas.pixel(10, 10), Some(RED));
        assert_eq!(canvas.pixel(13, 10), Some(RED));
        assert_eq!(canvas.pixel(6, 10), Some(RED));
        assert_eq!(canvas.pixel(14, 10), Some(Color(0)));
        // Corner of the bounding box lies outside the disc.
        assert_eq!(canvas.pixel(6, 6), Some(Color(0)));
    }

    #[test]
    fn translucent_fill_blends() {
        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.clear_with_color(Color(0xFF00_0000));
        canvas.clear_with_color(Color(0x80FF_FFFF));

        let [r, g, b, a] = canvas.pixel(0, 0).unwrap().channels();
        assert_eq!(a, 0xFF);
        assert_eq!((r, g, b), (128, 128, 128));
    }

    #[test]
    fn resize_clears() {
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas.clear_with_color(RED);
        canvas.set_size(3, 1).unwrap();
        assert_eq!((canvas.width(), canvas.height()), (3, 1));
        assert_eq!(canvas.pixel(0, 0), Some(Color(0)));
    }

    #[test]
    fn oversized_resize_keeps_the_old_bitmap() {
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas.clear_with_color(RED);

        let err = canvas.set_size(i32::MAX as u32, i32::MAX as u32).unwrap_err();
        assert_eq!(
            err,
            Error::SurfaceTooLarge {
                width: i32::MAX as u32,
                height: i32::MAX as u32
            }
        );
        assert!(canvas.set_size(MAX_SIDE, MAX_SIDE).is_err());
        assert_eq!((canvas.width(), canvas.height()), (2, 2));
        assert_eq!(canvas.pixel(1, 1), Some(RED));
    }

    #[test]
    fn size_limits() {
        assert!(check_size(0, 0).is_ok());
        assert!(check_size(MAX_SIDE, 1).is_ok());
        assert!(check_size(8192, 8192).is_ok());
        assert!(check_size(MAX_SIDE + 1, 1).is_err());
        assert!(check_size(8193, 8192).is_err());
        assert!(Canvas::new(u32::MAX, u32::MAX).is_err());
    }
}
