//! Drawing surface backing the handwriting challenge.
//!
//! The surface is a grayscale raster so undo can restore the exact pixels
//! captured before a stroke, and verification can ship the same PNG a browser
//! canvas would export.

use std::fmt;
use std::io::Cursor;

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use thiserror::Error;

const BACKGROUND: Luma<u8> = Luma([255]);
const INK: Luma<u8> = Luma([0]);

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("failed to encode canvas: {0}")]
    Encode(#[from] image::ImageError),
    #[error("snapshot is {found:?} but canvas is {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },
}

/// Exact copy of the surface pixels.
#[derive(Clone, PartialEq)]
pub struct CanvasSnapshot(GrayImage);

impl CanvasSnapshot {
    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn ink_pixels(&self) -> usize {
        self.0.pixels().filter(|pixel| pixel.0[0] < BACKGROUND.0[0]).count()
    }
}

impl fmt::Debug for CanvasSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("CanvasSnapshot")
            .field("width", &width)
            .field("height", &height)
            .field("ink_pixels", &self.ink_pixels())
            .finish()
    }
}

/// Surface the handwriting challenge draws on.
pub trait DrawingSurface: Send + Sync + fmt::Debug {
    fn draw_segment(&mut self, from: (f64, f64), to: (f64, f64));
    fn snapshot(&self) -> CanvasSnapshot;
    fn restore(&mut self, snapshot: &CanvasSnapshot) -> Result<(), CanvasError>;
    fn clear(&mut self);
    fn is_blank(&self) -> bool;
    fn export_png(&self) -> Result<Bytes, CanvasError>;

    /// PNG wrapped in a `data:` URL, as browsers export canvases.
    fn export_data_url(&self) -> Result<String, CanvasError> {
        let png = self.export_png()?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
    }
}

/// In-memory grayscale canvas with a white background and a 2 px black pen.
#[derive(Clone)]
pub struct RasterCanvas {
    pixels: GrayImage,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: GrayImage::from_pixel(width.max(1), height.max(1), BACKGROUND),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

impl fmt::Debug for RasterCanvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("RasterCanvas")
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}

impl DrawingSurface for RasterCanvas {
    fn draw_segment(&mut self, from: (f64, f64), to: (f64, f64)) {
        let start = (from.0 as f32, from.1 as f32);
        let end = (to.0 as f32, to.1 as f32);
        // Second pass offset along the minor axis gives the pen its width.
        let offset = if (to.0 - from.0).abs() >= (to.1 - from.1).abs() {
            (0.0, 1.0)
        } else {
            (1.0, 0.0)
        };
        draw_line_segment_mut(&mut self.pixels, start, end, INK);
        draw_line_segment_mut(
            &mut self.pixels,
            (start.0 + offset.0, start.1 + offset.1),
            (end.0 + offset.0, end.1 + offset.1),
            INK,
        );
        for point in [start, end] {
            draw_filled_circle_mut(
                &mut self.pixels,
                (point.0.round() as i32, point.1.round() as i32),
                1,
                INK,
            );
        }
    }

    fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot(self.pixels.clone())
    }

    fn restore(&mut self, snapshot: &CanvasSnapshot) -> Result<(), CanvasError> {
        if snapshot.dimensions() != self.dimensions() {
            return Err(CanvasError::SizeMismatch {
                expected: self.dimensions(),
                found: snapshot.dimensions(),
            });
        }
        self.pixels = snapshot.0.clone();
        Ok(())
    }

    fn clear(&mut self) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = BACKGROUND;
        }
    }

    fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|pixel| *pixel == BACKGROUND)
    }

    fn export_png(&self) -> Result<Bytes, CanvasError> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(self.pixels.clone()).write_to(&mut buffer, ImageFormat::Png)?;
        Ok(Bytes::from(buffer.into_inner()))
    }
}
