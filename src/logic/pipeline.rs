//! Compositing stages folding layer images into one display image.
//!
//! Stage N combines the accumulated output of stages `0..N` with the next
//! populated layer's image. The first populated layer becomes a pass-through
//! stage whose output is that image itself.

use std::sync::Arc;

use image::GrayAlphaImage;
use rayon::prelude::*;
use tracing::warn;

use crate::enums::CompositingMode;

/// One compositing stage. Holds its mode and the cached output image; the
/// output is the input image itself for a pass-through stage.
#[derive(Clone, Debug)]
pub struct PipelineItem {
    compositing_mode: CompositingMode,
    alpha_blending: bool,
    output: Option<Arc<GrayAlphaImage>>,
}

impl PipelineItem {
    fn new() -> Self {
        Self {
            compositing_mode: CompositingMode::Alpha,
            alpha_blending: true,
            output: None,
        }
    }

    pub fn compositing_mode(&self) -> CompositingMode {
        self.compositing_mode
    }

    fn set_compositing_mode(&mut self, compositing_mode: CompositingMode) {
        if compositing_mode == self.compositing_mode {
            return;
        }
        self.compositing_mode = compositing_mode;
        self.alpha_blending = matches!(
            compositing_mode,
            CompositingMode::Alpha | CompositingMode::ReverseAlpha
        );
    }

    pub fn output(&self) -> Option<&Arc<GrayAlphaImage>> {
        self.output.as_ref()
    }
}

/// Install or refresh stage `item_index`, appending a new stage when the
/// pipeline is shorter. The stage's first input is the previous stage's
/// output; with no previous stage the image passes through untouched.
pub(crate) fn set_pipeline_item(
    pipeline: &mut Vec<PipelineItem>,
    item_index: usize,
    image: &Arc<GrayAlphaImage>,
    opacity: f64,
    compositing_mode: CompositingMode,
) {
    let accumulated = if item_index >= 1 {
        pipeline
            .get(item_index - 1)
            .and_then(|item| item.output().cloned())
    } else {
        None
    };

    if item_index >= pipeline.len() {
        pipeline.push(PipelineItem::new());
    }
    let item = &mut pipeline[item_index];
    item.set_compositing_mode(compositing_mode);
    item.output = Some(match accumulated {
        None => Arc::clone(image),
        Some(accumulated) => Arc::new(compose(&accumulated, image, opacity, compositing_mode)),
    });
}

/// Drop surplus trailing stages; surviving stages keep their cached output.
pub(crate) fn truncate_pipeline(pipeline: &mut Vec<PipelineItem>, position: usize) {
    pipeline.truncate(position);
}

/// The last stage's output is the externally visible composited image.
pub(crate) fn pipeline_output(pipeline: &[PipelineItem]) -> Option<Arc<GrayAlphaImage>> {
    pipeline.last().and_then(|item| item.output().cloned())
}

fn compose(
    accumulated: &GrayAlphaImage,
    layer: &GrayAlphaImage,
    opacity: f64,
    compositing_mode: CompositingMode,
) -> GrayAlphaImage {
    if accumulated.dimensions() != layer.dimensions() {
        warn!(
            accumulated = ?accumulated.dimensions(),
            layer = ?layer.dimensions(),
            "compositing inputs disagree on dimensions, keeping accumulated image"
        );
        return accumulated.clone();
    }
    match compositing_mode {
        CompositingMode::Alpha => blend_over(accumulated, layer, opacity),
        // Same over-operator with the operand order swapped: the
        // accumulated image is drawn over the layer, still weighted by the
        // layer slot's opacity.
        CompositingMode::ReverseAlpha => blend_over(layer, accumulated, opacity),
        CompositingMode::Add => arithmetic(accumulated, layer, false),
        CompositingMode::Subtract => arithmetic(accumulated, layer, true),
    }
}

/// Over-operator: `top` is drawn over `base`, weighted by `opacity` and the
/// top image's own alpha.
fn blend_over(base: &GrayAlphaImage, top: &GrayAlphaImage, opacity: f64) -> GrayAlphaImage {
    let (width, height) = base.dimensions();
    let mut buffer = vec![0u8; (width * height * 2) as usize];
    buffer
        .par_chunks_mut(2)
        .zip(base.as_raw().par_chunks(2).zip(top.as_raw().par_chunks(2)))
        .for_each(|(out, (b, t))| {
            let weight = (f64::from(t[1]) / 255.0) * opacity;
            out[0] = (f64::from(b[0]) * (1.0 - weight) + f64::from(t[0]) * weight).round() as u8;
            out[1] = (f64::from(b[1]) * (1.0 - weight) + f64::from(t[1]) * weight).round() as u8;
        });
    image_from_buffer(base, width, height, buffer)
}

/// Arithmetic combine through a signed 16-bit intermediate, clamped back to
/// the unsigned 8-bit display range. Subtraction removes the accumulated
/// image from the layer.
fn arithmetic(accumulated: &GrayAlphaImage, layer: &GrayAlphaImage, subtract: bool) -> GrayAlphaImage {
    let (width, height) = accumulated.dimensions();
    let mut buffer = vec![0u8; (width * height * 2) as usize];
    buffer
        .par_chunks_mut(2)
        .zip(
            accumulated
                .as_raw()
                .par_chunks(2)
                .zip(layer.as_raw().par_chunks(2)),
        )
        .for_each(|(out, (b, t))| {
            let combined = if subtract {
                i16::from(t[0]) - i16::from(b[0])
            } else {
                i16::from(t[0]) + i16::from(b[0])
            };
            out[0] = combined.clamp(0, 255) as u8;
            out[1] = b[1].max(t[1]);
        });
    image_from_buffer(accumulated, width, height, buffer)
}

fn image_from_buffer(
    fallback: &GrayAlphaImage,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
) -> GrayAlphaImage {
    match GrayAlphaImage::from_raw(width, height, buffer) {
        Some(composited) => composited,
        None => fallback.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::LumaA;

    fn uniform(value: u8, alpha: u8) -> Arc<GrayAlphaImage> {
        Arc::new(GrayAlphaImage::from_pixel(4, 4, LumaA([value, alpha])))
    }

    #[test]
    fn single_layer_passes_through() {
        let mut pipeline = Vec::new();
        let layer = uniform(80, 255);
        set_pipeline_item(&mut pipeline, 0, &layer, 0.5, CompositingMode::Alpha);
        assert_eq!(pipeline.len(), 1);
        assert!(Arc::ptr_eq(pipeline[0].output().unwrap(), &layer));
    }

    #[test]
    fn alpha_blend_weights_added_layer() {
        let mut pipeline = Vec::new();
        set_pipeline_item(
            &mut pipeline,
            0,
            &uniform(0, 255),
            1.0,
            CompositingMode::Alpha,
        );
        set_pipeline_item(
            &mut pipeline,
            1,
            &uniform(200, 255),
            0.5,
            CompositingMode::Alpha,
        );
        let output = pipeline_output(&pipeline).unwrap();
        assert_eq!(output.get_pixel(0, 0)[0], 100);
    }

    #[test]
    fn reverse_alpha_swaps_operands() {
        let mut pipeline = Vec::new();
        set_pipeline_item(
            &mut pipeline,
            0,
            &uniform(0, 255),
            1.0,
            CompositingMode::Alpha,
        );
        set_pipeline_item(
            &mut pipeline,
            1,
            &uniform(200, 255),
            1.0,
            CompositingMode::ReverseAlpha,
        );
        // The accumulated (value 0) image is drawn fully over the layer.
        let output = pipeline_output(&pipeline).unwrap();
        assert_eq!(output.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn transparent_layer_pixels_leave_background() {
        let mut pipeline = Vec::new();
        set_pipeline_item(
            &mut pipeline,
            0,
            &uniform(120, 255),
            1.0,
            CompositingMode::Alpha,
        );
        set_pipeline_item(
            &mut pipeline,
            1,
            &uniform(200, 0),
            1.0,
            CompositingMode::Alpha,
        );
        let output = pipeline_output(&pipeline).unwrap();
        assert_eq!(output.get_pixel(0, 0)[0], 120);
    }

    #[test]
    fn add_clamps_to_display_range() {
        let mut pipeline = Vec::new();
        set_pipeline_item(
            &mut pipeline,
            0,
            &uniform(200, 255),
            1.0,
            CompositingMode::Alpha,
        );
        set_pipeline_item(
            &mut pipeline,
            1,
            &uniform(100, 255),
            1.0,
            CompositingMode::Add,
        );
        let output = pipeline_output(&pipeline).unwrap();
        assert_eq!(output.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn subtract_removes_accumulated_from_layer() {
        let mut pipeline = Vec::new();
        set_pipeline_item(
            &mut pipeline,
            0,
            &uniform(30, 255),
            1.0,
            CompositingMode::Alpha,
        );
        set_pipeline_item(
            &mut pipeline,
            1,
            &uniform(100, 255),
            1.0,
            CompositingMode::Subtract,
        );
        let output = pipeline_output(&pipeline).unwrap();
        assert_eq!(output.get_pixel(0, 0)[0], 70);
    }

    #[test]
    fn truncate_keeps_surviving_outputs() {
        let mut pipeline = Vec::new();
        let base = uniform(10, 255);
        set_pipeline_item(&mut pipeline, 0, &base, 1.0, CompositingMode::Alpha);
        set_pipeline_item(
            &mut pipeline,
            1,
            &uniform(20, 255),
            1.0,
            CompositingMode::Alpha,
        );
        set_pipeline_item(
            &mut pipeline,
            2,
            &uniform(30, 255),
            1.0,
            CompositingMode::Alpha,
        );

        let survivor = Arc::clone(pipeline[1].output().unwrap());
        truncate_pipeline(&mut pipeline, 2);
        assert_eq!(pipeline.len(), 2);
        assert!(Arc::ptr_eq(pipeline[1].output().unwrap(), &survivor));
        assert!(Arc::ptr_eq(pipeline_output(&pipeline).unwrap(), &survivor));
    }
}
