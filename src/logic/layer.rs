//! Per-layer binding of a volume to the slice plane.
//!
//! A layer is runtime-only state: it is never persisted, and its reformatted
//! images are rebuilt whenever the bound volume, its transform, or the slice
//! geometry changes.

use std::sync::Arc;

use image::GrayAlphaImage;
use nalgebra::{Matrix4, Vector4};
use rayon::prelude::*;
use tracing::warn;

use crate::enums::Interpolation;
use crate::interpolator::Interpolator;
use crate::nodes::{Node, NodeId, SliceNode, VolumeNode};
use crate::scene::Scene;

#[derive(Clone, Debug, Default)]
pub struct SliceLayer {
    volume_node_id: Option<NodeId>,
    is_label_layer: bool,
    image: Option<Arc<GrayAlphaImage>>,
    image_uvw: Option<Arc<GrayAlphaImage>>,
}

impl SliceLayer {
    pub fn new(is_label_layer: bool) -> Self {
        Self {
            is_label_layer,
            ..Self::default()
        }
    }

    pub fn is_label_layer(&self) -> bool {
        self.is_label_layer
    }

    pub fn volume_node_id(&self) -> Option<&NodeId> {
        self.volume_node_id.as_ref()
    }

    /// Rebind the layer. Stale images are kept until the next reformat pass
    /// so several rebinds can batch into one recomputation.
    pub fn set_volume_node_id(&mut self, volume_node_id: Option<NodeId>) {
        self.volume_node_id = volume_node_id;
    }

    /// Reformatted image in 2D view (XY) space.
    pub fn image_data(&self) -> Option<&Arc<GrayAlphaImage>> {
        self.image.as_ref()
    }

    /// Reformatted image in UVW texture space.
    pub fn image_data_uvw(&self) -> Option<&Arc<GrayAlphaImage>> {
        self.image_uvw.as_ref()
    }

    /// Rebuild the reformatted images from current scene state. The UVW
    /// image is only maintained when the slice resolution mode needs a
    /// texture distinct from the 2D view image.
    pub fn update(&mut self, scene: &Scene, slice_node: &SliceNode, build_uvw: bool) {
        let dimensions = slice_node.dimensions();
        self.image = self.reformat(scene, slice_node.xy_to_ras(), dimensions[0], dimensions[1]);
        self.image_uvw = if build_uvw {
            let uvw_dimensions = slice_node.uvw_dimensions();
            self.reformat(
                scene,
                slice_node.uvw_to_ras(),
                uvw_dimensions[0],
                uvw_dimensions[1],
            )
        } else {
            None
        };
    }

    fn reformat(
        &self,
        scene: &Scene,
        plane_to_ras: &Matrix4<f64>,
        width: usize,
        height: usize,
    ) -> Option<Arc<GrayAlphaImage>> {
        let volume_node = scene
            .node(self.volume_node_id.as_ref()?)
            .and_then(Node::as_volume)?;
        let volume = volume_node.image_data()?;
        if width == 0 || height == 0 {
            return None;
        }

        let world = scene.transform_to_world(volume_node.transform_node_id.as_ref());
        let ijk_to_world = world * volume_node.ijk_to_ras;
        let Some(world_to_ijk) = ijk_to_world.try_inverse() else {
            warn!(
                volume = %volume_node.base.name,
                "singular IJK-to-world matrix, skipping layer reformat"
            );
            return None;
        };
        let plane_to_ijk = world_to_ijk * plane_to_ras;

        let interpolation = layer_interpolation(self.is_label_layer, volume_node);
        let (window, level) = volume_node.window_level();
        let low = level - window / 2.0;
        let (ni, nj, nk) = volume.dim_ijk();
        let in_grid = |i: f64, j: f64, k: f64| {
            i >= -0.5
                && i <= ni as f64 - 0.5
                && j >= -0.5
                && j <= nj as f64 - 0.5
                && k >= -0.5
                && k <= nk as f64 - 0.5
        };

        let data = volume.data();
        let mut buffer = vec![0u8; width * height * 2];
        buffer
            .par_chunks_mut(width * 2)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    let ijk = plane_to_ijk * Vector4::new(x as f64, y as f64, 0.0, 1.0);
                    if !in_grid(ijk.x, ijk.y, ijk.z) {
                        continue;
                    }
                    let value = match interpolation {
                        Interpolation::Linear => {
                            Some(Interpolator::trilinear_interpolate(data, ijk.z, ijk.y, ijk.x))
                        }
                        Interpolation::Nearest => {
                            Interpolator::nearest(data, ijk.z, ijk.y, ijk.x).map(f64::from)
                        }
                    };
                    if let Some(value) = value {
                        let display = ((value - low) / window * 255.0).clamp(0.0, 255.0);
                        row[2 * x] = display.round() as u8;
                        row[2 * x + 1] = 255;
                    }
                }
            });

        GrayAlphaImage::from_raw(width as u32, height as u32, buffer).map(Arc::new)
    }
}

/// Labels keep hard boundaries: nearest-neighbor sampling whenever the layer
/// or the bound volume is tagged as a label map.
fn layer_interpolation(is_label_layer: bool, volume_node: &VolumeNode) -> Interpolation {
    if is_label_layer || volume_node.label_map {
        Interpolation::Nearest
    } else {
        Interpolation::Linear
    }
}
