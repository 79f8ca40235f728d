use nalgebra::{Matrix4, Vector4};

use super::{NodeBase, NodeId};
use crate::volume::Volume;

/// Scalar display state for a volume.
///
/// When `auto_window_level` is set, the effective window/level are derived
/// from the volume's scalar range instead of the stored values.
#[derive(Clone, Debug)]
pub struct VolumeDisplay {
    pub auto_window_level: bool,
    pub window: f64,
    pub level: f64,
}

impl Default for VolumeDisplay {
    fn default() -> Self {
        Self {
            auto_window_level: true,
            window: 256.0,
            level: 128.0,
        }
    }
}

/// A scalar volume placed in RAS space by its IJK-to-RAS matrix and an
/// optional parent transform reference.
#[derive(Clone, Debug)]
pub struct VolumeNode {
    pub base: NodeBase,
    pub volume: Option<Volume>,
    pub ijk_to_ras: Matrix4<f64>,
    pub transform_node_id: Option<NodeId>,
    pub display: VolumeDisplay,
    /// Label maps get nearest-neighbor reformatting and forced alpha
    /// compositing.
    pub label_map: bool,
}

impl VolumeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: NodeBase::named(name),
            volume: None,
            ijk_to_ras: Matrix4::identity(),
            transform_node_id: None,
            display: VolumeDisplay::default(),
            label_map: false,
        }
    }

    pub fn with_volume(name: impl Into<String>, volume: Volume) -> Self {
        let mut node = Self::new(name);
        node.volume = Some(volume);
        node
    }

    pub fn image_data(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    /// Effective window and level for scalar-to-display mapping.
    pub fn window_level(&self) -> (f64, f64) {
        if self.display.auto_window_level {
            if let Some(volume) = &self.volume {
                let (low, high) = volume.scalar_range();
                let window = (high - low).max(1.0);
                return (window, low + window / 2.0);
            }
        }
        (self.display.window.max(1e-6), self.display.level)
    }

    /// Axis-aligned RAS bounding box `[xmin, xmax, ymin, ymax, zmin, zmax]`
    /// of the voxel grid, after applying `world_transform` (the resolved
    /// parent transform chain) on top of IJK-to-RAS. `None` without image
    /// data.
    pub fn ras_bounds(&self, world_transform: &Matrix4<f64>) -> Option<[f64; 6]> {
        let volume = self.volume.as_ref()?;
        let (ni, nj, nk) = volume.dim_ijk();
        let ijk_to_world = world_transform * self.ijk_to_ras;

        let mut bounds = [f64::MAX, f64::MIN, f64::MAX, f64::MIN, f64::MAX, f64::MIN];
        for &i in &[0.0, (ni - 1) as f64] {
            for &j in &[0.0, (nj - 1) as f64] {
                for &k in &[0.0, (nk - 1) as f64] {
                    let corner = ijk_to_world * Vector4::new(i, j, k, 1.0);
                    for axis in 0..3 {
                        bounds[2 * axis] = bounds[2 * axis].min(corner[axis]);
                        bounds[2 * axis + 1] = bounds[2 * axis + 1].max(corner[axis]);
                    }
                }
            }
        }
        Some(bounds)
    }
}
