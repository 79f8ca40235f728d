use bitflags::bitflags;
use nalgebra::{Matrix3, Matrix4, Vector3};

use super::NodeBase;
use crate::enums::{Orientation, SliceResolutionMode, SliceSpacingMode};

bitflags! {
    /// Parameters being manipulated during an interactive gesture, used to
    /// scope what linked slice views broadcast.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SliceInteractionFlags: u32 {
        const SLICE_TO_RAS = 1;
        const FIELD_OF_VIEW = 2;
        const ORIENTATION = 4;
        const MULTIPLANAR_REFORMAT = 8;
        const SLICE_VISIBLE = 16;
    }
}

/// Per-view slice plane: orientation, field of view, view and texture
/// dimensions, and the matrices mapping view pixels into RAS space.
///
/// Derived matrices (XY-to-RAS, UVW-to-RAS) are refreshed by
/// [`update_matrices`](SliceNode::update_matrices) after any geometry
/// change.
#[derive(Clone, Debug)]
pub struct SliceNode {
    pub base: NodeBase,
    slice_to_ras: Matrix4<f64>,
    xy_to_slice: Matrix4<f64>,
    xy_to_ras: Matrix4<f64>,
    uvw_to_slice: Matrix4<f64>,
    uvw_to_ras: Matrix4<f64>,
    dimensions: [usize; 3],
    field_of_view: [f64; 3],
    uvw_dimensions: [usize; 3],
    uvw_extents: [f64; 3],
    active_slice: i32,
    orientation: Option<Orientation>,
    pub resolution_mode: SliceResolutionMode,
    pub spacing_mode: SliceSpacingMode,
    pub prescribed_spacing: [f64; 3],
    pub layout_grid_rows: usize,
    pub layout_grid_columns: usize,
    pub layout_color: [f64; 3],
    pub slice_visible: bool,
    pub interacting: bool,
    pub interaction_flags: SliceInteractionFlags,
}

impl SliceNode {
    pub fn new(name: impl Into<String>) -> Self {
        let mut node = Self {
            base: NodeBase::named(name),
            slice_to_ras: Matrix4::identity(),
            xy_to_slice: Matrix4::identity(),
            xy_to_ras: Matrix4::identity(),
            uvw_to_slice: Matrix4::identity(),
            uvw_to_ras: Matrix4::identity(),
            dimensions: [256, 256, 1],
            field_of_view: [250.0, 250.0, 1.0],
            uvw_dimensions: [256, 256, 1],
            uvw_extents: [250.0, 250.0, 1.0],
            active_slice: 0,
            orientation: Some(Orientation::Axial),
            resolution_mode: SliceResolutionMode::default(),
            spacing_mode: SliceSpacingMode::default(),
            prescribed_spacing: [1.0, 1.0, 1.0],
            layout_grid_rows: 1,
            layout_grid_columns: 1,
            layout_color: [1.0, 1.0, 1.0],
            slice_visible: false,
            interacting: false,
            interaction_flags: SliceInteractionFlags::empty(),
        };
        node.set_orientation(Orientation::Axial);
        node
    }

    /// Layout name doubles as the singleton tag pairing this node with its
    /// composite node.
    pub fn set_layout_name(&mut self, layout_name: &str) {
        self.base.singleton_tag = Some(layout_name.to_string());
        self.layout_color = match layout_name {
            "Red" => [0.952941, 0.290196, 0.2],
            "Yellow" => [0.929412, 0.835294, 0.298039],
            "Green" => [0.431373, 0.690196, 0.294118],
            _ => [0.6, 0.6, 0.6],
        };
    }

    pub fn layout_name(&self) -> Option<&str> {
        self.base.singleton_tag.as_deref()
    }

    /// Replace the rotation part of slice-to-RAS with an orientation preset,
    /// keeping the current translation.
    pub fn set_orientation(&mut self, orientation: Orientation) {
        let rotation = match orientation {
            // Radiological convention: slice X runs right-to-left.
            Orientation::Axial => Matrix3::new(
                -1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 1.0,
            ),
            Orientation::Sagittal => Matrix3::new(
                0.0, 0.0, 1.0, //
                -1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0,
            ),
            Orientation::Coronal => Matrix3::new(
                -1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, //
                0.0, 1.0, 0.0,
            ),
        };
        self.slice_to_ras
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&rotation);
        self.orientation = Some(orientation);
        self.update_matrices();
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.orientation
    }

    pub fn slice_to_ras(&self) -> &Matrix4<f64> {
        &self.slice_to_ras
    }

    /// Install an arbitrary slice-to-RAS matrix (oblique reformat); clears
    /// the orientation preset marker.
    pub fn set_slice_to_ras(&mut self, matrix: Matrix4<f64>) {
        self.slice_to_ras = matrix;
        self.orientation = None;
        self.update_matrices();
    }

    /// Move the plane origin without touching the rotation; any orientation
    /// preset stays in effect.
    pub fn set_slice_to_ras_translation(&mut self, translation: [f64; 3]) {
        self.slice_to_ras[(0, 3)] = translation[0];
        self.slice_to_ras[(1, 3)] = translation[1];
        self.slice_to_ras[(2, 3)] = translation[2];
        self.update_matrices();
    }

    pub fn xy_to_ras(&self) -> &Matrix4<f64> {
        &self.xy_to_ras
    }

    pub fn uvw_to_ras(&self) -> &Matrix4<f64> {
        &self.uvw_to_ras
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    pub fn set_dimensions(&mut self, width: usize, height: usize, depth: usize) {
        self.dimensions = [width.max(1), height.max(1), depth.max(1)];
        self.update_matrices();
    }

    pub fn field_of_view(&self) -> [f64; 3] {
        self.field_of_view
    }

    pub fn set_field_of_view(&mut self, x: f64, y: f64, z: f64) {
        self.field_of_view = [x, y, z];
        self.update_matrices();
    }

    pub fn uvw_dimensions(&self) -> [usize; 3] {
        self.uvw_dimensions
    }

    pub fn uvw_extents(&self) -> [f64; 3] {
        self.uvw_extents
    }

    pub fn set_uvw_extents_and_dimensions(&mut self, extents: [f64; 3], dimensions: [usize; 3]) {
        self.uvw_extents = extents;
        self.uvw_dimensions = [
            dimensions[0].max(1),
            dimensions[1].max(1),
            dimensions[2].max(1),
        ];
        self.update_matrices();
    }

    pub fn active_slice(&self) -> i32 {
        self.active_slice
    }

    pub fn set_active_slice(&mut self, active_slice: i32) {
        self.active_slice = active_slice;
    }

    /// Unit normal of the slice plane in RAS space (third column of
    /// slice-to-RAS).
    pub fn normal(&self) -> Vector3<f64> {
        let column = self.slice_to_ras.fixed_view::<3, 1>(0, 2);
        let normal = Vector3::new(column[0], column[1], column[2]);
        normal.normalize()
    }

    /// Distance from the RAS origin to the slice plane along its normal.
    pub fn slice_offset(&self) -> f64 {
        let rotation = self.slice_to_ras.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(
            self.slice_to_ras[(0, 3)],
            self.slice_to_ras[(1, 3)],
            self.slice_to_ras[(2, 3)],
        );
        match rotation.try_inverse() {
            Some(inverse) => (inverse * translation).z,
            None => 0.0,
        }
    }

    /// Move the slice plane along its normal so that its offset becomes
    /// `offset`, keeping the in-plane translation components.
    pub fn set_slice_offset(&mut self, offset: f64) {
        let rotation = self.slice_to_ras.fixed_view::<3, 3>(0, 0).into_owned();
        let Some(inverse) = rotation.try_inverse() else {
            return;
        };
        let translation = Vector3::new(
            self.slice_to_ras[(0, 3)],
            self.slice_to_ras[(1, 3)],
            self.slice_to_ras[(2, 3)],
        );
        let mut in_slice = inverse * translation;
        if (in_slice.z - offset).abs() <= f64::EPSILON * offset.abs().max(1.0) {
            return;
        }
        in_slice.z = offset;
        let new_translation = rotation * in_slice;
        self.slice_to_ras[(0, 3)] = new_translation.x;
        self.slice_to_ras[(1, 3)] = new_translation.y;
        self.slice_to_ras[(2, 3)] = new_translation.z;
        self.update_matrices();
    }

    /// Recompute the derived XY and UVW matrices from the slice geometry.
    ///
    /// XY pixel (0,0) maps to the corner at (-fov/2, -fov/2) in slice
    /// millimeters, so the view is centered on the slice-to-RAS translation.
    pub fn update_matrices(&mut self) {
        self.xy_to_slice = plane_to_slice(self.field_of_view, self.dimensions);
        self.xy_to_ras = self.slice_to_ras * self.xy_to_slice;
        self.uvw_to_slice = plane_to_slice(self.uvw_extents, self.uvw_dimensions);
        self.uvw_to_ras = self.slice_to_ras * self.uvw_to_slice;
    }
}

fn plane_to_slice(extents: [f64; 3], dimensions: [usize; 3]) -> Matrix4<f64> {
    let scale = |axis: usize| {
        if dimensions[axis] == 0 {
            1.0
        } else {
            extents[axis] / dimensions[axis] as f64
        }
    };
    let mut matrix = Matrix4::identity();
    matrix[(0, 0)] = scale(0);
    matrix[(1, 1)] = scale(1);
    matrix[(2, 2)] = scale(2);
    matrix[(0, 3)] = -extents[0] / 2.0;
    matrix[(1, 3)] = -extents[1] / 2.0;
    matrix
}
