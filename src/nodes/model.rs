use std::sync::Arc;

use image::GrayAlphaImage;
use nalgebra::Point3;

use super::{NodeBase, NodeId};

/// Four-corner plane geometry for the slice proxy, in RAS space.
///
/// Corner order matches the texture plane: (0,0), (w,0), (0,h), (w,h).
#[derive(Clone, Debug, PartialEq)]
pub struct SlicePlane {
    pub points: [Point3<f64>; 4],
}

impl Default for SlicePlane {
    fn default() -> Self {
        Self {
            points: [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
            ],
        }
    }
}

/// Renderable proxy geometry owned by a slice logic instance.
#[derive(Clone, Debug)]
pub struct ModelNode {
    pub base: NodeBase,
    pub polydata: Option<SlicePlane>,
    pub display_node_id: Option<NodeId>,
    pub transform_node_id: Option<NodeId>,
}

impl ModelNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: NodeBase::named(name),
            polydata: None,
            display_node_id: None,
            transform_node_id: None,
        }
    }
}

/// Display properties and texture binding for a model node.
#[derive(Clone, Debug)]
pub struct ModelDisplayNode {
    pub base: NodeBase,
    pub visibility: bool,
    pub opacity: f64,
    pub color: [f64; 3],
    pub ambient: f64,
    pub diffuse: f64,
    pub backface_culling: bool,
    pub texture: Option<Arc<GrayAlphaImage>>,
    pub interpolate_texture: bool,
    pub slice_intersection_visibility: bool,
}

impl ModelDisplayNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: NodeBase::named(name),
            visibility: true,
            opacity: 1.0,
            color: [1.0, 1.0, 1.0],
            ambient: 0.0,
            diffuse: 1.0,
            backface_culling: true,
            texture: None,
            interpolate_texture: true,
            slice_intersection_visibility: false,
        }
    }
}
