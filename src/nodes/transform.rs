use nalgebra::Matrix4;

use super::{NodeBase, NodeId};

/// A linear transform placed in the scene; transforms compose through the
/// parent chain up to world (RAS) space.
#[derive(Clone, Debug)]
pub struct LinearTransformNode {
    pub base: NodeBase,
    pub matrix_to_parent: Matrix4<f64>,
    pub parent_transform_id: Option<NodeId>,
}

impl LinearTransformNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: NodeBase::named(name),
            matrix_to_parent: Matrix4::identity(),
            parent_transform_id: None,
        }
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name)
    }
}
