//! Typed scene nodes.
//!
//! Every node embeds a [`NodeBase`] carrying the scene-assigned identifier
//! and bookkeeping flags; the [`Node`] enum is the closed set of kinds the
//! scene can hold, so dispatch on node type is a `match`, not a class-name
//! comparison.

use std::fmt;

pub mod composite;
pub mod model;
pub mod slice;
pub mod transform;
pub mod volume_node;

pub use composite::{
    BACKGROUND_LAYER, CompositeInteractionFlags, FOREGROUND_LAYER, LABEL_LAYER, SliceCompositeNode,
};
pub use model::{ModelDisplayNode, ModelNode, SlicePlane};
pub use slice::{SliceInteractionFlags, SliceNode};
pub use transform::LinearTransformNode;
pub use volume_node::{VolumeDisplay, VolumeNode};

/// Identifier assigned by the scene when a node is added.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State shared by every node kind.
#[derive(Clone, Debug)]
pub struct NodeBase {
    pub id: Option<NodeId>,
    pub name: String,
    pub description: String,
    /// Unique tag pairing singleton nodes (slice and composite nodes share
    /// their layout name here).
    pub singleton_tag: Option<String>,
    pub hide_from_editors: bool,
    pub selectable: bool,
    pub save_with_scene: bool,
}

impl NodeBase {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            singleton_tag: None,
            hide_from_editors: false,
            selectable: true,
            save_with_scene: true,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Node {
    Volume(VolumeNode),
    LinearTransform(LinearTransformNode),
    Slice(SliceNode),
    SliceComposite(SliceCompositeNode),
    Model(ModelNode),
    ModelDisplay(ModelDisplayNode),
}

impl Node {
    pub fn class_name(&self) -> &'static str {
        match self {
            Node::Volume(_) => "Volume",
            Node::LinearTransform(_) => "LinearTransform",
            Node::Slice(_) => "Slice",
            Node::SliceComposite(_) => "SliceComposite",
            Node::Model(_) => "Model",
            Node::ModelDisplay(_) => "ModelDisplay",
        }
    }

    pub fn base(&self) -> &NodeBase {
        match self {
            Node::Volume(n) => &n.base,
            Node::LinearTransform(n) => &n.base,
            Node::Slice(n) => &n.base,
            Node::SliceComposite(n) => &n.base,
            Node::Model(n) => &n.base,
            Node::ModelDisplay(n) => &n.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut NodeBase {
        match self {
            Node::Volume(n) => &mut n.base,
            Node::LinearTransform(n) => &mut n.base,
            Node::Slice(n) => &mut n.base,
            Node::SliceComposite(n) => &mut n.base,
            Node::Model(n) => &mut n.base,
            Node::ModelDisplay(n) => &mut n.base,
        }
    }

    pub fn id(&self) -> Option<&NodeId> {
        self.base().id.as_ref()
    }

    pub fn as_volume(&self) -> Option<&VolumeNode> {
        match self {
            Node::Volume(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_volume_mut(&mut self) -> Option<&mut VolumeNode> {
        match self {
            Node::Volume(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_linear_transform(&self) -> Option<&LinearTransformNode> {
        match self {
            Node::LinearTransform(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&SliceNode> {
        match self {
            Node::Slice(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_slice_mut(&mut self) -> Option<&mut SliceNode> {
        match self {
            Node::Slice(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&SliceCompositeNode> {
        match self {
            Node::SliceComposite(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_composite_mut(&mut self) -> Option<&mut SliceCompositeNode> {
        match self {
            Node::SliceComposite(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&ModelNode> {
        match self {
            Node::Model(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_model_mut(&mut self) -> Option<&mut ModelNode> {
        match self {
            Node::Model(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_model_display(&self) -> Option<&ModelDisplayNode> {
        match self {
            Node::ModelDisplay(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_model_display_mut(&mut self) -> Option<&mut ModelDisplayNode> {
        match self {
            Node::ModelDisplay(n) => Some(n),
            _ => None,
        }
    }
}
