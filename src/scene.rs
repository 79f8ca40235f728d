//! Scene arena: owns every node by ID and journals mutations as events.
//!
//! Components never hold node pointers; they keep [`NodeId`]s and resolve
//! them through the scene on each use, so references stay valid across
//! save/load/import cycles. Node lifetime is the scene's responsibility once
//! a node is added; removal goes through [`Scene::remove_node`].

use std::collections::{HashMap, VecDeque};

use nalgebra::Matrix4;
use tracing::warn;

use crate::events::{SceneEvent, SceneEventKind};
use crate::nodes::{Node, NodeId};

#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<Node>,
    id_counters: HashMap<&'static str, usize>,
    batch_depth: u32,
    events: VecDeque<SceneEvent>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, assigning its scene-unique ID. Emits `NodeAdded`.
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        let class = node.class_name();
        let counter = self.id_counters.entry(class).or_insert(0);
        *counter += 1;
        let id = NodeId::new(format!("{class}{counter}"));
        node.base_mut().id = Some(id.clone());
        self.nodes.push(node);
        self.push_event(SceneEventKind::NodeAdded { id: id.clone(), class });
        id
    }

    /// Remove a node by ID, returning it. Emits `NodeRemoved`.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let index = self.node_index(id)?;
        let node = self.nodes.remove(index);
        self.push_event(SceneEventKind::NodeRemoved {
            id: id.clone(),
            class: node.class_name(),
        });
        Some(node)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index(id).map(|index| &self.nodes[index])
    }

    fn node_index(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id() == Some(id))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index(id).is_some()
    }

    /// Mutate a node and journal a `NodeModified` event for it.
    pub fn modify<T>(&mut self, id: &NodeId, f: impl FnOnce(&mut Node) -> T) -> Option<T> {
        let index = self.node_index(id)?;
        let result = f(&mut self.nodes[index]);
        self.push_event(SceneEventKind::NodeModified(id.clone()));
        Some(result)
    }

    /// Mutate a node without journaling. For derived state kept by logic
    /// components and for interaction flags, whose changes must not trigger
    /// recomputation.
    pub fn modify_quietly<T>(&mut self, id: &NodeId, f: impl FnOnce(&mut Node) -> T) -> Option<T> {
        let index = self.node_index(id)?;
        Some(f(&mut self.nodes[index]))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter_map(|node| node.id().cloned())
            .collect()
    }

    pub fn count_by_class(&self, class: &str) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.class_name() == class)
            .count()
    }

    pub fn nth_by_class(&self, n: usize, class: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .filter(|node| node.class_name() == class)
            .nth(n)
    }

    /// Slice node whose layout name (singleton tag) matches.
    pub fn find_slice_node_by_layout(&self, layout_name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.as_slice().is_some())
            .find(|node| node.base().singleton_tag.as_deref() == Some(layout_name))
            .and_then(|node| node.id().cloned())
    }

    /// Composite node whose layout name (singleton tag) matches.
    pub fn find_composite_node_by_layout(&self, layout_name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.as_composite().is_some())
            .find(|node| node.base().singleton_tag.as_deref() == Some(layout_name))
            .and_then(|node| node.id().cloned())
    }

    /// Resolve a transform chain to world (RAS) space. Missing or dangling
    /// references resolve to identity from that point up.
    pub fn transform_to_world(&self, transform_id: Option<&NodeId>) -> Matrix4<f64> {
        let mut matrix = Matrix4::identity();
        let mut current = transform_id.cloned();
        let mut hops = 0;
        while let Some(id) = current {
            if hops >= 64 {
                warn!(transform = %id, "transform chain too deep, truncating");
                break;
            }
            let Some(transform) = self.node(&id).and_then(Node::as_linear_transform) else {
                break;
            };
            matrix = transform.matrix_to_parent * matrix;
            current = transform.parent_transform_id.clone();
            hops += 1;
        }
        matrix
    }

    pub fn is_batch_processing(&self) -> bool {
        self.batch_depth > 0
    }

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
        self.push_event(SceneEventKind::StartBatchProcess);
    }

    pub fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.push_event(SceneEventKind::EndBatchProcess);
    }

    /// Imports run inside a batch; finishing announces `EndImport` before
    /// the closing `EndBatchProcess`.
    pub fn begin_import(&mut self) {
        self.begin_batch();
    }

    pub fn end_import(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.push_event(SceneEventKind::EndImport);
        self.push_event(SceneEventKind::EndBatchProcess);
    }

    pub fn begin_restore(&mut self) {
        self.begin_batch();
    }

    pub fn end_restore(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.push_event(SceneEventKind::EndRestore);
        self.push_event(SceneEventKind::EndBatchProcess);
    }

    /// Announce an imminent close so observers can tear down scene-owned
    /// state; node removal follows separately.
    pub fn notify_start_close(&mut self) {
        self.push_event(SceneEventKind::StartClose);
    }

    pub(crate) fn push_event(&mut self, kind: SceneEventKind) {
        let in_batch = match kind {
            // Batch boundary events run at top level even when emitted while
            // leaving a nested batch.
            SceneEventKind::EndBatchProcess
            | SceneEventKind::EndImport
            | SceneEventKind::EndRestore => self.batch_depth > 0,
            _ => self.is_batch_processing(),
        };
        let event = SceneEvent { kind, in_batch };
        // Consecutive identical modifications coalesce.
        if matches!(event.kind, SceneEventKind::NodeModified(_)) && self.events.back() == Some(&event)
        {
            return;
        }
        self.events.push_back(event);
    }

    pub(crate) fn take_event(&mut self) -> Option<SceneEvent> {
        self.events.pop_front()
    }

    /// Number of journaled events not yet pumped.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{LinearTransformNode, SliceCompositeNode, SliceNode, VolumeNode};
    use nalgebra::Vector3;

    #[test]
    fn ids_are_class_scoped_counters() {
        let mut scene = Scene::new();
        let a = scene.add_node(Node::Volume(VolumeNode::new("a")));
        let b = scene.add_node(Node::Volume(VolumeNode::new("b")));
        let c = scene.add_node(Node::Slice(SliceNode::new("Red")));
        assert_eq!(a.as_str(), "Volume1");
        assert_eq!(b.as_str(), "Volume2");
        assert_eq!(c.as_str(), "Slice1");
    }

    #[test]
    fn singleton_lookup_matches_layout_name() {
        let mut scene = Scene::new();
        let mut slice = SliceNode::new("Red");
        slice.set_layout_name("Red");
        let slice_id = scene.add_node(Node::Slice(slice));
        let composite_id = scene.add_node(Node::SliceComposite(SliceCompositeNode::new("Red")));

        assert_eq!(scene.find_slice_node_by_layout("Red"), Some(slice_id));
        assert_eq!(
            scene.find_composite_node_by_layout("Red"),
            Some(composite_id)
        );
        assert_eq!(scene.find_slice_node_by_layout("Green"), None);
    }

    #[test]
    fn consecutive_modifications_coalesce() {
        let mut scene = Scene::new();
        let id = scene.add_node(Node::Volume(VolumeNode::new("a")));
        scene.take_event();
        scene.modify(&id, |_| {});
        scene.modify(&id, |_| {});
        scene.modify(&id, |_| {});
        assert_eq!(scene.pending_events(), 1);
    }

    #[test]
    fn transform_chain_composes_to_world() {
        let mut scene = Scene::new();
        let mut parent = LinearTransformNode::new("parent");
        parent.matrix_to_parent = Matrix4::new_translation(&Vector3::new(0.0, 10.0, 0.0));
        let parent_id = scene.add_node(Node::LinearTransform(parent));

        let mut child = LinearTransformNode::new("child");
        child.matrix_to_parent = Matrix4::new_translation(&Vector3::new(5.0, 0.0, 0.0));
        child.parent_transform_id = Some(parent_id);
        let child_id = scene.add_node(Node::LinearTransform(child));

        let world = scene.transform_to_world(Some(&child_id));
        assert_eq!(world[(0, 3)], 5.0);
        assert_eq!(world[(1, 3)], 10.0);
    }

    #[test]
    fn removal_goes_through_the_scene() {
        let mut scene = Scene::new();
        let id = scene.add_node(Node::Volume(VolumeNode::new("a")));
        assert!(scene.contains(&id));
        let removed = scene.remove_node(&id);
        assert!(removed.is_some());
        assert!(!scene.contains(&id));
        assert!(scene.remove_node(&id).is_none());
    }
}
