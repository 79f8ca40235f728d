use bitflags::bitflags;
use tracing::warn;

use super::{NodeBase, NodeId};
use crate::enums::{AnnotationMode, AnnotationSpace, CompositingMode};

pub const BACKGROUND_LAYER: usize = 0;
pub const FOREGROUND_LAYER: usize = 1;
pub const LABEL_LAYER: usize = 2;

bitflags! {
    /// Which composite parameters an interactive gesture is changing;
    /// identifiers are powers of two so several can be broadcast at once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CompositeInteractionFlags: u32 {
        const FOREGROUND_VOLUME = 1;
        const BACKGROUND_VOLUME = 2;
        const LABEL_VOLUME = 4;
        const LABEL_OPACITY = 8;
        const FOREGROUND_OPACITY = 16;
    }
}

/// Per-view compositing configuration: which volumes fill the layers, with
/// what opacity, and how they combine into the display image.
///
/// Singleton-tagged by layout name; must stay paired with the slice node of
/// the same name.
#[derive(Clone, Debug)]
pub struct SliceCompositeNode {
    pub base: NodeBase,
    layer_volume_ids: Vec<Option<NodeId>>,
    layer_opacities: Vec<f64>,
    layer_compositing: Vec<Option<CompositingMode>>,
    /// Default compositing for layers without a per-layer override.
    pub compositing: CompositingMode,
    pub linked_control: bool,
    pub hot_linked_control: bool,
    pub fiducial_visibility: bool,
    pub fiducial_label_visibility: bool,
    pub slice_intersection_visibility: bool,
    pub annotation_space: AnnotationSpace,
    pub annotation_mode: AnnotationMode,
    pub do_propagate_volume_selection: bool,
    interacting: bool,
    interaction_flags: CompositeInteractionFlags,
    interaction_flags_modifier: CompositeInteractionFlags,
}

impl SliceCompositeNode {
    pub fn new(layout_name: &str) -> Self {
        let mut base = NodeBase::named(layout_name);
        base.hide_from_editors = true;
        base.singleton_tag = Some(layout_name.to_string());
        Self {
            base,
            layer_volume_ids: Vec::new(),
            layer_opacities: Vec::new(),
            layer_compositing: Vec::new(),
            compositing: CompositingMode::Alpha,
            linked_control: false,
            hot_linked_control: false,
            fiducial_visibility: true,
            fiducial_label_visibility: true,
            slice_intersection_visibility: false,
            annotation_space: AnnotationSpace::IjkAndRas,
            annotation_mode: AnnotationMode::All,
            do_propagate_volume_selection: true,
            interacting: false,
            interaction_flags: CompositeInteractionFlags::empty(),
            interaction_flags_modifier: CompositeInteractionFlags::all(),
        }
    }

    pub fn set_layout_name(&mut self, layout_name: &str) {
        self.base.singleton_tag = Some(layout_name.to_string());
    }

    pub fn layout_name(&self) -> Option<&str> {
        self.base.singleton_tag.as_deref()
    }

    /// Number of layer slots referenced so far (at least the three default
    /// layers).
    pub fn layer_count(&self) -> usize {
        self.layer_volume_ids.len().max(LABEL_LAYER + 1)
    }

    pub fn layer_volume_id(&self, layer_index: usize) -> Option<&NodeId> {
        self.layer_volume_ids.get(layer_index)?.as_ref()
    }

    pub fn set_layer_volume_id(&mut self, layer_index: usize, id: Option<NodeId>) {
        if layer_index >= self.layer_volume_ids.len() {
            self.layer_volume_ids.resize(layer_index + 1, None);
        }
        self.layer_volume_ids[layer_index] = id;
    }

    pub fn background_volume_id(&self) -> Option<&NodeId> {
        self.layer_volume_id(BACKGROUND_LAYER)
    }

    pub fn set_background_volume_id(&mut self, id: Option<NodeId>) {
        self.set_layer_volume_id(BACKGROUND_LAYER, id);
    }

    pub fn foreground_volume_id(&self) -> Option<&NodeId> {
        self.layer_volume_id(FOREGROUND_LAYER)
    }

    pub fn set_foreground_volume_id(&mut self, id: Option<NodeId>) {
        self.set_layer_volume_id(FOREGROUND_LAYER, id);
    }

    pub fn label_volume_id(&self) -> Option<&NodeId> {
        self.layer_volume_id(LABEL_LAYER)
    }

    pub fn set_label_volume_id(&mut self, id: Option<NodeId>) {
        self.set_layer_volume_id(LABEL_LAYER, id);
    }

    /// Opacity of layer N over the accumulated layers beneath it; unset
    /// layers read as fully transparent.
    pub fn layer_opacity(&self, layer_index: usize) -> f64 {
        self.layer_opacities.get(layer_index).copied().unwrap_or(0.0)
    }

    pub fn set_layer_opacity(&mut self, layer_index: usize, value: f64) {
        if layer_index >= self.layer_opacities.len() {
            self.layer_opacities.resize(layer_index + 1, 0.0);
        }
        self.layer_opacities[layer_index] = value;
    }

    pub fn foreground_opacity(&self) -> f64 {
        self.layer_opacity(FOREGROUND_LAYER)
    }

    pub fn set_foreground_opacity(&mut self, value: f64) {
        self.set_layer_opacity(FOREGROUND_LAYER, value);
    }

    pub fn label_opacity(&self) -> f64 {
        self.layer_opacity(LABEL_LAYER)
    }

    pub fn set_label_opacity(&mut self, value: f64) {
        self.set_layer_opacity(LABEL_LAYER, value);
    }

    /// Compositing mode for one layer: the per-layer override when present,
    /// otherwise the node-wide default.
    pub fn layer_compositing(&self, layer_index: usize) -> CompositingMode {
        self.layer_compositing
            .get(layer_index)
            .copied()
            .flatten()
            .unwrap_or(self.compositing)
    }

    pub fn set_layer_compositing(&mut self, layer_index: usize, mode: CompositingMode) {
        if layer_index >= self.layer_compositing.len() {
            self.layer_compositing.resize(layer_index + 1, None);
        }
        self.layer_compositing[layer_index] = Some(mode);
    }

    /// Persisted attributes as ordered name/value pairs. Volume references
    /// and the layout name are only emitted when set.
    pub fn write_attributes(&self) -> Vec<(String, String)> {
        let mut attributes = vec![
            ("compositing".into(), (self.compositing as i32).to_string()),
            (
                "foregroundOpacity".into(),
                self.foreground_opacity().to_string(),
            ),
            ("labelOpacity".into(), self.label_opacity().to_string()),
            ("linkedControl".into(), bool_attribute(self.linked_control)),
            (
                "hotLinkedControl".into(),
                bool_attribute(self.hot_linked_control),
            ),
            (
                "fiducialVisibility".into(),
                bool_attribute(self.fiducial_visibility),
            ),
            (
                "fiducialLabelVisibility".into(),
                bool_attribute(self.fiducial_label_visibility),
            ),
            (
                "sliceIntersectionVisibility".into(),
                bool_attribute(self.slice_intersection_visibility),
            ),
        ];
        if let Some(layout_name) = self.layout_name() {
            attributes.push(("layoutName".into(), layout_name.to_string()));
        }
        attributes.push((
            "annotationSpace".into(),
            match self.annotation_space {
                AnnotationSpace::Xyz => "xyz",
                AnnotationSpace::Ijk => "ijk",
                AnnotationSpace::Ras => "RAS",
                AnnotationSpace::IjkAndRas => "IJKAndRAS",
            }
            .to_string(),
        ));
        attributes.push((
            "annotationMode".into(),
            match self.annotation_mode {
                AnnotationMode::NoAnnotation => "NoAnnotation",
                AnnotationMode::All => "All",
                AnnotationMode::LabelValuesOnly => "LabelValuesOnly",
                AnnotationMode::LabelAndVoxelValuesOnly => "LabelAndVoxelValuesOnly",
            }
            .to_string(),
        ));
        attributes.push((
            "doPropagateVolumeSelection".into(),
            bool_attribute(self.do_propagate_volume_selection),
        ));
        for (name, layer_index) in [
            ("backgroundVolumeID", BACKGROUND_LAYER),
            ("foregroundVolumeID", FOREGROUND_LAYER),
            ("labelVolumeID", LABEL_LAYER),
        ] {
            if let Some(id) = self.layer_volume_id(layer_index) {
                attributes.push((name.into(), id.as_str().to_string()));
            }
        }
        attributes
    }

    /// Apply persisted attributes. Unknown names are ignored; malformed
    /// values are logged and skipped, leaving the prior state untouched. An
    /// empty volume ID clears the reference.
    pub fn read_attributes<'a>(&mut self, attributes: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (name, value) in attributes {
            match name {
                "compositing" => {
                    let mode = match value.parse::<i32>() {
                        Ok(0) => Some(CompositingMode::Alpha),
                        Ok(1) => Some(CompositingMode::ReverseAlpha),
                        Ok(2) => Some(CompositingMode::Add),
                        Ok(3) => Some(CompositingMode::Subtract),
                        _ => None,
                    };
                    match mode {
                        Some(mode) => self.compositing = mode,
                        None => warn!(value, "unrecognized compositing attribute"),
                    }
                }
                "foregroundOpacity" => match value.parse::<f64>() {
                    Ok(opacity) => self.set_foreground_opacity(opacity),
                    Err(_) => warn!(value, "malformed foregroundOpacity attribute"),
                },
                "labelOpacity" => match value.parse::<f64>() {
                    Ok(opacity) => self.set_label_opacity(opacity),
                    Err(_) => warn!(value, "malformed labelOpacity attribute"),
                },
                "linkedControl" => {
                    read_bool_attribute(name, value, &mut self.linked_control);
                }
                "hotLinkedControl" => {
                    read_bool_attribute(name, value, &mut self.hot_linked_control);
                }
                "fiducialVisibility" => {
                    read_bool_attribute(name, value, &mut self.fiducial_visibility);
                }
                "fiducialLabelVisibility" => {
                    read_bool_attribute(name, value, &mut self.fiducial_label_visibility);
                }
                "sliceIntersectionVisibility" => {
                    read_bool_attribute(name, value, &mut self.slice_intersection_visibility);
                }
                "layoutName" => self.set_layout_name(value),
                "annotationSpace" => match value {
                    "xyz" => self.annotation_space = AnnotationSpace::Xyz,
                    "ijk" => self.annotation_space = AnnotationSpace::Ijk,
                    "RAS" => self.annotation_space = AnnotationSpace::Ras,
                    "IJKAndRAS" => self.annotation_space = AnnotationSpace::IjkAndRas,
                    _ => warn!(value, "unrecognized annotationSpace attribute"),
                },
                "annotationMode" => match value {
                    "NoAnnotation" => self.annotation_mode = AnnotationMode::NoAnnotation,
                    "All" => self.annotation_mode = AnnotationMode::All,
                    "LabelValuesOnly" => self.annotation_mode = AnnotationMode::LabelValuesOnly,
                    "LabelAndVoxelValuesOnly" => {
                        self.annotation_mode = AnnotationMode::LabelAndVoxelValuesOnly;
                    }
                    _ => warn!(value, "unrecognized annotationMode attribute"),
                },
                "doPropagateVolumeSelection" => {
                    read_bool_attribute(name, value, &mut self.do_propagate_volume_selection);
                }
                "backgroundVolumeID" => {
                    self.set_background_volume_id(volume_id_attribute(value));
                }
                "foregroundVolumeID" => {
                    self.set_foreground_volume_id(volume_id_attribute(value));
                }
                "labelVolumeID" => {
                    self.set_label_volume_id(volume_id_attribute(value));
                }
                _ => {}
            }
        }
    }

    /// Interaction state setters deliberately do not count as node
    /// modifications; callers route them through the scene's quiet path.
    pub fn set_interacting(&mut self, interacting: bool) {
        self.interacting = interacting;
    }

    pub fn interacting(&self) -> bool {
        self.interacting
    }

    pub fn set_interaction_flags(&mut self, flags: CompositeInteractionFlags) {
        self.interaction_flags = flags;
    }

    pub fn interaction_flags(&self) -> CompositeInteractionFlags {
        self.interaction_flags
    }

    pub fn set_interaction_flags_modifier(&mut self, flags: CompositeInteractionFlags) {
        self.interaction_flags_modifier = flags;
    }

    pub fn interaction_flags_modifier(&self) -> CompositeInteractionFlags {
        self.interaction_flags_modifier
    }

    pub fn reset_interaction_flags_modifier(&mut self) {
        self.interaction_flags_modifier = CompositeInteractionFlags::all();
    }
}

fn bool_attribute(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

/// Booleans persist as integers; any nonzero value reads as true.
fn read_bool_attribute(name: &str, value: &str, target: &mut bool) {
    match value.parse::<i64>() {
        Ok(parsed) => *target = parsed != 0,
        Err(_) => warn!(name, value, "malformed boolean attribute"),
    }
}

fn volume_id_attribute(value: &str) -> Option<NodeId> {
    (!value.is_empty()).then(|| NodeId::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_opacity_defaults_to_transparent() {
        let mut node = SliceCompositeNode::new("Red");
        assert_eq!(node.layer_opacity(5), 0.0);
        node.set_layer_opacity(5, 0.75);
        assert_eq!(node.layer_opacity(5), 0.75);
        assert_eq!(node.layer_opacity(4), 0.0);
    }

    #[test]
    fn layer_compositing_falls_back_to_node_default() {
        let mut node = SliceCompositeNode::new("Red");
        node.compositing = CompositingMode::Add;
        assert_eq!(node.layer_compositing(1), CompositingMode::Add);
        node.set_layer_compositing(1, CompositingMode::Subtract);
        assert_eq!(node.layer_compositing(1), CompositingMode::Subtract);
        assert_eq!(node.layer_compositing(0), CompositingMode::Add);
    }

    #[test]
    fn layer_volume_slots_grow_on_demand() {
        let mut node = SliceCompositeNode::new("Red");
        assert!(node.layer_volume_id(7).is_none());
        node.set_layer_volume_id(7, Some(NodeId::new("Volume3")));
        assert_eq!(node.layer_volume_id(7).unwrap().as_str(), "Volume3");
        assert_eq!(node.layer_count(), 8);
    }

    #[test]
    fn attributes_round_trip() {
        let mut node = SliceCompositeNode::new("Red");
        node.compositing = CompositingMode::Subtract;
        node.set_foreground_opacity(0.4);
        node.set_label_opacity(0.6);
        node.linked_control = true;
        node.annotation_space = AnnotationSpace::Ras;
        node.annotation_mode = AnnotationMode::LabelValuesOnly;
        node.do_propagate_volume_selection = false;
        node.set_background_volume_id(Some(NodeId::new("Volume1")));
        node.set_label_volume_id(Some(NodeId::new("Volume2")));

        let attributes = node.write_attributes();
        let mut restored = SliceCompositeNode::new("Red");
        restored.read_attributes(
            attributes
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );

        assert_eq!(restored.compositing, CompositingMode::Subtract);
        assert_eq!(restored.foreground_opacity(), 0.4);
        assert_eq!(restored.label_opacity(), 0.6);
        assert!(restored.linked_control);
        assert_eq!(restored.annotation_space, AnnotationSpace::Ras);
        assert_eq!(restored.annotation_mode, AnnotationMode::LabelValuesOnly);
        assert!(!restored.do_propagate_volume_selection);
        assert_eq!(restored.layout_name(), Some("Red"));
        assert_eq!(restored.background_volume_id().unwrap().as_str(), "Volume1");
        assert!(restored.foreground_volume_id().is_none());
        assert_eq!(restored.label_volume_id().unwrap().as_str(), "Volume2");
    }

    #[test]
    fn malformed_attributes_leave_prior_state() {
        let mut node = SliceCompositeNode::new("Red");
        node.compositing = CompositingMode::Add;
        node.set_foreground_opacity(0.5);
        node.read_attributes([
            ("compositing", "seven"),
            ("foregroundOpacity", "opaque"),
            ("annotationSpace", "XYZW"),
            ("someFutureAttribute", "ignored"),
        ]);
        assert_eq!(node.compositing, CompositingMode::Add);
        assert_eq!(node.foreground_opacity(), 0.5);
        assert_eq!(node.annotation_space, AnnotationSpace::IjkAndRas);
    }

    #[test]
    fn empty_volume_id_clears_the_reference() {
        let mut node = SliceCompositeNode::new("Red");
        node.set_background_volume_id(Some(NodeId::new("Volume1")));
        node.read_attributes([("backgroundVolumeID", "")]);
        assert!(node.background_volume_id().is_none());
    }
}
