//! Slice view logic: resolves composite-node layers against the scene,
//! folds them through the compositing pipeline, and keeps the 3D slice-plane
//! proxy model in sync.
//!
//! One instance drives one named slice view ("Red", "Green", "Yellow"). All
//! geometry queries fail soft: absent volumes or slice nodes produce
//! documented sentinel values so the view can always render something while
//! a scene is being assembled.

use std::sync::Arc;

use image::GrayAlphaImage;
use nalgebra::{Vector3, Vector4};
use tracing::{debug, error, warn};

pub mod layer;
pub mod pipeline;

pub use layer::SliceLayer;
pub use pipeline::PipelineItem;

use crate::enums::{CompositingMode, Orientation, SliceResolutionMode, SliceSpacingMode};
use crate::events::{SceneEvent, SceneEventKind, SceneObserver};
use crate::nodes::{
    BACKGROUND_LAYER, CompositeInteractionFlags, LABEL_LAYER, LinearTransformNode,
    ModelDisplayNode, ModelNode, Node, NodeId, SliceCompositeNode, SliceInteractionFlags,
    SliceNode, SlicePlane, VolumeNode,
};
use crate::scene::Scene;
use pipeline::{pipeline_output, set_pipeline_item, truncate_pipeline};

/// Slice normal is not aligned (within 0.1 degrees) with any volume axis.
pub const SLICE_INDEX_ROTATED: i32 = -1;
/// The offset lies outside the volume along the aligned axis.
pub const SLICE_INDEX_OUT_OF_VOLUME: i32 = -2;
/// No volume (or no image data) to index into.
pub const SLICE_INDEX_NO_VOLUME: i32 = -3;

pub const SLICE_MODEL_NODE_NAME_SUFFIX: &str = "Volume Slice";

/// Degrees of tolerated misalignment between the slice normal and a volume
/// axis before the slice counts as rotated.
const AXIS_ALIGNMENT_TOLERANCE_DEGREES: f64 = 0.1;

#[derive(Debug, Default)]
pub struct SliceLogic {
    name: String,
    scene_attached: bool,
    slice_node_id: Option<NodeId>,
    composite_node_id: Option<NodeId>,
    model_node_id: Option<NodeId>,
    model_display_node_id: Option<NodeId>,
    model_transform_node_id: Option<NodeId>,
    layers: Vec<Option<SliceLayer>>,
    pipeline: Vec<PipelineItem>,
    pipeline_uvw: Vec<PipelineItem>,
    slice_spacing: [f64; 3],
    image_data: Option<Arc<GrayAlphaImage>>,
    model_texture: Option<Arc<GrayAlphaImage>>,
    recompute_passes: usize,
}

impl SliceLogic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slice_spacing: [1.0, 1.0, 1.0],
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Attach the logic to a scene: create layers, resolve or create the
    /// paired slice and composite nodes, build the slice model and pipeline.
    ///
    /// The logic name must be set first; an unnamed logic cannot resolve its
    /// singleton nodes and the call is abandoned.
    pub fn set_scene(&mut self, scene: &mut Scene) {
        if self.name.is_empty() {
            error!("logic name is empty - call set_name before set_scene");
            return;
        }
        self.scene_attached = true;
        self.process_logics_events(scene);
        self.update_slice_nodes(scene);
    }

    /// Detach from the scene, removing the slice-model proxy and dropping
    /// all node bindings and pipeline state.
    pub fn disconnect_scene(&mut self, scene: &mut Scene) {
        truncate_pipeline(&mut self.pipeline, 0);
        truncate_pipeline(&mut self.pipeline_uvw, 0);
        self.delete_slice_model(scene);
        self.slice_node_id = None;
        self.composite_node_id = None;
        self.layers.clear();
        self.image_data = None;
        self.model_texture = None;
        self.scene_attached = false;
    }

    pub fn scene_attached(&self) -> bool {
        self.scene_attached
    }

    pub fn slice_node_id(&self) -> Option<&NodeId> {
        self.slice_node_id.as_ref()
    }

    pub fn composite_node_id(&self) -> Option<&NodeId> {
        self.composite_node_id.as_ref()
    }

    pub fn model_node_id(&self) -> Option<&NodeId> {
        self.model_node_id.as_ref()
    }

    pub fn model_display_node_id(&self) -> Option<&NodeId> {
        self.model_display_node_id.as_ref()
    }

    pub fn model_transform_node_id(&self) -> Option<&NodeId> {
        self.model_transform_node_id.as_ref()
    }

    /// Number of full recomputation passes run so far (diagnostic).
    pub fn recompute_pass_count(&self) -> usize {
        self.recompute_passes
    }

    // ------------------------------------------------------------------
    // Node resolution

    /// Re-resolve the slice node by layout name: rebind when out of sync,
    /// create and add a defaulted node when the scene has none.
    pub fn update_slice_node(&mut self, scene: &mut Scene) {
        let found = scene.find_slice_node_by_layout(&self.name);

        if let (Some(bound), Some(found_id)) = (self.slice_node_id.as_ref(), found.as_ref()) {
            if bound != found_id {
                self.slice_node_id = None;
            }
        }

        if self.slice_node_id.is_none() {
            self.slice_node_id = Some(match found {
                Some(id) => id,
                None => self.create_slice_node(scene),
            });
        }

        if let Some(id) = self.slice_node_id.clone() {
            if !scene.contains(&id) {
                let fresh = self.create_slice_node(scene);
                self.slice_node_id = Some(fresh);
            }
        }
    }

    fn create_slice_node(&self, scene: &mut Scene) -> NodeId {
        let mut node = SliceNode::new(self.name.clone());
        node.set_layout_name(&self.name);
        if let Some(orientation) = layout_orientation(&self.name) {
            node.set_orientation(orientation);
        }
        scene.add_node(Node::Slice(node))
    }

    /// Reset the bound slice node's orientation to its layout default.
    pub fn update_slice_node_from_layout(&mut self, scene: &mut Scene) {
        let Some(id) = self.slice_node_id.clone() else {
            return;
        };
        let Some(orientation) = layout_orientation(&self.name) else {
            return;
        };
        scene.modify_quietly(&id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_orientation(orientation);
            }
        });
    }

    /// Re-resolve the composite node by layout name, creating one when the
    /// scene has none.
    pub fn update_slice_composite_node(&mut self, scene: &mut Scene) {
        let found = scene.find_composite_node_by_layout(&self.name);

        if let (Some(bound), Some(found_id)) = (self.composite_node_id.as_ref(), found.as_ref()) {
            if bound != found_id {
                self.composite_node_id = None;
            }
        }

        if self.composite_node_id.is_none() {
            self.composite_node_id = Some(match found {
                Some(id) => id,
                None => scene.add_node(Node::SliceComposite(SliceCompositeNode::new(&self.name))),
            });
        }

        if let Some(id) = self.composite_node_id.clone() {
            if !scene.contains(&id) {
                let fresh =
                    scene.add_node(Node::SliceComposite(SliceCompositeNode::new(&self.name)));
                self.composite_node_id = Some(fresh);
            }
        }
    }

    /// Full recomputation pass: resolve nodes, rebuild the slice model, then
    /// the pipeline. Suppressed entirely while the scene batch processes;
    /// the end-of-batch event runs the single coalesced pass.
    pub fn update_slice_nodes(&mut self, scene: &mut Scene) {
        if scene.is_batch_processing() {
            return;
        }
        debug!(view = %self.name, "recomputation pass");
        self.recompute_passes += 1;
        self.update_slice_node(scene);
        self.update_slice_composite_node(scene);
        self.create_slice_model(scene);
        self.update_pipeline(scene);
    }

    // ------------------------------------------------------------------
    // Layers

    pub fn layer(&self, layer_index: usize) -> Option<&SliceLayer> {
        self.layers.get(layer_index)?.as_ref()
    }

    pub fn set_layer(&mut self, layer_index: usize, layer: Option<SliceLayer>) {
        if layer_index >= self.layers.len() {
            self.layers.resize_with(layer_index + 1, || None);
        }
        self.layers[layer_index] = layer;
    }

    fn ensure_default_layers(&mut self) {
        for layer_index in BACKGROUND_LAYER..=LABEL_LAYER {
            if self.layer(layer_index).is_none() {
                self.set_layer(
                    layer_index,
                    Some(SliceLayer::new(layer_index == LABEL_LAYER)),
                );
            }
        }
    }

    fn is_default_layer(layer_index: usize) -> bool {
        layer_index <= LABEL_LAYER
    }

    pub fn layer_volume_node(&self, layer_index: usize) -> Option<&NodeId> {
        self.layer(layer_index)?.volume_node_id()
    }

    /// Rebind one layer. Pipeline recomputation is left to the caller so
    /// several rebinds can batch into one pass.
    pub fn set_layer_volume_node(&mut self, layer_index: usize, volume_node_id: Option<NodeId>) {
        self.ensure_default_layers();
        if layer_index >= self.layers.len() {
            self.layers.resize_with(layer_index + 1, || None);
        }
        self.layers[layer_index]
            .get_or_insert_with(|| SliceLayer::new(false))
            .set_volume_node_id(volume_node_id);
    }

    pub fn layer_image_data(&self, layer_index: usize) -> Option<&Arc<GrayAlphaImage>> {
        self.layer(layer_index)?.image_data()
    }

    pub fn layer_image_data_uvw(&self, layer_index: usize) -> Option<&Arc<GrayAlphaImage>> {
        self.layer(layer_index)?.image_data_uvw()
    }

    /// First layer, in index order, bound to a volume that still resolves in
    /// the scene. Used as the reference object for fit and spacing queries;
    /// absence is not an error.
    pub fn first_non_null_layer_volume_node(&self, scene: &Scene) -> Option<NodeId> {
        self.layers
            .iter()
            .flatten()
            .filter_map(SliceLayer::volume_node_id)
            .find(|id| scene.node(id).and_then(Node::as_volume).is_some())
            .cloned()
    }

    fn next_non_null_image_layer_index(&self, layer_index: usize) -> Option<usize> {
        (layer_index..self.layers.len()).find(|&index| {
            self.layers[index]
                .as_ref()
                .and_then(SliceLayer::image_data)
                .is_some()
        })
    }

    pub fn has_inputs(&self) -> bool {
        self.layers
            .iter()
            .flatten()
            .any(|layer| layer.image_data().is_some())
    }

    /// The composited 2D display image, when any layer contributes.
    pub fn image_data(&self) -> Option<&Arc<GrayAlphaImage>> {
        if self.has_inputs() {
            self.image_data.as_ref()
        } else {
            None
        }
    }

    /// Texture feeding the slice-model proxy (UVW composite unless the
    /// resolution mode matches the 2D view).
    pub fn model_texture(&self) -> Option<&Arc<GrayAlphaImage>> {
        if self.has_inputs() {
            self.model_texture.as_ref()
        } else {
            None
        }
    }

    pub fn pipeline_len(&self) -> usize {
        self.pipeline.len()
    }

    pub fn pipeline_item(&self, item_index: usize) -> Option<&PipelineItem> {
        self.pipeline.get(item_index)
    }

    pub fn pipeline_uvw_len(&self) -> usize {
        self.pipeline_uvw.len()
    }

    // ------------------------------------------------------------------
    // Pipeline

    /// Rebuild compositing stages from composite-node state, skipping layers
    /// with no image so gaps do not create stages, then refresh the model
    /// display texture bindings.
    pub fn update_pipeline(&mut self, scene: &mut Scene) {
        let (Some(slice_id), Some(composite_id)) =
            (self.slice_node_id.clone(), self.composite_node_id.clone())
        else {
            return;
        };
        let Some(composite) = scene.node(&composite_id).and_then(Node::as_composite).cloned()
        else {
            return;
        };

        self.ensure_default_layers();

        // Sync layer bindings with the composite node's references.
        let mut modified = false;
        for layer_index in 0..self.layers.len().max(composite.layer_count()) {
            let bound = composite.layer_volume_id(layer_index).cloned();
            if self.layer_volume_node(layer_index) != bound.as_ref() {
                self.set_layer_volume_node(layer_index, bound);
                modified = true;
            }
        }
        if modified {
            self.set_slice_extents_to_slice_node(scene);
        }

        let Some(slice_node) = scene.node(&slice_id).and_then(Node::as_slice).cloned() else {
            return;
        };
        let build_uvw = slice_node.resolution_mode != SliceResolutionMode::Match2DView;
        for layer in self.layers.iter_mut().flatten() {
            layer.update(scene, &slice_node, build_uvw);
        }

        // The slice intersection toggle lives on the composite node.
        if let Some(display_id) = self.model_display_node_id.clone() {
            let intersection = composite.slice_intersection_visibility;
            scene.modify_quietly(&display_id, |node| {
                if let Some(display) = node.as_model_display_mut() {
                    display.slice_intersection_visibility = intersection;
                }
            });
        }

        let mut item_index = 0;
        let mut layer_index = 0;
        while layer_index < self.layers.len() {
            let Some(next) = self.next_non_null_image_layer_index(layer_index) else {
                break;
            };
            let (image, image_uvw, is_label) = match self.layers[next].as_ref() {
                Some(layer) => (
                    layer.image_data().cloned(),
                    layer.image_data_uvw().cloned(),
                    layer.is_label_layer(),
                ),
                None => (None, None, false),
            };
            let Some(image) = image else {
                break;
            };

            let opacity = composite.layer_opacity(next);
            let mut compositing_mode = composite.layer_compositing(next);
            // Labels always alpha-blend, whatever the composite node says
            // for that slot.
            if Self::is_default_layer(next) && is_label {
                compositing_mode = CompositingMode::Alpha;
            }

            set_pipeline_item(
                &mut self.pipeline,
                item_index,
                &image,
                opacity,
                compositing_mode,
            );
            if build_uvw {
                if let Some(image_uvw) = image_uvw {
                    set_pipeline_item(
                        &mut self.pipeline_uvw,
                        item_index,
                        &image_uvw,
                        opacity,
                        compositing_mode,
                    );
                }
            }

            item_index += 1;
            layer_index = next + 1;
        }

        truncate_pipeline(&mut self.pipeline, item_index);
        truncate_pipeline(&mut self.pipeline_uvw, if build_uvw { item_index } else { 0 });

        self.image_data = pipeline_output(&self.pipeline);
        self.model_texture = if build_uvw {
            pipeline_output(&self.pipeline_uvw)
        } else {
            self.image_data.clone()
        };

        let has_inputs = self.has_inputs();
        let label_has_image = if build_uvw {
            self.layer_image_data_uvw(LABEL_LAYER).is_some()
        } else {
            self.layer_image_data(LABEL_LAYER).is_some()
        };
        if let Some(display_id) = self.model_display_node_id.clone() {
            let texture = if has_inputs {
                self.model_texture.clone()
            } else {
                None
            };
            let visible = slice_node.slice_visible;
            scene.modify_quietly(&display_id, |node| {
                if let Some(display) = node.as_model_display_mut() {
                    display.visibility = visible;
                    display.texture = texture;
                    display.interpolate_texture = !label_has_image;
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Slice model proxy

    /// Create the 3D proxy (plane model, display, identity transform) if it
    /// does not exist; all three nodes are ephemeral scene state, hidden
    /// from editors and never saved.
    pub fn create_slice_model(&mut self, scene: &mut Scene) {
        if !self.scene_attached {
            return;
        }

        if let Some(model_id) = self.model_node_id.clone() {
            if !scene.contains(&model_id) {
                self.delete_slice_model(scene);
            }
        }

        if self.model_node_id.is_none() {
            let layout_color = self
                .slice_node(scene)
                .map(|slice| slice.layout_color)
                .unwrap_or([1.0, 1.0, 1.0]);

            let mut display = ModelDisplayNode::new("");
            display.base.hide_from_editors = true;
            display.base.selectable = false;
            display.base.save_with_scene = false;
            display.visibility = false;
            display.opacity = 1.0;
            display.color = layout_color;
            display.ambient = 1.0;
            display.diffuse = 0.0;
            display.backface_culling = false;
            display.texture = self.model_texture.clone();
            display.slice_intersection_visibility = false;
            let display_id = scene.add_node(Node::ModelDisplay(display));

            let mut transform = LinearTransformNode::identity("");
            transform.base.hide_from_editors = true;
            transform.base.selectable = false;
            transform.base.save_with_scene = false;
            let transform_id = scene.add_node(Node::LinearTransform(transform));

            let mut model = ModelNode::new(format!("{} {SLICE_MODEL_NODE_NAME_SUFFIX}", self.name));
            model.base.hide_from_editors = true;
            model.base.selectable = false;
            model.base.save_with_scene = false;
            model.polydata = Some(SlicePlane::default());
            model.display_node_id = Some(display_id.clone());
            model.transform_node_id = Some(transform_id.clone());
            let model_id = scene.add_node(Node::Model(model));

            self.model_node_id = Some(model_id);
            self.model_display_node_id = Some(display_id);
            self.model_transform_node_id = Some(transform_id);
        }

        // Keep the description pointing back at the driving nodes.
        if let Some(model_id) = self.model_node_id.clone() {
            let mut description = String::new();
            if let Some(slice_id) = &self.slice_node_id {
                description.push_str(&format!(" SliceID {slice_id}"));
            }
            if let Some(composite_id) = &self.composite_node_id {
                description.push_str(&format!(" CompositeID {composite_id}"));
            }
            scene.modify_quietly(&model_id, |node| {
                node.base_mut().description = description;
            });
        }
    }

    /// Tear down the proxy: clear its cross-references first, then remove
    /// the nodes through the scene.
    pub fn delete_slice_model(&mut self, scene: &mut Scene) {
        if let Some(model_id) = self.model_node_id.clone() {
            scene.modify_quietly(&model_id, |node| {
                if let Some(model) = node.as_model_mut() {
                    model.display_node_id = None;
                    model.transform_node_id = None;
                    model.polydata = None;
                }
            });
        }
        if let Some(display_id) = self.model_display_node_id.clone() {
            scene.modify_quietly(&display_id, |node| {
                if let Some(display) = node.as_model_display_mut() {
                    display.texture = None;
                }
            });
        }

        for id in [
            self.model_node_id.take(),
            self.model_display_node_id.take(),
            self.model_transform_node_id.take(),
        ]
        .into_iter()
        .flatten()
        {
            if scene.contains(&id) {
                scene.remove_node(&id);
            }
        }
    }

    /// A model node created by some slice logic as its proxy plane.
    pub fn is_slice_model_node(node: &Node) -> bool {
        node.as_model().is_some() && node.base().name.contains(SLICE_MODEL_NODE_NAME_SUFFIX)
    }

    /// Recompute the proxy plane corners from the active slice geometry and
    /// refresh the pipeline feeding its texture. Invoked whenever a layer
    /// reports a modification.
    pub fn process_logics_events(&mut self, scene: &mut Scene) {
        self.ensure_default_layers();

        let model_ready = match (&self.model_node_id, &self.slice_node_id) {
            (Some(model_id), Some(_)) => scene
                .node(model_id)
                .and_then(Node::as_model)
                .is_some_and(|model| model.polydata.is_some()),
            _ => false,
        };
        if !model_ready {
            return;
        }

        let Some(slice_node) = self.slice_node(scene).cloned() else {
            return;
        };

        let (texture_to_ras, plane_dims) =
            if slice_node.resolution_mode != SliceResolutionMode::Match2DView {
                let uvw = slice_node.uvw_dimensions();
                (
                    *slice_node.uvw_to_ras(),
                    [
                        uvw[0].saturating_sub(1) as f64,
                        uvw[1].saturating_sub(1) as f64,
                    ],
                )
            } else {
                let dims = slice_node.dimensions();
                (*slice_node.xy_to_ras(), [dims[0] as f64, dims[1] as f64])
            };

        let z = f64::from(slice_node.active_slice());
        let corner = |x: f64, y: f64| {
            let point = texture_to_ras * Vector4::new(x, y, z, 1.0);
            nalgebra::Point3::new(point.x, point.y, point.z)
        };
        let points = [
            corner(0.0, 0.0),
            corner(plane_dims[0], 0.0),
            corner(0.0, plane_dims[1]),
            corner(plane_dims[0], plane_dims[1]),
        ];

        if let Some(model_id) = self.model_node_id.clone() {
            scene.modify_quietly(&model_id, |node| {
                if let Some(model) = node.as_model_mut() {
                    model.polydata = Some(SlicePlane { points });
                }
            });
        }

        self.update_pipeline(scene);
    }

    // ------------------------------------------------------------------
    // Coordinate transform resolution

    fn slice_node<'a>(&self, scene: &'a Scene) -> Option<&'a SliceNode> {
        scene.node(self.slice_node_id.as_ref()?).and_then(Node::as_slice)
    }

    fn composite_node<'a>(&self, scene: &'a Scene) -> Option<&'a SliceCompositeNode> {
        scene
            .node(self.composite_node_id.as_ref()?)
            .and_then(Node::as_composite)
    }

    fn volume_node<'a>(scene: &'a Scene, volume_id: Option<&NodeId>) -> Option<&'a VolumeNode> {
        scene.node(volume_id?).and_then(Node::as_volume)
    }

    /// RAS-space size and center of the volume's bounding box; zeros when
    /// the volume or its image data is absent.
    pub fn volume_ras_box(
        &self,
        scene: &Scene,
        volume_id: Option<&NodeId>,
    ) -> ([f64; 3], [f64; 3]) {
        let mut dimensions = [0.0; 3];
        let mut center = [0.0; 3];
        let Some(volume_node) = Self::volume_node(scene, volume_id) else {
            return (dimensions, center);
        };
        let world = scene.transform_to_world(volume_node.transform_node_id.as_ref());
        let Some(bounds) = volume_node.ras_bounds(&world) else {
            return (dimensions, center);
        };
        for axis in 0..3 {
            dimensions[axis] = bounds[2 * axis + 1] - bounds[2 * axis];
            center[axis] = 0.5 * (bounds[2 * axis + 1] + bounds[2 * axis]);
        }
        (dimensions, center)
    }

    /// Per-axis min/max of the volume's RAS box seen in slice space
    /// `[xmin, xmax, ymin, ymax, zmin, zmax]`. Only the rotation/scale part
    /// of slice-to-RAS applies: translation is zeroed before inversion.
    pub fn volume_slice_bounds(&self, scene: &Scene, volume_id: Option<&NodeId>) -> [f64; 6] {
        let mut slice_bounds = [0.0; 6];
        let Some(slice_node) = self.slice_node(scene) else {
            return slice_bounds;
        };

        let (ras_dimensions, ras_center) = self.volume_ras_box(scene, volume_id);

        let mut ras_to_slice = *slice_node.slice_to_ras();
        ras_to_slice[(0, 3)] = 0.0;
        ras_to_slice[(1, 3)] = 0.0;
        ras_to_slice[(2, 3)] = 0.0;
        let Some(ras_to_slice) = ras_to_slice.try_inverse() else {
            return slice_bounds;
        };

        let mut min_bounds = [f64::MAX; 3];
        let mut max_bounds = [f64::MIN; 3];
        for &i in &[-1.0, 1.0] {
            for &j in &[-1.0, 1.0] {
                for &k in &[-1.0, 1.0] {
                    let corner = Vector4::new(
                        ras_center[0] + i * ras_dimensions[0] / 2.0,
                        ras_center[1] + j * ras_dimensions[1] / 2.0,
                        ras_center[2] + k * ras_dimensions[2] / 2.0,
                        1.0,
                    );
                    let slice_corner = ras_to_slice * corner;
                    for axis in 0..3 {
                        min_bounds[axis] = min_bounds[axis].min(slice_corner[axis]);
                        max_bounds[axis] = max_bounds[axis].max(slice_corner[axis]);
                    }
                }
            }
        }
        for axis in 0..3 {
            slice_bounds[2 * axis] = min_bounds[axis];
            slice_bounds[2 * axis + 1] = max_bounds[axis];
        }
        slice_bounds
    }

    /// Slice-space size and center of the volume.
    pub fn volume_slice_dimensions(
        &self,
        scene: &Scene,
        volume_id: Option<&NodeId>,
    ) -> ([f64; 3], [f64; 3]) {
        let bounds = self.volume_slice_bounds(scene, volume_id);
        let mut dimensions = [0.0; 3];
        let mut center = [0.0; 3];
        for axis in 0..3 {
            dimensions[axis] = bounds[2 * axis + 1] - bounds[2 * axis];
            center[axis] = 0.5 * (bounds[2 * axis + 1] + bounds[2 * axis]);
        }
        (dimensions, center)
    }

    /// Spacing of the volume along the slice axes. In prescribed mode the
    /// slice node's triple is returned verbatim; otherwise the unit IJK
    /// vector is pushed through IJK-to-slice and read per axis. Falls back
    /// to the cached spacing (1,1,1 initially) when either node is missing.
    pub fn volume_slice_spacing(&mut self, scene: &Scene, volume_id: Option<&NodeId>) -> [f64; 3] {
        let Some(volume_node) = Self::volume_node(scene, volume_id) else {
            return self.slice_spacing;
        };
        let Some(slice_node) = self.slice_node(scene) else {
            return self.slice_spacing;
        };

        if slice_node.spacing_mode == SliceSpacingMode::Prescribed {
            self.slice_spacing = slice_node.prescribed_spacing;
            return self.slice_spacing;
        }

        let mut ijk_to_ras = volume_node.ijk_to_ras;
        if volume_node.transform_node_id.is_some() {
            let world = scene.transform_to_world(volume_node.transform_node_id.as_ref());
            if let Some(world_inverse) = world.try_inverse() {
                ijk_to_ras = world_inverse * ijk_to_ras;
            }
        }

        let Some(ras_to_slice) = slice_node.slice_to_ras().try_inverse() else {
            return self.slice_spacing;
        };
        let ijk_to_slice = ras_to_slice * ijk_to_ras;

        let spacing = ijk_to_slice * Vector4::new(1.0, 1.0, 1.0, 0.0);
        for axis in 0..3 {
            self.slice_spacing[axis] = spacing[axis].abs();
        }
        self.slice_spacing
    }

    /// Adjust the slice node's field of view to frame the volume, fitting
    /// the smaller window dimension and expanding the other axis when the
    /// volume would overflow, then recenter on the volume's RAS center.
    pub fn fit_slice_to_volume(
        &mut self,
        scene: &mut Scene,
        volume_id: Option<&NodeId>,
        width: usize,
        height: usize,
    ) {
        if width == 0 || height == 0 {
            warn!(width, height, "cannot fit slice to a zero-sized window");
            return;
        }
        let Some(volume_node) = Self::volume_node(scene, volume_id) else {
            return;
        };
        if volume_node.image_data().is_none() {
            return;
        }
        let Some(slice_id) = self.slice_node_id.clone() else {
            return;
        };

        let (_, ras_center) = self.volume_ras_box(scene, volume_id);
        let (slice_dimensions, _) = self.volume_slice_dimensions(scene, volume_id);

        let display_x = slice_dimensions[0].abs();
        let display_y = slice_dimensions[1].abs();
        let mut fit_x = display_x;
        let mut fit_y = display_y;
        let slice_dims_z = self
            .slice_node(scene)
            .map(|slice| slice.dimensions()[2])
            .unwrap_or(1);
        let fit_z = self.volume_slice_spacing(scene, volume_id)[2] * slice_dims_z as f64;

        // Fit the field of view to the smaller window dimension.
        if height > width {
            let pixel_size = fit_x / width as f64;
            fit_y = pixel_size * height as f64;
        } else {
            let pixel_size = fit_y / height as f64;
            fit_x = pixel_size * width as f64;
        }

        // If the volume is still too big, expand the other axis.
        if display_x > fit_x {
            fit_y /= fit_x / display_x;
            fit_x = display_x;
        }
        if display_y > fit_y {
            fit_x /= fit_y / display_y;
            fit_y = display_y;
        }

        scene.modify(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_field_of_view(fit_x, fit_y, fit_z);
                slice.set_slice_to_ras_translation(ras_center);
            }
        });
    }

    pub fn background_ras_box(&self, scene: &Scene) -> ([f64; 3], [f64; 3]) {
        self.volume_ras_box(scene, self.layer_volume_node(BACKGROUND_LAYER))
    }

    pub fn background_slice_bounds(&self, scene: &Scene) -> [f64; 6] {
        self.volume_slice_bounds(scene, self.layer_volume_node(BACKGROUND_LAYER))
    }

    pub fn background_slice_dimensions(&self, scene: &Scene) -> ([f64; 3], [f64; 3]) {
        self.volume_slice_dimensions(scene, self.layer_volume_node(BACKGROUND_LAYER))
    }

    pub fn background_slice_spacing(&mut self, scene: &Scene) -> [f64; 3] {
        let background = self.layer_volume_node(BACKGROUND_LAYER).cloned();
        self.volume_slice_spacing(scene, background.as_ref())
    }

    pub fn fit_slice_to_background(&mut self, scene: &mut Scene, width: usize, height: usize) {
        let background = self.layer_volume_node(BACKGROUND_LAYER).cloned();
        self.fit_slice_to_volume(scene, background.as_ref(), width, height);
    }

    /// Fit to the first populated layer. Negative sizes mean "use the slice
    /// node's current view dimensions".
    pub fn fit_slice_to_all(&mut self, scene: &mut Scene, width: i64, height: i64) {
        let (mut width, mut height) = (width, height);
        if width < 0 || height < 0 {
            let dimensions = self
                .slice_node(scene)
                .map(|slice| slice.dimensions())
                .unwrap_or([0, 0, 1]);
            width = dimensions[0] as i64;
            height = dimensions[1] as i64;
        }
        if width <= 0 || height <= 0 {
            error!(width, height, "invalid size for fit_slice_to_all");
            return;
        }
        if let Some(volume_id) = self.first_non_null_layer_volume_node(scene) {
            self.fit_slice_to_volume(scene, Some(&volume_id), width as usize, height as usize);
        }
    }

    /// Assign a user field of view to the smaller view dimension and scale
    /// the other by the window aspect; the Z field of view is untouched.
    pub fn fit_fov_to_background(&mut self, scene: &mut Scene, fov: f64) {
        let background = self.layer_volume_node(BACKGROUND_LAYER).cloned();
        let has_image = Self::volume_node(scene, background.as_ref())
            .and_then(VolumeNode::image_data)
            .is_some();
        if !has_image {
            return;
        }
        let Some(slice_id) = self.slice_node_id.clone() else {
            return;
        };

        scene.modify(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                let dimensions = slice.dimensions();
                let (width, height) = (dimensions[0] as f64, dimensions[1] as f64);
                let (fov_h, fov_v) = if width < height {
                    (fov, fov * height / width)
                } else {
                    (fov * width / height, fov)
                };
                let fov_z = slice.field_of_view()[2];
                slice.set_field_of_view(fov_h, fov_v, fov_z);
            }
        });
    }

    /// Resize the view, preserving the field of view of the less-magnified
    /// axis and reconciling the plane aspect with the new window aspect.
    pub fn resize_slice_node(&mut self, scene: &mut Scene, new_width: f64, new_height: f64) {
        let Some(slice_id) = self.slice_node_id.clone() else {
            return;
        };
        let slice_step = self.slice_spacing[2];

        scene.modify(&slice_id, |node| {
            let Some(slice) = node.as_slice_mut() else {
                return;
            };
            let new_width = new_width / slice.layout_grid_columns as f64;
            let new_height = new_height / slice.layout_grid_rows as f64;

            let old_dimensions = slice.dimensions();
            let old_fov = slice.field_of_view();

            let scaling_x = if new_width != 0.0 && old_dimensions[0] != 0 {
                new_width / old_dimensions[0] as f64
            } else {
                1.0
            };
            let scaling_y = if new_height != 0.0 && old_dimensions[1] != 0 {
                new_height / old_dimensions[1] as f64
            } else {
                1.0
            };

            let magnitude_x = if scaling_x >= 1.0 { scaling_x } else { 1.0 / scaling_x };
            let magnitude_y = if scaling_y >= 1.0 { scaling_y } else { 1.0 / scaling_y };

            let mut new_fov = [0.0; 3];
            if magnitude_x < magnitude_y {
                new_fov[0] = old_fov[0];
                new_fov[1] = old_fov[1] * scaling_y / scaling_x;
            } else {
                new_fov[0] = old_fov[0] * scaling_x / scaling_y;
                new_fov[1] = old_fov[1];
            }
            new_fov[2] = slice_step * old_dimensions[2] as f64;

            let window_aspect = if new_width != 0.0 {
                new_height / new_width
            } else {
                1.0
            };
            let plane_aspect = if new_fov[0] != 0.0 {
                new_fov[1] / new_fov[0]
            } else {
                1.0
            };
            if window_aspect != plane_aspect && window_aspect != 0.0 {
                new_fov[0] = new_fov[1] / window_aspect;
            }

            slice.set_dimensions(
                new_width.max(1.0) as usize,
                new_height.max(1.0) as usize,
                old_dimensions[2],
            );
            slice.set_field_of_view(new_fov[0], new_fov[1], new_fov[2]);
        });
    }

    /// Spacing of the first populated layer's volume, or the cached default.
    pub fn lowest_volume_slice_spacing(&mut self, scene: &Scene) -> [f64; 3] {
        match self.first_non_null_layer_volume_node(scene) {
            Some(volume_id) => self.volume_slice_spacing(scene, Some(&volume_id)),
            None => self.slice_spacing,
        }
    }

    pub fn lowest_volume_slice_bounds(&self, scene: &Scene) -> [f64; 6] {
        let volume_id = self.first_non_null_layer_volume_node(scene);
        self.volume_slice_bounds(scene, volume_id.as_ref())
    }

    /// Aggregate slice-space bounds of the populated layers; ±100 mm when no
    /// volume is bound, so an empty scene still frames something sensible.
    pub fn slice_bounds(&self, scene: &Scene) -> [f64; 6] {
        let mut slice_bounds = [
            f64::MAX,
            f64::MIN,
            f64::MAX,
            f64::MIN,
            f64::MAX,
            f64::MIN,
        ];

        if let Some(volume_id) = self.first_non_null_layer_volume_node(scene) {
            let bounds = self.volume_slice_bounds(scene, Some(&volume_id));
            for axis in 0..3 {
                slice_bounds[2 * axis] = slice_bounds[2 * axis].min(bounds[2 * axis]);
                slice_bounds[2 * axis + 1] = slice_bounds[2 * axis + 1].max(bounds[2 * axis + 1]);
            }
        }

        for axis in 0..3 {
            if slice_bounds[2 * axis] == f64::MAX {
                slice_bounds[2 * axis] = -100.0;
            }
            if slice_bounds[2 * axis + 1] == f64::MIN {
                slice_bounds[2 * axis + 1] = 100.0;
            }
        }
        slice_bounds
    }

    /// Current distance from the RAS origin to the slice plane.
    pub fn slice_offset(&self, scene: &Scene) -> f64 {
        self.slice_node(scene)
            .map(SliceNode::slice_offset)
            .unwrap_or(0.0)
    }

    pub fn set_slice_offset(&mut self, scene: &mut Scene, offset: f64) {
        let Some(slice_id) = self.slice_node_id.clone() else {
            return;
        };
        scene.modify(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_slice_offset(offset);
            }
        });
    }

    /// Move the offset to the center of the nearest slice step of the first
    /// populated volume.
    pub fn snap_slice_offset_to_ijk(&mut self, scene: &mut Scene) {
        let old_offset = self.slice_offset(scene);
        let spacing = self.lowest_volume_slice_spacing(scene);
        let bounds = self.lowest_volume_slice_bounds(scene);
        if spacing[2] == 0.0 {
            return;
        }
        let slice = (old_offset - bounds[4]) / spacing[2];
        let offset = (slice.floor() + 0.5) * spacing[2] + bounds[4];
        self.set_slice_offset(scene, offset);
    }

    /// 1-based slice index of `volume` at a RAS-plane offset, or a negative
    /// sentinel: no volume, outside the volume, or slice rotated away from
    /// every volume axis.
    pub fn slice_index_from_offset(
        &self,
        scene: &Scene,
        slice_offset: f64,
        volume_id: Option<&NodeId>,
    ) -> i32 {
        let Some(volume_node) = Self::volume_node(scene, volume_id) else {
            return SLICE_INDEX_NO_VOLUME;
        };
        let Some(volume) = volume_node.image_data() else {
            return SLICE_INDEX_NO_VOLUME;
        };
        let Some(slice_node) = self.slice_node(scene) else {
            return SLICE_INDEX_NO_VOLUME;
        };

        let world = scene.transform_to_world(volume_node.transform_node_id.as_ref());
        let ijk_to_ras = world * volume_node.ijk_to_ras;

        let Some(ras_to_slice) = slice_node.slice_to_ras().try_inverse() else {
            return SLICE_INDEX_NO_VOLUME;
        };
        let slice_normal = (slice_node.slice_to_ras() * Vector4::new(0.0, 0.0, 1.0, 0.0))
            .fixed_rows::<3>(0)
            .into_owned();
        let slice_normal = slice_normal.normalize();

        // Find the volume axis parallel to the slice normal, allowing the
        // 180-degree flip (negated spacing).
        let mut aligned_axis = None;
        let mut volume_spacing = 1.0;
        for axis in 0..3 {
            let direction = Vector3::new(
                ijk_to_ras[(0, axis)],
                ijk_to_ras[(1, axis)],
                ijk_to_ras[(2, axis)],
            );
            let spacing = direction.norm();
            if spacing == 0.0 {
                continue;
            }
            let dot = slice_normal.dot(&(direction / spacing)).clamp(-1.0, 1.0);
            let misalignment_degrees = dot.acos().to_degrees();
            if misalignment_degrees.abs() < AXIS_ALIGNMENT_TOLERANCE_DEGREES {
                aligned_axis = Some(axis);
                volume_spacing = spacing;
                break;
            }
            if (misalignment_degrees - 180.0).abs() < AXIS_ALIGNMENT_TOLERANCE_DEGREES {
                aligned_axis = Some(axis);
                volume_spacing = -spacing;
                break;
            }
        }
        let Some(axis) = aligned_axis else {
            return SLICE_INDEX_ROTATED;
        };

        let origin_ras = Vector4::new(
            ijk_to_ras[(0, 3)],
            ijk_to_ras[(1, 3)],
            ijk_to_ras[(2, 3)],
            0.0,
        );
        let origin_slice = ras_to_slice * origin_ras;
        let volume_origin_offset = origin_slice[2];
        let normalized_shift = (slice_offset - volume_origin_offset) / volume_spacing;
        // The slice plane is displayed at the center of the slab, hence the
        // 1-based index.
        let slice_index = normalized_shift.round() as i32 + 1;

        let dims = volume.dim_ijk();
        let slice_count = [dims.0, dims.1, dims.2][axis] as i32;
        if slice_index < 1 || slice_index > slice_count {
            return SLICE_INDEX_OUT_OF_VOLUME;
        }
        slice_index
    }

    /// Same, indexing the first populated layer's volume.
    pub fn slice_index_from_offset_first_volume(&self, scene: &Scene, slice_offset: f64) -> i32 {
        match self.first_non_null_layer_volume_node(scene) {
            Some(volume_id) => self.slice_index_from_offset(scene, slice_offset, Some(&volume_id)),
            None => SLICE_INDEX_NO_VOLUME,
        }
    }

    /// Reconcile the UVW texture extents and dimensions with the current
    /// resolution mode.
    pub fn set_slice_extents_to_slice_node(&mut self, scene: &mut Scene) {
        let Some(slice_id) = self.slice_node_id.clone() else {
            return;
        };
        let bounds = self.slice_bounds(scene);
        let extents = [
            bounds[1] - bounds[0],
            bounds[3] - bounds[2],
            bounds[5] - bounds[4],
        ];

        let Some(slice_node) = self.slice_node(scene) else {
            return;
        };
        let mode = slice_node.resolution_mode;
        let fov = slice_node.field_of_view();
        let uvw_dimensions = slice_node.uvw_dimensions();
        let xy_to_ras = *slice_node.xy_to_ras();
        let active_slice = f64::from(slice_node.active_slice());

        let (new_extents, new_dimensions) = match mode {
            SliceResolutionMode::Match2DView => (fov, uvw_dimensions),
            SliceResolutionMode::MatchVolumes => {
                let spacing = self.lowest_volume_slice_spacing(scene);
                let min_spacing = spacing[0].min(spacing[1]).min(spacing[2]);
                let mut resolution = 200usize;
                if min_spacing > 0.0 {
                    let max_extent = extents[0].max(extents[1]).max(extents[2]);
                    resolution = (max_extent / min_spacing).max(1.0) as usize;
                }
                (extents, [resolution, resolution, 1])
            }
            SliceResolutionMode::FovMatch2DViewSpacingMatchVolumes => {
                let spacing = self.lowest_volume_slice_spacing(scene);
                let min_spacing = spacing[0].min(spacing[1]).min(spacing[2]);
                let mut dimensions = [1usize; 3];
                if min_spacing > 0.0 {
                    for axis in 0..2 {
                        dimensions[axis] = (fov[axis] / min_spacing + 0.5).ceil() as usize;
                    }
                }
                (fov, dimensions)
            }
            SliceResolutionMode::FovMatchVolumesSpacingMatch2DView => {
                let p0 = xy_to_ras * Vector4::new(0.0, 0.0, active_slice, 1.0);
                let p1 = xy_to_ras * Vector4::new(1.0, 0.0, active_slice, 1.0);
                let p2 = xy_to_ras * Vector4::new(0.0, 1.0, active_slice, 1.0);
                let x_spacing = (p1 - p0).fixed_rows::<3>(0).norm();
                let y_spacing = (p2 - p0).fixed_rows::<3>(0).norm();
                let mut dimensions = [1usize; 3];
                if x_spacing > 0.0 && y_spacing > 0.0 {
                    dimensions[0] = (extents[0] / x_spacing + 1.0).max(1.0) as usize;
                    dimensions[1] = (extents[2] / y_spacing + 1.0).max(1.0) as usize;
                }
                (extents, dimensions)
            }
        };

        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_uvw_extents_and_dimensions(new_extents, new_dimensions);
            }
        });
    }

    // ------------------------------------------------------------------
    // Window/level

    /// Set the background volume's window/level, disabling auto. One
    /// modification event covers both changes.
    pub fn set_background_window_level(&mut self, scene: &mut Scene, window: f64, level: f64) {
        let Some(volume_id) = self.layer_volume_node(BACKGROUND_LAYER).cloned() else {
            return;
        };
        scene.modify(&volume_id, |node| {
            if let Some(volume) = node.as_volume_mut() {
                volume.display.auto_window_level = false;
                volume.display.window = window;
                volume.display.level = level;
            }
        });
    }

    /// Background window, level and scalar range, when a background volume
    /// with image data is bound.
    pub fn background_window_level_and_range(
        &self,
        scene: &Scene,
    ) -> Option<(f64, f64, f64, f64)> {
        let volume_node = Self::volume_node(scene, self.layer_volume_node(BACKGROUND_LAYER))?;
        let volume = volume_node.image_data()?;
        let (window, level) = volume_node.window_level();
        let (low, high) = volume.scalar_range();
        Some((window, level, low, high))
    }

    // ------------------------------------------------------------------
    // Interaction

    /// Begin an interactive composite-node gesture; with hot-linked controls
    /// the interacting state broadcasts immediately.
    pub fn start_slice_composite_node_interaction(
        &mut self,
        scene: &mut Scene,
        parameters: CompositeInteractionFlags,
    ) {
        let Some(composite_id) = self.composite_node_id.clone() else {
            return;
        };
        scene.modify_quietly(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.set_interaction_flags(parameters);
                if composite.hot_linked_control && composite.linked_control {
                    composite.set_interacting(true);
                }
            }
        });
    }

    /// Finish the gesture; linked controls broadcast one final modification
    /// while the interacting state is raised.
    pub fn end_slice_composite_node_interaction(&mut self, scene: &mut Scene) {
        let Some(composite_id) = self.composite_node_id.clone() else {
            return;
        };
        let linked = self
            .composite_node(scene)
            .map(|composite| composite.linked_control)
            .unwrap_or(false);
        if !linked {
            return;
        }
        scene.modify_quietly(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.set_interacting(true);
            }
        });
        scene.modify(&composite_id, |_| {});
        scene.modify_quietly(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.set_interacting(false);
                composite.set_interaction_flags(CompositeInteractionFlags::empty());
            }
        });
    }

    pub fn start_slice_node_interaction(
        &mut self,
        scene: &mut Scene,
        parameters: SliceInteractionFlags,
    ) {
        let (Some(slice_id), Some(_)) = (self.slice_node_id.clone(), &self.composite_node_id)
        else {
            return;
        };
        let (hot, linked) = self
            .composite_node(scene)
            .map(|composite| (composite.hot_linked_control, composite.linked_control))
            .unwrap_or((false, false));
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.interaction_flags = parameters;
                if (hot || parameters == SliceInteractionFlags::MULTIPLANAR_REFORMAT) && linked {
                    slice.interacting = true;
                }
            }
        });
    }

    pub fn end_slice_node_interaction(&mut self, scene: &mut Scene) {
        let (Some(slice_id), Some(_)) = (self.slice_node_id.clone(), &self.composite_node_id)
        else {
            return;
        };
        let linked = self
            .composite_node(scene)
            .map(|composite| composite.linked_control)
            .unwrap_or(false);
        if !linked {
            return;
        }
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.interacting = true;
            }
        });
        scene.modify(&slice_id, |_| {});
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.interacting = false;
                slice.interaction_flags = SliceInteractionFlags::empty();
            }
        });
    }

    pub fn start_slice_offset_interaction(&mut self, scene: &mut Scene) {
        self.start_slice_node_interaction(scene, SliceInteractionFlags::SLICE_TO_RAS);
    }

    pub fn end_slice_offset_interaction(&mut self, scene: &mut Scene) {
        self.end_slice_node_interaction(scene);
    }

    // ------------------------------------------------------------------
    // Event handling

    fn on_node_modified(&mut self, scene: &mut Scene, id: &NodeId) {
        if self.slice_node_id.as_ref() == Some(id) {
            self.set_slice_extents_to_slice_node(scene);
            let visible = self
                .slice_node(scene)
                .map(|slice| slice.slice_visible)
                .unwrap_or(false);
            if let Some(display_id) = self.model_display_node_id.clone() {
                scene.modify_quietly(&display_id, |node| {
                    if let Some(display) = node.as_model_display_mut() {
                        display.visibility = visible;
                    }
                });
            }
            self.process_logics_events(scene);
        } else if self.composite_node_id.as_ref() == Some(id) {
            self.update_pipeline(scene);
        } else if self
            .layers
            .iter()
            .flatten()
            .any(|layer| layer.volume_node_id() == Some(id))
        {
            // A bound volume changed under a layer; its reformatted images
            // are stale.
            self.set_slice_extents_to_slice_node(scene);
            self.update_pipeline(scene);
        }
    }

    fn on_start_close(&mut self, scene: &mut Scene) {
        self.update_slice_node_from_layout(scene);
        self.delete_slice_model(scene);
    }
}

impl SceneObserver for SliceLogic {
    fn wants(&self, event: &SceneEvent) -> bool {
        matches!(
            event.kind,
            SceneEventKind::NodeAdded { .. }
                | SceneEventKind::NodeRemoved { .. }
                | SceneEventKind::NodeModified(_)
                | SceneEventKind::EndBatchProcess
                | SceneEventKind::StartClose
                | SceneEventKind::EndImport
                | SceneEventKind::EndRestore
        )
    }

    fn on_scene_event(&mut self, scene: &mut Scene, event: &SceneEvent) {
        match &event.kind {
            SceneEventKind::NodeAdded { class, .. } | SceneEventKind::NodeRemoved { class, .. } => {
                // Only the node kinds this pipeline is built from warrant a
                // recomputation pass.
                if !matches!(*class, "Volume" | "Slice" | "SliceComposite") {
                    return;
                }
                if event.in_batch {
                    return;
                }
                self.update_slice_nodes(scene);
            }
            SceneEventKind::NodeModified(id) => {
                if event.in_batch || scene.is_batch_processing() {
                    return;
                }
                let id = id.clone();
                self.on_node_modified(scene, &id);
            }
            SceneEventKind::EndBatchProcess
            | SceneEventKind::EndImport
            | SceneEventKind::EndRestore => {
                self.update_slice_nodes(scene);
            }
            SceneEventKind::StartClose => self.on_start_close(scene),
            SceneEventKind::StartBatchProcess => {}
        }
    }
}

fn layout_orientation(layout_name: &str) -> Option<Orientation> {
    match layout_name {
        "Red" => Some(Orientation::Axial),
        "Yellow" => Some(Orientation::Sagittal),
        "Green" => Some(Orientation::Coronal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBroker;
    use crate::nodes::FOREGROUND_LAYER;
    use crate::volume::Volume;
    use nalgebra::Matrix4;
    use ndarray::Array3;

    fn scalar_volume(extent: usize) -> VolumeNode {
        let mut data = Array3::<u16>::zeros((extent, extent, extent));
        for k in 0..extent {
            for j in 0..extent {
                for i in 0..extent {
                    data[[k, j, i]] = (100 * k + 10 * j + i) as u16;
                }
            }
        }
        VolumeNode::with_volume("vol", Volume::new(data, (1.0, 1.0, 1.0)))
    }

    fn attached_logic(scene: &mut Scene) -> SliceLogic {
        let mut logic = SliceLogic::new("Red");
        logic.set_scene(scene);
        logic
    }

    fn drain(scene: &mut Scene) {
        while scene.take_event().is_some() {}
    }

    fn bind_layer(scene: &mut Scene, logic: &SliceLogic, layer_index: usize, id: Option<&NodeId>) {
        let composite_id = logic.composite_node_id().unwrap().clone();
        scene.modify_quietly(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.set_layer_volume_id(layer_index, id.cloned());
            }
        });
    }

    #[test]
    fn unnamed_logic_refuses_scene_attachment() {
        let mut scene = Scene::new();
        let mut logic = SliceLogic::new("");
        logic.set_scene(&mut scene);
        assert!(!logic.scene_attached());
        assert!(scene.node_ids().is_empty());
    }

    #[test]
    fn attaching_creates_paired_singleton_nodes_and_the_model() {
        let mut scene = Scene::new();
        let logic = attached_logic(&mut scene);

        let slice = scene.node(logic.slice_node_id().unwrap()).unwrap();
        assert_eq!(slice.base().singleton_tag.as_deref(), Some("Red"));
        assert_eq!(
            slice.as_slice().unwrap().orientation(),
            Some(Orientation::Axial)
        );
        let composite = scene.node(logic.composite_node_id().unwrap()).unwrap();
        assert_eq!(composite.base().singleton_tag.as_deref(), Some("Red"));

        let model = scene.node(logic.model_node_id().unwrap()).unwrap();
        assert!(SliceLogic::is_slice_model_node(model));
        assert!(model.base().hide_from_editors);
        assert!(!model.base().selectable);
        assert!(!model.base().save_with_scene);
        let display_id = model.as_model().unwrap().display_node_id.clone().unwrap();
        assert!(scene.contains(&display_id));
    }

    #[test]
    fn existing_singleton_nodes_are_adopted_not_duplicated() {
        let mut scene = Scene::new();
        let mut slice = SliceNode::new("Red");
        slice.set_layout_name("Red");
        let slice_id = scene.add_node(Node::Slice(slice));
        let composite_id = scene.add_node(Node::SliceComposite(SliceCompositeNode::new("Red")));

        let logic = attached_logic(&mut scene);
        assert_eq!(logic.slice_node_id(), Some(&slice_id));
        assert_eq!(logic.composite_node_id(), Some(&composite_id));
        assert_eq!(scene.count_by_class("Slice"), 1);
        assert_eq!(scene.count_by_class("SliceComposite"), 1);
    }

    #[test]
    fn prescribed_spacing_is_returned_verbatim() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let mut volume = scalar_volume(8);
        // Geometry the prescribed mode must ignore.
        volume.ijk_to_ras[(0, 0)] = 3.5;
        let volume_id = scene.add_node(Node::Volume(volume));

        let slice_id = logic.slice_node_id().unwrap().clone();
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.spacing_mode = SliceSpacingMode::Prescribed;
                slice.prescribed_spacing = [2.0, 3.0, 4.0];
            }
        });

        assert_eq!(
            logic.volume_slice_spacing(&scene, Some(&volume_id)),
            [2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn automatic_spacing_follows_volume_geometry() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let mut volume = scalar_volume(8);
        volume.ijk_to_ras[(0, 0)] = 0.5;
        volume.ijk_to_ras[(1, 1)] = 0.5;
        volume.ijk_to_ras[(2, 2)] = 2.0;
        let volume_id = scene.add_node(Node::Volume(volume));

        assert_eq!(
            logic.volume_slice_spacing(&scene, Some(&volume_id)),
            [0.5, 0.5, 2.0]
        );
    }

    #[test]
    fn spacing_falls_back_to_cached_default() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        assert_eq!(logic.volume_slice_spacing(&scene, None), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn slice_bounds_default_to_plus_minus_100() {
        let mut scene = Scene::new();
        let logic = attached_logic(&mut scene);
        assert_eq!(
            logic.slice_bounds(&scene),
            [-100.0, 100.0, -100.0, 100.0, -100.0, 100.0]
        );
    }

    #[test]
    fn slice_index_covers_the_volume_extent() {
        let mut scene = Scene::new();
        let logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(8)));

        assert_eq!(logic.slice_index_from_offset(&scene, 0.0, Some(&volume_id)), 1);
        assert_eq!(logic.slice_index_from_offset(&scene, 3.0, Some(&volume_id)), 4);
        assert_eq!(logic.slice_index_from_offset(&scene, 7.0, Some(&volume_id)), 8);
        assert_eq!(
            logic.slice_index_from_offset(&scene, 9.0, Some(&volume_id)),
            SLICE_INDEX_OUT_OF_VOLUME
        );
        assert_eq!(
            logic.slice_index_from_offset(&scene, -1.0, Some(&volume_id)),
            SLICE_INDEX_OUT_OF_VOLUME
        );
    }

    #[test]
    fn slice_index_handles_flipped_volume_axes() {
        let mut scene = Scene::new();
        let logic = attached_logic(&mut scene);
        let mut volume = scalar_volume(8);
        volume.ijk_to_ras[(2, 2)] = -1.0;
        let volume_id = scene.add_node(Node::Volume(volume));

        assert_eq!(
            logic.slice_index_from_offset(&scene, -3.0, Some(&volume_id)),
            4
        );
    }

    #[test]
    fn rotated_slice_reports_sentinel() {
        let mut scene = Scene::new();
        let logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(8)));

        let slice_id = logic.slice_node_id().unwrap().clone();
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_slice_to_ras(Matrix4::new_rotation(
                    Vector3::x() * std::f64::consts::FRAC_PI_4,
                ));
            }
        });

        assert_eq!(
            logic.slice_index_from_offset(&scene, 0.0, Some(&volume_id)),
            SLICE_INDEX_ROTATED
        );
    }

    #[test]
    fn missing_volume_reports_sentinel() {
        let mut scene = Scene::new();
        let logic = attached_logic(&mut scene);
        assert_eq!(
            logic.slice_index_from_offset(&scene, 0.0, None),
            SLICE_INDEX_NO_VOLUME
        );

        let empty_id = scene.add_node(Node::Volume(VolumeNode::new("empty")));
        assert_eq!(
            logic.slice_index_from_offset(&scene, 0.0, Some(&empty_id)),
            SLICE_INDEX_NO_VOLUME
        );
    }

    #[test]
    fn pipeline_skips_layers_without_images() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let background_id = scene.add_node(Node::Volume(scalar_volume(4)));
        let empty_id = scene.add_node(Node::Volume(VolumeNode::new("empty")));
        let label_id = scene.add_node(Node::Volume(scalar_volume(4)));

        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&background_id));
        bind_layer(&mut scene, &logic, FOREGROUND_LAYER, Some(&empty_id));
        bind_layer(&mut scene, &logic, LABEL_LAYER, Some(&label_id));
        logic.update_pipeline(&mut scene);

        assert_eq!(logic.pipeline_len(), 2);
        assert!(logic.image_data().is_some());
    }

    #[test]
    fn label_stage_always_alpha_blends() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let background_id = scene.add_node(Node::Volume(scalar_volume(4)));
        let label_id = scene.add_node(Node::Volume(scalar_volume(4)));

        let composite_id = logic.composite_node_id().unwrap().clone();
        scene.modify_quietly(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.compositing = CompositingMode::Add;
            }
        });
        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&background_id));
        bind_layer(&mut scene, &logic, LABEL_LAYER, Some(&label_id));
        logic.update_pipeline(&mut scene);

        assert_eq!(logic.pipeline_len(), 2);
        assert_eq!(
            logic.pipeline_item(1).unwrap().compositing_mode(),
            CompositingMode::Alpha
        );
    }

    #[test]
    fn foreground_stage_respects_configured_mode() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let background_id = scene.add_node(Node::Volume(scalar_volume(4)));
        let foreground_id = scene.add_node(Node::Volume(scalar_volume(4)));

        let composite_id = logic.composite_node_id().unwrap().clone();
        scene.modify_quietly(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.compositing = CompositingMode::Add;
            }
        });
        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&background_id));
        bind_layer(&mut scene, &logic, FOREGROUND_LAYER, Some(&foreground_id));
        logic.update_pipeline(&mut scene);

        assert_eq!(
            logic.pipeline_item(1).unwrap().compositing_mode(),
            CompositingMode::Add
        );
    }

    #[test]
    fn unbinding_layers_truncates_the_pipeline() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let background_id = scene.add_node(Node::Volume(scalar_volume(4)));
        let foreground_id = scene.add_node(Node::Volume(scalar_volume(4)));
        let label_id = scene.add_node(Node::Volume(scalar_volume(4)));

        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&background_id));
        bind_layer(&mut scene, &logic, FOREGROUND_LAYER, Some(&foreground_id));
        bind_layer(&mut scene, &logic, LABEL_LAYER, Some(&label_id));
        logic.update_pipeline(&mut scene);
        assert_eq!(logic.pipeline_len(), 3);

        bind_layer(&mut scene, &logic, FOREGROUND_LAYER, None);
        bind_layer(&mut scene, &logic, LABEL_LAYER, None);
        logic.update_pipeline(&mut scene);
        assert_eq!(logic.pipeline_len(), 1);
    }

    #[test]
    fn fit_picks_pixel_size_from_the_smaller_window_axis() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(10)));

        // Taller than wide: the width axis sets the pixel size.
        logic.fit_slice_to_volume(&mut scene, Some(&volume_id), 100, 200);
        let slice = scene
            .node(logic.slice_node_id().unwrap())
            .unwrap()
            .as_slice()
            .unwrap();
        let fov = slice.field_of_view();
        assert!((fov[0] - 9.0).abs() < 1e-9);
        assert!((fov[1] - 18.0).abs() < 1e-9);
        assert_eq!(slice.slice_to_ras()[(0, 3)], 4.5);
        assert_eq!(slice.slice_to_ras()[(1, 3)], 4.5);
        assert_eq!(slice.slice_to_ras()[(2, 3)], 4.5);

        // Wider than tall: the height axis sets it.
        logic.fit_slice_to_volume(&mut scene, Some(&volume_id), 200, 100);
        let fov = scene
            .node(logic.slice_node_id().unwrap())
            .unwrap()
            .as_slice()
            .unwrap()
            .field_of_view();
        assert!((fov[0] - 18.0).abs() < 1e-9);
        assert!((fov[1] - 9.0).abs() < 1e-9);
    }

    #[test]
    fn batch_mutations_coalesce_into_one_pass() {
        let mut scene = Scene::new();
        let mut broker = EventBroker::new();
        let mut logic = SliceLogic::new("Red");
        logic.set_scene(&mut scene);
        broker.pump(&mut scene, &mut [&mut logic]);
        let passes = logic.recompute_pass_count();

        scene.begin_batch();
        scene.add_node(Node::Volume(scalar_volume(4)));
        scene.add_node(Node::Volume(scalar_volume(4)));
        scene.add_node(Node::Volume(scalar_volume(4)));
        broker.pump(&mut scene, &mut [&mut logic]);
        assert_eq!(logic.recompute_pass_count(), passes);

        scene.end_batch();
        broker.pump(&mut scene, &mut [&mut logic]);
        assert_eq!(logic.recompute_pass_count(), passes + 1);
    }

    #[test]
    fn start_close_resets_orientation_and_removes_the_proxy() {
        let mut scene = Scene::new();
        let mut broker = EventBroker::new();
        let mut logic = attached_logic(&mut scene);
        drain(&mut scene);

        let slice_id = logic.slice_node_id().unwrap().clone();
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_orientation(Orientation::Sagittal);
            }
        });
        let model_id = logic.model_node_id().unwrap().clone();

        scene.notify_start_close();
        broker.pump(&mut scene, &mut [&mut logic]);

        assert!(!scene.contains(&model_id));
        assert!(logic.model_node_id().is_none());
        let slice = scene.node(&slice_id).unwrap().as_slice().unwrap();
        assert_eq!(slice.orientation(), Some(Orientation::Axial));
    }

    #[test]
    fn model_plane_spans_the_field_of_view() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let slice_id = logic.slice_node_id().unwrap().clone();
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.set_dimensions(256, 128, 1);
                slice.set_field_of_view(200.0, 100.0, 1.0);
            }
        });

        logic.process_logics_events(&mut scene);

        let model = scene
            .node(logic.model_node_id().unwrap())
            .unwrap()
            .as_model()
            .unwrap();
        let plane = model.polydata.as_ref().unwrap();
        let width = (plane.points[1] - plane.points[0]).norm();
        let height = (plane.points[2] - plane.points[0]).norm();
        assert!((width - 200.0).abs() < 1e-9);
        assert!((height - 100.0).abs() < 1e-9);
    }

    #[test]
    fn label_image_disables_texture_interpolation() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let background_id = scene.add_node(Node::Volume(scalar_volume(4)));
        let label_id = scene.add_node(Node::Volume(scalar_volume(4)));

        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&background_id));
        logic.update_pipeline(&mut scene);
        let display_id = logic.model_display_node_id().unwrap().clone();
        let interpolate = |scene: &Scene| {
            scene
                .node(&display_id)
                .unwrap()
                .as_model_display()
                .unwrap()
                .interpolate_texture
        };
        assert!(interpolate(&scene));

        bind_layer(&mut scene, &logic, LABEL_LAYER, Some(&label_id));
        logic.update_pipeline(&mut scene);
        assert!(!interpolate(&scene));

        bind_layer(&mut scene, &logic, LABEL_LAYER, None);
        logic.update_pipeline(&mut scene);
        assert!(interpolate(&scene));
    }

    #[test]
    fn background_volume_composites_into_the_display_image() {
        let mut scene = Scene::new();
        let mut broker = EventBroker::new();
        let mut logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(8)));

        let composite_id = logic.composite_node_id().unwrap().clone();
        scene.modify(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.set_background_volume_id(Some(volume_id.clone()));
            }
        });
        broker.pump(&mut scene, &mut [&mut logic]);

        let image = logic.image_data().unwrap();
        // The view center sits on the volume's corner voxel.
        assert_eq!(image.get_pixel(128, 128)[1], 255);
        // In match-2D-view mode the model texture is the display image.
        assert!(Arc::ptr_eq(logic.model_texture().unwrap(), image));
        assert_eq!(logic.pipeline_uvw_len(), 0);
    }

    #[test]
    fn uvw_pipeline_runs_when_resolution_mode_departs_from_the_view() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(8)));

        let slice_id = logic.slice_node_id().unwrap().clone();
        scene.modify_quietly(&slice_id, |node| {
            if let Some(slice) = node.as_slice_mut() {
                slice.resolution_mode = SliceResolutionMode::MatchVolumes;
            }
        });
        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&volume_id));
        logic.update_pipeline(&mut scene);

        assert_eq!(logic.pipeline_uvw_len(), 1);
        let texture = logic.model_texture().unwrap();
        let image = logic.image_data().unwrap();
        assert!(!Arc::ptr_eq(texture, image));
        // UVW dimensions follow the volume extent over its lowest spacing.
        let slice = scene.node(&slice_id).unwrap().as_slice().unwrap();
        assert_eq!(slice.uvw_dimensions(), [7, 7, 1]);
        assert_eq!(texture.dimensions(), (7, 7));
    }

    #[test]
    fn modifying_a_bound_volume_refreshes_the_layers() {
        let mut scene = Scene::new();
        let mut broker = EventBroker::new();
        let mut logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(8)));

        let composite_id = logic.composite_node_id().unwrap().clone();
        scene.modify(&composite_id, |node| {
            if let Some(composite) = node.as_composite_mut() {
                composite.set_background_volume_id(Some(volume_id.clone()));
            }
        });
        broker.pump(&mut scene, &mut [&mut logic]);
        let before = Arc::clone(logic.image_data().unwrap());

        scene.modify(&volume_id, |node| {
            if let Some(volume) = node.as_volume_mut() {
                volume.display.auto_window_level = false;
                volume.display.window = 50.0;
                volume.display.level = 25.0;
            }
        });
        broker.pump(&mut scene, &mut [&mut logic]);

        assert!(!Arc::ptr_eq(logic.image_data().unwrap(), &before));
    }

    #[test]
    fn snap_offset_centers_on_the_nearest_slice_step() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        let volume_id = scene.add_node(Node::Volume(scalar_volume(8)));
        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&volume_id));
        logic.update_pipeline(&mut scene);

        logic.set_slice_offset(&mut scene, 3.3);
        logic.snap_slice_offset_to_ijk(&mut scene);
        assert!((logic.slice_offset(&scene) - 3.5).abs() < 1e-9);
    }

    #[test]
    fn first_non_null_layer_is_found_in_index_order() {
        let mut scene = Scene::new();
        let mut logic = attached_logic(&mut scene);
        assert!(logic.first_non_null_layer_volume_node(&scene).is_none());

        let foreground_id = scene.add_node(Node::Volume(scalar_volume(4)));
        bind_layer(&mut scene, &logic, FOREGROUND_LAYER, Some(&foreground_id));
        logic.update_pipeline(&mut scene);
        assert_eq!(
            logic.first_non_null_layer_volume_node(&scene),
            Some(foreground_id.clone())
        );

        let background_id = scene.add_node(Node::Volume(scalar_volume(4)));
        bind_layer(&mut scene, &logic, BACKGROUND_LAYER, Some(&background_id));
        logic.update_pipeline(&mut scene);
        assert_eq!(
            logic.first_non_null_layer_volume_node(&scene),
            Some(background_id)
        );
    }
}
