//! # volume-slice
//!
//! A reactive scene and slice-compositing engine for medical image volumes.
//!
//! The crate models a small scene graph of typed nodes (volumes, linear
//! transforms, slice views, compositing configuration, renderable proxies)
//! owned by a [`scene::Scene`] arena and journaled as typed events. A
//! [`logic::SliceLogic`] drives one named slice view ("Red", "Green",
//! "Yellow"): it resolves the view's layer volumes from the scene, reformats
//! each through the slice plane, folds the layers through a compositing
//! pipeline into a single display image, and keeps a textured 3D slice-plane
//! proxy in sync. Everything runs synchronously on the calling thread; the
//! [`events::EventBroker`] serializes scene callbacks, and bulk mutations
//! made inside a scene batch coalesce into one recomputation at end of
//! batch.
//!
//! Volumes can be loaded from DICOM series (one file per slice, same series
//! and acquisition, no multiframe); files are decoded in parallel via rayon
//! and placed in RAS space from the series geometry tags.
//!
//! # Examples
//!
//! ## Compositing a DICOM series into a slice view
//!
//! Load all DICOM files from the dicom/ directory into a volume node, show
//! it as the background of the "Red" (axial) view, and save the composited
//! slice image.
//!
//! ```no_run
//! # use std::path::PathBuf;
//! use volume_slice::enums::SortBy;
//! use volume_slice::events::EventBroker;
//! use volume_slice::logic::SliceLogic;
//! use volume_slice::nodes::Node;
//! use volume_slice::scene::Scene;
//! use volume_slice::volume_loader::VolumeLoader;
//!
//! let volume = VolumeLoader::load_node_from_directory(
//!     "CT",
//!     &PathBuf::from("dicom"),
//!     SortBy::ImagePositionPatient,
//! )
//! .expect("should have loaded files from directory");
//!
//! let mut scene = Scene::new();
//! let mut broker = EventBroker::new();
//! let volume_id = scene.add_node(Node::Volume(volume));
//!
//! let mut logic = SliceLogic::new("Red");
//! logic.set_scene(&mut scene);
//! let composite_id = logic.composite_node_id().unwrap().clone();
//! scene.modify(&composite_id, |node| {
//!     if let Some(composite) = node.as_composite_mut() {
//!         composite.set_background_volume_id(Some(volume_id.clone()));
//!     }
//! });
//! broker.pump(&mut scene, &mut [&mut logic]);
//!
//! logic.fit_slice_to_background(&mut scene, 512, 512);
//! broker.pump(&mut scene, &mut [&mut logic]);
//!
//! let image = logic.image_data().expect("should have composited the background");
//! image.save("result.png").expect("should have saved the slice image");
//! ```

pub mod enums;
pub mod events;
mod interpolator;
pub mod logic;
pub mod nodes;
pub mod scene;
pub mod volume;
pub mod volume_loader;
