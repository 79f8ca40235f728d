use std::path::PathBuf;

use tracing::info;
use volume_slice::enums::SortBy;
use volume_slice::events::EventBroker;
use volume_slice::logic::SliceLogic;
use volume_slice::nodes::Node;
use volume_slice::scene::Scene;
use volume_slice::volume_loader::VolumeLoader;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let volume = VolumeLoader::load_node_from_directory(
        "CT",
        &PathBuf::from("dicom"),
        SortBy::ImagePositionPatient,
    )
    .expect("should have loaded files from directory");

    let mut scene = Scene::new();
    let mut broker = EventBroker::new();
    let volume_id = scene.add_node(Node::Volume(volume));

    let mut logic = SliceLogic::new("Red");
    logic.set_scene(&mut scene);
    let composite_id = logic
        .composite_node_id()
        .expect("attaching the scene should have resolved a composite node")
        .clone();
    scene.modify(&composite_id, |node| {
        if let Some(composite) = node.as_composite_mut() {
            composite.set_background_volume_id(Some(volume_id.clone()));
        }
    });
    broker.pump(&mut scene, &mut [&mut logic]);

    logic.fit_slice_to_background(&mut scene, 512, 512);
    broker.pump(&mut scene, &mut [&mut logic]);

    let image = logic
        .image_data()
        .expect("should have composited the background layer");
    image
        .save("result.png")
        .expect("should have saved the slice image");
    info!(
        offset = logic.slice_offset(&scene),
        "saved composited slice to result.png"
    );
}
