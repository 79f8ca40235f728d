//! Typed scene events and their single-threaded dispatch.
//!
//! The scene journals every mutation as a [`SceneEvent`]; the
//! [`EventBroker`] drains that journal and hands each event, in order, to
//! the registered observers. All dispatch happens synchronously on the
//! calling thread, which is the serialization guarantee the rest of the
//! engine relies on instead of locks.

use crate::nodes::NodeId;
use crate::scene::Scene;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SceneEventKind {
    NodeAdded { id: NodeId, class: &'static str },
    NodeRemoved { id: NodeId, class: &'static str },
    NodeModified(NodeId),
    StartBatchProcess,
    EndBatchProcess,
    StartClose,
    EndImport,
    EndRestore,
}

/// One journaled scene mutation. `in_batch` records whether the scene was
/// batch processing when the event was emitted, so observers can coalesce
/// bulk loads into the single end-of-batch pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneEvent {
    pub kind: SceneEventKind,
    pub in_batch: bool,
}

/// A component reacting to scene mutations.
pub trait SceneObserver {
    /// Event filter; the broker only delivers events this returns true for.
    fn wants(&self, event: &SceneEvent) -> bool {
        let _ = event;
        true
    }

    fn on_scene_event(&mut self, scene: &mut Scene, event: &SceneEvent);
}

/// Drains the scene's event journal into observers, serializing all
/// callbacks on the calling thread.
#[derive(Debug, Default)]
pub struct EventBroker;

impl EventBroker {
    pub fn new() -> Self {
        Self
    }

    /// Deliver all pending events in emission order. Events emitted by
    /// observer callbacks are processed in the same pass, so a pump returns
    /// with an empty journal.
    pub fn pump(&mut self, scene: &mut Scene, observers: &mut [&mut dyn SceneObserver]) -> usize {
        let mut delivered = 0;
        while let Some(event) = scene.take_event() {
            for observer in observers.iter_mut() {
                if observer.wants(&event) {
                    observer.on_scene_event(scene, &event);
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Close the scene: announce the close so observers can tear down
    /// scene-owned state while their references are still valid, then remove
    /// every node inside one batch.
    pub fn close_scene(&mut self, scene: &mut Scene, observers: &mut [&mut dyn SceneObserver]) {
        self.pump(scene, observers);
        scene.notify_start_close();
        self.pump(scene, observers);

        scene.begin_batch();
        for id in scene.node_ids() {
            scene.remove_node(&id);
        }
        scene.end_batch();
        self.pump(scene, observers);
    }
}
