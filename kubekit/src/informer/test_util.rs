//! Shared fixtures for the informer tests: scripted watch streams and
//! recording handlers.
#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::time::Duration;

use futures::{stream, StreamExt};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::core::GroupVersionKind;
use kube::runtime::watcher::Event;
use kube::ResourceExt;

use super::base::{RawEventHandler, WatchStream};

pub(crate) struct PodResource;

impl PodResource {
    pub(crate) fn api_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Pod"))
    }
}

/// A pod-shaped raw record in namespace `ns-1`.
pub(crate) fn test_pod(postfix: usize) -> DynamicObject {
    DynamicObject::new(&format!("test-pod-{postfix}"), &PodResource::api_resource())
        .within("ns-1")
        .data(serde_json::json!({
            "spec": {
                "containers": [{"name": "pause", "image": "registry.k8s.io/pause:3.9"}],
            },
        }))
}

/// A finite event script followed by a watch that never yields again.
pub(crate) fn scripted(events: Vec<Event<DynamicObject>>) -> WatchStream {
    stream::iter(events.into_iter().map(Ok))
        .chain(stream::pending())
        .boxed()
}

/// Poll `predicate` until it holds, or fail the test after two seconds.
pub(crate) async fn wait_for(predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Records raw event names in arrival order.
#[derive(Default)]
pub(crate) struct RawRecorder {
    adds: Mutex<Vec<String>>,
    updates: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
}

impl RawRecorder {
    pub(crate) fn adds(&self) -> Vec<String> {
        self.adds.lock().unwrap().clone()
    }

    pub(crate) fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

impl RawEventHandler for RawRecorder {
    fn on_add(&self, obj: &DynamicObject) {
        self.adds.lock().unwrap().push(obj.name_any());
    }

    fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
        self.updates
            .lock()
            .unwrap()
            .push((old.name_any(), new.name_any()));
    }

    fn on_delete(&self, obj: &DynamicObject) {
        self.deletes.lock().unwrap().push(obj.name_any());
    }
}
