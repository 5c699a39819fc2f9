//! The raw watch cache and event fan-out for a single resource kind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{Lookup, ObjectRef, Store};
use kube::runtime::watcher;
use kube::ResourceExt;
use kube::core::Selector;
use kube::core::SelectorExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Handler for raw cache events of one resource kind.
///
/// Handlers are invoked serially from the watch task, in the order the server
/// applied the changes; a handler is never re-entered while an earlier call
/// for the same kind is still running.
pub trait RawEventHandler: Send + Sync {
    fn on_add(&self, obj: &DynamicObject);
    fn on_update(&self, old: &DynamicObject, new: &DynamicObject);
    fn on_delete(&self, obj: &DynamicObject);
}

pub(crate) type WatchStream = BoxStream<'static, watcher::Result<watcher::Event<DynamicObject>>>;

type HandlerList = Arc<RwLock<Vec<Arc<dyn RawEventHandler>>>>;

/// The shared local cache plus event fan-out for one resource kind.
///
/// Owned by the [`InformerFactory`](crate::InformerFactory); all typed
/// informers over the same kind share a single `BaseWatcher`.
pub struct BaseWatcher {
    resource: ApiResource,
    store: Store<DynamicObject>,
    handlers: HandlerList,
    pump: Mutex<Option<Pump>>,
}

/// State handed to the watch task on spawn.
struct Pump {
    writer: Writer<DynamicObject>,
    stream: WatchStream,
    resync: Option<Duration>,
}

impl BaseWatcher {
    pub(crate) fn new(
        resource: ApiResource,
        stream: WatchStream,
        resync: Option<Duration>,
    ) -> Self {
        let writer = Writer::new(resource.clone());
        let store = writer.as_reader();
        Self {
            resource,
            store,
            handlers: Arc::new(RwLock::new(Vec::new())),
            pump: Mutex::new(Some(Pump {
                writer,
                stream,
                resync,
            })),
        }
    }

    /// The resource kind this watcher caches.
    #[must_use]
    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    /// Attach a handler. Handlers added before the initial list observe every
    /// listed record as an add; earlier events are not replayed.
    pub fn add_event_handler(&self, handler: Arc<dyn RawEventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Snapshot of the cached records matching `selector`, optionally
    /// restricted to one namespace.
    #[must_use]
    pub fn list(&self, selector: &Selector, namespace: Option<&str>) -> Vec<DynamicObject> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| namespace.map_or(true, |ns| ResourceExt::namespace(obj.as_ref()).as_deref() == Some(ns)))
            .filter(|obj| selector.matches(obj.labels()))
            .map(|obj| (*obj).clone())
            .collect()
    }

    /// Point lookup of a single cached record.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the cache has no such object.
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        let mut key = ObjectRef::new_with(name, self.resource.clone());
        key.namespace = namespace.map(ToOwned::to_owned);
        self.store
            .get(&key)
            .map(|obj| (*obj).clone())
            .ok_or_else(|| Error::NotFound {
                namespace: namespace.map(ToOwned::to_owned),
                name: name.to_owned(),
            })
    }

    /// Resolves once the initial list has populated the cache.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] if the watch task ended before syncing.
    pub async fn wait_until_synced(&self) -> Result<()> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|_| Error::Terminated)
    }

    /// Start the watch task. Later calls are no-ops.
    pub(crate) fn spawn(&self, token: CancellationToken) {
        let Some(pump) = self.pump.lock().take() else {
            return;
        };
        let resource = self.resource.clone();
        let store = self.store.clone();
        let handlers = Arc::clone(&self.handlers);
        tokio::spawn(run_pump(resource, pump, store, handlers, token));
    }
}

/// Drives the watch stream, applying every event to the cache before fanning
/// it out. Update events carry the previous cached value; re-lists are diffed
/// against the cache so handlers see adds, updates and deletes rather than a
/// wholesale replacement.
async fn run_pump(
    resource: ApiResource,
    pump: Pump,
    store: Store<DynamicObject>,
    handlers: HandlerList,
    token: CancellationToken,
) {
    let Pump {
        mut writer,
        mut stream,
        resync,
    } = pump;
    // Keys seen during an in-flight re-list; None outside one.
    let mut relisted: Option<HashSet<ObjectRef<DynamicObject>>> = None;
    let resync_period = resync.unwrap_or(Duration::from_secs(3600));
    let mut resync_tick = tokio::time::interval_at(
        tokio::time::Instant::now() + resync_period,
        resync_period,
    );

    loop {
        tokio::select! {
            () = token.cancelled() => {
                tracing::debug!(kind = %resource.kind, "watch task stopping");
                return;
            }
            _ = resync_tick.tick(), if resync.is_some() => {
                let handlers = handlers.read();
                for obj in store.state() {
                    for handler in handlers.iter() {
                        handler.on_update(&obj, &obj);
                    }
                }
            }
            event = stream.next() => match event {
                None => {
                    tracing::debug!(kind = %resource.kind, "watch stream ended");
                    return;
                }
                Some(Err(err)) => {
                    // The stream restarts the list+watch itself, with backoff.
                    tracing::warn!(kind = %resource.kind, error = %err, "watch stream error; retrying");
                }
                Some(Ok(event)) => {
                    apply_event(&resource, &mut writer, &store, &handlers, &mut relisted, event);
                }
            }
        }
    }
}

fn apply_event(
    resource: &ApiResource,
    writer: &mut Writer<DynamicObject>,
    store: &Store<DynamicObject>,
    handlers: &HandlerList,
    relisted: &mut Option<HashSet<ObjectRef<DynamicObject>>>,
    event: watcher::Event<DynamicObject>,
) {
    match &event {
        watcher::Event::Init => {
            *relisted = Some(HashSet::new());
            writer.apply_watcher_event(&event);
        }
        watcher::Event::InitApply(obj) => {
            let key = obj.to_object_ref(resource.clone());
            // The writer buffers listed objects until InitDone, so the store
            // still answers with the pre-list state here.
            let old = store.get(&key);
            if let Some(seen) = relisted.as_mut() {
                seen.insert(key);
            }
            writer.apply_watcher_event(&event);
            let handlers = handlers.read();
            match old {
                Some(old) => {
                    for handler in handlers.iter() {
                        handler.on_update(&old, obj);
                    }
                }
                None => {
                    for handler in handlers.iter() {
                        handler.on_add(obj);
                    }
                }
            }
        }
        watcher::Event::InitDone => {
            // Objects that were cached but absent from the fresh list were
            // deleted while the watch was disconnected.
            let seen = relisted.take().unwrap_or_default();
            let vanished: Vec<_> = store
                .state()
                .into_iter()
                .filter(|obj| !seen.contains(&obj.to_object_ref(resource.clone())))
                .collect();
            writer.apply_watcher_event(&event);
            let handlers = handlers.read();
            for obj in vanished {
                for handler in handlers.iter() {
                    handler.on_delete(&obj);
                }
            }
        }
        watcher::Event::Apply(obj) => {
            let key = obj.to_object_ref(resource.clone());
            let old = store.get(&key);
            writer.apply_watcher_event(&event);
            let handlers = handlers.read();
            match old {
                Some(old) => {
                    for handler in handlers.iter() {
                        handler.on_update(&old, obj);
                    }
                }
                None => {
                    for handler in handlers.iter() {
                        handler.on_add(obj);
                    }
                }
            }
        }
        watcher::Event::Delete(obj) => {
            writer.apply_watcher_event(&event);
            let handlers = handlers.read();
            for handler in handlers.iter() {
                handler.on_delete(obj);
            }
        }
    }
}
