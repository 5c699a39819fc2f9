//! Typed adapters over the raw watch cache.

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::core::Selector;
use kube::ResourceExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::informer::base::{BaseWatcher, RawEventHandler};
use crate::informer::factory::InformerFactory;

/// Subscriber for typed events of one resource kind.
///
/// Subscribers of one informer are invoked in registration order, serially;
/// a slow subscriber delays the ones registered after it for that event.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: K);
    fn on_update(&self, old: K, new: K);
    fn on_delete(&self, obj: K);
}

type SubscriberList<K> = RwLock<Vec<Arc<dyn EventHandler<K>>>>;

/// A typed view over the shared raw cache of one resource kind.
///
/// Several informers (with distinct target shapes) may sit on the same base
/// watcher; each converts raw records independently and fans out to its own
/// subscribers. Dropping an informer does not affect the base watcher, which
/// lives until its factory stops.
pub struct Informer<K> {
    base: Arc<BaseWatcher>,
    subscribers: Arc<SubscriberList<K>>,
}

impl<K> Informer<K>
where
    K: Clone + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an informer for `resource`, reusing the factory's base watcher
    /// for that kind (or creating it on first use).
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] if the factory has been stopped.
    pub fn new(factory: &InformerFactory, resource: &ApiResource) -> Result<Self> {
        Ok(Self::with_base(factory.base_watcher(resource)?))
    }

    pub(crate) fn with_base(base: Arc<BaseWatcher>) -> Self {
        let subscribers: Arc<SubscriberList<K>> = Arc::new(RwLock::new(Vec::new()));
        base.add_event_handler(Arc::new(TypedDispatcher {
            kind: base.resource().kind.clone(),
            subscribers: Arc::clone(&subscribers),
        }));
        Self { base, subscribers }
    }

    /// Register a subscriber. Subscribers added before the factory starts
    /// observe the initial list as adds.
    pub fn add_subscriber(&self, subscriber: Arc<dyn EventHandler<K>>) {
        self.subscribers.write().push(subscriber);
    }

    /// Typed snapshot of the cache, filtered by selector and namespace.
    ///
    /// # Errors
    ///
    /// [`Error::Convert`] if a cached record does not fit `K`.
    pub fn list(&self, selector: &Selector, namespace: Option<&str>) -> Result<Vec<K>> {
        self.base
            .list(selector, namespace)
            .iter()
            .map(|obj| convert(obj).map_err(Error::Convert))
            .collect()
    }

    /// Typed point lookup.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] on a cache miss, [`Error::Convert`] if the record
    /// does not fit `K`.
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        convert(&self.base.get(namespace, name)?).map_err(Error::Convert)
    }

    /// Resolves once the underlying cache finished its initial list.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] if the watch task ended before syncing.
    pub async fn wait_until_synced(&self) -> Result<()> {
        self.base.wait_until_synced().await
    }
}

/// The single raw handler an informer registers on its base watcher.
struct TypedDispatcher<K> {
    kind: String,
    subscribers: Arc<SubscriberList<K>>,
}

impl<K> TypedDispatcher<K>
where
    K: Clone + DeserializeOwned + Send + Sync + 'static,
{
    fn convert_or_drop(&self, obj: &DynamicObject, action: &str) -> Option<K> {
        match convert(obj) {
            Ok(typed) => Some(typed),
            Err(error) => {
                // Dropped for this informer only; the raw cache and other
                // typed informers over the kind still see the event.
                tracing::debug!(
                    kind = %self.kind,
                    object = %obj.name_any(),
                    %action,
                    %error,
                    "dropping event: record does not convert to the typed shape"
                );
                None
            }
        }
    }
}

impl<K> RawEventHandler for TypedDispatcher<K>
where
    K: Clone + DeserializeOwned + Send + Sync + 'static,
{
    fn on_add(&self, obj: &DynamicObject) {
        let Some(new) = self.convert_or_drop(obj, "add") else {
            return;
        };
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_add(new.clone());
        }
    }

    fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
        let (Some(old), Some(new)) = (
            self.convert_or_drop(old, "update"),
            self.convert_or_drop(new, "update"),
        ) else {
            return;
        };
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_update(old.clone(), new.clone());
        }
    }

    fn on_delete(&self, obj: &DynamicObject) {
        let Some(old) = self.convert_or_drop(obj, "delete") else {
            return;
        };
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_delete(old.clone());
        }
    }
}

/// Structural conversion between the raw mapping and the target shape.
fn convert<K: DeserializeOwned>(obj: &DynamicObject) -> serde_json::Result<K> {
    serde_json::from_value(serde_json::to_value(obj)?)
}
