//! Lifecycle owner of the base watchers for one connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::Client;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::informer::base::BaseWatcher;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Built,
    Started,
    Stopped,
}

struct Shared {
    lifecycle: Lifecycle,
    watchers: HashMap<ApiResource, Arc<BaseWatcher>>,
}

/// Owns one [`BaseWatcher`] per resource kind over a single connection.
///
/// Watchers are created lazily and deduplicated by kind; the factory drives
/// their shared lifecycle (`start` / `stop` / wait-for-sync). A stopped
/// factory is terminal: construct a new one to watch again.
pub struct InformerFactory {
    client: Client,
    namespace: Option<String>,
    resync: Option<Duration>,
    wait_for_sync: bool,
    shared: Mutex<Shared>,
    stop: CancellationToken,
}

impl InformerFactory {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            namespace: None,
            resync: None,
            wait_for_sync: false,
            shared: Mutex::new(Shared {
                lifecycle: Lifecycle::Built,
                watchers: HashMap::new(),
            }),
            stop: CancellationToken::new(),
        }
    }

    /// Restrict every watcher to one namespace. Default is all namespaces.
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_owned());
        self
    }

    /// Re-deliver all cached objects as updates at this interval.
    /// `Duration::ZERO` (the default) disables periodic resync.
    #[must_use]
    pub fn resync(mut self, every: Duration) -> Self {
        self.resync = (!every.is_zero()).then_some(every);
        self
    }

    /// Make [`start`](Self::start) block until every watcher created so far
    /// has completed its initial list.
    #[must_use]
    pub fn wait_for_sync(mut self, wait: bool) -> Self {
        self.wait_for_sync = wait;
        self
    }

    /// The base watcher for `resource`, created on first request.
    ///
    /// Concurrent calls for the same kind observe the same watcher. Watchers
    /// requested after [`start`](Self::start) begin syncing immediately.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] once the factory has been stopped.
    pub fn base_watcher(&self, resource: &ApiResource) -> Result<Arc<BaseWatcher>> {
        let mut shared = self.shared.lock();
        if shared.lifecycle == Lifecycle::Stopped {
            return Err(Error::Terminated);
        }
        if let Some(existing) = shared.watchers.get(resource) {
            return Ok(Arc::clone(existing));
        }

        let api: Api<DynamicObject> = match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        };
        let stream = watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        let created = Arc::new(BaseWatcher::new(resource.clone(), stream, self.resync));
        if shared.lifecycle == Lifecycle::Started {
            created.spawn(self.stop.child_token());
        }
        shared
            .watchers
            .insert(resource.clone(), Arc::clone(&created));
        tracing::debug!(kind = %resource.kind, plural = %resource.plural, "created base watcher");
        Ok(created)
    }

    /// Start listing and watching on every watcher created so far. Idempotent.
    ///
    /// With wait-for-sync enabled, returns only after each of those watchers
    /// has populated its cache from the initial list.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] if the factory was stopped, or if a watcher shut
    /// down before reaching its sync milestone.
    pub async fn start(&self) -> Result<()> {
        let to_sync = {
            let mut shared = self.shared.lock();
            if shared.lifecycle == Lifecycle::Stopped {
                return Err(Error::Terminated);
            }
            shared.lifecycle = Lifecycle::Started;
            for watcher in shared.watchers.values() {
                watcher.spawn(self.stop.child_token());
            }
            shared.watchers.values().cloned().collect::<Vec<_>>()
        };

        if self.wait_for_sync {
            for watcher in to_sync {
                watcher.wait_until_synced().await?;
            }
        }
        Ok(())
    }

    /// Signal every watcher to terminate. Non-blocking; does not wait for the
    /// watch tasks to drain.
    pub fn stop(&self) {
        self.shared.lock().lifecycle = Lifecycle::Stopped;
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    fn test_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:8080".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    fn deployments() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("apps", "v1", "Deployment"))
    }

    fn pods() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Pod"))
    }

    #[tokio::test]
    async fn watchers_are_deduplicated_by_kind() {
        let factory = InformerFactory::new(test_client());
        let first = factory.base_watcher(&deployments()).unwrap();
        let second = factory.base_watcher(&deployments()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = factory.base_watcher(&pods()).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn stopped_factory_rejects_new_watchers() {
        let factory = InformerFactory::new(test_client());
        factory.stop();
        assert!(matches!(
            factory.base_watcher(&pods()),
            Err(Error::Terminated)
        ));
        assert!(matches!(factory.start().await, Err(Error::Terminated)));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let factory = InformerFactory::new(test_client());
        let _watcher = factory.base_watcher(&pods()).unwrap();
        factory.start().await.unwrap();
        factory.start().await.unwrap();
        factory.stop();
    }
}
