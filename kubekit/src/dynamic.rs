//! Untyped access to arbitrary resource kinds, with cached discovery.

use std::collections::HashMap;

use kube::api::{Api, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource};
use kube::Client;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A thin capability layer over [`Client`] for resource kinds that are not
/// known at compile time.
///
/// Kind resolution goes through API discovery once per
/// (group, version, kind) and is then served from an in-memory map for the
/// lifetime of the process.
pub struct DynamicClient {
    client: Client,
    kinds: Mutex<HashMap<GroupVersionKind, ApiResource>>,
}

impl DynamicClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve a (group, version, kind) triple to the server-side collection
    /// that holds it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Kube`] if discovery cannot reach the apiserver or
    /// the kind is not served there.
    pub async fn resolve_kind(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        if let Some(resource) = self.kinds.lock().get(gvk) {
            return Ok(resource.clone());
        }
        let (resource, _caps) = discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(Error::Kube)?;
        tracing::debug!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            plural = %resource.plural,
            "discovered resource kind"
        );
        self.kinds.lock().insert(gvk.clone(), resource.clone());
        Ok(resource)
    }

    /// An [`Api`] handle for one resource kind, optionally restricted to a
    /// namespace. List, get and watch semantics are the upstream ones.
    #[must_use]
    pub fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    /// List raw records of one kind directly from the server.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Kube`] on any apiserver error.
    pub async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(resource, namespace)
            .list(params)
            .await
            .map_err(Error::Kube)?;
        Ok(list.items)
    }
}
