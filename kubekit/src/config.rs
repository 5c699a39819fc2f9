//! Client configuration from a kubeconfig file or the cluster environment.
//!
//! The resolution rule matches the usual tooling convention: an explicit file
//! path wins, the current context may be overridden per call, and an empty
//! path falls back to the in-cluster service account environment.

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::error::{Error, Result};

/// Resolve a [`Config`] from an optional kubeconfig path and context name.
///
/// With `path` set, the file is parsed and `context` (if given) overrides the
/// file's current context. Without a path, the in-cluster environment is used
/// and `context` is ignored.
///
/// # Errors
///
/// [`Error::LoadKubeconfig`] when the file is missing or malformed,
/// [`Error::ContextNotFound`] when the named context does not exist, and
/// [`Error::InCluster`] when no path is given outside a cluster.
pub async fn resolve(path: Option<&Path>, context: Option<&str>) -> Result<Config> {
    let Some(path) = path else {
        return Config::incluster().map_err(Error::InCluster);
    };

    let kubeconfig = Kubeconfig::read_from(path).map_err(|source| Error::LoadKubeconfig {
        path: path.to_owned(),
        source,
    })?;

    if let Some(name) = context {
        if !kubeconfig.contexts.iter().any(|c| c.name == name) {
            return Err(Error::ContextNotFound(name.to_owned()));
        }
    }

    let options = KubeConfigOptions {
        context: context.map(ToOwned::to_owned),
        ..KubeConfigOptions::default()
    };
    Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(Error::Kubeconfig)
}

/// Resolve a ready-to-use [`Client`] in one step.
pub async fn client(path: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let config = resolve(path, context).await?;
    Client::try_from(config).map_err(Error::Kube)
}
