//! Error and Result types for the toolkit.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The kubeconfig file could not be read or parsed.
    #[error("failed to load kubeconfig from {path:?}: {source}")]
    LoadKubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    /// The requested context does not exist in the kubeconfig.
    #[error("context {0:?} not found in kubeconfig")]
    ContextNotFound(String),

    /// The kubeconfig was read, but a client configuration could not be built from it.
    #[error("failed to interpret kubeconfig: {0}")]
    Kubeconfig(#[source] kube::config::KubeconfigError),

    /// No in-cluster environment was available for the empty-path case.
    #[error("in-cluster configuration unavailable: {0}")]
    InCluster(#[source] kube::config::InClusterError),

    /// An error from the underlying Kubernetes client.
    #[error("kubernetes api call failed: {0}")]
    Kube(#[source] kube::Error),

    /// A cached read missed.
    #[error("object {name:?} (namespace {namespace:?}) not found in cache")]
    NotFound {
        namespace: Option<String>,
        name: String,
    },

    /// A cached record could not be converted to the requested typed shape.
    #[error("failed to convert cached object: {0}")]
    Convert(#[source] serde_json::Error),

    /// The informer factory was stopped; construct a new factory to watch again.
    #[error("informer factory has been stopped")]
    Terminated,
}
