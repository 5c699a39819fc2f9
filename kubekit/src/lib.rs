//! A toolkit for programmatic management of, and event-driven interaction
//! with, Kubernetes-compatible clusters.
//!
//! The interesting piece is the informer stack: a single dynamic list+watch
//! machinery per (connection, resource kind), shared by any number of typed
//! consumers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use k8s_openapi::api::core::v1::Pod;
//! use kube::core::{GroupVersionKind, Selector};
//! use kube::discovery::ApiResource;
//! use kubekit::{Informer, InformerFactory};
//!
//! # struct PodHandler;
//! # impl kubekit::EventHandler<Pod> for PodHandler {
//! #     fn on_add(&self, _: Pod) {}
//! #     fn on_update(&self, _: Pod, _: Pod) {}
//! #     fn on_delete(&self, _: Pod) {}
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kubekit::config::client(None, None).await?;
//! let factory = InformerFactory::new(client).wait_for_sync(true);
//!
//! let pods = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Pod"));
//! let informer: Informer<Pod> = Informer::new(&factory, &pods)?;
//! informer.add_subscriber(Arc::new(PodHandler));
//!
//! factory.start().await?;
//! for pod in informer.list(&Selector::default(), Some("ns-1"))? {
//!     println!("cached: {:?}", pod.metadata.name);
//! }
//! factory.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
mod dynamic;
mod error;
mod informer;

pub use dynamic::DynamicClient;
pub use error::{Error, Result};
pub use informer::{BaseWatcher, EventHandler, Informer, InformerFactory, RawEventHandler};
