//! Cluster object-storage client
//!
//! The narrow view of the Kubernetes API server the GPU operator needs:
//! get, list (label/field selectors), create, update (optimistic concurrency
//! through `resourceVersion`) and delete, over `DynamicObject`s keyed by an
//! `ObjectKind`.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient, ObjectKind, Selector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let gpu_nodes = client
//!     .list(ObjectKind::Node, None, &Selector::labels("nvidia.com/gpu.present=true"))
//!     .await?;
//! println!("{} GPU nodes", gpu_nodes.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod convert;
pub mod error;
pub mod kind;
pub mod selector;
#[path = "trait.rs"]
pub mod client_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use client_trait::ClusterClientTrait;
pub use convert::{from_dynamic, to_dynamic};
pub use error::ClientError;
pub use kind::ObjectKind;
pub use selector::Selector;
#[cfg(feature = "test-util")]
pub use mock::{ClientCall, MockClusterClient};
