//! # Hangar Isolation
//!
//! Decides, for every artifact and each of its dependencies, which
//! exported symbols (packages, classes, resources) it can see.
//!
//! ## Components
//!
//! - `IsolationResolver` - Builds an `IsolationGraph` from a descriptor
//! - `IsolationGraph` - Nodes plus, per node, the ordered list of providers
//! - `ContainerPolicy` - Namespaces reserved by the runtime
//! - `DependencyRepository` - Source of resolved dependency descriptors

pub mod container;
pub mod graph;
pub mod repository;
pub mod resolver;

pub use container::ContainerPolicy;
pub use graph::{IsolationGraph, IsolationNode, NodeId, NodeKind, Provider};
pub use repository::{DependencyRepository, InMemoryRepository, LocalRepository};
pub use resolver::{owner_node_id, IsolationResolver, DEFAULT_DOMAIN};
