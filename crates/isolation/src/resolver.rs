//! IsolationResolver - Builds the visibility graph of an artifact

use crate::container::ContainerPolicy;
use crate::graph::{IsolationGraph, IsolationNode, NodeId, NodeKind};
use crate::repository::DependencyRepository;
use semver::Version;
use shared::{
    is_compatible_version, ArtifactDescriptor, ArtifactKind, BundleCoordinate, DependencyDescriptor,
    DeploymentConfig, DeploymentError, MissingDependencyError, Result, VersionMismatchError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Name of the domain applications use when they declare none
pub const DEFAULT_DOMAIN: &str = "default";

/// Id of an artifact's own node (`app/<name>`, `domain/<name>`, `policy/<name>`)
pub fn owner_node_id(kind: ArtifactKind, name: &str) -> NodeId {
    let prefix = match kind {
        ArtifactKind::Application => "app",
        ArtifactKind::Domain => "domain",
        ArtifactKind::Policy => "policy",
    };
    NodeId::new(format!("{}/{}", prefix, name))
}

fn owner_kind(kind: ArtifactKind) -> NodeKind {
    match kind {
        ArtifactKind::Application => NodeKind::Application,
        ArtifactKind::Domain => NodeKind::Domain,
        ArtifactKind::Policy => NodeKind::Policy,
    }
}

fn push_unique(list: &mut Vec<NodeId>, id: NodeId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

/// Owner node followed by its shared libraries
fn owner_region(graph: &IsolationGraph) -> Vec<NodeId> {
    graph
        .providers(graph.owner_id())
        .iter()
        .take_while(|id| graph.node(id).map(|n| n.kind != NodeKind::Plugin).unwrap_or(false))
        .cloned()
        .collect()
}

/// Breadth-first walk over plugin-to-plugin edges, nearest first
fn plugin_closure(graph: &IsolationGraph, start: &[NodeId]) -> Vec<NodeId> {
    let mut visited = Vec::new();
    let mut queue: VecDeque<NodeId> = start.iter().cloned().collect();

    while let Some(id) = queue.pop_front() {
        if visited.contains(&id) {
            continue;
        }
        let Some(node) = graph.node(&id) else {
            continue;
        };
        queue.extend(
            node.upstream
                .iter()
                .filter(|up| graph.node(up).map(|n| n.kind == NodeKind::Plugin).unwrap_or(false))
                .cloned(),
        );
        visited.push(id);
    }
    visited
}

/// Plugins an artifact brings, in resolution order, plus the node id of
/// every plugin it can reach (its own and the inherited ones)
struct PluginPlan {
    ids: HashMap<String, NodeId>,
    ordered: Vec<DependencyDescriptor>,
}

/// Resolves descriptors into isolation graphs
pub struct IsolationResolver {
    repository: Arc<dyn DependencyRepository>,
    container: ContainerPolicy,
    runtime_version: Version,
}

impl IsolationResolver {
    pub fn new(repository: Arc<dyn DependencyRepository>, container: ContainerPolicy, runtime_version: Version) -> Self {
        Self {
            repository,
            container,
            runtime_version,
        }
    }

    pub fn from_config(config: &DeploymentConfig, repository: Arc<dyn DependencyRepository>) -> Self {
        Self::new(repository, ContainerPolicy::from_config(config), config.runtime_version.clone())
    }

    pub fn container(&self) -> &ContainerPolicy {
        &self.container
    }

    /// Graph of the implicit domain: no libraries, no plugins
    pub fn default_domain(&self) -> IsolationGraph {
        let id = owner_node_id(ArtifactKind::Domain, DEFAULT_DOMAIN);
        let coordinate = BundleCoordinate::new("hangar", "default-domain", self.runtime_version.clone());

        let mut graph = IsolationGraph::new(id.clone(), self.container.clone());
        graph.insert(IsolationNode::new(id.clone(), NodeKind::Domain, DEFAULT_DOMAIN, coordinate));
        graph.set_providers(id.clone(), vec![id]);
        graph
    }

    /// Resolve `descriptor`, inheriting the visible nodes of `parent` (the
    /// application's domain) when given.
    pub fn resolve(&self, descriptor: &ArtifactDescriptor, parent: Option<&IsolationGraph>) -> Result<IsolationGraph> {
        self.check_runtime_version(descriptor)?;

        let name = descriptor.name.as_str();
        let owner_id = owner_node_id(descriptor.kind, name);
        let mut graph = IsolationGraph::new(owner_id.clone(), self.container.clone());

        let mut region = Vec::new();
        if let Some(parent) = parent {
            for node in parent.nodes() {
                graph.insert(node.clone());
                graph.set_providers(node.id.clone(), parent.providers(&node.id).to_vec());
            }
            region.extend(owner_region(parent));
        }

        let owner_exports = self.container.sanitize(name, &descriptor.exported_packages);
        let mut owner = IsolationNode::new(owner_id.clone(), owner_kind(descriptor.kind), name, descriptor.coordinate.clone());
        owner.exported_packages = owner_exports.clone();
        owner.private_packages = self.container.sanitize(name, &descriptor.local_packages);
        owner.exported_resources = descriptor.exported_resources.iter().cloned().collect();
        if let Some(parent) = parent {
            owner.upstream.push(parent.owner_id().clone());
        }
        region.push(owner_id.clone());

        let mut libraries = Vec::new();
        for coordinate in &descriptor.shared_libraries {
            let dependency = self.fetch(name, coordinate)?;
            let id = owner_id.child("lib", &coordinate.key());
            libraries.push(self.dependency_node(id.clone(), NodeKind::SharedLibrary, name, &dependency));
            owner.upstream.push(id.clone());
            push_unique(&mut region, id);
        }

        let plan = self.plan_plugins(descriptor, &owner_id, parent)?;
        let declared: Vec<NodeId> = descriptor
            .plugins
            .iter()
            .filter_map(|p| plan.ids.get(&p.key()).cloned())
            .collect();
        owner.upstream.extend(declared.iter().cloned());

        graph.insert(owner);
        for library in libraries {
            graph.set_providers(library.id.clone(), vec![library.id.clone()]);
            graph.insert(library);
        }

        let mut own_plugins = Vec::new();
        for dependency in &plan.ordered {
            let id = owner_id.child("plugin", &dependency.coordinate.key());
            let mut node = self.dependency_node(id.clone(), NodeKind::Plugin, name, dependency);

            let shadowed: Vec<String> = node.exported_packages.intersection(&owner_exports).cloned().collect();
            if !shadowed.is_empty() {
                tracing::warn!(
                    artifact = name,
                    plugin = %dependency.coordinate,
                    packages = ?shadowed,
                    "packages exported by the artifact override the plugin's exports"
                );
                for package in &shadowed {
                    node.exported_packages.remove(package);
                }
            }

            let mut bundled = Vec::new();
            for coordinate in &dependency.bundled_libraries {
                let library = self.fetch(name, coordinate)?;
                let library_id = id.child("lib", &coordinate.key());
                graph.insert(self.dependency_node(library_id.clone(), NodeKind::SharedLibrary, name, &library));
                graph.set_providers(library_id.clone(), vec![library_id.clone()]);
                node.upstream.push(library_id.clone());
                bundled.push(library_id);
            }

            let mut dependencies = Vec::new();
            for coordinate in &dependency.plugin_dependencies {
                if let Some(dependency_id) = plan.ids.get(&coordinate.key()) {
                    node.upstream.push(dependency_id.clone());
                    dependencies.push(dependency_id.clone());
                }
            }

            graph.insert(node);
            own_plugins.push((id, bundled, dependencies));
        }

        for (id, bundled, dependencies) in own_plugins {
            let mut providers = region.clone();
            push_unique(&mut providers, id.clone());
            for library in bundled {
                push_unique(&mut providers, library);
            }
            for reachable in plugin_closure(&graph, &dependencies) {
                push_unique(&mut providers, reachable);
            }
            graph.set_providers(id, providers);
        }

        let mut providers = region;
        for reachable in plugin_closure(&graph, &declared) {
            push_unique(&mut providers, reachable);
        }
        let remaining: Vec<NodeId> = graph.plugins().map(|p| p.id.clone()).collect();
        for reachable in plugin_closure(&graph, &remaining) {
            push_unique(&mut providers, reachable);
        }
        graph.set_providers(owner_id, providers);

        tracing::debug!(
            artifact = name,
            nodes = graph.nodes().count(),
            plugins = graph.plugins().count(),
            "resolved isolation graph"
        );
        Ok(graph)
    }

    fn check_runtime_version(&self, descriptor: &ArtifactDescriptor) -> Result<()> {
        match &descriptor.min_runtime_version {
            Some(required) if &self.runtime_version < required => Err(VersionMismatchError {
                artifact: descriptor.name.clone(),
                dependency: "runtime".to_string(),
                required: required.to_string(),
                found: self.runtime_version.to_string(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn fetch(&self, artifact: &str, coordinate: &BundleCoordinate) -> Result<DependencyDescriptor> {
        self.repository.find(coordinate)?.ok_or_else(|| {
            MissingDependencyError {
                artifact: artifact.to_string(),
                dependency: coordinate.to_string(),
                reason: "not present in the dependency repository".to_string(),
            }
            .into()
        })
    }

    fn dependency_node(
        &self,
        id: NodeId,
        kind: NodeKind,
        owner: &str,
        dependency: &DependencyDescriptor,
    ) -> IsolationNode {
        let label = dependency.coordinate.to_string();
        let mut node = IsolationNode::new(id, kind, owner, dependency.coordinate.clone());
        node.exported_packages = self.container.sanitize(&label, &dependency.exported_packages);
        node.exported_resources = dependency.exported_resources.iter().cloned().collect();
        node.private_packages = self.container.sanitize(&label, &dependency.local_packages);
        node.privileged_packages = self.container.sanitize(&label, &dependency.privileged_exported_packages);
        node.privileged_artifacts = dependency.privileged_artifacts.clone();
        node
    }

    /// Collect every plugin reachable from the descriptor, nearest
    /// declaration first, and order them so dependencies come before their
    /// dependents (ties by name).
    fn plan_plugins(
        &self,
        descriptor: &ArtifactDescriptor,
        owner_id: &NodeId,
        parent: Option<&IsolationGraph>,
    ) -> Result<PluginPlan> {
        let name = descriptor.name.as_str();
        let mut ids: HashMap<String, NodeId> = HashMap::new();
        let mut inherited: HashSet<String> = HashSet::new();
        if let Some(parent) = parent {
            for plugin in parent.plugins() {
                ids.insert(plugin.coordinate.key(), plugin.id.clone());
                inherited.insert(plugin.coordinate.key());
            }
        }

        let mut found: HashMap<String, DependencyDescriptor> = HashMap::new();
        let mut queue: VecDeque<BundleCoordinate> = descriptor.plugins.iter().cloned().collect();

        while let Some(coordinate) = queue.pop_front() {
            let key = coordinate.key();

            if inherited.contains(&key) {
                let provided = parent.and_then(|p| p.plugin_coordinate(&key));
                if let Some(provided) = provided {
                    if !is_compatible_version(&coordinate.version, &provided.version) {
                        return Err(VersionMismatchError {
                            artifact: name.to_string(),
                            dependency: key,
                            required: coordinate.version.to_string(),
                            found: provided.version.to_string(),
                        }
                        .into());
                    }
                }
                continue;
            }

            if let Some(existing) = found.get(&key) {
                if existing.coordinate.version != coordinate.version {
                    tracing::debug!(
                        artifact = name,
                        plugin = %key,
                        kept = %existing.coordinate.version,
                        ignored = %coordinate.version,
                        "nearest plugin declaration wins"
                    );
                }
                continue;
            }

            let dependency = self.fetch(name, &coordinate)?;
            queue.extend(dependency.plugin_dependencies.iter().cloned());
            ids.insert(key.clone(), owner_id.child("plugin", &coordinate.key()));
            found.insert(key, dependency);
        }

        let mut pending: Vec<DependencyDescriptor> = found.into_values().collect();
        pending.sort_by(|a, b| {
            a.coordinate
                .artifact_id
                .cmp(&b.coordinate.artifact_id)
                .then_with(|| a.coordinate.group_id.cmp(&b.coordinate.group_id))
        });

        let mut resolved = inherited;
        let mut ordered = Vec::new();
        while !pending.is_empty() {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for dependency in pending {
                let ready = dependency
                    .plugin_dependencies
                    .iter()
                    .all(|d| resolved.contains(&d.key()));
                if ready {
                    resolved.insert(dependency.coordinate.key());
                    ordered.push(dependency);
                } else {
                    unresolved.push(dependency);
                }
            }

            if unresolved.len() == before {
                let names: Vec<String> = unresolved.iter().map(|d| d.coordinate.to_string()).collect();
                return Err(DeploymentError::UnresolvableLoader {
                    artifact: name.to_string(),
                    reason: format!("cannot resolve plugins [{}]", names.join(", ")),
                });
            }
            pending = unresolved;
        }

        Ok(PluginPlan { ids, ordered })
    }
}
