//! IsolationGraph - Resolved visibility between an artifact and its dependencies

use crate::container::ContainerPolicy;
use shared::{BundleCoordinate, SymbolNotVisibleError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Identifier of a node, unique inside a graph (e.g. `app/orders/plugin/org.acme:http`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of a child node, e.g. `app/orders` + (`plugin`, `org.acme:http`)
    pub fn child(&self, segment: &str, name: &str) -> Self {
        Self(format!("{}/{}/{}", self.0, segment, name))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Application,
    Domain,
    Policy,
    Plugin,
    SharedLibrary,
}

impl NodeKind {
    pub fn is_owner(&self) -> bool {
        matches!(self, NodeKind::Application | NodeKind::Domain | NodeKind::Policy)
    }
}

/// One resolved dependency (or the artifact itself)
#[derive(Debug, Clone)]
pub struct IsolationNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Name of the artifact this node belongs to
    pub owner: String,
    pub coordinate: BundleCoordinate,
    pub exported_packages: BTreeSet<String>,
    pub exported_resources: BTreeSet<String>,
    /// Visible only to the node itself
    pub private_packages: BTreeSet<String>,
    /// Exported only to the artifacts in `privileged_artifacts`
    pub privileged_packages: BTreeSet<String>,
    pub privileged_artifacts: Vec<String>,
    /// Declared dependencies, in declaration order
    pub upstream: Vec<NodeId>,
}

impl IsolationNode {
    pub fn new(id: NodeId, kind: NodeKind, owner: impl Into<String>, coordinate: BundleCoordinate) -> Self {
        Self {
            id,
            kind,
            owner: owner.into(),
            coordinate,
            exported_packages: BTreeSet::new(),
            exported_resources: BTreeSet::new(),
            private_packages: BTreeSet::new(),
            privileged_packages: BTreeSet::new(),
            privileged_artifacts: Vec::new(),
            upstream: Vec::new(),
        }
    }

    /// Whether the node itself contains `package`
    pub fn defines(&self, package: &str) -> bool {
        self.exported_packages.contains(package)
            || self.private_packages.contains(package)
            || self.privileged_packages.contains(package)
    }

    /// Whether `consumer` may see `package` through this node
    pub fn exports_to(&self, consumer: &IsolationNode, package: &str) -> bool {
        if self.exported_packages.contains(package) {
            return true;
        }
        self.privileged_packages.contains(package) && self.grants_privileges_to(consumer)
    }

    /// Allow-list entries are `group:artifact`, optionally followed by `:version`
    pub fn grants_privileges_to(&self, consumer: &IsolationNode) -> bool {
        let key = consumer.coordinate.key();
        self.privileged_artifacts
            .iter()
            .any(|allowed| allowed == &key || allowed.starts_with(&format!("{}:", key)))
    }

    /// Packages `consumer` may see through this node
    fn packages_for(&self, consumer: &IsolationNode) -> Vec<&String> {
        if self.id == consumer.id {
            return self
                .exported_packages
                .iter()
                .chain(self.private_packages.iter())
                .chain(self.privileged_packages.iter())
                .collect();
        }

        let mut packages: Vec<&String> = self.exported_packages.iter().collect();
        if self.grants_privileges_to(consumer) {
            packages.extend(self.privileged_packages.iter());
        }
        packages
    }
}

/// Who serves a symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// The runtime itself
    Container,
    Node(NodeId),
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Container => f.write_str("<container>"),
            Provider::Node(id) => write!(f, "{}", id),
        }
    }
}

/// Package part of a class name (`org.acme.Foo` -> `org.acme`)
pub fn package_of(class_name: &str) -> &str {
    class_name.rsplit_once('.').map(|(p, _)| p).unwrap_or("")
}

/// Resolved visibility graph of one artifact
#[derive(Debug, Clone)]
pub struct IsolationGraph {
    owner: NodeId,
    nodes: Vec<IsolationNode>,
    index: HashMap<NodeId, usize>,
    providers: HashMap<NodeId, Vec<NodeId>>,
    container: ContainerPolicy,
}

impl IsolationGraph {
    pub(crate) fn new(owner: NodeId, container: ContainerPolicy) -> Self {
        Self {
            owner,
            nodes: Vec::new(),
            index: HashMap::new(),
            providers: HashMap::new(),
            container,
        }
    }

    /// Add a node; a node with the same id is replaced
    pub(crate) fn insert(&mut self, node: IsolationNode) {
        match self.index.get(&node.id) {
            Some(&i) => self.nodes[i] = node,
            None => {
                self.index.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    pub(crate) fn set_providers(&mut self, id: NodeId, providers: Vec<NodeId>) {
        self.providers.insert(id, providers);
    }

    pub fn owner_id(&self) -> &NodeId {
        &self.owner
    }

    /// The artifact's own node
    pub fn owner(&self) -> Option<&IsolationNode> {
        self.node(&self.owner)
    }

    pub fn node(&self, id: &NodeId) -> Option<&IsolationNode> {
        self.index.get(id).and_then(|&i| self.nodes.get(i))
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &IsolationNode> {
        self.nodes.iter()
    }

    /// Plugin nodes, in resolution order
    pub fn plugins(&self) -> impl Iterator<Item = &IsolationNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Plugin)
    }

    /// Resolved coordinate of the plugin with the given `group:artifact` key
    pub fn plugin_coordinate(&self, key: &str) -> Option<&BundleCoordinate> {
        self.plugins().find(|n| n.coordinate.key() == key).map(|n| &n.coordinate)
    }

    /// Providers of `id`, highest precedence first
    pub fn providers(&self, id: &NodeId) -> &[NodeId] {
        self.providers.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn container(&self) -> &ContainerPolicy {
        &self.container
    }

    fn not_visible(from: &NodeId, symbol: &str, reason: &str) -> SymbolNotVisibleError {
        SymbolNotVisibleError {
            node: from.to_string(),
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Find who serves `package` to the node `from`
    pub fn lookup_package(&self, from: &NodeId, package: &str) -> Result<Provider, SymbolNotVisibleError> {
        let consumer = self
            .node(from)
            .ok_or_else(|| Self::not_visible(from, package, "unknown node"))?;

        if self.container.is_reserved(package) {
            return if self.container.exports(package) {
                Ok(Provider::Container)
            } else {
                Err(Self::not_visible(from, package, "namespace is reserved by the runtime"))
            };
        }

        for provider_id in self.providers(from) {
            let Some(provider) = self.node(provider_id) else {
                continue;
            };
            let visible = if provider.id == consumer.id {
                provider.defines(package)
            } else {
                provider.exports_to(consumer, package)
            };
            if visible {
                return Ok(Provider::Node(provider.id.clone()));
            }
        }

        Err(Self::not_visible(from, package, "no visible dependency exports it"))
    }

    /// Find who serves the class `class_name` to the node `from`
    pub fn lookup_class(&self, from: &NodeId, class_name: &str) -> Result<Provider, SymbolNotVisibleError> {
        self.lookup_package(from, package_of(class_name)).map_err(|mut e| {
            e.symbol = class_name.to_string();
            e
        })
    }

    /// Find who serves `resource` to the node `from`
    pub fn lookup_resource(&self, from: &NodeId, resource: &str) -> Result<Provider, SymbolNotVisibleError> {
        if self.node(from).is_none() {
            return Err(Self::not_visible(from, resource, "unknown node"));
        }

        self.providers(from)
            .iter()
            .filter_map(|id| self.node(id))
            .find(|n| n.exported_resources.contains(resource))
            .map(|n| Provider::Node(n.id.clone()))
            .ok_or_else(|| Self::not_visible(from, resource, "no visible dependency exports it"))
    }

    /// Look a symbol up from the owner; names containing `/` are resources
    pub fn lookup(&self, symbol: &str) -> Result<Provider, SymbolNotVisibleError> {
        if symbol.contains('/') {
            self.lookup_resource(&self.owner, symbol)
        } else {
            self.lookup_class(&self.owner, symbol)
        }
    }

    /// Every package visible from `from`, with the provider that wins it
    pub fn visible_packages(&self, from: &NodeId) -> BTreeMap<String, Provider> {
        let mut visible = BTreeMap::new();
        let Some(consumer) = self.node(from) else {
            return visible;
        };

        for package in self.container.exported_packages() {
            visible.insert(package.clone(), Provider::Container);
        }

        for provider in self.providers(from).iter().filter_map(|id| self.node(id)) {
            for package in provider.packages_for(consumer) {
                visible
                    .entry(package.clone())
                    .or_insert_with(|| Provider::Node(provider.id.clone()));
            }
        }
        visible
    }
}
