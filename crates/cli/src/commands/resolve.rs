//! hangar resolve command

use super::ConfigArgs;
use clap::{Args, ValueEnum};
use isolation::{IsolationGraph, IsolationResolver, LocalRepository};
use shared::{ArtifactKind, DescriptorLoader, YamlDescriptorLoader};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    App,
    Domain,
    Policy,
}

impl From<KindArg> for ArtifactKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::App => ArtifactKind::Application,
            KindArg::Domain => ArtifactKind::Domain,
            KindArg::Policy => ArtifactKind::Policy,
        }
    }
}

#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// Expanded artifact directory
    pub artifact: PathBuf,

    /// Kind of the artifact
    #[arg(short, long, value_enum, default_value = "app")]
    pub kind: KindArg,

    /// Expanded domain directory the application runs in
    #[arg(short, long)]
    pub domain: Option<PathBuf>,

    /// Look a class or a resource (contains `/`) up from the artifact
    #[arg(short, long)]
    pub lookup: Vec<String>,
}

impl ResolveCommand {
    pub fn run(&self, args: &ConfigArgs) -> anyhow::Result<()> {
        let config = args.load()?;
        let resolver = IsolationResolver::from_config(&config, Arc::new(LocalRepository::new(config.repository_dir())));
        let loader = YamlDescriptorLoader;

        let parent = match &self.domain {
            Some(dir) => {
                let descriptor = loader.load(dir, ArtifactKind::Domain)?;
                Some(resolver.resolve(&descriptor, None)?)
            }
            None if matches!(self.kind, KindArg::App) => Some(resolver.default_domain()),
            None => None,
        };

        let descriptor = loader.load(&self.artifact, self.kind.into())?;
        let graph = resolver.resolve(&descriptor, parent.as_ref())?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&self.to_json(&graph))?);
        } else {
            self.print(&graph);
        }
        Ok(())
    }

    fn print(&self, graph: &IsolationGraph) {
        println!("{}", console::style(format!("Isolation graph of {}", graph.owner_id())).bold());
        for node in graph.nodes() {
            println!();
            println!("  {} ({:?}, {})", console::style(&node.id).cyan(), node.kind, node.coordinate);
            if !node.exported_packages.is_empty() {
                let exported: Vec<&str> = node.exported_packages.iter().map(String::as_str).collect();
                println!("    exports:   {}", exported.join(", "));
            }
            let providers: Vec<String> = graph.providers(&node.id).iter().map(ToString::to_string).collect();
            println!("    providers: {}", providers.join(" > "));
        }

        if !self.lookup.is_empty() {
            println!();
        }
        for symbol in &self.lookup {
            match graph.lookup(symbol) {
                Ok(provider) => println!("  {} {} -> {}", console::style("✓").green(), symbol, provider),
                Err(e) => println!("  {} {}", console::style("✗").red(), e),
            }
        }
    }

    fn to_json(&self, graph: &IsolationGraph) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = graph
            .nodes()
            .map(|node| {
                serde_json::json!({
                    "id": node.id.as_str(),
                    "kind": format!("{:?}", node.kind),
                    "coordinate": node.coordinate.to_string(),
                    "exportedPackages": node.exported_packages,
                    "providers": graph.providers(&node.id).iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();

        let lookups: Vec<serde_json::Value> = self
            .lookup
            .iter()
            .map(|symbol| match graph.lookup(symbol) {
                Ok(provider) => serde_json::json!({ "symbol": symbol, "provider": provider.to_string() }),
                Err(e) => serde_json::json!({ "symbol": symbol, "error": e.to_string() }),
            })
            .collect();

        serde_json::json!({
            "owner": graph.owner_id().as_str(),
            "nodes": nodes,
            "lookups": lookups,
        })
    }
}
