//! Command implementations

use crate::cli::args::{Cli, FetchArgs, PluginAction};
use crate::config::{find_package_root, WorkspaceLocation};
use crate::error::{SwiftpackError, SwiftpackResult};
use crate::manifest::{JsonManifestLoader, Manifest, ManifestLoader, ToolsVersion};
use crate::package::PackageReference;
use crate::plugin::ToolchainConfig;
use crate::repository::git::GitRepositoryProvider;
use crate::repository::{
    FetchProgress, RepositoryHandle, RepositoryManagerDelegate, RepositorySpecifier,
};
use crate::state::CheckoutState;
use crate::workspace::{HighestVersionResolver, Workspace, WorkspaceConfiguration};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Delegate printing repository activity as plain lines
struct ConsoleDelegate;

impl RepositoryManagerDelegate for ConsoleDelegate {
    fn fetching_will_begin(&self, handle: &RepositoryHandle) {
        println!("{} {}", style("Fetching").bold().cyan(), handle.specifier);
    }

    fn fetching_did_finish(
        &self,
        handle: &RepositoryHandle,
        error: Option<&SwiftpackError>,
        duration: Duration,
    ) {
        match error {
            None => println!(
                "{} {} ({:.2}s)",
                style("Fetched").bold().green(),
                handle.specifier,
                duration.as_secs_f64()
            ),
            Some(e) => println!(
                "{} {}: {e}",
                style("Failed").bold().red(),
                handle.specifier
            ),
        }
    }

    fn fetch_progress(&self, _handle: &RepositoryHandle, _progress: &FetchProgress) {}

    fn handle_will_update(&self, handle: &RepositoryHandle) {
        println!("{} {}", style("Updating").bold().cyan(), handle.specifier);
    }

    fn handle_did_update(&self, handle: &RepositoryHandle, duration: Duration) {
        println!(
            "{} {} ({:.2}s)",
            style("Updated").bold().green(),
            handle.specifier,
            duration.as_secs_f64()
        );
    }
}

fn package_root(cli: &Cli) -> SwiftpackResult<PathBuf> {
    if let Some(path) = &cli.package_path {
        return Ok(path.clone());
    }
    let cwd = std::env::current_dir().map_err(|e| SwiftpackError::io("reading cwd", e))?;
    find_package_root(&cwd).ok_or_else(|| {
        SwiftpackError::ManifestNotFound(cwd.join(crate::manifest::MANIFEST_FILENAME))
    })
}

async fn build_workspace(cli: &Cli) -> SwiftpackResult<Workspace> {
    let location = WorkspaceLocation::new(package_root(cli)?);
    let mut config = WorkspaceConfiguration::new(location);
    if let Some(cache) = &cli.cache_path {
        config.shared_cache_dir = Some(cache.clone());
    }
    config.skip_update = cli.skip_update;

    Workspace::new(
        config,
        Arc::new(GitRepositoryProvider::new()),
        Arc::new(JsonManifestLoader),
        Arc::new(HighestVersionResolver),
        Some(Arc::new(ConsoleDelegate)),
    )
    .await
}

async fn load_root_manifest(root: &Path) -> SwiftpackResult<Manifest> {
    let manifest_path = root.join(crate::manifest::MANIFEST_FILENAME);
    let contents = tokio::fs::read(&manifest_path)
        .await
        .map_err(|_| SwiftpackError::ManifestNotFound(manifest_path.clone()))?;
    let tools = ToolsVersion::parse_manifest(&contents)?;

    let reference = PackageReference::root(root);
    JsonManifestLoader
        .load(
            &reference.identity,
            &reference.kind,
            manifest_path,
            &contents,
            tools,
            None,
        )
        .await
}

fn describe(state: &CheckoutState) -> String {
    match state {
        CheckoutState::Version { version, revision } => {
            format!("{version} ({})", &revision[..revision.len().min(10)])
        }
        CheckoutState::Branch { name, revision } => {
            format!("branch {name} ({})", &revision[..revision.len().min(10)])
        }
        CheckoutState::Revision { revision } => format!("revision {revision}"),
    }
}

/// `swiftpack resolve`
pub async fn resolve(cli: &Cli) -> SwiftpackResult<()> {
    let root = package_root(cli)?;
    let manifest = load_root_manifest(&root).await?;
    let workspace = build_workspace(cli).await?;

    let pins = workspace.resolve(&manifest).await?;
    if pins.is_empty() {
        println!("No dependencies to resolve");
        return Ok(());
    }
    for pin in pins.values() {
        println!(
            "{} {} {}",
            style("Pinned").bold().green(),
            pin.package_ref.identity,
            describe(&pin.state)
        );
    }
    Ok(())
}

/// `swiftpack pins`
pub async fn pins(cli: &Cli) -> SwiftpackResult<()> {
    let workspace = build_workspace(cli).await?;
    let pins = workspace.pins().await?;
    if pins.is_empty() {
        println!("No pinned dependencies");
        return Ok(());
    }
    for pin in pins.values() {
        println!("{} {}", pin.package_ref.identity, describe(&pin.state));
    }
    Ok(())
}

/// `swiftpack fetch <location>`
pub async fn fetch(args: &FetchArgs, cli: &Cli) -> SwiftpackResult<()> {
    let workspace = build_workspace(cli).await?;
    let specifier = RepositorySpecifier::from_location(&args.location);

    let handle = workspace
        .repository_manager()
        .lookup(&specifier, cli.skip_update)
        .await?;
    println!(
        "{} {}",
        style("Ready at").bold().green(),
        workspace.repository_manager().repository_path(&handle).display()
    );
    Ok(())
}

/// `swiftpack purge-cache`
pub async fn purge_cache(cli: &Cli) -> SwiftpackResult<()> {
    let workspace = build_workspace(cli).await?;
    workspace.purge_cache().await?;
    println!("{} shared repository cache", style("Purged").bold().green());
    Ok(())
}

/// `swiftpack reset`
pub async fn reset(cli: &Cli) -> SwiftpackResult<()> {
    let workspace = build_workspace(cli).await?;
    workspace.reset().await?;
    println!("{} workspace state", style("Removed").bold().green());
    Ok(())
}

/// `swiftpack plugin compile`
pub async fn plugin(action: &PluginAction, cli: &Cli) -> SwiftpackResult<()> {
    match action {
        PluginAction::Compile {
            sources_root,
            compiler,
            api_path,
        } => {
            let workspace = build_workspace(cli).await?;
            let sources = collect_sources(sources_root)?;
            if sources.is_empty() {
                return Err(SwiftpackError::PathNotFound(sources_root.clone()));
            }

            let toolchain = ToolchainConfig::new(compiler.clone(), api_path.clone());
            let script_compiler = workspace.plugin_compiler(toolchain);
            let result = script_compiler
                .compile(sources_root, &sources, ToolsVersion::CURRENT)
                .await?;

            let label = if result.was_cached {
                style("Cached").bold().green()
            } else {
                style("Compiled").bold().green()
            };
            println!("{label} {}", result.compiled_executable.display());
            Ok(())
        }
    }
}

/// Plugin source files under `root`, sorted for a stable command line
fn collect_sources(root: &Path) -> SwiftpackResult<Vec<PathBuf>> {
    let mut sources = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| SwiftpackError::io(format!("reading {}", dir.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SwiftpackError::io("reading directory entry", e))?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "swift") {
                sources.push(path);
            }
        }
    }
    sources.sort();
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_sources_finds_nested_swift_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.swift"), "").unwrap();
        std::fs::write(dir.path().join("nested/a.swift"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let sources = collect_sources(dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].ends_with("b.swift") || sources[1].ends_with("b.swift"));
    }

    #[test]
    fn describe_truncates_revisions() {
        let state = CheckoutState::Version {
            version: semver::Version::new(1, 2, 0),
            revision: "0123456789abcdef".to_string(),
        };
        assert_eq!(describe(&state), "1.2.0 (0123456789)");
    }
}
