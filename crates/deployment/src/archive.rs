//! ArchiveInstaller - Packages, expanded directories and anchor files of one kind

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use shared::{ArtifactKind, DeploymentConfig, DeploymentError, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tar::Archive;

/// Layout of one kind root (`apps/`, `domains/`, `policies/`)
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    kind: ArtifactKind,
    root: PathBuf,
    anchor_suffix: String,
    extension: String,
}

impl ArchiveInstaller {
    pub fn new(kind: ArtifactKind, config: &DeploymentConfig) -> Self {
        Self {
            kind,
            root: config.root(kind),
            anchor_suffix: config.anchor_suffix.clone(),
            extension: config.package_extension.clone(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Expanded directory of `name`
    pub fn artifact_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn package_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, self.extension))
    }

    /// Artifact name of a package (`apps/orders.jar` -> `orders`)
    pub fn artifact_name(&self, package: &Path) -> Option<String> {
        let file_name = package.file_name()?.to_str()?;
        let suffix = format!(".{}", self.extension);
        let split = file_name.len().checked_sub(suffix.len()).filter(|&i| i > 0)?;
        if !file_name.is_char_boundary(split) {
            return None;
        }
        let (stem, extension) = file_name.split_at(split);
        extension.eq_ignore_ascii_case(&suffix).then(|| stem.to_string())
    }

    /// Packages waiting in the root, sorted by name
    pub fn list_packages(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.root.join(format!("*.{}", self.extension));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| DeploymentError::Config(e.to_string()))?;

        let mut packages: Vec<PathBuf> = entries.filter_map(|e| e.ok()).filter(|p| p.is_file()).collect();
        packages.sort();
        Ok(packages)
    }

    /// Expanded artifact directories, sorted by name
    pub fn list_directories(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Expand `package` into `<root>/<name>` and consume the package.
    ///
    /// A directory left over under the same name is removed first. The
    /// primary configuration file is touched so that its timestamp is
    /// strictly newer than anything recorded for a previous deployment.
    pub fn install(&self, package: &Path) -> Result<String> {
        let name = self.artifact_name(package).ok_or_else(|| {
            DeploymentError::Config(format!("'{}' is not a .{} package", package.display(), self.extension))
        })?;

        let target = self.artifact_dir(&name);
        if target.exists() {
            tracing::debug!(artifact = %name, dir = %target.display(), "removing stale artifact directory");
            fs::remove_dir_all(&target)?;
        }
        fs::create_dir_all(&target)?;

        let mut archive = Archive::new(GzDecoder::new(File::open(package)?));
        if let Err(e) = archive.unpack(&target) {
            let _ = fs::remove_dir_all(&target);
            return Err(DeploymentError::Io(e));
        }

        touch(&target.join(self.kind.descriptor_file()))?;
        fs::remove_file(package)?;

        tracing::info!(kind = %self.kind, artifact = %name, "installed package");
        Ok(name)
    }

    /// Copy a package from elsewhere into the root
    pub fn copy_in(&self, source: &Path) -> Result<PathBuf> {
        let name = self.artifact_name(source).ok_or_else(|| {
            DeploymentError::Config(format!("'{}' is not a .{} package", source.display(), self.extension))
        })?;
        self.ensure_root()?;

        let target = self.package_path(&name);
        if source != target {
            fs::copy(source, &target)?;
        }
        Ok(target)
    }

    /// Remove everything the artifact has on disk
    pub fn uninstall(&self, name: &str) -> Result<()> {
        let dir = self.artifact_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        let package = self.package_path(name);
        if package.exists() {
            fs::remove_file(&package)?;
        }
        self.delete_anchor(name)?;
        Ok(())
    }

    pub fn anchor_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, self.anchor_suffix))
    }

    pub fn has_anchor(&self, name: &str) -> bool {
        self.anchor_path(name).is_file()
    }

    pub fn create_anchor(&self, name: &str) -> Result<()> {
        File::create(self.anchor_path(name))?;
        Ok(())
    }

    /// `true` if an anchor was there
    pub fn delete_anchor(&self, name: &str) -> Result<bool> {
        let path = self.anchor_path(name);
        if path.exists() {
            fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete anchors left over by a previous run
    pub fn delete_all_anchors(&self) -> Result<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }

        let mut deleted = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_anchor = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&self.anchor_suffix))
                .unwrap_or(false);
            if is_anchor && path.is_file() {
                fs::remove_file(&path)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn touch(path: &Path) -> Result<()> {
    if path.is_file() {
        File::options().write(true).open(path)?.set_modified(SystemTime::now())?;
    }
    Ok(())
}

/// Build a package (gzip-compressed tar) from an expanded directory
pub fn pack_directory(source: &Path, package: &Path) -> Result<()> {
    let encoder = GzEncoder::new(File::create(package)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", source)?;
    builder.into_inner()?.finish()?;
    Ok(())
}
