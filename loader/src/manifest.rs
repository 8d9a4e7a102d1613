//! Private resolution manifest, `framescope.deps.toml` next to the loader.
//!
//! ```toml
//! module = "framescope.dll"
//!
//! [dependencies]
//! d3dcompiler_47 = "deps/d3dcompiler_47.dll"
//! ```
//!
//! Paths are relative to the manifest's directory. Dependency names are
//! matched ASCII case-insensitively, with or without a `.dll` suffix.
//! Dependencies are loaded in the order they are listed.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::LoaderError;

pub const MANIFEST_FILE_NAME: &str = "framescope.deps.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub module: PathBuf,
    /// `(name, relative path)` in listing order.
    #[serde(default, deserialize_with = "listing_order")]
    pub dependencies: Vec<(String, PathBuf)>,
}

/// Reads a table as its entries in document order.
fn listing_order<'de, D>(deserializer: D) -> Result<Vec<(String, PathBuf)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Entries;

    impl<'de> Visitor<'de> for Entries {
        type Value = Vec<(String, PathBuf)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of dependency paths")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Entries)
}

impl Manifest {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

pub(crate) fn normalize(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.strip_suffix(".dll") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Resolved manifest: every path is absolute and was present when built.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    module: PathBuf,
    /// normalized name -> path, in load order
    dependencies: Vec<(String, PathBuf)>,
}

impl ResolutionContext {
    /// Reads and resolves the manifest in `dir`.
    pub fn load(dir: &Path) -> Result<Self, LoaderError> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let text = std::fs::read_to_string(&path).map_err(|source| LoaderError::ManifestRead {
            path: path.clone(),
            source,
        })?;
        let manifest =
            Manifest::from_toml(&text).map_err(|source| LoaderError::ManifestParse { path, source })?;
        Self::resolve_manifest(dir, manifest)
    }

    pub fn resolve_manifest(base: &Path, manifest: Manifest) -> Result<Self, LoaderError> {
        let module = existing(base, "module", &manifest.module)?;
        let dependencies = manifest
            .dependencies
            .iter()
            .map(|(name, rel)| Ok((normalize(name), existing(base, name, rel)?)))
            .collect::<Result<Vec<_>, LoaderError>>()?;
        Ok(Self {
            module,
            dependencies,
        })
    }

    /// Path of a dependency. No fallback to any system search path.
    pub fn resolve(&self, name: &str) -> Result<&Path, LoaderError> {
        let key = normalize(name);
        self.dependencies
            .iter()
            .find(|(dep, _)| *dep == key)
            .map(|(_, path)| path.as_path())
            .ok_or_else(|| LoaderError::Unresolved(name.to_string()))
    }

    pub fn module_path(&self) -> &Path {
        &self.module
    }

    /// Dependency names in load order.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|(name, _)| name.as_str())
    }
}

fn existing(base: &Path, name: &str, relative: &Path) -> Result<PathBuf, LoaderError> {
    let path = base.join(relative);
    if path.is_file() {
        Ok(path)
    } else {
        Err(LoaderError::Missing {
            name: name.to_string(),
            path,
        })
    }
}
