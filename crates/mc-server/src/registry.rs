//! LibraryRegistry: logical library names mapped to resolved paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::absolutize;
use crate::error::RegistryError;
use crate::manifest::LibraryDescriptor;

/// The core execution engine library.
pub const CORE_LIBRARY: &str = "core";
/// The data/storage engine library.
pub const DATAMODEL_LIBRARY: &str = "datamodel";

/// Resolved location of one engine library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    binary_path: PathBuf,
    resource_path: Option<PathBuf>,
}

impl LibraryInfo {
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn resource_path(&self) -> Option<&Path> {
        self.resource_path.as_deref()
    }
}

/// Read-only table of engine libraries, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryRegistry {
    entries: BTreeMap<String, LibraryInfo>,
}

impl LibraryRegistry {
    /// Resolve descriptors against `base_dir`.
    ///
    /// The binaries are not required to exist. A name declared twice keeps
    /// the last declaration.
    pub fn from_descriptors(
        descriptors: &[LibraryDescriptor],
        base_dir: &Path,
    ) -> Result<Self, RegistryError> {
        let mut entries = BTreeMap::new();

        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptor.name.is_empty() {
                return Err(RegistryError::EmptyName { index });
            }
            if descriptor.import.is_empty() {
                return Err(RegistryError::EmptyImport {
                    name: descriptor.name.clone(),
                });
            }

            let info = LibraryInfo {
                binary_path: absolutize(base_dir, &descriptor.import),
                resource_path: descriptor
                    .resources
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .map(|r| absolutize(base_dir, r)),
            };

            if let Some(previous) = entries.insert(descriptor.name.clone(), info) {
                warn!(
                    library = %descriptor.name,
                    replaced = %previous.binary_path.display(),
                    "library declared more than once, keeping the last declaration"
                );
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&LibraryInfo> {
        self.entries.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&LibraryInfo, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::Missing(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LibraryInfo)> {
        self.entries.iter().map(|(name, info)| (name.as_str(), info))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
