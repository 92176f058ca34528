//! Package manifest: which build to run and which engine libraries it needs.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::{absolutize, read_xml};
use crate::error::ConfigError;

/// Namespace of the package manifest document.
pub const PACKAGE_NAMESPACE: &str = "http://schemas.autodesk.com/amcpackage/2020/06";

const PACKAGE_ROOT: &str = "amcpackage";

/// One `<library>` entry, as written in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LibraryDescriptor {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@import", default)]
    pub import: String,
    #[serde(rename = "@resources", default)]
    pub resources: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestXml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(default)]
    build: BuildXml,
}

#[derive(Debug, Default, Deserialize)]
struct BuildXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@configuration", default)]
    configuration: String,
    #[serde(rename = "@coreclient", default)]
    coreclient: String,
    #[serde(rename = "library", default)]
    libraries: Vec<LibraryDescriptor>,
}

/// A validated package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    /// Build name
    pub name: String,
    /// Absolute path of the package configuration document
    pub configuration: PathBuf,
    /// Absolute path of the client bundle
    pub core_client: PathBuf,
    /// Library declarations in document order
    pub libraries: Vec<LibraryDescriptor>,
}

impl PackageManifest {
    /// Load and validate the manifest at `path`. Relative paths inside it
    /// resolve against `base_dir`; the configuration and client bundle
    /// must exist.
    pub fn load(path: &Path, base_dir: &Path) -> Result<Self, ConfigError> {
        let root: ManifestXml = read_xml(path, PACKAGE_ROOT)?;

        if root.xmlns != PACKAGE_NAMESPACE {
            return Err(ConfigError::Namespace {
                path: path.to_path_buf(),
                expected: PACKAGE_NAMESPACE,
                found: root.xmlns,
            });
        }

        let build = root.build;
        if build.name.is_empty() {
            return Err(ConfigError::EmptyField("build@name"));
        }
        if build.configuration.is_empty() {
            return Err(ConfigError::EmptyField("build@configuration"));
        }
        if build.coreclient.is_empty() {
            return Err(ConfigError::EmptyField("build@coreclient"));
        }

        let configuration = absolutize(base_dir, &build.configuration);
        if !configuration.is_file() {
            return Err(ConfigError::MissingFile {
                what: "package configuration",
                path: configuration,
            });
        }

        let core_client = absolutize(base_dir, &build.coreclient);
        if !core_client.is_file() {
            return Err(ConfigError::MissingFile {
                what: "client bundle",
                path: core_client,
            });
        }

        Ok(Self {
            name: build.name,
            configuration,
            core_client,
            libraries: build.libraries,
        })
    }
}
