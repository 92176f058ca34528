//! ConfigResolver: turns `amc_server.xml` into a validated [`ServerConfig`].
//!
//! ```xml
//! <amc xmlns="http://schemas.autodesk.com/amc/2020/06">
//!     <server hostname="0.0.0.0" port="8869"/>
//!     <data directory="data/" database="sqlite" sqlitedb="storage.db"/>
//!     <defaultpackage name="package.xml" githash="..." sha256="..."/>
//! </amc>
//! ```
//!
//! Every relative path, in this file and in the package manifest it names,
//! resolves against the resolver's base directory.

use std::path::{Component, Path, PathBuf};

use mc_protocol::DatabaseType;
use mc_transport::TransportConfig;
use serde::Deserialize;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ConfigError;
use crate::manifest::PackageManifest;
use crate::registry::{CORE_LIBRARY, DATAMODEL_LIBRARY, LibraryRegistry};

/// Namespace of the server configuration document.
pub const SERVER_NAMESPACE: &str = "http://schemas.autodesk.com/amc/2020/06";

const SERVER_ROOT: &str = "amc";

/// Accepted listening ports: registered and dynamic, never well-known.
pub const PORT_RANGE: std::ops::RangeInclusive<u32> = 0x0400..=0xBFFF;

// ─────────────────────────────────────────────────────────────────────────────
// XML shape
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ServerConfigXml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(default)]
    server: ServerXml,
    #[serde(default)]
    data: DataXml,
    #[serde(default)]
    defaultpackage: DefaultPackageXml,
}

#[derive(Debug, Default, Deserialize)]
struct ServerXml {
    #[serde(rename = "@hostname", default)]
    hostname: String,
    #[serde(rename = "@port", default)]
    port: String,
}

#[derive(Debug, Default, Deserialize)]
struct DataXml {
    #[serde(rename = "@directory", default)]
    directory: String,
    #[serde(rename = "@database", default)]
    database: String,
    #[serde(rename = "@sqlitedb", default)]
    sqlitedb: String,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultPackageXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@githash", default)]
    githash: Option<String>,
    #[serde(rename = "@xmlsha2", default)]
    xmlsha2: Option<String>,
    #[serde(rename = "@sha256", default)]
    sha256: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Validated server configuration. Built once at startup, read-only after.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub data_directory: PathBuf,
    pub database: DatabaseType,
    /// `<data directory>/<sqlite file>`
    pub connection_string: String,
    /// Build name from the package manifest
    pub package_name: String,
    pub package_manifest: PathBuf,
    pub package_config: PathBuf,
    pub client_bundle: PathBuf,
    pub libraries: LibraryRegistry,
    /// Informational, never verified
    pub git_hash: Option<String>,
    /// Informational, never verified
    pub package_checksum: Option<String>,
}

impl ServerConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            hostname: self.hostname.clone(),
            port: self.port,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigResolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves configuration files relative to a base directory.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    base_dir: PathBuf,
}

impl ConfigResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Resolve against the process working directory.
    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute, normalised form of `path`.
    pub fn absolutize(&self, path: impl AsRef<Path>) -> PathBuf {
        absolutize(&self.base_dir, path)
    }

    /// Load and validate the server configuration at `config_file` together
    /// with the package manifest it references.
    pub fn resolve(&self, config_file: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
        let config_file = self.absolutize(config_file);
        let root: ServerConfigXml = read_xml(&config_file, SERVER_ROOT)?;

        if root.xmlns != SERVER_NAMESPACE {
            return Err(ConfigError::Namespace {
                path: config_file,
                expected: SERVER_NAMESPACE,
                found: root.xmlns,
            });
        }

        let server = root.server;
        if server.hostname.is_empty() {
            return Err(ConfigError::EmptyField("server@hostname"));
        }
        let port = parse_port(&server.port)?;

        let data = root.data;
        if data.directory.is_empty() {
            return Err(ConfigError::EmptyField("data@directory"));
        }
        let data_directory = self.absolutize(&data.directory);
        if !data_directory.is_dir() {
            return Err(ConfigError::MissingDirectory(data_directory));
        }

        let database: DatabaseType = data
            .database
            .parse()
            .map_err(ConfigError::UnsupportedDatabase)?;
        if data.sqlitedb.is_empty() {
            return Err(ConfigError::EmptyField("data@sqlitedb"));
        }
        let connection_string = data_directory
            .join(&data.sqlitedb)
            .to_string_lossy()
            .into_owned();

        let package = root.defaultpackage;
        if package.name.is_empty() {
            return Err(ConfigError::EmptyField("defaultpackage@name"));
        }
        let package_manifest = self.absolutize(&package.name);
        let manifest = PackageManifest::load(&package_manifest, &self.base_dir)?;

        let libraries = LibraryRegistry::from_descriptors(&manifest.libraries, &self.base_dir)?;
        libraries.require(CORE_LIBRARY)?;
        libraries.require(DATAMODEL_LIBRARY)?;

        debug!(
            config = %config_file.display(),
            package = %manifest.name,
            libraries = libraries.len(),
            "server configuration resolved"
        );

        Ok(ServerConfig {
            hostname: server.hostname,
            port,
            data_directory,
            database,
            connection_string,
            package_name: manifest.name,
            package_manifest,
            package_config: manifest.configuration,
            client_bundle: manifest.core_client,
            libraries,
            git_hash: package.githash,
            package_checksum: package.sha256.or(package.xmlsha2),
        })
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    let port: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPort(raw.to_string()))?;
    if !PORT_RANGE.contains(&port) {
        return Err(ConfigError::PortOutOfRange(port));
    }
    u16::try_from(port).map_err(|_| ConfigError::PortOutOfRange(port))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Read `path` and deserialize it, requiring the document element to be `root`.
pub(crate) fn read_xml<T: DeserializeOwned>(
    path: &Path,
    root: &'static str,
) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(found) = root_element(&text).filter(|found| found != root) {
        return Err(ConfigError::RootElement {
            path: path.to_path_buf(),
            expected: root,
            found,
        });
    }
    quick_xml::de::from_str(&text).map_err(|source| ConfigError::Xml {
        path: path.to_path_buf(),
        source,
    })
}

/// Name of the first element in `text`. Malformed input yields `None` and is
/// left for the deserializer to report.
fn root_element(text: &str) -> Option<String> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Join `path` onto `base` unless it is already absolute, then normalise.
pub(crate) fn absolutize(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Lexically remove `.` and `..` components. `..` never climbs above the root.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }
    components.iter().collect()
}
