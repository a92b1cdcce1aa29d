//! Reads a configuration file together with the files it includes.
//!
//! Only the top-level file may carry `include`, either one path or a list of
//! paths relative to it. Each top-level table must come from exactly one
//! file; reading the same file twice is treated as a circular include.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const INCLUDE_KEY: &str = "include";

/// Loads `path` and its includes into one validated configuration.
pub(crate) async fn load(path: &Path) -> Result<Config, ConfigError> {
	let mut sources = Sources::default();
	let mut root = sources.read(path).await?;
	let includes = take_includes(&mut root)?;
	sources.claim_sections(&root, path)?;

	let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
	for include in includes {
		let file = base_dir.join(include);
		let table = sources.read(&file).await?;
		if table.contains_key(INCLUDE_KEY) {
			return Err(ConfigError::Validation(format!(
				"{} may not include further files",
				file.display()
			)));
		}
		sources.claim_sections(&table, &file)?;
		root.extend(table);
	}

	let merged = toml::to_string(&root)
		.map_err(|e| ConfigError::Parse(format!("Failed to merge included files: {}", e)))?;
	let config: Config = toml::from_str(&merged)?;
	config.validate()?;
	Ok(config)
}

/// Files read so far and the file that owns each top-level section.
#[derive(Default)]
struct Sources {
	read: HashSet<PathBuf>,
	owners: HashMap<String, PathBuf>,
}

impl Sources {
	async fn read(&mut self, path: &Path) -> Result<toml::Table, ConfigError> {
		let canonical = match path.canonicalize() {
			Ok(canonical) => canonical,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::Io(std::io::Error::new(
					std::io::ErrorKind::NotFound,
					format!("Configuration file not found: {}", path.display()),
				)));
			},
			Err(e) => return Err(e.into()),
		};
		if !self.read.insert(canonical) {
			return Err(ConfigError::Validation(format!(
				"Circular include: {} was already loaded",
				path.display()
			)));
		}

		let raw = tokio::fs::read_to_string(path).await?;
		Ok(toml::from_str(&resolve_env_vars(&raw)?)?)
	}

	fn claim_sections(&mut self, table: &toml::Table, file: &Path) -> Result<(), ConfigError> {
		for section in table.keys() {
			if let Some(owner) = self.owners.get(section) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' in {} and {}",
					section,
					owner.display(),
					file.display()
				)));
			}
			self.owners.insert(section.clone(), file.to_path_buf());
		}
		Ok(())
	}
}

/// Removes the `include` entry and returns the paths it names.
fn take_includes(root: &mut toml::Table) -> Result<Vec<PathBuf>, ConfigError> {
	match root.remove(INCLUDE_KEY) {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(paths)) => paths
			.into_iter()
			.map(|path| match path {
				toml::Value::String(path) => Ok(PathBuf::from(path)),
				_ => Err(ConfigError::Validation(
					"include entries must be strings".into(),
				)),
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"include must be a path or a list of paths".into(),
		)),
	}
}
