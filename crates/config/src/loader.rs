//! Parse and load mapping files.

use std::{fs, path::Path};

use giftkey_protocol::MappingSpec;

use crate::{Error, Mapping};

/// A mapping file as loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedMapping {
    /// The raw mapping, echoed to observers.
    pub spec: MappingSpec,
    /// The resolved table.
    pub mapping: Mapping,
}

/// Parse and strictly validate a mapping document.
pub fn load_mapping_from_str(source: &str, path: Option<&Path>) -> Result<LoadedMapping, Error> {
    let spec: MappingSpec =
        serde_json::from_str(source).map_err(|e| Error::from_json(&e, source, path))?;
    let mapping = Mapping::try_from_spec(&spec).map_err(|e| match path {
        Some(p) => e.with_path(p),
        None => e,
    })?;
    Ok(LoadedMapping { spec, mapping })
}

/// Load a mapping JSON file at `path`.
pub fn load_mapping_from_path(path: &Path) -> Result<LoadedMapping, Error> {
    let source = fs::read_to_string(path).map_err(|e| Error::Read {
        path: Some(path.to_path_buf()),
        message: e.to_string(),
    })?;
    load_mapping_from_str(&source, Some(path))
}
