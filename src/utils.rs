use crate::errors::Result;
use serde::{Serialize, de::DeserializeOwned};
use std::{fs, io::Write, path::Path};

/// Read a JSON file, falling back to the default when it is missing or does
/// not decode. I/O errors other than "not found" still propagate.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
   let raw = match fs::read_to_string(path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
      Err(e) => return Err(e.into()),
   };

   match serde_json::from_str(&raw) {
      Ok(value) => Ok(value),
      Err(e) => {
         log::warn!("Resetting unreadable JSON file {:?}: {}", path, e);
         Ok(T::default())
      }
   }
}

/// Write pretty JSON through a temp file in the same directory, then rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
   let parent = path
      .parent()
      .filter(|dir| !dir.as_os_str().is_empty())
      .unwrap_or_else(|| Path::new("."));
   fs::create_dir_all(parent)?;

   let mut encoded = serde_json::to_string_pretty(value)?;
   encoded.push('\n');

   let mut temp = tempfile::NamedTempFile::new_in(parent)?;
   temp.write_all(encoded.as_bytes())?;
   temp.persist(path).map_err(|e| e.error)?;
   Ok(())
}
