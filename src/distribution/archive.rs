use crate::errors::{DistributionError, Result};
use std::{
   fs::{self, File},
   io::{self, BufReader},
   path::Path,
};

/// Archive extensions accepted for downloaded files, without the leading dot.
pub const SUPPORTED_ARCHIVE_EXTENSIONS: [&str; 6] =
   ["zip", "tar", "tgz", "tar.gz", "tar.xz", "tar.bz2"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
   Zip,
   Tar,
   TarGz,
   TarXz,
   TarBz2,
}

impl ArchiveFormat {
   pub fn detect(path: &Path) -> Option<Self> {
      let name = path.file_name()?.to_str()?.to_ascii_lowercase();
      // Longest suffixes first so "tar.gz" wins over "gz".
      if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
         Some(Self::TarGz)
      } else if name.ends_with(".tar.xz") {
         Some(Self::TarXz)
      } else if name.ends_with(".tar.bz2") {
         Some(Self::TarBz2)
      } else if name.ends_with(".tar") {
         Some(Self::Tar)
      } else if name.ends_with(".zip") {
         Some(Self::Zip)
      } else {
         None
      }
   }
}

pub fn has_supported_extension(filename: &str) -> bool {
   let lower = filename.to_ascii_lowercase();
   SUPPORTED_ARCHIVE_EXTENSIONS
      .iter()
      .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

/// Extract the whole archive into `destination_dir`, leaving the archive in place.
pub fn extract(archive_path: &Path, destination_dir: &Path) -> Result<()> {
   let format = ArchiveFormat::detect(archive_path)
      .ok_or_else(|| DistributionError::UnsupportedArchive(archive_path.to_path_buf()))?;

   log::info!("Extracting {:?} to {:?}", archive_path, destination_dir);
   fs::create_dir_all(destination_dir)?;

   let result = match format {
      ArchiveFormat::Zip => extract_zip(archive_path, destination_dir),
      ArchiveFormat::Tar => open(archive_path).and_then(|f| unpack_tar(f, destination_dir)),
      ArchiveFormat::TarGz => open(archive_path)
         .and_then(|f| unpack_tar(flate2::read::GzDecoder::new(f), destination_dir)),
      ArchiveFormat::TarXz => open(archive_path)
         .and_then(|f| unpack_tar(xz2::read::XzDecoder::new(f), destination_dir)),
      ArchiveFormat::TarBz2 => open(archive_path)
         .and_then(|f| unpack_tar(bzip2::read::BzDecoder::new(f), destination_dir)),
   };

   result.map_err(|reason| DistributionError::ArchiveCorrupt {
      path: archive_path.to_path_buf(),
      reason,
   })
}

/// Extract the archive, then delete it.
pub fn unpack_and_discard(archive_path: &Path, destination_dir: &Path) -> Result<()> {
   extract(archive_path, destination_dir)?;
   fs::remove_file(archive_path)?;
   log::debug!("Removed archive {:?}", archive_path);
   Ok(())
}

fn open(path: &Path) -> std::result::Result<BufReader<File>, String> {
   File::open(path)
      .map(BufReader::new)
      .map_err(|e| e.to_string())
}

fn unpack_tar<R: io::Read>(reader: R, destination_dir: &Path) -> std::result::Result<(), String> {
   let mut archive = tar::Archive::new(reader);
   archive.unpack(destination_dir).map_err(|e| e.to_string())
}

fn extract_zip(archive_path: &Path, destination_dir: &Path) -> std::result::Result<(), String> {
   let file = open(archive_path)?;
   let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;

   for i in 0..archive.len() {
      let mut entry = archive.by_index(i).map_err(|e| e.to_string())?;
      let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
         log::warn!("Skipping zip entry with unsafe path: {}", entry.name());
         continue;
      };
      let outpath = destination_dir.join(relative);

      if entry.is_dir() {
         fs::create_dir_all(&outpath).map_err(|e| e.to_string())?;
         continue;
      }

      if let Some(parent) = outpath.parent() {
         fs::create_dir_all(parent).map_err(|e| e.to_string())?;
      }
      let mut outfile = File::create(&outpath).map_err(|e| e.to_string())?;
      io::copy(&mut entry, &mut outfile).map_err(|e| e.to_string())?;

      #[cfg(unix)]
      {
         use std::os::unix::fs::PermissionsExt;
         if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))
               .map_err(|e| e.to_string())?;
         }
      }
   }

   Ok(())
}
