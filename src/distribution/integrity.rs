use crate::errors::{DistributionError, Result};
use sha2::{Digest, Sha256};
use std::{
   fmt,
   fs::File,
   io::{BufReader, Read},
   path::Path,
};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Digest algorithms the server uses for distributed archives.
///
/// Addons are published with SHA-256, dependency packages with MD5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
   Md5,
   Sha256,
}

impl HashAlgorithm {
   pub fn as_str(self) -> &'static str {
      match self {
         HashAlgorithm::Md5 => "md5",
         HashAlgorithm::Sha256 => "sha256",
      }
   }
}

impl fmt::Display for HashAlgorithm {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Hex digest of a file, read in chunks.
pub fn compute_hash(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
   let mut reader = BufReader::new(File::open(path)?);
   let mut buffer = vec![0u8; READ_CHUNK_SIZE];

   match algorithm {
      HashAlgorithm::Sha256 => {
         let mut hasher = Sha256::new();
         loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
               break;
            }
            hasher.update(&buffer[..read]);
         }
         Ok(format!("{:x}", hasher.finalize()))
      }
      HashAlgorithm::Md5 => {
         let mut context = md5::Context::new();
         loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
               break;
            }
            context.consume(&buffer[..read]);
         }
         Ok(format!("{:x}", context.compute()))
      }
   }
}

pub fn verify_hash(path: &Path, expected: &str, algorithm: HashAlgorithm) -> Result<()> {
   if !path.exists() {
      return Err(DistributionError::SourceUnavailable(format!(
         "{:?} doesn't exist",
         path
      )));
   }

   let actual = compute_hash(path, algorithm)?;
   if !actual.eq_ignore_ascii_case(expected.trim()) {
      return Err(DistributionError::IntegrityMismatch {
         path: path.to_path_buf(),
         algorithm: algorithm.to_string(),
         expected: expected.to_string(),
         actual,
      });
   }

   log::debug!("{} verified for {:?}", algorithm, path);
   Ok(())
}
