use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 8192;

/// SHA-256 of everything readable from `reader`, as lowercase hex.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Content fingerprint of a file.
///
/// Returns `None` when the file cannot be read (missing, permission denied,
/// locked). Callers treat that as "cannot dedup", not as a fatal error.
pub fn hash_file(path: &Path) -> Option<String> {
    let result = File::open(path).and_then(|file| hash_reader(BufReader::new(file)));

    match result {
        Ok(hash) => Some(hash),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Content hash unavailable");
            None
        }
    }
}

/// Hash many files on the current rayon pool. Output order matches input order.
pub fn hash_files(paths: &[PathBuf]) -> Vec<Option<String>> {
    paths.par_iter().map(|path| hash_file(path)).collect()
}
