//! Content hashing utilities.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::model::Digest;

/// Stream a reader through SHA-256
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(Digest::from_hasher(hasher))
}

/// SHA-256 of a file's content, read from disk
pub fn sha256_file(path: &Path) -> io::Result<Digest> {
    sha256_reader(File::open(path)?)
}
