//! Reading finished layers back.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::EntryType;

use crate::error::{ImgforgeError, Result, SbomErrorKind};
use crate::model::{Digest, LayerArtifact};
use crate::utils::{sha256_file, sha256_reader};

/// A regular file found in a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFile {
    /// Archive path without a leading `/`
    pub path: String,
    pub size: u64,
    pub digest: Digest,
}

fn read_back_err(path: &Path, err: impl std::fmt::Display) -> ImgforgeError {
    ImgforgeError::sbom(
        format!("reading {}", path.display()),
        SbomErrorKind::LayerReadBack(err.to_string()),
    )
}

/// Verify a layer against its recorded digest and list its regular files.
///
/// The compressed file must hash to `layer.digest`, otherwise the layer on
/// disk is not the one the manifest describes.
pub fn read_layer_files(layer: &LayerArtifact) -> Result<Vec<LayerFile>> {
    let actual = sha256_file(&layer.path).map_err(|e| read_back_err(&layer.path, e))?;
    if actual != layer.digest {
        return Err(ImgforgeError::sbom(
            format!("verifying {}", layer.path.display()),
            SbomErrorKind::DigestMismatch {
                expected: layer.digest.to_string(),
                actual: actual.to_string(),
            },
        ));
    }

    let file = File::open(&layer.path).map_err(|e| read_back_err(&layer.path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut files = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| read_back_err(&layer.path, e))?
    {
        let entry = entry.map_err(|e| read_back_err(&layer.path, e))?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| read_back_err(&layer.path, e))?
            .to_string_lossy()
            .trim_start_matches('/')
            .to_string();
        let size = entry.size();
        let digest = sha256_reader(entry).map_err(|e| read_back_err(&layer.path, e))?;
        files.push(LayerFile { path, size, digest });
    }
    Ok(files)
}
