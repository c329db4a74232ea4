//! Archive extraction.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::GzDecoder;
use sslpack_schema::DownloadKind;

use crate::error::{Error, Result};

pub trait Extractor: Send + Sync {
    /// Unpack `archive` into `dest`, creating `dest` if needed.
    fn extract(&self, archive: &Path, dest: &Path, kind: DownloadKind) -> Result<()>;
}

/// tar+gzip and zip extraction on top of the `tar`, `flate2` and `zip` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest: &Path, kind: DownloadKind) -> Result<()> {
        tracing::debug!("Extracting {} ({kind}) -> {}", archive.display(), dest.display());
        std::fs::create_dir_all(dest).map_err(|e| Error::io_at(dest, e))?;
        match kind {
            DownloadKind::TarGz => extract_tar_gz(archive, dest),
            DownloadKind::Zip => extract_zip(archive, dest),
            DownloadKind::Installer => Err(Error::extraction(
                archive,
                "installers are executed, not extracted",
            )),
        }
    }
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| Error::extraction(archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.unpack(dest).map_err(|e| Error::extraction(archive, e))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| Error::extraction(archive, e))?;
    let mut zip =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| Error::extraction(archive, e))?;
    zip.extract(dest).map_err(|e| Error::extraction(archive, e))
}
