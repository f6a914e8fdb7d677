use std::io::{Cursor, Read, Write};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{DubsplitError, Result};

use super::SegmentFile;

/// Anything smaller almost certainly means the encoder silently failed.
pub const MIN_ARCHIVE_SIZE: usize = 1000;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "aac"];

/// Package segment files into one ZIP, entries in the given order.
///
/// Encoded audio is already compressed, so entries are stored as-is.
pub fn build_archive(files: &[SegmentFile]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    for file in files {
        writer.start_file(file.name.as_str(), options)?;
        writer.write_all(&file.data)?;
    }

    let bytes = writer.finish()?.into_inner();
    debug!("Archive: {} entries, {} bytes", files.len(), bytes.len());

    if bytes.len() < MIN_ARCHIVE_SIZE {
        return Err(DubsplitError::ArchiveTooSmall { size: bytes.len() });
    }

    Ok(bytes)
}

/// Unpack the audio entries of an archive, sorted by file name.
///
/// Directory prefixes are stripped and non-audio entries ignored.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<SegmentFile>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let name = entry
            .name()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let is_audio = name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if !is_audio {
            debug!("Ignoring archive entry {}", entry.name());
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        files.push(SegmentFile::new(name, data));
    }

    if files.is_empty() {
        warn!("Archive contains no audio entries");
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
