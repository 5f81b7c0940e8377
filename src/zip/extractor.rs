use log::debug;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::DeflateDecoder;

use crate::error::{Result, ZipError};

use super::structures::{CompressionMethod, LFH_SIZE, LocalFileHeader, ZipEntryDescriptor};

/// Resolve where `file_name` lands under `dest_dir`.
///
/// Names that are absolute or climb out of `dest_dir` are rejected. A name
/// containing `/` maps to nested directories.
pub fn target_path(dest_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let relative = Path::new(file_name);
    let mut target = dest_dir.to_path_buf();

    for component in relative.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ZipError::UnsafePath(file_name.to_string()));
            }
        }
    }

    if target == dest_dir && !file_name.is_empty() && !file_name.ends_with('/') {
        return Err(ZipError::UnsafePath(file_name.to_string()));
    }

    Ok(target)
}

/// CRC-32 of a file already on disk.
pub fn file_crc32(path: &Path) -> io::Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Writer that checksums and counts everything passing through it.
struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Extracts entries out of one downloaded span.
///
/// The span file holds archive bytes `[start_offset, start_offset + len)`;
/// each entry's local header is found at
/// `entry.local_header_offset - start_offset`.
pub struct SpanExtractor {
    file: File,
    len: u64,
    start_offset: u64,
}

impl SpanExtractor {
    pub fn open(span_file: &Path, start_offset: u64) -> Result<Self> {
        let file = File::open(span_file)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            start_offset,
        })
    }

    /// Locate the entry's data within the span and return `(data_offset, header)`.
    ///
    /// Fails when the downloaded bytes stop before the entry's data ends, which
    /// happens when the local header is larger than the merger's size guess.
    fn locate(&mut self, entry: &ZipEntryDescriptor) -> Result<(u64, LocalFileHeader)> {
        let rel = entry
            .local_header_offset
            .checked_sub(self.start_offset)
            .ok_or_else(|| {
                ZipError::format(format!(
                    "{} starts at {} before its span at {}",
                    entry.file_name, entry.local_header_offset, self.start_offset
                ))
            })?;

        if rel + LFH_SIZE as u64 > self.len {
            return Err(self.truncated(entry, rel + LFH_SIZE as u64));
        }

        let mut header_buf = [0u8; LFH_SIZE];
        self.file.seek(SeekFrom::Start(rel))?;
        self.file.read_exact(&mut header_buf)?;
        let header = LocalFileHeader::from_bytes(&header_buf).map_err(|e| {
            ZipError::format(format!("{}: {}", entry.file_name, e))
        })?;

        if header.compression_method != entry.compression_method.as_u16() {
            return Err(ZipError::format(format!(
                "{}: local header compression method {} disagrees with central directory {}",
                entry.file_name,
                header.compression_method,
                entry.compression_method.as_u16()
            )));
        }

        let data_offset = rel + header.header_len();
        let data_end = data_offset.saturating_add(entry.compressed_size);
        if data_end > self.len {
            return Err(self.truncated(entry, data_end));
        }

        Ok((data_offset, header))
    }

    fn truncated(&self, entry: &ZipEntryDescriptor, needed: u64) -> ZipError {
        ZipError::format(format!(
            "span at offset {} holds {} bytes but {} needs {}; raise the local header size guess",
            self.start_offset, self.len, entry.file_name, needed
        ))
    }

    /// Extract `entry` to `target`, verifying size and CRC.
    ///
    /// Returns the number of bytes written. A partially written target is
    /// removed on failure.
    pub fn extract_to_file(&mut self, entry: &ZipEntryDescriptor, target: &Path) -> Result<u64> {
        if entry.is_directory() {
            fs::create_dir_all(target).map_err(|e| ZipError::extraction(&entry.file_name, e))?;
            return Ok(0);
        }

        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(ZipError::Unsupported(format!(
                "compression method {} for {}",
                method, entry.file_name
            )));
        }

        let (data_offset, _header) = self.locate(entry)?;

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ZipError::extraction(&entry.file_name, e))?;
            }
        }

        let result = self.write_entry(entry, data_offset, target);
        if result.is_err() {
            let _ = fs::remove_file(target);
        }
        result
    }

    fn write_entry(
        &mut self,
        entry: &ZipEntryDescriptor,
        data_offset: u64,
        target: &Path,
    ) -> Result<u64> {
        let name = entry.file_name.as_str();

        self.file
            .seek(SeekFrom::Start(data_offset))
            .map_err(|e| ZipError::extraction(name, e))?;
        let data = (&self.file).take(entry.compressed_size);

        let out = File::create(target).map_err(|e| ZipError::extraction(name, e))?;
        let mut writer = CrcWriter {
            inner: BufWriter::new(out),
            hasher: crc32fast::Hasher::new(),
            written: 0,
        };

        match entry.compression_method {
            CompressionMethod::Stored => {
                let mut data = data;
                io::copy(&mut data, &mut writer).map_err(|e| ZipError::extraction(name, e))?;
            }
            CompressionMethod::Deflated => {
                let mut decoder = DeflateDecoder::new(data);
                io::copy(&mut decoder, &mut writer).map_err(|e| ZipError::extraction(name, e))?;
            }
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::Unsupported(format!("compression method {}", method)));
            }
        }
        writer.flush().map_err(|e| ZipError::extraction(name, e))?;

        if writer.written != entry.uncompressed_size {
            return Err(ZipError::format(format!(
                "{} inflated to {} bytes, expected {}",
                name, writer.written, entry.uncompressed_size
            )));
        }

        let actual = writer.hasher.finalize();
        if actual != entry.crc {
            return Err(ZipError::CrcMismatch {
                entry: entry.file_name.clone(),
                expected: entry.crc,
                actual,
            });
        }

        debug!("Extracted {} ({} bytes)", name, writer.written);
        Ok(writer.written)
    }
}
