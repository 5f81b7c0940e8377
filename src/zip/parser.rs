//! Parsing of the archive trailer and central directory.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) inside the downloaded tail
//! 2. If ZIP64, follow the locator to the ZIP64 EOCD for 64-bit fields
//! 3. Parse the separately downloaded Central Directory into descriptors
//!
//! Both parsers are pure functions over bytes that were already fetched, so a
//! listing costs exactly two ranged requests.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Result, ZipError};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
pub const MAX_COMMENT_SIZE: u64 = 65535;

/// Default number of trailing bytes fetched to locate the EOCD.
///
/// Large enough to hold an EOCD with a maximum-length comment.
pub const MAX_LOOKBACK: u64 = MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64;

/// Locates the Central Directory from the tail of an archive.
pub struct EndOfCentralDirectoryParser;

impl EndOfCentralDirectoryParser {
    /// Parse the EOCD (and ZIP64 EOCD when `use_zip64` is set) out of `tail`.
    ///
    /// `tail` must hold the last `tail.len()` bytes of an archive that is
    /// `archive_size` bytes long.
    pub fn parse(tail: &[u8], archive_size: u64, use_zip64: bool) -> Result<EndCentralDirectoryInfo> {
        let tail_len = tail.len() as u64;
        if tail_len > archive_size {
            return Err(ZipError::format(format!(
                "tail of {} bytes is larger than the archive ({} bytes)",
                tail_len, archive_size
            )));
        }
        let tail_start = archive_size - tail_len;

        let eocd_pos = Self::find_eocd(tail)
            .ok_or_else(|| ZipError::format("end of central directory signature not found"))?;
        let eocd = EndOfCentralDirectory::from_bytes(&tail[eocd_pos..])?;

        let mut info = EndCentralDirectoryInfo {
            central_dir_offset: eocd.cd_offset as u64,
            central_dir_size: eocd.cd_size as u64,
            entry_count: eocd.total_entries as u64,
            eocd_offset: tail_start + eocd_pos as u64,
            is_zip64: false,
        };

        if use_zip64 {
            // The ZIP64 EOCD Locator is located immediately before the regular EOCD
            let has_locator = eocd_pos >= Zip64EOCDLocator::SIZE
                && &tail[eocd_pos - Zip64EOCDLocator::SIZE..eocd_pos - Zip64EOCDLocator::SIZE + 4]
                    == Zip64EOCDLocator::SIGNATURE;

            if has_locator {
                let locator =
                    Zip64EOCDLocator::from_bytes(&tail[eocd_pos - Zip64EOCDLocator::SIZE..])?;
                let rel = locator
                    .eocd64_offset
                    .checked_sub(tail_start)
                    .filter(|rel| *rel < tail_len)
                    .ok_or_else(|| {
                        ZipError::format(format!(
                            "ZIP64 end of central directory at offset {} lies outside the downloaded tail",
                            locator.eocd64_offset
                        ))
                    })?;
                let eocd64 = Zip64EOCD::from_bytes(&tail[rel as usize..])?;

                info.central_dir_offset = eocd64.cd_offset;
                info.central_dir_size = eocd64.cd_size;
                info.entry_count = eocd64.total_entries;
                info.is_zip64 = true;
            } else if eocd.is_zip64() {
                return Err(ZipError::format(
                    "end of central directory requires ZIP64 but no ZIP64 locator was found",
                ));
            }
        }

        let cd_end = info
            .central_dir_offset
            .checked_add(info.central_dir_size)
            .ok_or_else(|| ZipError::format("central directory bounds overflow"))?;
        if cd_end > archive_size {
            return Err(ZipError::format(format!(
                "central directory [{}, {}) exceeds archive size {}",
                info.central_dir_offset, cd_end, archive_size
            )));
        }

        Ok(info)
    }

    /// Search backwards for an EOCD whose comment fits in the remaining bytes.
    fn find_eocd(tail: &[u8]) -> Option<usize> {
        let size = EndOfCentralDirectory::SIZE;
        if tail.len() < size {
            return None;
        }

        (0..=tail.len() - size).rev().find(|&i| {
            if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                return false;
            }
            let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
            i + size + comment_len <= tail.len()
        })
    }
}

/// Parses Central Directory File Headers into [`ZipEntryDescriptor`]s.
pub struct CentralDirectoryParser;

impl CentralDirectoryParser {
    /// Parse exactly `eocd.entry_count` records out of `data`.
    ///
    /// `data` must be the full central directory, i.e. `eocd.central_dir_size`
    /// bytes starting at `eocd.central_dir_offset`.
    pub fn parse(
        data: &[u8],
        eocd: &EndCentralDirectoryInfo,
        use_zip64: bool,
    ) -> Result<Vec<ZipEntryDescriptor>> {
        if data.len() as u64 != eocd.central_dir_size {
            return Err(ZipError::format(format!(
                "central directory is {} bytes but {} were downloaded",
                eocd.central_dir_size,
                data.len()
            )));
        }

        let capacity = eocd.entry_count.min((data.len() / CDFH_MIN_SIZE) as u64) as usize;
        let mut entries = Vec::with_capacity(capacity);
        let mut cursor = Cursor::new(data);

        for index in 0..eocd.entry_count {
            let entry = Self::parse_cdfh(&mut cursor, use_zip64).map_err(|e| match e {
                ZipError::Format(msg) => ZipError::format(format!(
                    "central directory record {} of {}: {}",
                    index + 1,
                    eocd.entry_count,
                    msg
                )),
                other => other,
            })?;
            entries.push(entry);
        }

        if cursor.position() != data.len() as u64 {
            return Err(ZipError::format(format!(
                "central directory holds {} bytes after its {} declared records",
                data.len() as u64 - cursor.position(),
                eocd.entry_count
            )));
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    fn parse_cdfh(cursor: &mut Cursor<&[u8]>, use_zip64: bool) -> Result<ZipEntryDescriptor> {
        let err = |_: std::io::Error| ZipError::format("truncated central directory record");

        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig).map_err(err)?;
        if sig != CDFH_SIGNATURE {
            return Err(ZipError::format("invalid central directory file header signature"));
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _version_needed = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _flags = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let compression_method = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let crc = cursor.read_u32::<LittleEndian>().map_err(err)?;
        let compressed_size = cursor.read_u32::<LittleEndian>().map_err(err)?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(err)?;
        let file_name_length = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let file_comment_length = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>().map_err(err)?;
        let _external_attrs = cursor.read_u32::<LittleEndian>().map_err(err)?;
        let local_header_offset = cursor.read_u32::<LittleEndian>().map_err(err)?;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes).map_err(err)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();

        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra).map_err(err)?;

        let mut comment = vec![0u8; file_comment_length as usize];
        cursor.read_exact(&mut comment).map_err(err)?;

        let mut entry = ZipEntryDescriptor {
            file_name,
            crc,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            local_header_offset: local_header_offset as u64,
            compression_method: CompressionMethod::from_u16(compression_method),
            is_zip64: false,
        };

        let needs_zip64 = uncompressed_size == ZIP64_SENTINEL_32
            || compressed_size == ZIP64_SENTINEL_32
            || local_header_offset == ZIP64_SENTINEL_32;

        if use_zip64 && needs_zip64 {
            Self::apply_zip64_extra(&mut entry, &extra)?;
        }

        Ok(entry)
    }

    /// Substitute sentineled 32-bit fields with values from the ZIP64 extra field.
    ///
    /// Values appear in a fixed order and only for the fields that were
    /// sentineled in the fixed header.
    fn apply_zip64_extra(entry: &mut ZipEntryDescriptor, extra: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(extra);

        while cursor.position() + 4 <= extra.len() as u64 {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()? as u64;
            let field_end = (cursor.position() + field_size).min(extra.len() as u64);

            if header_id != ZIP64_EXTRA_FIELD_ID {
                cursor.set_position(field_end);
                continue;
            }

            let sentinel = ZIP64_SENTINEL_32 as u64;
            if entry.uncompressed_size == sentinel {
                entry.uncompressed_size =
                    read_zip64_value(&mut cursor, field_end, &entry.file_name, "uncompressed size")?;
            }
            if entry.compressed_size == sentinel {
                entry.compressed_size =
                    read_zip64_value(&mut cursor, field_end, &entry.file_name, "compressed size")?;
            }
            if entry.local_header_offset == sentinel {
                entry.local_header_offset = read_zip64_value(
                    &mut cursor,
                    field_end,
                    &entry.file_name,
                    "local header offset",
                )?;
            }
            entry.is_zip64 = true;
            return Ok(());
        }

        Err(ZipError::format(format!(
            "{} has ZIP64 sentinel fields but no ZIP64 extra field",
            entry.file_name
        )))
    }
}

fn read_zip64_value(
    cursor: &mut Cursor<&[u8]>,
    field_end: u64,
    file_name: &str,
    field: &str,
) -> Result<u64> {
    if cursor.position() + 8 > field_end {
        return Err(ZipError::format(format!(
            "ZIP64 extra field of {} is missing the {}",
            file_name, field
        )));
    }
    Ok(cursor.read_u64::<LittleEndian>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FILE_NAME: &str = "test.txt";
    const TEST_FILE_CONTENT: &str = "test";
    const TEST_FILE_COMMENT: &str = "comment";
    const TEST_FILE_CRC32: u32 = 22222;
    const ZIP64_LOCAL_HEADER_OFFSET: u64 = 100;

    fn central_directory_record(zip64: bool, extra: &[u8]) -> Vec<u8> {
        let size = if zip64 { ZIP64_SENTINEL_32 } else { TEST_FILE_CONTENT.len() as u32 };
        let offset = if zip64 { ZIP64_SENTINEL_32 } else { 0 };

        let mut buf = Vec::new();
        buf.extend_from_slice(CDFH_SIGNATURE);
        buf.extend_from_slice(&[0u8; 6]); // version made by, version needed, flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // compression method (store)
        buf.extend_from_slice(&[0u8; 4]); // last mod time and date
        buf.extend_from_slice(&TEST_FILE_CRC32.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes()); // compressed size
        buf.extend_from_slice(&size.to_le_bytes()); // uncompressed size
        buf.extend_from_slice(&(TEST_FILE_NAME.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(TEST_FILE_COMMENT.len() as u16).to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]); // disk start, internal and external attributes
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(TEST_FILE_NAME.as_bytes());
        buf.extend_from_slice(extra);
        buf.extend_from_slice(TEST_FILE_COMMENT.as_bytes());
        buf
    }

    fn zip64_extra_field() -> Vec<u8> {
        let mut extra = Vec::new();
        extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
        extra.extend_from_slice(&28u16.to_le_bytes());
        extra.extend_from_slice(&(TEST_FILE_CONTENT.len() as u64).to_le_bytes()); // uncompressed
        extra.extend_from_slice(&(TEST_FILE_CONTENT.len() as u64).to_le_bytes()); // compressed
        extra.extend_from_slice(&ZIP64_LOCAL_HEADER_OFFSET.to_le_bytes());
        extra.extend_from_slice(&0u32.to_le_bytes()); // disk start number
        extra
    }

    fn eocd_info(data: &[u8], entry_count: u64) -> EndCentralDirectoryInfo {
        EndCentralDirectoryInfo {
            central_dir_offset: 0,
            central_dir_size: data.len() as u64,
            entry_count,
            eocd_offset: data.len() as u64,
            is_zip64: false,
        }
    }

    fn eocd_record(entries: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        buf.extend_from_slice(&[0u8; 4]); // disk numbers
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        buf.extend_from_slice(comment);
        buf
    }

    #[test]
    fn test_central_directory_record() {
        let data = central_directory_record(false, &[]);

        let entries = CentralDirectoryParser::parse(&data, &eocd_info(&data, 1), false).unwrap();

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.compression_method, CompressionMethod::Stored);
        assert_eq!(entry.crc, TEST_FILE_CRC32);
        assert_eq!(entry.compressed_size, TEST_FILE_CONTENT.len() as u64);
        assert_eq!(entry.uncompressed_size, TEST_FILE_CONTENT.len() as u64);
        assert_eq!(entry.file_name, TEST_FILE_NAME);
        assert_eq!(entry.local_header_offset, 0);
        assert!(!entry.is_zip64);
    }

    #[test]
    fn test_central_directory_record_zip64() {
        let data = central_directory_record(true, &zip64_extra_field());

        let entries = CentralDirectoryParser::parse(&data, &eocd_info(&data, 1), true).unwrap();

        let entry = &entries[0];
        assert_eq!(entry.uncompressed_size, TEST_FILE_CONTENT.len() as u64);
        assert_eq!(entry.compressed_size, TEST_FILE_CONTENT.len() as u64);
        assert_eq!(entry.local_header_offset, ZIP64_LOCAL_HEADER_OFFSET);
        assert!(entry.is_zip64);
    }

    #[test]
    fn test_central_directory_record_zip64_after_other_extra_field() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0x0011u16.to_le_bytes());
        extra.extend_from_slice(&0u16.to_le_bytes());
        extra.extend_from_slice(&zip64_extra_field());
        let data = central_directory_record(true, &extra);

        let entries = CentralDirectoryParser::parse(&data, &eocd_info(&data, 1), true).unwrap();

        assert_eq!(entries[0].local_header_offset, ZIP64_LOCAL_HEADER_OFFSET);
    }

    #[test]
    fn test_central_directory_record_missing_zip64_field() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0x0002u16.to_le_bytes());
        extra.extend_from_slice(&0u16.to_le_bytes());
        let data = central_directory_record(true, &extra);

        let result = CentralDirectoryParser::parse(&data, &eocd_info(&data, 1), true);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    #[test]
    fn test_central_directory_without_zip64_keeps_sentinels() {
        let data = central_directory_record(true, &zip64_extra_field());

        let entries = CentralDirectoryParser::parse(&data, &eocd_info(&data, 1), false).unwrap();

        assert_eq!(entries[0].local_header_offset, ZIP64_SENTINEL_32 as u64);
        assert!(!entries[0].is_zip64);
    }

    #[test]
    fn test_central_directory_count_mismatch() {
        let data = central_directory_record(false, &[]);

        let result = CentralDirectoryParser::parse(&data, &eocd_info(&data, 2), false);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    #[test]
    fn test_central_directory_with_undeclared_records() {
        let mut data = central_directory_record(false, &[]);
        data.extend(central_directory_record(false, &[]));

        let result = CentralDirectoryParser::parse(&data, &eocd_info(&data, 1), false);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    #[test]
    fn test_central_directory_size_mismatch() {
        let data = central_directory_record(false, &[]);
        let mut eocd = eocd_info(&data, 1);
        eocd.central_dir_size += 10;

        let result = CentralDirectoryParser::parse(&data, &eocd, false);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    #[test]
    fn test_eocd_with_comment() {
        let mut archive = vec![0u8; 100];
        archive.extend(eocd_record(3, 40, 60, b"archive comment"));
        let size = archive.len() as u64;

        let info = EndOfCentralDirectoryParser::parse(&archive, size, false).unwrap();

        assert_eq!(info.central_dir_offset, 60);
        assert_eq!(info.central_dir_size, 40);
        assert_eq!(info.entry_count, 3);
        assert_eq!(info.eocd_offset, 100);
        assert!(!info.is_zip64);
    }

    #[test]
    fn test_eocd_from_partial_tail() {
        let mut archive = vec![0u8; 1000];
        archive.extend(eocd_record(1, 50, 900, &[]));
        let size = archive.len() as u64;
        let tail = &archive[archive.len() - 100..];

        let info = EndOfCentralDirectoryParser::parse(tail, size, false).unwrap();

        assert_eq!(info.eocd_offset, 1000);
        assert_eq!(info.central_dir_offset, 900);
    }

    #[test]
    fn test_eocd_missing_signature() {
        let data = vec![0u8; 200];

        let result = EndOfCentralDirectoryParser::parse(&data, 200, false);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    #[test]
    fn test_eocd_central_directory_past_end() {
        let archive = eocd_record(1, 50, 900, &[]);
        let size = archive.len() as u64;

        let result = EndOfCentralDirectoryParser::parse(&archive, size, false);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    fn zip64_archive(cd_offset: u64, cd_size: u64, entries: u64) -> Vec<u8> {
        let mut archive = vec![0u8; (cd_offset + cd_size) as usize];
        let eocd64_offset = archive.len() as u64;

        archive.extend_from_slice(Zip64EOCD::SIGNATURE);
        archive.extend_from_slice(&44u64.to_le_bytes()); // size of remaining record
        archive.extend_from_slice(&45u16.to_le_bytes()); // version made by
        archive.extend_from_slice(&45u16.to_le_bytes()); // version needed
        archive.extend_from_slice(&0u32.to_le_bytes()); // disk number
        archive.extend_from_slice(&0u32.to_le_bytes()); // disk with central directory
        archive.extend_from_slice(&entries.to_le_bytes());
        archive.extend_from_slice(&entries.to_le_bytes());
        archive.extend_from_slice(&cd_size.to_le_bytes());
        archive.extend_from_slice(&cd_offset.to_le_bytes());

        archive.extend_from_slice(Zip64EOCDLocator::SIGNATURE);
        archive.extend_from_slice(&0u32.to_le_bytes());
        archive.extend_from_slice(&eocd64_offset.to_le_bytes());
        archive.extend_from_slice(&1u32.to_le_bytes());

        archive.extend(eocd_record(
            ZIP64_SENTINEL_16,
            ZIP64_SENTINEL_32,
            ZIP64_SENTINEL_32,
            &[],
        ));
        archive
    }

    #[test]
    fn test_zip64_eocd_overrides_legacy_fields() {
        let archive = zip64_archive(200, 64, 70_000);
        let size = archive.len() as u64;

        let info = EndOfCentralDirectoryParser::parse(&archive, size, true).unwrap();

        assert!(info.is_zip64);
        assert_eq!(info.central_dir_offset, 200);
        assert_eq!(info.central_dir_size, 64);
        assert_eq!(info.entry_count, 70_000);
    }

    #[test]
    fn test_zip64_eocd_ignored_without_zip64() {
        let archive = zip64_archive(200, 64, 70_000);
        let size = archive.len() as u64;

        // Sentineled legacy fields point far past the archive.
        let result = EndOfCentralDirectoryParser::parse(&archive, size, false);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }

    #[test]
    fn test_zip64_record_outside_tail() {
        let archive = zip64_archive(200, 64, 1);
        let size = archive.len() as u64;
        // Locator and EOCD only; the ZIP64 record itself was not downloaded.
        let tail = &archive[archive.len() - 42..];

        let result = EndOfCentralDirectoryParser::parse(tail, size, true);

        assert!(matches!(result, Err(ZipError::Format(_))));
    }
}
