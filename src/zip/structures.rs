use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Result, ZipError};

/// Sentinel stored in 16-bit fields whose real value lives in ZIP64 records.
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;
/// Sentinel stored in 32-bit fields whose real value lives in ZIP64 records.
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;
/// Header ID of the ZIP64 extended information extra field.
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> ZipError {
    move |_| ZipError::format(format!("truncated {}", what))
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::format("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let err = truncated("end of central directory record");

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>().map_err(&err)?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().map_err(&err)?,
            disk_entries: cursor.read_u16::<LittleEndian>().map_err(&err)?,
            total_entries: cursor.read_u16::<LittleEndian>().map_err(&err)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(&err)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(&err)?,
            comment_len: cursor.read_u16::<LittleEndian>().map_err(&err)?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_SENTINEL_16
            || self.total_entries == ZIP64_SENTINEL_16
            || self.cd_size == ZIP64_SENTINEL_32
            || self.cd_offset == ZIP64_SENTINEL_32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::format("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let err = truncated("ZIP64 end of central directory locator");

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().map_err(&err)?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().map_err(&err)?,
            total_disks: cursor.read_u32::<LittleEndian>().map_err(&err)?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::format("invalid ZIP64 end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let err = truncated("ZIP64 end of central directory record");

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>().map_err(&err)?,
            version_made_by: cursor.read_u16::<LittleEndian>().map_err(&err)?,
            version_needed: cursor.read_u16::<LittleEndian>().map_err(&err)?,
            disk_number: cursor.read_u32::<LittleEndian>().map_err(&err)?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().map_err(&err)?,
            disk_entries: cursor.read_u64::<LittleEndian>().map_err(&err)?,
            total_entries: cursor.read_u64::<LittleEndian>().map_err(&err)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(&err)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(&err)?,
        })
    }
}

/// Location of the Central Directory resolved from the archive trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndCentralDirectoryInfo {
    pub central_dir_offset: u64,
    pub central_dir_size: u64,
    pub entry_count: u64,
    /// Offset of the EOCD record within the archive.
    pub eocd_offset: u64,
    pub is_zip64: bool,
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Fixed part of a Local File Header.
///
/// Only the variable-length field sizes are needed to locate the entry data;
/// sizes and CRC are taken from the central directory since the local copy may
/// be zeroed when a data descriptor follows the data.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LFH_SIZE || &data[0..4] != LFH_SIGNATURE {
            return Err(ZipError::format("invalid local file header"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let err = truncated("local file header");

        let version_needed = cursor.read_u16::<LittleEndian>().map_err(&err)?;
        let flags = cursor.read_u16::<LittleEndian>().map_err(&err)?;
        let compression_method = cursor.read_u16::<LittleEndian>().map_err(&err)?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>().map_err(&err)?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>().map_err(&err)?;
        let crc32 = cursor.read_u32::<LittleEndian>().map_err(&err)?;
        let _compressed_size = cursor.read_u32::<LittleEndian>().map_err(&err)?;
        let _uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(&err)?;
        let file_name_length = cursor.read_u16::<LittleEndian>().map_err(&err)?;
        let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(&err)?;

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            crc32,
            file_name_length,
            extra_field_length,
        })
    }

    /// Total header length including file name and extra field.
    pub fn header_len(&self) -> u64 {
        LFH_SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// One member of a remote archive, as described by its central directory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZipEntryDescriptor {
    pub file_name: String,
    pub crc: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub compression_method: CompressionMethod,
    /// Whether any field was widened from the ZIP64 extra field.
    pub is_zip64: bool,
}

impl ZipEntryDescriptor {
    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with('/')
    }
}
