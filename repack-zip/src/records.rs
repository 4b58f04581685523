// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Zip records named according to APPNOTE.TXT section 4.3
use deku::prelude::*;

pub const EOCD_MAGIC: &[u8; 4] = b"PK\x05\x06";
pub const CENTRAL_HEADER_MAGIC: &[u8; 4] = b"PK\x01\x02";
pub const ZIP64_LOCATOR_MAGIC: &[u8; 4] = b"PK\x06\x07";

/// Fixed part of the end of central directory record, magic included.
pub const EOCD_LEN: usize = 22;
pub const ZIP64_LOCATOR_LEN: usize = 20;

#[derive(Debug, PartialEq, Eq, Clone, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x05\x06")]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub central_directory_disk: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_len: u16,
    #[deku(count = "comment_len")]
    pub comment: Vec<u8>
}

impl EndOfCentralDirectory {
    /// Whether any field holds the marker that sends readers to a ZIP64 record.
    pub fn needs_zip64(&self) -> bool {
        self.disk_entries == u16::MAX
            || self.total_entries == u16::MAX
            || self.central_directory_size == u32::MAX
            || self.central_directory_offset == u32::MAX
    }
}

#[derive(Debug, PartialEq, Eq, Clone, DekuRead, DekuWrite)]
#[deku(endian = "little", magic = b"PK\x01\x02")]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_field_len: u16,
    pub comment_len: u16,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    /// Offset of the entry's local header from the start of the archive
    pub local_header_offset: u32,
    #[deku(count = "file_name_len")]
    pub file_name: Vec<u8>,
    #[deku(count = "extra_field_len")]
    pub extra_field: Vec<u8>,
    #[deku(count = "comment_len")]
    pub comment: Vec<u8>
}

impl CentralDirectoryHeader {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.file_name).into_owned()
    }
}
