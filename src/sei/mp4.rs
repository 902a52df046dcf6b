// Top-level MP4 atom walk and NAL iteration
//
// Only enough container parsing to reach the H.264 stream inside `mdat`:
// atoms are length-prefixed at the top level, NAL units are length-prefixed
// inside `mdat` (AVCC layout, 4-byte sizes).

use std::io::{Read, Seek, SeekFrom};

use crate::constants::{MAX_SEI_NAL_SIZE, NAL_TYPE_SEI, SEI_PAYLOAD_USER_DATA_UNREGISTERED};
use crate::error::{CatalogError, Result};

/// Byte region of the mdat payload (after the atom header).
#[derive(Debug, Clone, Copy)]
pub struct MdatRegion {
    pub offset: u64,
    pub size: u64,
}

/// Walk top-level atoms until `mdat`. Atom layout:
/// `size32(4) | type(4) [| size64(8) if size32 == 1]`.
pub fn find_mdat<R: Read + Seek>(reader: &mut R) -> Result<MdatRegion> {
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; 8];
    loop {
        if reader.read_exact(&mut header).is_err() {
            return Err(CatalogError::Mp4("mdat atom not found".to_string()));
        }

        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let atom_type = &header[4..8];

        let (atom_size, header_size): (u64, u64) = if size32 == 1 {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large).map_err(|_| {
                CatalogError::Mp4("truncated extended atom size".to_string())
            })?;
            (u64::from_be_bytes(large), 16)
        } else {
            (u64::from(size32), 8)
        };

        if atom_type == b"mdat" && size32 == 0 {
            // Extends to end of file; unsupported.
            return Err(CatalogError::Mp4("mdat size 0 not supported".to_string()));
        }

        if atom_size < header_size {
            return Err(CatalogError::Mp4("invalid MP4 atom size".to_string()));
        }

        if atom_type == b"mdat" {
            let offset = reader.stream_position()?;
            return Ok(MdatRegion {
                offset,
                size: atom_size - header_size,
            });
        }

        reader.seek(SeekFrom::Current((atom_size - header_size) as i64))?;
    }
}

/// Iterator over SEI user-data-unregistered NAL units inside an mdat region.
/// Non-SEI NALs are skipped in place; oversized SEI NALs are skipped without
/// buffering. Any short read ends iteration (lossy but advancing).
pub struct SeiNalIter<'a, R: Read + Seek> {
    reader: &'a mut R,
    size: u64,
    consumed: u64,
}

impl<'a, R: Read + Seek> SeiNalIter<'a, R> {
    pub fn new(reader: &'a mut R, region: MdatRegion) -> Result<Self> {
        reader.seek(SeekFrom::Start(region.offset))?;
        Ok(Self {
            reader,
            size: region.size,
            consumed: 0,
        })
    }

    fn skip(&mut self, bytes: u64) -> Option<()> {
        self.reader.seek(SeekFrom::Current(bytes as i64)).ok()?;
        Some(())
    }
}

impl<R: Read + Seek> Iterator for SeiNalIter<'_, R> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        while self.consumed < self.size {
            let mut len_buf = [0u8; 4];
            self.reader.read_exact(&mut len_buf).ok()?;
            let nal_size = u64::from(u32::from_be_bytes(len_buf));

            if nal_size < 2 {
                self.skip(nal_size)?;
                self.consumed += 4 + nal_size;
                continue;
            }

            let mut first_two = [0u8; 2];
            self.reader.read_exact(&mut first_two).ok()?;

            let nal_unit_type = first_two[0] & 0x1F;
            if nal_unit_type != NAL_TYPE_SEI
                || first_two[1] != SEI_PAYLOAD_USER_DATA_UNREGISTERED
            {
                self.skip(nal_size - 2)?;
                self.consumed += 4 + nal_size;
                continue;
            }

            if nal_size > u64::from(MAX_SEI_NAL_SIZE) {
                log::warn!(
                    "skipping oversized SEI NAL ({} bytes, limit {})",
                    nal_size,
                    MAX_SEI_NAL_SIZE
                );
                self.skip(nal_size - 2)?;
                self.consumed += 4 + nal_size;
                continue;
            }

            let mut rest = vec![0u8; (nal_size - 2) as usize];
            self.reader.read_exact(&mut rest).ok()?;
            self.consumed += 4 + nal_size;

            let mut nal = Vec::with_capacity(nal_size as usize);
            nal.extend_from_slice(&first_two);
            nal.extend_from_slice(&rest);
            return Some(nal);
        }
        None
    }
}
