// Copyright 2021 Locha Mesh Developers <contact@locha.io>
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

//! Intel-HEX firmware image parsing, turning a HEX file into the
//! `(base_address, bytes)` contiguous regions the page builder consumes.
//!
//! This is ambient to the wire protocol proper: the protocol only ever sees
//! 256-byte pages, but something has to produce the regions those pages are
//! carved from. Adjacent `Data` records are coalesced into a single region
//! here, at the adapter boundary, so the page builder never has to reason
//! about record boundaries -- only about regions and pages.

use ihex::{Reader, Record};

use crate::error::{Error, Result};

/// Parses `src` (the text contents of an Intel-HEX file) into contiguous
/// `(base_address, bytes)` regions, in ascending address order as they
/// appear in the file.
///
/// Record types other than `Data`, `EndOfFile`, `ExtendedLinearAddress`, and
/// `ExtendedSegmentAddress` are accepted and ignored: start-address records
/// only matter to a debugger, not to flash programming.
pub fn regions_from_str(src: &str) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut regions: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut upper_linear = 0u32;
    let mut upper_segment = 0u32;
    let mut seen_eof = false;

    for record in Reader::new(src) {
        let record = record
            .map_err(|e| Error::ImageParse(format!("malformed HEX record: {}", e)))?;

        if seen_eof {
            // Anything after end-of-file is malformed; a well-formed image
            // never emits more records past it.
            return Err(Error::ImageParse(
                "data record found after end-of-file record".into(),
            ));
        }

        match record {
            Record::Data { offset, value } => {
                if value.is_empty() {
                    continue;
                }
                let base = upper_linear.max(upper_segment) + offset as u32;
                push_region(&mut regions, base, value);
            }
            Record::ExtendedLinearAddress(upper) => {
                upper_linear = (upper as u32) << 16;
                upper_segment = 0;
            }
            Record::ExtendedSegmentAddress(upper) => {
                upper_segment = (upper as u32) << 4;
                upper_linear = 0;
            }
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
            Record::EndOfFile => {
                seen_eof = true;
            }
        }
    }

    if !seen_eof {
        return Err(Error::ImageParse(
            "HEX image is missing its end-of-file record".into(),
        ));
    }

    Ok(regions)
}

/// Appends `bytes` at `base`, merging into the last region if `base`
/// immediately follows it, otherwise starting a new region.
fn push_region(regions: &mut Vec<(u32, Vec<u8>)>, base: u32, mut bytes: Vec<u8>) {
    if let Some((last_base, last_bytes)) = regions.last_mut() {
        if *last_base as u64 + last_bytes.len() as u64 == base as u64 {
            last_bytes.append(&mut bytes);
            return;
        }
    }
    regions.push((base, bytes));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adjacent_records_are_coalesced_into_one_region() {
        let src = ":10000000000102030405060708090a0b0c0d0e0f78\n\
                   :10001000101112131415161718191a1b1c1d1e1f68\n\
                   :00000001FF\n";
        let regions = regions_from_str(src).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].0, 0x0000);
        assert_eq!(regions[0].1.len(), 32);
        assert_eq!(regions[0].1[0], 0x00);
        assert_eq!(regions[0].1[31], 0x1f);
    }

    #[test]
    fn non_adjacent_records_start_a_new_region() {
        let src = ":0400000001020304F2\n\
                   :0400100005060708D2\n\
                   :00000001FF\n";
        let regions = regions_from_str(src).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].0, 0x0000);
        assert_eq!(regions[1].0, 0x1000);
    }

    #[test]
    fn extended_linear_address_offsets_subsequent_records() {
        let src = ":020000041000EA\n:0400000001020304F2\n:00000001FF\n";
        let regions = regions_from_str(src).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].0, 0x1000_0000);
    }

    #[test]
    fn missing_eof_record_is_rejected() {
        let src = ":0400000001020304F2\n";
        let err = regions_from_str(src).unwrap_err();
        assert!(matches!(err, Error::ImageParse(_)));
    }

    #[test]
    fn malformed_checksum_is_rejected() {
        let src = ":040000000102030400\n:00000001FF\n";
        let err = regions_from_str(src).unwrap_err();
        assert!(matches!(err, Error::ImageParse(_)));
    }
}
