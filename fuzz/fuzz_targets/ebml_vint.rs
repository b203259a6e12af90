#![no_main]

//! Fuzz target for EBML variable-length integers and element headers.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mkvkit_matroska::ebml;
use mkvkit_matroska::ElementHeader;
use std::io::Cursor;

#[derive(Arbitrary, Debug)]
struct EbmlInput {
    data: Vec<u8>,
    operation: EbmlOperation,
}

#[derive(Arbitrary, Debug)]
enum EbmlOperation {
    ReadVint,
    ReadSignedVint,
    ReadElementId,
    ReadElementHeader,
    VintRoundtrip { value: u64, length: u8 },
    HeaderRoundtrip { id: u32, size: u64 },
    VoidHeader { total: u32 },
}

fuzz_target!(|input: EbmlInput| {
    if input.data.len() > 64 * 1024 {
        return;
    }

    match input.operation {
        EbmlOperation::ReadVint => {
            let _ = ebml::read_vint(&mut Cursor::new(&input.data));
        }

        EbmlOperation::ReadSignedVint => {
            let _ = ebml::read_signed_vint(&mut Cursor::new(&input.data));
        }

        EbmlOperation::ReadElementId => {
            let _ = ebml::read_element_id(&mut Cursor::new(&input.data));
        }

        EbmlOperation::ReadElementHeader => {
            let _ = ElementHeader::parse(&input.data);
        }

        EbmlOperation::VintRoundtrip { value, length } => {
            let length = (length as usize % ebml::MAX_VINT_LENGTH) + 1;
            if value >= ebml::vint_max(length) {
                assert!(ebml::encode_vint_with_length(value, length).is_err());
                return;
            }
            let (encoded, len) = ebml::encode_vint_with_length(value, length).unwrap();
            assert_eq!(len, length);
            let (decoded, read) = ebml::read_vint(&mut Cursor::new(&encoded[..len])).unwrap();
            assert_eq!((decoded, read), (value, length), "VINT round-trip mismatch");
        }

        EbmlOperation::HeaderRoundtrip { id, size } => {
            let size = size & 0x00FF_FFFF_FFFF;
            let Ok(bytes) = ElementHeader::encode(id, Some(size)) else {
                return;
            };
            // Reserved IDs encode but are rejected when read back.
            if let Ok(parsed) = ElementHeader::parse(&bytes) {
                assert_eq!(parsed.id, id, "element ID mismatch");
                assert_eq!(parsed.size, Some(size), "element size mismatch");
                assert_eq!(parsed.header_size, bytes.len());
            }
        }

        EbmlOperation::VoidHeader { total } => {
            let total = u64::from(total);
            if let Ok(header) = ebml::void_header(total) {
                let parsed = ElementHeader::parse(&header).unwrap();
                assert_eq!(parsed.total_size(), Some(total), "void does not fill its gap");
            }
        }
    }
});
