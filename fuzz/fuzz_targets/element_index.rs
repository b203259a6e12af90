#![no_main]

//! Fuzz target for the Element Index: a scan of arbitrary bytes must fail
//! cleanly or produce an ordered, non-overlapping index.

use libfuzzer_sys::fuzz_target;
use mkvkit_matroska::{ElementIndex, ParseMode};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    for mode in [ParseMode::Fast, ParseMode::Full] {
        let Ok(mut index) = ElementIndex::from_io(Cursor::new(data.to_vec()), mode) else {
            continue;
        };

        let descriptors = index.descriptors().to_vec();
        for pair in descriptors.windows(2) {
            assert!(pair[0].position < pair[1].position, "index out of order");
            assert!(pair[0].end() <= pair[1].position, "overlapping descriptors");
        }
        for descriptor in &descriptors {
            let _ = index.read_element(descriptor);
        }
    }
});
