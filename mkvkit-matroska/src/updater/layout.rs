//! Fitting serialised elements into reserved space.

use crate::ebml::{vint_length, write_void, MAX_VINT_LENGTH};
use crate::element::Element;
use crate::error::Result;

/// Bytes that exactly fill a reserved region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fitted {
    /// The element followed by padding, `available` bytes in total.
    pub data: Vec<u8>,
    /// Length of the element itself.
    pub element_len: u64,
}

impl Fitted {
    /// Length of the trailing EbmlVoid, zero when none was needed.
    pub fn padding(&self) -> u64 {
        self.data.len() as u64 - self.element_len
    }
}

/// Serialise `element` so that it occupies exactly `available` bytes.
///
/// An exact fit is written as is. Two or more spare bytes are filled with
/// an EbmlVoid. A single spare byte is absorbed by widening the size field
/// by one byte. Returns `None` if the element does not fit.
pub(crate) fn fit_in(element: &Element, available: u64) -> Result<Option<Fitted>> {
    let content = element.content_size();
    let minimal = element.encoded_size();

    if minimal == available {
        let data = element.to_bytes()?;
        return Ok(Some(Fitted {
            data,
            element_len: minimal,
        }));
    }

    if available >= minimal + 2 {
        let mut data = element.to_bytes()?;
        write_void(&mut data, available - minimal)?;
        return Ok(Some(Fitted {
            data,
            element_len: minimal,
        }));
    }

    if available == minimal + 1 {
        let widened = vint_length(content) + 1;
        if widened <= MAX_VINT_LENGTH {
            let data = element.to_bytes_with_size_length(widened)?;
            return Ok(Some(Fitted {
                data,
                element_len: available,
            }));
        }
    }

    Ok(None)
}
