//! EBML (Extensible Binary Meta Language) primitives.
//!
//! EBML is the binary format underlying Matroska/WebM. It uses variable-length
//! integers (VINTs) for both element IDs and sizes. Everything that rewrites
//! files in place needs fixed-width encodings as well as minimal ones, so both
//! are provided here.

use crate::error::{MkvError, Result};
use crate::elements;
use std::io::{Read, Seek, SeekFrom};

/// Maximum recursion depth for nested elements.
pub const MAX_RECURSION_DEPTH: u32 = 64;

/// Maximum VINT length in bytes.
pub const MAX_VINT_LENGTH: usize = 8;

/// Maximum element ID length in bytes.
pub const MAX_ID_LENGTH: usize = 4;

/// The all-ones data pattern for a VINT of `length` bytes.
///
/// For sizes this pattern means "unknown"; the largest known size that fits
/// in `length` bytes is one less.
pub fn vint_max(length: usize) -> u64 {
    (1u64 << (7 * length as u32)) - 1
}

/// Read a variable-length integer (VINT) from a reader.
///
/// EBML VINTs use a leading bit pattern to indicate the length:
/// - 1xxxxxxx: 1 byte (7 bits of data)
/// - 01xxxxxx xxxxxxxx: 2 bytes (14 bits)
/// - 001xxxxx xxxxxxxx xxxxxxxx: 3 bytes (21 bits)
/// - etc.
///
/// Returns the decoded value and the number of bytes read.
pub fn read_vint<R: Read>(reader: &mut R) -> Result<(u64, usize)> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    if first_byte[0] == 0 {
        return Err(MkvError::InvalidVint { offset: 0 });
    }

    let length = first_byte[0].leading_zeros() as usize + 1;
    let mask = 0xFFu8.checked_shr(length as u32).unwrap_or(0);
    let mut value = (first_byte[0] & mask) as u64;

    if length > 1 {
        let mut remaining = [0u8; MAX_VINT_LENGTH - 1];
        reader.read_exact(&mut remaining[..length - 1])?;
        for &byte in &remaining[..length - 1] {
            value = (value << 8) | byte as u64;
        }
    }

    Ok((value, length))
}

/// Read a VINT as an element ID.
///
/// Element IDs keep their VINT marker bits. IDs whose data bits are all
/// ones are reserved and rejected, as are all-zero multi-byte IDs. The
/// one-byte 0x80 is ChapterDisplay and stays valid.
pub fn read_element_id<R: Read>(reader: &mut R) -> Result<(u32, usize)> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    if first_byte[0] == 0 {
        return Err(MkvError::InvalidVint { offset: 0 });
    }

    let length = first_byte[0].leading_zeros() as usize + 1;
    if length > MAX_ID_LENGTH {
        return Err(MkvError::InvalidElementId { offset: 0 });
    }

    let mut value = first_byte[0] as u32;
    if length > 1 {
        let mut remaining = [0u8; MAX_ID_LENGTH - 1];
        reader.read_exact(&mut remaining[..length - 1])?;
        for &byte in &remaining[..length - 1] {
            value = (value << 8) | byte as u32;
        }
    }

    let data = value as u64 & vint_max(length);
    if (data == 0 && length > 1) || data == vint_max(length) {
        return Err(MkvError::InvalidElementId { offset: 0 });
    }

    Ok((value, length))
}

/// Read an element size (VINT with possible unknown size).
///
/// Returns `None` if the size is unknown (all data bits set).
pub fn read_element_size<R: Read>(reader: &mut R) -> Result<(Option<u64>, usize)> {
    let (value, length) = read_vint(reader)?;
    if value == vint_max(length) {
        Ok((None, length))
    } else {
        Ok((Some(value), length))
    }
}

/// Calculate the minimum number of bytes needed to encode a value as a VINT.
///
/// The all-ones pattern is reserved, so a value equal to it needs one more byte.
pub fn vint_length(value: u64) -> usize {
    (1..MAX_VINT_LENGTH)
        .find(|&length| value < vint_max(length))
        .unwrap_or(MAX_VINT_LENGTH)
}

/// Encode a value as a minimal-length VINT.
///
/// Returns the encoded bytes and the length.
pub fn encode_vint(value: u64) -> Result<([u8; 8], usize)> {
    encode_vint_with_length(value, vint_length(value))
}

/// Encode a value as a VINT of exactly `length` bytes.
///
/// Fails with [`MkvError::VintOverflow`] if the value does not fit the
/// width (the all-ones pattern counts as not fitting).
pub fn encode_vint_with_length(value: u64, length: usize) -> Result<([u8; 8], usize)> {
    if length == 0 || length > MAX_VINT_LENGTH || value >= vint_max(length) {
        return Err(MkvError::VintOverflow);
    }

    let mut bytes = [0u8; 8];
    let mut v = value;
    for i in (0..length).rev() {
        bytes[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    bytes[0] |= 0x80 >> (length - 1);

    Ok((bytes, length))
}

/// Encode the unknown-size marker in `length` bytes.
pub fn encode_unknown_size(length: usize) -> Result<([u8; 8], usize)> {
    if length == 0 || length > MAX_VINT_LENGTH {
        return Err(MkvError::VintOverflow);
    }
    let mut bytes = [0xFFu8; 8];
    bytes[0] = 0xFF >> (length - 1);
    Ok((bytes, length))
}

/// Encode a signed value as a VINT of `length` bytes (EBML lacing deltas).
///
/// Signed VINTs are stored with a bias of `2^(7*length - 1) - 1`.
pub fn encode_signed_vint(value: i64, length: usize) -> Result<([u8; 8], usize)> {
    if length == 0 || length > MAX_VINT_LENGTH {
        return Err(MkvError::VintOverflow);
    }
    let bias = (1i64 << (7 * length as u32 - 1)) - 1;
    let biased = value.checked_add(bias).ok_or(MkvError::VintOverflow)?;
    if biased < 0 {
        return Err(MkvError::VintOverflow);
    }
    encode_vint_with_length(biased as u64, length)
}

/// Smallest width whose signed VINT range holds `value`.
pub fn signed_vint_length(value: i64) -> usize {
    (1..=MAX_VINT_LENGTH)
        .find(|&length| encode_signed_vint(value, length).is_ok())
        .unwrap_or(MAX_VINT_LENGTH)
}

/// Decode a signed VINT (EBML lacing deltas) from raw data.
pub fn read_signed_vint<R: Read>(reader: &mut R) -> Result<(i64, usize)> {
    let (value, length) = read_vint(reader)?;
    let bias = (1i64 << (7 * length as u32 - 1)) - 1;
    Ok((value as i64 - bias, length))
}

/// Number of bytes an element ID occupies.
pub fn id_length(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Encode an element ID.
pub fn encode_element_id(id: u32) -> ([u8; 4], usize) {
    let length = id_length(id);
    let mut bytes = [0u8; 4];
    bytes[..length].copy_from_slice(&id.to_be_bytes()[4 - length..]);
    (bytes, length)
}

/// An EBML element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    /// The element ID.
    pub id: u32,
    /// The element size (None for unknown size).
    pub size: Option<u64>,
    /// Total header size in bytes.
    pub header_size: usize,
    /// Width of the size field in bytes.
    pub size_length: usize,
}

impl ElementHeader {
    /// Read an element header from a reader.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let (id, id_len) = read_element_id(reader)?;
        let (size, size_len) = read_element_size(reader)?;

        Ok(Self {
            id,
            size,
            header_size: id_len + size_len,
            size_length: size_len,
        })
    }

    /// Seek to `position` and read the header found there.
    ///
    /// Error offsets are reported relative to the start of the stream.
    pub fn read_at<R: Read + Seek>(reader: &mut R, position: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(position))?;
        Self::read(reader).map_err(|e| e.at_offset(position))
    }

    /// Parse a header from the start of a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = data;
        Self::read(&mut cursor)
    }

    /// Encode a header with a minimal size field (unknown size uses 8 bytes).
    pub fn encode(id: u32, size: Option<u64>) -> Result<Vec<u8>> {
        let size_length = match size {
            Some(size) => vint_length(size),
            None => MAX_VINT_LENGTH,
        };
        Self::encode_with_size_length(id, size, size_length)
    }

    /// Encode a header whose size field is exactly `size_length` bytes wide.
    pub fn encode_with_size_length(
        id: u32,
        size: Option<u64>,
        size_length: usize,
    ) -> Result<Vec<u8>> {
        let (id_bytes, id_len) = encode_element_id(id);
        let (size_bytes, size_len) = match size {
            Some(size) => encode_vint_with_length(size, size_length)?,
            None => encode_unknown_size(size_length)?,
        };
        let mut out = Vec::with_capacity(id_len + size_len);
        out.extend_from_slice(&id_bytes[..id_len]);
        out.extend_from_slice(&size_bytes[..size_len]);
        Ok(out)
    }

    /// Get the total size of this element (header + content).
    pub fn total_size(&self) -> Option<u64> {
        self.size.map(|s| s + self.header_size as u64)
    }
}

/// Header length of an element with a minimal size field.
pub fn header_length(id: u32, content_size: u64) -> usize {
    id_length(id) + vint_length(content_size)
}

/// Build the header of an EbmlVoid element occupying exactly `total` bytes.
///
/// The size field uses the smallest width `L` for which the remaining
/// content (`total - 1 - L`) is representable, written with exactly `L`
/// bytes even when a smaller encoding of the value would exist.
pub fn void_header(total: u64) -> Result<Vec<u8>> {
    if total < 2 {
        return Err(MkvError::InvalidElementSize {
            offset: 0,
            message: format!("cannot create a void element of {} bytes", total),
        });
    }

    for size_length in 1..=MAX_VINT_LENGTH {
        let overhead = 1 + size_length as u64;
        if total < overhead {
            break;
        }
        let content = total - overhead;
        if content < vint_max(size_length) {
            return ElementHeader::encode_with_size_length(
                elements::VOID,
                Some(content),
                size_length,
            );
        }
    }

    Err(MkvError::VintOverflow)
}

/// Append a complete zero-filled EbmlVoid element of `total` bytes.
pub fn write_void(out: &mut Vec<u8>, total: u64) -> Result<()> {
    let header = void_header(total)?;
    let padding = total - header.len() as u64;
    out.extend_from_slice(&header);
    out.resize(out.len() + padding as usize, 0);
    Ok(())
}

/// EBML document header information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlHeader {
    /// EBML version.
    pub version: u64,
    /// EBML read version.
    pub read_version: u64,
    /// Maximum ID length.
    pub max_id_length: u64,
    /// Maximum size length.
    pub max_size_length: u64,
    /// Document type (e.g., "matroska" or "webm").
    pub doc_type: String,
    /// Document type version.
    pub doc_type_version: u64,
    /// Document type read version.
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        Self {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: "matroska".to_string(),
            doc_type_version: 4,
            doc_type_read_version: 2,
        }
    }
}

impl EbmlHeader {
    /// Create a WebM header.
    pub fn webm() -> Self {
        Self {
            doc_type: "webm".to_string(),
            ..Default::default()
        }
    }

    /// Check if this is a WebM document.
    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }

    /// Check if this is a Matroska document.
    pub fn is_matroska(&self) -> bool {
        self.doc_type == "matroska"
    }
}

/// Read a signed integer from EBML data (0 to 8 bytes, big-endian).
pub fn read_signed_int(data: &[u8]) -> Result<i64> {
    if data.len() > 8 {
        return Err(integer_too_wide(data.len()));
    }
    if data.is_empty() {
        return Ok(0);
    }

    let mut value = if data[0] & 0x80 != 0 { -1i64 } else { 0i64 };
    for &byte in data {
        value = (value << 8) | byte as i64;
    }
    Ok(value)
}

/// Read an unsigned integer from EBML data (0 to 8 bytes, big-endian).
pub fn read_unsigned_int(data: &[u8]) -> Result<u64> {
    if data.len() > 8 {
        return Err(integer_too_wide(data.len()));
    }
    Ok(data.iter().fold(0u64, |acc, &byte| (acc << 8) | byte as u64))
}

fn integer_too_wide(len: usize) -> MkvError {
    MkvError::InvalidElementSize {
        offset: 0,
        message: format!("integer of {} bytes is wider than 8 bytes", len),
    }
}

/// Read a float from EBML data (0, 4 or 8 bytes).
pub fn read_float(data: &[u8]) -> Result<f64> {
    match *data {
        [] => Ok(0.0),
        [a, b, c, d] => Ok(f32::from_be_bytes([a, b, c, d]) as f64),
        [a, b, c, d, e, f, g, h] => Ok(f64::from_be_bytes([a, b, c, d, e, f, g, h])),
        _ => Err(MkvError::InvalidElementSize {
            offset: 0,
            message: format!("float of {} bytes", data.len()),
        }),
    }
}

/// Read an ASCII string from EBML data, stopping at the first NUL.
pub fn read_string(data: &[u8]) -> Result<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let text = &data[..end];
    if !text.is_ascii() {
        return Err(MkvError::Other("string element contains non-ASCII bytes".into()));
    }
    Ok(String::from_utf8_lossy(text).into_owned())
}

/// Read a UTF-8 string from EBML data, stopping at the first NUL.
pub fn read_utf8(data: &[u8]) -> Result<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec())
        .map_err(|e| MkvError::Other(format!("Invalid UTF-8 string: {}", e)))
}

/// Read a date from EBML data (nanoseconds since 2001-01-01).
pub fn read_date(data: &[u8]) -> Result<i64> {
    match data.len() {
        0 | 8 => read_signed_int(data),
        len => Err(MkvError::InvalidElementSize {
            offset: 0,
            message: format!("date of {} bytes", len),
        }),
    }
}

/// Encode an unsigned integer in minimal bytes (at least one).
pub fn encode_unsigned_int(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

/// Encode an unsigned integer in exactly `width` bytes.
pub fn encode_unsigned_int_with_width(value: u64, width: usize) -> Result<Vec<u8>> {
    if width == 0 || width > 8 || (width < 8 && value >> (8 * width) != 0) {
        return Err(MkvError::VintOverflow);
    }
    Ok(value.to_be_bytes()[8 - width..].to_vec())
}

/// Encode a signed integer in minimal two's complement bytes.
pub fn encode_signed_int(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Encode a float (always 8 bytes).
pub fn encode_float(value: f64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_vint_1byte() {
        let data = [0x81];
        let mut cursor = Cursor::new(&data);
        let (value, len) = read_vint(&mut cursor).unwrap();
        assert_eq!(value, 1);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_read_vint_2byte() {
        let data = [0x40, 0x81];
        let mut cursor = Cursor::new(&data);
        let (value, len) = read_vint(&mut cursor).unwrap();
        assert_eq!(value, 129);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_read_vint_zero_byte_is_invalid() {
        let data = [0x00, 0x81];
        let mut cursor = Cursor::new(&data);
        assert!(matches!(
            read_vint(&mut cursor),
            Err(MkvError::InvalidVint { .. })
        ));
    }

    #[test]
    fn test_read_element_id_4byte() {
        let data = [0x1A, 0x45, 0xDF, 0xA3];
        let mut cursor = Cursor::new(&data);
        let (id, len) = read_element_id(&mut cursor).unwrap();
        assert_eq!(id, elements::EBML);
        assert_eq!(len, 4);
    }

    #[test]
    fn test_reserved_ids_rejected() {
        for data in [&[0xFFu8][..], &[0x40, 0x00], &[0x7F, 0xFF], &[0x0F, 0xFF, 0xFF, 0xFF, 0xFF]] {
            let mut cursor = Cursor::new(data);
            assert!(read_element_id(&mut cursor).is_err());
        }
    }

    #[test]
    fn test_chapter_display_id() {
        let data = [0x80, 0x85];
        let mut cursor = Cursor::new(&data);
        let (id, len) = read_element_id(&mut cursor).unwrap();
        assert_eq!(id, elements::CHAPTER_DISPLAY);
        assert_eq!(len, 1);

        let header = ElementHeader::parse(&data).unwrap();
        assert_eq!(header.id, elements::CHAPTER_DISPLAY);
        assert_eq!(header.size, Some(5));
    }

    #[test]
    fn test_read_vint_8byte() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03];
        let mut cursor = Cursor::new(&data);
        let (value, len) = read_vint(&mut cursor).unwrap();
        assert_eq!(value, 0x01_0203);
        assert_eq!(len, 8);

        let (bytes, len) = encode_vint_with_length(0x01_0203, 8).unwrap();
        assert_eq!(&bytes[..len], &data);

        let mut cursor = Cursor::new(&data);
        let (size, _) = read_element_size(&mut cursor).unwrap();
        assert_eq!(size, Some(0x01_0203));
    }

    #[test]
    fn test_read_unknown_size() {
        for data in [&[0xFFu8][..], &[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]] {
            let mut cursor = Cursor::new(data);
            let (size, len) = read_element_size(&mut cursor).unwrap();
            assert_eq!(size, None);
            assert_eq!(len, data.len());
        }

        let (bytes, len) = encode_unknown_size(8).unwrap();
        let mut cursor = Cursor::new(&bytes[..len]);
        assert_eq!(read_element_size(&mut cursor).unwrap(), (None, 8));
    }

    #[test]
    fn test_vint_length_boundaries() {
        assert_eq!(vint_length(0), 1);
        assert_eq!(vint_length(126), 1);
        assert_eq!(vint_length(127), 2);
        assert_eq!(vint_length(16382), 2);
        assert_eq!(vint_length(16383), 3);
        assert_eq!(vint_length(vint_max(7) - 1), 7);
        assert_eq!(vint_length(vint_max(7)), 8);
    }

    #[test]
    fn test_encode_vint_with_length() {
        let (bytes, len) = encode_vint_with_length(5, 8).unwrap();
        assert_eq!(&bytes[..len], &[0x01, 0, 0, 0, 0, 0, 0, 0x05]);

        let (bytes, len) = encode_vint_with_length(129, 2).unwrap();
        assert_eq!(&bytes[..len], &[0x40, 0x81]);

        assert!(encode_vint_with_length(127, 1).is_err());
        assert!(encode_vint_with_length(1, 0).is_err());
    }

    #[test]
    fn test_signed_vint() {
        let (bytes, len) = encode_signed_vint(-1, 1).unwrap();
        assert_eq!(&bytes[..len], &[0x80 | 62]);
        let mut cursor = Cursor::new(&bytes[..len]);
        assert_eq!(read_signed_vint(&mut cursor).unwrap(), (-1, 1));

        assert_eq!(signed_vint_length(63), 1);
        assert_eq!(signed_vint_length(64), 2);
        assert_eq!(signed_vint_length(-62), 1);
    }

    #[test]
    fn test_encode_element_id() {
        let (bytes, len) = encode_element_id(elements::VOID);
        assert_eq!(&bytes[..len], &[0xEC]);
        let (bytes, len) = encode_element_id(elements::SEGMENT);
        assert_eq!(&bytes[..len], &[0x18, 0x53, 0x80, 0x67]);
    }

    #[test]
    fn test_header_with_fixed_size_length() {
        let header = ElementHeader::encode_with_size_length(elements::SEGMENT, Some(10), 8).unwrap();
        assert_eq!(header.len(), 12);
        let parsed = ElementHeader::parse(&header).unwrap();
        assert_eq!(parsed.size, Some(10));
        assert_eq!(parsed.size_length, 8);
        assert_eq!(parsed.header_size, 12);
    }

    #[test]
    fn test_header_read_at_reports_absolute_offset() {
        let mut data = vec![0u8; 16];
        data[10] = 0x00;
        let mut cursor = Cursor::new(data);
        match ElementHeader::read_at(&mut cursor, 10) {
            Err(MkvError::InvalidVint { offset }) => assert_eq!(offset, 10),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_void_header_sizes() {
        assert_eq!(void_header(2).unwrap(), vec![0xEC, 0x80]);
        assert_eq!(void_header(128).unwrap(), vec![0xEC, 0x80 | 126]);
        // 129 bytes: one size byte would need content 127, the reserved pattern.
        assert_eq!(void_header(129).unwrap(), vec![0xEC, 0x40, 126]);
        assert!(void_header(1).is_err());
        assert!(void_header(0).is_err());
    }

    #[test]
    fn test_write_void_exact_total() {
        for total in [2u64, 3, 9, 127, 128, 129, 130, 16385, 16386, 70000] {
            let mut out = Vec::new();
            write_void(&mut out, total).unwrap();
            assert_eq!(out.len() as u64, total, "void of {} bytes", total);
            let header = ElementHeader::parse(&out).unwrap();
            assert_eq!(header.id, elements::VOID);
            assert_eq!(header.total_size(), Some(total));
        }
    }

    #[test]
    fn test_read_signed_int() {
        assert_eq!(read_signed_int(&[0x00]).unwrap(), 0);
        assert_eq!(read_signed_int(&[0xFF]).unwrap(), -1);
        assert_eq!(read_signed_int(&[0x00, 0x80]).unwrap(), 128);
        assert_eq!(read_signed_int(&[0xFF, 0x7F]).unwrap(), -129);
        assert!(read_signed_int(&[0; 9]).is_err());
    }

    #[test]
    fn test_read_unsigned_int() {
        assert_eq!(read_unsigned_int(&[]).unwrap(), 0);
        assert_eq!(read_unsigned_int(&[0x01, 0x00]).unwrap(), 256);
        assert!(read_unsigned_int(&[0; 9]).is_err());
    }

    #[test]
    fn test_encode_integers() {
        assert_eq!(encode_unsigned_int(0), vec![0]);
        assert_eq!(encode_unsigned_int(256), vec![1, 0]);
        assert_eq!(encode_signed_int(-1), vec![0xFF]);
        assert_eq!(encode_signed_int(128), vec![0x00, 0x80]);
        assert_eq!(encode_signed_int(-129), vec![0xFF, 0x7F]);
        assert_eq!(encode_unsigned_int_with_width(5, 8).unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 5]);
        assert!(encode_unsigned_int_with_width(256, 1).is_err());
    }

    #[test]
    fn test_read_float() {
        let data = 1.0f32.to_be_bytes();
        assert_eq!(read_float(&data).unwrap(), 1.0);
        let data = 2.5f64.to_be_bytes();
        assert_eq!(read_float(&data).unwrap(), 2.5);
        assert!(read_float(&[0, 0, 0]).is_err());
    }

    #[test]
    fn test_read_strings() {
        assert_eq!(read_string(b"hello\x00world").unwrap(), "hello");
        assert!(read_string("h\u{e9}".as_bytes()).is_err());
        assert_eq!(read_utf8("h\u{e9}".as_bytes()).unwrap(), "h\u{e9}");
        assert!(read_utf8(&[0xC3, 0x28]).is_err());
    }

    #[test]
    fn test_ebml_header_presets() {
        assert!(EbmlHeader::default().is_matroska());
        assert!(EbmlHeader::webm().is_webm());
    }
}
