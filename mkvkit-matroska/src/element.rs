//! Owned EBML element trees.
//!
//! An [`Element`] is an ID plus a value; masters own their children by
//! value. Trees are decoded from raw bytes, edited with plain vector
//! operations, and serialised again with minimal size fields.
//!
//! Decoding is lenient below the element being read: a value that cannot
//! be interpreted according to its known kind (an integer wider than 8
//! bytes, invalid UTF-8, a 3-byte float) is recorded as an [`Anomaly`] and
//! kept as opaque binary data so that rewriting the tree reproduces the
//! original bytes. A child that overruns its parent, or whose header cannot
//! be read, ends the walk of that parent; the bytes from there on are kept
//! inside an EbmlVoid.

use crate::ebml::{self, ElementHeader, EbmlHeader, MAX_RECURSION_DEPTH};
use crate::elements::{self, element_kind, ElementKind};
use crate::error::{MkvError, Result};
use serde::Serialize;
use tracing::warn;

/// A recoverable problem found while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    /// Absolute byte offset of the element concerned.
    pub offset: u64,
    /// ID of the element concerned.
    pub id: u32,
    /// Description of the problem.
    pub reason: String,
}

impl Anomaly {
    pub(crate) fn new(offset: u64, id: u32, reason: impl Into<String>) -> Self {
        let anomaly = Self {
            offset,
            id,
            reason: reason.into(),
        };
        warn!(
            offset = anomaly.offset,
            id = format_args!("0x{:X}", anomaly.id),
            "{}",
            anomaly.reason
        );
        anomaly
    }
}

/// Value carried by an element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// Child elements.
    Master(Vec<Element>),
    /// Unsigned integer.
    Unsigned(u64),
    /// Signed integer.
    Signed(i64),
    /// Floating point number.
    Float(f64),
    /// ASCII string.
    String(String),
    /// UTF-8 string.
    Utf8(String),
    /// Nanoseconds since 2001-01-01T00:00:00 UTC.
    Date(i64),
    /// Opaque bytes; also used for unknown IDs.
    Binary(Vec<u8>),
    /// EbmlVoid with the given content size.
    Void(u64),
}

/// An EBML element with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Element ID including marker bits.
    pub id: u32,
    /// Element value.
    pub value: ElementValue,
}

impl Element {
    /// Create an element.
    pub fn new(id: u32, value: ElementValue) -> Self {
        Self { id, value }
    }

    /// Create a master element.
    pub fn master(id: u32, children: Vec<Element>) -> Self {
        Self::new(id, ElementValue::Master(children))
    }

    /// Create an unsigned integer element.
    pub fn unsigned(id: u32, value: u64) -> Self {
        Self::new(id, ElementValue::Unsigned(value))
    }

    /// Create a signed integer element.
    pub fn signed(id: u32, value: i64) -> Self {
        Self::new(id, ElementValue::Signed(value))
    }

    /// Create a float element.
    pub fn float(id: u32, value: f64) -> Self {
        Self::new(id, ElementValue::Float(value))
    }

    /// Create an ASCII string element.
    pub fn string(id: u32, value: impl Into<String>) -> Self {
        Self::new(id, ElementValue::String(value.into()))
    }

    /// Create a UTF-8 string element.
    pub fn utf8(id: u32, value: impl Into<String>) -> Self {
        Self::new(id, ElementValue::Utf8(value.into()))
    }

    /// Create a date element.
    pub fn date(id: u32, value: i64) -> Self {
        Self::new(id, ElementValue::Date(value))
    }

    /// Create a binary element.
    pub fn binary(id: u32, value: impl Into<Vec<u8>>) -> Self {
        Self::new(id, ElementValue::Binary(value.into()))
    }

    /// Create a void element with the given content size.
    pub fn void(content_size: u64) -> Self {
        Self::new(elements::VOID, ElementValue::Void(content_size))
    }

    /// Kind of the carried value.
    pub fn kind(&self) -> ElementKind {
        match self.value {
            ElementValue::Master(_) => ElementKind::Master,
            ElementValue::Unsigned(_) => ElementKind::Unsigned,
            ElementValue::Signed(_) => ElementKind::Signed,
            ElementValue::Float(_) => ElementKind::Float,
            ElementValue::String(_) => ElementKind::String,
            ElementValue::Utf8(_) => ElementKind::Utf8,
            ElementValue::Date(_) => ElementKind::Date,
            ElementValue::Binary(_) => ElementKind::Binary,
            ElementValue::Void(_) => ElementKind::Void,
        }
    }

    /// Check if this is a master element.
    pub fn is_master(&self) -> bool {
        matches!(self.value, ElementValue::Master(_))
    }

    /// Children of a master element (empty for leaves).
    pub fn children(&self) -> &[Element] {
        match &self.value {
            ElementValue::Master(children) => children,
            _ => &[],
        }
    }

    /// Mutable children of a master element.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Element>> {
        match &mut self.value {
            ElementValue::Master(children) => Some(children),
            _ => None,
        }
    }

    /// First child with the given ID.
    pub fn find_child(&self, id: u32) -> Option<&Element> {
        self.children().iter().find(|c| c.id == id)
    }

    /// First child with the given ID, mutably.
    pub fn find_child_mut(&mut self, id: u32) -> Option<&mut Element> {
        self.children_mut()?.iter_mut().find(|c| c.id == id)
    }

    /// All children with the given ID.
    pub fn find_children(&self, id: u32) -> impl Iterator<Item = &Element> {
        self.children().iter().filter(move |c| c.id == id)
    }

    /// Unsigned value of the first child with the given ID.
    pub fn child_unsigned(&self, id: u32) -> Option<u64> {
        self.find_child(id).and_then(Element::as_unsigned)
    }

    /// Signed value of the first child with the given ID.
    pub fn child_signed(&self, id: u32) -> Option<i64> {
        self.find_child(id).and_then(Element::as_signed)
    }

    /// Float value of the first child with the given ID.
    pub fn child_float(&self, id: u32) -> Option<f64> {
        self.find_child(id).and_then(Element::as_float)
    }

    /// String value of the first child with the given ID.
    pub fn child_str(&self, id: u32) -> Option<&str> {
        self.find_child(id).and_then(Element::as_str)
    }

    /// Binary value of the first child with the given ID.
    pub fn child_binary(&self, id: u32) -> Option<&[u8]> {
        self.find_child(id).and_then(Element::as_binary)
    }

    /// Value as unsigned integer.
    pub fn as_unsigned(&self) -> Option<u64> {
        match self.value {
            ElementValue::Unsigned(v) => Some(v),
            _ => None,
        }
    }

    /// Value as signed integer.
    pub fn as_signed(&self) -> Option<i64> {
        match self.value {
            ElementValue::Signed(v) | ElementValue::Date(v) => Some(v),
            _ => None,
        }
    }

    /// Value as float.
    pub fn as_float(&self) -> Option<f64> {
        match self.value {
            ElementValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Value as string (ASCII or UTF-8).
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ElementValue::String(s) | ElementValue::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Value as binary data.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match &self.value {
            ElementValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Append a child. Does nothing on leaves.
    pub fn push(&mut self, child: Element) {
        if let Some(children) = self.children_mut() {
            children.push(child);
        }
    }

    /// Replace the first child with the same ID, or append it.
    pub fn replace_child(&mut self, child: Element) {
        if let Some(children) = self.children_mut() {
            match children.iter().position(|c| c.id == child.id) {
                Some(index) => {
                    children.splice(index..=index, std::iter::once(child));
                }
                None => children.push(child),
            }
        }
    }

    /// Remove every child with the given ID, returning how many were removed.
    pub fn remove_children(&mut self, id: u32) -> usize {
        match self.children_mut() {
            Some(children) => {
                let before = children.len();
                children.retain(|c| c.id != id);
                before - children.len()
            }
            None => 0,
        }
    }

    /// Size of the encoded content (excluding the header).
    pub fn content_size(&self) -> u64 {
        match &self.value {
            ElementValue::Master(children) => children.iter().map(Element::encoded_size).sum(),
            ElementValue::Unsigned(v) => ebml::encode_unsigned_int(*v).len() as u64,
            ElementValue::Signed(v) => ebml::encode_signed_int(*v).len() as u64,
            ElementValue::Float(_) | ElementValue::Date(_) => 8,
            ElementValue::String(s) | ElementValue::Utf8(s) => s.len() as u64,
            ElementValue::Binary(b) => b.len() as u64,
            ElementValue::Void(size) => *size,
        }
    }

    /// Size of the encoded element (header + content).
    pub fn encoded_size(&self) -> u64 {
        let content = self.content_size();
        ebml::header_length(self.id, content) as u64 + content
    }

    /// Serialise the element with a minimal size field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_size() as usize);
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Serialise the element with its size field exactly `size_length` bytes wide.
    pub fn to_bytes_with_size_length(&self, size_length: usize) -> Result<Vec<u8>> {
        let content = self.content_size();
        let mut out =
            ElementHeader::encode_with_size_length(self.id, Some(content), size_length)?;
        self.encode_content(&mut out)?;
        Ok(out)
    }

    /// Append the serialised element to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let content = self.content_size();
        out.extend_from_slice(&ElementHeader::encode(self.id, Some(content))?);
        self.encode_content(out)
    }

    fn encode_content(&self, out: &mut Vec<u8>) -> Result<()> {
        match &self.value {
            ElementValue::Master(children) => {
                for child in children {
                    child.encode(out)?;
                }
            }
            ElementValue::Unsigned(v) => out.extend_from_slice(&ebml::encode_unsigned_int(*v)),
            ElementValue::Signed(v) => out.extend_from_slice(&ebml::encode_signed_int(*v)),
            ElementValue::Float(v) => out.extend_from_slice(&ebml::encode_float(*v)),
            ElementValue::Date(v) => out.extend_from_slice(&v.to_be_bytes()),
            ElementValue::String(s) | ElementValue::Utf8(s) => out.extend_from_slice(s.as_bytes()),
            ElementValue::Binary(b) => out.extend_from_slice(b),
            ElementValue::Void(size) => out.resize(out.len() + *size as usize, 0),
        }
        Ok(())
    }

    /// Decode a complete element (header and content) from `data`.
    ///
    /// `offset` is the absolute position of `data[0]`, used for error
    /// reporting and anomalies.
    pub fn decode(data: &[u8], offset: u64, anomalies: &mut Vec<Anomaly>) -> Result<Element> {
        let header = ElementHeader::parse(data).map_err(|e| e.at_offset(offset))?;
        let size = header.size.ok_or_else(|| MkvError::CorruptElement {
            offset,
            id: header.id,
            reason: "unknown size where a known size is required".into(),
        })?;
        let end = header.header_size as u64 + size;
        if end > data.len() as u64 {
            return Err(MkvError::CorruptElement {
                offset,
                id: header.id,
                reason: format!(
                    "declared size {} exceeds the {} available bytes",
                    size,
                    data.len() - header.header_size
                ),
            });
        }
        let content = &data[header.header_size..end as usize];
        Self::decode_content(
            header.id,
            content,
            offset + header.header_size as u64,
            0,
            anomalies,
        )
    }

    /// Decode the content of an element whose header has already been read.
    ///
    /// `offset` is the absolute position of `content[0]`.
    pub fn decode_content(
        id: u32,
        content: &[u8],
        offset: u64,
        depth: u32,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<Element> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(MkvError::RecursionLimit { depth });
        }

        let kind = element_kind(id).unwrap_or(ElementKind::Binary);
        let leaf = |value: Result<ElementValue>, anomalies: &mut Vec<Anomaly>| match value {
            Ok(value) => Element::new(id, value),
            Err(e) => {
                anomalies.push(Anomaly::new(offset, id, e.to_string()));
                Element::binary(id, content)
            }
        };

        let element = match kind {
            ElementKind::Master => {
                let children = Self::decode_children(id, content, offset, depth, anomalies)?;
                Element::master(id, children)
            }
            ElementKind::Unsigned => leaf(
                ebml::read_unsigned_int(content).map(ElementValue::Unsigned),
                anomalies,
            ),
            ElementKind::Signed => leaf(
                ebml::read_signed_int(content).map(ElementValue::Signed),
                anomalies,
            ),
            ElementKind::Float => leaf(ebml::read_float(content).map(ElementValue::Float), anomalies),
            ElementKind::String => leaf(
                lossless_string(content, ebml::read_string).map(ElementValue::String),
                anomalies,
            ),
            ElementKind::Utf8 => leaf(
                lossless_string(content, ebml::read_utf8).map(ElementValue::Utf8),
                anomalies,
            ),
            ElementKind::Date => leaf(ebml::read_date(content).map(ElementValue::Date), anomalies),
            ElementKind::Binary => Element::binary(id, content),
            ElementKind::Void => Element::void(content.len() as u64),
        };
        Ok(element)
    }

    /// Decode the children of a master. A child whose header is unreadable
    /// or whose extent leaves the parent ends the walk: an anomaly is
    /// recorded and the remaining bytes are kept verbatim inside an EbmlVoid.
    fn decode_children(
        parent: u32,
        content: &[u8],
        offset: u64,
        depth: u32,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<Vec<Element>> {
        let mut children = Vec::new();
        let mut pos = 0usize;

        while pos < content.len() {
            let child_offset = offset + pos as u64;
            let extent = match ElementHeader::parse(&content[pos..]) {
                Ok(header) => match header.size {
                    Some(size) => {
                        let start = pos + header.header_size;
                        match (start as u64).checked_add(size) {
                            Some(end) if end <= content.len() as u64 => {
                                Ok((header.id, start, end as usize))
                            }
                            _ => Err(format!("child 0x{:X} overruns its parent", header.id)),
                        }
                    }
                    None => Err(format!("child 0x{:X} has an unknown size", header.id)),
                },
                Err(e) => Err(format!("undecodable child header: {}", e)),
            };

            let (id, start, end) = match extent {
                Ok(extent) => extent,
                Err(reason) => {
                    anomalies.push(Anomaly::new(child_offset, parent, reason));
                    children.push(Element::binary(elements::VOID, &content[pos..]));
                    break;
                }
            };
            children.push(Self::decode_content(
                id,
                &content[start..end],
                offset + start as u64,
                depth + 1,
                anomalies,
            )?);
            pos = end;
        }

        Ok(children)
    }
}

/// Decode a string only if re-encoding it reproduces the original bytes.
///
/// Trailing NUL padding is the one accepted difference; anything else after
/// the first NUL would be lost on rewrite.
fn lossless_string(content: &[u8], read: fn(&[u8]) -> Result<String>) -> Result<String> {
    let text = read(content)?;
    if content[text.len()..].iter().any(|&b| b != 0) {
        return Err(MkvError::Other("string contains data after a NUL terminator".into()));
    }
    Ok(text)
}

impl EbmlHeader {
    /// Build an EbmlHeader from a decoded EBML master element.
    pub fn from_element(element: &Element) -> Result<Self> {
        if element.id != elements::EBML {
            return Err(MkvError::InvalidEbmlHeader(format!(
                "expected EBML element, found 0x{:X}",
                element.id
            )));
        }
        let defaults = EbmlHeader::default();
        let doc_type = element
            .child_str(elements::DOC_TYPE)
            .map(str::to_string)
            .ok_or_else(|| MkvError::InvalidEbmlHeader("missing DocType".into()))?;
        Ok(Self {
            version: element
                .child_unsigned(elements::EBML_VERSION)
                .unwrap_or(defaults.version),
            read_version: element
                .child_unsigned(elements::EBML_READ_VERSION)
                .unwrap_or(defaults.read_version),
            max_id_length: element
                .child_unsigned(elements::EBML_MAX_ID_LENGTH)
                .unwrap_or(defaults.max_id_length),
            max_size_length: element
                .child_unsigned(elements::EBML_MAX_SIZE_LENGTH)
                .unwrap_or(defaults.max_size_length),
            doc_type,
            doc_type_version: element
                .child_unsigned(elements::DOC_TYPE_VERSION)
                .unwrap_or(1),
            doc_type_read_version: element
                .child_unsigned(elements::DOC_TYPE_READ_VERSION)
                .unwrap_or(1),
        })
    }

    /// Build the EBML master element for this header.
    pub fn to_element(&self) -> Element {
        Element::master(
            elements::EBML,
            vec![
                Element::unsigned(elements::EBML_VERSION, self.version),
                Element::unsigned(elements::EBML_READ_VERSION, self.read_version),
                Element::unsigned(elements::EBML_MAX_ID_LENGTH, self.max_id_length),
                Element::unsigned(elements::EBML_MAX_SIZE_LENGTH, self.max_size_length),
                Element::string(elements::DOC_TYPE, self.doc_type.clone()),
                Element::unsigned(elements::DOC_TYPE_VERSION, self.doc_type_version),
                Element::unsigned(elements::DOC_TYPE_READ_VERSION, self.doc_type_read_version),
            ],
        )
    }
}
