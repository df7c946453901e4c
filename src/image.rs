//! Component image splitter/joiner.
//!
//! On unpack, slices component images and the trailing signature region out
//! of the source buffer by the offsets the header declares. On repack,
//! re-interleaves those same blobs (read back from disk by the orchestrator)
//! into the header buffer, inserting zero padding wherever an image's
//! declared offset leaves a gap.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::CodecError;
use crate::value::{Scope, Value};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct ComponentImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct SplitOutcome {
    pub images: Vec<ComponentImage>,
    pub remaining: Vec<u8>,
    /// CRC-32 over the payload region: from the end of the header through
    /// the end of the last component image, inclusive of any padding the
    /// declared offsets imply between the header and the first image, or
    /// between successive images. Excludes the trailing signature region.
    /// `None` when there are no component images.
    pub payload_crc: Option<u32>,
}

fn header_size(document: &Scope) -> Result<usize, CodecError> {
    document
        .get("PackageHeaderInformation")
        .and_then(Value::as_map)
        .and_then(|m| m.get("PackageHeaderSize"))
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| CodecError::SchemaError {
            path: Default::default(),
            message: "document has no PackageHeaderInformation.PackageHeaderSize".into(),
        })
}

fn component_image_list(document: &Scope) -> Result<&[Value], CodecError> {
    document
        .get("ComponentImageInformationArea")
        .and_then(Value::as_map)
        .and_then(|m| m.get("ComponentImageInformation"))
        .and_then(Value::as_list)
        .ok_or_else(|| CodecError::SchemaError {
            path: Default::default(),
            message: "document has no ComponentImageInformationArea.ComponentImageInformation".into(),
        })
}

fn image_identity(elem: &Scope, index: usize) -> Result<(u64, u64, String), CodecError> {
    let missing = |field: &str| CodecError::SchemaError {
        path: Default::default(),
        message: format!("ComponentImageInformation[{index}] missing `{field}`"),
    };
    let offset = elem.get("ComponentLocationOffset").and_then(Value::as_u64).ok_or_else(|| missing("ComponentLocationOffset"))?;
    let size = elem.get("ComponentSize").and_then(Value::as_u64).ok_or_else(|| missing("ComponentSize"))?;
    let identifier = elem.get("ComponentIdentifier").and_then(Value::as_text).ok_or_else(|| missing("ComponentIdentifier"))?;
    let version = elem.get("ComponentVersionString").and_then(Value::as_text).ok_or_else(|| missing("ComponentVersionString"))?;
    Ok((offset, size, format!("{identifier}_{version}_image_{index}.bin")))
}

/// Extracts each component image and the trailing signature region from the
/// raw package, using the offsets/sizes the decoded header declares.
pub fn split_images(document: &Scope, source: &[u8]) -> Result<SplitOutcome, CodecError> {
    let list = component_image_list(document)?;
    let mut images = Vec::with_capacity(list.len());
    let mut last_end = 0usize;

    for (i, elem) in list.iter().enumerate() {
        let elem = elem.as_map().ok_or_else(|| CodecError::SchemaError {
            path: Default::default(),
            message: format!("ComponentImageInformation[{i}] is not an object"),
        })?;
        let (offset, size, file_name) = image_identity(elem, i)?;
        let (offset, size) = (offset as usize, size as usize);
        let end = offset.checked_add(size).ok_or_else(|| CodecError::Bounds {
            path: Default::default(),
            message: format!("image {i} offset/size overflow"),
        })?;
        if end > source.len() {
            return Err(CodecError::Truncated {
                path: Default::default(),
                offset,
                needed: size,
                available: source.len().saturating_sub(offset),
            });
        }
        images.push(ComponentImage {
            file_name,
            bytes: source[offset..end].to_vec(),
        });
        last_end = end;
    }

    let remaining = source[last_end.min(source.len())..].to_vec();
    let payload_crc = if list.is_empty() {
        None
    } else {
        let start = header_size(document)?.min(last_end);
        Some(CRC32.checksum(&source[start..last_end]))
    };
    Ok(SplitOutcome { images, remaining, payload_crc })
}

/// Re-interleaves `images` (in header order) and `remaining` after the
/// encoded `header` bytes, inserting zero padding for gaps between the
/// header end and/or successive images' declared offsets.
///
/// Errors (rather than silently using an absolute-value gap, as an older
/// revision of the reference tool did) when an image's declared offset
/// would require overlapping already-written bytes.
pub fn join_images(header: &[u8], document: &Scope, images: &[Vec<u8>], remaining: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let list = component_image_list(document)?;
    if list.len() != images.len() {
        return Err(CodecError::SchemaError {
            path: Default::default(),
            message: format!("expected {} component images, got {}", list.len(), images.len()),
        });
    }

    let mut buf = header.to_vec();
    for (i, (elem, image_bytes)) in list.iter().zip(images).enumerate() {
        let elem = elem.as_map().ok_or_else(|| CodecError::SchemaError {
            path: Default::default(),
            message: format!("ComponentImageInformation[{i}] is not an object"),
        })?;
        let (offset, _size, _name) = image_identity(elem, i)?;
        let offset = offset as usize;
        if offset < buf.len() {
            return Err(CodecError::SchemaError {
                path: Default::default(),
                message: format!(
                    "image {i} declared offset 0x{offset:x} is before the current payload end 0x{:x} (images would overlap)",
                    buf.len()
                ),
            });
        }
        buf.resize(offset, 0);
        buf.extend_from_slice(image_bytes);
    }
    if let Some(tail) = remaining {
        buf.extend_from_slice(tail);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn image_entry(offset: u64, size: u64, id: &str, ver: &str) -> Value {
        let mut m: Scope = IndexMap::new();
        m.insert("ComponentLocationOffset".into(), Value::Int(offset));
        m.insert("ComponentSize".into(), Value::Int(size));
        m.insert("ComponentIdentifier".into(), Value::Text(id.into()));
        m.insert("ComponentVersionString".into(), Value::Text(ver.into()));
        Value::Map(m)
    }

    fn doc_with_images(header_len: u64, entries: Vec<Value>) -> Scope {
        let mut header_info: Scope = IndexMap::new();
        header_info.insert("PackageHeaderSize".into(), Value::Int(header_len));
        let mut area: Scope = IndexMap::new();
        area.insert("ComponentImageCount".into(), Value::Int(entries.len() as u64));
        area.insert("ComponentImageInformation".into(), Value::List(entries));
        let mut doc: Scope = IndexMap::new();
        doc.insert("PackageHeaderInformation".into(), Value::Map(header_info));
        doc.insert("ComponentImageInformationArea".into(), Value::Map(area));
        doc
    }

    #[test]
    fn splits_single_image_and_trailing_signature() {
        let header_len = 10;
        let doc = doc_with_images(header_len as u64, vec![image_entry(header_len as u64, 16, "0x1234", "v1")]);
        let mut source = vec![0u8; header_len];
        source.extend((0u8..16).collect::<Vec<_>>());
        source.extend_from_slice(&[0xAA, 0xBB]); // trailing signature

        let outcome = split_images(&doc, &source).unwrap();
        assert_eq!(outcome.images.len(), 1);
        assert_eq!(outcome.images[0].file_name, "0x1234_v1_image_0.bin");
        assert_eq!(outcome.images[0].bytes, (0u8..16).collect::<Vec<_>>());
        assert_eq!(outcome.remaining, vec![0xAA, 0xBB]);
        assert_eq!(outcome.payload_crc, Some(CRC32.checksum(&(0u8..16).collect::<Vec<_>>())));
    }

    #[test]
    fn joins_images_with_padding_between_them() {
        let header_len = 20;
        let doc = doc_with_images(
            header_len as u64,
            vec![
                image_entry(header_len as u64, 50, "0x01", "v1"),
                image_entry(header_len as u64 + 100, 50, "0x02", "v1"),
            ],
        );
        let header = vec![0u8; header_len];
        let images = vec![vec![1u8; 50], vec![2u8; 50]];
        let joined = join_images(&header, &doc, &images, None).unwrap();
        assert_eq!(joined.len(), header_len + 150);
        let pad_start = header_len + 50;
        assert!(joined[pad_start..pad_start + 50].iter().all(|b| *b == 0));
    }

    #[test]
    fn overlapping_offset_is_an_error() {
        let header_len = 20;
        let doc = doc_with_images(header_len as u64, vec![image_entry(5, 50, "0x01", "v1")]);
        let header = vec![0u8; header_len];
        let images = vec![vec![1u8; 50]];
        assert!(join_images(&header, &doc, &images, None).is_err());
    }

    #[test]
    fn payload_crc_includes_inter_image_padding() {
        let header_len = 20u64;
        let doc = doc_with_images(
            header_len,
            vec![
                image_entry(header_len, 50, "0x01", "v1"),
                image_entry(header_len + 100, 50, "0x02", "v1"),
            ],
        );
        let mut source = vec![0u8; header_len as usize];
        source.extend(vec![1u8; 50]);
        source.extend(vec![0u8; 50]); // inter-image padding
        source.extend(vec![2u8; 50]);

        let outcome = split_images(&doc, &source).unwrap();
        let expected_payload = &source[header_len as usize..header_len as usize + 150];
        assert_eq!(outcome.payload_crc, Some(CRC32.checksum(expected_payload)));
    }
}
