//! Schema-driven decoder.
//!
//! Walks a [`Schema`] against a byte buffer, producing an ordered [`Scope`]
//! that mirrors the schema's field order (so a re-serialized `header.json`
//! reads the same as a hand-authored one would). The header checksum field is
//! special cased: the stored value is always the *computed* CRC, with the
//! match against the as-read value reported out of band through
//! [`DecodeOutcome`] rather than failing the traversal. A header with a wrong
//! checksum still decodes; only truncation and schema errors are fatal.
//!
//! The payload checksum (`PLDMFWPackagePayloadChecksum`, spec >= 1.2.0) is
//! decoded as an ordinary integer field here — verifying it requires the
//! component image offsets to locate the payload region in the source
//! buffer, which [`crate::image::split_images`] has already sliced out by
//! the time it matters, so that's where the comparison happens
//! ([`crate::orchestrator`] wires the two together).

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{CodecError, FieldPath};
use crate::expr::resolve_value;
use crate::primitive::{self, DataType};
use crate::schema::{
    DataTypeRef, DecodeTable, DecodeValue, Schema, SchemaNode, PACKAGE_VERSION_STRING_FIELD,
};
use crate::value::{Scope, Value};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct DecodeOutcome {
    pub document: Scope,
    /// `None` when the loaded schema carries no header checksum field.
    pub header_checksum_valid: Option<bool>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, path: &FieldPath) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.bytes.len() {
            return Err(CodecError::Truncated {
                path: path.clone(),
                offset: self.pos,
                needed: len,
                available: self.bytes.len() - self.pos,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

#[derive(Default)]
struct DecodeCtx {
    info: Option<Scope>,
    header_checksum_match: Option<bool>,
}

pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<DecodeOutcome, CodecError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let mut ctx = DecodeCtx::default();
    let path = FieldPath::default();
    let document = decode_sequence(&schema.root, &mut cursor, &[], &mut ctx, &path, schema)?;
    Ok(DecodeOutcome {
        document,
        header_checksum_valid: ctx.header_checksum_match,
    })
}

fn decode_sequence(
    nodes: &[SchemaNode],
    cursor: &mut Cursor,
    ancestors: &[&Scope],
    ctx: &mut DecodeCtx,
    path: &FieldPath,
    schema: &Schema,
) -> Result<Scope, CodecError> {
    let mut scope = Scope::new();
    for node in nodes {
        match node {
            SchemaNode::Scalar {
                name,
                length,
                data_type,
                decode,
            } => {
                let field_path = path.push(name);
                let resolved_len = if length.is_remaining() {
                    cursor.remaining()
                } else {
                    length.resolve(&scope, ancestors, ctx.info.as_ref(), &field_path)? as usize
                };
                let checksum_boundary = cursor.pos;
                let bytes = cursor.take(resolved_len, &field_path)?;
                let value = decode_scalar_value(
                    bytes,
                    data_type,
                    decode.as_ref(),
                    &scope,
                    ancestors,
                    ctx,
                    schema,
                    &field_path,
                )?;

                let is_header_checksum = schema.header_checksum_field.as_deref() == Some(name.as_str());
                let stored = if is_header_checksum {
                    let computed = CRC32.checksum(&cursor.bytes[..checksum_boundary]) as u64;
                    ctx.header_checksum_match = Some(value.as_u64() == Some(computed));
                    Value::Int(computed)
                } else {
                    value
                };
                scope.insert(name.clone(), stored);
                if name == PACKAGE_VERSION_STRING_FIELD {
                    ctx.info = Some(scope.clone());
                }
            }
            SchemaNode::RecordGroup {
                name,
                count,
                pre_count,
                repeated,
            } => {
                let field_path = path.push(name);
                let count_n = count.resolve(&scope, ancestors, ctx.info.as_ref(), &field_path)?;
                let mut group_ancestors: Vec<&Scope> = ancestors.to_vec();
                group_ancestors.push(&scope);

                let mut list = Vec::new();
                let mut start = 0u64;
                if !pre_count.is_empty() {
                    let elem = decode_sequence(pre_count, cursor, &group_ancestors, ctx, &field_path, schema)?;
                    list.push(Value::Map(elem));
                    start = 1;
                }
                for _ in start..count_n {
                    let elem = decode_sequence(repeated, cursor, &group_ancestors, ctx, &field_path, schema)?;
                    list.push(Value::Map(elem));
                }
                scope.insert(name.clone(), Value::List(list));
            }
            SchemaNode::Nested { name, children } => {
                let field_path = path.push(name);
                let mut nested_ancestors: Vec<&Scope> = ancestors.to_vec();
                nested_ancestors.push(&scope);
                let sub = decode_sequence(children, cursor, &nested_ancestors, ctx, &field_path, schema)?;
                scope.insert(name.clone(), Value::Map(sub));
            }
        }
    }
    Ok(scope)
}

#[allow(clippy::too_many_arguments)]
fn decode_scalar_value(
    bytes: &[u8],
    data_type: &DataTypeRef,
    decode: Option<&DecodeTable>,
    scope: &Scope,
    ancestors: &[&Scope],
    ctx: &mut DecodeCtx,
    schema: &Schema,
    path: &FieldPath,
) -> Result<Value, CodecError> {
    match data_type {
        DataTypeRef::Literal(ty) => {
            let raw = primitive::decode_scalar(bytes, *ty, path)?;
            Ok(match decode.and_then(|table| own_value_symbol(&raw, table)) {
                Some(symbol) => Value::Text(symbol),
                None => raw,
            })
        }
        DataTypeRef::Indirect(peer_name) => {
            let peer = resolve_value(peer_name, scope, ancestors, ctx.info.as_ref())
                .cloned()
                .ok_or_else(|| CodecError::SchemaError {
                    path: path.clone(),
                    message: format!("indirect data_type `{peer_name}` unresolved"),
                })?;
            let table = decode.ok_or_else(|| CodecError::SchemaError {
                path: path.clone(),
                message: "indirect data_type requires a decode table".into(),
            })?;
            match lookup_decode_value(&peer, table) {
                Some(DecodeValue::Nested(sub_nodes)) => {
                    let mut sub_cursor = Cursor { bytes, pos: 0 };
                    let sub_ancestors: Vec<&Scope> = ancestors.iter().copied().chain(std::iter::once(scope)).collect();
                    let sub_scope = decode_sequence(sub_nodes, &mut sub_cursor, &sub_ancestors, ctx, path, schema)
                        .map_err(|e| bound_to_declared_region(e, bytes.len()))?;
                    Ok(Value::Map(sub_scope))
                }
                Some(DecodeValue::Symbol(tag)) => {
                    let ty = DataType::parse(tag).ok_or_else(|| CodecError::SchemaError {
                        path: path.clone(),
                        message: format!("unknown data_type tag `{tag}`"),
                    })?;
                    primitive::decode_scalar(bytes, ty, path)
                }
                None => Err(CodecError::SchemaError {
                    path: path.clone(),
                    message: format!("no decode entry for indirect value {peer:?}"),
                }),
            }
        }
    }
}

/// A Vendor Defined sub-traversal runs over a slice already bounded to the
/// outer descriptor's declared length, so a short read inside it is a
/// bounds violation of that declared region, not ordinary truncation of the
/// overall input buffer.
fn bound_to_declared_region(err: CodecError, declared_len: usize) -> CodecError {
    match err {
        CodecError::Truncated { path, needed, available, .. } => CodecError::Bounds {
            path,
            message: format!(
                "vendor-defined sub-traversal needs {needed} more byte(s) but only {available} remain of the declared {declared_len}-byte region"
            ),
        },
        other => other,
    }
}

fn own_value_symbol(raw: &Value, table: &DecodeTable) -> Option<String> {
    let n = raw.as_u64()?;
    match table.get_by_int(n)? {
        DecodeValue::Symbol(s) => Some(s.clone()),
        DecodeValue::Nested(_) => None,
    }
}

fn lookup_decode_value<'a>(peer: &Value, table: &'a DecodeTable) -> Option<&'a DecodeValue> {
    match peer {
        Value::Text(s) => table.get_by_symbol(s).or_else(|| {
            // Own-decode lookup may have left the value numeric if the code
            // wasn't found; fall through to an int match in that case too.
            peer.as_u64().and_then(|n| table.get_by_int(n))
        }),
        Value::Int(n) => table.get_by_int(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::load_embedded;

    fn sample_package() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0xAA; 16]); // PackageHeaderIdentifier
        bytes.push(0x01); // PackageHeaderFormatRevision
        bytes.extend_from_slice(&0u16.to_le_bytes()); // PackageHeaderSize placeholder, fixed below
        bytes.extend_from_slice(&[0xe0, 0x01, 0x40, 0x42, 0x0f, 0x1e, 0x0f, 0x0a, 0x0f, 0x01, 0xe7, 0x07, 0x06]); // PackageReleaseDateTime
        bytes.extend_from_slice(&16u16.to_le_bytes()); // ComponentBitmapBitLength
        bytes.push(1); // PackageVersionStringType (ASCII)
        let version = b"1.0.0";
        bytes.push(version.len() as u8); // PackageVersionStringLength
        bytes.extend_from_slice(version); // PackageVersionString

        // FirmwareDeviceIdentificationArea
        bytes.push(1); // FirmwareDeviceIDRecordCount
        let record_start = bytes.len();
        bytes.extend_from_slice(&0u16.to_le_bytes()); // RecordLength placeholder
        bytes.push(2); // DescriptorCount
        bytes.extend_from_slice(&0u32.to_le_bytes()); // DeviceUpdateOptionFlags
        bytes.push(1); // ComponentImageSetVersionStringType (ASCII)
        let set_version = b"v1";
        bytes.push(set_version.len() as u8);
        bytes.extend_from_slice(&0u16.to_le_bytes()); // FirmwareDevicePackageDataLength
        bytes.extend_from_slice(&[0xFF, 0xFF]); // ApplicableComponents (2 bytes = 16 bits)
        bytes.extend_from_slice(set_version); // ComponentImageSetVersionString

        // RecordDescriptors: one Initial descriptor (PCI Vendor ID), one
        // Additional descriptor (Vendor Defined) to exercise the bounded
        // nested sub-traversal.
        bytes.extend_from_slice(&1u16.to_le_bytes()); // InitialDescriptorType = PCI Vendor ID
        bytes.extend_from_slice(&2u16.to_le_bytes()); // InitialDescriptorLength
        bytes.extend_from_slice(&[0x34, 0x12]); // InitialDescriptorData (hex-le)
        bytes.extend_from_slice(&0xffffu16.to_le_bytes()); // AdditionalDescriptorType = Vendor Defined
        bytes.extend_from_slice(&10u16.to_le_bytes()); // AdditionalDescriptorLength
        bytes.push(4); // VendorDefinedDescriptorTitleStringLength
        bytes.extend_from_slice(b"test"); // VendorDefinedDescriptorTitleString
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]); // VendorDefinedDescriptorData (remaining, hex-le)
        // FirmwareDevicePackageData is zero-length, nothing to write.

        let record_len = (bytes.len() - record_start) as u16;
        let record_len_bytes = record_len.to_le_bytes();
        bytes[record_start] = record_len_bytes[0];
        bytes[record_start + 1] = record_len_bytes[1];

        // ComponentImageInformationArea: zero images.
        bytes.extend_from_slice(&0u16.to_le_bytes());

        let header_size = (bytes.len() + 4) as u16;
        let size_bytes = header_size.to_le_bytes();
        bytes[17] = size_bytes[0];
        bytes[18] = size_bytes[1];

        let crc = CRC32.checksum(&bytes) as u32;
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_minimal_package_with_valid_checksum() {
        let schema = load_embedded("pldm_spec_1.1.0").unwrap();
        let bytes = sample_package();
        let outcome = decode(&schema, &bytes).unwrap();
        assert_eq!(outcome.header_checksum_valid, Some(true));

        let header_info = outcome.document.get("PackageHeaderInformation").unwrap().as_map().unwrap();
        assert_eq!(header_info.get("PackageVersionString").unwrap().as_text(), Some("1.0.0"));

        let fw_area = outcome.document.get("FirmwareDeviceIdentificationArea").unwrap().as_map().unwrap();
        let records = fw_area.get("FirmwareDeviceIDRecords").unwrap().as_list().unwrap();
        assert_eq!(records.len(), 1);
        let descriptors = records[0].as_map().unwrap().get("RecordDescriptors").unwrap().as_list().unwrap();
        assert_eq!(descriptors.len(), 2);
        let initial = descriptors[0].as_map().unwrap();
        assert_eq!(initial.get("InitialDescriptorType").unwrap().as_text(), Some("PCI Vendor ID"));
        assert_eq!(initial.get("InitialDescriptorData").unwrap().as_text(), Some("0x1234"));

        let additional = descriptors[1].as_map().unwrap();
        assert_eq!(additional.get("AdditionalDescriptorType").unwrap().as_text(), Some("Vendor Defined"));
        let vendor_data = additional.get("AdditionalDescriptorIdentifierData").unwrap().as_map().unwrap();
        assert_eq!(
            vendor_data.get("VendorDefinedDescriptorTitleString").unwrap().as_text(),
            Some("test")
        );
    }

    #[test]
    fn vendor_defined_sub_traversal_does_not_read_past_declared_length() {
        let schema = load_embedded("pldm_spec_1.1.0").unwrap();
        let bytes = sample_package();
        let outcome = decode(&schema, &bytes).unwrap();
        let fw_area = outcome.document.get("FirmwareDeviceIdentificationArea").unwrap().as_map().unwrap();
        let records = fw_area.get("FirmwareDeviceIDRecords").unwrap().as_list().unwrap();
        let descriptors = records[0].as_map().unwrap().get("RecordDescriptors").unwrap().as_list().unwrap();
        let vendor_data = descriptors[1]
            .as_map()
            .unwrap()
            .get("AdditionalDescriptorIdentifierData")
            .unwrap()
            .as_map()
            .unwrap();
        assert_eq!(
            vendor_data.get("VendorDefinedDescriptorData").unwrap().as_text(),
            Some("0x1efbeadde")
        );
    }

    #[test]
    fn flags_corrupted_header_checksum_without_failing() {
        let schema = load_embedded("pldm_spec_1.1.0").unwrap();
        let mut bytes = sample_package();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let outcome = decode(&schema, &bytes).unwrap();
        assert_eq!(outcome.header_checksum_valid, Some(false));
    }
}
