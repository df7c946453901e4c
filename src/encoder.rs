//! Schema-driven encoder.
//!
//! Mirrors [`crate::decoder`]: walks a [`Schema`] against an already-decoded
//! [`Scope`] document and emits bytes into a growing buffer. The document is
//! treated as authoritative — any data_type/length mismatch is fatal, since
//! emitting a malformed package silently would be worse than failing early.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{CodecError, FieldPath};
use crate::expr::resolve_value;
use crate::primitive::{self, DataType};
use crate::schema::{DataTypeRef, DecodeTable, DecodeValue, Schema, SchemaNode, PACKAGE_VERSION_STRING_FIELD};
use crate::value::{Scope, Value};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub struct EncodeOutcome {
    pub bytes: Vec<u8>,
    /// The recomputed header CRC, when the schema carries a checksum field.
    pub header_checksum: Option<u32>,
}

#[derive(Default)]
struct EncodeCtx {
    info: Option<Scope>,
}

pub fn encode(schema: &Schema, document: &Scope) -> Result<EncodeOutcome, CodecError> {
    let mut buf = Vec::new();
    let mut ctx = EncodeCtx::default();
    let mut header_checksum = None;
    let path = FieldPath::default();
    encode_sequence(&schema.root, document, &mut buf, &[], &mut ctx, &path, schema, &mut header_checksum)?;
    Ok(EncodeOutcome { bytes: buf, header_checksum })
}

#[allow(clippy::too_many_arguments)]
fn encode_sequence(
    nodes: &[SchemaNode],
    scope: &Scope,
    buf: &mut Vec<u8>,
    ancestors: &[&Scope],
    ctx: &mut EncodeCtx,
    path: &FieldPath,
    schema: &Schema,
    header_checksum_out: &mut Option<u32>,
) -> Result<(), CodecError> {
    for node in nodes {
        match node {
            SchemaNode::Scalar {
                name,
                length,
                data_type,
                decode,
            } => {
                let field_path = path.push(name);
                let is_header_checksum = schema.header_checksum_field.as_deref() == Some(name.as_str());

                if is_header_checksum {
                    let computed = CRC32.checksum(buf);
                    *header_checksum_out = Some(computed);
                    buf.extend_from_slice(&computed.to_le_bytes());
                } else {
                    let value = scope.get(name).ok_or_else(|| CodecError::SchemaError {
                        path: field_path.clone(),
                        message: "field missing from document".into(),
                    })?;
                    let resolved_len = if length.is_remaining() {
                        natural_length_for(value, data_type, &field_path)?
                    } else {
                        length.resolve(scope, ancestors, ctx.info.as_ref(), &field_path)? as usize
                    };
                    let bytes = encode_scalar_value(
                        value,
                        data_type,
                        decode.as_ref(),
                        resolved_len,
                        scope,
                        ancestors,
                        ctx,
                        schema,
                        &field_path,
                    )?;
                    buf.extend_from_slice(&bytes);
                }

                if name == PACKAGE_VERSION_STRING_FIELD {
                    ctx.info = Some(scope.clone());
                }
            }
            SchemaNode::RecordGroup {
                name,
                count: _,
                pre_count,
                repeated,
            } => {
                let field_path = path.push(name);
                let list = scope
                    .get(name)
                    .and_then(Value::as_list)
                    .ok_or_else(|| CodecError::SchemaError {
                        path: field_path.clone(),
                        message: "record group missing from document".into(),
                    })?;
                let mut group_ancestors: Vec<&Scope> = ancestors.to_vec();
                group_ancestors.push(scope);

                let mut start = 0usize;
                if !pre_count.is_empty() {
                    let elem = list.first().and_then(Value::as_map).ok_or_else(|| CodecError::SchemaError {
                        path: field_path.clone(),
                        message: "record group element 0 missing".into(),
                    })?;
                    encode_sequence(pre_count, elem, buf, &group_ancestors, ctx, &field_path, schema, header_checksum_out)?;
                    start = 1;
                }
                for elem in &list[start..] {
                    let elem = elem.as_map().ok_or_else(|| CodecError::SchemaError {
                        path: field_path.clone(),
                        message: "record group element is not an object".into(),
                    })?;
                    encode_sequence(repeated, elem, buf, &group_ancestors, ctx, &field_path, schema, header_checksum_out)?;
                }
            }
            SchemaNode::Nested { name, children } => {
                let field_path = path.push(name);
                let sub = scope.get(name).and_then(Value::as_map).ok_or_else(|| CodecError::SchemaError {
                    path: field_path.clone(),
                    message: "nested object missing from document".into(),
                })?;
                let mut nested_ancestors: Vec<&Scope> = ancestors.to_vec();
                nested_ancestors.push(scope);
                encode_sequence(children, sub, buf, &nested_ancestors, ctx, &field_path, schema, header_checksum_out)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_scalar_value(
    value: &Value,
    data_type: &DataTypeRef,
    decode: Option<&DecodeTable>,
    length: usize,
    scope: &Scope,
    ancestors: &[&Scope],
    ctx: &mut EncodeCtx,
    schema: &Schema,
    path: &FieldPath,
) -> Result<Vec<u8>, CodecError> {
    match data_type {
        DataTypeRef::Literal(ty) => {
            let raw = match (decode, value) {
                (Some(table), Value::Text(symbol)) => match table.int_for_symbol(symbol) {
                    Some(n) => Value::Int(n),
                    None => value.clone(),
                },
                _ => value.clone(),
            };
            primitive::encode_scalar(&raw, *ty, length, path)
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
                    let sub_scope = value.as_map().ok_or_else(|| CodecError::SchemaError {
                        path: path.clone(),
                        message: "vendor-defined field is not an object in the document".into(),
                    })?;
                    let sub_ancestors: Vec<&Scope> = ancestors.iter().copied().chain(std::iter::once(scope)).collect();
                    let mut sub_buf = Vec::new();
                    let mut dummy = None;
                    encode_sequence(sub_nodes, sub_scope, &mut sub_buf, &sub_ancestors, ctx, path, schema, &mut dummy)?;
                    Ok(pad_or_truncate(sub_buf, length))
                }
                Some(DecodeValue::Symbol(tag)) => {
                    let ty = DataType::parse(tag).ok_or_else(|| CodecError::SchemaError {
                        path: path.clone(),
                        message: format!("unknown data_type tag `{tag}`"),
                    })?;
                    primitive::encode_scalar(value, ty, length, path)
                }
                None => Err(CodecError::SchemaError {
                    path: path.clone(),
                    message: format!("no decode entry for indirect value {peer:?}"),
                }),
            }
        }
    }
}

fn lookup_decode_value<'a>(peer: &Value, table: &'a DecodeTable) -> Option<&'a DecodeValue> {
    match peer {
        Value::Text(s) => table.get_by_symbol(s).or_else(|| peer.as_u64().and_then(|n| table.get_by_int(n))),
        Value::Int(n) => table.get_by_int(*n),
        _ => None,
    }
}

/// Length for a field declared `"length": "remaining"` (only ever seen on
/// `VendorDefinedDescriptorData` in the shipped schemas): the value's own
/// natural byte length, since there is no declared length to honor here —
/// the enclosing Vendor Defined region's `pad_or_truncate` reconciles the
/// result against the outer descriptor's declared length.
fn natural_length_for(value: &Value, data_type: &DataTypeRef, path: &FieldPath) -> Result<usize, CodecError> {
    match data_type {
        DataTypeRef::Literal(ty) => primitive::natural_length(value, *ty, path),
        DataTypeRef::Indirect(peer_name) => Err(CodecError::SchemaError {
            path: path.clone(),
            message: format!("`remaining` length on indirectly-typed field `{peer_name}` is not supported"),
        }),
    }
}

/// Right-truncates or zero-pads `bytes` in place to exactly `length` bytes.
fn pad_or_truncate(mut bytes: Vec<u8>, length: usize) -> Vec<u8> {
    bytes.resize(length, 0);
    bytes
}
