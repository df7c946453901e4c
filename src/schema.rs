//! In-memory schema model, loaded once per traversal from a versioned
//! PLDM firmware update spec document.
//!
//! The source JSON is an ordered object tree; each leaf attribute set is
//! `{length, data_type, count, decode}` (§6). Parsing happens once, up
//! front, so the decoder/encoder interpreters walk a typed tree instead of
//! re-inspecting JSON attributes on every field.

use serde_json::Value as Json;

use crate::expr::Expr;
use crate::primitive::DataType;

/// Either a concrete `data_type` tag, or the name of a sibling field whose
/// decoded value selects the tag through a `decode` table.
#[derive(Clone, Debug, PartialEq)]
pub enum DataTypeRef {
    Literal(DataType),
    Indirect(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodeKey {
    Int(u64),
    Symbol(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodeValue {
    Symbol(String),
    Nested(Vec<SchemaNode>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodeTable(pub Vec<(DecodeKey, DecodeValue)>);

impl DecodeTable {
    pub fn get_by_int(&self, key: u64) -> Option<&DecodeValue> {
        self.0.iter().find_map(|(k, v)| match k {
            DecodeKey::Int(i) if *i == key => Some(v),
            _ => None,
        })
    }

    pub fn get_by_symbol(&self, key: &str) -> Option<&DecodeValue> {
        self.0.iter().find_map(|(k, v)| match k {
            DecodeKey::Symbol(s) if s == key => Some(v),
            _ => None,
        })
    }

    /// Inverse lookup used by the encoder: symbolic name -> raw int key.
    pub fn int_for_symbol(&self, symbol: &str) -> Option<u64> {
        self.0.iter().find_map(|(k, v)| match (k, v) {
            (DecodeKey::Int(i), DecodeValue::Symbol(s)) if s == symbol => Some(*i),
            _ => None,
        })
    }
}

pub const VENDOR_DEFINED: &str = "Vendor Defined";

#[derive(Clone, Debug, PartialEq)]
pub enum SchemaNode {
    Scalar {
        name: String,
        length: Expr,
        data_type: DataTypeRef,
        decode: Option<DecodeTable>,
    },
    RecordGroup {
        name: String,
        count: Expr,
        pre_count: Vec<SchemaNode>,
        repeated: Vec<SchemaNode>,
    },
    Nested {
        name: String,
        children: Vec<SchemaNode>,
    },
}

impl SchemaNode {
    pub fn name(&self) -> &str {
        match self {
            SchemaNode::Scalar { name, .. } => name,
            SchemaNode::RecordGroup { name, .. } => name,
            SchemaNode::Nested { name, .. } => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub root: Vec<SchemaNode>,
    /// Name of the field that carries the header CRC-32, derived from the
    /// loaded document rather than assumed from the spec version (1.0.0
    /// spells it `Package Header Checksum`, later versions `PackageHeaderChecksum`).
    pub header_checksum_field: Option<String>,
}

const CHECKSUM_FIELD_ALIASES: [&str; 2] = ["PackageHeaderChecksum", "Package Header Checksum"];
pub const PAYLOAD_CHECKSUM_FIELD: &str = "PLDMFWPackagePayloadChecksum";
pub const PACKAGE_VERSION_STRING_FIELD: &str = "PackageVersionString";

impl Schema {
    pub fn parse(doc: &Json) -> Result<Self, String> {
        let obj = doc.as_object().ok_or("schema document must be a JSON object")?;
        let root = parse_children(obj)?;
        let header_checksum_field = root
            .iter()
            .find(|n| CHECKSUM_FIELD_ALIASES.contains(&n.name()))
            .map(|n| n.name().to_string());
        Ok(Self {
            root,
            header_checksum_field,
        })
    }

    pub fn has_payload_checksum(&self) -> bool {
        self.root.iter().any(|n| n.name() == PAYLOAD_CHECKSUM_FIELD)
    }
}

fn parse_children(obj: &serde_json::Map<String, Json>) -> Result<Vec<SchemaNode>, String> {
    obj.iter()
        .map(|(name, value)| parse_node(name.clone(), value))
        .collect()
}

fn parse_node(name: String, value: &Json) -> Result<SchemaNode, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("field `{name}` must be a JSON object"))?;

    if obj.contains_key("decode") && obj.contains_key("length") {
        let length = Expr::parse(&obj["length"]).map_err(|e| format!("field `{name}`: {e}"))?;
        let data_type = parse_data_type_ref(&obj["data_type"])?;
        let decode = parse_decode_table(&obj["decode"])?;
        return Ok(SchemaNode::Scalar {
            name,
            length,
            data_type,
            decode: Some(decode),
        });
    }
    if obj.contains_key("length") {
        let length = Expr::parse(&obj["length"]).map_err(|e| format!("field `{name}`: {e}"))?;
        let data_type = parse_data_type_ref(&obj["data_type"])?;
        return Ok(SchemaNode::Scalar {
            name,
            length,
            data_type,
            decode: None,
        });
    }
    if obj.contains_key("count") {
        let count = Expr::parse(&obj["count"]).map_err(|e| format!("field `{name}`: {e}"))?;
        let count_index = obj.keys().position(|k| k == "count").unwrap_or(obj.len());
        let other_keys: Vec<&String> = obj.keys().filter(|k| k.as_str() != "count").collect();
        let (pre_keys, repeated_keys) = other_keys.split_at(count_index.min(other_keys.len()));

        let pre_count = pre_keys
            .iter()
            .map(|k| parse_node((*k).clone(), &obj[*k]))
            .collect::<Result<Vec<_>, _>>()?;
        let repeated = repeated_keys
            .iter()
            .map(|k| parse_node((*k).clone(), &obj[*k]))
            .collect::<Result<Vec<_>, _>>()?;

        return Ok(SchemaNode::RecordGroup {
            name,
            count,
            pre_count,
            repeated,
        });
    }

    let children = parse_children(obj)?;
    Ok(SchemaNode::Nested { name, children })
}

fn parse_data_type_ref(value: &Json) -> Result<DataTypeRef, String> {
    let tag = value.as_str().ok_or("data_type must be a string")?;
    Ok(match DataType::parse(tag) {
        Some(ty) => DataTypeRef::Literal(ty),
        None => DataTypeRef::Indirect(tag.to_string()),
    })
}

fn parse_decode_table(value: &Json) -> Result<DecodeTable, String> {
    let obj = value.as_object().ok_or("decode must be a JSON object")?;
    let mut entries = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        let key = parse_decode_key(k);
        let value = match v {
            Json::String(s) => DecodeValue::Symbol(s.clone()),
            Json::Object(nested) => DecodeValue::Nested(parse_children(nested)?),
            other => return Err(format!("unsupported decode value for `{k}`: {other}")),
        };
        entries.push((key, value));
    }
    Ok(DecodeTable(entries))
}

fn parse_decode_key(raw: &str) -> DecodeKey {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if let Ok(v) = u64::from_str_radix(hex, 16) {
            return DecodeKey::Int(v);
        }
    }
    if let Ok(v) = raw.parse::<u64>() {
        return DecodeKey::Int(v);
    }
    DecodeKey::Symbol(raw.to_string())
}

/// Embedded schema documents for each supported spec version.
pub fn embedded_schema(version: &str) -> Option<&'static str> {
    Some(match version {
        "pldm_spec_1.0.0" => include_str!("../spec/pldm_spec_1.0.0.json"),
        "pldm_spec_1.1.0" => include_str!("../spec/pldm_spec_1.1.0.json"),
        "pldm_spec_1.2.0" => include_str!("../spec/pldm_spec_1.2.0.json"),
        "pldm_spec_1.3.0" => include_str!("../spec/pldm_spec_1.3.0.json"),
        _ => return None,
    })
}

pub fn load_embedded(version: &str) -> Result<Schema, String> {
    let text = embedded_schema(version).ok_or_else(|| format!("unknown spec version `{version}`"))?;
    let doc: Json = serde_json::from_str(text).map_err(|e| format!("invalid schema JSON: {e}"))?;
    Schema::parse(&doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pre_count_and_repeated_fields() {
        let json: Json = serde_json::from_str(
            r#"{
                "InitialDescriptorType": {"length": 2, "data_type": "hex-le"},
                "InitialDescriptorLength": {"length": 2, "data_type": "int"},
                "InitialDescriptorData": {"length": "InitialDescriptorLength", "data_type": "hex-le"},
                "count": "DescriptorCount",
                "AdditionalDescriptorType": {"length": 2, "data_type": "hex-le"}
            }"#,
        )
        .unwrap();
        let node = parse_node("RecordDescriptors".into(), &json).unwrap();
        match node {
            SchemaNode::RecordGroup { pre_count, repeated, .. } => {
                assert_eq!(pre_count.len(), 3);
                assert_eq!(repeated.len(), 1);
                assert_eq!(repeated[0].name(), "AdditionalDescriptorType");
            }
            _ => panic!("expected record group"),
        }
    }

    #[test]
    fn all_embedded_schemas_parse() {
        for v in ["pldm_spec_1.0.0", "pldm_spec_1.1.0", "pldm_spec_1.2.0", "pldm_spec_1.3.0"] {
            let schema = load_embedded(v).unwrap_or_else(|e| panic!("{v}: {e}"));
            assert!(schema.header_checksum_field.is_some(), "{v} missing checksum field");
        }
        let v12 = load_embedded("pldm_spec_1.2.0").unwrap();
        assert!(v12.has_payload_checksum());
        let v10 = load_embedded("pldm_spec_1.0.0").unwrap();
        assert!(!v10.has_payload_checksum());
    }
}
