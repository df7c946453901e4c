//! Fault injection: targeted mutation of a decoded document or extracted
//! image bytes, using the codec as a library. Each mode is a thin, pure
//! mutation function; [`crate::orchestrator`] wires them into the
//! unpack-mutate-repack pipeline and owns all file I/O.

use rand::Rng;

use crate::error::{CodecError, FieldPath};
use crate::primitive::{self, DataType};
use crate::value::{Scope, Value};

/// Flips one randomly chosen bit in each byte of a hex-string field's
/// underlying byte representation, re-rendering it through the same
/// primitive codec path the schema interpreter uses.
fn flip_hex_bits(text: &str, length: usize, rng: &mut impl Rng) -> Result<String, CodecError> {
    let path = FieldPath::default();
    let value = Value::Text(text.to_string());
    let mut bytes = primitive::encode_scalar(&value, DataType::HexLe, length, &path)?;
    for byte in bytes.iter_mut() {
        let bit = rng.gen_range(0..8);
        *byte ^= 1 << bit;
    }
    match primitive::decode_scalar(&bytes, DataType::HexLe, &path)? {
        Value::Text(s) => Ok(s),
        _ => unreachable!("hex-le always decodes to text"),
    }
}

fn missing(message: impl Into<String>) -> CodecError {
    CodecError::SchemaError {
        path: FieldPath::default(),
        message: message.into(),
    }
}

fn first_record_mut(document: &mut Scope) -> Result<&mut Scope, CodecError> {
    document
        .get_mut("FirmwareDeviceIdentificationArea")
        .and_then(Value::as_map_mut)
        .and_then(|area| area.get_mut("FirmwareDeviceIDRecords"))
        .and_then(Value::as_list_mut)
        .and_then(|records| records.first_mut())
        .and_then(Value::as_map_mut)
        .ok_or_else(|| missing("no FirmwareDeviceIDRecords[0] in document"))
}

fn all_records_mut(document: &mut Scope) -> Result<&mut [Value], CodecError> {
    document
        .get_mut("FirmwareDeviceIdentificationArea")
        .and_then(Value::as_map_mut)
        .and_then(|area| area.get_mut("FirmwareDeviceIDRecords"))
        .and_then(Value::as_list_mut)
        .map(Vec::as_mut_slice)
        .ok_or_else(|| missing("no FirmwareDeviceIDRecords in document"))
}

/// Flips one random bit per byte of `FirmwareDeviceIDRecords[0].RecordDescriptors[0].InitialDescriptorData`.
pub fn flip_descriptor(document: &mut Scope, rng: &mut impl Rng) -> Result<(), CodecError> {
    let record = first_record_mut(document)?;
    let length = record
        .get("RecordDescriptors")
        .and_then(Value::as_list)
        .and_then(|d| d.first())
        .and_then(Value::as_map)
        .and_then(|d| d.get("InitialDescriptorLength"))
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("no InitialDescriptorLength on RecordDescriptors[0]"))? as usize;

    let descriptor = record
        .get_mut("RecordDescriptors")
        .and_then(Value::as_list_mut)
        .and_then(|d| d.first_mut())
        .and_then(Value::as_map_mut)
        .ok_or_else(|| missing("no RecordDescriptors[0] on first record"))?;
    let data = descriptor
        .get_mut("InitialDescriptorData")
        .and_then(Value::as_text_mut)
        .ok_or_else(|| missing("no InitialDescriptorData on RecordDescriptors[0]"))?;
    *data = flip_hex_bits(data, length, rng)?;
    Ok(())
}

/// Locates the first `RecordDescriptors[*]` entry (across all records) whose
/// `AdditionalDescriptorType == "UUID"` and flips its identifier data, rather
/// than unconditionally indexing record 4 as an older revision of the
/// reference tool did (which could index out of range on a package with
/// fewer than five device records).
pub fn flip_uuid_descriptor(document: &mut Scope, rng: &mut impl Rng) -> Result<(), CodecError> {
    let records = all_records_mut(document)?;
    for record in records.iter_mut() {
        let record = record.as_map_mut().ok_or_else(|| missing("FirmwareDeviceIDRecords element is not an object"))?;
        let descriptors = record
            .get_mut("RecordDescriptors")
            .and_then(Value::as_list_mut)
            .ok_or_else(|| missing("record has no RecordDescriptors"))?;
        for descriptor in descriptors.iter_mut() {
            let descriptor = match descriptor.as_map_mut() {
                Some(d) => d,
                None => continue,
            };
            let is_uuid = descriptor.get("AdditionalDescriptorType").and_then(Value::as_text) == Some("UUID");
            if !is_uuid {
                continue;
            }
            let length = descriptor
                .get("AdditionalDescriptorLength")
                .and_then(Value::as_u64)
                .ok_or_else(|| missing("UUID descriptor missing AdditionalDescriptorLength"))? as usize;
            let data = descriptor
                .get_mut("AdditionalDescriptorIdentifierData")
                .and_then(Value::as_text_mut)
                .ok_or_else(|| missing("UUID descriptor missing AdditionalDescriptorIdentifierData"))?;
            *data = flip_hex_bits(data, length, rng)?;
            return Ok(());
        }
    }
    Err(missing("no descriptor with AdditionalDescriptorType == UUID found"))
}

/// XORs the first byte of a component image's bytes with `0x02`, in place.
pub fn flip_image_bytes(data: &mut [u8]) {
    if let Some(first) = data.first_mut() {
        *first ^= 0x02;
    }
}

/// XORs the first byte of the trailing signature region with `0x02`, in place.
pub fn flip_signkey_bytes(data: &mut [u8]) {
    flip_image_bytes(data);
}

const LARGEFILE_MIN: usize = 100 * 1024 * 1024;
const LARGEFILE_MAX: usize = 200 * 1024 * 1024;

/// Chooses a padding length uniformly in `[100 MiB, 200 MiB)` and appends
/// that many zero bytes to `data`.
pub fn grow_largefile(data: &mut Vec<u8>, rng: &mut impl Rng) {
    let padding = rng.gen_range(LARGEFILE_MIN..LARGEFILE_MAX);
    data.resize(data.len() + padding, 0);
}
