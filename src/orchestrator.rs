//! End-to-end pipelines: unpack, repack, dump-header and error-inject.
//!
//! This is the thin orchestration layer the CLI drives. It owns all
//! filesystem I/O and directory bookkeeping; the codec modules it calls stay
//! pure. Output directory collisions are resolved by renaming the existing
//! directory to `<name>_backup_<k>`, `k` the smallest free positive integer.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use rand::rngs::ThreadRng;
use serde::Serialize;

use crate::encoder;
use crate::error::CodecError;
use crate::fault;
use crate::image::{self, SplitOutcome};
use crate::schema::{self, Schema, PAYLOAD_CHECKSUM_FIELD};
use crate::value::{Scope, Value};
use crate::decoder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultMode {
    Descriptor,
    Uuid,
    Image,
    Signkey,
    Largefile,
}

impl FaultMode {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "descriptor" => Self::Descriptor,
            "UUID" | "uuid" => Self::Uuid,
            "image" => Self::Image,
            "signkey" => Self::Signkey,
            "largefile" => Self::Largefile,
            _ => return None,
        })
    }
}

pub struct UnpackReport {
    pub header_crc_match: bool,
    pub payload_crc_match: Option<bool>,
    pub unpack_dir: PathBuf,
}

impl UnpackReport {
    /// Per §6: exit status is success regardless of CRC outcome; this is
    /// only the summary callers print.
    pub fn compliant(&self) -> bool {
        self.header_crc_match && self.payload_crc_match.unwrap_or(true)
    }
}

fn schema_err(message: impl Into<String>) -> CodecError {
    CodecError::SchemaError {
        path: Default::default(),
        message: message.into(),
    }
}

fn load_schema(spec_version: &str) -> Result<Schema, CodecError> {
    schema::load_embedded(spec_version).map_err(schema_err)
}

/// Renames an existing directory out of the way (to `<name>_backup_<k>`)
/// before (re)creating it fresh.
fn make_fresh_dir(dir: &Path) -> Result<(), CodecError> {
    if dir.exists() {
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        let name = dir
            .file_name()
            .ok_or_else(|| schema_err(format!("output path `{}` has no file name", dir.display())))?
            .to_string_lossy()
            .into_owned();
        let mut k = 1u32;
        loop {
            let candidate = parent.join(format!("{name}_backup_{k}"));
            if !candidate.exists() {
                fs::rename(dir, &candidate)?;
                break;
            }
            k += 1;
        }
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

fn write_header_json(path: &Path, document: &Scope) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document
        .serialize(&mut ser)
        .map_err(|e| schema_err(format!("failed to serialize header.json: {e}")))?;
    fs::write(path, buf)?;
    Ok(())
}

fn read_header_json(path: &Path) -> Result<Scope, CodecError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| schema_err(format!("failed to parse {}: {e}", path.display())))
}

fn component_count(document: &Scope) -> Result<usize, CodecError> {
    document
        .get("ComponentImageInformationArea")
        .and_then(Value::as_map)
        .and_then(|m| m.get("ComponentImageInformation"))
        .and_then(Value::as_list)
        .map(|l| l.len())
        .ok_or_else(|| schema_err("document has no ComponentImageInformationArea.ComponentImageInformation"))
}

fn image_file_names(document: &Scope) -> Result<Vec<String>, CodecError> {
    let list = document
        .get("ComponentImageInformationArea")
        .and_then(Value::as_map)
        .and_then(|m| m.get("ComponentImageInformation"))
        .and_then(Value::as_list)
        .ok_or_else(|| schema_err("document has no ComponentImageInformationArea.ComponentImageInformation"))?;
    list.iter()
        .enumerate()
        .map(|(i, elem)| {
            let elem = elem.as_map().ok_or_else(|| schema_err(format!("ComponentImageInformation[{i}] is not an object")))?;
            let id = elem
                .get("ComponentIdentifier")
                .and_then(Value::as_text)
                .ok_or_else(|| schema_err(format!("ComponentImageInformation[{i}] missing ComponentIdentifier")))?;
            let ver = elem
                .get("ComponentVersionString")
                .and_then(Value::as_text)
                .ok_or_else(|| schema_err(format!("ComponentImageInformation[{i}] missing ComponentVersionString")))?;
            Ok(format!("{id}_{ver}_image_{i}.bin"))
        })
        .collect()
}

const REMAINING_FILE: &str = "remaining_firmwareData.bin";

/// Unpacks `input` into `<output_dir>/unpack/`: `header.json`, one `.bin`
/// per component image, and `remaining_firmwareData.bin`. When
/// `dump_header` is set, only `header.json` is written.
pub fn unpack(input: &Path, spec_version: &str, output_dir: &Path, dump_header: bool) -> Result<UnpackReport, CodecError> {
    debug!("loading schema {spec_version}");
    let schema = load_schema(spec_version)?;
    let bytes = fs::read(input)?;
    debug!("decoding header ({} bytes)", bytes.len());
    let outcome = decoder::decode(&schema, &bytes)?;

    let unpack_dir = output_dir.join("unpack");
    make_fresh_dir(&unpack_dir)?;
    write_header_json(&unpack_dir.join("header.json"), &outcome.document)?;

    let header_crc_match = outcome.header_checksum_valid.unwrap_or(true);
    let mut payload_crc_match = None;

    if !dump_header {
        debug!("splitting component images");
        let split = image::split_images(&outcome.document, &bytes)?;
        for img in &split.images {
            fs::write(unpack_dir.join(&img.file_name), &img.bytes)?;
        }
        fs::write(unpack_dir.join(REMAINING_FILE), &split.remaining)?;
        payload_crc_match = payload_checksum_flag(&schema, &outcome.document, &split);
    }

    Ok(UnpackReport {
        header_crc_match,
        payload_crc_match,
        unpack_dir,
    })
}

fn payload_checksum_flag(schema: &Schema, document: &Scope, split: &SplitOutcome) -> Option<bool> {
    if !schema.has_payload_checksum() {
        return None;
    }
    let stored = document.get(PAYLOAD_CHECKSUM_FIELD).and_then(Value::as_u64);
    match (stored, split.payload_crc) {
        (Some(stored), Some(computed)) => Some(stored == computed as u64),
        _ => None,
    }
}

/// Reads `<output_dir>/unpack/header.json` and the component image/signature
/// files next to it, re-encodes the header, and writes
/// `<output_dir>/repack/repacked_data.fwpkg`.
pub fn repack(output_dir: &Path, spec_version: &str) -> Result<PathBuf, CodecError> {
    debug!("loading schema {spec_version}");
    let schema = load_schema(spec_version)?;
    let unpack_dir = output_dir.join("unpack");
    let mut document = read_header_json(&unpack_dir.join("header.json"))?;

    let file_names = image_file_names(&document)?;
    let images: Vec<Vec<u8>> = file_names
        .iter()
        .map(|name| fs::read(unpack_dir.join(name)).map_err(CodecError::from))
        .collect::<Result<_, _>>()?;
    let remaining_path = unpack_dir.join(REMAINING_FILE);
    let remaining = remaining_path.exists().then(|| fs::read(&remaining_path)).transpose()?;

    debug!("encoding header from {}", unpack_dir.join("header.json").display());
    let mut header = encoder::encode(&schema, &document)?;
    fs::write(output_dir.join("header_info.bin"), &header.bytes)?;
    debug!("joining {} component image(s)", images.len());
    let mut bundle = image::join_images(&header.bytes, &document, &images, remaining.as_deref())?;

    if schema.has_payload_checksum() {
        debug!("recomputing payload checksum and re-emitting header");
        let header_len = header.bytes.len();
        let payload_end = bundle.len() - remaining.as_ref().map_or(0, Vec::len);
        let crc = crc32(&bundle[header_len..payload_end]);
        document.insert(PAYLOAD_CHECKSUM_FIELD.to_string(), Value::Int(crc as u64));
        header = encoder::encode(&schema, &document)?;
        fs::write(output_dir.join("header_info.bin"), &header.bytes)?;
        bundle = image::join_images(&header.bytes, &document, &images, remaining.as_deref())?;
    }

    let repack_dir = output_dir.join("repack");
    make_fresh_dir(&repack_dir)?;
    let out_path = repack_dir.join("repacked_data.fwpkg");
    fs::write(&out_path, &bundle)?;
    Ok(out_path)
}

fn crc32(bytes: &[u8]) -> u32 {
    use crc::{Crc, CRC_32_ISO_HDLC};
    const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    CRC32.checksum(bytes)
}

/// Unpacks `input`, mutates the decoded document or an extracted file
/// according to `mode`, recomputes the header checksum, and repacks into
/// `output_dir`.
pub fn error_inject(input: &Path, spec_version: &str, output_dir: &Path, mode: FaultMode) -> Result<PathBuf, CodecError> {
    load_schema(spec_version)?; // fail fast on an unknown spec version
    let report = unpack(input, spec_version, output_dir, false)?;
    debug!("applying {mode:?} fault");
    let mut rng: ThreadRng = rand::thread_rng();

    match mode {
        FaultMode::Descriptor => {
            let mut document = read_header_json(&report.unpack_dir.join("header.json"))?;
            fault::flip_descriptor(&mut document, &mut rng)?;
            write_header_json(&report.unpack_dir.join("header.json"), &document)?;
        }
        FaultMode::Uuid => {
            let mut document = read_header_json(&report.unpack_dir.join("header.json"))?;
            fault::flip_uuid_descriptor(&mut document, &mut rng)?;
            write_header_json(&report.unpack_dir.join("header.json"), &document)?;
        }
        FaultMode::Image => {
            let document = read_header_json(&report.unpack_dir.join("header.json"))?;
            let count = component_count(&document)?;
            if count == 0 {
                return Err(schema_err("no component images to corrupt"));
            }
            let names = image_file_names(&document)?;
            let path = report.unpack_dir.join(&names[0]);
            let mut bytes = fs::read(&path)?;
            fault::flip_image_bytes(&mut bytes);
            fs::write(&path, bytes)?;
        }
        FaultMode::Signkey => {
            let path = report.unpack_dir.join(REMAINING_FILE);
            let mut bytes = fs::read(&path)?;
            fault::flip_signkey_bytes(&mut bytes);
            fs::write(&path, bytes)?;
        }
        FaultMode::Largefile => {
            let path = report.unpack_dir.join(REMAINING_FILE);
            let mut bytes = fs::read(&path).unwrap_or_default();
            fault::grow_largefile(&mut bytes, &mut rng);
            fs::write(&path, bytes)?;
        }
    }

    // repack() recomputes PackageHeaderChecksum unconditionally, so the
    // corrupted package still parses; the injected fault is semantic, not
    // structural (§4.5).
    repack(output_dir, spec_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_package() -> Vec<u8> {
        use crc::{Crc, CRC_32_ISO_HDLC};
        const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0xAA; 16]);
        bytes.push(0x01);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0xe0, 0x01, 0x40, 0x42, 0x0f, 0x1e, 0x0f, 0x0a, 0x0f, 0x01, 0xe7, 0x07, 0x06]);
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.push(1);
        let version = b"1.0.0";
        bytes.push(version.len() as u8);
        bytes.extend_from_slice(version);

        bytes.push(1);
        let record_start = bytes.len();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(1);
        let set_version = b"v1";
        bytes.push(set_version.len() as u8);
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        bytes.extend_from_slice(set_version);

        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&[0x34, 0x12]);

        let record_len = (bytes.len() - record_start) as u16;
        let record_len_bytes = record_len.to_le_bytes();
        bytes[record_start] = record_len_bytes[0];
        bytes[record_start + 1] = record_len_bytes[1];

        bytes.extend_from_slice(&1u16.to_le_bytes()); // ComponentImageCount = 1
        bytes.extend_from_slice(&0u16.to_le_bytes()); // ComponentClassification
        bytes.extend_from_slice(&[0x01, 0x00]); // ComponentIdentifier hex-le
        bytes.extend_from_slice(&0u32.to_le_bytes()); // ComponentComparisonStamp
        bytes.extend_from_slice(&0u16.to_le_bytes()); // ComponentOptions
        bytes.extend_from_slice(&0u16.to_le_bytes()); // RequestedComponentActivationMethod
        let offset_pos = bytes.len();
        bytes.extend_from_slice(&0u32.to_le_bytes()); // ComponentLocationOffset placeholder
        bytes.extend_from_slice(&16u32.to_le_bytes()); // ComponentSize
        bytes.push(1); // ComponentVersionStringType
        bytes.push(2); // ComponentVersionStringLength
        bytes.extend_from_slice(&0u32.to_le_bytes()); // ComponentOpaqueDataLength
        bytes.extend_from_slice(b"v1"); // ComponentVersionString

        let header_size = (bytes.len() + 4) as u16;
        let size_bytes = header_size.to_le_bytes();
        bytes[17] = size_bytes[0];
        bytes[18] = size_bytes[1];
        let offset_bytes = (header_size as u32).to_le_bytes();
        bytes[offset_pos..offset_pos + 4].copy_from_slice(&offset_bytes);

        let crc = CRC32.checksum(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());

        bytes.extend((0u8..16).collect::<Vec<_>>()); // component image bytes
        bytes.extend_from_slice(&[0xDE, 0xAD]); // trailing signature
        bytes
    }

    #[test]
    fn unpack_then_repack_round_trips() {
        let dir = std::env::temp_dir().join(format!("pldm-fwpkg-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("sample.fwpkg");
        fs::write(&input, sample_package()).unwrap();

        let report = unpack(&input, "pldm_spec_1.1.0", &dir, false).unwrap();
        assert!(report.header_crc_match);
        assert_eq!(report.payload_crc_match, None); // 1.1.0 has no payload checksum

        let repacked_path = repack(&dir, "pldm_spec_1.1.0").unwrap();
        let repacked = fs::read(&repacked_path).unwrap();
        let original = sample_package();
        assert_eq!(repacked, original);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_collisions_are_backed_up() {
        let dir = std::env::temp_dir().join(format!("pldm-fwpkg-backup-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("unpack")).unwrap();
        fs::write(dir.join("unpack").join("marker.txt"), b"first").unwrap();

        make_fresh_dir(&dir.join("unpack")).unwrap();
        assert!(dir.join("unpack_backup_1").join("marker.txt").exists());
        assert!(dir.join("unpack").exists());
        assert!(!dir.join("unpack").join("marker.txt").exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
