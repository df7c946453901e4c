//! Bidirectional codec for DMTF PLDM Firmware Update (DSP0267) packages.
//!
//! A declarative JSON schema describes the PLDM header layout; [`decoder`]
//! and [`encoder`] are a matched pair of interpreters that walk that schema
//! against a byte stream or a decoded document, respectively. [`image`]
//! splits and rejoins component image payloads by the offsets the header
//! declares, [`fault`] injects targeted corruption for downstream validator
//! testing, and [`orchestrator`] wires all of the above into the unpack,
//! repack, dump-header and error-inject pipelines the CLI exposes.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod expr;
pub mod fault;
pub mod image;
pub mod orchestrator;
pub mod primitive;
pub mod schema;
pub mod value;

pub use error::CodecError;
pub use orchestrator::{unpack, repack, error_inject, FaultMode, UnpackReport};
