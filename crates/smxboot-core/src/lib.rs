//! smxboot-core - declarative boot-image composition
//!
//! This crate turns a declarative YAML document into addressed binary
//! payloads and device-programming scripts:
//!
//! - **[`document`]** - the document model (HEAD/DATA/BODY sections) and the
//!   two-phase load that resolves interdependent segments.
//! - **[`segment`]** - typed data segments (raw blobs, device-configuration
//!   blocks, device trees, boot images, bootloader images) and the segment
//!   database they live in.
//! - **[`script`]** - the line-oriented programming-command language,
//!   resolution against the segment database, and proportional progress
//!   weighting.
//! - **[`codec`]** - the binary formats the segment loaders compose and
//!   parse.
//!
//! The crate performs no device I/O; a transport layer is expected to
//! consume the resolved command records.

pub mod codec;
pub mod document;
pub mod error;
pub mod paths;
pub mod script;
pub mod segment;
pub mod template;
pub mod util;
pub mod value;

pub use document::Document;
pub use error::{Error, ErrorKind, Result};
pub use script::{Command, CommandKind, Script};
pub use segment::{Segment, SegmentDb, SegmentKind, SegmentRef};
