pub mod ap;
pub mod config;
pub mod descriptor;
pub mod ie;
pub mod range;
pub mod scan;
pub mod stream;

pub use ap::{decode_scan_buffer, ApAssembler, ApRecord, AuthKind, Encryption};
pub use config::ScanConfig;
pub use range::RangeInfo;
pub use scan::{scan, scan_with, KernelWext, ScanError, ScanRead, Scanner, WirelessExtensions};
pub use stream::{EventCursor, EventStream, Extracted};
