//! Source enumeration and catalog diffing.

pub mod enumerator;
pub mod reconcile;

pub use enumerator::{to_entry, Enumerator, ScanMode, ScanReport};
pub use reconcile::{decide, is_unchanged, Decision};
