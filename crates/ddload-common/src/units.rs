//! Byte-size helpers

use byte_unit::{Byte, UnitType};

/// Bytes in one mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Convert a (possibly fractional) MiB count into whole bytes, truncating
pub fn mib_to_bytes(mib: f64) -> u64 {
    if !mib.is_finite() || mib <= 0.0 {
        return 0;
    }
    (mib * MIB as f64) as u64
}

/// Render a byte count with a binary unit, e.g. `1.50 GiB`
pub fn human_bytes(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{adjusted:.2}")
}
