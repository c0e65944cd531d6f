//! Shared helpers so the Point-vs-Global-Variable branch (spec.md §9,
//! "Polymorphism over reference kind") lives in one place instead of
//! being replicated inside every block.

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::value_store::{ValueEntry, ValueStoreGateway};

/// Reads the current Final-view entry behind a reference, whichever kind
/// it is. Returns `None` if the referenced id/name currently has no
/// value (the caller treats that as a `Resolve` skip).
pub async fn read_final(
    gateway: &dyn ValueStoreGateway,
    reference: &SourceRef,
) -> Result<Option<ValueEntry>, MemprocError> {
    match reference {
        SourceRef::Point(id) => Ok(gateway.get_final(&[*id]).await?.remove(id)),
        SourceRef::GlobalVariable(name) => gateway.get_global_variable(name).await,
    }
}

/// Writes a value to whichever kind of output a reference names.
pub async fn write_output(
    gateway: &dyn ValueStoreGateway,
    reference: &SourceRef,
    value: &str,
    time: i64,
    duration: Option<i64>,
) -> Result<bool, MemprocError> {
    match reference {
        SourceRef::Point(id) => gateway.write_or_add(*id, value, time, duration).await,
        SourceRef::GlobalVariable(name) => gateway.write_global_variable(name, value, time).await,
    }
}

/// Formats an `f64` to a fixed number of decimal places the way every
/// numeric block's output column is rendered.
pub fn round_to(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_requested_places() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.005, 2), 1.0);
        assert_eq!(round_to(10.0, 0), 10.0);
    }
}
