//! Hop latency quantization mask selection.

use super::orch::{IntOrchError, Result};

/// Coarsest quantization step is `1 << MAX_QMASK_SHIFT`.
pub const MAX_QMASK_SHIFT: u32 = 30;

/// Returns the quantization mask for a tolerated latency change.
///
/// The mask is `0xFFFFFFFF << k` where `1 << k` is the largest power of two
/// not exceeding `latency_change`, with `k` capped at [`MAX_QMASK_SHIFT`]. Fails with
/// `InvalidArgument` for a negative change.
pub fn select_qmask(latency_change: i64) -> Result<u32> {
    if latency_change < 0 {
        return Err(IntOrchError::InvalidArgument(
            "Flow latency change value must equal or greater than zero.".to_string(),
        ));
    }
    Ok(qmask_for(latency_change as u64))
}

/// Infallible form of [`select_qmask`] for already validated budgets.
pub fn qmask_for(latency_change: u64) -> u32 {
    if latency_change <= 1 {
        return u32::MAX;
    }
    let shift = (u64::BITS - 1 - latency_change.leading_zeros()).min(MAX_QMASK_SHIFT);
    u32::MAX << shift
}
