//! Unix file mode selection for shared-memory segments.
//!
//! The data segment is never writable by anyone but its owning producer.
//! Control segments are writable by their criticality peers by default —
//! that's how consumers CAS slot state words and write their own
//! transaction logs — unless the deployment turns on strict permissions,
//! in which case they fall back to owner-only.

/// Mode applied to the data segment: always owner read-write only.
/// Consumers open it read-only regardless, so group/other bits would only
/// ever be exercised by a misbehaving peer.
pub const DATA_SEGMENT_MODE: u32 = 0o600;

/// Mode applied to a control segment (QM or ASIL-B), given whether the
/// deployment's `strict` flag is set.
pub fn control_segment_mode(strict: bool) -> u32 {
    if strict {
        0o600
    } else {
        0o666
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s1_data_segment_is_owner_only() {
        assert_eq!(DATA_SEGMENT_MODE & 0o077, 0);
    }

    #[test]
    fn scenario_s2_control_segment_is_world_writable_without_strict() {
        assert_eq!(control_segment_mode(false), 0o666);
    }

    #[test]
    fn strict_mode_restricts_control_segment_to_owner() {
        assert_eq!(control_segment_mode(true) & 0o077, 0);
    }
}
