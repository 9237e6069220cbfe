//! Shared constants for motion and acquisition.
//!
//! This module centralizes:
//! - Camera buffer memory budget
//! - Controller settle delays and timeouts
//! - Continuous-scan defaults (return velocity, extra margin)

use std::time::Duration;

// =============================================================================
// Timing
// =============================================================================

/// Delay between sending a Micos command and reading its reply, and the
/// polling period while waiting for a motor to settle.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Timeout for reading one reply line from a controller.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a single positional move or homing run.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound for a shutter to reach its target state.
pub const DEFAULT_SHUTTER_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Continuous scans
// =============================================================================

/// Velocity (deg/s) used to bring the rotation stage back between scans.
pub const DEFAULT_RETURN_VELOCITY: f64 = 25.0;

/// Extra angle (deg) added on both sides of the acceleration ramp.
pub const DEFAULT_ADDITIONAL_MARGIN: f64 = 0.5;

// =============================================================================
// Camera memory
// =============================================================================

/// Camera RAM the recording buffer may occupy (40 GiB).
pub const CAMERA_BUFFER_BUDGET_BYTES: u64 = 40 * (1 << 30);

/// Number of frames that fit into [`CAMERA_BUFFER_BUDGET_BYTES`].
///
/// `bytes_per_pixel` is the sensor bit depth divided by 8; a value of 0 is
/// treated as 1.
pub fn max_buffered_frames(width: u32, height: u32, bytes_per_pixel: u32) -> usize {
    let frame_bytes = u64::from(width)
        .saturating_mul(u64::from(height))
        .saturating_mul(u64::from(bytes_per_pixel.max(1)));
    if frame_bytes == 0 {
        return usize::MAX;
    }
    usize::try_from(CAMERA_BUFFER_BUDGET_BYTES / frame_bytes).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_budget_for_full_frame_sensor() {
        // 2560 x 2160 x 2 bytes = 11_059_200 bytes per frame
        assert_eq!(max_buffered_frames(2560, 2160, 2), 3883);
    }

    #[test]
    fn degenerate_inputs_do_not_divide_by_zero() {
        assert_eq!(max_buffered_frames(0, 100, 2), usize::MAX);
        assert_eq!(max_buffered_frames(1024, 1024, 0), 40 * 1024);
    }
}
