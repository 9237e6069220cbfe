//! Synthetic projection images for mock frames.

/// LCG with the glibc constants, for reproducible noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Projection of a bright disc whose horizontal position follows `angle`
/// (deg), on a flat background with per-frame noise.
///
/// Values stay below `max_value`, so the pattern fits the sensor bit depth.
pub fn projection(width: u32, height: u32, angle: f64, frame_number: u64, max_value: u16) -> Vec<u16> {
    let (w, h) = (width as usize, height as usize);
    let mut buffer = vec![0u16; w * h];
    if w == 0 || h == 0 {
        return buffer;
    }

    let max = f64::from(max_value);
    let background = 0.6 * max;
    let cx = w as f64 / 2.0 + (w as f64 / 4.0) * angle.to_radians().cos();
    let cy = h as f64 / 2.0;
    let radius = (w.min(h) as f64 / 8.0).max(1.0);
    let seed = frame_number.wrapping_mul(2654435761);

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            let mut value = background;
            let r2 = dx * dx + dy * dy;
            if r2 < radius * radius {
                // attenuation along the chord through the disc
                value *= 1.0 - 0.5 * (1.0 - r2 / (radius * radius)).sqrt();
            }
            let noise = (prng(seed ^ idx as u64) & 0xff) as f64 / 255.0 - 0.5;
            value += noise * 0.02 * max;
            buffer[idx] = value.clamp(0.0, max) as u16;
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_stays_in_range() {
        let pixels = projection(64, 32, 30.0, 3, 4095);
        assert_eq!(pixels.len(), 64 * 32);
        assert!(pixels.iter().all(|&p| p <= 4095));
    }

    #[test]
    fn disc_is_darker_than_background() {
        let pixels = projection(64, 64, 90.0, 0, 60000);
        // At 90 deg the disc sits in the centre column.
        let centre = pixels[32 * 64 + 32];
        let corner = pixels[0];
        assert!(centre < corner);
    }
}
