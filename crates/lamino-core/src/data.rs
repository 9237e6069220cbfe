//! Camera frame type.

use chrono::{DateTime, Utc};

/// One image delivered by a camera.
///
/// Pixels are stored row-major. For bit depths above 8 each pixel takes two
/// little-endian bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per pixel (e.g., 8, 12, 16)
    pub bit_depth: u32,

    /// Raw pixel data
    pub data: Vec<u8>,

    /// Sequence number within the recording
    pub frame_number: u64,

    /// Acquisition time
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Create a frame from 16-bit pixels.
    pub fn from_u16(width: u32, height: u32, frame_number: u64, pixels: &[u16]) -> Self {
        let mut data = Vec::with_capacity(pixels.len() * 2);
        for pixel in pixels {
            data.extend_from_slice(&pixel.to_le_bytes());
        }

        Self {
            width,
            height,
            bit_depth: 16,
            data,
            frame_number,
            timestamp: Utc::now(),
        }
    }

    /// Create a frame from 8-bit pixels.
    pub fn from_u8(width: u32, height: u32, frame_number: u64, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bit_depth: 8,
            data: pixels,
            frame_number,
            timestamp: Utc::now(),
        }
    }

    /// Bytes used to store one pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        if self.bit_depth > 8 {
            2
        } else {
            1
        }
    }

    /// Pixels decoded as 16-bit values. `None` for 8-bit frames.
    pub fn pixels_u16(&self) -> Option<Vec<u16>> {
        if self.bytes_per_pixel() != 2 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        )
    }

    /// True if the buffer length matches the dimensions.
    pub fn is_consistent(&self) -> bool {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|p| p.checked_mul(self.bytes_per_pixel()));
        expected == Some(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_frames_store_little_endian() {
        let frame = Frame::from_u16(2, 1, 7, &[0x0102, 0xffff]);
        assert_eq!(frame.data, vec![0x02, 0x01, 0xff, 0xff]);
        assert_eq!(frame.pixels_u16(), Some(vec![0x0102, 0xffff]));
        assert_eq!(frame.frame_number, 7);
        assert!(frame.is_consistent());
    }

    #[test]
    fn eight_bit_frames_have_one_byte_per_pixel() {
        let frame = Frame::from_u8(2, 2, 0, vec![1, 2, 3]);
        assert_eq!(frame.bytes_per_pixel(), 1);
        assert!(frame.pixels_u16().is_none());
        assert!(!frame.is_consistent());
    }
}
