//! Borrowed view of a multi-channel 8-bit image.

use crate::error::ConfigError;
use crate::index::LinearIndex;

/// A read-only `rows x cols x channels` image with interleaved channels.
///
/// The view borrows the caller's buffer; pairwise cost oracles reference it
/// for the duration of a solve call without copying.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    /// Pixel data, `(row * cols + col) * channels + channel`.
    pub data: &'a [u8],
    /// Number of rows (M).
    pub rows: usize,
    /// Number of columns (N).
    pub cols: usize,
    /// Number of channels (C).
    pub channels: usize,
}

impl<'a> ImageView<'a> {
    /// Create a new view after validating the buffer length against the dimensions.
    pub fn new(
        data: &'a [u8],
        rows: usize,
        cols: usize,
        channels: usize,
    ) -> Result<Self, ConfigError> {
        if rows == 0 || cols == 0 {
            return Err(ConfigError::InvalidGrid { rows, cols });
        }
        if channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        let expected = rows
            .checked_mul(cols)
            .and_then(|pixels| pixels.checked_mul(channels))
            .ok_or(ConfigError::SizeOverflow {
                rows,
                cols,
                depth: channels,
            })?;
        if data.len() != expected {
            return Err(ConfigError::ImageSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            rows,
            cols,
            channels,
        })
    }

    /// Number of pixels (M*N).
    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.rows * self.cols
    }

    /// Index helper matching this view's layout.
    #[must_use]
    pub fn linear_index(&self) -> LinearIndex {
        LinearIndex::new(self.rows, self.cols, self.channels)
    }

    /// All channels of the pixel with flattened index `pixel`.
    #[inline(always)]
    #[must_use]
    pub fn pixel(&self, pixel: usize) -> &[u8] {
        let start = pixel * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Value of channel `c` at `(row, col)`.
    #[inline(always)]
    #[must_use]
    pub fn get(&self, row: usize, col: usize, c: usize) -> u8 {
        self.data[self.linear_index().index(row, col, c)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_view_interleaved() {
        let data = vec![
            1, 2, 3, 4, 5, 6, // row 0
            7, 8, 9, 10, 11, 12, // row 1
        ];
        let view = ImageView::new(&data, 2, 2, 3).unwrap();
        assert_eq!(view.pixel(1), &[4, 5, 6]);
        assert_eq!(view.pixel(2), &[7, 8, 9]);
        assert_eq!(view.get(1, 1, 2), 12);
        assert_eq!(view.num_pixels(), 4);
    }

    #[test]
    fn test_invalid_buffer_size() {
        let data = vec![1, 2, 3];
        let result = ImageView::new(&data, 2, 2, 1);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::ImageSizeMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(
            ImageView::new(&[], 0, 3, 3),
            Err(ConfigError::InvalidGrid { rows: 0, cols: 3 })
        ));
        assert_eq!(
            ImageView::new(&[], 1, 1, 0).unwrap_err(),
            ConfigError::NoChannels
        );
    }

    #[test]
    fn test_overflowing_dimensions_rejected() {
        assert_eq!(
            ImageView::new(&[], usize::MAX, 2, 1).unwrap_err(),
            ConfigError::SizeOverflow {
                rows: usize::MAX,
                cols: 2,
                depth: 1
            }
        );
        assert!(matches!(
            ImageView::new(&[], 2, usize::MAX / 2, 3),
            Err(ConfigError::SizeOverflow { .. })
        ));
    }
}
