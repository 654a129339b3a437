//! Conversions between flattened indices and grid coordinates.
//!
//! Pixels are flattened row-major (`row * cols + col`). A third dimension
//! (image channel or label) is stored innermost, so all values belonging to
//! one pixel are contiguous.

/// Maps `(row, col, k)` to a flat offset in a `rows x cols x depth` buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearIndex {
    rows: usize,
    cols: usize,
    depth: usize,
}

impl LinearIndex {
    /// Create an index for a `rows x cols x depth` buffer.
    #[must_use]
    pub const fn new(rows: usize, cols: usize, depth: usize) -> Self {
        Self { rows, cols, depth }
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Size of the innermost dimension.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Total number of addressable elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows * self.cols * self.depth
    }

    /// Returns true if the buffer has no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat offset of element `k` of pixel `(row, col)`.
    ///
    /// # Panics
    /// Panics if any coordinate is outside the buffer.
    #[inline]
    #[must_use]
    pub fn index(&self, row: usize, col: usize, k: usize) -> usize {
        assert!(
            row < self.rows && col < self.cols && k < self.depth,
            "coordinate ({row}, {col}, {k}) out of bounds for {}x{}x{}",
            self.rows,
            self.cols,
            self.depth
        );
        (row * self.cols + col) * self.depth + k
    }

    /// Flat offset of element `k` of the pixel with flattened index `pixel`.
    #[inline]
    #[must_use]
    pub fn pixel_offset(&self, pixel: usize, k: usize) -> usize {
        debug_assert!(pixel < self.rows * self.cols && k < self.depth);
        pixel * self.depth + k
    }

    /// Non-panicking variant of [`LinearIndex::index`].
    #[must_use]
    pub fn checked_index(&self, row: usize, col: usize, k: usize) -> Option<usize> {
        (row < self.rows && col < self.cols && k < self.depth)
            .then(|| (row * self.cols + col) * self.depth + k)
    }

    /// Inverse of [`LinearIndex::index`].
    ///
    /// # Panics
    /// Panics if `idx` is not below [`LinearIndex::len`].
    #[inline]
    #[must_use]
    pub fn subscript(&self, idx: usize) -> (usize, usize, usize) {
        assert!(idx < self.len(), "index {idx} out of bounds ({})", self.len());
        let pixel = idx / self.depth;
        (pixel / self.cols, pixel % self.cols, idx % self.depth)
    }

    /// Non-panicking variant of [`LinearIndex::subscript`].
    #[must_use]
    pub fn checked_subscript(&self, idx: usize) -> Option<(usize, usize, usize)> {
        (idx < self.len()).then(|| {
            let pixel = idx / self.depth;
            (pixel / self.cols, pixel % self.cols, idx % self.depth)
        })
    }
}

/// Maps a flattened pixel index to `(row, col)` and back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Linear2sub {
    rows: usize,
    cols: usize,
}

impl Linear2sub {
    /// Create a converter for an `rows x cols` grid.
    #[must_use]
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Number of pixels in the grid.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Returns true if the grid has no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(row, col)` of pixel `idx`.
    ///
    /// # Panics
    /// Panics if `idx` is outside the grid.
    #[inline]
    #[must_use]
    pub fn sub(&self, idx: usize) -> (usize, usize) {
        assert!(idx < self.len(), "pixel {idx} out of bounds ({})", self.len());
        (idx / self.cols, idx % self.cols)
    }

    /// Flattened index of `(row, col)`.
    ///
    /// # Panics
    /// Panics if the coordinate is outside the grid.
    #[inline]
    #[must_use]
    pub fn index(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.rows && col < self.cols,
            "pixel ({row}, {col}) out of bounds for {}x{}",
            self.rows,
            self.cols
        );
        row * self.cols + col
    }

    /// Non-panicking variant of [`Linear2sub::sub`].
    #[must_use]
    pub fn checked_sub(&self, idx: usize) -> Option<(usize, usize)> {
        (idx < self.len()).then(|| (idx / self.cols, idx % self.cols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_index_layout() {
        let li = LinearIndex::new(2, 3, 3);
        assert_eq!(li.index(0, 0, 0), 0);
        assert_eq!(li.index(0, 0, 2), 2);
        assert_eq!(li.index(0, 1, 0), 3);
        assert_eq!(li.index(1, 0, 0), 9);
        assert_eq!(li.len(), 18);
        assert_eq!(li.checked_index(2, 0, 0), None);
        assert_eq!(li.checked_subscript(18), None);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_linear2sub_rejects_out_of_range() {
        let _ = Linear2sub::new(2, 2).sub(4);
    }

    proptest! {
        #[test]
        fn prop_linear_index_roundtrip(
            rows in 1..40usize,
            cols in 1..40usize,
            depth in 1..5usize,
            seed in any::<usize>()
        ) {
            let li = LinearIndex::new(rows, cols, depth);
            let idx = seed % li.len();
            let (r, c, k) = li.subscript(idx);
            prop_assert_eq!(li.index(r, c, k), idx);
        }

        #[test]
        fn prop_linear2sub_roundtrip(
            rows in 1..60usize,
            cols in 1..60usize,
            seed in any::<usize>(),
        ) {
            let l2s = Linear2sub::new(rows, cols);
            let idx = seed % l2s.len();
            let (r, c) = l2s.sub(idx);
            prop_assert!(r < rows && c < cols);
            prop_assert_eq!(l2s.index(r, c), idx);
        }
    }
}
