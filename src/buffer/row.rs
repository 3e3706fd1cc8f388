//! Reference row storage for image content.
//!
//! A circular buffer of rows, addressed by offset from the current first row,
//! the same way the terminal's text buffer recycles rows when it scrolls.

use super::{CoordType, ImageRow, ImageRows, ImageSlice, LineRendition, Rect};

/// A single row
#[derive(Clone, Debug, Default)]
pub struct Row {
    rendition: LineRendition,
    image_slice: Option<ImageSlice>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_line_rendition(&mut self, rendition: LineRendition) {
        self.rendition = rendition;
    }

    /// Forget everything the row holds, as when it is recycled at the bottom.
    pub fn reset(&mut self) {
        self.rendition = LineRendition::SingleWidth;
        self.image_slice = None;
    }
}

impl ImageRow for Row {
    fn image_slice(&self) -> Option<&ImageSlice> {
        self.image_slice.as_ref()
    }

    fn image_slice_mut(&mut self) -> &mut Option<ImageSlice> {
        &mut self.image_slice
    }

    fn line_rendition(&self) -> LineRendition {
        self.rendition
    }
}

/// Circular row storage
#[derive(Clone, Debug)]
pub struct TextBuffer {
    rows: Vec<Row>,
    first_row: usize,
}

impl TextBuffer {
    pub fn new(height: usize) -> Self {
        Self {
            rows: (0..height.max(1)).map(|_| Row::new()).collect(),
            first_row: 0,
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    fn index(&self, offset: CoordType) -> usize {
        let height = self.rows.len() as i64;
        (self.first_row as i64 + offset as i64).rem_euclid(height) as usize
    }

    /// Advance the first row by one; the old top row becomes the new bottom row, cleared.
    pub fn increment_circular_buffer(&mut self) {
        let recycled = self.first_row;
        self.rows[recycled].reset();
        self.first_row = (self.first_row + 1) % self.rows.len();
    }

    /// Move the image content inside `rect` by `delta` rows (negative moves up)
    /// and erase whatever the move leaves behind.
    pub fn scroll_images(&mut self, rect: Rect, delta: CoordType) {
        let height = rect.height();
        if delta == 0 || height <= 0 || rect.width() <= 0 {
            return;
        }

        let distance = delta.abs();
        if distance >= height {
            ImageSlice::erase_block(self, rect);
            return;
        }

        let (src, dst, vacated) = if delta < 0 {
            (
                Rect::new(rect.left, rect.top + distance, rect.right, rect.bottom),
                Rect::new(rect.left, rect.top, rect.right, rect.bottom - distance),
                Rect::new(rect.left, rect.bottom - distance, rect.right, rect.bottom),
            )
        } else {
            (
                Rect::new(rect.left, rect.top, rect.right, rect.bottom - distance),
                Rect::new(rect.left, rect.top + distance, rect.right, rect.bottom),
                Rect::new(rect.left, rect.top, rect.right, rect.top + distance),
            )
        };

        ImageSlice::copy_block_within(self, src, dst);
        ImageSlice::erase_block(self, vacated);
    }
}

impl ImageRows for TextBuffer {
    type Row = Row;

    fn row_by_offset(&self, offset: CoordType) -> &Row {
        &self.rows[self.index(offset)]
    }

    fn row_by_offset_mut(&mut self, offset: CoordType) -> &mut Row {
        let index = self.index(offset);
        &mut self.rows[index]
    }

    fn row_pair_mut(&mut self, src: CoordType, dst: CoordType) -> (&Row, &mut Row) {
        let src = self.index(src);
        let dst = self.index(dst);
        assert_ne!(src, dst, "row_pair_mut needs two distinct rows");

        if src < dst {
            let (head, tail) = self.rows.split_at_mut(dst);
            (&head[src], &mut tail[0])
        } else {
            let (head, tail) = self.rows.split_at_mut(src);
            (&tail[0], &mut head[dst])
        }
    }

    fn same_row(&self, a: CoordType, b: CoordType) -> bool {
        self.index(a) == self.index(b)
    }
}
