//! Pixel content anchored to a column range of one text row.
//!
//! An [`ImageSlice`] backs the half-open column range `column_begin..column_end`
//! with `cell_height` rows of pixels, each `pixel_width` pixels long. The
//! stride is rounded up to a multiple of 4 because the renderer uploads rows
//! in 16-byte units.
//!
//! The associated functions (`copy_block`, `copy_cells`, `erase_cells`, ...)
//! are what the text buffer calls when it scrolls, copies or erases a region:
//! they keep each row's slice in step with its text, and drop a slice the
//! moment nothing is left in it.

use std::cmp::{max, min};

use super::{CellSize, CoordType, ImageRow, ImageRows, LineRendition, Pixel, Rect};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSlice {
    cell_size: CellSize,
    column_begin: CoordType,
    column_end: CoordType,
    pixel_width: CoordType,
    pixel_buffer: Vec<Pixel>,
}

impl ImageSlice {
    pub fn new(cell_size: CellSize) -> Self {
        Self {
            cell_size,
            column_begin: 0,
            column_end: 0,
            pixel_width: 0,
            pixel_buffer: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> CellSize {
        self.cell_size
    }

    /// First column backed by pixel data.
    pub fn column_offset(&self) -> CoordType {
        self.column_begin
    }

    /// One past the last column backed by pixel data.
    pub fn column_end(&self) -> CoordType {
        self.column_end
    }

    /// Row stride of the pixel buffer, in pixels.
    pub fn pixel_width(&self) -> CoordType {
        self.pixel_width
    }

    pub fn is_empty(&self) -> bool {
        self.column_begin >= self.column_end
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixel_buffer
    }

    /// Pixels from the top-left corner of `column` to the end of the buffer.
    ///
    /// Successive pixel rows of the column start `pixel_width` apart.
    ///
    /// # Panics
    ///
    /// Panics if `column` lies outside the backed range.
    pub fn pixels_at(&self, column: CoordType) -> &[Pixel] {
        &self.pixel_buffer[self.pixel_offset(column)..]
    }

    /// Writable pixels starting at `column_begin`, growing the buffer first
    /// if `column_begin..column_end` is not already backed.
    ///
    /// The backed range only ever grows here: the new range is the union of
    /// the old and requested ranges, and existing rows move to their new
    /// offsets. A reversed range is treated as empty.
    pub fn mutable_pixels(&mut self, column_begin: CoordType, column_end: CoordType) -> &mut [Pixel] {
        let column_end = max(column_begin, column_end);
        if self.pixel_buffer.is_empty()
            || column_begin < self.column_begin
            || column_end > self.column_end
        {
            self.grow(column_begin, column_end);
        }
        let offset = self.pixel_offset(column_begin);
        &mut self.pixel_buffer[offset..]
    }

    /// Paint every pixel of the columns `column_begin..column_end`.
    pub fn fill(&mut self, column_begin: CoordType, column_end: CoordType, pixel: Pixel) {
        if column_begin >= column_end {
            return;
        }
        let length = ((column_end - column_begin) * self.cell_size.width) as usize;
        self.mutable_pixels(column_begin, column_end);
        let offset = self.pixel_offset(column_begin);
        let stride = self.stride();
        for y in 0..self.height() {
            let start = offset + y * stride;
            self.pixel_buffer[start..start + length].fill(pixel);
        }
    }

    fn grow(&mut self, column_begin: CoordType, column_end: CoordType) {
        let old_column_begin = self.column_begin;
        let old_content_width = ((self.column_end - self.column_begin) * self.cell_size.width) as usize;
        let old_stride = self.stride();
        let existing_data = !self.pixel_buffer.is_empty();

        if existing_data {
            self.column_begin = min(self.column_begin, column_begin);
            self.column_end = max(self.column_end, column_end);
        } else {
            self.column_begin = column_begin;
            self.column_end = column_end;
        }
        self.pixel_width = align_stride((self.column_end - self.column_begin) * self.cell_size.width);

        let buffer_size = self.stride() * self.height();
        if existing_data {
            let mut new_buffer = vec![Pixel::default(); buffer_size];
            let new_offset = ((old_column_begin - self.column_begin) * self.cell_size.width) as usize;
            let new_stride = self.stride();
            // Only the content is carried over, not the old stride padding.
            for y in 0..self.height() {
                let old_start = y * old_stride;
                let new_start = new_offset + y * new_stride;
                new_buffer[new_start..new_start + old_content_width]
                    .copy_from_slice(&self.pixel_buffer[old_start..old_start + old_content_width]);
            }
            self.pixel_buffer = new_buffer;
        } else {
            self.pixel_buffer = vec![Pixel::default(); buffer_size];
        }
    }

    fn clear(&mut self) {
        self.column_begin = 0;
        self.column_end = 0;
        self.pixel_width = 0;
        self.pixel_buffer = Vec::new();
    }

    fn pixel_offset(&self, column: CoordType) -> usize {
        ((column - self.column_begin) * self.cell_size.width) as usize
    }

    fn stride(&self) -> usize {
        self.pixel_width as usize
    }

    fn height(&self) -> usize {
        self.cell_size.height.max(0) as usize
    }

    /// Copy the image content of `src_rect` in `src_buffer` to `dst_rect` in
    /// another buffer.
    pub fn copy_block<S, D>(src_buffer: &S, src_rect: Rect, dst_buffer: &mut D, dst_rect: Rect)
    where
        S: ImageRows,
        D: ImageRows,
    {
        let height = src_rect.height().max(0);
        let bottom_up = src_rect.top < dst_rect.top;
        for i in 0..height {
            let y = if bottom_up { height - 1 - i } else { i };
            let src_row = src_buffer.row_by_offset(src_rect.top + y);
            let dst_row = dst_buffer.row_by_offset_mut(dst_rect.top + y);
            Self::copy_cells(src_row, src_rect.left, dst_row, dst_rect.left, dst_rect.right);
        }
    }

    /// Copy the image content of `src_rect` to `dst_rect` inside one buffer.
    ///
    /// When the source starts above the destination the rows are walked
    /// bottom-up, so an overlapping source row is always read before it is
    /// overwritten.
    pub fn copy_block_within<B: ImageRows>(buffer: &mut B, src_rect: Rect, dst_rect: Rect) {
        let height = src_rect.height().max(0);
        let bottom_up = src_rect.top < dst_rect.top;
        for i in 0..height {
            let y = if bottom_up { height - 1 - i } else { i };
            let src_offset = src_rect.top + y;
            let dst_offset = dst_rect.top + y;
            if buffer.same_row(src_offset, dst_offset) {
                let row = buffer.row_by_offset_mut(dst_offset);
                let src_slice = row.image_slice().cloned();
                let rendition = row.line_rendition();
                Self::copy_cells_with(
                    src_slice.as_ref(),
                    rendition,
                    src_rect.left,
                    row,
                    dst_rect.left,
                    dst_rect.right,
                );
            } else {
                let (src_row, dst_row) = buffer.row_pair_mut(src_offset, dst_offset);
                Self::copy_cells(src_row, src_rect.left, dst_row, dst_rect.left, dst_rect.right);
            }
        }
    }

    /// Replace the destination row's image content with a copy of the source row's.
    pub fn copy_row<S: ImageRow, D: ImageRow>(src_row: &S, dst_row: &mut D) {
        *dst_row.image_slice_mut() = src_row.image_slice().cloned();
    }

    /// Copy the columns starting at `src_column` of one row into
    /// `dst_column_begin..dst_column_end` of another.
    ///
    /// A source without image content, or a row pair with different line
    /// renditions, erases the destination range instead.
    pub fn copy_cells<S: ImageRow, D: ImageRow>(
        src_row: &S,
        src_column: CoordType,
        dst_row: &mut D,
        dst_column_begin: CoordType,
        dst_column_end: CoordType,
    ) {
        Self::copy_cells_with(
            src_row.image_slice(),
            src_row.line_rendition(),
            src_column,
            dst_row,
            dst_column_begin,
            dst_column_end,
        );
    }

    fn copy_cells_with<D: ImageRow>(
        src_slice: Option<&ImageSlice>,
        src_rendition: LineRendition,
        src_column: CoordType,
        dst_row: &mut D,
        dst_column_begin: CoordType,
        dst_column_end: CoordType,
    ) {
        let src_slice = match src_slice {
            Some(slice) if src_rendition == dst_row.line_rendition() => slice,
            _ => {
                Self::erase_cells(dst_row, dst_column_begin, dst_column_end);
                return;
            }
        };

        // Pixels drawn for another cell size have no meaningful position here.
        let cell_size_differs = dst_row
            .image_slice()
            .map_or(false, |dst| dst.cell_size != src_slice.cell_size);
        if cell_size_differs {
            Self::erase_cells(dst_row, dst_column_begin, dst_column_end);
            return;
        }

        let shift = src_rendition.column_shift();
        let dst_slot = dst_row.image_slice_mut();
        let dst_slice = dst_slot.get_or_insert_with(|| ImageSlice::new(src_slice.cell_size));
        if dst_slice.copy_cells_from(
            src_slice,
            src_column << shift,
            dst_column_begin << shift,
            dst_column_end << shift,
        ) {
            *dst_slot = None;
        }
    }

    /// Copy pixel columns from `src_slice` into `dst_column_begin..dst_column_end`.
    ///
    /// Returns true when nothing is left in this slice afterwards.
    fn copy_cells_from(
        &mut self,
        src_slice: &ImageSlice,
        src_column: CoordType,
        dst_column_begin: CoordType,
        dst_column_end: CoordType,
    ) -> bool {
        let src_column_end = src_column + dst_column_end - dst_column_begin;

        // The parts of the copy range that currently hold pixels.
        let src_used_begin = max(src_column, src_slice.column_begin);
        let src_used_end = max(min(src_column_end, src_slice.column_end), src_used_begin);
        let dst_used_begin = max(dst_column_begin, self.column_begin);
        let dst_used_end = max(min(dst_column_end, self.column_end), dst_used_begin);

        // The used source, projected into the destination, is what gets overwritten.
        let projected_offset = dst_column_begin - src_column;
        let dst_write_begin = src_used_begin + projected_offset;
        let dst_write_end = src_used_end + projected_offset;

        if dst_write_begin < dst_write_end {
            self.mutable_pixels(dst_write_begin, dst_write_end);
            let write_length = ((dst_write_end - dst_write_begin) * self.cell_size.width) as usize;
            let dst_offset = self.pixel_offset(dst_write_begin);
            let src_offset = src_slice.pixel_offset(src_used_begin);
            let dst_stride = self.stride();
            let src_stride = src_slice.stride();
            for y in 0..self.height() {
                let dst_start = dst_offset + y * dst_stride;
                let src_start = src_offset + y * src_stride;
                self.pixel_buffer[dst_start..dst_start + write_length]
                    .copy_from_slice(&src_slice.pixel_buffer[src_start..src_start + write_length]);
            }
        }

        // Used destination columns on either side of the write are now stale.
        let mut fully_erased = false;
        if dst_used_begin < dst_write_begin {
            fully_erased |= self.erase_range(dst_used_begin, dst_write_begin);
        }
        if dst_used_end > dst_write_end {
            fully_erased |= self.erase_range(dst_write_end, dst_used_end);
        }
        if fully_erased {
            self.clear();
        }

        self.is_empty()
    }

    /// Erase the image content of every row in `rect`.
    pub fn erase_block<B: ImageRows>(buffer: &mut B, rect: Rect) {
        for y in rect.top..rect.bottom {
            let row = buffer.row_by_offset_mut(y);
            Self::erase_cells(row, rect.left, rect.right);
        }
    }

    /// Erase `column_begin..column_end` of a row, dropping its slice if that
    /// covers everything the slice holds.
    pub fn erase_cells<R: ImageRow>(row: &mut R, column_begin: CoordType, column_end: CoordType) {
        let shift = row.line_rendition().column_shift();
        let slot = row.image_slice_mut();
        if let Some(slice) = slot {
            if slice.erase_range(column_begin << shift, column_end << shift) {
                *slot = None;
            }
        }
    }

    /// Zero the pixels of `column_begin..column_end`.
    ///
    /// Returns true, without touching the buffer, when the range covers the
    /// whole backed range; the caller is then expected to drop the slice.
    /// A partial erase leaves the backed range as it was.
    fn erase_range(&mut self, column_begin: CoordType, column_end: CoordType) -> bool {
        if column_begin <= self.column_begin && column_end >= self.column_end {
            return true;
        }

        let erase_begin = max(column_begin, self.column_begin);
        let erase_end = min(column_end, self.column_end);
        if erase_begin < erase_end {
            let erase_offset = self.pixel_offset(erase_begin);
            let erase_length = ((erase_end - erase_begin) * self.cell_size.width) as usize;
            let stride = self.stride();
            for y in 0..self.height() {
                let start = erase_offset + y * stride;
                self.pixel_buffer[start..start + erase_length].fill(Pixel::default());
            }
        }
        false
    }
}

fn align_stride(pixels: CoordType) -> CoordType {
    (pixels + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Row, TextBuffer};
    use proptest::prelude::*;

    const CELL: CellSize = CellSize::new(8, 16);

    fn marker(column: CoordType, y: usize) -> Pixel {
        Pixel::rgb(column as u8, y as u8, 0x80)
    }

    /// Write a distinct marker into every pixel of each column.
    fn paint(slice: &mut ImageSlice, begin: CoordType, end: CoordType) {
        slice.mutable_pixels(begin, end);
        let stride = slice.stride();
        let width = slice.cell_size.width as usize;
        let pixels = slice.mutable_pixels(begin, end);
        for column in begin..end {
            let x = (column - begin) as usize * width;
            for y in 0..CELL.height as usize {
                pixels[y * stride + x..y * stride + x + width].fill(marker(column, y));
            }
        }
    }

    fn column_pixels(slice: &ImageSlice, column: CoordType) -> Vec<Pixel> {
        let stride = slice.stride();
        let width = slice.cell_size.width as usize;
        let pixels = slice.pixels_at(column);
        (0..slice.height())
            .flat_map(|y| pixels[y * stride..y * stride + width].to_vec())
            .collect()
    }

    fn expected_column(column: CoordType) -> Vec<Pixel> {
        (0..CELL.height as usize)
            .flat_map(|y| vec![marker(column, y); CELL.width as usize])
            .collect()
    }

    fn blank_column() -> Vec<Pixel> {
        vec![Pixel::default(); (CELL.width * CELL.height) as usize]
    }

    fn row_with(begin: CoordType, end: CoordType) -> Row {
        let mut slice = ImageSlice::new(CELL);
        paint(&mut slice, begin, end);
        let mut row = Row::new();
        *row.image_slice_mut() = Some(slice);
        row
    }

    #[test]
    fn test_grow_preserves_existing_columns() {
        let mut slice = ImageSlice::new(CELL);
        paint(&mut slice, 0, 10);
        slice.mutable_pixels(5, 20);

        assert_eq!(slice.column_offset(), 0);
        assert_eq!(slice.column_end(), 20);
        assert_eq!(slice.pixel_width(), 160);
        for column in 0..10 {
            assert_eq!(column_pixels(&slice, column), expected_column(column));
        }
        for column in 10..20 {
            assert_eq!(column_pixels(&slice, column), blank_column());
        }
    }

    #[test]
    fn test_grow_to_the_left_shifts_rows() {
        let mut slice = ImageSlice::new(CellSize::new(3, 2));
        slice.fill(4, 5, Pixel::rgb(1, 2, 3));
        assert_eq!(slice.pixel_width(), 4);

        slice.mutable_pixels(1, 2);

        assert_eq!(slice.column_offset(), 1);
        assert_eq!(slice.pixel_width(), 12);
        let pixels = slice.pixels();
        for y in 0..2 {
            let row = &pixels[y * 12..(y + 1) * 12];
            assert_eq!(&row[9..12], &[Pixel::rgb(1, 2, 3); 3]);
            assert!(row[..9].iter().all(|p| *p == Pixel::default()));
        }
    }

    #[test]
    fn test_mutable_pixels_within_range_does_not_reallocate() {
        let mut slice = ImageSlice::new(CELL);
        paint(&mut slice, 2, 6);
        let before = slice.pixels().as_ptr();
        slice.mutable_pixels(3, 5);
        assert_eq!(slice.pixels().as_ptr(), before);
        assert_eq!(slice.column_offset(), 2);
        assert_eq!(slice.column_end(), 6);
    }

    #[test]
    fn test_reversed_range_is_empty() {
        let mut slice = ImageSlice::new(CELL);
        assert!(slice.mutable_pixels(5, 3).is_empty());
        assert!(slice.pixels().is_empty());

        paint(&mut slice, 0, 4);
        let before = slice.pixels().to_vec();
        slice.mutable_pixels(3, 1);
        assert_eq!(slice.pixels(), &before[..]);
        assert_eq!(slice.column_end(), 4);
    }

    #[test]
    fn test_fill_after_grow_paints_only_requested_columns() {
        let mut slice = ImageSlice::new(CELL);
        paint(&mut slice, 0, 2);
        slice.fill(3, 5, Pixel::rgb(9, 9, 9));

        assert_eq!(slice.column_end(), 5);
        for column in 0..2 {
            assert_eq!(column_pixels(&slice, column), expected_column(column));
        }
        assert_eq!(column_pixels(&slice, 2), blank_column());
        for column in 3..5 {
            assert!(column_pixels(&slice, column).iter().all(|p| *p == Pixel::rgb(9, 9, 9)));
        }
    }

    #[test]
    fn test_stride_rounds_to_four() {
        let mut slice = ImageSlice::new(CellSize::new(3, 1));
        slice.mutable_pixels(0, 3);
        assert_eq!(slice.pixel_width(), 12);
        slice.mutable_pixels(0, 5);
        assert_eq!(slice.pixel_width(), 16);
        assert_eq!(slice.pixels().len(), 16);
    }

    #[test]
    fn test_partial_erase_keeps_slice() {
        let mut row = row_with(0, 10);
        ImageSlice::erase_cells(&mut row, 3, 7);

        let slice = row.image_slice().expect("slice survives a partial erase");
        assert_eq!(slice.column_offset(), 0);
        assert_eq!(slice.column_end(), 10);
        for column in 0..10 {
            if (3..7).contains(&column) {
                assert_eq!(column_pixels(slice, column), blank_column());
            } else {
                assert_eq!(column_pixels(slice, column), expected_column(column));
            }
        }
    }

    #[test]
    fn test_full_erase_drops_slice() {
        let mut row = row_with(0, 10);
        ImageSlice::erase_cells(&mut row, 0, 10);
        assert!(row.image_slice().is_none());
    }

    #[test]
    fn test_erase_without_slice_is_noop() {
        let mut row = Row::new();
        ImageSlice::erase_cells(&mut row, 0, 80);
        ImageSlice::erase_cells(&mut row, 0, 80);
        assert!(row.image_slice().is_none());
    }

    #[test]
    fn test_double_width_scales_columns() {
        let mut row = row_with(0, 10);
        row.set_line_rendition(LineRendition::DoubleWidth);

        // Logical columns 1..3 are pixel columns 2..6.
        ImageSlice::erase_cells(&mut row, 1, 3);
        let slice = row.image_slice().unwrap();
        assert_eq!(column_pixels(slice, 1), expected_column(1));
        for column in 2..6 {
            assert_eq!(column_pixels(slice, column), blank_column());
        }
        assert_eq!(column_pixels(slice, 6), expected_column(6));

        ImageSlice::erase_cells(&mut row, 0, 5);
        assert!(row.image_slice().is_none());
    }

    #[test]
    fn test_copy_cells_shifts_content() {
        let src = row_with(0, 4);
        let mut dst = Row::new();

        ImageSlice::copy_cells(&src, 0, &mut dst, 10, 14);

        let slice = dst.image_slice().expect("destination gained a slice");
        assert_eq!(slice.column_offset(), 10);
        assert_eq!(slice.column_end(), 14);
        for column in 0..4 {
            assert_eq!(column_pixels(slice, column + 10), expected_column(column));
        }
    }

    #[test]
    fn test_copy_cells_erases_stale_destination() {
        let src = row_with(2, 4);
        let mut dst = row_with(0, 8);

        // Source window 0..6 only holds pixels at 2..4.
        ImageSlice::copy_cells(&src, 0, &mut dst, 0, 6);

        let slice = dst.image_slice().unwrap();
        for column in [0, 1, 4, 5] {
            assert_eq!(column_pixels(slice, column), blank_column());
        }
        for column in [2, 3, 6, 7] {
            assert_eq!(column_pixels(slice, column), expected_column(column));
        }
    }

    #[test]
    fn test_copy_from_empty_window_drops_covered_slice() {
        let src = row_with(20, 30);
        let mut dst = row_with(0, 10);

        ImageSlice::copy_cells(&src, 0, &mut dst, 0, 10);

        assert!(dst.image_slice().is_none());
    }

    #[test]
    fn test_copy_without_source_slice_erases() {
        let src = Row::new();
        let mut dst = row_with(0, 4);
        ImageSlice::copy_cells(&src, 0, &mut dst, 0, 4);
        assert!(dst.image_slice().is_none());
    }

    #[test]
    fn test_copy_with_rendition_mismatch_erases() {
        let src = row_with(0, 4);
        let mut dst = row_with(0, 4);
        dst.set_line_rendition(LineRendition::DoubleHeightTop);

        ImageSlice::copy_cells(&src, 0, &mut dst, 0, 2);

        // 0..2 doubled is 0..4, the whole slice.
        assert!(dst.image_slice().is_none());
    }

    #[test]
    fn test_copy_row_clones_or_clears() {
        let src = row_with(1, 3);
        let mut dst = Row::new();
        ImageSlice::copy_row(&src, &mut dst);
        assert_eq!(dst.image_slice(), src.image_slice());

        ImageSlice::copy_row(&Row::new(), &mut dst);
        assert!(dst.image_slice().is_none());
    }

    #[test]
    fn test_copy_block_between_buffers() {
        let mut src = TextBuffer::new(3);
        for y in 0..3 {
            *src.row_by_offset_mut(y).image_slice_mut() = Some(row_with(0, 2).image_slice().unwrap().clone());
        }
        let mut dst = TextBuffer::new(5);

        ImageSlice::copy_block(&src, Rect::new(0, 0, 2, 3), &mut dst, Rect::new(4, 2, 6, 5));

        assert!(dst.row_by_offset(0).image_slice().is_none());
        assert!(dst.row_by_offset(1).image_slice().is_none());
        for y in 2..5 {
            let slice = dst.row_by_offset(y).image_slice().unwrap();
            assert_eq!(slice.column_offset(), 4);
            assert_eq!(column_pixels(slice, 5), expected_column(1));
        }
    }

    #[test]
    fn test_copy_block_within_overlapping_down() {
        let mut buffer = TextBuffer::new(6);
        for y in 0..4 {
            let mut slice = ImageSlice::new(CELL);
            slice.fill(0, 2, Pixel::rgb(y as u8 + 1, 0, 0));
            *buffer.row_by_offset_mut(y).image_slice_mut() = Some(slice);
        }
        let mut expected = buffer.clone();
        for y in (0..4).rev() {
            let (src, dst) = expected.row_pair_mut(y, y + 2);
            ImageSlice::copy_cells(src, 0, dst, 0, 2);
        }

        ImageSlice::copy_block_within(&mut buffer, Rect::new(0, 0, 2, 4), Rect::new(0, 2, 2, 6));

        for y in 0..6 {
            assert_eq!(
                buffer.row_by_offset(y).image_slice(),
                expected.row_by_offset(y).image_slice(),
                "row {y}"
            );
        }
        for y in 2..6 {
            let slice = buffer.row_by_offset(y).image_slice().unwrap();
            assert_eq!(slice.pixels_at(0)[0], Pixel::rgb(y as u8 - 1, 0, 0));
        }
    }

    #[test]
    fn test_copy_block_within_same_row_shifts_right() {
        let mut buffer = TextBuffer::new(1);
        *buffer.row_by_offset_mut(0).image_slice_mut() = Some(row_with(0, 4).image_slice().unwrap().clone());

        ImageSlice::copy_block_within(&mut buffer, Rect::new(0, 0, 4, 1), Rect::new(2, 0, 6, 1));

        let slice = buffer.row_by_offset(0).image_slice().unwrap();
        assert_eq!(slice.column_offset(), 0);
        assert_eq!(slice.column_end(), 6);
        for column in 0..4 {
            assert_eq!(column_pixels(slice, column + 2), expected_column(column));
        }
        assert_eq!(column_pixels(slice, 0), expected_column(0));
    }

    #[test]
    fn test_erase_block() {
        let mut buffer = TextBuffer::new(3);
        for y in 0..3 {
            *buffer.row_by_offset_mut(y).image_slice_mut() = Some(row_with(0, 4).image_slice().unwrap().clone());
        }
        ImageSlice::erase_block(&mut buffer, Rect::new(0, 1, 4, 3));
        assert!(buffer.row_by_offset(0).image_slice().is_some());
        assert!(buffer.row_by_offset(1).image_slice().is_none());
        assert!(buffer.row_by_offset(2).image_slice().is_none());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Copy { src: usize, src_column: i32, dst: usize, begin: i32, len: i32 },
        Erase { row: usize, begin: i32, len: i32 },
        Paint { row: usize, begin: i32, len: i32 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, -2..12i32, 0..4usize, -2..12i32, 0..8i32)
                .prop_map(|(src, src_column, dst, begin, len)| Op::Copy { src, src_column, dst, begin, len }),
            (0..4usize, -2..12i32, 0..8i32).prop_map(|(row, begin, len)| Op::Erase { row, begin, len }),
            (0..4usize, 0..12i32, 1..6i32).prop_map(|(row, begin, len)| Op::Paint { row, begin, len }),
        ]
    }

    fn check_invariants(buffer: &TextBuffer) -> Result<(), TestCaseError> {
        for y in 0..buffer.height() as CoordType {
            if let Some(slice) = buffer.row_by_offset(y).image_slice() {
                prop_assert!(slice.column_offset() < slice.column_end(), "empty slice retained on row {}", y);
                prop_assert_eq!(slice.pixel_width() % 4, 0);
                prop_assert!(slice.pixel_width() >= (slice.column_end() - slice.column_offset()) * CELL.width);
                prop_assert_eq!(slice.pixels().len(), (slice.pixel_width() * CELL.height) as usize);
            }
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn slices_never_retained_empty(ops in prop::collection::vec(op(), 1..40)) {
            let mut buffer = TextBuffer::new(4);
            for op in ops {
                match op {
                    Op::Copy { src, src_column, dst, begin, len } => {
                        let (src, dst) = (src as CoordType, dst as CoordType);
                        if src == dst {
                            ImageSlice::copy_block_within(
                                &mut buffer,
                                Rect::new(src_column, src, src_column + len, src + 1),
                                Rect::new(begin, dst, begin + len, dst + 1),
                            );
                        } else {
                            let (src_row, dst_row) = buffer.row_pair_mut(src, dst);
                            ImageSlice::copy_cells(src_row, src_column, dst_row, begin, begin + len);
                        }
                    }
                    Op::Erase { row, begin, len } => {
                        ImageSlice::erase_cells(buffer.row_by_offset_mut(row as CoordType), begin, begin + len);
                    }
                    Op::Paint { row, begin, len } => {
                        let slot = buffer.row_by_offset_mut(row as CoordType).image_slice_mut();
                        slot.get_or_insert_with(|| ImageSlice::new(CELL)).fill(begin, begin + len, Pixel::rgb(1, 1, 1));
                    }
                }
                check_invariants(&buffer)?;
            }
        }

        #[test]
        fn written_pixels_survive_growth(
            first in (0..20i32, 1..10i32),
            grows in prop::collection::vec((-10..30i32, 1..10i32), 0..6),
        ) {
            let mut slice = ImageSlice::new(CELL);
            let (begin, len) = first;
            paint(&mut slice, begin, begin + len);
            for (grow_begin, grow_len) in grows {
                slice.mutable_pixels(grow_begin, grow_begin + grow_len);
                prop_assert_eq!(slice.pixel_width() % 4, 0);
                prop_assert!(slice.pixel_width() >= (slice.column_end() - slice.column_offset()) * CELL.width);
            }
            for column in begin..begin + len {
                prop_assert_eq!(column_pixels(&slice, column), expected_column(column));
            }
        }
    }
}
