//! Image content attached to text-buffer rows.
//!
//! The text buffer itself (cells, attributes, scrollback) lives elsewhere.
//! This module only needs a narrow view of it:
//!
//! - **ImageRow**: one row, holding zero or one [`ImageSlice`] and a line rendition
//! - **ImageRows**: a buffer of rows addressed by offset from its first row
//! - **image_slice**: the pixel buffer and the copy/erase compositing rules
//!
//! # Architecture
//!
//! ```text
//! TextBuffer (ImageRows)
//! └── Row (ImageRow)
//!     ├── LineRendition
//!     └── Option<ImageSlice>
//!         └── pixel buffer (pixel_width * cell_height)
//! ```

pub mod image_slice;
pub mod row;

pub use image_slice::ImageSlice;
pub use row::{Row, TextBuffer};

/// Grid coordinate type, signed so column arithmetic can run past the left edge.
pub type CoordType = i32;

/// One pixel in the order the renderer uploads it (blue, green, red, reserved).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
    pub alpha: u8,
}

impl Pixel {
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            blue,
            green,
            red,
            alpha,
        }
    }

    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self::new(red, green, blue, 0xff)
    }
}

/// Pixel dimensions of one character cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellSize {
    pub width: CoordType,
    pub height: CoordType,
}

impl CellSize {
    pub const fn new(width: CoordType, height: CoordType) -> Self {
        Self { width, height }
    }
}

/// Half-open rectangle of cells: `left..right` by `top..bottom`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: CoordType,
    pub top: CoordType,
    pub right: CoordType,
    pub bottom: CoordType,
}

impl Rect {
    pub const fn new(left: CoordType, top: CoordType, right: CoordType, bottom: CoordType) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> CoordType {
        self.right - self.left
    }

    pub fn height(&self) -> CoordType {
        self.bottom - self.top
    }
}

/// How the cells of a row are drawn (DECDWL / DECDHL).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LineRendition {
    #[default]
    SingleWidth,
    DoubleWidth,
    DoubleHeightTop,
    DoubleHeightBottom,
}

impl LineRendition {
    /// Shift applied to column numbers before they index pixel data.
    ///
    /// A double width or double height row packs two columns of pixels
    /// into every logical column.
    pub fn column_shift(self) -> u32 {
        match self {
            LineRendition::SingleWidth => 0,
            _ => 1,
        }
    }
}

/// A text-buffer row that can carry image content.
pub trait ImageRow {
    fn image_slice(&self) -> Option<&ImageSlice>;
    fn image_slice_mut(&mut self) -> &mut Option<ImageSlice>;
    fn line_rendition(&self) -> LineRendition;
}

/// A buffer of rows addressed by offset from its first (top) row.
pub trait ImageRows {
    type Row: ImageRow;

    fn row_by_offset(&self, offset: CoordType) -> &Self::Row;
    fn row_by_offset_mut(&mut self, offset: CoordType) -> &mut Self::Row;

    /// Borrow a source row and a distinct destination row at once.
    ///
    /// Implementations may panic when both offsets resolve to the same row.
    fn row_pair_mut(&mut self, src: CoordType, dst: CoordType) -> (&Self::Row, &mut Self::Row);

    /// Whether two offsets resolve to the same physical row.
    fn same_row(&self, a: CoordType, b: CoordType) -> bool {
        a == b
    }
}
