use core::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of rows in an Excel 2007+ worksheet.
pub const MAX_ROWS: u32 = 1_048_576;
/// Number of columns in an Excel 2007+ worksheet (`A` through `XFD`).
pub const MAX_COLS: u32 = 16_384;

/// Address of the cell a comment is attached to.
///
/// Rows and columns are **0-indexed** (`row = 0` is Excel row `1`, `col = 0` is column `A`).
/// Ordering is row-major, which is the order comments are written back out in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Same column, different row.
    #[inline]
    pub const fn with_row(self, row: u32) -> Self {
        Self { row, col: self.col }
    }

    /// Same row, different column.
    #[inline]
    pub const fn with_col(self, col: u32) -> Self {
        Self { row: self.row, col }
    }

    pub const fn is_in_bounds(self) -> bool {
        self.row < MAX_ROWS && self.col < MAX_COLS
    }

    /// Excel A1 notation (e.g. `A1`, `BC32`).
    pub fn to_a1(self) -> String {
        let mut out = column_name(self.col);
        out.push_str(&(u64::from(self.row) + 1).to_string());
        out
    }

    /// Parse an A1-style reference (e.g. `A1`, `$B$2`). Whitespace around the reference is
    /// ignored; anything else is an error.
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(A1ParseError::Empty);
        }

        let bytes = s.as_bytes();
        let mut idx = usize::from(bytes[0] == b'$');

        let col_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
            idx += 1;
        }
        if idx == col_start {
            return Err(A1ParseError::MissingColumn);
        }
        let col_str = &s[col_start..idx];

        if bytes.get(idx) == Some(&b'$') {
            idx += 1;
        }
        let row_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == row_start {
            return Err(A1ParseError::MissingRow);
        }
        if idx != bytes.len() {
            return Err(A1ParseError::TrailingCharacters);
        }

        let col = column_index(col_str)?;
        let row: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| A1ParseError::InvalidRow)?;
        if row == 0 || row > MAX_ROWS {
            return Err(A1ParseError::InvalidRow);
        }

        Ok(Self::new(row - 1, col))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for CellRef {
    type Err = A1ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_a1(s)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty A1 reference")]
    Empty,
    #[error("missing column in A1 reference")]
    MissingColumn,
    #[error("missing row in A1 reference")]
    MissingRow,
    #[error("invalid column in A1 reference")]
    InvalidColumn,
    #[error("invalid row in A1 reference")]
    InvalidRow,
    #[error("trailing characters in A1 reference")]
    TrailingCharacters,
}

fn column_name(col: u32) -> String {
    // Bijective base-26: A..Z, AA..ZZ, AAA..
    let mut n = u64::from(col) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push(char::from(b'A' + rem));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn column_index(s: &str) -> Result<u32, A1ParseError> {
    let mut col: u32 = 0;
    for b in s.bytes() {
        let v = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(v))
            .filter(|c| *c <= MAX_COLS)
            .ok_or(A1ParseError::InvalidColumn)?;
    }
    Ok(col - 1)
}
