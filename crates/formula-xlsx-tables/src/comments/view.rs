use crate::address::CellRef;
use crate::codec::Record;
use crate::error::Result;
use crate::rich_text::RichText;

use super::CommentsTable;

/// Whether a [`CommentsTable`] accepts edits. Fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommentAccess {
    ReadOnly,
    #[default]
    Mutable,
}

/// A snapshot of one comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEntry {
    pub address: CellRef,
    pub author_index: u32,
    pub record: Record,
    /// Display state of the comment box. Kept by the drawing part, not by `comments.xml`.
    pub visible: bool,
}

/// Edit handle for the comment at one address, obtained from
/// [`CommentsTable::comment_mut`]. Each setter applies immediately.
#[derive(Debug)]
pub struct CommentMut<'a> {
    table: &'a CommentsTable,
    address: CellRef,
}

impl<'a> CommentMut<'a> {
    pub(super) fn new(table: &'a CommentsTable, address: CellRef) -> Self {
        Self { table, address }
    }

    pub fn address(&self) -> CellRef {
        self.address
    }

    pub fn entry(&self) -> Result<CommentEntry> {
        self.table.entry_at(self.address)
    }

    pub fn set_string(&mut self, text: &RichText) -> Result<()> {
        self.table.replace_text(self.address, text)
    }

    /// Attribute the comment to `name`, registering the author if needed.
    pub fn set_author(&mut self, name: &str) -> Result<()> {
        let author_index = self.table.find_author(name)?;
        self.table.update_slot(self.address, |slot| slot.author_index = author_index)
    }

    pub fn set_visible(&mut self, visible: bool) -> Result<()> {
        self.table.update_slot(self.address, |slot| slot.visible = visible)
    }

    /// Move the comment to `address`. Fails if another comment is already there.
    pub fn set_address(&mut self, address: CellRef) -> Result<()> {
        self.table.reference_updated(self.address, address)?;
        self.address = address;
        Ok(())
    }

    pub fn set_row(&mut self, row: u32) -> Result<()> {
        self.set_address(self.address.with_row(row))
    }

    pub fn set_column(&mut self, col: u32) -> Result<()> {
        self.set_address(self.address.with_col(col))
    }
}
