use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::{Mutex, MutexGuard};

use formula_text_store::{open_store, RecordStore, StoreError, StoreKind};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::address::{A1ParseError, CellRef, MAX_COLS, MAX_ROWS};
use crate::codec::{attr_value, read_text, skip_element, Container, Record, TextRunCodec};
use crate::config::TableConfig;
use crate::error::{Result, TableError};
use crate::rich_text::RichText;
use crate::xstring::escape_xstring;

mod authors;
mod view;

pub use authors::AuthorTable;
pub use view::{CommentAccess, CommentEntry, CommentMut};

/// Where a comment's body lives in the text store, plus the fields `comments.xml` keeps
/// next to it.
#[derive(Debug, Clone, Copy)]
struct Slot {
    record: u32,
    author_index: u32,
    visible: bool,
}

#[derive(Debug, Default)]
struct CommentIndex {
    by_cell: BTreeMap<CellRef, Slot>,
    next_record: u32,
}

/// The legacy comments part of one worksheet (`xl/comments1.xml`).
///
/// Comment bodies are kept in a [`RecordStore`]; the address index and authors stay in
/// memory. Every body edit writes a fresh record, so append-only stores work too.
pub struct CommentsTable {
    config: TableConfig,
    codec: TextRunCodec,
    access: CommentAccess,
    authors: AuthorTable,
    texts: Box<dyn RecordStore>,
    entries: Mutex<CommentIndex>,
}

impl CommentsTable {
    pub fn new(config: TableConfig, access: CommentAccess) -> Result<Self> {
        let texts = open_store(&config.store)?;
        Ok(Self {
            codec: TextRunCodec::from_config(&config),
            config,
            access,
            authors: AuthorTable::new(),
            texts,
            entries: Mutex::new(CommentIndex::default()),
        })
    }

    pub fn from_reader<R: Read>(config: TableConfig, access: CommentAccess, input: R) -> Result<Self> {
        let table = Self::new(config, access)?;
        table.load(input)?;
        Ok(table)
    }

    pub fn access(&self) -> CommentAccess {
        self.access
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn store_kind(&self) -> StoreKind {
        self.texts.kind()
    }

    /// Load a `<comments>` part into this (empty) table. Allowed on read-only tables.
    ///
    /// Parsing happens in a staged table that replaces this one only on success, so a
    /// failed load can be retried.
    pub fn read_from<R: Read>(&mut self, input: R) -> Result<()> {
        if self.number_of_comments() != 0 || !self.authors.is_empty() {
            return Err(TableError::Unsupported(
                "read_from requires an empty comments table",
            ));
        }

        let staged = Self::new(self.config.clone(), self.access)?;
        staged.load(input)?;
        let mut previous = std::mem::replace(self, staged);
        previous.close()
    }

    fn load<R: Read>(&self, input: R) -> Result<()> {
        let mut reader = Reader::from_reader(BufReader::new(input));
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"author" => {
                    let name = read_text(&mut reader, b"author")?;
                    self.authors.push_loaded(&name)?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"author" => {
                    self.authors.push_loaded("")?;
                }
                Event::Start(e) if e.local_name().as_ref() == b"comment" => {
                    let (address, author_index) = comment_attributes(&e)?;
                    let author_index = self.resolve_loaded_author(address, author_index)?;
                    let record = self.read_comment_body(&mut reader)?;
                    self.insert_loaded(address, author_index, &record)?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"comment" => {
                    let (address, author_index) = comment_attributes(&e)?;
                    let author_index = self.resolve_loaded_author(address, author_index)?;
                    self.insert_loaded(address, author_index, &Record::empty(self.config.fidelity))?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }

    /// Write the table as a complete `<comments>` part, comments in row-major order.
    pub fn write_to<W: Write>(&self, output: W) -> Result<()> {
        let mut writer = Writer::new(output);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

        let mut root = BytesStart::new("comments");
        root.push_attribute(("xmlns", self.config.namespace.as_str()));
        writer.write_event(Event::Start(root))?;

        let names = self.authors.names()?;
        if names.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new("authors")))?;
        } else {
            writer.write_event(Event::Start(BytesStart::new("authors")))?;
            for name in &names {
                writer.write_event(Event::Start(BytesStart::new("author")))?;
                writer.write_event(Event::Text(BytesText::new(&escape_xstring(name))))?;
                writer.write_event(Event::End(BytesEnd::new("author")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("authors")))?;
        }

        let entries = lock(&self.entries);
        if entries.by_cell.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new("commentList")))?;
        } else {
            writer.write_event(Event::Start(BytesStart::new("commentList")))?;
            for (address, slot) in &entries.by_cell {
                let record = self.load_record(slot.record)?;
                let reference = address.to_a1();
                let author_id = slot.author_index.to_string();
                let mut comment = BytesStart::new("comment");
                comment.push_attribute(("ref", reference.as_str()));
                comment.push_attribute(("authorId", author_id.as_str()));
                writer.write_event(Event::Start(comment))?;
                self.codec
                    .encode(&record, Container::CommentText, &mut writer)?;
                writer.write_event(Event::End(BytesEnd::new("comment")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("commentList")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("comments")))?;
        Ok(())
    }

    pub fn find_cell_comment(&self, address: CellRef) -> Result<Option<CommentEntry>> {
        let slot = lock(&self.entries).by_cell.get(&address).copied();
        slot.map(|slot| self.snapshot(address, slot)).transpose()
    }

    /// Add an empty comment at `address`, attributed to author 0. An empty table gets the
    /// empty author registered at index 0 first.
    pub fn create_new_comment(&self, address: CellRef) -> Result<CommentEntry> {
        self.ensure_mutable()?;
        check_bounds(address)?;

        let mut entries = lock(&self.entries);
        if entries.by_cell.contains_key(&address) {
            return Err(TableError::DuplicateComment(address));
        }
        if self.authors.is_empty() {
            self.authors.find_author("")?;
        }
        let record = Record::empty(self.config.fidelity);
        let slot = Slot {
            record: self.store_record(&mut entries, &record)?,
            author_index: 0,
            visible: true,
        };
        entries.by_cell.insert(address, slot);

        Ok(CommentEntry {
            address,
            author_index: slot.author_index,
            record,
            visible: slot.visible,
        })
    }

    /// Edit handle for the comment at `address`, if there is one.
    pub fn comment_mut(&self, address: CellRef) -> Result<Option<CommentMut<'_>>> {
        self.ensure_mutable()?;
        let exists = lock(&self.entries).by_cell.contains_key(&address);
        Ok(exists.then(|| CommentMut::new(self, address)))
    }

    pub fn remove_comment(&self, address: CellRef) -> Result<bool> {
        self.ensure_mutable()?;
        let removed = lock(&self.entries).by_cell.remove(&address);
        match removed {
            Some(slot) => {
                self.texts.remove(slot.record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-key the comment at `old` to `new`. After this returns, `old` finds nothing.
    pub fn reference_updated(&self, old: CellRef, new: CellRef) -> Result<()> {
        self.ensure_mutable()?;
        check_bounds(new)?;

        let mut entries = lock(&self.entries);
        if old == new {
            if entries.by_cell.contains_key(&old) {
                return Ok(());
            }
            return Err(TableError::CommentNotFound(old));
        }
        if entries.by_cell.contains_key(&new) {
            return Err(TableError::DuplicateComment(new));
        }
        let slot = entries
            .by_cell
            .remove(&old)
            .ok_or(TableError::CommentNotFound(old))?;
        entries.by_cell.insert(new, slot);
        Ok(())
    }

    /// Addresses that have a comment, in row-major order.
    pub fn cell_addresses(&self) -> Vec<CellRef> {
        lock(&self.entries).by_cell.keys().copied().collect()
    }

    pub fn number_of_comments(&self) -> usize {
        lock(&self.entries).by_cell.len()
    }

    /// Index of the author `name`, registering it if needed. See [`AuthorTable::find_author`].
    pub fn find_author(&self, name: &str) -> Result<u32> {
        self.ensure_mutable()?;
        self.authors.find_author(name)
    }

    pub fn author(&self, index: u32) -> Option<String> {
        self.authors.author(index)
    }

    pub fn number_of_authors(&self) -> usize {
        self.authors.len()
    }

    /// The body of `entry` as rich text.
    pub fn rich_text(&self, entry: &CommentEntry) -> Result<RichText> {
        Ok(self.codec.rehydrate(&entry.record, Container::CommentText)?)
    }

    /// Release the text store (and delete its file). Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        match self.entries.get_mut() {
            Ok(entries) => entries.by_cell.clear(),
            Err(poisoned) => poisoned.into_inner().by_cell.clear(),
        }
        self.texts.close()?;
        self.authors.close()
    }

    pub(crate) fn entry_at(&self, address: CellRef) -> Result<CommentEntry> {
        self.find_cell_comment(address)?
            .ok_or(TableError::CommentNotFound(address))
    }

    pub(crate) fn replace_text(&self, address: CellRef, text: &RichText) -> Result<()> {
        let record = Record::from_rich_text(self.config.fidelity, text);
        let mut entries = lock(&self.entries);
        let previous = entries
            .by_cell
            .get(&address)
            .map(|slot| slot.record)
            .ok_or(TableError::CommentNotFound(address))?;

        let replacement = self.store_record(&mut entries, &record)?;
        if let Some(slot) = entries.by_cell.get_mut(&address) {
            slot.record = replacement;
        }
        self.texts.remove(previous)?;
        Ok(())
    }

    fn update_slot(&self, address: CellRef, update: impl FnOnce(&mut Slot)) -> Result<()> {
        let mut entries = lock(&self.entries);
        let slot = entries
            .by_cell
            .get_mut(&address)
            .ok_or(TableError::CommentNotFound(address))?;
        update(slot);
        Ok(())
    }

    /// A loaded `authorId` past the declared authors is re-pointed at the empty author.
    fn resolve_loaded_author(&self, address: CellRef, author_index: u32) -> Result<u32> {
        if (author_index as usize) < self.authors.len() {
            return Ok(author_index);
        }
        log::warn!(
            "comment at {address} references authorId {author_index} but only {} authors are declared",
            self.authors.len()
        );
        self.authors.find_author("")
    }

    fn ensure_mutable(&self) -> Result<()> {
        match self.access {
            CommentAccess::Mutable => Ok(()),
            CommentAccess::ReadOnly => Err(TableError::Unsupported("comments table is read-only")),
        }
    }

    fn snapshot(&self, address: CellRef, slot: Slot) -> Result<CommentEntry> {
        Ok(CommentEntry {
            address,
            author_index: slot.author_index,
            record: self.load_record(slot.record)?,
            visible: slot.visible,
        })
    }

    fn load_record(&self, id: u32) -> Result<Record> {
        let stored = self.texts.get(id)?.ok_or(TableError::NotFound(id))?;
        Ok(Record::from_stored(self.config.fidelity, stored))
    }

    fn store_record(&self, entries: &mut CommentIndex, record: &Record) -> Result<u32> {
        let id = entries.next_record;
        let next = id.checked_add(1).ok_or(StoreError::IndexOverflow)?;
        self.texts.put(id, record.as_str())?;
        entries.next_record = next;
        Ok(id)
    }

    fn insert_loaded(&self, address: CellRef, author_index: u32, record: &Record) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.by_cell.contains_key(&address) {
            return Err(TableError::DuplicateComment(address));
        }
        let slot = Slot {
            record: self.store_record(&mut entries, record)?,
            author_index,
            visible: true,
        };
        entries.by_cell.insert(address, slot);
        Ok(())
    }

    fn read_comment_body<R: BufRead>(&self, reader: &mut Reader<R>) -> Result<Record> {
        let mut buf = Vec::new();
        let mut record = None;
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"text" => {
                    record = Some(self.codec.decode(reader, Container::CommentText)?);
                }
                Event::Start(e) => skip_element(reader, &e)?,
                Event::End(e) if e.local_name().as_ref() == b"comment" => break,
                Event::Eof => {
                    return Err(TableError::MalformedInput("unexpected eof in <comment>".to_string()))
                }
                _ => {}
            }
            buf.clear();
        }
        Ok(record.unwrap_or_else(|| Record::empty(self.config.fidelity)))
    }
}

impl std::fmt::Debug for CommentsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentsTable")
            .field("access", &self.access)
            .field("store", &self.texts.kind())
            .field("comments", &self.number_of_comments())
            .field("authors", &self.authors.len())
            .finish()
    }
}

fn comment_attributes(e: &BytesStart<'_>) -> Result<(CellRef, u32)> {
    let reference = attr_value(e, b"ref")?
        .ok_or_else(|| TableError::MalformedInput("<comment> without ref".to_string()))?;
    let address = CellRef::from_a1(&reference)?;

    let author_index = match attr_value(e, b"authorId")? {
        None => 0,
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| TableError::MalformedInput(format!("invalid authorId {raw:?}")))?,
    };
    Ok((address, author_index))
}

fn check_bounds(address: CellRef) -> Result<()> {
    if address.row >= MAX_ROWS {
        return Err(TableError::InvalidAddress(A1ParseError::InvalidRow));
    }
    if address.col >= MAX_COLS {
        return Err(TableError::InvalidAddress(A1ParseError::InvalidColumn));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FidelityMode;
    use pretty_assertions::assert_eq;

    fn table() -> CommentsTable {
        CommentsTable::new(TableConfig::default(), CommentAccess::Mutable).expect("create table")
    }

    fn cell(a1: &str) -> CellRef {
        CellRef::from_a1(a1).expect("valid address")
    }

    #[test]
    fn set_string_replaces_body_and_keeps_author() {
        let table = table();
        table.create_new_comment(cell("A1")).expect("create");
        {
            let mut comment = table.comment_mut(cell("A1")).expect("access").expect("exists");
            comment.set_author("Ada").expect("author");
            comment.set_string(&RichText::plain("first")).expect("text");
            comment.set_string(&RichText::plain("second")).expect("text");
        }

        let entry = table.find_cell_comment(cell("A1")).expect("find").expect("exists");
        assert_eq!(entry.record, Record::PlainText("second".to_string()));
        assert_eq!(entry.author_index, 1);
        assert_eq!(table.author(entry.author_index).as_deref(), Some("Ada"));
        assert!(entry.visible);
    }

    #[test]
    fn new_comment_author_resolves_after_reload() {
        let table = table();
        let created = table.create_new_comment(cell("A1")).expect("create");
        assert_eq!(table.author(created.author_index).as_deref(), Some(""));

        let mut out = Vec::new();
        table.write_to(&mut out).expect("write");
        let reread = CommentsTable::from_reader(TableConfig::default(), CommentAccess::ReadOnly, out.as_slice())
            .expect("re-read");
        let entry = reread.find_cell_comment(cell("A1")).expect("find").expect("exists");
        assert_eq!(reread.author(entry.author_index).as_deref(), Some(""));
        assert_eq!(reread.number_of_authors(), 1);
    }

    #[test]
    fn dangling_author_id_maps_to_the_empty_author() {
        let xml = r#"<comments><authors><author>Ada</author></authors><commentList><comment ref="B2" authorId="4000000000"><text><t>x</t></text></comment></commentList></comments>"#;
        let table = CommentsTable::from_reader(TableConfig::default(), CommentAccess::ReadOnly, xml.as_bytes())
            .expect("read");

        let entry = table.find_cell_comment(cell("B2")).expect("find").expect("exists");
        assert_eq!(entry.author_index, 1);
        assert_eq!(table.author(1).as_deref(), Some(""));

        let mut out = Vec::new();
        table.write_to(&mut out).expect("write");
        let out = String::from_utf8(out).expect("utf-8");
        assert!(out.contains("<authors><author>Ada</author><author></author></authors>"), "{out}");
        assert!(out.contains(r#"<comment ref="B2" authorId="1">"#), "{out}");
    }

    #[test]
    fn failed_load_can_be_retried() {
        let mut table = table();
        let broken = r#"<comments><authors><author>Ada</author></authors><commentList><comment ref="A1"><text><t>x</t></text></comment><comment authorId="0"/></commentList></comments>"#;
        let err = table.read_from(broken.as_bytes()).expect_err("missing ref");
        assert!(matches!(err, TableError::MalformedInput(_)), "{err:?}");
        assert_eq!(table.number_of_comments(), 0);
        assert_eq!(table.number_of_authors(), 0);

        table
            .read_from(r#"<comments><authors><author>Ada</author></authors><commentList><comment ref="B2" authorId="0"/></commentList></comments>"#.as_bytes())
            .expect("retry");
        assert_eq!(table.cell_addresses(), vec![cell("B2")]);
        assert_eq!(table.author(0).as_deref(), Some("Ada"));
    }

    #[test]
    fn visibility_is_tracked_per_comment() {
        let table = table();
        table.create_new_comment(cell("B2")).expect("create");
        let mut comment = table.comment_mut(cell("B2")).expect("access").expect("exists");
        comment.set_visible(false).expect("hide");
        assert!(!comment.entry().expect("entry").visible);
    }

    #[test]
    fn set_row_and_column_move_the_comment() {
        let table = table();
        table.create_new_comment(cell("B2")).expect("create");
        let mut comment = table.comment_mut(cell("B2")).expect("access").expect("exists");
        comment.set_row(9).expect("row");
        comment.set_column(0).expect("column");
        assert_eq!(comment.address(), cell("A10"));
        assert_eq!(table.cell_addresses(), vec![cell("A10")]);
    }

    #[test]
    fn moves_out_of_bounds_are_rejected() {
        let table = table();
        table.create_new_comment(cell("A1")).expect("create");
        let mut comment = table.comment_mut(cell("A1")).expect("access").expect("exists");
        let err = comment.set_row(MAX_ROWS).expect_err("row out of range");
        assert!(matches!(err, TableError::InvalidAddress(A1ParseError::InvalidRow)), "{err:?}");
        assert_eq!(comment.address(), cell("A1"));
    }

    #[test]
    fn remove_comment_reports_whether_anything_was_removed() {
        let table = table();
        table.create_new_comment(cell("C3")).expect("create");
        assert!(table.remove_comment(cell("C3")).expect("remove"));
        assert!(!table.remove_comment(cell("C3")).expect("remove again"));
        assert_eq!(table.number_of_comments(), 0);
    }

    #[test]
    fn rich_text_bodies_survive_full_fidelity() {
        let table = CommentsTable::new(
            TableConfig::default().with_fidelity(FidelityMode::Full),
            CommentAccess::Mutable,
        )
        .expect("create table");
        table.create_new_comment(cell("A1")).expect("create");
        let mut body = RichText::default();
        body.push_run("Note:", Some("<rPr><b/></rPr>".to_string()));
        body.push_run(" check", None);
        table
            .comment_mut(cell("A1"))
            .expect("access")
            .expect("exists")
            .set_string(&body)
            .expect("text");

        let entry = table.find_cell_comment(cell("A1")).expect("find").expect("exists");
        let rich = table.rich_text(&entry).expect("rehydrate");
        assert_eq!(rich.text(), "Note: check");
        assert_eq!(rich.runs()[0].properties_xml.as_deref(), Some("<rPr><b/></rPr>"));
    }
}
