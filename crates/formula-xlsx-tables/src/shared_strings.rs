use std::io::{BufReader, Read, Write};

use formula_text_store::{open_store, DedupIndex, DuplicatePolicy, StoreKind};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::codec::{attr_value, Container, Record, TextRunCodec};
use crate::config::TableConfig;
use crate::error::{Result, TableError};
use crate::rich_text::RichText;

/// The workbook's shared strings part (`xl/sharedStrings.xml`), backed by a
/// [`RecordStore`](formula_text_store::RecordStore) so very large tables can live on disk.
///
/// Strings added through [`add_shared_string_item`](Self::add_shared_string_item) are interned;
/// strings loaded through [`read_from`](Self::read_from) keep the index assignment of the
/// source part, duplicates included, because cells elsewhere in the workbook refer to them by
/// position.
#[derive(Debug)]
pub struct SharedStringsTable {
    config: TableConfig,
    codec: TextRunCodec,
    strings: DedupIndex,
}

impl SharedStringsTable {
    pub fn new(config: TableConfig) -> Result<Self> {
        let store = open_store(&config.store)?;
        Ok(Self {
            codec: TextRunCodec::from_config(&config),
            config,
            strings: DedupIndex::new(store),
        })
    }

    /// Build a table and load `input` into it.
    pub fn from_reader<R: Read>(config: TableConfig, input: R) -> Result<Self> {
        let table = Self::new(config)?;
        table.load(input)?;
        Ok(table)
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn store_kind(&self) -> StoreKind {
        self.strings.store_kind()
    }

    /// Load a `<sst>` part into this (empty) table. An empty stream loads nothing.
    ///
    /// The part is parsed into a fresh store that replaces the current one only on success;
    /// a failed load leaves the table empty and ready for another attempt.
    pub fn read_from<R: Read>(&mut self, input: R) -> Result<()> {
        if self.strings.unique_count() != 0 {
            return Err(TableError::Unsupported(
                "read_from requires an empty shared strings table",
            ));
        }

        let staged = Self::new(self.config.clone())?;
        staged.load(input)?;
        let mut previous = std::mem::replace(self, staged);
        previous.close()
    }

    fn load<R: Read>(&self, input: R) -> Result<()> {
        let mut reader = Reader::from_reader(BufReader::new(input));
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut declared = DeclaredCounts::default();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sst" => {
                    declared = DeclaredCounts {
                        count: parse_count(attr_value(&e, b"count")?, "count"),
                        unique_count: parse_count(attr_value(&e, b"uniqueCount")?, "uniqueCount"),
                    };
                }
                Event::Start(e) if e.local_name().as_ref() == b"si" => {
                    let record = self.codec.decode(&mut reader, Container::SharedString)?;
                    self.strings.intern(record.as_str(), DuplicatePolicy::Keep)?;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                    let record = Record::empty(self.config.fidelity);
                    self.strings.intern(record.as_str(), DuplicatePolicy::Keep)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let parsed = self.strings.unique_count();
        if let Some(unique_count) = declared.unique_count {
            if unique_count != parsed {
                log::warn!(
                    "sharedStrings declares uniqueCount={unique_count} but contains {parsed} entries; using {parsed}"
                );
            }
        }
        if let Some(count) = declared.count {
            self.strings.set_declared_count(count);
        }
        Ok(())
    }

    /// Write the table as a complete `<sst>` part, entries in index order.
    pub fn write_to<W: Write>(&self, output: W) -> Result<()> {
        let mut writer = Writer::new(output);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

        let count = self.strings.count().to_string();
        let unique_count = self.strings.unique_count().to_string();
        let mut sst = BytesStart::new("sst");
        sst.push_attribute(("count", count.as_str()));
        sst.push_attribute(("uniqueCount", unique_count.as_str()));
        sst.push_attribute(("xmlns", self.config.namespace.as_str()));

        if self.strings.unique_count() == 0 {
            writer.write_event(Event::Empty(sst))?;
            return Ok(());
        }

        writer.write_event(Event::Start(sst))?;
        let fidelity = self.config.fidelity;
        self.strings.visit_in_order(&mut |_, stored| {
            let record = Record::from_stored(fidelity, stored.to_string());
            self.codec
                .encode(&record, Container::SharedString, &mut writer)
        })?;
        writer.write_event(Event::End(BytesEnd::new("sst")))?;
        Ok(())
    }

    /// Entry `index` as rich text.
    pub fn item_at(&self, index: u32) -> Result<RichText> {
        let record = self.record_at(index)?;
        Ok(self.codec.rehydrate(&record, Container::SharedString)?)
    }

    /// Entry `index` as plain text. Phonetic runs are included when the table was
    /// configured with [`TableConfig::with_phonetic_runs`].
    pub fn string_at(&self, index: u32) -> Result<String> {
        match self.record_at(index)? {
            Record::PlainText(text) => Ok(text),
            record @ Record::RichText(_) => {
                let rich = self.codec.rehydrate(&record, Container::SharedString)?;
                Ok(rich.plain_text(self.config.include_phonetic_runs))
            }
        }
    }

    /// Number of references, duplicates included (the `count` attribute).
    pub fn count(&self) -> u64 {
        self.strings.count()
    }

    /// Number of stored entries (the `uniqueCount` attribute).
    pub fn unique_count(&self) -> u64 {
        self.strings.unique_count()
    }

    /// Add a value, returning the index of an equal entry if there is one.
    ///
    /// On the cache backend there is no key index, so every call adds a new entry.
    pub fn add_shared_string_item(&self, value: &RichText) -> Result<u32> {
        let record = Record::from_rich_text(self.config.fidelity, value);
        Ok(self.strings.intern(record.as_str(), DuplicatePolicy::Reuse)?)
    }

    pub fn add_string(&self, text: &str) -> Result<u32> {
        self.add_shared_string_item(&RichText::plain(text))
    }

    /// Index of an entry equal to `value`. Unsupported on the cache backend.
    pub fn index_of(&self, value: &RichText) -> Result<Option<u32>> {
        let record = Record::from_rich_text(self.config.fidelity, value);
        Ok(self.strings.index_of(record.as_str())?)
    }

    /// Release the backing store (and delete its file). Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        Ok(self.strings.close()?)
    }

    fn record_at(&self, index: u32) -> Result<Record> {
        let stored = self.strings.lookup(index)?;
        Ok(Record::from_stored(self.config.fidelity, stored))
    }
}

#[derive(Debug, Default)]
struct DeclaredCounts {
    count: Option<u64>,
    unique_count: Option<u64>,
}

fn parse_count(value: Option<String>, attr: &str) -> Option<u64> {
    let value = value?;
    match value.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("ignoring unparseable sharedStrings {attr}={value:?}; recounting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FidelityMode;
    use pretty_assertions::assert_eq;

    fn table() -> SharedStringsTable {
        SharedStringsTable::new(TableConfig::default()).expect("create table")
    }

    fn written(table: &SharedStringsTable) -> String {
        let mut out = Vec::new();
        table.write_to(&mut out).expect("write sst");
        String::from_utf8(out).expect("utf-8")
    }

    #[test]
    fn add_interns_repeats() {
        let table = table();
        let indices: Vec<u32> = ["a", "b", "a", "c", "b", "a"]
            .into_iter()
            .map(|s| table.add_string(s).expect("add"))
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 2, 1, 0]);
        assert_eq!(table.unique_count(), 3);
        assert_eq!(table.count(), 6);
        assert_eq!(table.index_of(&RichText::plain("c")).expect("index_of"), Some(2));
    }

    #[test]
    fn writes_counts_namespace_and_entries() {
        let table = table();
        table.add_string("x").expect("add");
        table.add_string(" y").expect("add");
        table.add_string("x").expect("add");

        assert_eq!(
            written(&table),
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<sst count="3" uniqueCount="2" xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
                r#"<si><t>x</t></si><si><t xml:space="preserve"> y</t></si></sst>"#
            )
        );
    }

    #[test]
    fn empty_table_writes_empty_sst() {
        assert!(written(&table()).ends_with(r#"<sst count="0" uniqueCount="0" xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"/>"#));
    }

    #[test]
    fn declared_count_is_adopted_and_unique_count_recounted() {
        let xml = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="10" uniqueCount="5"><si><t>a</t></si><si/></sst>"#;
        let table =
            SharedStringsTable::from_reader(TableConfig::default(), xml.as_bytes()).expect("read");
        assert_eq!(table.count(), 10);
        assert_eq!(table.unique_count(), 2);
        assert_eq!(table.string_at(1).expect("empty entry"), "");
    }

    #[test]
    fn unparseable_counts_fall_back_to_recount() {
        let xml = r#"<sst count="many" uniqueCount="-1"><si><t>a</t></si><si><t>b</t></si></sst>"#;
        let table =
            SharedStringsTable::from_reader(TableConfig::default(), xml.as_bytes()).expect("read");
        assert_eq!(table.count(), 2);
        assert_eq!(table.unique_count(), 2);
    }

    #[test]
    fn failed_load_leaves_the_table_reusable() {
        let mut table = table();
        let err = table
            .read_from("<sst><si><t>a</t></si><si><t>b</si></sst>".as_bytes())
            .expect_err("mismatched end tag");
        assert!(matches!(err, TableError::Xml(_) | TableError::RecordParse(_)), "{err:?}");
        assert_eq!(table.unique_count(), 0);
        assert_eq!(table.count(), 0);

        table
            .read_from("<sst><si><t>c</t></si></sst>".as_bytes())
            .expect("retry");
        assert_eq!(table.string_at(0).expect("string_at"), "c");
    }

    #[test]
    fn read_from_requires_an_empty_table() {
        let mut table = table();
        table.add_string("a").expect("add");
        let err = table.read_from("<sst/>".as_bytes()).expect_err("table is not empty");
        assert!(matches!(err, TableError::Unsupported(_)), "{err:?}");
    }

    #[test]
    fn full_fidelity_string_at_flattens_runs() {
        let config = TableConfig::default()
            .with_fidelity(FidelityMode::Full)
            .with_phonetic_runs(true);
        let xml = r#"<sst><si><r><rPr><b/></rPr><t>東</t></r><r><t>京</t></r><rPh sb="0" eb="2"><t>とうきょう</t></rPh></si></sst>"#;
        let table = SharedStringsTable::from_reader(config, xml.as_bytes()).expect("read");
        assert_eq!(table.string_at(0).expect("string_at"), "東京 とうきょう");
        assert_eq!(table.item_at(0).expect("item_at").text(), "東京");
    }
}
