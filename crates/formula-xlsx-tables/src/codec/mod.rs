//! Streaming codec between text-run containers (`<si>`, `<text>`) and stored records.
//!
//! A record is what a table hands to its [`RecordStore`](formula_text_store::RecordStore):
//! either the container's plain text ([`FidelityMode::Simplified`]) or its children as an
//! XML fragment ([`FidelityMode::Full`]). Fragments carry no namespace declarations and use
//! unprefixed element names, so two equal values always produce the same record text.

use std::io::BufRead;

use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::config::{FidelityMode, ParseMode, TableConfig};
use crate::rich_text::RichText;

mod decode;
mod encode;

pub(crate) use decode::{attr_value, read_text, skip_element};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed text record: {0}")]
    Malformed(&'static str),
    #[error("unexpected element <{element}> in <{container}>")]
    UnexpectedElement {
        container: &'static str,
        element: String,
    },
}

/// A decoded text record. A table only ever holds one variant, fixed by its
/// [`FidelityMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    PlainText(String),
    /// Children of the container, serialized.
    RichText(String),
}

impl Record {
    pub fn empty(fidelity: FidelityMode) -> Self {
        Self::from_stored(fidelity, String::new())
    }

    /// Rebuild a record from the text a store returned.
    pub fn from_stored(fidelity: FidelityMode, stored: String) -> Self {
        match fidelity {
            FidelityMode::Full => Record::RichText(stored),
            FidelityMode::Simplified => Record::PlainText(stored),
        }
    }

    /// The record for `value` in the given mode.
    pub fn from_rich_text(fidelity: FidelityMode, value: &RichText) -> Self {
        match fidelity {
            FidelityMode::Full => Record::RichText(value.to_fragment()),
            FidelityMode::Simplified => Record::PlainText(value.text()),
        }
    }

    /// Text handed to the store; also the dedup key.
    pub fn as_str(&self) -> &str {
        match self {
            Record::PlainText(s) | Record::RichText(s) => s,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Record::PlainText(s) | Record::RichText(s) => s,
        }
    }
}

/// The element a record is read from and written back into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// `<si>` inside `<sst>`.
    SharedString,
    /// `<text>` inside `<comments><commentList><comment>`.
    CommentText,
}

impl Container {
    pub fn tag(self) -> &'static str {
        match self {
            Container::SharedString => "si",
            Container::CommentText => "text",
        }
    }

    /// Elements that enclose the container in a complete part, outermost first.
    pub fn ancestors(self) -> &'static [&'static str] {
        match self {
            Container::SharedString => &["sst"],
            Container::CommentText => &["comments", "commentList", "comment"],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub fidelity: FidelityMode,
    pub parse_mode: ParseMode,
    pub include_phonetic_runs: bool,
}

#[derive(Debug, Clone)]
pub struct TextRunCodec {
    options: DecodeOptions,
    namespace: String,
}

impl TextRunCodec {
    pub fn new(options: DecodeOptions, namespace: impl Into<String>) -> Self {
        Self {
            options,
            namespace: namespace.into(),
        }
    }

    pub fn from_config(config: &TableConfig) -> Self {
        Self::new(config.decode_options(), config.namespace.clone())
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    pub fn fidelity(&self) -> FidelityMode {
        self.options.fidelity
    }

    /// Read one container. `reader` must be positioned just after the container's start
    /// tag; on success the matching end tag has been consumed.
    pub fn decode<R: BufRead>(
        &self,
        reader: &mut Reader<R>,
        container: Container,
    ) -> Result<Record, CodecError> {
        match self.options.fidelity {
            FidelityMode::Full => decode::copy_children(reader, container.tag())
                .map(Record::RichText),
            FidelityMode::Simplified => {
                decode::collect_plain_text(reader, container, &self.options).map(Record::PlainText)
            }
        }
    }

    /// Write `record` wrapped in its container element.
    pub fn encode<W: std::io::Write>(
        &self,
        record: &Record,
        container: Container,
        writer: &mut Writer<W>,
    ) -> std::io::Result<()> {
        encode::write_container(record, container, writer)
    }

    /// Parse a stored record back into a [`RichText`].
    pub fn rehydrate(&self, record: &Record, container: Container) -> Result<RichText, CodecError> {
        match record {
            Record::PlainText(text) => Ok(RichText::plain(text.as_str())),
            Record::RichText(fragment) => {
                let document = self.standalone_document(fragment, container);
                decode::parse_rich_text(&document, container, fragment)
            }
        }
    }

    /// `fragment` wrapped in the container and its ancestors, with the namespace declared
    /// once on the outermost element, so it parses on its own.
    pub fn standalone_document(&self, fragment: &str, container: Container) -> String {
        encode::wrap_fragment(fragment, container, &self.namespace)
    }
}
