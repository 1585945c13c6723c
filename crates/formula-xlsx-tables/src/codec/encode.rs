use std::fmt::Write as _;
use std::io::Write;

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{Container, Record};
use crate::rich_text::write_t;

pub(super) fn write_container<W: Write>(
    record: &Record,
    container: Container,
    writer: &mut Writer<W>,
) -> std::io::Result<()> {
    let tag = container.tag();
    match record {
        Record::RichText(fragment) if fragment.is_empty() => {
            writer.write_event(Event::Empty(BytesStart::new(tag)))?;
        }
        Record::RichText(fragment) => {
            // The fragment is already serialized XML; write it as-is.
            writer.write_event(Event::Start(BytesStart::new(tag)))?;
            writer.write_event(Event::Text(BytesText::from_escaped(fragment.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        Record::PlainText(text) => {
            writer.write_event(Event::Start(BytesStart::new(tag)))?;
            write_t(writer, text)?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
    }
    Ok(())
}

pub(super) fn wrap_fragment(fragment: &str, container: Container, namespace: &str) -> String {
    let ancestors = container.ancestors();
    let mut out = String::with_capacity(fragment.len() + 128);
    for (depth, name) in ancestors.iter().enumerate() {
        if depth == 0 {
            let _ = write!(out, r#"<{name} xmlns="{}">"#, escape(namespace));
        } else {
            let _ = write!(out, "<{name}>");
        }
    }
    let tag = container.tag();
    let _ = write!(out, "<{tag}>{fragment}</{tag}>");
    for name in ancestors.iter().rev() {
        let _ = write!(out, "</{name}>");
    }
    out
}
