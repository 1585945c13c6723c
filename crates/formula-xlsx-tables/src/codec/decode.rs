use std::borrow::Cow;
use std::io::BufRead;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::{CodecError, Container, DecodeOptions};
use crate::config::ParseMode;
use crate::rich_text::{PhoneticRun, RichText, TextRun};
use crate::xstring::unescape_xstring;

/// Copy every event up to the end tag `end` (local name) into a fragment, rewriting tag
/// names to their local names and dropping namespace declarations.
pub(super) fn copy_children<R: BufRead>(
    reader: &mut Reader<R>,
    end: &str,
) -> Result<String, CodecError> {
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                write(&mut writer, Event::Start(normalize_start(&e)?))?;
            }
            Event::Empty(e) => write(&mut writer, Event::Empty(normalize_start(&e)?))?,
            Event::End(e) => {
                if depth == 0 {
                    if e.local_name().as_ref() != end.as_bytes() {
                        return Err(CodecError::Malformed("mismatched end tag in text record"));
                    }
                    break;
                }
                depth -= 1;
                let name = std::str::from_utf8(e.local_name().into_inner())?;
                write(&mut writer, Event::End(BytesEnd::new(name)))?;
            }
            Event::Text(e) => {
                // Entity references are checked once here; stored fragments are trusted.
                e.unescape()?;
                write(&mut writer, Event::Text(e))?;
            }
            Event::Decl(_) | Event::DocType(_) => {
                return Err(CodecError::Malformed("declaration inside text record"));
            }
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in text record")),
            other => write(&mut writer, other)?,
        }
        buf.clear();
    }

    String::from_utf8(writer.into_inner()).map_err(|err| CodecError::Utf8(err.utf8_error()))
}

/// Concatenate the displayed text of a container.
pub(super) fn collect_plain_text<R: BufRead>(
    reader: &mut Reader<R>,
    container: Container,
    options: &DecodeOptions,
) -> Result<String, CodecError> {
    let tag = container.tag();
    let mut buf = Vec::new();
    let mut out = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => out.push_str(&read_text(reader, b"t")?),
                b"r" => out.push_str(&read_run_text(reader, options.parse_mode)?),
                b"rPh" if options.include_phonetic_runs => {
                    let text = read_phonetic_text(reader)?;
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(&text);
                }
                b"rPh" | b"phoneticPr" => skip_element(reader, &e)?,
                _ => unknown_element(reader, &e, tag, options.parse_mode, true)?,
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"t" | b"r" | b"rPh" | b"phoneticPr" => {}
                _ => unknown_element(reader, &e, tag, options.parse_mode, false)?,
            },
            Event::End(e) if e.local_name().as_ref() == tag.as_bytes() => break,
            Event::End(_) => return Err(CodecError::Malformed("mismatched end tag in text record")),
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in text record")),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn read_run_text<R: BufRead>(reader: &mut Reader<R>, mode: ParseMode) -> Result<String, CodecError> {
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"rPr" => skip_element(reader, &e)?,
                b"t" => text.push_str(&read_text(reader, b"t")?),
                _ => unknown_element(reader, &e, "r", mode, true)?,
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"rPr" | b"t" => {}
                _ => unknown_element(reader, &e, "r", mode, false)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"r" => break,
            Event::End(_) => return Err(CodecError::Malformed("mismatched end tag in <r>")),
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in <r>")),
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

fn read_phonetic_text<R: BufRead>(reader: &mut Reader<R>) -> Result<String, CodecError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                text.push_str(&read_text(reader, b"t")?);
            }
            Event::Start(e) => skip_element(reader, &e)?,
            Event::End(e) if e.local_name().as_ref() == b"rPh" => break,
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in <rPh>")),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

fn unknown_element<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart<'_>,
    parent: &'static str,
    mode: ParseMode,
    has_children: bool,
) -> Result<(), CodecError> {
    let element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    match mode {
        ParseMode::Strict => Err(CodecError::UnexpectedElement {
            container: parent,
            element,
        }),
        ParseMode::Lenient => {
            log::debug!("skipping unexpected <{element}> in <{parent}>");
            if has_children {
                skip_element(reader, e)?;
            }
            Ok(())
        }
    }
}

/// Parse a standalone document built around `fragment` into runs.
pub(super) fn parse_rich_text(
    document: &str,
    container: Container,
    fragment: &str,
) -> Result<RichText, CodecError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(false);
    let tag = container.tag().as_bytes();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == tag => break,
            Event::Eof => return Err(CodecError::Malformed("text record has no container")),
            _ => {}
        }
    }

    let mut runs = Vec::new();
    let mut phonetic = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => runs.push(TextRun {
                    text: read_text(&mut reader, b"t")?,
                    properties_xml: None,
                }),
                b"r" => runs.push(parse_run(&mut reader)?),
                b"rPh" => {
                    let (base_start, base_end) = phonetic_span(&e)?;
                    phonetic.push(PhoneticRun {
                        base_start,
                        base_end,
                        text: read_phonetic_text(&mut reader)?,
                    });
                }
                _ => skip_element(&mut reader, &e)?,
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"t" | b"r" => runs.push(TextRun::default()),
                b"rPh" => {
                    let (base_start, base_end) = phonetic_span(&e)?;
                    phonetic.push(PhoneticRun {
                        base_start,
                        base_end,
                        text: String::new(),
                    });
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == tag => break,
            Event::End(_) => return Err(CodecError::Malformed("mismatched end tag in text record")),
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in text record")),
            _ => {}
        }
    }

    Ok(RichText::from_parts(runs, phonetic, fragment.to_string()))
}

fn parse_run<R: BufRead>(reader: &mut Reader<R>) -> Result<TextRun, CodecError> {
    let mut buf = Vec::new();
    let mut run = TextRun::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"rPr" => {
                run.properties_xml = Some(capture_element(reader, &e)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"rPr" => {
                let mut writer = Writer::new(Vec::new());
                write(&mut writer, Event::Empty(normalize_start(&e)?))?;
                run.properties_xml = Some(into_string(writer)?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                run.text.push_str(&read_text(reader, b"t")?);
            }
            Event::Start(e) => skip_element(reader, &e)?,
            Event::End(e) if e.local_name().as_ref() == b"r" => break,
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in <r>")),
            _ => {}
        }
        buf.clear();
    }

    Ok(run)
}

/// Serialize an element (start tag already read) and its subtree.
fn capture_element<R: BufRead>(
    reader: &mut Reader<R>,
    start: &BytesStart<'_>,
) -> Result<String, CodecError> {
    let start = normalize_start(start)?;
    let name = std::str::from_utf8(start.name().into_inner())?.to_string();
    let inner = copy_children(reader, &name)?;

    let mut writer = Writer::new(Vec::new());
    write(&mut writer, Event::Start(start))?;
    write(&mut writer, Event::Text(BytesText::from_escaped(inner)))?;
    write(&mut writer, Event::End(BytesEnd::new(name)))?;
    into_string(writer)
}

fn phonetic_span(e: &BytesStart<'_>) -> Result<(u32, u32), CodecError> {
    let offset = |key: &[u8]| -> Result<u32, CodecError> {
        Ok(attr_value(e, key)?
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0))
    };
    Ok((offset(b"sb")?, offset(b"eb")?))
}

fn normalize_start(e: &BytesStart<'_>) -> Result<BytesStart<'static>, CodecError> {
    let name = std::str::from_utf8(e.local_name().into_inner())?.to_string();
    let mut out = BytesStart::new(name);
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        out.push_attribute(attr);
    }
    Ok(out)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CodecError> {
    writer
        .write_event(event)
        .map_err(|err| CodecError::Xml(err.into()))
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String, CodecError> {
    String::from_utf8(writer.into_inner()).map_err(|err| CodecError::Utf8(err.utf8_error()))
}

/// Text content of the element whose start tag was just read, up to its end tag `end`.
pub(crate) fn read_text<R: BufRead>(
    reader: &mut Reader<R>,
    end: &[u8],
) -> Result<String, CodecError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => {
                let t: Cow<'_, str> = e.unescape()?;
                text.push_str(&t);
            }
            Event::CData(e) => {
                text.push_str(std::str::from_utf8(e.as_ref())?);
            }
            Event::End(e) if e.local_name().as_ref() == end => break,
            Event::Eof => return Err(CodecError::Malformed("unexpected eof in <t>")),
            _ => {}
        }
        buf.clear();
    }
    if text.contains("_x") {
        text = unescape_xstring(&text).into_owned();
    }
    Ok(text)
}

pub(crate) fn skip_element<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart<'_>,
) -> Result<(), quick_xml::Error> {
    reader.read_to_end_into(e.name(), &mut Vec::new())?;
    Ok(())
}

pub(crate) fn attr_value(
    e: &BytesStart<'_>,
    key: &[u8],
) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
