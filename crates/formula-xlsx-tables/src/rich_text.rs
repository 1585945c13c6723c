use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::xstring::escape_xstring;

/// One formatted run of a rich text value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    /// The run's `<rPr>` element serialized verbatim, if it had one.
    pub properties_xml: Option<String>,
}

/// Pronunciation text covering `base_start..base_end` (character offsets) of the base text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhoneticRun {
    pub base_start: u32,
    pub base_end: u32,
    pub text: String,
}

/// A shared string or comment body: formatted runs plus optional phonetic runs.
///
/// Values produced by [`TextRunCodec::rehydrate`](crate::TextRunCodec::rehydrate) remember the
/// fragment they were parsed from, so an unmodified value serializes back to the exact same
/// record (and therefore the same dedup key). Any mutation drops the remembered fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichText {
    runs: Vec<TextRun>,
    phonetic: Vec<PhoneticRun>,
    fragment: Option<String>,
}

impl RichText {
    /// A value with a single unformatted run.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            runs: vec![TextRun {
                text: text.into(),
                properties_xml: None,
            }],
            ..Self::default()
        }
    }

    pub fn from_runs(runs: Vec<TextRun>) -> Self {
        Self {
            runs,
            ..Self::default()
        }
    }

    pub(crate) fn from_parts(
        runs: Vec<TextRun>,
        phonetic: Vec<PhoneticRun>,
        fragment: String,
    ) -> Self {
        Self {
            runs,
            phonetic,
            fragment: Some(fragment),
        }
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn phonetic_runs(&self) -> &[PhoneticRun] {
        &self.phonetic
    }

    pub fn push_run(&mut self, text: impl Into<String>, properties_xml: Option<String>) {
        self.fragment = None;
        self.runs.push(TextRun {
            text: text.into(),
            properties_xml,
        });
    }

    pub fn push_phonetic(&mut self, run: PhoneticRun) {
        self.fragment = None;
        self.phonetic.push(run);
    }

    /// Displayed text: every run concatenated, phonetic runs excluded.
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    /// Displayed text, optionally followed by each phonetic run after a separating space.
    pub fn plain_text(&self, include_phonetic_runs: bool) -> String {
        let mut out = self.text();
        if include_phonetic_runs {
            for run in &self.phonetic {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&run.text);
            }
        }
        out
    }

    pub fn has_formatting(&self) -> bool {
        self.runs.iter().any(|run| run.properties_xml.is_some())
    }

    /// Children of the `<si>` / `<text>` container for this value.
    ///
    /// A single unformatted run is written as a bare `<t>`; anything else as `<r>` runs
    /// followed by `<rPh>` runs.
    pub fn to_fragment(&self) -> String {
        if let Some(fragment) = &self.fragment {
            return fragment.clone();
        }

        let mut writer = Writer::new(Vec::new());
        // Writing into a Vec cannot fail.
        let _ = self.write_runs(&mut writer);
        String::from_utf8_lossy(&writer.into_inner()).into_owned()
    }

    fn write_runs(&self, writer: &mut Writer<Vec<u8>>) -> std::io::Result<()> {
        match self.runs.as_slice() {
            [] => {}
            [run] if run.properties_xml.is_none() => write_t(writer, &run.text)?,
            runs => {
                for run in runs {
                    writer.write_event(Event::Start(BytesStart::new("r")))?;
                    if let Some(props) = &run.properties_xml {
                        writer.write_event(Event::Text(BytesText::from_escaped(props.as_str())))?;
                    }
                    write_t(writer, &run.text)?;
                    writer.write_event(Event::End(BytesEnd::new("r")))?;
                }
            }
        }

        for run in &self.phonetic {
            let mut rph = BytesStart::new("rPh");
            rph.push_attribute(("sb", run.base_start.to_string().as_str()));
            rph.push_attribute(("eb", run.base_end.to_string().as_str()));
            writer.write_event(Event::Start(rph))?;
            write_t(writer, &run.text)?;
            writer.write_event(Event::End(BytesEnd::new("rPh")))?;
        }
        Ok(())
    }
}

impl From<&str> for RichText {
    fn from(text: &str) -> Self {
        RichText::plain(text)
    }
}

impl From<String> for RichText {
    fn from(text: String) -> Self {
        RichText::plain(text)
    }
}

pub(crate) fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace)
}

pub(crate) fn write_t<W: std::io::Write>(writer: &mut Writer<W>, text: &str) -> std::io::Result<()> {
    let mut t = BytesStart::new("t");
    if needs_space_preserve(text) {
        t.push_attribute(("xml:space", "preserve"));
    }
    writer.write_event(Event::Start(t))?;
    writer.write_event(Event::Text(BytesText::new(&escape_xstring(text))))?;
    writer.write_event(Event::End(BytesEnd::new("t")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_plain_run_is_a_bare_t() {
        assert_eq!(RichText::plain("a<b").to_fragment(), "<t>a&lt;b</t>");
        assert_eq!(
            RichText::plain(" padded ").to_fragment(),
            r#"<t xml:space="preserve"> padded </t>"#
        );
    }

    #[test]
    fn formatted_runs_and_phonetics_are_written_in_order() {
        let mut rich = RichText::from_runs(vec![
            TextRun {
                text: "Bold".to_string(),
                properties_xml: Some("<rPr><b/></rPr>".to_string()),
            },
            TextRun {
                text: " tail".to_string(),
                properties_xml: None,
            },
        ]);
        rich.push_phonetic(PhoneticRun {
            base_start: 0,
            base_end: 4,
            text: "ボールド".to_string(),
        });

        assert_eq!(
            rich.to_fragment(),
            concat!(
                "<r><rPr><b/></rPr><t>Bold</t></r>",
                r#"<r><t xml:space="preserve"> tail</t></r>"#,
                r#"<rPh sb="0" eb="4"><t>ボールド</t></rPh>"#
            )
        );
        assert_eq!(rich.text(), "Bold tail");
        assert_eq!(rich.plain_text(true), "Bold tail ボールド");
        assert!(rich.has_formatting());
    }

    #[test]
    fn mutation_forgets_the_parsed_fragment() {
        let mut rich = RichText::from_parts(
            vec![TextRun {
                text: "x".to_string(),
                properties_xml: None,
            }],
            Vec::new(),
            "<t>x</t><extra/>".to_string(),
        );
        assert_eq!(rich.to_fragment(), "<t>x</t><extra/>");
        rich.push_run("y", None);
        assert_eq!(rich.to_fragment(), "<r><t>x</t></r><r><t>y</t></r>");
    }
}
