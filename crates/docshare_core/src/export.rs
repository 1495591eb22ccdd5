//! Word (`.docx`) export.
//!
//! Rich text comes in as a Quill delta, the JSON the editor produces:
//!
//! ```json
//! {"ops":[{"insert":"Hello "},{"insert":"world","attributes":{"bold":true}},{"insert":"\n"}]}
//! ```
//!
//! Each `\n` ends a paragraph. Bold and italic attributes are kept per run;
//! other attributes and embedded (non-text) inserts are ignored.

use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use docx_rs::{Docx, Paragraph, Pic, Run};
use serde::Deserialize;

use crate::document::Document;
use crate::error::{DocShareError, Result};

#[derive(Debug, Deserialize)]
struct Delta {
    ops: Vec<Op>,
}

#[derive(Debug, Deserialize)]
struct Op {
    insert: serde_json::Value,
    #[serde(default)]
    attributes: Option<Attributes>,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    bold: Option<bool>,
    italic: Option<bool>,
}

/// A run of text sharing one set of formatting attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

impl TextSpan {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }
}

/// Split a Quill delta into paragraphs of formatted spans.
pub fn parse_delta(json: &str) -> Result<Vec<Vec<TextSpan>>> {
    let delta: Delta =
        serde_json::from_str(json).map_err(|e| DocShareError::InvalidDelta(e.to_string()))?;

    let mut paragraphs: Vec<Vec<TextSpan>> = vec![Vec::new()];
    for op in delta.ops {
        let Some(text) = op.insert.as_str() else {
            log::debug!("Skipping embedded insert {}", op.insert);
            continue;
        };
        let attributes = op.attributes.unwrap_or_default();
        let bold = attributes.bold.unwrap_or(false);
        let italic = attributes.italic.unwrap_or(false);

        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                paragraphs.push(Vec::new());
            }
            if line.is_empty() {
                continue;
            }
            if let Some(paragraph) = paragraphs.last_mut() {
                paragraph.push(TextSpan {
                    text: line.to_string(),
                    bold,
                    italic,
                });
            }
        }
    }

    // A delta always ends with a newline
    if paragraphs.len() > 1 && paragraphs.last().is_some_and(Vec::is_empty) {
        paragraphs.pop();
    }
    Ok(paragraphs)
}

fn paragraph(spans: &[TextSpan]) -> Paragraph {
    spans.iter().fold(Paragraph::new(), |p, span| {
        let mut run = Run::new().add_text(span.text.as_str());
        if span.bold {
            run = run.bold();
        }
        if span.italic {
            run = run.italic();
        }
        p.add_run(run)
    })
}

/// Builds a Word document paragraph by paragraph.
#[derive(Debug)]
pub struct DocxBuilder {
    doc: Docx,
    paragraphs: usize,
}

impl Default for DocxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self {
            doc: Docx::new(),
            paragraphs: 0,
        }
    }

    /// Start a document with `document`'s title as a bold heading line,
    /// followed by its content as plain text.
    pub fn from_document(document: &Document) -> Self {
        let mut builder = Self::new();
        if !document.title.is_empty() {
            builder.push(paragraph(&[TextSpan {
                text: document.title.clone(),
                bold: true,
                italic: false,
            }]));
        }
        builder.add_plain_text(&document.content);
        builder
    }

    fn push(&mut self, paragraph: Paragraph) {
        let doc = std::mem::replace(&mut self.doc, Docx::new());
        self.doc = doc.add_paragraph(paragraph);
        self.paragraphs += 1;
    }

    /// Number of paragraphs added so far, images included
    pub fn paragraph_count(&self) -> usize {
        self.paragraphs
    }

    /// Append a Quill delta. Nothing is added if the JSON is invalid.
    pub fn add_text(&mut self, delta_json: &str) -> Result<()> {
        log::debug!("Adding delta of {} bytes", delta_json.len());
        for spans in parse_delta(delta_json)? {
            self.push(paragraph(&spans));
        }
        Ok(())
    }

    /// Append unformatted text, one paragraph per line.
    pub fn add_plain_text(&mut self, text: &str) {
        for line in text.lines() {
            self.push(paragraph(&[TextSpan::plain(line)]));
        }
    }

    /// Append an image file in its own paragraph, sized in pixels.
    pub fn add_image(&mut self, path: impl AsRef<Path>, width: u32, height: u32) -> Result<()> {
        let path = path.as_ref();
        log::debug!("Adding image {:?}", path);
        let buf = std::fs::read(path)?;
        let pic = Pic::new_with_dimensions(buf, width, height);
        self.push(Paragraph::new().add_run(Run::new().add_image(pic)));
        Ok(())
    }

    /// Pack the document into `writer`.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        self.doc
            .build()
            .pack(writer)
            .map_err(|e| DocShareError::Export(e.to_string()))
    }

    /// Pack the document into memory.
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_to(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Write the document to `path`, replacing any existing file.
    pub fn save(self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        log::debug!("Exporting to {:?}", path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        self.write_to(File::create(path)?)
    }
}
