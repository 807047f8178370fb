//! Incremental assembly of response documents.
//!
//! The simulator writes newline-terminated markup; a response document may
//! span several lines. The assembler buffers fed lines and re-scans the
//! buffer after each feed, yielding one [`Document`] as soon as a top-level
//! element closes. A malformed line is dropped from the buffer and reported,
//! never fatal.

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::record::Document;

#[derive(Debug, Default)]
pub struct DocumentAssembler {
    buf: String,
}

impl DocumentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line of wire data and try to complete a document.
    ///
    /// `Ok(None)` means more data is needed. `Err(MalformedRecord)` means
    /// the offending line was discarded; the caller logs and keeps reading.
    pub fn feed(&mut self, line: &str) -> Result<Option<Document>> {
        let old_len = self.buf.len();
        self.buf.push_str(line);
        if !line.is_empty() && !line.ends_with('\n') {
            self.buf.push('\n');
        }

        match self.scan() {
            Ok(result) => Ok(result),
            Err((pos, detail)) => {
                if pos < old_len {
                    // Inconsistency predates this line; the pending fragment
                    // is unrecoverable.
                    self.buf.clear();
                } else {
                    self.buf.truncate(old_len);
                }
                Err(Error::MalformedRecord(detail))
            }
        }
    }

    /// Bytes currently buffered without a completed document.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    // The reader stops right after a closing tag, so the line terminator
    // would otherwise linger in the buffer and count as pending data.
    fn trim_leading_whitespace(&mut self) {
        let keep = self.buf.trim_start().len();
        let skip = self.buf.len() - keep;
        self.buf.drain(..skip);
    }

    fn scan(&mut self) -> std::result::Result<Option<Document>, (usize, String)> {
        let mut reader = Reader::from_str(&self.buf);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Document> = Vec::new();
        loop {
            let event = reader
                .read_event()
                .map_err(|e| (reader.buffer_position() as usize, e.to_string()))?;
            match event {
                XmlEvent::Start(start) => {
                    let element = element_from(&reader, &start)?;
                    stack.push(element);
                }
                XmlEvent::Empty(start) => {
                    let element = element_from(&reader, &start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => {
                            let consumed = reader.buffer_position() as usize;
                            self.buf.drain(..consumed);
                            self.trim_leading_whitespace();
                            return Ok(Some(element));
                        }
                    }
                }
                XmlEvent::End(_) => {
                    // Mismatched names are caught by the reader itself.
                    let element = match stack.pop() {
                        Some(element) => element,
                        None => {
                            return Err((
                                reader.buffer_position() as usize,
                                "end tag without matching start".to_string(),
                            ))
                        }
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => {
                            let consumed = reader.buffer_position() as usize;
                            self.buf.drain(..consumed);
                            self.trim_leading_whitespace();
                            return Ok(Some(element));
                        }
                    }
                }
                XmlEvent::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        let chunk = text
                            .unescape()
                            .map_err(|e| (reader.buffer_position() as usize, e.to_string()))?;
                        top.text.push_str(&chunk);
                    }
                }
                XmlEvent::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                XmlEvent::Eof => return Ok(None),
                // Declarations, comments and processing instructions carry
                // no payload in this protocol.
                _ => {}
            }
        }
    }
}

fn element_from<R>(
    reader: &Reader<R>,
    start: &BytesStart<'_>,
) -> std::result::Result<Document, (usize, String)> {
    let mut element = Document::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| (reader.buffer_position() as usize, e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| (reader.buffer_position() as usize, e.to_string()))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}
