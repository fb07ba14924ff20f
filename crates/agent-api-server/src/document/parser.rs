use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use lopdf::Document as PdfDocument;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

use super::{file_extension, IngestError};

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    /// Extension without the dot, stored as chunk metadata `type`.
    pub file_type: String,
    pub pages: Option<usize>,
}

pub struct DocumentParser;

impl DocumentParser {
    /// Extract plain text from an uploaded file. CPU-bound; call from a blocking task.
    pub fn parse(filename: &str, bytes: &[u8]) -> Result<ParsedDocument, IngestError> {
        let extension = file_extension(filename).unwrap_or_default();
        debug!("Parsing {} ({} bytes)", filename, bytes.len());

        let (content, pages) = match extension.as_str() {
            ".pdf" => Self::parse_pdf(bytes)?,
            ".docx" | ".doc" => (Self::parse_docx(bytes)?, None),
            _ => (Self::decode_text(bytes), None),
        };

        if content.trim().is_empty() {
            return Err(IngestError::Empty {
                filename: filename.to_string(),
            });
        }

        debug!("Parsed {} characters from {}", content.len(), filename);
        Ok(ParsedDocument {
            content,
            file_type: extension.trim_start_matches('.').to_string(),
            pages,
        })
    }

    /// Parse PDF using lopdf
    fn parse_pdf(bytes: &[u8]) -> Result<(String, Option<usize>), IngestError> {
        let doc = PdfDocument::load_mem(bytes)
            .map_err(|e| IngestError::Parse(format!("invalid PDF: {}", e)))?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut content = String::new();
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => {
                    warn!("Failed to extract text from page {}: {}", page_num, e);
                }
            }
        }

        Ok((content, Some(page_count)))
    }

    /// Body text of `word/document.xml`. Legacy `.doc` files are not zip archives and fail here.
    fn parse_docx(bytes: &[u8]) -> Result<String, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| IngestError::Parse(format!("not a DOCX archive: {}", e)))?;
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|e| IngestError::Parse(format!("missing word/document.xml: {}", e)))?;

        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| IngestError::Parse(format!("unreadable document.xml: {}", e)))?;

        Ok(Self::extract_word_text(&xml))
    }

    /// Strip WordprocessingML tags, keeping paragraph and line breaks.
    fn extract_word_text(xml: &str) -> String {
        let mut text = String::new();
        let mut tag = String::new();
        let mut inside_tag = false;

        for c in xml.chars() {
            match c {
                '<' => {
                    inside_tag = true;
                    tag.clear();
                }
                '>' if inside_tag => {
                    inside_tag = false;
                    let name = tag.split_whitespace().next().unwrap_or("");
                    match name.trim_end_matches('/') {
                        "/w:p" | "w:br" | "w:cr" => text.push('\n'),
                        "w:tab" => text.push('\t'),
                        _ => {}
                    }
                }
                _ if inside_tag => tag.push(c),
                _ => text.push(c),
            }
        }

        let decoded = Self::decode_entities(&text);
        decoded
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Single pass, so `&amp;lt;` stays `&lt;`. Unknown or invalid references are kept as written.
    fn decode_entities(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find('&') {
            out.push_str(&rest[..start]);
            rest = &rest[start..];

            let decoded = rest[1..]
                .find(';')
                .filter(|&end| end <= 10)
                .and_then(|end| Self::decode_entity(&rest[1..=end]).map(|c| (c, end + 2)));

            match decoded {
                Some((c, consumed)) => {
                    out.push(c);
                    rest = &rest[consumed..];
                }
                None => {
                    out.push('&');
                    rest = &rest[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn decode_entity(name: &str) -> Option<char> {
        match name {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "amp" => Some('&'),
            _ => {
                let code = name.strip_prefix('#')?;
                let value = match code.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                    None => code.parse::<u32>().ok()?,
                };
                char::from_u32(value)
            }
        }
    }

    /// UTF-8 (with or without BOM) or UTF-16 by BOM; anything else is read as Windows-1252.
    fn decode_text(bytes: &[u8]) -> String {
        let encoding: &'static Encoding = match Encoding::for_bom(bytes) {
            Some((encoding, _)) => encoding,
            None if std::str::from_utf8(bytes).is_ok() => UTF_8,
            None => WINDOWS_1252,
        };
        let (text, actual, had_errors) = encoding.decode(bytes);
        if had_errors {
            warn!("Replaced invalid {} sequences while decoding text", actual.name());
        }
        text.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_plain_text() {
        let parsed = DocumentParser::parse("notes.txt", b"Hello\nWorld").unwrap();
        assert_eq!(parsed.content, "Hello\nWorld");
        assert_eq!(parsed.file_type, "txt");
        assert!(parsed.pages.is_none());
    }

    #[test]
    fn test_latin1_text_is_decoded() {
        let parsed = DocumentParser::parse("old.md", b"caf\xe9").unwrap();
        assert_eq!(parsed.content, "café");
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let err = DocumentParser::parse("blank.txt", b"  \n ").unwrap_err();
        assert!(matches!(err, IngestError::Empty { .. }));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0"?><w:document><w:body>
            <w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Second</w:t><w:tab/><w:t>line</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let parsed = DocumentParser::parse("menu.docx", &docx_bytes(xml)).unwrap();
        assert_eq!(parsed.content, "Fish & chips\nSecond\tline");
        assert_eq!(parsed.file_type, "docx");
    }

    #[test]
    fn test_docx_character_references() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>It&#8217;s &#x201C;quoted&#x201d; &amp;lt; raw</w:t></w:r></w:p>
            <w:p><w:r><w:t>Kept: &nbsp; &#xD800; &#zz; AT&amp;T</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let parsed = DocumentParser::parse("quotes.docx", &docx_bytes(xml)).unwrap();
        assert_eq!(
            parsed.content,
            "It\u{2019}s \u{201C}quoted\u{201D} &lt; raw\nKept: &nbsp; &#xD800; &#zz; AT&T"
        );
    }

    #[test]
    fn test_invalid_pdf_is_parse_error() {
        let err = DocumentParser::parse("broken.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }
}
