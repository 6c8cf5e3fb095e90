//! Well-known PRONOM format codes.
//!
//! Only the formats the bundled engines read or write are listed. Anything
//! else is still a perfectly valid [`FormatCode`]; it just has no friendly
//! name and gets a file extension derived from the code itself.

use crate::FormatCode;
use std::borrow::Cow;

pub const DOC: &str = "fmt/40";
pub const DOCX: &str = "fmt/412";
pub const ODT: &str = "fmt/291";
pub const RTF: &str = "fmt/355";
pub const TXT: &str = "x-fmt/111";
pub const XLS: &str = "fmt/61";
pub const XLSX: &str = "fmt/214";
pub const ODS: &str = "fmt/295";
pub const PPT: &str = "fmt/126";
pub const PPTX: &str = "fmt/215";
pub const ODP: &str = "fmt/293";
pub const PDF_1_3: &str = "fmt/17";
pub const PDF_1_4: &str = "fmt/18";
pub const PDF_1_5: &str = "fmt/19";
pub const PDF_1_6: &str = "fmt/20";
pub const PDF_1_7: &str = "fmt/276";
pub const PDFA_1A: &str = "fmt/95";
pub const PDFA_1B: &str = "fmt/354";
pub const PDFA_2A: &str = "fmt/476";
pub const PDFA_2B: &str = "fmt/477";
pub const PDFA_2U: &str = "fmt/478";
pub const POSTSCRIPT: &str = "x-fmt/91";
pub const EPS: &str = "fmt/124";
pub const TIFF: &str = "fmt/353";
pub const PNG: &str = "fmt/13";
pub const JPEG: &str = "fmt/43";
pub const BMP: &str = "fmt/116";
pub const GIF: &str = "fmt/4";

/// A catalogued format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub code: &'static str,
    pub name: &'static str,
    pub extension: &'static str,
    pub mime: &'static str,
}

const fn entry(code: &'static str, name: &'static str, extension: &'static str, mime: &'static str) -> Entry {
    Entry { code, name, extension, mime }
}

const ENTRIES: &[Entry] = &[
    entry(DOC, "Microsoft Word 97-2003 Document", "doc", "application/msword"),
    entry(
        DOCX,
        "Microsoft Word Document (OOXML)",
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    entry(ODT, "OpenDocument Text 1.2", "odt", "application/vnd.oasis.opendocument.text"),
    entry(RTF, "Rich Text Format 1.9", "rtf", "application/rtf"),
    entry(TXT, "Plain Text File", "txt", "text/plain"),
    entry(XLS, "Microsoft Excel 97 Workbook", "xls", "application/vnd.ms-excel"),
    entry(XLSX, "Microsoft Excel Workbook (OOXML)", "xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    entry(ODS, "OpenDocument Spreadsheet 1.2", "ods", "application/vnd.oasis.opendocument.spreadsheet"),
    entry(PPT, "Microsoft PowerPoint 97-2003 Presentation", "ppt", "application/vnd.ms-powerpoint"),
    entry(
        PPTX,
        "Microsoft PowerPoint Presentation (OOXML)",
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    entry(ODP, "OpenDocument Presentation 1.2", "odp", "application/vnd.oasis.opendocument.presentation"),
    entry(PDF_1_3, "Portable Document Format 1.3", "pdf", "application/pdf"),
    entry(PDF_1_4, "Portable Document Format 1.4", "pdf", "application/pdf"),
    entry(PDF_1_5, "Portable Document Format 1.5", "pdf", "application/pdf"),
    entry(PDF_1_6, "Portable Document Format 1.6", "pdf", "application/pdf"),
    entry(PDF_1_7, "Portable Document Format 1.7", "pdf", "application/pdf"),
    entry(PDFA_1A, "PDF/A-1a", "pdf", "application/pdf"),
    entry(PDFA_1B, "PDF/A-1b", "pdf", "application/pdf"),
    entry(PDFA_2A, "PDF/A-2a", "pdf", "application/pdf"),
    entry(PDFA_2B, "PDF/A-2b", "pdf", "application/pdf"),
    entry(PDFA_2U, "PDF/A-2u", "pdf", "application/pdf"),
    entry(POSTSCRIPT, "PostScript", "ps", "application/postscript"),
    entry(EPS, "Encapsulated PostScript", "eps", "application/postscript"),
    entry(TIFF, "Tagged Image File Format", "tiff", "image/tiff"),
    entry(PNG, "Portable Network Graphics 1.2", "png", "image/png"),
    entry(JPEG, "JPEG File Interchange Format 1.01", "jpg", "image/jpeg"),
    entry(BMP, "Windows Bitmap 3.0", "bmp", "image/bmp"),
    entry(GIF, "Graphics Interchange Format 89a", "gif", "image/gif"),
];

/// Looks up a code in the catalogue.
pub fn lookup(code: &FormatCode) -> Option<&'static Entry> {
    ENTRIES.iter().find(|e| e.code == code.as_str())
}

/// Every catalogued entry, in declaration order.
pub fn entries() -> &'static [Entry] {
    ENTRIES
}

/// File extension (without the dot) used when writing a file of `code`.
///
/// Uncatalogued codes get a lowercase, filesystem-safe rendition of the code
/// so that every hop still produces a predictable name.
pub fn extension_for(code: &FormatCode) -> Cow<'static, str> {
    match lookup(code) {
        Some(entry) => Cow::Borrowed(entry.extension),
        None => Cow::Owned(
            code.as_str().chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' }).collect(),
        ),
    }
}

/// Whether `code` is one of the PDF/A variants.
pub fn is_pdfa(code: &FormatCode) -> bool {
    [PDFA_1A, PDFA_1B, PDFA_2A, PDFA_2B, PDFA_2U].contains(&code.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PDF_1_7, "pdf")]
    #[case(DOCX, "docx")]
    #[case(TIFF, "tiff")]
    #[case("fmt/A", "fmt_a")]
    #[case("x-fmt/999", "x_fmt_999")]
    fn test_extension_for(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(extension_for(&FormatCode::from(code)), expected);
    }

    #[test]
    fn test_codes_are_unique() {
        for (i, a) in ENTRIES.iter().enumerate() {
            assert!(ENTRIES[i + 1..].iter().all(|b| b.code != a.code), "duplicate entry {}", a.code);
        }
    }

    #[test]
    fn test_pdfa_detection() {
        assert!(is_pdfa(&FormatCode::from(PDFA_2B)));
        assert!(!is_pdfa(&FormatCode::from(PDF_1_7)));
    }
}
