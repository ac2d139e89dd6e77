// Extractors for different document formats

pub mod docx;
pub mod pdf;
pub mod txt;
pub mod xlsx;

pub use docx::DocxExtractor;
pub use pdf::PdfExtractor;
pub use txt::TxtExtractor;
pub use xlsx::XlsxExtractor;

/// Decode the five predefined XML entities.
pub(crate) fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
