use std::sync::LazyLock;

use regex::Regex;

use crate::error::LinkError;

/// Marker identifying the postal-code directory download on the Post AG "Postlexikon" page.
pub const POSTAL_LINK_MARKER: &str = r#"title="PLZ Verzeichnis""#;

/// href attribute whose target is an Excel workbook (.xls or .xlsx), optionally with a query string.
static WORKBOOK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href\s*=\s*"([^"]+?\.xlsx?)(?:[?#][^"]*)?""#).expect("static regex")
});

/// Extract the workbook download URL from scraped page markup.
///
/// The first line containing `marker` is taken; its href must point at a workbook.
/// Both failure modes mean the upstream page changed shape and need an operator.
pub fn resolve_download_link<'a, I>(lines: I, marker: &str) -> Result<String, LinkError>
where
    I: IntoIterator<Item = &'a str>,
{
    let line = lines.into_iter()
        .find(|line| line.contains(marker))
        .ok_or_else(|| LinkError::NotFound { marker: marker.to_string() })?;

    WORKBOOK_HREF.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| LinkError::PatternMismatch { line: line.trim().to_string() })
}

/// Convenience wrapper over a whole page body.
pub fn resolve_from_page(page: &str, marker: &str) -> Result<String, LinkError> {
    resolve_download_link(page.lines(), marker)
}
