use scraper::{Html, Selector};

use crate::util::normalize_whitespace;

/// Reads the title of the terminal page and decides whether it is an
/// archive-only delivery.
#[derive(Debug, Clone)]
pub struct TerminalInspector {
    title_selectors: Vec<Selector>,
    archive_extensions: Vec<String>,
}

impl TerminalInspector {
    pub fn new(title_selectors: Vec<Selector>, archive_extensions: Vec<String>) -> Self {
        Self {
            title_selectors,
            archive_extensions: archive_extensions
                .into_iter()
                .map(|extension| extension.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Text of the first selector that yields a non-empty element.
    pub fn title(&self, content: &str) -> String {
        let document = Html::parse_document(content);
        self.title_selectors
            .iter()
            .find_map(|selector| {
                document
                    .select(selector)
                    .map(|element| normalize_whitespace(&element.text().collect::<String>()))
                    .find(|text| !text.is_empty())
            })
            .unwrap_or_default()
    }

    pub fn is_archive(&self, title: &str) -> bool {
        let title = title.trim().to_ascii_lowercase();
        self.archive_extensions
            .iter()
            .any(|extension| title.ends_with(extension.as_str()))
    }
}
