//! Joining per-page compositions into one piece.

use std::sync::LazyLock;

use regex::Regex;

use super::model::{Composition, FORMAT_VERSION, UNTITLED};

static PAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_page_\d+(?:_downsampled)?$").expect("page suffix pattern is valid")
});

/// Concatenates page compositions in order.
///
/// Title, tempo and time signature come from the first page. A single page is
/// returned as-is; an empty slice yields `None`.
pub fn merge_pages(mut pages: Vec<Composition>) -> Option<Composition> {
    if pages.len() <= 1 {
        return pages.pop();
    }

    let first = &pages[0];
    let mut merged = Composition {
        title: first.title.clone(),
        tempo: first.tempo,
        time_signature: first.time_signature.clone(),
        measures: Vec::new(),
        version: FORMAT_VERSION.to_string(),
        processing: None,
    };
    for page in pages {
        merged.measures.extend(page.measures);
    }
    Some(merged)
}

/// Picks the title for a finished job.
///
/// Engine artifacts are named after page images (`song_page_3`, or
/// `song_page_3_downsampled` for a shrunk page), so a detected
/// title that carried such a suffix, or the generic placeholder, is replaced
/// by the stem of the uploaded file.
pub fn resolve_title(detected: &str, input_stem: &str) -> String {
    let stripped = PAGE_SUFFIX.replace(detected, "");
    if stripped == UNTITLED || stripped != detected {
        input_stem.to_string()
    } else {
        detected.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tab::model::Measure;

    fn page(title: &str, tempo: u32, measures: &[&str]) -> Composition {
        let mut comp = Composition::new(title, tempo, measures.first().copied().unwrap_or("4/4"));
        comp.measures = measures.iter().map(|ts| Measure::empty(*ts)).collect();
        comp
    }

    #[test]
    fn single_page_is_returned_unchanged() {
        let only = page("Solo", 90, &["3/4", "3/4"]);
        assert_eq!(merge_pages(vec![only.clone()]), Some(only));
    }

    #[test]
    fn empty_input_merges_to_nothing() {
        assert_eq!(merge_pages(Vec::new()), None);
    }

    #[test]
    fn pages_concatenate_with_first_page_metadata() {
        let merged = merge_pages(vec![
            page("One", 100, &["3/4"]),
            page("Two", 140, &["4/4", "2/4"]),
            page("Three", 60, &["6/8"]),
        ])
        .unwrap();

        assert_eq!(merged.title, "One");
        assert_eq!(merged.tempo, 100);
        assert_eq!(merged.time_signature, "3/4");
        let sigs: Vec<&str> = merged.measures.iter().map(|m| m.time_signature.as_str()).collect();
        assert_eq!(sigs, vec!["3/4", "4/4", "2/4", "6/8"]);
    }

    #[test]
    fn page_suffix_title_falls_back_to_input_name() {
        assert_eq!(resolve_title("scan_page_1", "Moonlight"), "Moonlight");
        assert_eq!(resolve_title("Untitled", "Moonlight"), "Moonlight");
        assert_eq!(resolve_title("Für Elise", "scan"), "Für Elise");
        assert_eq!(resolve_title("page_1_intro", "scan"), "page_1_intro");
    }

    #[test]
    fn downsampled_page_title_falls_back_to_input_name() {
        assert_eq!(resolve_title("scan_page_3_downsampled", "Moonlight"), "Moonlight");
        assert_eq!(resolve_title("notes_downsampled", "scan"), "notes_downsampled");
    }
}
