extern crate legalrag;

use legalrag::{Chunker, DocumentMetadata, Page, RAGError, RawDocument};
use proptest::prelude::*;

fn page(source: &str, number: u32, content: String) -> RawDocument {
    RawDocument {
        content,
        metadata: DocumentMetadata {
            source: source.to_string(),
            page: Page::Number(number),
        },
    }
}

/// Glues windows back together, skipping the overlap each later window repeats.
fn reassemble(windows: &[&str], overlap: usize) -> String {
    let mut out = String::new();
    for (i, w) in windows.iter().enumerate() {
        if i == 0 {
            out.push_str(w);
        } else {
            out.extend(w.chars().skip(overlap));
        }
    }
    out
}

#[test]
fn test_two_page_pdf_scenario() {
    let page_one: String = (0..1500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let page_two = "z".repeat(50);
    let docs = vec![
        page("statute.pdf", 1, page_one.clone()),
        page("statute.pdf", 2, page_two.clone()),
    ];

    let chunks = Chunker::default().chunk_all_documents(&docs);

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].content, page_one[0..1000]);
    assert_eq!(chunks[1].content, page_one[800..1500]);
    assert_eq!(chunks[2].content, page_two);
    assert_eq!(chunks[0].metadata.page, Page::Number(1));
    assert_eq!(chunks[1].metadata.page, Page::Number(1));
    assert_eq!(chunks[2].metadata.page, Page::Number(2));
}

#[test]
fn test_short_content_is_a_single_chunk() {
    let chunks = Chunker::default().chunk_document(&page("a.pdf", 1, "short".to_string()));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "short");
}

#[test]
fn test_empty_content_yields_nothing() {
    let chunks = Chunker::default().chunk_document(&page("a.pdf", 1, String::new()));
    assert!(chunks.is_empty());
}

#[test]
fn test_windows_count_characters_not_bytes() {
    // Georgian letters are three bytes each in UTF-8.
    let text = "ქართული სამართალი".repeat(20);
    let chunker = Chunker::new(10, 3).unwrap();

    let windows = chunker.windows(&text);
    assert!(windows.iter().all(|w| w.chars().count() <= 10));
    assert_eq!(windows[0].chars().count(), 10);
    assert_eq!(reassemble(&windows, 3), text);
}

#[test]
fn test_each_chunk_owns_its_metadata() {
    let doc = page("code.pdf", 7, "x".repeat(2500));
    let mut chunks = Chunker::default().chunk_document(&doc);
    // starts at 0, 800, 1600 and 2400
    assert_eq!(chunks.len(), 4);

    chunks[0].metadata.source.push_str("-edited");
    assert_eq!(chunks[1].metadata.source, "code.pdf");
    assert_eq!(doc.metadata.source, "code.pdf");
}

#[test]
fn test_invalid_parameters_are_rejected() {
    assert!(matches!(
        Chunker::new(200, 200),
        Err(RAGError::InvalidChunkConfig { size: 200, overlap: 200 })
    ));
    assert!(Chunker::new(200, 500).is_err());
    assert!(Chunker::new(0, 0).is_err());
    assert_eq!(Chunker::new(1, 0).unwrap().step(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_windows_reassemble_to_content(
        text in "\\PC{0,400}",
        size in 1usize..64,
        overlap_seed in 0usize..64,
    ) {
        let overlap = overlap_seed % size;
        let chunker = Chunker::new(size, overlap).unwrap();
        let windows = chunker.windows(&text);

        prop_assert_eq!(reassemble(&windows, overlap), text.clone());
        prop_assert!(windows.iter().all(|w| !w.is_empty() && w.chars().count() <= size));

        // Terminates with the expected number of windows.
        let n = text.chars().count();
        let expected = if n == 0 { 0 } else { (n - 1) / (size - overlap) + 1 };
        prop_assert_eq!(windows.len(), expected);
    }
}
