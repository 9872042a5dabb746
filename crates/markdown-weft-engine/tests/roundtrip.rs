//! Corpus round-trip tests: extracting, parsing and serializing a canonical
//! document must reproduce it byte for byte.

use markdown_weft_engine::{PlaceholderRegistry, SerializeOptions, parse_markup, serialize};

const FIXTURES: &[&str] = &[
    "basic_document",
    "embedded_blocks",
    "tables_and_images",
    "rtl_document",
    "edge_cases",
];

fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!(
        "{}/tests/fixtures/{name}.md",
        env!("CARGO_MANIFEST_DIR")
    ))
    .unwrap()
}

fn round_trip(markup: &str) -> String {
    let (stripped, registry) = PlaceholderRegistry::extract(markup);
    let tree = parse_markup(&stripped);
    registry.reinject(&serialize(&tree, &registry, &SerializeOptions::default()))
}

fn assert_fixture(name: &str) {
    let markup = fixture(name);
    let first = round_trip(&markup);
    pretty_assertions::assert_eq!(first, markup, "fixture {name} must round trip");
    // and the canonical form is a fixed point
    let second = round_trip(&first);
    pretty_assertions::assert_eq!(second, first, "fixture {name} must be stable");
}

#[test]
fn fixture_basic_document() {
    assert_fixture("basic_document");
}

#[test]
fn fixture_embedded_blocks() {
    assert_fixture("embedded_blocks");
}

#[test]
fn fixture_tables_and_images() {
    assert_fixture("tables_and_images");
}

#[test]
fn fixture_rtl_document() {
    assert_fixture("rtl_document");
}

#[test]
fn fixture_edge_cases() {
    assert_fixture("edge_cases");
}

#[test]
fn a_fence_touching_the_next_line_reaches_a_stable_canonical_form() {
    let markup = "intro\n```mermaid\ngraph TD;\nA-->B\n```\nafter\n";
    let first = round_trip(markup);
    pretty_assertions::assert_eq!(
        first,
        "intro\n\n```mermaid\ngraph TD;\nA-->B\n```\nafter\n"
    );
    pretty_assertions::assert_eq!(round_trip(&first), first);
}

#[test]
fn extraction_and_reinjection_alone_are_an_identity() {
    for name in FIXTURES {
        let markup = fixture(name);
        let (stripped, registry) = PlaceholderRegistry::extract(&markup);
        pretty_assertions::assert_eq!(
            registry.reinject(&stripped),
            markup,
            "fixture {name} must reinject cleanly"
        );
    }
}

#[test]
fn mixed_fence_families_are_recorded_per_block() {
    let markup = fixture("embedded_blocks");
    let (_stripped, registry) = PlaceholderRegistry::extract(&markup);

    let fences: Vec<_> = registry.iter().map(|block| block.fence).collect();
    let kinds: Vec<_> = registry.iter().map(|block| block.kind).collect();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        fences,
        vec![
            markdown_weft_engine::FenceStyle::Backtick,
            markdown_weft_engine::FenceStyle::Colon,
        ]
    );
    assert_eq!(
        kinds,
        vec![
            markdown_weft_engine::PlaceholderKind::Diagram,
            markdown_weft_engine::PlaceholderKind::Formula,
        ]
    );
}
