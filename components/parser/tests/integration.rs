//! End-to-end parses exercising the full driver against a `Dtd` built
//! from scratch, the way a real caller (e.g. `sgml-cli`) would use the
//! crate (spec §8 "End-to-end scenarios").

use sgml_dtd::{process_declaration, Dialect, Dtd, NoParameterEntities};
use sgml_parser::{process_stream, AttributeEvent, EventSink, MapCatalogue, NullCatalogue};

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl EventSink for Recorder {
    fn on_begin_element(&mut self, name: &str, attributes: &[AttributeEvent<'_>]) {
        for attr in attributes {
            self.events.push(format!("attr {} {:?}", attr.name, attr.value));
        }
        self.events.push(format!("open {}", name));
    }

    fn on_end_element(&mut self, name: &str) {
        self.events.push(format!("close {}", name));
    }

    fn on_data(&mut self, text: &str) {
        self.events.push(format!("data {}", text));
    }

    fn on_entity_reference(&mut self, name: &str) {
        self.events.push(format!("entity {}", name));
    }

    fn on_error(&mut self, error: &sgml_parser::ParseError) {
        self.events.push(format!("error {}", error));
    }
}

fn dtd_with(decls: &[(&str, &str)]) -> Dtd {
    let mut dtd = Dtd::new(Dialect::Sgml);
    let mut src = NoParameterEntities;
    for (kw, body) in decls {
        process_declaration(&mut dtd, kw, body, &mut src).unwrap();
    }
    dtd
}

#[test]
fn omitted_tags_are_inserted_on_the_way_to_an_allowed_child() {
    let mut dtd = dtd_with(&[
        ("ELEMENT", "html - - (body)"),
        ("ELEMENT", "body O O (p)*"),
        ("ELEMENT", "p O O (#PCDATA)*"),
    ]);
    let mut sink = Recorder::default();
    process_stream(&mut dtd, "<html><p>hello</p></body></html>", &NullCatalogue, &mut sink).unwrap();
    assert_eq!(
        sink.events,
        vec![
            "open html".to_string(),
            "open body".to_string(),
            "open p".to_string(),
            "data hello".to_string(),
            "close p".to_string(),
            "close body".to_string(),
            "close html".to_string(),
        ]
    );
}

#[test]
fn mismatched_end_tag_is_reported_but_parse_continues() {
    let mut dtd = dtd_with(&[("ELEMENT", "a - - (#PCDATA)*"), ("ELEMENT", "b - - (#PCDATA)*")]);
    let mut sink = Recorder::default();
    let _ = process_stream(&mut dtd, "<a>x</b>", &NullCatalogue, &mut sink);
    assert!(sink.events.iter().any(|e| e.starts_with("error")));
}

#[test]
fn general_entity_reference_expands_via_catalogue() {
    let mut dtd = dtd_with(&[("ELEMENT", "doc - - (#PCDATA)*"), ("ENTITY", "greeting \"hello\"")]);
    let mut sink = Recorder::default();
    process_stream(&mut dtd, "<doc>&greeting;</doc>", &NullCatalogue, &mut sink).unwrap();
    assert!(sink.events.contains(&"entity greeting".to_string()));
    assert!(sink.events.contains(&"data hello".to_string()));
}

#[test]
fn internal_subset_doctype_declares_elements_before_content_is_parsed() {
    let mut dtd = Dtd::new(Dialect::Sgml);
    let mut sink = Recorder::default();
    process_stream(
        &mut dtd,
        "<!DOCTYPE doc [<!ELEMENT doc - - (#PCDATA)*>]><doc>hi</doc>",
        &NullCatalogue,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.events, vec!["open doc".to_string(), "data hi".to_string(), "close doc".to_string()]);
}

#[test]
fn empty_element_declaration_rejects_character_data() {
    let mut dtd = dtd_with(&[("ELEMENT", "br - O EMPTY")]);
    let mut sink = Recorder::default();
    let result = process_stream(&mut dtd, "<br>stray text", &NullCatalogue, &mut sink);
    assert!(result.is_ok());
    assert!(sink
        .events
        .iter()
        .any(|e| e.starts_with("error") && e.contains("cannot contain character data")));
}

#[test]
fn map_catalogue_resolves_external_entity_text() {
    let mut dtd = dtd_with(&[
        ("ELEMENT", "doc - - (#PCDATA)*"),
        ("ENTITY", "note SYSTEM \"note.txt\""),
    ]);
    let mut catalogue = MapCatalogue::new();
    catalogue.insert("note.txt", b"a note".to_vec());
    let mut sink = Recorder::default();
    process_stream(&mut dtd, "<doc>&note;</doc>", &catalogue, &mut sink).unwrap();
    assert!(sink.events.contains(&"data a note".to_string()));
}

#[test]
fn conref_element_closes_without_an_explicit_end_tag() {
    let mut dtd = dtd_with(&[
        ("ELEMENT", "doc - - (img)*"),
        ("ELEMENT", "img - O EMPTY"),
        ("ATTLIST", "img src ENTITY #CONREF"),
    ]);
    let mut sink = Recorder::default();
    process_stream(&mut dtd, "<doc><img src=fig1></doc>", &NullCatalogue, &mut sink).unwrap();
    assert_eq!(
        sink.events,
        vec![
            "open doc".to_string(),
            "attr src CData(\"fig1\")".to_string(),
            "open img".to_string(),
            "close img".to_string(),
            "close doc".to_string(),
        ]
    );
}

#[test]
fn excluded_content_is_reported_instead_of_accepted() {
    let mut dtd = dtd_with(&[
        ("ELEMENT", "doc - - (footnote)* -(footnote)"),
        ("ELEMENT", "footnote - - (#PCDATA)*"),
    ]);
    let mut sink = Recorder::default();
    let _ = process_stream(&mut dtd, "<doc><footnote>nope</footnote></doc>", &NullCatalogue, &mut sink);
    assert!(sink.events.iter().any(|e| e.starts_with("error") && e.contains("excluded")));
}
