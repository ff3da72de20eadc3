//! Top-level driver (component I, spec §4.I).
//!
//! Owns the location stack across entity expansions, threads the
//! lexer's token stream through the element stack and event sink, and
//! parses the DOCTYPE's internal subset (bracket-matching its
//! boundaries itself, since that requires tracking nested literals and
//! comments the way [`sgml_dtd::declaration`] deliberately does not).

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace, warn};
use sgml_dtd::{Dtd, EntityContentKind, NoParameterEntities, ParameterEntitySource, ShortrefMap, Symbol};

use crate::attval::{normalize_value, resolve_shorthand, scan_attribute_specs};
use crate::error::{ErrorKind, ParseError, ParseResult};
use crate::event::{AttributeEvent, AttributeValue, EventSink};
use crate::lexer::{LexState, Lexer, Token};
use crate::resolver::{Catalogue, EntityResolver, NullCatalogue};
use crate::stack::ElementStack;

/// Drives a full parse of `input` against `dtd`, reporting every event
/// to `sink`. Declarations inside the DOCTYPE internal subset (if any)
/// are applied to `dtd` before document content is scanned; `dtd` may
/// also arrive already fully populated (external DTD supplied ahead of
/// time), in which case the input is assumed to start at the document
/// root.
pub fn process_stream(dtd: &mut Dtd, input: &str, catalogue: &dyn Catalogue, sink: &mut dyn EventSink) -> ParseResult<()> {
    let mut offset = 0;
    if let Some(prolog_end) = parse_prolog(dtd, input, sink)? {
        offset = prolog_end;
    }
    let body = &input[offset..];
    run_content(dtd, body, catalogue, sink)
}

/// Finds and applies a leading `<!DOCTYPE ...>`, including its
/// internal subset, returning the byte offset just past it. Returns
/// `None` if the input has no DOCTYPE (the caller's `dtd` is used
/// as-is).
fn parse_prolog(dtd: &mut Dtd, input: &str, sink: &mut dyn EventSink) -> ParseResult<Option<usize>> {
    let bytes = input.as_bytes();
    let start = match skip_whitespace_and_comments(input, 0) {
        Some(s) => s,
        None => return Ok(None),
    };
    let doctype_prefix = format!("{}{}DOCTYPE", dtd.char_functions.stago as char, dtd.char_functions.mdo as char);
    if !input[start..].to_ascii_uppercase().starts_with(&doctype_prefix.to_ascii_uppercase()) {
        return Ok(None);
    }
    let header_start = start + doctype_prefix.len();
    let mut pos = header_start;
    let mut depth_in_brackets = false;
    let mut header_end = None;
    let mut subset_range: Option<(usize, usize)> = None;
    let mut in_literal: Option<u8> = None;
    let mut comment_depth = 0usize;
    while pos < bytes.len() {
        let b = bytes[pos];
        if let Some(q) = in_literal {
            if b == q {
                in_literal = None;
            }
            pos += 1;
            continue;
        }
        if comment_depth > 0 {
            if input[pos..].starts_with("-->") {
                comment_depth -= 1;
                pos += 3;
                continue;
            }
            pos += 1;
            continue;
        }
        if b == dtd.char_functions.lit || b == dtd.char_functions.lita {
            in_literal = Some(b);
            pos += 1;
            continue;
        }
        if input[pos..].starts_with("<!--") {
            comment_depth += 1;
            pos += 4;
            continue;
        }
        if !depth_in_brackets && header_end.is_none() && b == dtd.char_functions.dso {
            header_end = Some(pos);
            depth_in_brackets = true;
            pos += 1;
            subset_range = Some((pos, pos));
            continue;
        }
        if depth_in_brackets && b == dtd.char_functions.dsc {
            depth_in_brackets = false;
            if let Some((s, _)) = subset_range {
                subset_range = Some((s, pos));
            }
            pos += 1;
            continue;
        }
        if !depth_in_brackets && b == dtd.char_functions.mdc {
            if header_end.is_none() {
                header_end = Some(pos);
            }
            pos += 1;
            break;
        }
        pos += 1;
    }
    let header_end = header_end.unwrap_or(pos);
    let header_body = &input[header_start..header_end.min(input.len())];
    let mut no_pe = NoParameterEntities;
    sgml_dtd::process_declaration(dtd, "DOCTYPE", header_body, &mut no_pe)?;

    if let Some((subset_start, subset_end)) = subset_range {
        parse_internal_subset(dtd, &input[subset_start..subset_end], sink)?;
    }

    Ok(Some(pos))
}

/// Applies every markup declaration in `text` to `dtd`, in order. Used
/// for a document's own internal subset and, via [`load_external_dtd`],
/// for a standalone external DTD file handed in ahead of the document
/// (spec §6 "demonstration CLI").
pub fn load_external_dtd(dtd: &mut Dtd, text: &str, sink: &mut dyn EventSink) -> ParseResult<()> {
    parse_internal_subset(dtd, text, sink)
}

/// Splits the internal subset into individual markup declarations and
/// applies each in turn. Parameter entities defined earlier in the
/// subset are visible to later declarations (spec §4.D "forward
/// visibility within a single subset").
fn parse_internal_subset(dtd: &mut Dtd, subset: &str, sink: &mut dyn EventSink) -> ParseResult<()> {
    let mut pe_table: HashMap<String, Rc<str>> = HashMap::new();
    let bytes = subset.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        if subset[pos..].starts_with("<!--") {
            if let Some(end) = subset[pos + 4..].find("--") {
                pos = pos + 4 + end + 2;
                if bytes.get(pos) == Some(&b'>') {
                    pos += 1;
                }
            } else {
                break;
            }
            continue;
        }
        if bytes[pos] != dtd.char_functions.stago || bytes.get(pos + 1) != Some(&dtd.char_functions.mdo) {
            pos += 1;
            continue;
        }
        let decl_start = pos + 2;
        let kw_end = subset[decl_start..]
            .find(|c: char| c.is_whitespace())
            .map(|p| decl_start + p)
            .unwrap_or(subset.len());
        let keyword = &subset[decl_start..kw_end];
        let mut scan = kw_end;
        let mut in_literal: Option<u8> = None;
        let mut end = subset.len();
        while scan < bytes.len() {
            let b = bytes[scan];
            if let Some(q) = in_literal {
                if b == q {
                    in_literal = None;
                }
            } else if b == dtd.char_functions.lit || b == dtd.char_functions.lita {
                in_literal = Some(b);
            } else if b == dtd.char_functions.mdc {
                end = scan;
                break;
            }
            scan += 1;
        }
        let body = subset[kw_end..end].trim();
        let mut source = MapSource(&mut pe_table);
        match sgml_dtd::process_declaration(dtd, keyword, body, &mut source) {
            Ok(sgml_dtd::DeclEvent::Entity { name, parameter: true }) => {
                if let Some(def) = dtd.parameter_entities.get(&name) {
                    if let sgml_dtd::EntityValue::Internal(text) = &def.value {
                        pe_table.insert(dtd.entity_names.name(name).to_string(), Rc::from(text.as_str()));
                    }
                }
                sink.on_decl(body);
            }
            Ok(_) => sink.on_decl(body),
            Err(e) => warn!("declaration error in internal subset: {}", e),
        }
        pos = end + 1;
    }
    Ok(())
}

struct MapSource<'a>(&'a mut HashMap<String, Rc<str>>);
impl<'a> ParameterEntitySource for MapSource<'a> {
    fn expand(&mut self, name: &str) -> Option<Rc<str>> {
        self.0.get(name).cloned().or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        })
    }
}

fn skip_whitespace_and_comments(input: &str, mut pos: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if input[pos..].starts_with("<!--") {
            if let Some(end) = input[pos + 4..].find("-->") {
                pos = pos + 4 + end + 3;
                continue;
            }
            return None;
        }
        break;
    }
    if pos >= bytes.len() {
        None
    } else {
        Some(pos)
    }
}

/// Scans document content: start/end tags, data, comments, PIs and
/// entity references, validating against `dtd` via the element stack
/// (spec §4.G/§4.I).
fn run_content(dtd: &Dtd, input: &str, catalogue: &dyn Catalogue, sink: &mut dyn EventSink) -> ParseResult<()> {
    let mut lexer = Lexer::new(input, dtd.char_functions);
    let mut stack = ElementStack::new(matches!(dtd.flags.space_mode, sgml_dtd::SpaceMode::Preserve));
    let resolver = EntityResolver::new(catalogue);

    sink.on_start_document();
    loop {
        let closing_name = stack.current().filter(|e| e.cdata_like).map(|e| dtd.names.name(e.name).to_string());
        let tok = lexer.next_token(closing_name.as_deref());
        match tok {
            Token::Eof => break,
            Token::Data(text) => {
                let offset = lexer.offset();
                process_data(dtd, &resolver, &mut stack, offset, text, sink)?;
            }
            Token::Comment(text) => sink.on_comment(text),
            Token::ProcessingInstruction(data) => {
                let (target, rest) = data.split_once(char::is_whitespace).unwrap_or((data, ""));
                sink.on_processing_instruction(target, rest.trim_start());
            }
            Token::EntityReference(name) => {
                resolve_and_emit_general_entity(dtd, &resolver, name, sink)?;
            }
            Token::CharReference(cp) => {
                if let Some(ch) = char::from_u32(cp) {
                    let mut buf = [0u8; 4];
                    sink.on_data(ch.encode_utf8(&mut buf));
                }
            }
            Token::StartTag { name, attrs, self_closed } => {
                handle_start_tag(dtd, &mut stack, &mut lexer, name, attrs, self_closed, sink)?;
            }
            Token::EndTag { name } => {
                let sym = dtd.names.get(name).ok_or_else(|| ParseError::error(ErrorKind::UnknownElement(name.to_string()), lexer.offset()))?;
                if let Err(e) = stack.pop(dtd, sym, lexer.offset()) {
                    sink.on_error(&e);
                } else {
                    sink.on_end_element(name);
                }
            }
            Token::MarkedSectionStart(keyword) => {
                handle_marked_section(&mut lexer, keyword);
            }
            Token::MarkedSectionEnd => {}
        }
    }
    if !stack.is_empty() {
        let err = ParseError::error(ErrorKind::UnclosedElement(dtd.names.name(stack.current().unwrap().name).to_string()), input.len());
        sink.on_error(&err);
    }
    sink.on_end_document();
    trace!("parse finished at depth {}", stack.depth());
    Ok(())
}

fn handle_marked_section(lexer: &mut Lexer, keyword: &str) {
    let upper = keyword.trim().to_ascii_uppercase();
    if upper.contains("IGNORE") {
        lexer.skip_ignored_section();
    } else if upper.contains("CDATA") {
        lexer.set_state(LexState::Cdata);
    } else if upper.contains("RCDATA") {
        lexer.set_state(LexState::Rcdata);
    }
}

fn resolve_and_emit_general_entity(dtd: &Dtd, resolver: &EntityResolver, name: &str, sink: &mut dyn EventSink) -> ParseResult<()> {
    let sym = match dtd.entity_names.get(name) {
        Some(s) => s,
        None => {
            let err = ParseError::error(ErrorKind::UnknownEntity(name.to_string()), 0);
            sink.on_error(&err);
            return Ok(());
        }
    };
    let def = match resolver.lookup_general(dtd, sym) {
        Some(d) => d.clone(),
        None => {
            let err = ParseError::error(ErrorKind::UnknownEntity(name.to_string()), 0);
            sink.on_error(&err);
            return Ok(());
        }
    };
    sink.on_entity_reference(name);
    let text = resolver.resolve(dtd, &def).map_err(|e| e.with_location(name))?;
    sink.on_data(&text);
    Ok(())
}

/// Feeds a chunk of character data through the current element's
/// shortref map (if any), splitting out and emitting a synthetic
/// entity reference for every matched delimiter (spec §4.H). Elements
/// with no active map skip straight to [`emit_plain_data`].
fn process_data(
    dtd: &Dtd,
    resolver: &EntityResolver,
    stack: &mut ElementStack,
    offset: usize,
    text: &str,
    sink: &mut dyn EventSink,
) -> ParseResult<()> {
    match stack.current().and_then(|e| e.shortref_map.clone()) {
        Some(map) => emit_data_with_shortrefs(dtd, resolver, &map, text, stack, offset, sink),
        None => emit_plain_data(dtd, stack, offset, text, sink),
    }
}

fn emit_plain_data(dtd: &Dtd, stack: &mut ElementStack, offset: usize, text: &str, sink: &mut dyn EventSink) -> ParseResult<()> {
    if text.is_empty() {
        return Ok(());
    }
    if stack.accept_data(dtd).is_err() {
        let name = stack.current().map(|e| dtd.names.name(e.name).to_string()).unwrap_or_default();
        sink.on_error(&ParseError::error(ErrorKind::DataNotAllowedInEmptyElement(name), offset));
    } else {
        sink.on_data(text);
    }
    Ok(())
}

fn emit_data_with_shortrefs(
    dtd: &Dtd,
    resolver: &EntityResolver,
    map: &ShortrefMap,
    mut text: &str,
    stack: &mut ElementStack,
    offset: usize,
    sink: &mut dyn EventSink,
) -> ParseResult<()> {
    let is_blank = |b: u8| dtd.char_classes.is_blank(b);
    while !text.is_empty() {
        let bytes = text.as_bytes();
        let hit = (0..bytes.len())
            .filter(|&i| map.starts_with(bytes[i]))
            .find_map(|i| map.longest_match(&bytes[i..], is_blank).map(|(len, entity)| (i, len, entity)));
        match hit {
            Some((start, len, entity)) => {
                emit_plain_data(dtd, stack, offset, &text[..start], sink)?;
                emit_shortref_entity(dtd, resolver, stack, offset, entity, sink)?;
                text = &text[start + len..];
            }
            None => {
                emit_plain_data(dtd, stack, offset, text, sink)?;
                break;
            }
        }
    }
    Ok(())
}

/// Resolves a matched shortref delimiter to its mapped entity and
/// notifies the sink (spec §4.H). A `STARTTAG`/`ENDTAG` entity (the
/// common case -- a shortref standing in for an omitted tag) pushes or
/// pops the named element instead of emitting text; any other kind
/// resolves and emits its replacement text like an ordinary general
/// entity reference.
fn emit_shortref_entity(
    dtd: &Dtd,
    resolver: &EntityResolver,
    stack: &mut ElementStack,
    offset: usize,
    entity: Symbol,
    sink: &mut dyn EventSink,
) -> ParseResult<()> {
    let name = dtd.entity_names.name(entity).to_string();
    sink.on_entity_reference(&name);
    let def = match resolver.lookup_general(dtd, entity) {
        Some(d) => d.clone(),
        None => return Ok(()),
    };
    match def.content_kind {
        EntityContentKind::Starttag | EntityContentKind::Endtag => {
            let text = resolver.resolve(dtd, &def).map_err(|e| e.with_location(&name))?;
            let tag_name = text.trim();
            if let Some(sym) = dtd.names.get(tag_name) {
                if matches!(def.content_kind, EntityContentKind::Starttag) {
                    if stack.push(dtd, sym, offset).is_ok() {
                        sink.on_begin_element(tag_name, &[]);
                    }
                } else if stack.pop(dtd, sym, offset).is_ok() {
                    sink.on_end_element(tag_name);
                }
            }
        }
        _ => {
            let text = resolver.resolve(dtd, &def).map_err(|e| e.with_location(&name))?;
            sink.on_data(&text);
        }
    }
    Ok(())
}

fn handle_start_tag(
    dtd: &Dtd,
    stack: &mut ElementStack,
    lexer: &mut Lexer,
    name: &str,
    attrs_src: &str,
    self_closed: bool,
    sink: &mut dyn EventSink,
) -> ParseResult<()> {
    let sym = match dtd.names.get(name) {
        Some(s) => s,
        None => {
            let err = ParseError::error(ErrorKind::UnknownElement(name.to_string()), lexer.offset());
            sink.on_error(&err);
            return Ok(());
        }
    };

    if let Err(rejected) = stack.push(dtd, sym, lexer.offset()) {
        if !matches!(rejected.kind(), ErrorKind::ElementNotAllowedHere { .. }) {
            sink.on_error(&rejected);
            return Ok(());
        }
        match stack.find_omitted_path(dtd, sym) {
            Some(path) => {
                for intermediate in &path[..path.len() - 1] {
                    stack.push(dtd, *intermediate, lexer.offset())?;
                    sink.on_begin_element(dtd.names.name(*intermediate), &[]);
                }
                stack.push(dtd, sym, lexer.offset())?;
            }
            None => {
                sink.on_error(&rejected);
                return Ok(());
            }
        }
    }

    let raw_attrs = scan_attribute_specs(attrs_src, &dtd.char_classes);
    let attlist = dtd.element(sym).and_then(|e| e.attlist.clone());
    let mut resolved: Vec<(String, String, bool)> = Vec::new();
    if let Some(attlist) = &attlist {
        for raw in &raw_attrs {
            let (attr_name, specified) = match &raw.name {
                Some(n) => (n.clone(), true),
                None => match resolve_shorthand(attlist, &raw.value) {
                    Some(def) => (dtd.names.name(def.name).to_string(), true),
                    None => (raw.value.clone(), true),
                },
            };
            let value = if raw.name.is_some() {
                normalize_value(&raw.value).into_owned()
            } else {
                attr_name.clone()
            };
            resolved.push((attr_name, value, specified));
        }
        apply_defaults(dtd, attlist, &mut resolved);
    } else {
        for raw in &raw_attrs {
            let attr_name = raw.name.clone().unwrap_or_else(|| raw.value.clone());
            resolved.push((attr_name, normalize_value(&raw.value).into_owned(), true));
        }
    }

    let events: Vec<AttributeEvent> = resolved
        .iter()
        .map(|(name, value, specified)| AttributeEvent {
            name,
            value: AttributeValue::CData(value),
            specified: *specified,
        })
        .collect();
    sink.on_begin_element(name, &events);
    debug!("opened element {}", name);

    // A CONREF attribute's content comes from the entity it names
    // instead of the element's own markup, so the element carries no
    // content of its own and closes immediately (spec §4.F "#CONREF
    // marks the element as self-closing").
    let conref = attlist
        .as_ref()
        .map(|al| al.defs.iter().any(|d| matches!(d.default, sgml_dtd::AttDefault::Conref)))
        .unwrap_or(false);

    if self_closed || conref {
        stack.pop(dtd, sym, lexer.offset())?;
        sink.on_end_element(name);
    }
    Ok(())
}

fn apply_defaults(dtd: &Dtd, attlist: &sgml_dtd::AttList, resolved: &mut Vec<(String, String, bool)>) {
    for def in &attlist.defs {
        let name = dtd.names.name(def.name);
        if resolved.iter().any(|(n, _, _)| n.eq_ignore_ascii_case(name)) {
            continue;
        }
        if let sgml_dtd::AttDefault::Default(v) | sgml_dtd::AttDefault::Fixed(v) = &def.default {
            resolved.push((name.to_string(), v.clone(), false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TraceSink;
    use sgml_dtd::{Dialect, NoParameterEntities};

    fn dtd_with(decls: &[(&str, &str)]) -> Dtd {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        for (kw, body) in decls {
            sgml_dtd::process_declaration(&mut dtd, kw, body, &mut src).unwrap();
        }
        dtd
    }

    #[test]
    fn parses_simple_document_without_doctype() {
        let mut dtd = dtd_with(&[("ELEMENT", "doc - - (#PCDATA)*")]);
        let cat = NullCatalogue;
        let mut sink = TraceSink::default();
        process_stream(&mut dtd, "<doc>hello</doc>", &cat, &mut sink).unwrap();
        assert!(sink.trace.contains(&"(+doc".to_string()));
        assert!(sink.trace.contains(&"-hello".to_string()));
        assert!(sink.trace.contains(&")-doc".to_string()));
    }

    #[test]
    fn parses_document_with_internal_subset_doctype() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        process_stream(
            &mut dtd,
            "<!DOCTYPE doc [<!ELEMENT doc - - (#PCDATA)*>]><doc>hi</doc>",
            &NullCatalogue,
            &mut TraceSink::default(),
        )
        .unwrap();
        assert!(dtd.names.get("doc").is_some());
    }

    #[test]
    fn conref_attribute_closes_the_element_like_a_self_closing_tag() {
        let mut dtd = dtd_with(&[
            ("ELEMENT", "doc - - (img)*"),
            ("ELEMENT", "img - O EMPTY"),
            ("ATTLIST", "img src ENTITY #CONREF"),
        ]);
        let mut sink = TraceSink::default();
        process_stream(&mut dtd, "<doc><img src=fig1></doc>", &NullCatalogue, &mut sink).unwrap();
        assert_eq!(
            sink.trace,
            vec!["(+doc".to_string(), "(+img".to_string(), ")-img".to_string(), ")-doc".to_string()]
        );
    }

    #[test]
    fn internal_subset_declarations_are_surfaced_to_the_sink() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut sink = TraceSink::default();
        process_stream(
            &mut dtd,
            "<!DOCTYPE doc [<!ELEMENT doc - - (#PCDATA)*>]><doc>hi</doc>",
            &NullCatalogue,
            &mut sink,
        )
        .unwrap();
        assert!(sink.decls.iter().any(|d| d.contains("doc") && d.contains("PCDATA")));
    }

    #[test]
    fn shortref_delimiter_splits_data_and_emits_a_synthetic_entity() {
        let mut dtd = dtd_with(&[
            ("ELEMENT", "doc - - (#PCDATA)*"),
            ("ENTITY", "para SYSTEM \"para.ent\" STARTTAG"),
            ("SHORTREF", "parabreak \"\n\n\" para"),
            ("USEMAP", "parabreak doc"),
        ]);
        let mut catalogue = crate::resolver::MapCatalogue::new();
        catalogue.insert("para.ent", b"doc".to_vec());
        let mut sink = TraceSink::default();
        let _ = process_stream(&mut dtd, "<doc>x\n\ny</doc>", &catalogue, &mut sink);
        assert!(sink.trace.iter().any(|e| e == "-x"));
        assert!(sink.trace.iter().any(|e| e == "&para;"));
    }
}
