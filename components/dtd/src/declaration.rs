//! Markup declaration parser (component D, spec §4.D).
//!
//! Parses the body of a single markup declaration -- the bytes between
//! `<!` and the closing `>` (or `]>` for a marked section), already
//! located by the lexer's `scan_declaration` (component F owns finding
//! those boundaries; nested literals, comments and groups inside the
//! internal subset are its job, not this crate's). Parameter-entity
//! references inside a declaration are expanded here, through the
//! [`ParameterEntitySource`] collaborator, before the declaration's own
//! syntax is parsed -- mirroring the original's "cover and uncover"
//! input-stack behaviour without actually modelling an input stack.

use crate::content_model::{Cardinality, ContentModel, ContentParticle, GroupKind, ModelLeaf};
use crate::error::{DtdError, DtdResult, Reason};
use crate::model::{
    AttDef, AttDefault, AttList, AttType, CatalogLocation, ContentKind, Dtd, Element,
    ElementStructure, EntityContentKind, EntityDef, EntityType, EntityValue, NotationDef,
};
use crate::shortref::{PatternToken, ShortrefEntry, ShortrefMap};
use crate::symbol::Symbol;
use std::rc::Rc;

/// Bridges to the entity resolver (component E) for `%name;` expansion
/// inside declarations. Kept as a trait so this crate never depends on
/// the resolver's I/O machinery directly.
pub trait ParameterEntitySource {
    /// Returns the already-decoded replacement text for `name`, or
    /// `None` if it is not (yet) defined.
    fn expand(&mut self, name: &str) -> Option<Rc<str>>;
}

/// A no-op source for contexts with no parameter entities in scope
/// (e.g. parsing the DOCTYPE header itself, which precedes the
/// internal subset).
pub struct NoParameterEntities;

impl ParameterEntitySource for NoParameterEntities {
    fn expand(&mut self, _name: &str) -> Option<Rc<str>> {
        None
    }
}

/// What a parsed declaration tells the caller to do (spec §4.D
/// "DeclEvent"). `process_declaration` returns one of these rather
/// than mutating `Dtd` itself in every arm, so callers can log/trace
/// uniformly (component §10.2).
pub enum DeclEvent {
    Element { names: Vec<Symbol> },
    AttList { names: Vec<Symbol> },
    Entity { name: Symbol, parameter: bool },
    Notation { name: Symbol },
    Shortref { name: Symbol },
    Usemap { element: Symbol, map: Option<Symbol> },
    DoctypeHeader { name: Symbol },
}

const MAX_PARAMETER_EXPANSION: usize = 1 << 20;

/// Byte cursor over a single (already parameter-entity-expandable)
/// declaration body. Mirrors the reader-side cursor idiom the teacher
/// uses for its combinators, simplified to the single-pass scan this
/// crate needs.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_blanks(&mut self, dtd: &Dtd) {
        while let Some(b) = self.peek() {
            if dtd.char_classes.is_white(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn require_blanks(&mut self, dtd: &Dtd) -> DtdResult<()> {
        let start = self.pos;
        self.skip_blanks(dtd);
        if self.pos == start {
            Err(DtdError::at(Reason::ExpectedWhitespace, self.pos))
        } else {
            Ok(())
        }
    }

    fn parse_name(&mut self, dtd: &Dtd) -> DtdResult<String> {
        let start = self.pos;
        if !self.peek().map(|b| dtd.char_classes.is_name_start(b)).unwrap_or(false) {
            return Err(DtdError::at(Reason::ExpectedName, self.pos));
        }
        while self.peek().map(|b| dtd.char_classes.is_name(b)).unwrap_or(false) {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn parse_literal(&mut self, dtd: &Dtd) -> DtdResult<String> {
        let quote = match self.peek() {
            Some(b) if b == dtd.char_functions.lit || b == dtd.char_functions.lita => b,
            _ => return Err(DtdError::at(Reason::ExpectedLiteral, self.pos)),
        };
        self.pos += 1;
        let start = self.pos;
        loop {
            match self.bump() {
                Some(b) if b == quote => break,
                Some(_) => continue,
                None => return Err(DtdError::at(Reason::UnterminatedLiteral, start)),
            }
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos - 1]).into_owned())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        let bytes = kw.as_bytes();
        if self.bytes[self.pos..].len() >= bytes.len()
            && self.bytes[self.pos..self.pos + bytes.len()].eq_ignore_ascii_case(bytes)
        {
            self.pos += bytes.len();
            true
        } else {
            false
        }
    }
}

/// Expands every `%name;` parameter entity reference in `raw` before
/// any declaration-syntax parsing happens (spec §4.E "parameter entity
/// expansion precedes recognition"). Bounded to
/// [`MAX_PARAMETER_EXPANSION`] bytes total (invariant: expansion must
/// terminate, spec §9 open question (b)'s neighbour).
fn expand_parameter_entities(raw: &str, pero: u8, source: &mut dyn ParameterEntitySource) -> DtdResult<String> {
    if !raw.as_bytes().contains(&pero) {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == pero {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && bytes[j] != b';' && !bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            let name = &raw[start..j];
            if name.is_empty() {
                out.push(pero as char);
                i += 1;
                continue;
            }
            match source.expand(name) {
                Some(replacement) => {
                    out.push_str(&replacement);
                    if j < bytes.len() && bytes[j] == b';' {
                        j += 1;
                    }
                    i = j;
                }
                None => {
                    return Err(DtdError::at(Reason::UnknownParameterEntity(name.to_string()), start));
                }
            }
            if out.len() > MAX_PARAMETER_EXPANSION {
                return Err(DtdError::at(Reason::ParameterEntityExpansionOverflow, i));
            }
        } else {
            let ch_start = i;
            let ch = raw[i..].chars().next().unwrap();
            i += ch.len_utf8();
            out.push_str(&raw[ch_start..i]);
        }
    }
    Ok(out)
}

/// Decodes numeric character references (`&#n;`/`&#Xn;`) the declaration
/// parser meets inside literals (spec §4.D, entity values may contain
/// character references that are resolved at declaration time, not
/// deferred to document parsing).
fn decode_char_refs(s: &str) -> String {
    if !s.contains("&#") {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"&#") {
            let hex = bytes.get(i + 2) == Some(&b'x') || bytes.get(i + 2) == Some(&b'X');
            let digits_start = if hex { i + 3 } else { i + 2 };
            let mut j = digits_start;
            while j < bytes.len() && bytes[j] != b';' {
                j += 1;
            }
            let digits = &s[digits_start..j];
            let parsed = if hex {
                u32::from_str_radix(digits, 16).ok()
            } else {
                digits.parse::<u32>().ok()
            };
            if let Some(cp) = parsed.and_then(char::from_u32) {
                out.push(cp);
                i = if j < bytes.len() { j + 1 } else { j };
                continue;
            }
        }
        let ch = s[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Parses and applies a single markup declaration. `body` is the raw
/// text between `<!KEYWORD` and the terminating delimiter, not yet
/// parameter-entity expanded. Redefinition policy (spec §3 "Lifecycle"
/// invariant (iii)): a second `<!ENTITY>` or `<!ATTLIST>` for an
/// already-defined name is silently ignored; a second `<!ELEMENT>`
/// naming an already-*defined* element is also ignored -- only a
/// previously undefined (forward-referenced) element may be filled in.
pub fn process_declaration(
    dtd: &mut Dtd,
    keyword: &str,
    body: &str,
    source: &mut dyn ParameterEntitySource,
) -> DtdResult<DeclEvent> {
    let pero = dtd.char_functions.pero;
    let expanded = expand_parameter_entities(body, pero, source)?;
    match keyword.to_ascii_uppercase().as_str() {
        "ELEMENT" => parse_element_decl(dtd, &expanded),
        "ATTLIST" => parse_attlist_decl(dtd, &expanded),
        "ENTITY" => parse_entity_decl(dtd, &expanded),
        "NOTATION" => parse_notation_decl(dtd, &expanded),
        "SHORTREF" => parse_shortref_decl(dtd, &expanded),
        "USEMAP" => parse_usemap_decl(dtd, &expanded),
        "DOCTYPE" => parse_doctype_header(dtd, &expanded),
        _ => Err(DtdError::at(
            Reason::ExpectedOneOf(&["ELEMENT", "ATTLIST", "ENTITY", "NOTATION", "SHORTREF", "USEMAP", "DOCTYPE"]),
            0,
        )),
    }
}

fn parse_name_group(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<Vec<Symbol>> {
    if cur.eat(dtd.char_functions.grpo) {
        let mut names = Vec::new();
        loop {
            cur.skip_blanks(dtd);
            let name = cur.parse_name(dtd)?;
            let sym = dtd.intern_name(&name);
            if names.contains(&sym) {
                return Err(DtdError::at(Reason::DuplicateNameGroupMember(name), cur.pos));
            }
            names.push(sym);
            cur.skip_blanks(dtd);
            match cur.peek() {
                Some(b) if b == dtd.char_functions.or || b == dtd.char_functions.seq => {
                    cur.pos += 1;
                }
                Some(b) if b == dtd.char_functions.grpc => {
                    cur.pos += 1;
                    break;
                }
                _ => return Err(DtdError::at(Reason::UnterminatedGroup, cur.pos)),
            }
        }
        if names.is_empty() {
            return Err(DtdError::at(Reason::EmptyNameGroup, cur.pos));
        }
        Ok(names)
    } else {
        let name = cur.parse_name(dtd)?;
        Ok(vec![dtd.intern_name(&name)])
    }
}

fn parse_element_decl(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let names = parse_name_group(dtd, &mut cur)?;
    cur.skip_blanks(dtd);

    let (omit_open, omit_close) = parse_omit_flags(dtd, &mut cur)?;
    cur.skip_blanks(dtd);

    let (content, included, excluded) = parse_content_spec(dtd, &mut cur)?;

    let structure = Rc::new(std::cell::RefCell::new(ElementStructure {
        content,
        fsm: None,
        included,
        excluded,
        omit_open,
        omit_close,
    }));
    {
        let mut s = structure.borrow_mut();
        if let ContentKind::Model(ref model) = s.content {
            s.fsm = Some(crate::content_model::Fsm::compile(model));
        }
    }

    for &name in &names {
        let elem = dtd.element_or_create(name);
        if !elem.undefined {
            continue;
        }
        *elem = Element {
            name,
            structure: Some(structure.clone()),
            attlist: elem.attlist.take(),
            shortref_map: elem.shortref_map,
            space_mode: elem.space_mode,
            undefined: false,
        };
    }
    Ok(DeclEvent::Element { names })
}

fn parse_omit_flags(dtd: &Dtd, cur: &mut Cursor) -> DtdResult<(bool, bool)> {
    if !dtd.flags.shorttag {
        return Ok((false, false));
    }
    // OMITTAG flags are only present when SHORTTAG / OMITTAG is enabled
    // and look like `- -` or `O O`.
    let save = cur.pos;
    cur.skip_blanks(dtd);
    let open = match cur.peek() {
        Some(b'-') => {
            cur.pos += 1;
            false
        }
        Some(b'O') | Some(b'o') => {
            cur.pos += 1;
            true
        }
        _ => {
            cur.pos = save;
            return Ok((false, false));
        }
    };
    cur.skip_blanks(dtd);
    let close = match cur.peek() {
        Some(b'-') => {
            cur.pos += 1;
            false
        }
        Some(b'O') | Some(b'o') => {
            cur.pos += 1;
            true
        }
        _ => return Err(DtdError::at(Reason::ExpectedOneOf(&["-", "O"]), cur.pos)),
    };
    Ok((open, close))
}

fn parse_content_spec(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<(ContentKind, Vec<Symbol>, Vec<Symbol>)> {
    if cur.eat_keyword("EMPTY") {
        return Ok((ContentKind::Empty, Vec::new(), Vec::new()));
    }
    if cur.eat_keyword("CDATA") {
        return Ok((ContentKind::Cdata, Vec::new(), Vec::new()));
    }
    if cur.eat_keyword("RCDATA") {
        return Ok((ContentKind::Rcdata, Vec::new(), Vec::new()));
    }
    if cur.eat_keyword("ANY") {
        return Ok((ContentKind::Any, Vec::new(), Vec::new()));
    }
    let particle = parse_model_group(dtd, cur)?;
    cur.skip_blanks(dtd);
    // exception lists: +(incl) -(excl), either/both, in that order.
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    if cur.eat(b'+') {
        included = parse_name_group(dtd, cur)?;
        cur.skip_blanks(dtd);
    }
    if cur.eat(b'-') {
        excluded = parse_name_group(dtd, cur)?;
    }
    Ok((ContentKind::Model(ContentModel { root: particle }), included, excluded))
}

fn parse_model_group(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<ContentParticle> {
    if cur.eat_keyword("#PCDATA") {
        return Ok(apply_occurrence(ContentParticle::Leaf(ModelLeaf::Pcdata, Cardinality::One), cur));
    }
    if !cur.eat(dtd.char_functions.grpo) {
        let name = cur.parse_name(dtd)?;
        let sym = dtd.intern_name(&name);
        return Ok(apply_occurrence(ContentParticle::Leaf(ModelLeaf::Element(sym), Cardinality::One), cur));
    }
    let mut members = Vec::new();
    let mut connector: Option<u8> = None;
    loop {
        cur.skip_blanks(dtd);
        if cur.eat_keyword("#PCDATA") {
            members.push(ContentParticle::Leaf(ModelLeaf::Pcdata, Cardinality::One));
        } else {
            members.push(parse_model_group(dtd, cur)?);
        }
        cur.skip_blanks(dtd);
        match cur.peek() {
            Some(b) if b == dtd.char_functions.grpc => {
                cur.pos += 1;
                break;
            }
            Some(b) if b == dtd.char_functions.or || b == dtd.char_functions.seq || b == dtd.char_functions.and => {
                if let Some(prev) = connector {
                    if prev != b {
                        return Err(DtdError::at(Reason::InconsistentConnector, cur.pos));
                    }
                } else {
                    connector = Some(b);
                }
                cur.pos += 1;
            }
            _ => return Err(DtdError::at(Reason::UnterminatedGroup, cur.pos)),
        }
    }
    let kind = match connector {
        None => GroupKind::Seq,
        Some(b) if b == dtd.char_functions.or => GroupKind::Or,
        Some(b) if b == dtd.char_functions.and => GroupKind::And,
        Some(_) => GroupKind::Seq,
    };
    Ok(apply_occurrence(ContentParticle::Group(kind, members, Cardinality::One), cur))
}

fn apply_occurrence(particle: ContentParticle, cur: &mut Cursor) -> ContentParticle {
    let card = match cur.peek() {
        Some(b'?') => {
            cur.pos += 1;
            Cardinality::Optional
        }
        Some(b'*') => {
            cur.pos += 1;
            Cardinality::ZeroOrMore
        }
        Some(b'+') => {
            cur.pos += 1;
            Cardinality::OneOrMore
        }
        _ => Cardinality::One,
    };
    match particle {
        ContentParticle::Leaf(leaf, _) => ContentParticle::Leaf(leaf, card),
        ContentParticle::Group(kind, members, _) => ContentParticle::Group(kind, members, card),
    }
}

fn parse_attlist_decl(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let names = parse_name_group(dtd, &mut cur)?;

    let mut defs = Vec::new();
    loop {
        cur.skip_blanks(dtd);
        if cur.at_end() {
            break;
        }
        let attname = cur.parse_name(dtd)?;
        let name = dtd.intern_name(&attname);
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        let ty = parse_attribute_type(dtd, &mut cur)?;
        cur.skip_blanks(dtd);
        let default = parse_attribute_default(dtd, &mut cur)?;
        defs.push(AttDef { name, ty, default });
    }

    let attlist = Rc::new(AttList { defs });
    for &name in &names {
        let elem = dtd.element_or_create(name);
        if elem.attlist.is_none() {
            elem.attlist = Some(attlist.clone());
        }
    }
    Ok(DeclEvent::AttList { names })
}

fn parse_attribute_type(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<AttType> {
    if cur.eat(dtd.char_functions.grpo) {
        // name group: either a NAME-of-these enumeration or a notation
        // list, distinguished by a preceding NOTATION keyword.
        let names = parse_paren_name_list(dtd, cur)?;
        return Ok(AttType::NameOf(names));
    }
    if cur.eat_keyword("NOTATION") {
        cur.skip_blanks(dtd);
        if !cur.eat(dtd.char_functions.grpo) {
            return Err(DtdError::at(Reason::ExpectedOneOf(&["("]), cur.pos));
        }
        let names = parse_paren_name_list(dtd, cur)?;
        return Ok(AttType::Notation(names));
    }
    for (kw, ty) in [
        ("CDATA", AttType::Cdata),
        ("ENTITIES", AttType::Entities),
        ("ENTITY", AttType::Entity),
        ("IDREFS", AttType::Idrefs),
        ("IDREF", AttType::Idref),
        ("ID", AttType::Id),
        ("NAMES", AttType::Names),
        ("NAME", AttType::Name),
        ("NMTOKENS", AttType::Nmtokens),
        ("NMTOKEN", AttType::Nmtoken),
        ("NUMBERS", AttType::Numbers),
        ("NUMBER", AttType::Number),
        ("NUTOKENS", AttType::Nutokens),
        ("NUTOKEN", AttType::Nutoken),
    ] {
        if cur.eat_keyword(kw) {
            return Ok(ty);
        }
    }
    Err(DtdError::at(Reason::InvalidAttributeType(format!("unrecognized token at offset {}", cur.pos)), cur.pos))
}

fn parse_paren_name_list(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<Vec<String>> {
    let mut names = Vec::new();
    loop {
        cur.skip_blanks(dtd);
        let name = cur.parse_name(dtd)?;
        names.push(name);
        cur.skip_blanks(dtd);
        match cur.peek() {
            Some(b) if b == dtd.char_functions.or => {
                cur.pos += 1;
            }
            Some(b) if b == dtd.char_functions.grpc => {
                cur.pos += 1;
                break;
            }
            _ => return Err(DtdError::at(Reason::UnterminatedGroup, cur.pos)),
        }
    }
    Ok(names)
}

fn parse_attribute_default(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<AttDefault> {
    if cur.eat_keyword("#REQUIRED") {
        return Ok(AttDefault::Required);
    }
    if cur.eat_keyword("#IMPLIED") {
        return Ok(AttDefault::Implied);
    }
    if cur.eat_keyword("#CURRENT") {
        return Ok(AttDefault::Current);
    }
    if cur.eat_keyword("#CONREF") {
        return Ok(AttDefault::Conref);
    }
    if cur.eat_keyword("#FIXED") {
        cur.skip_blanks(dtd);
        let value = cur.parse_literal(dtd)?;
        return Ok(AttDefault::Fixed(decode_char_refs(&value)));
    }
    let value = cur.parse_literal(dtd)?;
    Ok(AttDefault::Default(decode_char_refs(&value)))
}

fn parse_entity_decl(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let parameter = cur.eat(dtd.char_functions.pero);
    if parameter {
        cur.skip_blanks(dtd);
    }
    let raw_name = cur.parse_name(dtd)?;
    let name = dtd.intern_entity_name(&raw_name);
    cur.require_blanks(dtd)?;
    cur.skip_blanks(dtd);

    let (ty, value, content_kind, notation) = if cur.eat_keyword("SYSTEM") {
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        let system_id = cur.parse_literal(dtd)?;
        let (kind, notation) = parse_entity_data_kind(dtd, &mut cur)?;
        (
            EntityType::System,
            EntityValue::External {
                public_id: None,
                system_id: Some(system_id),
                base_url: None,
            },
            kind,
            notation,
        )
    } else if cur.eat_keyword("PUBLIC") {
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        let public_id = cur.parse_literal(dtd)?;
        cur.skip_blanks(dtd);
        let system_id = if cur.peek() == Some(dtd.char_functions.lit) || cur.peek() == Some(dtd.char_functions.lita) {
            Some(cur.parse_literal(dtd)?)
        } else {
            None
        };
        let (kind, notation) = parse_entity_data_kind(dtd, &mut cur)?;
        (
            EntityType::Public,
            EntityValue::External {
                public_id: Some(public_id),
                system_id,
                base_url: None,
            },
            kind,
            notation,
        )
    } else {
        let literal = cur.parse_literal(dtd)?;
        (
            EntityType::Literal,
            EntityValue::Internal(decode_char_refs(&literal)),
            EntityContentKind::Sgml,
            None,
        )
    };

    let notation_symbol = notation.map(|n| dtd.intern_name(&n));

    let def = Rc::new(EntityDef {
        name,
        ty,
        content_kind,
        value,
        notation: notation_symbol,
        catalog_location: if parameter { CatalogLocation::Pentity } else { CatalogLocation::Entity },
        cached: std::cell::RefCell::new(None),
    });

    let table = if parameter {
        &mut dtd.parameter_entities
    } else {
        &mut dtd.general_entities
    };
    table.entry(name).or_insert(def);

    Ok(DeclEvent::Entity { name, parameter })
}

fn parse_entity_data_kind(dtd: &mut Dtd, cur: &mut Cursor) -> DtdResult<(EntityContentKind, Option<String>)> {
    cur.skip_blanks(dtd);
    if cur.at_end() {
        return Ok((EntityContentKind::Cdata, None));
    }
    if cur.eat_keyword("CDATA") {
        return Ok((EntityContentKind::Cdata, None));
    }
    if cur.eat_keyword("SDATA") {
        return Ok((EntityContentKind::Sdata, None));
    }
    if cur.eat_keyword("NDATA") {
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        let notation = cur.parse_name(dtd)?;
        return Ok((EntityContentKind::Ndata, Some(notation)));
    }
    if cur.eat_keyword("PI") {
        return Ok((EntityContentKind::Pi, None));
    }
    if cur.eat_keyword("STARTTAG") {
        return Ok((EntityContentKind::Starttag, None));
    }
    if cur.eat_keyword("ENDTAG") {
        return Ok((EntityContentKind::Endtag, None));
    }
    Ok((EntityContentKind::Cdata, None))
}

fn parse_notation_decl(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let raw_name = cur.parse_name(dtd)?;
    let name = dtd.intern_name(&raw_name);
    cur.require_blanks(dtd)?;
    cur.skip_blanks(dtd);

    let (public_id, system_id) = if cur.eat_keyword("SYSTEM") {
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        (None, Some(cur.parse_literal(dtd)?))
    } else if cur.eat_keyword("PUBLIC") {
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        let public_id = cur.parse_literal(dtd)?;
        cur.skip_blanks(dtd);
        let system_id = if cur.peek() == Some(dtd.char_functions.lit) || cur.peek() == Some(dtd.char_functions.lita) {
            Some(cur.parse_literal(dtd)?)
        } else {
            None
        };
        (Some(public_id), system_id)
    } else {
        return Err(DtdError::at(Reason::ExpectedOneOf(&["SYSTEM", "PUBLIC"]), cur.pos));
    };

    dtd.notations.entry(name).or_insert_with(|| {
        Rc::new(NotationDef {
            name,
            public_id,
            system_id,
        })
    });
    Ok(DeclEvent::Notation { name })
}

fn parse_shortref_decl(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let raw_name = cur.parse_name(dtd)?;
    let name = dtd.intern_name(&raw_name);
    let mut entries = Vec::new();
    loop {
        cur.skip_blanks(dtd);
        if cur.at_end() {
            break;
        }
        let pattern_lit = cur.parse_literal(dtd)?;
        cur.require_blanks(dtd)?;
        cur.skip_blanks(dtd);
        let entity_name = cur.parse_name(dtd)?;
        let entity = dtd.intern_entity_name(&entity_name);
        entries.push(ShortrefEntry {
            pattern: compile_shortref_pattern(&pattern_lit),
            entity,
        });
    }
    dtd.shortref_maps.insert(name, Rc::new(ShortrefMap::compile(name, entries)));
    Ok(DeclEvent::Shortref { name })
}

fn compile_shortref_pattern(literal: &str) -> Vec<PatternToken> {
    let bytes = literal.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"BB") {
            tokens.push(PatternToken::DoubleBlank);
            i += 2;
        } else if bytes[i] == b'B' {
            tokens.push(PatternToken::Blank);
            i += 1;
        } else {
            tokens.push(PatternToken::Lit(bytes[i]));
            i += 1;
        }
    }
    tokens
}

fn parse_usemap_decl(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let map_name = cur.parse_name(dtd)?;
    let map = if map_name.eq_ignore_ascii_case("#EMPTY") {
        None
    } else {
        Some(dtd.intern_name(&map_name))
    };
    cur.require_blanks(dtd)?;
    cur.skip_blanks(dtd);
    let element_name = cur.parse_name(dtd)?;
    let element = dtd.intern_name(&element_name);
    dtd.element_or_create(element).shortref_map = map;
    Ok(DeclEvent::Usemap { element, map })
}

/// Parses only the DOCTYPE header (document type name + optional
/// external identifier); finding where the internal subset begins and
/// ends is the lexer's job (component F), since it requires tracking
/// nested literals/comments/groups inside `[...]`.
pub fn parse_doctype_header(dtd: &mut Dtd, body: &str) -> DtdResult<DeclEvent> {
    let mut cur = Cursor::new(body.as_bytes());
    cur.skip_blanks(dtd);
    let raw_name = cur.parse_name(dtd)?;
    let name = dtd.intern_name(&raw_name);
    dtd.doctype_name = Some(name);
    Ok(DeclEvent::DoctypeHeader { name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dialect;

    #[test]
    fn element_decl_empty_content() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "ELEMENT", "br - O EMPTY", &mut src).unwrap();
        let br = dtd.names.get("br").unwrap();
        let elem = dtd.element(br).unwrap();
        assert!(!elem.undefined);
        let structure = elem.structure.as_ref().unwrap().borrow();
        assert!(matches!(structure.content, ContentKind::Empty));
        assert!(!structure.omit_open);
        assert!(structure.omit_close);
    }

    #[test]
    fn element_decl_sequence_model() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "ELEMENT", "p - - (#PCDATA|em)*", &mut src).unwrap();
        let p = dtd.names.get("p").unwrap();
        let elem = dtd.element(p).unwrap();
        let structure = elem.structure.as_ref().unwrap().borrow();
        assert!(matches!(structure.content, ContentKind::Model(_)));
        assert!(structure.fsm.is_some());
    }

    #[test]
    fn attlist_decl_required_and_default() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "ATTLIST", "p id ID #REQUIRED class CDATA \"x\"", &mut src).unwrap();
        let p = dtd.names.get("p").unwrap();
        let attlist = dtd.element(p).unwrap().attlist.as_ref().unwrap();
        let id_sym = dtd.names.get("id").unwrap();
        assert!(matches!(attlist.find(id_sym).unwrap().default, AttDefault::Required));
        let class_sym = dtd.names.get("class").unwrap();
        match &attlist.find(class_sym).unwrap().default {
            AttDefault::Default(v) => assert_eq!(v, "x"),
            _ => panic!("expected default"),
        }
    }

    #[test]
    fn entity_decl_internal_literal() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "ENTITY", "copy \"(c)\"", &mut src).unwrap();
        let name = dtd.entity_names.get("copy").unwrap();
        let def = dtd.general_entities.get(&name).unwrap();
        match &def.value {
            EntityValue::Internal(v) => assert_eq!(v, "(c)"),
            _ => panic!("expected internal value"),
        }
    }

    #[test]
    fn entity_decl_parameter_prefix() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        let evt = process_declaration(&mut dtd, "ENTITY", "% common \"x y z\"", &mut src).unwrap();
        match evt {
            DeclEvent::Entity { parameter, .. } => assert!(parameter),
            _ => panic!("wrong event"),
        }
    }

    struct FixedSource(Vec<(&'static str, &'static str)>);
    impl ParameterEntitySource for FixedSource {
        fn expand(&mut self, name: &str) -> Option<Rc<str>> {
            self.0
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| Rc::from(*v))
        }
    }

    #[test]
    fn parameter_entity_expands_before_parsing() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = FixedSource(vec![("inline", "- -")]);
        process_declaration(&mut dtd, "ELEMENT", "p %inline; EMPTY", &mut src).unwrap();
        let p = dtd.names.get("p").unwrap();
        let structure = dtd.element(p).unwrap().structure.as_ref().unwrap().borrow();
        assert!(matches!(structure.content, ContentKind::Empty));
    }

    #[test]
    fn shortref_decl_compiles_blank_meta() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "SHORTREF", "para \"BB\" ent1 \"B\" ent2", &mut src).unwrap();
        let name = dtd.names.get("para").unwrap();
        assert!(dtd.shortref_maps.contains_key(&name));
    }

    #[test]
    fn notation_decl_public_and_system() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "NOTATION", "jpeg SYSTEM \"image/jpeg\"", &mut src).unwrap();
        let name = dtd.names.get("jpeg").unwrap();
        assert!(dtd.notations.contains_key(&name));
    }

    #[test]
    fn redefinition_of_entity_is_ignored() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let mut src = NoParameterEntities;
        process_declaration(&mut dtd, "ENTITY", "copy \"first\"", &mut src).unwrap();
        process_declaration(&mut dtd, "ENTITY", "copy \"second\"", &mut src).unwrap();
        let name = dtd.entity_names.get("copy").unwrap();
        match &dtd.general_entities.get(&name).unwrap().value {
            EntityValue::Internal(v) => assert_eq!(v, "first"),
            _ => panic!(),
        }
    }
}
