//! DTD data model (spec §3, component B): elements, attributes,
//! entities, notations, shortref maps and the `Dtd` container that owns
//! them all.
//!
//! Manual pointer graphs in the original become typed arenas here: the
//! `Dtd` owns `HashMap<Symbol, _>` tables, and sharing (a structure or
//! attribute list attached to a whole name-group) is `Rc`, matching
//! design note "manual pointer graph → arena + indices".

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use sgml_chars::{CaseFolding, CharClasses, CharFunctions};

use crate::content_model::{ContentModel, Fsm};
use crate::shortref::ShortrefMap;
use crate::symbol::{Symbol, SymbolTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Sgml,
    Xml,
    XmlNs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpaceMode {
    Sgml,
    Default,
    Preserve,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberMode {
    Token,
    Integer,
}

#[derive(Clone, Debug)]
pub struct DtdFlags {
    pub case_sensitive: bool,
    pub ent_case_sensitive: bool,
    pub shorttag: bool,
    pub number_mode: NumberMode,
    pub space_mode: SpaceMode,
}

impl Default for DtdFlags {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            ent_case_sensitive: true,
            shorttag: true,
            number_mode: NumberMode::Token,
            space_mode: SpaceMode::Sgml,
        }
    }
}

/// Content kind of an [`ElementStructure`] (spec §3 "Element structure").
pub enum ContentKind {
    Empty,
    Cdata,
    Rcdata,
    Any,
    Model(ContentModel),
}

/// Shared by every element in a name-group declaration (`Rc` stands in
/// for the original's refcount).
pub struct ElementStructure {
    pub content: ContentKind,
    pub fsm: Option<Fsm>,
    pub included: Vec<Symbol>,
    pub excluded: Vec<Symbol>,
    pub omit_open: bool,
    pub omit_close: bool,
}

impl ElementStructure {
    pub fn empty() -> Self {
        Self {
            content: ContentKind::Empty,
            fsm: None,
            included: Vec::new(),
            excluded: Vec::new(),
            omit_open: false,
            omit_close: false,
        }
    }
}

pub struct Element {
    pub name: Symbol,
    pub structure: Option<Rc<RefCell<ElementStructure>>>,
    pub attlist: Option<Rc<AttList>>,
    pub shortref_map: Option<Symbol>,
    /// `None` means "inherit from parent environment" (spec §3).
    pub space_mode: Option<SpaceMode>,
    pub undefined: bool,
}

impl Element {
    /// An element created lazily on first mention, before its
    /// `<!ELEMENT>` (if any) is ever seen (spec §3 "Lifecycle").
    pub fn undefined(name: Symbol) -> Self {
        Self {
            name,
            structure: None,
            attlist: None,
            shortref_map: None,
            space_mode: None,
            undefined: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttType {
    Cdata,
    Entity,
    Entities,
    Id,
    Idref,
    Idrefs,
    Name,
    Names,
    Nmtoken,
    Nmtokens,
    Number,
    Numbers,
    Nutoken,
    Nutokens,
    NameOf(Vec<String>),
    Notation(Vec<String>),
}

impl AttType {
    /// Types whose value is a (whitespace-separated) list rather than a
    /// single token (spec §3 "islist flag").
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            AttType::Entities | AttType::Idrefs | AttType::Names | AttType::Nmtokens | AttType::Numbers | AttType::Nutokens
        )
    }
}

#[derive(Clone, Debug)]
pub enum AttDefault {
    Default(String),
    Fixed(String),
    Required,
    Current,
    Conref,
    Implied,
}

#[derive(Clone, Debug)]
pub struct AttDef {
    pub name: Symbol,
    pub ty: AttType,
    pub default: AttDefault,
}

impl AttDef {
    pub fn is_list(&self) -> bool {
        self.ty.is_list()
    }
}

/// Shared by every element in the `<!ATTLIST>`'s name group.
pub struct AttList {
    pub defs: Vec<AttDef>,
}

impl AttList {
    pub fn find(&self, name: Symbol) -> Option<&AttDef> {
        self.defs.iter().find(|d| d.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityType {
    Literal,
    System,
    Public,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityContentKind {
    Sgml,
    Cdata,
    Sdata,
    Ndata,
    Pi,
    Starttag,
    Endtag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatalogLocation {
    Entity,
    Pentity,
    Doctype,
}

#[derive(Clone, Debug)]
pub enum EntityValue {
    Internal(String),
    External {
        public_id: Option<String>,
        system_id: Option<String>,
        base_url: Option<String>,
    },
}

pub struct EntityDef {
    pub name: Symbol,
    pub ty: EntityType,
    pub content_kind: EntityContentKind,
    pub value: EntityValue,
    pub notation: Option<Symbol>,
    pub catalog_location: CatalogLocation,
    /// Cached expanded value + length, filled in by the entity resolver
    /// the first time an external entity is loaded (spec §3 "Entity").
    pub cached: RefCell<Option<Rc<str>>>,
}

impl EntityDef {
    pub fn is_external(&self) -> bool {
        matches!(self.ty, EntityType::System | EntityType::Public)
    }
}

pub struct NotationDef {
    pub name: Symbol,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// Root container (spec §3 "DTD").
pub struct Dtd {
    pub doctype_name: Option<Symbol>,
    pub dialect: Dialect,
    pub encoding: String,
    pub char_classes: CharClasses,
    pub char_functions: CharFunctions,
    pub name_case: CaseFolding,
    pub entity_case: CaseFolding,
    pub names: SymbolTable,
    pub entity_names: SymbolTable,
    elements: HashMap<Symbol, Element>,
    pub general_entities: HashMap<Symbol, Rc<EntityDef>>,
    pub parameter_entities: HashMap<Symbol, Rc<EntityDef>>,
    pub notations: HashMap<Symbol, Rc<NotationDef>>,
    pub shortref_maps: HashMap<Symbol, Rc<ShortrefMap>>,
    pub default_entity: Option<Symbol>,
    pub flags: DtdFlags,
}

impl Dtd {
    pub fn new(dialect: Dialect) -> Self {
        let flags = match dialect {
            Dialect::Sgml => DtdFlags::default(),
            Dialect::Xml | Dialect::XmlNs => DtdFlags {
                case_sensitive: true,
                ent_case_sensitive: true,
                shorttag: false,
                number_mode: NumberMode::Token,
                space_mode: SpaceMode::Preserve,
            },
        };
        let name_case = if flags.case_sensitive {
            CaseFolding::Exact
        } else {
            CaseFolding::FoldToUpper
        };
        let entity_case = if flags.ent_case_sensitive {
            CaseFolding::Exact
        } else {
            CaseFolding::FoldToUpper
        };
        Self {
            doctype_name: None,
            dialect,
            encoding: if dialect == Dialect::Sgml {
                "ISO-8859-1".to_string()
            } else {
                "UTF-8".to_string()
            },
            char_classes: CharClasses::sgml_default(),
            char_functions: CharFunctions::default(),
            name_case,
            entity_case,
            names: SymbolTable::new(name_case),
            entity_names: SymbolTable::new(entity_case),
            elements: HashMap::new(),
            general_entities: HashMap::new(),
            parameter_entities: HashMap::new(),
            notations: HashMap::new(),
            shortref_maps: HashMap::new(),
            default_entity: None,
            flags,
        }
    }

    /// Looks up (without creating) the element for `symbol`.
    pub fn element(&self, symbol: Symbol) -> Option<&Element> {
        self.elements.get(&symbol)
    }

    pub fn element_mut(&mut self, symbol: Symbol) -> Option<&mut Element> {
        self.elements.get_mut(&symbol)
    }

    /// Invariant (i)/(iii): creates an `undefined` element lazily on
    /// first mention (spec §3 "Lifecycle").
    pub fn element_or_create(&mut self, symbol: Symbol) -> &mut Element {
        self.elements
            .entry(symbol)
            .or_insert_with(|| Element::undefined(symbol))
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn intern_name(&mut self, name: &str) -> Symbol {
        self.names.add(name)
    }

    pub fn intern_entity_name(&mut self, name: &str) -> Symbol {
        self.entity_names.add(name)
    }

    pub fn builder(dialect: Dialect) -> DtdBuilder {
        DtdBuilder::new(dialect)
    }
}

/// Builder for the handful of settings the reference concrete syntax
/// lets a DTD override before any declaration is parsed (spec §10.3):
/// case folding, shorttag/OMITTAG, and the delimiter/char-class tables.
/// Everything else is derived from `dialect` the same way [`Dtd::new`]
/// derives it.
pub struct DtdBuilder {
    dialect: Dialect,
    case_sensitive: Option<bool>,
    ent_case_sensitive: Option<bool>,
    shorttag: Option<bool>,
    char_classes: Option<CharClasses>,
    char_functions: Option<CharFunctions>,
}

impl DtdBuilder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            case_sensitive: None,
            ent_case_sensitive: None,
            shorttag: None,
            char_classes: None,
            char_functions: None,
        }
    }

    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = Some(value);
        self
    }

    pub fn entity_case_sensitive(mut self, value: bool) -> Self {
        self.ent_case_sensitive = Some(value);
        self
    }

    pub fn shorttag(mut self, value: bool) -> Self {
        self.shorttag = Some(value);
        self
    }

    pub fn char_classes(mut self, value: CharClasses) -> Self {
        self.char_classes = Some(value);
        self
    }

    pub fn char_functions(mut self, value: CharFunctions) -> Self {
        self.char_functions = Some(value);
        self
    }

    pub fn build(self) -> Dtd {
        let mut dtd = Dtd::new(self.dialect);
        if let Some(v) = self.case_sensitive {
            dtd.flags.case_sensitive = v;
            dtd.name_case = if v { CaseFolding::Exact } else { CaseFolding::FoldToUpper };
            dtd.names = SymbolTable::new(dtd.name_case);
        }
        if let Some(v) = self.ent_case_sensitive {
            dtd.flags.ent_case_sensitive = v;
            dtd.entity_case = if v { CaseFolding::Exact } else { CaseFolding::FoldToUpper };
            dtd.entity_names = SymbolTable::new(dtd.entity_case);
        }
        if let Some(v) = self.shorttag {
            dtd.flags.shorttag = v;
        }
        if let Some(v) = self.char_classes {
            dtd.char_classes = v;
        }
        if let Some(v) = self.char_functions {
            dtd.char_functions = v;
        }
        dtd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_lifecycle_lazy_then_defined() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let p = dtd.intern_name("p");
        assert!(dtd.element(p).is_none());

        assert!(dtd.element_or_create(p).undefined);
        assert!(dtd.element(p).unwrap().undefined);

        let elem = dtd.element_or_create(p);
        elem.undefined = false;
        elem.structure = Some(Rc::new(RefCell::new(ElementStructure::empty())));
        assert!(!dtd.element(p).unwrap().undefined);
        assert!(dtd.element(p).unwrap().structure.is_some());
    }

    #[test]
    fn xml_dialect_forces_case_sensitivity_and_no_shorttag() {
        let dtd = Dtd::new(Dialect::Xml);
        assert!(dtd.flags.case_sensitive);
        assert!(!dtd.flags.shorttag);
        assert_eq!(dtd.encoding, "UTF-8");
    }

    #[test]
    fn builder_overrides_case_sensitivity() {
        let dtd = Dtd::builder(Dialect::Sgml).case_sensitive(true).shorttag(false).build();
        assert!(dtd.flags.case_sensitive);
        assert!(!dtd.flags.shorttag);
        assert_eq!(dtd.name_case, CaseFolding::Exact);
    }

    #[test]
    fn attlist_shared_across_name_group() {
        let attlist = Rc::new(AttList {
            defs: vec![AttDef {
                name: Symbol(0),
                ty: AttType::Cdata,
                default: AttDefault::Implied,
            }],
        });
        let mut dtd = Dtd::new(Dialect::Sgml);
        let a = dtd.intern_name("a");
        let b = dtd.intern_name("b");
        dtd.element_or_create(a).attlist = Some(attlist.clone());
        dtd.element_or_create(b).attlist = Some(attlist.clone());
        assert_eq!(Rc::strong_count(&attlist), 3);
    }
}
