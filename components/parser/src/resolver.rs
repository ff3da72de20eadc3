//! Entity resolution (component E, spec §4.E).
//!
//! Resolves a general or parameter entity's replacement text, going
//! through a [`Catalogue`] for external identifiers and caching the
//! decoded bytes on the [`sgml_dtd::EntityDef`] itself so a
//! repeatedly-referenced external entity is only fetched once (spec
//! invariant: "external entities are loaded at most once per parse").

use std::rc::Rc;

use sgml_dtd::{Dtd, EntityDef, EntityType, EntityValue, Symbol};

use crate::encoding::decode;
use crate::error::{ErrorKind, ParseError};

/// Collaborator that turns a public/system identifier into bytes.
/// Implementations range from "read a file" to "return a fixed map of
/// canned fixtures" in tests.
pub trait Catalogue {
    fn find_in_catalogue(&self, public_id: Option<&str>, system_id: Option<&str>) -> Option<Vec<u8>>;
}

/// A [`Catalogue`] that never resolves anything -- the default for
/// contexts that don't allow external entities at all.
pub struct NullCatalogue;

impl Catalogue for NullCatalogue {
    fn find_in_catalogue(&self, _public_id: Option<&str>, _system_id: Option<&str>) -> Option<Vec<u8>> {
        None
    }
}

/// A [`Catalogue`] backed by an in-memory table, for tests and
/// embedding scenarios where all entities are already in hand.
#[derive(Default)]
pub struct MapCatalogue {
    by_system_id: std::collections::HashMap<String, Vec<u8>>,
}

impl MapCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, system_id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.by_system_id.insert(system_id.into(), bytes.into());
    }
}

impl Catalogue for MapCatalogue {
    fn find_in_catalogue(&self, _public_id: Option<&str>, system_id: Option<&str>) -> Option<Vec<u8>> {
        system_id.and_then(|id| self.by_system_id.get(id)).cloned()
    }
}

pub struct EntityResolver<'c> {
    catalogue: &'c dyn Catalogue,
    /// Bounds the total text an external entity may expand into, and
    /// the recursion depth of nested entity references (spec §5
    /// "Concurrency & resource model").
    max_expansion_bytes: usize,
    max_nesting_depth: usize,
}

impl<'c> EntityResolver<'c> {
    pub fn new(catalogue: &'c dyn Catalogue) -> Self {
        Self {
            catalogue,
            max_expansion_bytes: 16 << 20,
            max_nesting_depth: 64,
        }
    }

    pub fn with_limits(mut self, max_expansion_bytes: usize, max_nesting_depth: usize) -> Self {
        self.max_expansion_bytes = max_expansion_bytes;
        self.max_nesting_depth = max_nesting_depth;
        self
    }

    pub fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }

    /// Returns the entity's replacement text, fetching and caching an
    /// external entity's bytes on first use.
    pub fn resolve(&self, dtd: &Dtd, def: &Rc<EntityDef>) -> Result<Rc<str>, ParseError> {
        if let Some(cached) = def.cached.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let text: Rc<str> = match &def.value {
            EntityValue::Internal(text) => Rc::from(text.as_str()),
            EntityValue::External { public_id, system_id, .. } => {
                let bytes = self
                    .catalogue
                    .find_in_catalogue(public_id.as_deref(), system_id.as_deref())
                    .ok_or_else(|| {
                        ParseError::error(
                            ErrorKind::ExternalEntityUnresolved(dtd.entity_names.name(def.name).to_string()),
                            0,
                        )
                    })?;
                if bytes.len() > self.max_expansion_bytes {
                    return Err(ParseError::fatal(ErrorKind::ResourceLimitExceeded("entity size"), 0));
                }
                let (text, _enc, _errors) = decode(&bytes, None);
                Rc::from(text.into_owned())
            }
        };
        *def.cached.borrow_mut() = Some(text.clone());
        Ok(text)
    }

    pub fn lookup_general<'d>(&self, dtd: &'d Dtd, name: Symbol) -> Option<&'d Rc<EntityDef>> {
        dtd.general_entities.get(&name)
    }

    pub fn lookup_parameter<'d>(&self, dtd: &'d Dtd, name: Symbol) -> Option<&'d Rc<EntityDef>> {
        dtd.parameter_entities.get(&name)
    }

    pub fn is_external(def: &EntityDef) -> bool {
        matches!(def.ty, EntityType::System | EntityType::Public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgml_dtd::{Dialect, EntityContentKind};
    use std::cell::RefCell;

    fn literal_entity(name: Symbol, value: &str) -> Rc<EntityDef> {
        Rc::new(EntityDef {
            name,
            ty: EntityType::Literal,
            content_kind: EntityContentKind::Cdata,
            value: EntityValue::Internal(value.to_string()),
            notation: None,
            catalog_location: sgml_dtd::CatalogLocation::Entity,
            cached: RefCell::new(None),
        })
    }

    #[test]
    fn internal_entity_resolves_without_catalogue() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let name = dtd.intern_entity_name("copy");
        let cat = NullCatalogue;
        let resolver = EntityResolver::new(&cat);
        let def = literal_entity(name, "replacement");
        let text = resolver.resolve(&dtd, &def).unwrap();
        assert_eq!(&*text, "replacement");
    }

    #[test]
    fn external_entity_fetched_once_and_cached() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let name = dtd.intern_entity_name("ext");
        let mut cat = MapCatalogue::new();
        cat.insert("file.sgml", b"hello".to_vec());
        let resolver = EntityResolver::new(&cat);
        let def = Rc::new(EntityDef {
            name,
            ty: EntityType::System,
            content_kind: EntityContentKind::Cdata,
            value: EntityValue::External {
                public_id: None,
                system_id: Some("file.sgml".to_string()),
                base_url: None,
            },
            notation: None,
            catalog_location: sgml_dtd::CatalogLocation::Entity,
            cached: RefCell::new(None),
        });
        let text1 = resolver.resolve(&dtd, &def).unwrap();
        assert_eq!(&*text1, "hello");
        assert!(def.cached.borrow().is_some());
        let text2 = resolver.resolve(&dtd, &def).unwrap();
        assert_eq!(&*text2, "hello");
    }

    #[test]
    fn unresolved_external_entity_is_an_error() {
        let mut dtd = Dtd::new(Dialect::Sgml);
        let name = dtd.intern_entity_name("ext");
        let cat = NullCatalogue;
        let resolver = EntityResolver::new(&cat);
        let def = Rc::new(EntityDef {
            name,
            ty: EntityType::System,
            content_kind: EntityContentKind::Cdata,
            value: EntityValue::External {
                public_id: None,
                system_id: Some("missing.sgml".to_string()),
                base_url: None,
            },
            notation: None,
            catalog_location: sgml_dtd::CatalogLocation::Entity,
            cached: RefCell::new(None),
        });
        assert!(resolver.resolve(&dtd, &def).is_err());
    }
}
