//! Element stack and content validator (component G, spec §4.G).
//!
//! Each open element owns an [`sgml_dtd::FsmState`] tracking how much
//! of its content model has been satisfied so far, plus the space
//! mode inherited or declared for it. Closing an element checks the
//! state is final; opening a child probes the parent's automaton
//! before the caller even considers an omitted-start-tag chain.

use std::rc::Rc;

use sgml_dtd::{ContentKind, ContentToken, Dtd, ElementStructure, Fsm, FsmState, ShortrefMap, SpaceMode, Symbol};

use crate::error::{ErrorKind, ParseError};

/// One open element's live validation state.
pub struct Environment {
    pub name: Symbol,
    content_state: Option<FsmState>,
    pub space_preserve: bool,
    pub any_content: bool,
    pub cdata_like: bool,
    empty_content: bool,
    /// Exception lists declared on this element's own content model
    /// (spec §4.F INCLUDED/EXCLUDED), consulted when a child is pushed
    /// onto it.
    included: Vec<Symbol>,
    excluded: Vec<Symbol>,
    /// Shortref map active for this element's content, if any (spec
    /// §4.H, bound by `<!USEMAP>` via `Element::shortref_map`).
    pub shortref_map: Option<Rc<ShortrefMap>>,
}

impl Environment {
    fn new(
        name: Symbol,
        structure: Option<&ElementStructure>,
        space_preserve: bool,
        included: Vec<Symbol>,
        excluded: Vec<Symbol>,
        shortref_map: Option<Rc<ShortrefMap>>,
    ) -> Self {
        let (content_state, any_content, cdata_like, empty_content) = match structure.map(|s| &s.content) {
            Some(ContentKind::Model(_)) => (
                structure.and_then(|s| s.fsm.as_ref()).map(Fsm::initial_state),
                false,
                false,
                false,
            ),
            Some(ContentKind::Any) => (None, true, false, false),
            Some(ContentKind::Cdata) | Some(ContentKind::Rcdata) => (None, false, true, false),
            Some(ContentKind::Empty) => (None, false, false, true),
            None => (None, true, false, false),
        };
        Self {
            name,
            content_state,
            space_preserve,
            any_content,
            cdata_like,
            empty_content,
            included,
            excluded,
            shortref_map,
        }
    }
}

/// The live pushdown stack of open elements (spec §3 "Element stack").
pub struct ElementStack {
    stack: Vec<Environment>,
    default_space_preserve: bool,
}

impl ElementStack {
    pub fn new(default_space_preserve: bool) -> Self {
        Self {
            stack: Vec::new(),
            default_space_preserve,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> Option<&Environment> {
        self.stack.last()
    }

    pub fn names(&self) -> Vec<Symbol> {
        self.stack.iter().map(|e| e.name).collect()
    }

    /// Pushes a new open element after checking it is a valid child of
    /// the current top (spec §4.G invariant: "a child is only
    /// accepted if the parent's automaton transitions on it"). Callers
    /// that already resolved an omitted-start-tag chain call this once
    /// per element on that chain, including `name` itself.
    pub fn push(&mut self, dtd: &Dtd, name: Symbol, offset: usize) -> Result<(), ParseError> {
        let mut included_here = false;
        if let Some(top) = self.stack.last() {
            let excluded = top.excluded.contains(&name);
            let included = top.included.contains(&name);
            if excluded && !included {
                return Err(ParseError::error(
                    ErrorKind::ExcludedElement {
                        element: dtd.names.name(name).to_string(),
                        parent: dtd.names.name(top.name).to_string(),
                    },
                    offset,
                ));
            }
            included_here = included;
            if !included && !top.any_content {
                if let Some(rejected) = self.probe_rejects(dtd, top.name, &top.content_state, name) {
                    if rejected {
                        return Err(ParseError::error(
                            ErrorKind::ElementNotAllowedHere {
                                element: dtd.names.name(name).to_string(),
                                parent: dtd.names.name(top.name).to_string(),
                            },
                            offset,
                        ));
                    }
                }
            }
        }

        // An INCLUDED child is accepted unconditionally and does not
        // advance the parent's content-model automaton (spec §4.F).
        if !included_here {
            self.advance_parent(dtd, name);
        }

        let element = dtd.element(name);
        let structure_rc = element.and_then(|e| e.structure.as_ref());
        let borrowed = structure_rc.map(|s| s.borrow());
        let space_preserve = element
            .and_then(|e| e.space_mode)
            .map(|mode| matches!(mode, SpaceMode::Preserve))
            .unwrap_or(self.default_space_preserve);
        let (included, excluded) = borrowed
            .as_deref()
            .map(|s| (s.included.clone(), s.excluded.clone()))
            .unwrap_or_default();
        let shortref_map = element
            .and_then(|e| e.shortref_map)
            .and_then(|sym| dtd.shortref_maps.get(&sym).cloned());

        self.stack.push(Environment::new(
            name,
            borrowed.as_deref(),
            space_preserve,
            included,
            excluded,
            shortref_map,
        ));
        Ok(())
    }

    /// `None` when the parent has no compiled automaton to probe
    /// (`ANY`/undeclared content); `Some(true)` when the token would be
    /// rejected.
    fn probe_rejects(&self, dtd: &Dtd, parent: Symbol, state: &Option<FsmState>, child: Symbol) -> Option<bool> {
        let structure = dtd.element(parent)?.structure.as_ref()?;
        let structure = structure.borrow();
        let fsm = structure.fsm.as_ref()?;
        let state = state.as_ref()?;
        Some(fsm.transition(state, ContentToken::Element(child)).is_none())
    }

    fn advance_parent(&mut self, dtd: &Dtd, child: Symbol) {
        if let Some(top) = self.stack.last_mut() {
            if let Some(structure) = dtd.element(top.name).and_then(|e| e.structure.as_ref()) {
                let structure = structure.borrow();
                if let Some(fsm) = &structure.fsm {
                    if let Some(state) = top.content_state.take() {
                        top.content_state = fsm.transition(&state, ContentToken::Element(child));
                    }
                }
            }
        }
    }

    /// Feeds character data to the top element's automaton (spec
    /// §4.G). Elements with `ANY` content or declared (CDATA/RCDATA)
    /// content accept data unconditionally. `Err` means the top
    /// element declares `EMPTY` content, which may never contain
    /// character data (spec §8 EMPTY invariant); the caller reports
    /// this rather than silently forwarding the data.
    pub fn accept_data(&mut self, dtd: &Dtd) -> Result<(), ()> {
        if let Some(top) = self.stack.last_mut() {
            if top.empty_content {
                return Err(());
            }
            if top.any_content || top.cdata_like {
                return Ok(());
            }
            if let Some(structure) = dtd.element(top.name).and_then(|e| e.structure.as_ref()) {
                let structure = structure.borrow();
                if let Some(fsm) = &structure.fsm {
                    if let Some(state) = top.content_state.take() {
                        top.content_state = fsm.transition(&state, ContentToken::Pcdata);
                    }
                }
            }
        }
        Ok(())
    }

    /// Pops the top element, checking its content model is in a final
    /// state (spec invariant: "an element may only close when its
    /// content model is satisfied").
    pub fn pop(&mut self, dtd: &Dtd, name: Symbol, offset: usize) -> Result<(), ParseError> {
        match self.stack.last() {
            None => {
                return Err(ParseError::error(
                    ErrorKind::EndTagForUnopenedElement(dtd.names.name(name).to_string()),
                    offset,
                ))
            }
            Some(top) if top.name != name => {
                return Err(ParseError::error(
                    ErrorKind::MismatchedEndTag {
                        expected: dtd.names.name(top.name).to_string(),
                        found: dtd.names.name(name).to_string(),
                    },
                    offset,
                ))
            }
            _ => {}
        }
        let top = self.stack.pop().unwrap();
        if let Some(structure) = dtd.element(top.name).and_then(|e| e.structure.as_ref()) {
            let structure = structure.borrow();
            if let (Some(fsm), Some(state)) = (&structure.fsm, &top.content_state) {
                if !fsm.final_state(state) {
                    return Err(ParseError::error(
                        ErrorKind::UnclosedElement(dtd.names.name(top.name).to_string()),
                        offset,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Finds the shortest chain of omittable start tags, if any, that
    /// would make `target` acceptable as a child of the current top
    /// element (spec §9 "find_omitted_path", default depth bound 6).
    pub fn find_omitted_path(&self, dtd: &Dtd, target: Symbol) -> Option<Vec<Symbol>> {
        let top = self.stack.last()?.name;
        sgml_dtd::content_model::find_omitted_path(top, target, 6, |from| {
            let mut out = Vec::new();
            if let Some(structure) = dtd.element(from).and_then(|e| e.structure.as_ref()) {
                let structure = structure.borrow();
                if let ContentKind::Model(model) = &structure.content {
                    collect_leading_elements(&model.root, &mut out);
                }
            }
            out.retain(|&sym| {
                dtd.element(sym)
                    .and_then(|e| e.structure.as_ref())
                    .map(|s| s.borrow().omit_open)
                    .unwrap_or(false)
            });
            out
        })
    }
}

fn collect_leading_elements(particle: &sgml_dtd::ContentParticle, out: &mut Vec<Symbol>) {
    use sgml_dtd::{ContentParticle, GroupKind, ModelLeaf};
    match particle {
        ContentParticle::Leaf(ModelLeaf::Element(sym), _) => out.push(*sym),
        ContentParticle::Leaf(ModelLeaf::Pcdata, _) => {}
        ContentParticle::Group(GroupKind::Seq, members, _) => {
            if let Some(first) = members.first() {
                collect_leading_elements(first, out);
            }
        }
        ContentParticle::Group(_, members, _) => {
            for m in members {
                collect_leading_elements(m, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn push_and_pop_balanced_empty_elements() {
        let dtd = dtd_with(&[("ELEMENT", "br - O EMPTY")]);
        let mut stack = ElementStack::new(false);
        let br = dtd.names.get("br").unwrap();
        stack.push(&dtd, br, 0).unwrap();
        assert_eq!(stack.depth(), 1);
        stack.pop(&dtd, br, 10).unwrap();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn end_tag_for_unopened_element_errors() {
        let dtd = dtd_with(&[("ELEMENT", "br - O EMPTY")]);
        let mut stack = ElementStack::new(false);
        let br = dtd.names.get("br").unwrap();
        assert!(stack.pop(&dtd, br, 0).is_err());
    }

    #[test]
    fn mismatched_end_tag_errors() {
        let dtd = dtd_with(&[("ELEMENT", "a - - EMPTY"), ("ELEMENT", "b - - EMPTY")]);
        let mut stack = ElementStack::new(false);
        let a = dtd.names.get("a").unwrap();
        let b = dtd.names.get("b").unwrap();
        stack.push(&dtd, a, 0).unwrap();
        assert!(stack.pop(&dtd, b, 5).is_err());
    }

    #[test]
    fn sequence_model_rejects_out_of_order_child() {
        let dtd = dtd_with(&[
            ("ELEMENT", "doc - - (a, b)"),
            ("ELEMENT", "a - - EMPTY"),
            ("ELEMENT", "b - - EMPTY"),
        ]);
        let mut stack = ElementStack::new(false);
        let doc = dtd.names.get("doc").unwrap();
        let a = dtd.names.get("a").unwrap();
        let b = dtd.names.get("b").unwrap();
        stack.push(&dtd, doc, 0).unwrap();
        assert!(stack.push(&dtd, b, 1).is_err());
        stack.push(&dtd, a, 2).unwrap();
        stack.pop(&dtd, a, 3).unwrap();
        stack.push(&dtd, b, 4).unwrap();
        stack.pop(&dtd, b, 5).unwrap();
        stack.pop(&dtd, doc, 6).unwrap();
    }

    #[test]
    fn unclosed_required_child_rejects_pop() {
        let dtd = dtd_with(&[("ELEMENT", "doc - - (a, b)"), ("ELEMENT", "a - - EMPTY"), ("ELEMENT", "b - - EMPTY")]);
        let mut stack = ElementStack::new(false);
        let doc = dtd.names.get("doc").unwrap();
        let a = dtd.names.get("a").unwrap();
        stack.push(&dtd, doc, 0).unwrap();
        stack.push(&dtd, a, 1).unwrap();
        stack.pop(&dtd, a, 2).unwrap();
        assert!(stack.pop(&dtd, doc, 3).is_err());
    }

    #[test]
    fn excluded_element_is_rejected_even_where_the_model_allows_it() {
        let dtd = dtd_with(&[
            ("ELEMENT", "doc - - (footnote)* -(footnote)"),
            ("ELEMENT", "footnote - - (#PCDATA)*"),
        ]);
        let mut stack = ElementStack::new(false);
        let doc = dtd.names.get("doc").unwrap();
        let footnote = dtd.names.get("footnote").unwrap();
        stack.push(&dtd, doc, 0).unwrap();
        assert!(matches!(
            stack.push(&dtd, footnote, 1).unwrap_err().kind(),
            ErrorKind::ExcludedElement { .. }
        ));
    }

    #[test]
    fn included_element_bypasses_the_content_model() {
        let dtd = dtd_with(&[
            ("ELEMENT", "doc - - (a) +(aside)"),
            ("ELEMENT", "a - - EMPTY"),
            ("ELEMENT", "aside - - (#PCDATA)*"),
        ]);
        let mut stack = ElementStack::new(false);
        let doc = dtd.names.get("doc").unwrap();
        let aside = dtd.names.get("aside").unwrap();
        let a = dtd.names.get("a").unwrap();
        stack.push(&dtd, doc, 0).unwrap();
        // `aside` is not in the model at all, but is declared INCLUDED.
        stack.push(&dtd, aside, 1).unwrap();
        stack.pop(&dtd, aside, 2).unwrap();
        stack.push(&dtd, a, 3).unwrap();
        stack.pop(&dtd, a, 4).unwrap();
        stack.pop(&dtd, doc, 5).unwrap();
    }

    #[test]
    fn empty_content_rejects_character_data() {
        let dtd = dtd_with(&[("ELEMENT", "br - O EMPTY")]);
        let mut stack = ElementStack::new(false);
        let br = dtd.names.get("br").unwrap();
        stack.push(&dtd, br, 0).unwrap();
        assert!(stack.accept_data(&dtd).is_err());
    }
}
