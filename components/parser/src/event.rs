//! Parse event callbacks (spec §6 "External interfaces").
//!
//! `EventSink` is the single capability a caller implements to receive
//! a parse. Every method has a default no-op body, so a consumer only
//! interested in element structure can ignore processing instructions
//! and comments for free -- mirrors the trait-with-defaults shape
//! `log::Log` uses for the same reason.

use crate::error::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeValue<'a> {
    CData(&'a str),
    Tokens(&'a [&'a str]),
}

#[derive(Clone, Copy, Debug)]
pub struct AttributeEvent<'a> {
    pub name: &'a str,
    pub value: AttributeValue<'a>,
    /// `true` when the value came from an attribute's default rather
    /// than being present in the start tag (spec §4.G).
    pub specified: bool,
}

pub trait EventSink {
    fn on_start_document(&mut self) {}

    fn on_end_document(&mut self) {}

    fn on_begin_element(&mut self, _name: &str, _attributes: &[AttributeEvent<'_>]) {}

    fn on_end_element(&mut self, _name: &str) {}

    fn on_data(&mut self, _text: &str) {}

    fn on_cdata(&mut self, _text: &str) {}

    fn on_processing_instruction(&mut self, _target: &str, _data: &str) {}

    fn on_comment(&mut self, _text: &str) {}

    fn on_entity_reference(&mut self, _name: &str) {}

    /// Called once per markup declaration applied from a DOCTYPE
    /// internal subset, with the declaration's body text verbatim
    /// (spec §6 "External interfaces", component H).
    fn on_decl(&mut self, _declaration_body: &str) {}

    fn on_error(&mut self, _error: &ParseError) {}
}

/// An [`EventSink`] that records nothing but the sequence of method
/// names invoked; used in tests to assert on event order without
/// hand-maintaining a full DOM.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct TraceSink {
    pub trace: Vec<String>,
    pub decls: Vec<String>,
}

#[cfg(test)]
impl EventSink for TraceSink {
    fn on_begin_element(&mut self, name: &str, _attributes: &[AttributeEvent<'_>]) {
        self.trace.push(format!("(+{}", name));
    }

    fn on_end_element(&mut self, name: &str) {
        self.trace.push(format!(")-{}", name));
    }

    fn on_data(&mut self, text: &str) {
        self.trace.push(format!("-{}", text));
    }

    fn on_entity_reference(&mut self, name: &str) {
        self.trace.push(format!("&{};", name));
    }

    fn on_error(&mut self, error: &ParseError) {
        self.trace.push(format!("!{}", error));
    }

    fn on_decl(&mut self, declaration_body: &str) {
        self.decls.push(declaration_body.to_string());
    }
}
