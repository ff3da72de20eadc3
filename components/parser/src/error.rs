//! Parser-level error/diagnostic type (component §4.G/§7).
//!
//! Shaped like [`sgml_dtd::DtdError`]: a boxed payload, an `ErrorKind`
//! for the message, a byte offset, and a [`Severity`] so a caller can
//! tell a recoverable style warning from a fatal error without
//! matching on the kind. `Location` records the entity-boundary stack
//! active when the error was raised (spec §4.I "location stack"),
//! since a single flat offset is meaningless once parameter- or
//! general-entity expansion is in play.

use std::fmt;

use sgml_dtd::DtdError;

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// A style/conformance nit; parsing continues with a reasonable
    /// default (spec §7 "warnings never abort the parse").
    Warning,
    /// The construct could not be interpreted; parsing continues by
    /// skipping to a resynchronization point, but the output is not
    /// guaranteed complete from here on.
    Error,
    /// Parsing cannot continue at all (unexpected EOF mid-construct,
    /// resource limits exhausted).
    Fatal,
}

#[derive(Debug)]
pub enum ErrorKind {
    Dtd(DtdError),
    UnknownEntity(String),
    UnknownElement(String),
    UndefinedElementUsedInContent(String),
    ElementNotAllowedHere { element: String, parent: String },
    ExcludedElement { element: String, parent: String },
    DataNotAllowedInEmptyElement(String),
    MissingRequiredAttribute { element: String, attribute: String },
    UnknownAttribute { element: String, attribute: String },
    InvalidAttributeValue { attribute: String, reason: String },
    UnclosedElement(String),
    MismatchedEndTag { expected: String, found: String },
    EndTagForUnopenedElement(String),
    OmittedStartTagNotInferable(String),
    NoRootElement,
    UnexpectedEof,
    MalformedMarkup(String),
    EntityRecursion(String),
    CharsetDecodingError(String),
    ResourceLimitExceeded(&'static str),
    ExternalEntityUnresolved(String),
}

#[derive(Debug)]
pub struct ParseError(Box<ParseErrorImpl>);

#[derive(Debug)]
struct ParseErrorImpl {
    kind: ErrorKind,
    severity: Severity,
    offset: usize,
    location: Vec<String>,
}

impl ParseError {
    pub fn new(kind: ErrorKind, severity: Severity, offset: usize) -> Self {
        Self(Box::new(ParseErrorImpl {
            kind,
            severity,
            offset,
            location: Vec::new(),
        }))
    }

    pub fn fatal(kind: ErrorKind, offset: usize) -> Self {
        Self::new(kind, Severity::Fatal, offset)
    }

    pub fn error(kind: ErrorKind, offset: usize) -> Self {
        Self::new(kind, Severity::Error, offset)
    }

    pub fn warning(kind: ErrorKind, offset: usize) -> Self {
        Self::new(kind, Severity::Warning, offset)
    }

    /// Pushes an entity name onto the location stack, innermost first
    /// (spec §4.I: errors report the full chain of entity expansions
    /// that led to the offending byte).
    pub fn with_location(mut self, entity_name: impl Into<String>) -> Self {
        self.0.location.push(entity_name.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    pub fn severity(&self) -> Severity {
        self.0.severity
    }

    pub fn offset(&self) -> usize {
        self.0.offset
    }

    pub fn location(&self) -> &[String] {
        &self.0.location
    }
}

impl From<DtdError> for ParseError {
    fn from(err: DtdError) -> Self {
        let offset = err.offset();
        ParseError::error(ErrorKind::Dtd(err), offset)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at offset {}: ", self.0.offset)?;
        match &self.0.kind {
            ErrorKind::Dtd(e) => write!(f, "{}", e),
            ErrorKind::UnknownEntity(name) => write!(f, "entity {:?} is not defined", name),
            ErrorKind::UnknownElement(name) => write!(f, "element {:?} is not declared", name),
            ErrorKind::UndefinedElementUsedInContent(name) => {
                write!(f, "element {:?} appears in a content model but is never declared", name)
            }
            ErrorKind::ElementNotAllowedHere { element, parent } => {
                write!(f, "element {:?} is not allowed as content of {:?}", element, parent)
            }
            ErrorKind::ExcludedElement { element, parent } => {
                write!(f, "element {:?} is excluded from the content of {:?}", element, parent)
            }
            ErrorKind::DataNotAllowedInEmptyElement(name) => {
                write!(f, "element {:?} declares EMPTY content and cannot contain character data", name)
            }
            ErrorKind::MissingRequiredAttribute { element, attribute } => {
                write!(f, "element {:?} is missing required attribute {:?}", element, attribute)
            }
            ErrorKind::UnknownAttribute { element, attribute } => {
                write!(f, "element {:?} has no attribute {:?}", element, attribute)
            }
            ErrorKind::InvalidAttributeValue { attribute, reason } => {
                write!(f, "attribute {:?} has an invalid value: {}", attribute, reason)
            }
            ErrorKind::UnclosedElement(name) => write!(f, "element {:?} was never closed", name),
            ErrorKind::MismatchedEndTag { expected, found } => {
                write!(f, "expected end tag for {:?}, found {:?}", expected, found)
            }
            ErrorKind::EndTagForUnopenedElement(name) => write!(f, "end tag for {:?}, which is not open", name),
            ErrorKind::OmittedStartTagNotInferable(name) => {
                write!(f, "no omitted start tag path leads to element {:?}", name)
            }
            ErrorKind::NoRootElement => write!(f, "document has no root element"),
            ErrorKind::UnexpectedEof => write!(f, "unexpected end of input"),
            ErrorKind::MalformedMarkup(msg) => write!(f, "malformed markup: {}", msg),
            ErrorKind::EntityRecursion(name) => write!(f, "entity {:?} refers to itself", name),
            ErrorKind::CharsetDecodingError(msg) => write!(f, "could not decode input: {}", msg),
            ErrorKind::ResourceLimitExceeded(which) => write!(f, "resource limit exceeded: {}", which),
            ErrorKind::ExternalEntityUnresolved(name) => write!(f, "could not resolve external entity {:?}", name),
        }?;
        for entity in &self.0.location {
            write!(f, "\n  in entity {:?}", entity)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_stack_renders_innermost_first() {
        let err = ParseError::error(ErrorKind::UnknownEntity("foo".into()), 12)
            .with_location("inner")
            .with_location("outer");
        let msg = format!("{}", err);
        let inner_pos = msg.find("inner").unwrap();
        let outer_pos = msg.find("outer").unwrap();
        assert!(inner_pos < outer_pos);
    }

    #[test]
    fn dtd_error_converts_with_offset_preserved() {
        let dtd_err = DtdError::at(sgml_dtd::Reason::ExpectedName, 7);
        let parse_err: ParseError = dtd_err.into();
        assert_eq!(parse_err.offset(), 7);
        assert_eq!(parse_err.severity(), Severity::Error);
    }
}
