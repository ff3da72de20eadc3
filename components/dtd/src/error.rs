//! DTD-local error type.
//!
//! Shaped like `xrs-serde`'s `Error`: a boxed payload so `Result<T,
//! DtdError>` stays small on the stack, a `Reason` enum for the
//! `Display` message, and an `offset`/`length` span (no `io::Error`
//! variant -- this crate never touches a filesystem or socket, callers
//! hand it already-resolved bytes).

use std::fmt;

pub type DtdResult<T> = Result<T, DtdError>;

#[derive(Debug)]
pub struct DtdError(Box<DtdErrorImpl>);

#[derive(Debug)]
struct DtdErrorImpl {
    reason: Reason,
    offset: usize,
    length: usize,
}

#[derive(Debug)]
pub enum Reason {
    ExpectedKeyword(&'static str),
    ExpectedName,
    ExpectedWhitespace,
    ExpectedLiteral,
    ExpectedOneOf(&'static [&'static str]),
    UnexpectedEof,
    UnterminatedLiteral,
    UnterminatedGroup,
    UnknownParameterEntity(String),
    ParameterEntityExpansionOverflow,
    InconsistentConnector,
    DuplicateNameGroupMember(String),
    EmptyNameGroup,
    InvalidContentModel(String),
    InvalidAttributeType(String),
}

impl DtdError {
    pub fn new(reason: Reason, offset: usize, length: usize) -> Self {
        Self(Box::new(DtdErrorImpl {
            reason,
            offset,
            length,
        }))
    }

    pub fn at(reason: Reason, offset: usize) -> Self {
        Self::new(reason, offset, 0)
    }

    pub fn reason(&self) -> &Reason {
        &self.0.reason
    }

    pub fn offset(&self) -> usize {
        self.0.offset
    }

    pub fn length(&self) -> usize {
        self.0.length
    }
}

impl fmt::Display for DtdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.reason {
            Reason::ExpectedKeyword(kw) => write!(f, "expected keyword {:?}", kw),
            Reason::ExpectedName => write!(f, "expected a name"),
            Reason::ExpectedWhitespace => write!(f, "expected whitespace"),
            Reason::ExpectedLiteral => write!(f, "expected a quoted literal"),
            Reason::ExpectedOneOf(opts) => write!(f, "expected one of {:?}", opts),
            Reason::UnexpectedEof => write!(f, "unexpected end of declaration"),
            Reason::UnterminatedLiteral => write!(f, "unterminated quoted literal"),
            Reason::UnterminatedGroup => write!(f, "unterminated group, missing ')'"),
            Reason::UnknownParameterEntity(name) => {
                write!(f, "parameter entity %{}; is not defined", name)
            }
            Reason::ParameterEntityExpansionOverflow => {
                write!(f, "parameter entity expansion exceeded the maximum buffer length")
            }
            Reason::InconsistentConnector => {
                write!(f, "a content model group mixes ',' , '|' and '&' connectors")
            }
            Reason::DuplicateNameGroupMember(name) => {
                write!(f, "name {:?} repeated in a name group", name)
            }
            Reason::EmptyNameGroup => write!(f, "name group has no members"),
            Reason::InvalidContentModel(msg) => write!(f, "invalid content model: {}", msg),
            Reason::InvalidAttributeType(msg) => write!(f, "invalid attribute type: {}", msg),
        }
    }
}

impl std::error::Error for DtdError {}
