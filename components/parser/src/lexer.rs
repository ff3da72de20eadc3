//! Lexer state machine (component F, spec §4.F).
//!
//! Scans a fully-buffered document (or entity replacement text) into a
//! flat token stream. The state names below track the reference
//! scanner's terminal states closely enough to keep the mapping
//! legible (`Cdata`/`Rcdata`/`Pcdata`, `Comment`, `Decl`, `Pi`,
//! `MarkedSection`) but collapse its many numbered sub-states
//! (`CMTE0`/`CMTE1`, `EMSC1`/`EMSC2`, ...) into straight-line scanning
//! functions -- a buffered `&str` doesn't need a resumable state per
//! partially-matched delimiter the way a byte-at-a-time stream does.

use memchr::memchr;
use sgml_chars::CharFunctions;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LexState {
    Pcdata,
    Cdata,
    Rcdata,
    Comment,
    Decl,
    Pi,
    MarkedSection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    Data(&'a str),
    StartTag { name: &'a str, attrs: &'a str, self_closed: bool },
    EndTag { name: &'a str },
    Comment(&'a str),
    ProcessingInstruction(&'a str),
    Declaration { keyword: &'a str, body: &'a str },
    MarkedSectionStart(&'a str),
    MarkedSectionEnd,
    EntityReference(&'a str),
    CharReference(u32),
    Eof,
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    funcs: CharFunctions,
    state: LexState,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, funcs: CharFunctions) -> Self {
        Self {
            input,
            pos: 0,
            funcs,
            state: LexState::Pcdata,
        }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn state(&self) -> LexState {
        self.state
    }

    pub fn set_state(&mut self, state: LexState) {
        self.state = state;
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Produces the next token given the lexer's current mode. CDATA
    /// and RCDATA elements are scanned for their literal closing tag
    /// (`</name`, case-folded) rather than general markup, per spec
    /// §11's "declared-content scanning" supplement.
    pub fn next_token(&mut self, closing_name: Option<&str>) -> Token<'a> {
        if self.pos >= self.input.len() {
            return Token::Eof;
        }
        match self.state {
            LexState::Cdata | LexState::Rcdata => self.scan_declared_content(closing_name.unwrap_or("")),
            _ => self.scan_markup_or_data(),
        }
    }

    fn scan_declared_content(&mut self, closing_name: &str) -> Token<'a> {
        let stago = self.funcs.stago as char;
        let etago2 = self.funcs.etago2 as char;
        let close = format!("{}{}{}", stago, etago2, closing_name);
        let rest = self.rest();
        match find_case_insensitive(rest, &close) {
            Some(idx) => {
                let data = &rest[..idx];
                self.pos += idx;
                if data.is_empty() {
                    // caller re-enters scan_markup_or_data for the tag itself
                    self.state = LexState::Pcdata;
                    self.scan_markup_or_data()
                } else {
                    Token::Data(data)
                }
            }
            None => {
                let data = rest;
                self.pos = self.input.len();
                Token::Data(data)
            }
        }
    }

    fn scan_markup_or_data(&mut self) -> Token<'a> {
        let stago = self.funcs.stago;
        let ero = self.funcs.ero;
        let rest = self.rest();
        let bytes = rest.as_bytes();
        if bytes[0] != stago && bytes[0] != ero {
            let next_markup = bytes
                .iter()
                .position(|&b| b == stago || b == ero)
                .unwrap_or(bytes.len());
            let data = &rest[..next_markup];
            self.pos += next_markup;
            return Token::Data(data);
        }
        if bytes[0] == ero {
            return self.scan_entity_reference();
        }
        self.scan_markup()
    }

    fn scan_entity_reference(&mut self) -> Token<'a> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        if bytes.get(1) == Some(&b'#') {
            let digits_start = if bytes.get(2) == Some(&b'x') || bytes.get(2) == Some(&b'X') { 3 } else { 2 };
            let hex = digits_start == 3;
            let end = bytes[digits_start..]
                .iter()
                .position(|&b| b == self.funcs.erc)
                .map(|p| digits_start + p)
                .unwrap_or(bytes.len());
            let digits = &rest[digits_start..end];
            let value = if hex {
                u32::from_str_radix(digits, 16).unwrap_or(0)
            } else {
                digits.parse::<u32>().unwrap_or(0)
            };
            let consumed = if end < bytes.len() { end + 1 } else { end };
            self.advance_rest(consumed);
            return Token::CharReference(value);
        }
        let name_end = bytes
            .iter()
            .position(|&b| b == self.funcs.erc || b.is_ascii_whitespace())
            .unwrap_or(bytes.len() - 1)
            .max(1);
        let name = &rest[1..name_end];
        let consumed = if bytes.get(name_end) == Some(&self.funcs.erc) {
            name_end + 1
        } else {
            name_end
        };
        self.advance_rest(consumed);
        Token::EntityReference(name)
    }

    fn advance_rest(&mut self, consumed: usize) {
        self.pos += consumed;
    }

    fn scan_markup(&mut self) -> Token<'a> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        debug_assert_eq!(bytes[0], self.funcs.stago);
        match bytes.get(1) {
            Some(&b) if b == self.funcs.mdo => self.scan_declaration_or_comment(),
            Some(&b) if b == self.funcs.etago2 => self.scan_end_tag(),
            Some(&b) if b == self.funcs.pro2 => self.scan_pi(),
            _ => self.scan_start_tag(),
        }
    }

    fn scan_declaration_or_comment(&mut self) -> Token<'a> {
        let rest = self.rest();
        if rest.as_bytes().get(2) == Some(&self.funcs.cmt) && rest.as_bytes().get(3) == Some(&self.funcs.cmt) {
            return self.scan_comment();
        }
        if rest.as_bytes().get(2) == Some(&self.funcs.dso) {
            return self.scan_marked_section();
        }
        self.scan_declaration()
    }

    fn scan_comment(&mut self) -> Token<'a> {
        let rest = self.rest();
        match rest[4..].find("--") {
            Some(idx) => {
                let text = &rest[4..4 + idx];
                let mut end = 4 + idx + 2;
                if rest.as_bytes().get(end) == Some(&self.funcs.mdc) {
                    end += 1;
                }
                self.pos += end;
                Token::Comment(text)
            }
            None => {
                self.pos = self.input.len();
                Token::Comment(&rest[4..])
            }
        }
    }

    fn scan_marked_section(&mut self) -> Token<'a> {
        let rest = self.rest();
        let body_start = 3;
        let keyword_end = rest[body_start..]
            .find(|c: char| c.is_whitespace() || c == self.funcs.dso as char)
            .map(|p| body_start + p)
            .unwrap_or(rest.len());
        let keyword = rest[body_start..keyword_end].trim();
        let after_dso = rest[keyword_end..].find(self.funcs.dso as char).map(|p| keyword_end + p + 1).unwrap_or(rest.len());
        self.pos += after_dso;
        Token::MarkedSectionStart(keyword)
    }

    /// Skips an `IGNORE` marked section's content up to and past its
    /// closing `]]>`, treating any nested marked-section delimiters as
    /// plain text -- SGML's "IGNORE wins at any depth" rule (spec §4.F).
    pub fn skip_ignored_section(&mut self) {
        let rest = self.rest();
        let term = format!("{}{}{}", self.funcs.dsc as char, self.funcs.dsc as char, self.funcs.mdc as char);
        match rest.find(term.as_str()) {
            Some(idx) => self.pos += idx + term.len(),
            None => self.pos = self.input.len(),
        }
    }

    /// Consumes a `]]>` marked-section terminator from the current
    /// position, if present.
    pub fn try_end_marked_section(&mut self) -> bool {
        let rest = self.rest();
        let term = format!("{}{}{}", self.funcs.dsc as char, self.funcs.dsc as char, self.funcs.mdc as char);
        if rest.starts_with(term.as_str()) {
            self.pos += term.len();
            true
        } else {
            false
        }
    }

    fn scan_declaration(&mut self) -> Token<'a> {
        let rest = self.rest();
        let body_start = 2;
        let kw_end = rest[body_start..]
            .find(|c: char| c.is_whitespace())
            .map(|p| body_start + p)
            .unwrap_or(rest.len());
        let keyword = &rest[body_start..kw_end];
        let mdc = self.funcs.mdc as char;
        let lit = self.funcs.lit as char;
        let lita = self.funcs.lita as char;
        let mut depth_end = kw_end;
        let mut in_literal: Option<char> = None;
        let chars: Vec<(usize, char)> = rest[kw_end..].char_indices().collect();
        let mut i = 0;
        while i < chars.len() {
            let (off, ch) = chars[i];
            if let Some(q) = in_literal {
                if ch == q {
                    in_literal = None;
                }
            } else if ch == lit || ch == lita {
                in_literal = Some(ch);
            } else if ch == mdc {
                depth_end = kw_end + off;
                i += 1;
                break;
            }
            i += 1;
        }
        let body = rest[kw_end..depth_end].trim();
        self.pos += depth_end + 1;
        Token::Declaration { keyword, body }
    }

    fn scan_pi(&mut self) -> Token<'a> {
        let rest = self.rest();
        match find_byte(&rest.as_bytes()[2..], self.funcs.prc) {
            Some(idx) => {
                let data = &rest[2..2 + idx];
                self.pos += 2 + idx + 1;
                Token::ProcessingInstruction(data)
            }
            None => {
                self.pos = self.input.len();
                Token::ProcessingInstruction(&rest[2..])
            }
        }
    }

    fn scan_end_tag(&mut self) -> Token<'a> {
        let rest = self.rest();
        let name_start = 2;
        let name_end = rest[name_start..]
            .find(|c: char| c.is_whitespace() || c as u8 == self.funcs.stagc)
            .map(|p| name_start + p)
            .unwrap_or(rest.len());
        let name = &rest[name_start..name_end];
        let close = rest[name_end..].find(self.funcs.stagc as char).map(|p| name_end + p + 1).unwrap_or(rest.len());
        self.pos += close;
        Token::EndTag { name }
    }

    fn scan_start_tag(&mut self) -> Token<'a> {
        let rest = self.rest();
        let name_start = 1;
        let bytes = rest.as_bytes();
        let name_end = bytes[name_start..]
            .iter()
            .position(|&b| b.is_ascii_whitespace() || b == self.funcs.stagc || b == self.funcs.etago2)
            .map(|p| name_start + p)
            .unwrap_or(bytes.len());
        let name = &rest[name_start..name_end];
        let stagc_pos = find_byte(&bytes[name_end..], self.funcs.stagc).map(|p| name_end + p).unwrap_or(bytes.len());
        let self_closed = stagc_pos > 0 && bytes.get(stagc_pos - 1) == Some(&self.funcs.etago2);
        let attrs_end = if self_closed { stagc_pos - 1 } else { stagc_pos };
        let attrs = &rest[name_end..attrs_end];
        self.pos += (stagc_pos + 1).min(bytes.len());
        Token::StartTag { name, attrs, self_closed }
    }
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    memchr(needle, haystack)
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let hay_bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.len() > hay_bytes.len() {
        return None;
    }
    (0..=hay_bytes.len() - needle_bytes.len()).find(|&i| hay_bytes[i..i + needle_bytes.len()].eq_ignore_ascii_case(needle_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token<'_>> {
        let mut lexer = Lexer::new(input, CharFunctions::default());
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token(None);
            if tok == Token::Eof {
                break;
            }
            out.push(tok);
        }
        out
    }

    #[test]
    fn scans_data_and_start_end_tags() {
        let toks = lex("<p>hi</p>");
        assert_eq!(
            toks,
            vec![
                Token::StartTag { name: "p", attrs: "", self_closed: false },
                Token::Data("hi"),
                Token::EndTag { name: "p" },
            ]
        );
    }

    #[test]
    fn scans_self_closed_tag() {
        let toks = lex("<br/>");
        assert_eq!(toks, vec![Token::StartTag { name: "br", attrs: "", self_closed: true }]);
    }

    #[test]
    fn scans_comment() {
        let toks = lex("<!--hello-->");
        assert_eq!(toks, vec![Token::Comment("hello")]);
    }

    #[test]
    fn scans_processing_instruction() {
        let toks = lex("<?target data?>");
        assert_eq!(toks, vec![Token::ProcessingInstruction("target data")]);
    }

    #[test]
    fn scans_declaration_with_literal_containing_mdc() {
        let toks = lex("<!ENTITY foo \"a > b\">");
        assert_eq!(
            toks,
            vec![Token::Declaration { keyword: "ENTITY", body: "foo \"a > b\"" }]
        );
    }

    #[test]
    fn scans_numeric_and_named_entity_references() {
        let toks = lex("&amp;&#65;");
        assert_eq!(toks, vec![Token::EntityReference("amp"), Token::CharReference(65)]);
    }

    #[test]
    fn scans_cdata_content_up_to_matching_close_tag() {
        let mut lexer = Lexer::new("raw <br> text</SCRIPT>", CharFunctions::default());
        lexer.set_state(LexState::Cdata);
        let tok = lexer.next_token(Some("script"));
        assert_eq!(tok, Token::Data("raw <br> text"));
    }
}
