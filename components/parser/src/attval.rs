//! Attribute value scanning and normalization (component §4.G).
//!
//! Handles the three shapes a start tag's attribute specification list
//! can take: `name=value`, a bare value matched against the element's
//! `NameOf`/`Notation` token lists (shorttag value-shorthand), and a
//! bare name standing for `name=name` (minimization, e.g. `<OPT
//! SELECTED>`). Shorthand resolution picks the first attribute (in
//! declaration order) whose type accepts the bare token, per spec §9
//! open question (b).

use sgml_chars::CharClasses;
use sgml_dtd::{AttDef, AttList, AttType};

use crate::cow::CowStrBuilder;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: Option<String>,
    pub value: String,
    pub quoted: bool,
}

/// Splits a start tag's attribute specification list into raw
/// `name`/`value` pairs, without yet consulting the DTD (that happens
/// in [`resolve_shorthand`]). `input` is the bytes between the
/// element's name and the closing `>` or `/` of the tag.
pub fn scan_attribute_specs(input: &str, classes: &CharClasses) -> Vec<RawAttribute> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut out = Vec::new();
    loop {
        while pos < bytes.len() && classes.is_white(bytes[pos]) {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        let name_or_value_start = pos;
        if classes.is_name_start(bytes[pos]) {
            while pos < bytes.len() && classes.is_name(bytes[pos]) {
                pos += 1;
            }
            let token = &input[name_or_value_start..pos];
            let mut scan = pos;
            while scan < bytes.len() && classes.is_white(bytes[scan]) {
                scan += 1;
            }
            if scan < bytes.len() && bytes[scan] == b'=' {
                scan += 1;
                while scan < bytes.len() && classes.is_white(bytes[scan]) {
                    scan += 1;
                }
                let (value, quoted, next) = scan_value(input, scan);
                out.push(RawAttribute {
                    name: Some(token.to_string()),
                    value,
                    quoted,
                });
                pos = next;
                continue;
            }
            // bare name: minimization shorthand `name` -> `name=name`
            out.push(RawAttribute {
                name: None,
                value: token.to_string(),
                quoted: false,
            });
            continue;
        }
        let (value, quoted, next) = scan_value(input, pos);
        out.push(RawAttribute {
            name: None,
            value,
            quoted,
        });
        pos = next;
    }
    out
}

fn scan_value(input: &str, start: usize) -> (String, bool, usize) {
    let bytes = input.as_bytes();
    match bytes.get(start) {
        Some(b'"') | Some(b'\'') => {
            let quote = bytes[start];
            let mut end = start + 1;
            while end < bytes.len() && bytes[end] != quote {
                end += 1;
            }
            let value = input[start + 1..end].to_string();
            (value, true, (end + 1).min(bytes.len()))
        }
        _ => {
            let mut end = start;
            while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
                end += 1;
            }
            (input[start..end].to_string(), false, end)
        }
    }
}

/// Resolves a [`RawAttribute`] with `name: None` (either a value
/// shorthand or a minimized bare name) against an element's attribute
/// list. Returns the attribute name it matched.
pub fn resolve_shorthand<'a>(attlist: &'a AttList, bare: &str) -> Option<&'a AttDef> {
    attlist.defs.iter().find(|def| match &def.ty {
        AttType::NameOf(names) => names.iter().any(|n| n.eq_ignore_ascii_case(bare)),
        AttType::Notation(names) => names.iter().any(|n| n.eq_ignore_ascii_case(bare)),
        _ => false,
    })
}

/// Record-boundary and whitespace normalization applied to an
/// attribute value before it reaches the event sink (spec §9 open
/// question (a): `\r\n` and bare `\r` both normalize to one `\n`,
/// checked before any other whitespace collapsing).
pub fn normalize_value(raw: &str) -> std::borrow::Cow<'_, str> {
    if !raw.as_bytes().contains(&b'\r') {
        return std::borrow::Cow::Borrowed(raw);
    }
    let mut builder = CowStrBuilder::default();
    let mut rest = raw;
    while let Some(idx) = rest.find('\r') {
        builder.push_borrow_str(&rest[..idx]);
        builder.push_str("\n");
        rest = if rest[idx..].starts_with("\r\n") {
            &rest[idx + 2..]
        } else {
            &rest[idx + 1..]
        };
    }
    builder.push_borrow_str(rest);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_quoted_and_bare_name_value_pairs() {
        let classes = CharClasses::sgml_default();
        let attrs = scan_attribute_specs(r#"id="x1" class=para"#, &classes);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].name.as_deref(), Some("id"));
        assert_eq!(attrs[0].value, "x1");
        assert!(attrs[0].quoted);
        assert_eq!(attrs[1].name.as_deref(), Some("class"));
        assert_eq!(attrs[1].value, "para");
        assert!(!attrs[1].quoted);
    }

    #[test]
    fn bare_name_minimization_has_no_name() {
        let classes = CharClasses::sgml_default();
        let attrs = scan_attribute_specs("selected", &classes);
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, None);
        assert_eq!(attrs[0].value, "selected");
    }

    #[test]
    fn shorthand_matches_first_accepting_attribute_in_declaration_order() {
        let mut dtd = sgml_dtd::Dtd::new(sgml_dtd::Dialect::Sgml);
        let first = dtd.intern_name("align");
        let second = dtd.intern_name("state");
        let attlist = AttList {
            defs: vec![
                AttDef {
                    name: first,
                    ty: AttType::NameOf(vec!["YES".into(), "NO".into()]),
                    default: sgml_dtd::AttDefault::Implied,
                },
                AttDef {
                    name: second,
                    ty: AttType::NameOf(vec!["YES".into()]),
                    default: sgml_dtd::AttDefault::Implied,
                },
            ],
        };
        let found = resolve_shorthand(&attlist, "yes").unwrap();
        assert_eq!(found.name, first);
    }

    #[test]
    fn normalize_crlf_and_bare_cr_both_become_lf() {
        assert_eq!(normalize_value("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(normalize_value("plain"), "plain");
    }
}
