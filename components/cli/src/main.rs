//! Demonstration front-end for `sgml-parser` (spec §6 "Demonstration
//! CLI"): `sgmlparse [-xml] [-s] [file.dtd] file` traces a document's
//! parse events to stdout, one line per event, in the style of the
//! reference implementation's ESIS-like event dump.

use std::fs;
use std::process::ExitCode;

use log::error;
use sgml_dtd::{Dialect, Dtd};
use sgml_parser::{load_external_dtd, process_stream, AttributeEvent, AttributeValue, EventSink, NullCatalogue, ParseError};

struct Args {
    xml: bool,
    silent: bool,
    dtd_path: Option<String>,
    doc_path: String,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut xml = false;
    let mut silent = false;
    let mut positional = Vec::new();
    for arg in raw {
        match arg.as_str() {
            "-xml" => xml = true,
            "-s" => silent = true,
            other if other.starts_with('-') => return Err(format!("unknown option {:?}", other)),
            other => positional.push(other.to_string()),
        }
    }
    let (dtd_path, doc_path) = match positional.len() {
        1 => (None, positional.into_iter().next().unwrap()),
        2 => {
            let mut it = positional.into_iter();
            (Some(it.next().unwrap()), it.next().unwrap())
        }
        _ => return Err("usage: sgmlparse [-xml] [-s] [file.dtd] file".to_string()),
    };
    Ok(Args { xml, silent, dtd_path, doc_path })
}

fn infer_dtd_path(doc_path: &str) -> Option<String> {
    if doc_path.ends_with(".html") {
        Some("html.dtd".to_string())
    } else {
        None
    }
}

/// A bare `.xml` document implies the XML dialect even without `-xml`
/// on the command line (spec §6 "Demonstration CLI").
fn infer_dialect(args: &Args) -> Dialect {
    if args.xml || args.doc_path.ends_with(".xml") {
        Dialect::Xml
    } else {
        Dialect::Sgml
    }
}

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new().init().ok();

    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw_args) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(1);
        }
    };

    let dialect = infer_dialect(&args);
    let mut dtd = Dtd::new(dialect);

    let mut silent_sink = SilentSink;
    let mut trace_sink = TraceSink;
    let sink: &mut dyn EventSink = if args.silent { &mut silent_sink } else { &mut trace_sink };

    let dtd_path = args.dtd_path.clone().or_else(|| infer_dtd_path(&args.doc_path));
    if let Some(path) = dtd_path {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("cannot read {}: {}", path, e);
                return ExitCode::from(1);
            }
        };
        if let Err(e) = load_external_dtd(&mut dtd, &text, sink) {
            eprintln!("cannot parse {}: {}", path, e);
            return ExitCode::from(1);
        }
    }

    let text = match fs::read_to_string(&args.doc_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cannot read {}: {}", args.doc_path, e);
            return ExitCode::from(1);
        }
    };

    let catalogue = NullCatalogue;
    let result = process_stream(&mut dtd, &text, &catalogue, sink);

    if let Err(e) = result {
        error!("{}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

struct SilentSink;
impl EventSink for SilentSink {}

/// Writes the ESIS-like trace format spec §6 names: `(<NAME>`/`)<NAME>`
/// for element boundaries, `A<NAME> <TYPE> <value>` for attributes,
/// `-text` for character data, `?target data` for PIs, `&name;` for
/// general-entity references, `D<body>` for applied declarations, and
/// a final `C` once the document ends.
struct TraceSink;

impl EventSink for TraceSink {
    fn on_begin_element(&mut self, name: &str, attributes: &[AttributeEvent<'_>]) {
        for attr in attributes {
            match attr.value {
                AttributeValue::CData(value) => println!("A{} CDATA {}", attr.name, value),
                AttributeValue::Tokens(tokens) => println!("A{} TOKEN {}", attr.name, tokens.join(" ")),
            }
        }
        println!("({}", name);
    }

    fn on_end_element(&mut self, name: &str) {
        println!("){}", name);
    }

    fn on_data(&mut self, text: &str) {
        println!("-{}", text);
    }

    fn on_processing_instruction(&mut self, target: &str, data: &str) {
        println!("?{} {}", target, data);
    }

    fn on_entity_reference(&mut self, name: &str) {
        println!("&{};", name);
    }

    fn on_comment(&mut self, _text: &str) {}

    fn on_decl(&mut self, declaration_body: &str) {
        println!("D{}", declaration_body);
    }

    fn on_end_document(&mut self) {
        println!("C");
    }

    fn on_error(&mut self, error: &ParseError) {
        eprintln!("{}", error);
    }
}
