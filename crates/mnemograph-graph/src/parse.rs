//! Language parser registry
//!
//! Parsers are external collaborators as far as the pipeline is concerned:
//! anything that can turn source text into [`ParsedSymbol`] records plugs in
//! here. The built-in TypeScript/JavaScript and Rust parsers are
//! line-oriented with brace matching — accurate enough to drive the graph,
//! cheap enough to run on every save.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Class,
}

#[derive(Debug, Clone)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub is_exported: bool,
    /// Interface/trait-like declarations.
    pub is_abstract: bool,
    /// Doc comment block directly above the declaration, if any.
    pub doc: Option<String>,
    pub signature: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub language: &'static str,
    pub symbols: Vec<ParsedSymbol>,
    /// Verbatim module strings, in order of appearance.
    pub imports: Vec<String>,
    /// Exported names.
    pub exports: Vec<String>,
}

pub trait Parser: Send + Sync {
    fn language(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn parse(&self, source: &str) -> ParsedFile;
}

#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn with_defaults() -> Self {
        Self {
            parsers: vec![Arc::new(TypeScriptParser), Arc::new(RustParser)],
        }
    }

    pub fn parser_for(&self, extension: &str) -> Option<&dyn Parser> {
        let ext = extension.to_ascii_lowercase();
        self.parsers
            .iter()
            .find(|p| p.extensions().contains(&ext.as_str()))
            .map(|p| p.as_ref())
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.parser_for(extension).is_some()
    }

    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.parsers.iter().flat_map(|p| p.extensions()).copied().collect()
    }
}

/// sha256 hex digest of file contents, used for change detection.
pub fn content_hash(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Find the closing line of a block opened on `start` (0-based index into
/// `lines`), tracking brace depth. Declarations without an opening brace end
/// on their own line.
fn block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return start + offset;
        }
        if !opened && offset == 0 && line.trim_end().ends_with(';') {
            return start;
        }
        // A declaration that never opens a block (single-line arrow fn etc.)
        if !opened && offset > 0 {
            return start;
        }
    }
    lines.len().saturating_sub(1)
}

/// Collect the comment block directly above `start` (0-based).
fn doc_above(lines: &[&str], start: usize, line_marker: &str) -> Option<String> {
    let mut collected: Vec<String> = Vec::new();
    let mut idx = start;
    while idx > 0 {
        idx -= 1;
        let trimmed = lines[idx].trim();
        if trimmed.starts_with(line_marker) {
            collected.push(
                trimmed
                    .trim_start_matches(line_marker)
                    .trim_start_matches(['/', '!', '*'])
                    .trim()
                    .to_string(),
            );
            continue;
        }
        if trimmed.ends_with("*/") {
            // Walk back to the start of the block comment.
            let mut block: Vec<String> = Vec::new();
            loop {
                let line = lines[idx].trim();
                block.push(
                    line.trim_start_matches("/**")
                        .trim_start_matches("/*")
                        .trim_start_matches('*')
                        .trim_end_matches("*/")
                        .trim()
                        .to_string(),
                );
                if line.starts_with("/*") || idx == 0 {
                    break;
                }
                idx -= 1;
            }
            block.reverse();
            collected.extend(block);
            break;
        }
        break;
    }
    collected.reverse();
    let text = collected.join(" ").trim().to_string();
    (!text.is_empty()).then_some(text)
}

// ---------------------------------------------------------------------------
// TypeScript / JavaScript
// ---------------------------------------------------------------------------

pub struct TypeScriptParser;

fn ts_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .expect("static regex")
    })
}

fn ts_arrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*(?::[^=]+)?=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>",
        )
        .expect("static regex")
    })
}

fn ts_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(class|interface|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .expect("static regex")
    })
}

fn ts_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:import\s+[^'"]*?from\s*|import\s*|require\s*\(\s*|export\s+[^'"]*?from\s*)["']([^"']+)["']"#)
            .expect("static regex")
    })
}

fn ts_named_export_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*export\s*\{([^}]*)\}").expect("static regex"))
}

impl Parser for TypeScriptParser {
    fn language(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx", "mjs", "cjs"]
    }

    fn parse(&self, source: &str) -> ParsedFile {
        let lines: Vec<&str> = source.lines().collect();
        let mut out = ParsedFile {
            language: self.language(),
            ..Default::default()
        };

        for (idx, line) in lines.iter().enumerate() {
            let exported = line.trim_start().starts_with("export");

            if let Some(caps) = ts_import_re().captures(line) {
                let source_str = caps[1].to_string();
                if !out.imports.contains(&source_str) {
                    out.imports.push(source_str);
                }
            }

            if let Some(caps) = ts_named_export_re().captures(line) {
                for name in caps[1].split(',') {
                    let name = name.split_whitespace().next().unwrap_or("").to_string();
                    if !name.is_empty() && !out.exports.contains(&name) {
                        out.exports.push(name);
                    }
                }
                continue;
            }

            let (name, kind, is_abstract) = if let Some(caps) = ts_function_re().captures(line) {
                (caps[1].to_string(), SymbolKind::Function, false)
            } else if let Some(caps) = ts_arrow_re().captures(line) {
                (caps[1].to_string(), SymbolKind::Function, false)
            } else if let Some(caps) = ts_class_re().captures(line) {
                let is_interface = &caps[1] == "interface";
                (caps[2].to_string(), SymbolKind::Class, is_interface)
            } else {
                continue;
            };

            let end = block_end(&lines, idx);
            out.symbols.push(ParsedSymbol {
                name: name.clone(),
                kind,
                start_line: (idx + 1) as u32,
                end_line: (end + 1) as u32,
                is_exported: exported,
                is_abstract,
                doc: doc_above(&lines, idx, "//"),
                signature: line.trim().trim_end_matches('{').trim().to_string(),
            });
            if exported && !out.exports.contains(&name) {
                out.exports.push(name);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

pub struct RustParser;

fn rust_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static regex")
    })
}

fn rust_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(pub(?:\([^)]*\))?\s+)?(struct|enum|trait)\s+([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static regex")
    })
}

fn rust_use_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:pub\s+)?use\s+([A-Za-z0-9_:{}*,\s]+);").expect("static regex"))
}

impl Parser for RustParser {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn parse(&self, source: &str) -> ParsedFile {
        let lines: Vec<&str> = source.lines().collect();
        let mut out = ParsedFile {
            language: self.language(),
            ..Default::default()
        };

        for (idx, line) in lines.iter().enumerate() {
            if let Some(caps) = rust_use_re().captures(line) {
                let import = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
                if !out.imports.contains(&import) {
                    out.imports.push(import);
                }
                continue;
            }

            let (name, kind, exported, is_abstract) =
                if let Some(caps) = rust_fn_re().captures(line) {
                    (
                        caps[2].to_string(),
                        SymbolKind::Function,
                        caps.get(1).is_some(),
                        false,
                    )
                } else if let Some(caps) = rust_type_re().captures(line) {
                    (
                        caps[3].to_string(),
                        SymbolKind::Class,
                        caps.get(1).is_some(),
                        &caps[2] == "trait",
                    )
                } else {
                    continue;
                };

            let end = block_end(&lines, idx);
            out.symbols.push(ParsedSymbol {
                name: name.clone(),
                kind,
                start_line: (idx + 1) as u32,
                end_line: (end + 1) as u32,
                is_exported: exported,
                is_abstract,
                doc: doc_above(&lines, idx, "///"),
                signature: line.trim().trim_end_matches('{').trim().to_string(),
            });
            if exported && !out.exports.contains(&name) {
                out.exports.push(name);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typescript_exported_function() {
        let parsed = TypeScriptParser.parse("export function hello(){ return 1 }\n");
        assert_eq!(parsed.symbols.len(), 1);
        let sym = &parsed.symbols[0];
        assert_eq!(sym.name, "hello");
        assert_eq!(sym.kind, SymbolKind::Function);
        assert!(sym.is_exported);
        assert_eq!(sym.start_line, 1);
        assert_eq!(sym.end_line, 1);
        assert_eq!(parsed.exports, vec!["hello"]);
    }

    #[test]
    fn typescript_multiline_class_with_doc() {
        let src = "/** Service wrapper */\nexport class Greeter {\n  greet() {\n    return 'hi';\n  }\n}\n";
        let parsed = TypeScriptParser.parse(src);
        let class = parsed
            .symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Class)
            .unwrap();
        assert_eq!(class.name, "Greeter");
        assert_eq!(class.start_line, 2);
        assert_eq!(class.end_line, 6);
        assert_eq!(class.doc.as_deref(), Some("Service wrapper"));
    }

    #[test]
    fn typescript_imports_and_arrows() {
        let src = "import { join } from './util'\nimport fs from 'fs'\nexport const add = (a: number, b: number) => a + b\n";
        let parsed = TypeScriptParser.parse(src);
        assert_eq!(parsed.imports, vec!["./util", "fs"]);
        assert!(parsed.symbols.iter().any(|s| s.name == "add" && s.is_exported));
    }

    #[test]
    fn typescript_interface_is_abstract() {
        let parsed = TypeScriptParser.parse("export interface Store {\n  get(): string\n}\n");
        assert!(parsed.symbols[0].is_abstract);
    }

    #[test]
    fn rust_pub_fn_and_trait() {
        let src = "/// Adds numbers.\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\npub trait Named {\n    fn name(&self) -> String;\n}\n";
        let parsed = RustParser.parse(src);
        let add = parsed.symbols.iter().find(|s| s.name == "add").unwrap();
        assert!(add.is_exported);
        assert_eq!(add.doc.as_deref(), Some("Adds numbers."));
        assert_eq!(add.end_line, 4);
        let named = parsed.symbols.iter().find(|s| s.name == "Named").unwrap();
        assert!(named.is_abstract);
    }

    #[test]
    fn registry_routes_by_extension() {
        let registry = ParserRegistry::with_defaults();
        assert!(registry.supports("ts"));
        assert!(registry.supports("rs"));
        assert!(!registry.supports("py"));
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
