//! Tree-sitter based multi-language parser.
//!
//! Every extractor parses through this module. It maps file extensions to
//! grammars and turns source text into a [`ParsedFile`] that callers can
//! inspect for syntax errors before walking it.

use std::path::Path;

use thiserror::Error;

/// Errors that can occur during parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse source code")]
    ParseFailed,

    #[error("Failed to set parser language: {0}")]
    LanguageError(String),

    #[error("Failed to compile query: {0}")]
    QueryError(String),
}

/// Supported programming languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::TypeScript,
        Language::Tsx,
        Language::JavaScript,
        Language::Python,
    ];

    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" | "pyi" => Some(Language::Python),
            _ => None,
        }
    }

    /// Detect language from file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Get the tree-sitter language for this language.
    pub fn tree_sitter_language(&self) -> tree_sitter::Language {
        match self {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Get file extensions associated with this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::TypeScript => &["ts", "mts", "cts"],
            Language::Tsx => &["tsx"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::Python => &["py", "pyi"],
        }
    }

    /// Language tag stamped on artifacts.
    pub fn id(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
        }
    }

    /// Get the display name for this language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::TypeScript => "TypeScript",
            Language::Tsx => "TSX",
            Language::JavaScript => "JavaScript",
            Language::Python => "Python",
        }
    }
}

/// A parsed source file with its AST.
pub struct ParsedFile {
    /// The language of the source file.
    pub language: Language,
    /// The tree-sitter syntax tree.
    pub tree: tree_sitter::Tree,
    /// The source code (owned for lifetime management).
    pub source: String,
}

impl ParsedFile {
    /// Get the root node of the syntax tree.
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    /// Returns true if the grammar could not parse part of the file.
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Get text for a node.
    pub fn node_text(&self, node: tree_sitter::Node) -> &str {
        &self.source[node.byte_range()]
    }
}

/// Multi-language source code parser.
pub struct Parser {
    ts_parser: tree_sitter::Parser,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            ts_parser: tree_sitter::Parser::new(),
        }
    }

    /// Parse a file from the filesystem.
    pub fn parse_file(&mut self, path: &Path) -> Result<ParsedFile, ParseError> {
        let language = Language::from_path(path).ok_or_else(|| {
            ParseError::UnsupportedExtension(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("none")
                    .to_string(),
            )
        })?;

        let source = std::fs::read_to_string(path)?;
        self.parse_source(&source, language)
    }

    /// Parse source code string with a specified language.
    pub fn parse_source(
        &mut self,
        source: &str,
        language: Language,
    ) -> Result<ParsedFile, ParseError> {
        self.ts_parser
            .set_language(&language.tree_sitter_language())
            .map_err(|e| ParseError::LanguageError(e.to_string()))?;

        let tree = self
            .ts_parser
            .parse(source, None)
            .ok_or(ParseError::ParseFailed)?;

        Ok(ParsedFile {
            language,
            tree,
            source: source.to_string(),
        })
    }

    /// Check if a file extension is supported.
    pub fn supports_extension(ext: &str) -> bool {
        Language::from_extension(ext).is_some()
    }

    /// Get all supported extensions.
    pub fn supported_extensions() -> Vec<&'static str> {
        Language::ALL
            .iter()
            .flat_map(|lang| lang.extensions().iter().copied())
            .collect()
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
