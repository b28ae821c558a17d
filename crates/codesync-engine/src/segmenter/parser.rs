//! Grammar registry for the segmenter

use std::collections::HashMap;

use tree_sitter::{Language, Parser, Tree};
use tracing::debug;

pub(crate) struct ParserManager {
    parsers: HashMap<&'static str, Parser>,
}

impl Default for ParserManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserManager {
    pub fn new() -> Self {
        let grammars: [(&'static str, Language); 9] = [
            ("rust", tree_sitter_rust::LANGUAGE.into()),
            ("python", tree_sitter_python::LANGUAGE.into()),
            ("javascript", tree_sitter_typescript::LANGUAGE_TSX.into()),
            ("typescript", tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            ("go", tree_sitter_go::LANGUAGE.into()),
            ("java", tree_sitter_java::LANGUAGE.into()),
            ("c", tree_sitter_cpp::LANGUAGE.into()),
            ("cpp", tree_sitter_cpp::LANGUAGE.into()),
            ("ruby", tree_sitter_ruby::LANGUAGE.into()),
        ];

        let mut parsers = HashMap::new();
        for (lang, grammar) in grammars {
            let mut parser = Parser::new();
            match parser.set_language(&grammar) {
                Ok(()) => {
                    parsers.insert(lang, parser);
                }
                Err(e) => debug!("Grammar for {} failed to load: {}", lang, e),
            }
        }

        Self { parsers }
    }

    #[cfg(test)]
    fn has_parser(&self, lang: &str) -> bool {
        self.parsers.contains_key(lang)
    }

    /// Parse `content`, or `None` when the language has no grammar or the
    /// parser gives up
    pub fn parse(&mut self, lang: &str, content: &str) -> Option<Tree> {
        let parser = self.parsers.get_mut(lang)?;
        parser.parse(content, None)
    }
}
