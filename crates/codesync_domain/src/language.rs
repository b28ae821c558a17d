//! Language tags derived from file extensions

use std::path::Path;

/// Language tag and the extensions that map to it
const LANGUAGES: &[(&str, &[&str])] = &[
    ("rust", &["rs"]),
    ("python", &["py", "pyi"]),
    ("javascript", &["js", "jsx", "mjs", "cjs"]),
    ("typescript", &["ts", "tsx", "mts", "cts"]),
    ("java", &["java"]),
    ("go", &["go"]),
    ("c", &["c", "h"]),
    ("cpp", &["cpp", "cc", "cxx", "hpp", "hh"]),
    ("ruby", &["rb"]),
    ("markdown", &["md", "markdown"]),
    ("text", &["txt"]),
    ("json", &["json"]),
    ("yaml", &["yaml", "yml"]),
    ("toml", &["toml"]),
    ("xml", &["xml"]),
    ("html", &["html", "htm"]),
    ("css", &["css"]),
    ("scss", &["scss", "sass"]),
];

/// Case-insensitive lookup of a bare extension (no leading dot)
pub fn language_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(_, extensions)| extensions.contains(&extension.as_str()))
        .map(|(language, _)| *language)
}

pub fn detect_language_from_extension(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    language_for_extension(extension).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_detect_language() {
        let fixture = [
            ("src/lib.rs", Some("rust")),
            ("app/Widget.TSX", Some("typescript")),
            ("include/table.h", Some("c")),
            ("include/table.hpp", Some("cpp")),
            ("scripts/tool.pyi", Some("python")),
            (".github/ci.yml", Some("yaml")),
            ("Makefile", None),
            ("archive.tar.gz", None),
        ];

        let actual: Vec<(&str, Option<String>)> = fixture
            .iter()
            .map(|(path, _)| (*path, detect_language_from_extension(Path::new(path))))
            .collect();

        let expected: Vec<(&str, Option<String>)> = fixture
            .iter()
            .map(|(path, language)| (*path, language.map(str::to_string)))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_every_extension_maps_once() {
        let mut seen = std::collections::HashSet::new();
        for (_, extensions) in LANGUAGES {
            for extension in *extensions {
                assert!(seen.insert(*extension), "duplicate extension {extension}");
            }
        }
    }
}
