//! Naming rules: how a proposed name is computed for each file.
//!
//! Rules are described by a serialisable [`RuleSpec`] (which is persisted
//! alongside operation state) and compiled into a [`NamingRule`] before use.
//!
//! # Template Variables
//!
//! | Variable | Type             | Description                                  |
//! |----------|------------------|----------------------------------------------|
//! | `name`   | `String`         | Current file name, extension included        |
//! | `stem`   | `String`         | Current name without its extension           |
//! | `ext`    | `String`         | Extension without the dot (may be empty)     |
//! | `index`  | `u64`            | Position in the batch, from 0                |
//! | `number` | `u64`            | Position in the batch, from 1                |
//! | `parent` | `String`         | Identifier of the containing folder          |
//! | `size`   | `u64`            | Size in bytes                                |
//! | `mtime`  | `Option<String>` | Last modification time (RFC 3339)            |
//!
//! Besides upon's defaults, templates can use the `slug`, `lower` and `upper`
//! formatters and the `truncate(value, n)` and `pad(number, width)`
//! functions.
//!
//! # Example
//!
//! ```
//! use relabel_engine::rule::{NamingRule, RuleSpec};
//! use relabel_platform::FileItem;
//!
//! let rule = RuleSpec::template("{{ pad(number, 3) }}-{{ stem|slug }}.{{ ext }}").compile().unwrap();
//! let file = FileItem::new("1", "Holiday Photo.JPG", "root");
//! assert_eq!(rule.apply(&file, 0).unwrap(), "001-holiday-photo.JPG");
//! ```

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use regex::Regex;
use relabel_platform::{FileItem, join_name, split_name};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tracing::instrument;
use upon::{Engine, Template};

/// Computes the proposed new name for one file of a batch.
pub trait NamingRule: Send + Sync {
    /// `index` is the file's position in the batch, from 0.
    fn apply(&self, file: &FileItem, index: usize) -> Result<String>;
}

/// Serialisable description of a naming rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Render the whole new name (extension included) from a template.
    Template { template: String },
    /// Replace occurrences of `find` in the stem. The extension is kept.
    Replace {
        find: String,
        replace: String,
        #[serde(default)]
        regex: bool,
    },
    /// Wrap the stem. The extension is kept.
    Affix {
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        suffix: String,
    },
}

impl RuleSpec {
    pub fn template(template: impl Into<String>) -> Self {
        Self::Template { template: template.into() }
    }

    /// Compile the rule, failing fast on template syntax or regex errors.
    pub fn compile(&self) -> Result<Box<dyn NamingRule>> {
        Ok(match self {
            Self::Template { template } => Box::new(TemplateRule::new(template)?),
            Self::Replace { find, replace, regex } => {
                let finder = if *regex {
                    Finder::Regex(Regex::new(find).or_raise(|| ErrorKind::Rule)?)
                } else {
                    Finder::Literal(find.clone())
                };
                Box::new(ReplaceRule { finder, replace: replace.clone() })
            },
            Self::Affix { prefix, suffix } => Box::new(AffixRule { prefix: prefix.clone(), suffix: suffix.clone() }),
        })
    }
}

/// Template rule, compiled eagerly so that syntax errors surface at creation
/// time rather than half way through a batch.
pub struct TemplateRule {
    engine: Engine<'static>,
    template: Template<'static>,
}

impl TemplateRule {
    pub fn new(source: &str) -> Result<Self> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(source.to_string()).or_raise(|| ErrorKind::Rule)?;
        Ok(Self { engine, template })
    }

    fn parameters(file: &FileItem, index: usize) -> upon::Value {
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        let index = u64::try_from(index).unwrap_or(u64::MAX);
        let mtime = file.mtime.and_then(|mtime| mtime.format(&Rfc3339).ok());
        upon::value! {
            name: &file.name,
            stem: file.stem(),
            ext: &file.ext,
            index: index,
            number: index.saturating_add(1),
            parent: &file.parent_id,
            size: file.size,
            mtime: mtime,
        }
    }
}

impl NamingRule for TemplateRule {
    #[instrument(level = "trace", skip_all, fields(file = %file.id))]
    fn apply(&self, file: &FileItem, index: usize) -> Result<String> {
        let name = self
            .template
            .render(&self.engine, Self::parameters(file, index))
            .to_string()
            .or_raise(|| ErrorKind::Rule)?;
        Ok(name.trim().to_string())
    }
}

enum Finder {
    Literal(String),
    Regex(Regex),
}

pub struct ReplaceRule {
    finder: Finder,
    replace: String,
}

impl NamingRule for ReplaceRule {
    fn apply(&self, file: &FileItem, _index: usize) -> Result<String> {
        let (stem, ext) = split_name(&file.name);
        let stem = match &self.finder {
            // An empty needle would insert the replacement between every character.
            Finder::Literal(find) if find.is_empty() => stem.to_string(),
            Finder::Literal(find) => stem.replace(find.as_str(), &self.replace),
            Finder::Regex(regex) => regex.replace_all(stem, self.replace.as_str()).into_owned(),
        };
        Ok(join_name(&stem, ext))
    }
}

pub struct AffixRule {
    prefix: String,
    suffix: String,
}

impl NamingRule for AffixRule {
    fn apply(&self, file: &FileItem, _index: usize) -> Result<String> {
        let (stem, ext) = split_name(&file.name);
        Ok(join_name(&format!("{}{stem}{}", self.prefix, self.suffix), ext))
    }
}

/// Custom [`upon`] extensions for name-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Converts strings to URL-safe slugs.
    ///
    /// Strips quotation marks first to avoid output like `"hello"` becoming
    /// `-hello-`.
    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                // Various quotation marks: '"‘’“”„‛`«»‹›
                let marks = [
                    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}',
                    '\u{0060}', '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
                ];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn lower_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", s.to_lowercase())?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn upper_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", s.to_uppercase())?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Truncates a string to a maximum byte length at a character boundary.
    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    /// Zero-pads a number to `width` digits.
    fn pad(number: i64, width: usize) -> String {
        format!("{number:0width$}")
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_formatter("lower", lower_formatter);
        engine.add_formatter("upper", upper_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
        engine.add_function("pad", pad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    fn file(name: &str) -> FileItem {
        FileItem::new("id-1", name, "folder").with_size(2048)
    }

    fn render(template: &str, name: &str, index: usize) -> String {
        RuleSpec::template(template).compile().unwrap().apply(&file(name), index).unwrap()
    }

    #[rstest]
    #[case("{{ stem|slug }}.{{ ext }}", "\"Hello\" World's 'Test'.txt", "hello-worlds-test.txt")]
    #[case("{{ name|lower }}", "README.MD", "readme.md")]
    #[case("{{ stem|upper }}.{{ ext }}", "notes.md", "NOTES.md")]
    #[case("{{ number }}_{{ name }}", "a.txt", "4_a.txt")]
    #[case("{{ index }}-{{ parent }}-{{ size }}", "a.txt", "3-folder-2048")]
    #[case("{{ pad(number, 4) }}.{{ ext }}", "scan.png", "0004.png")]
    #[case("{{ truncate(stem, 6) }}.{{ ext }}", "A Very Long Title.pdf", "A Very.pdf")]
    #[case("{{ stem|truncate: 4|slug }}.{{ ext }}", "Quarterly Report.pdf", "quar.pdf")]
    #[case("  {{ name }}  ", "padded.txt", "padded.txt")]
    fn test_template_rule(#[case] template: &str, #[case] name: &str, #[case] expected: &str) {
        assert_eq!(render(template, name, 3), expected);
    }

    #[test]
    fn test_template_mtime() {
        let file = file("a.txt").with_mtime(datetime!(2024-06-15 12:30:00 UTC));
        let rule = RuleSpec::template("{{ mtime }}").compile().unwrap();
        assert_eq!(rule.apply(&file, 0).unwrap(), "2024-06-15T12:30:00Z");
    }

    #[test]
    fn test_template_syntax_error_fails_at_compile() {
        let err = RuleSpec::template("{{ name").compile().err().unwrap();
        assert_eq!(*err, ErrorKind::Rule);
    }

    #[test]
    fn test_template_unknown_variable_fails_at_render() {
        let rule = RuleSpec::template("{{ missing }}").compile().unwrap();
        assert_eq!(*rule.apply(&file("a.txt"), 0).unwrap_err(), ErrorKind::Rule);
    }

    #[rstest]
    #[case("IMG_", "holiday_", false, "IMG_0001.jpg", "holiday_0001.jpg")]
    #[case("jpg", "png", false, "jpg.jpg", "png.jpg")]
    #[case("", "x", false, "keep.txt", "keep.txt")]
    #[case(r"\s+", "-", true, "my  holiday   photo.jpeg", "my-holiday-photo.jpeg")]
    #[case(r"^(\d+)-(.*)$", "$2-$1", true, "01-intro.md", "intro-01.md")]
    fn test_replace_rule(
        #[case] find: &str,
        #[case] replace: &str,
        #[case] regex: bool,
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        let spec = RuleSpec::Replace { find: find.to_string(), replace: replace.to_string(), regex };
        assert_eq!(spec.compile().unwrap().apply(&file(name), 0).unwrap(), expected);
    }

    #[test]
    fn test_replace_invalid_regex() {
        let spec = RuleSpec::Replace { find: "(".to_string(), replace: String::new(), regex: true };
        assert_eq!(*spec.compile().err().unwrap(), ErrorKind::Rule);
    }

    #[rstest]
    #[case("draft-", "", "essay.docx", "draft-essay.docx")]
    #[case("", "_v2", "essay.docx", "essay_v2.docx")]
    #[case("[", "]", "Makefile", "[Makefile]")]
    #[case("x", "", ".env", "x.env")]
    fn test_affix_rule(#[case] prefix: &str, #[case] suffix: &str, #[case] name: &str, #[case] expected: &str) {
        let spec = RuleSpec::Affix { prefix: prefix.to_string(), suffix: suffix.to_string() };
        assert_eq!(spec.compile().unwrap().apply(&file(name), 0).unwrap(), expected);
    }

    #[test]
    fn test_spec_serialization() {
        let spec: RuleSpec = serde_json::from_str(r#"{"kind":"affix","prefix":"p-"}"#).unwrap();
        assert_eq!(spec, RuleSpec::Affix { prefix: "p-".to_string(), suffix: String::new() });
        let json = serde_json::to_string(&RuleSpec::template("{{ name }}")).unwrap();
        assert_eq!(json, r#"{"kind":"template","template":"{{ name }}"}"#);
    }
}
