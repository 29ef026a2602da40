//! Conversion between a note's flat content string and editable blocks.
//!
//! Content is plain text interleaved with two marker forms:
//!
//! ```text
//! content := (code | image | text)*
//! code    := "[CODE:" lang "]" body "[/CODE]"    lang: no ']' and no newline
//! image   := "[IMAGE:" id "]"                     id: [A-Za-z0-9_-]+
//! text    := anything else
//! ```
//!
//! The scanner walks the input left to right looking for the `[CODE:` and
//! `[IMAGE:` sentinels. A sentinel that does not complete its marker is kept
//! as literal text. A code body ends at the first `[/CODE]`, so a code block
//! cannot contain that literal sequence. Markers inside a code body are part
//! of the body.
//!
//! ```rust
//! use betternotes_core::{blocks, BlockType};
//!
//! let parsed = blocks::parse("[CODE:python]\nprint(1)\n[/CODE]", &[]);
//! assert_eq!(parsed[0].block_type(), BlockType::Code);
//! assert_eq!(parsed[0].content(), "print(1)");
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::note::NoteImage;

/// Language used for code blocks whose marker has no language tag.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Languages offered by the code block picker, as `(value, label)` pairs.
pub const CODE_LANGUAGES: &[(&str, &str)] = &[
    ("javascript", "JavaScript"),
    ("typescript", "TypeScript"),
    ("python", "Python"),
    ("java", "Java"),
    ("cpp", "C++"),
    ("c", "C"),
    ("csharp", "C#"),
    ("php", "PHP"),
    ("ruby", "Ruby"),
    ("go", "Go"),
    ("rust", "Rust"),
    ("swift", "Swift"),
    ("kotlin", "Kotlin"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("sql", "SQL"),
    ("bash", "Bash"),
    ("json", "JSON"),
    ("xml", "XML"),
    ("yaml", "YAML"),
];

const CODE_OPEN: &str = "[CODE:";
const CODE_CLOSE: &str = "[/CODE]";
const IMAGE_OPEN: &str = "[IMAGE:";
const BLOCK_SEPARATOR: &str = "\n\n";

/// Display label for a language value; unknown values fall back to the default's label.
pub fn language_label(value: &str) -> &'static str {
    CODE_LANGUAGES
        .iter()
        .find(|(v, _)| *v == value)
        .or_else(|| CODE_LANGUAGES.iter().find(|(v, _)| *v == DEFAULT_LANGUAGE))
        .map(|(_, label)| *label)
        .unwrap_or("JavaScript")
}

/// The three kinds of block, without their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Text,
    Code,
    Image,
}

/// Payload of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockKind {
    Text { content: String },
    Code { language: String, content: String },
    Image { image: NoteImage },
}

/// One independently editable unit of note content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl ContentBlock {
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Text {
                content: content.into(),
            },
        }
    }

    pub fn code(id: impl Into<String>, language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Code {
                language: language.into(),
                content: content.into(),
            },
        }
    }

    pub fn image(id: impl Into<String>, image: NoteImage) -> Self {
        Self {
            id: id.into(),
            kind: BlockKind::Image { image },
        }
    }

    /// A text block with a freshly generated id.
    pub fn new_text(content: impl Into<String>) -> Self {
        Self::text(fresh_id("text"), content)
    }

    /// An empty code block with a freshly generated id.
    pub fn new_code(language: impl Into<String>) -> Self {
        Self::code(fresh_id("code"), language, "")
    }

    /// An image block with a freshly generated id.
    pub fn new_image(image: NoteImage) -> Self {
        Self::image(fresh_id("image"), image)
    }

    pub fn block_type(&self) -> BlockType {
        match self.kind {
            BlockKind::Text { .. } => BlockType::Text,
            BlockKind::Code { .. } => BlockType::Code,
            BlockKind::Image { .. } => BlockType::Image,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, BlockKind::Text { .. })
    }

    /// A text block whose content is whitespace-only.
    pub fn is_empty_text(&self) -> bool {
        matches!(&self.kind, BlockKind::Text { content } if content.trim().is_empty())
    }

    /// Text or code content; empty for images.
    pub fn content(&self) -> &str {
        match &self.kind {
            BlockKind::Text { content } | BlockKind::Code { content, .. } => content,
            BlockKind::Image { .. } => "",
        }
    }

    /// The referenced image, for image blocks.
    pub fn image_ref(&self) -> Option<&NoteImage> {
        match &self.kind {
            BlockKind::Image { image } => Some(image),
            _ => None,
        }
    }

    /// Marker form of this block as it appears in persisted content.
    fn to_marker(&self) -> String {
        match &self.kind {
            BlockKind::Text { content } => content.clone(),
            BlockKind::Code { language, content } => {
                let language = if language.is_empty() { DEFAULT_LANGUAGE } else { language.as_str() };
                format!("{CODE_OPEN}{language}]\n{content}\n{CODE_CLOSE}")
            }
            BlockKind::Image { image } => format!("{IMAGE_OPEN}{}]", image.id),
        }
    }
}

fn fresh_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// A lexical unit of the content grammar, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Code {
        language: &'a str,
        body: &'a str,
        raw: &'a str,
    },
    Image {
        id: &'a str,
        raw: &'a str,
    },
}

impl<'a> Token<'a> {
    fn raw(&self) -> &'a str {
        match self {
            Token::Text(raw) | Token::Code { raw, .. } | Token::Image { raw, .. } => raw,
        }
    }
}

fn is_image_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Tries to read a code marker starting at byte `at`; returns the token and the end offset.
fn scan_code(input: &str, at: usize) -> Option<(Token<'_>, usize)> {
    let lang_start = at + CODE_OPEN.len();
    let lang_len = input[lang_start..].find([']', '\n'])?;
    let lang_end = lang_start + lang_len;
    if !input[lang_end..].starts_with(']') {
        return None;
    }
    let body_start = lang_end + 1;
    let body_len = input[body_start..].find(CODE_CLOSE)?;
    let end = body_start + body_len + CODE_CLOSE.len();
    Some((
        Token::Code {
            language: &input[lang_start..lang_end],
            body: &input[body_start..body_start + body_len],
            raw: &input[at..end],
        },
        end,
    ))
}

/// Tries to read an image marker starting at byte `at`.
fn scan_image(input: &str, at: usize) -> Option<(Token<'_>, usize)> {
    let id_start = at + IMAGE_OPEN.len();
    let id_len = input[id_start..].find(|c: char| !is_image_id_char(c))?;
    let id_end = id_start + id_len;
    if id_len == 0 || !input[id_end..].starts_with(']') {
        return None;
    }
    let end = id_end + 1;
    Some((
        Token::Image {
            id: &input[id_start..id_end],
            raw: &input[at..end],
        },
        end,
    ))
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(offset) = input[pos..].find('[') {
        let at = pos + offset;
        let rest = &input[at..];
        let marker = if rest.starts_with(CODE_OPEN) {
            scan_code(input, at)
        } else if rest.starts_with(IMAGE_OPEN) {
            scan_image(input, at)
        } else {
            None
        };

        match marker {
            Some((token, end)) => {
                if text_start < at {
                    tokens.push(Token::Text(&input[text_start..at]));
                }
                tokens.push(token);
                pos = end;
                text_start = end;
            }
            // '[' is one byte, so `at + 1` stays on a char boundary.
            None => pos = at + 1,
        }
    }

    if text_start < input.len() {
        tokens.push(Token::Text(&input[text_start..]));
    }
    tokens
}

/// Parses flat content into a consolidated block sequence.
///
/// Image markers whose id is not in `known_images` are dropped, and the text
/// on either side of a dropped marker joins into one block. Whitespace-only
/// text between markers is dropped; other text is kept verbatim.
pub fn parse(content: &str, known_images: &[NoteImage]) -> Vec<ContentBlock> {
    if content.trim().is_empty() {
        return vec![ContentBlock::text("text-1", "")];
    }

    let mut blocks = Vec::new();
    let mut next_id = 1usize;
    let mut take_id = |prefix: &str| {
        let id = format!("{prefix}-{next_id}");
        next_id += 1;
        id
    };

    for token in tokenize(content) {
        match token {
            Token::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                // Runs separated only by a dropped image marker form one block.
                match blocks.last_mut() {
                    Some(ContentBlock {
                        kind: BlockKind::Text { content },
                        ..
                    }) => content.push_str(text),
                    _ => blocks.push(ContentBlock::text(take_id("text"), text)),
                }
            }
            Token::Code { language, body, .. } => {
                let language = if language.is_empty() { DEFAULT_LANGUAGE } else { language };
                blocks.push(ContentBlock::code(take_id("code"), language, body.trim()));
            }
            Token::Image { id, .. } => {
                if let Some(image) = known_images.iter().find(|img| img.id == id) {
                    blocks.push(ContentBlock::image(take_id("image"), image.clone()));
                }
            }
        }
    }

    consolidate(blocks)
}

/// Removes redundant empty text blocks and guarantees at least one text block.
///
/// An empty text block is dropped when the block kept before it, or the block
/// after it, is also text. Idempotent.
pub fn consolidate(blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    let mut out: Vec<ContentBlock> = Vec::with_capacity(blocks.len() + 1);
    let mut iter = blocks.into_iter().peekable();

    while let Some(block) = iter.next() {
        if block.is_empty_text() {
            let prev_is_text = out.last().is_some_and(ContentBlock::is_text);
            let next_is_text = iter.peek().is_some_and(ContentBlock::is_text);
            if prev_is_text || next_is_text {
                continue;
            }
        }
        out.push(block);
    }

    if !out.iter().any(ContentBlock::is_text) {
        out.push(ContentBlock::new_text(""));
    }
    out
}

fn newline_runs() -> &'static Regex {
    static NEWLINE_RUNS: OnceLock<Regex> = OnceLock::new();
    NEWLINE_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"))
}

/// Serializes blocks back to flat content.
///
/// Blocks are joined with a blank line and runs of three or more newlines are
/// collapsed to two.
pub fn serialize(blocks: &[ContentBlock]) -> String {
    let joined = blocks
        .iter()
        .map(ContentBlock::to_marker)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR);
    newline_runs().replace_all(&joined, BLOCK_SEPARATOR).into_owned()
}

/// Rewrites `[IMAGE:old]` markers to `[IMAGE:new]` for every pair in `remap`.
///
/// Code bodies and literal text are left untouched.
pub fn remap_image_markers(content: &str, remap: &HashMap<String, String>) -> String {
    if remap.is_empty() {
        return content.to_string();
    }
    let mut out = String::with_capacity(content.len());
    for token in tokenize(content) {
        match token {
            Token::Image { id, raw } => match remap.get(id) {
                Some(new_id) => {
                    out.push_str(IMAGE_OPEN);
                    out.push_str(new_id);
                    out.push(']');
                }
                None => out.push_str(raw),
            },
            other => out.push_str(other.raw()),
        }
    }
    out
}

/// Image ids referenced by markers in `content`, in order of first appearance.
pub fn referenced_image_ids(content: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for token in tokenize(content) {
        if let Token::Image { id, .. } = token {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(id: &str) -> NoteImage {
        NoteImage {
            id: id.to_string(),
            url: format!("https://cdn.example.com/{id}.png"),
            name: format!("{id}.png"),
        }
    }

    fn types(blocks: &[ContentBlock]) -> Vec<BlockType> {
        blocks.iter().map(ContentBlock::block_type).collect()
    }

    const CORPUS: &[&str] = &[
        "",
        "   \n\n  ",
        "hello",
        "[CODE:python]\nprint(1)\n[/CODE]",
        "intro\n\n[CODE:rust]\nfn main() {}\n[/CODE]\n\noutro",
        "[IMAGE:1]",
        "before [IMAGE:1] after",
        "[IMAGE:missing]",
        "[CODE:]x[/CODE][CODE:]y[/CODE]",
        "[CODE:js]unterminated",
        "literal [IMAGE: not a marker] and [CODE:go\nbroken]",
        "[IMAGE:1][IMAGE:2]\n\n\n\ntext",
        "a\n\n\n\n\nb",
        "[CODE:sql]\n[IMAGE:1]\n[/CODE]",
        "ünïcödé [IMAGE:2] ✓",
        "a [IMAGE:gone] b",
        "x [IMAGE:gone]\n\n[IMAGE:lost]\n\ny [IMAGE:1] z",
    ];

    #[test]
    fn test_empty_content_yields_single_empty_text_block() {
        let blocks = parse("", &[]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Text { content: String::new() });
    }

    #[test]
    fn test_single_python_code_block() {
        let blocks = parse("[CODE:python]\nprint(1)\n[/CODE]", &[]);
        let code: Vec<_> = blocks.iter().filter(|b| b.block_type() == BlockType::Code).collect();
        assert_eq!(code.len(), 1);
        assert_eq!(
            code[0].kind,
            BlockKind::Code {
                language: "python".to_string(),
                content: "print(1)".to_string()
            }
        );
    }

    #[test]
    fn test_code_language_defaults() {
        let blocks = parse("[CODE:]\n  let x = 1;  \n[/CODE]", &[]);
        assert_eq!(
            blocks[0].kind,
            BlockKind::Code {
                language: DEFAULT_LANGUAGE.to_string(),
                content: "let x = 1;".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_image_marker_is_dropped() {
        let blocks = parse("see [IMAGE:gone] here", &[img("other")]);
        assert!(blocks.iter().all(|b| b.block_type() != BlockType::Image));
        let text: String = blocks.iter().map(ContentBlock::content).collect();
        assert!(!text.contains("[IMAGE:"));
    }

    #[test]
    fn test_text_around_dropped_image_is_one_block() {
        let blocks = parse("a [IMAGE:gone] b", &[]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content(), "a  b");

        let again = parse(&serialize(&blocks), &[]);
        assert_eq!(types(&again), vec![BlockType::Text]);
    }

    #[test]
    fn test_known_image_marker_resolves() {
        let blocks = parse("before\n\n[IMAGE:a1]\n\nafter", &[img("a1")]);
        assert_eq!(types(&blocks), vec![BlockType::Text, BlockType::Image, BlockType::Text]);
        assert_eq!(blocks[1].image_ref().unwrap().id, "a1");
    }

    #[test]
    fn test_uuid_image_ids_are_markers() {
        let id = "3f1e2d4c-9b8a-4c7d-a6e5-0f1e2d3c4b5a";
        let blocks = parse(&format!("[IMAGE:{id}]"), &[img(id)]);
        assert_eq!(blocks[0].block_type(), BlockType::Image);
    }

    #[test]
    fn test_incomplete_markers_stay_literal() {
        let blocks = parse("[CODE:js]no close", &[]);
        assert_eq!(types(&blocks), vec![BlockType::Text]);
        assert_eq!(blocks[0].content(), "[CODE:js]no close");

        let blocks = parse("array[IMAGE:] end", &[]);
        assert_eq!(blocks[0].content(), "array[IMAGE:] end");
    }

    #[test]
    fn test_first_close_marker_ends_code_body() {
        let blocks = parse("[CODE:txt]a[/CODE]b[/CODE]", &[]);
        assert_eq!(blocks[0].content(), "a");
        assert_eq!(blocks[1].content(), "b[/CODE]");
    }

    #[test]
    fn test_markers_inside_code_body_are_not_interpreted() {
        let blocks = parse("[CODE:md]\n[IMAGE:a1]\n[/CODE]", &[img("a1")]);
        assert_eq!(types(&blocks), vec![BlockType::Code, BlockType::Text]);
        assert_eq!(blocks[0].content(), "[IMAGE:a1]");
    }

    #[test]
    fn test_parse_always_contains_text_block() {
        let images = vec![img("1"), img("2")];
        for content in CORPUS {
            let blocks = parse(content, &images);
            assert!(!blocks.is_empty(), "empty result for {content:?}");
            assert!(blocks.iter().any(ContentBlock::is_text), "no text block for {content:?}");
        }
    }

    #[test]
    fn test_consolidate_is_idempotent() {
        let images = vec![img("1"), img("2")];
        for content in CORPUS {
            let once = parse(content, &images);
            let twice = consolidate(once.clone());
            assert_eq!(once, twice, "not idempotent for {content:?}");
        }

        let raw = vec![
            ContentBlock::text("a", ""),
            ContentBlock::text("b", " "),
            ContentBlock::code("c", "go", ""),
            ContentBlock::text("d", ""),
            ContentBlock::text("e", "x"),
            ContentBlock::text("f", ""),
        ];
        let once = consolidate(raw);
        assert_eq!(consolidate(once.clone()), once);
    }

    #[test]
    fn test_consolidate_removes_redundant_empty_text() {
        let blocks = consolidate(vec![
            ContentBlock::text("a", "hello"),
            ContentBlock::text("b", ""),
            ContentBlock::code("c", "go", "x"),
            ContentBlock::text("d", ""),
            ContentBlock::image("e", img("1")),
        ]);
        let ids: Vec<_> = blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d", "e"]);
    }

    #[test]
    fn test_consolidate_appends_text_when_none_left() {
        let blocks = consolidate(vec![ContentBlock::image("i", img("1"))]);
        assert_eq!(types(&blocks), vec![BlockType::Image, BlockType::Text]);

        let blocks = consolidate(Vec::new());
        assert_eq!(types(&blocks), vec![BlockType::Text]);
    }

    #[test]
    fn test_serialize_marker_forms() {
        let blocks = vec![
            ContentBlock::text("t", "intro"),
            ContentBlock::code("c", "python", "print(1)"),
            ContentBlock::image("i", img("a1")),
        ];
        assert_eq!(
            serialize(&blocks),
            "intro\n\n[CODE:python]\nprint(1)\n[/CODE]\n\n[IMAGE:a1]"
        );
    }

    #[test]
    fn test_serialize_collapses_newline_runs() {
        let blocks = vec![
            ContentBlock::text("a", "one\n\n\n"),
            ContentBlock::text("b", "\n\ntwo"),
        ];
        assert_eq!(serialize(&blocks), "one\n\ntwo");
    }

    #[test]
    fn test_round_trip_preserves_block_types() {
        let images = vec![img("1"), img("2")];
        for content in CORPUS {
            let first = parse(content, &images);
            let again = parse(&serialize(&first), &images);
            assert_eq!(types(&first), types(&again), "type sequence changed for {content:?}");
        }
    }

    #[test]
    fn test_remap_image_markers() {
        let mut remap = HashMap::new();
        remap.insert("1700000000000".to_string(), "b7c1".to_string());
        let content = "x [IMAGE:1700000000000] y [IMAGE:1700000000000]\n\n[CODE:md]\n[IMAGE:1700000000000]\n[/CODE]";
        let out = remap_image_markers(content, &remap);
        assert_eq!(
            out,
            "x [IMAGE:b7c1] y [IMAGE:b7c1]\n\n[CODE:md]\n[IMAGE:1700000000000]\n[/CODE]"
        );
    }

    #[test]
    fn test_referenced_image_ids_dedup_in_order() {
        let ids = referenced_image_ids("[IMAGE:b] [IMAGE:a] [IMAGE:b] [CODE:x][IMAGE:c][/CODE]");
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_block_serde_shape() {
        let block = ContentBlock::code("code-1", "rust", "fn main() {}");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "code");
        assert_eq!(json["language"], "rust");
        assert_eq!(json["id"], "code-1");
    }

    #[test]
    fn test_language_label() {
        assert_eq!(language_label("cpp"), "C++");
        assert_eq!(language_label("brainfuck"), "JavaScript");
    }
}
