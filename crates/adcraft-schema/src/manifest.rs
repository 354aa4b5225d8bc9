use crate::lexer::mask_comments_and_strings;
use crate::value::Object;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Name of the script variable the ad runtime reads its manifest from.
///
/// When a script contains several object assignments, the one bound to this
/// name (optionally qualified, e.g. `window.manifest`) wins.
pub const MANIFEST_BINDING: &str = "manifest";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("manifest parse error at line {line}, column {column} (offset {offset}): {message}")]
pub struct ParseError {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn at(src: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(src.len());
        let before = &src[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
            + 1;
        Self {
            offset,
            line,
            column,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A parsed ad manifest.
///
/// The object literal is held as an ordered [`Object`]; the script text
/// surrounding it (the assignment prefix and anything after the literal) is
/// kept verbatim so the re-emitted statement loads exactly like the original.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub(crate) binding: String,
    pub(crate) prefix: String,
    pub(crate) root: Object,
    pub(crate) suffix: String,
}

impl Manifest {
    /// Wrap a bare object in a `var manifest = ...;` statement.
    pub fn new(root: Object) -> Self {
        Self {
            binding: MANIFEST_BINDING.to_owned(),
            prefix: format!("var {MANIFEST_BINDING} = "),
            root,
            suffix: ";\n".to_owned(),
        }
    }

    /// The variable (possibly dotted) the literal is assigned to.
    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn root(&self) -> &Object {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Object {
        &mut self.root
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn suffix(&self) -> &str {
        &self.suffix
    }
}

fn assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)\s*=\s*\{")
            .expect("valid assignment pattern")
    })
}

/// Locate the object-literal assignment: returns the binding name and the
/// byte offset of the opening brace.
fn locate_literal(src: &str) -> Result<(String, usize), ParseError> {
    let code = mask_comments_and_strings(src);
    let mut first = None;
    for caps in assignment_pattern().captures_iter(&code) {
        let (Some(whole), Some(binding)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let brace = whole.end() - 1;
        let name = binding.as_str().to_owned();
        let last_segment = name.rsplit('.').next().unwrap_or(&name);
        if last_segment == MANIFEST_BINDING {
            return Ok((name, brace));
        }
        if first.is_none() {
            first = Some((name, brace));
        }
    }
    first.ok_or_else(|| ParseError::at(src, 0, "no object literal assignment found"))
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ParseError> {
    let (binding, brace) = locate_literal(input)?;
    let (root, end) = crate::parser::parse_object_literal(input, brace)?;
    Ok(Manifest {
        binding,
        prefix: input[..brace].to_owned(),
        root,
        suffix: input[end..].to_owned(),
    })
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_manifest_str(&content)?)
}
