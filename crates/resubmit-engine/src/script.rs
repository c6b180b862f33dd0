//! Materialization of submittable job scripts from templates.
//!
//! A template is split into three parts: an optional interpreter line
//! (`#!...` on the first line), a header of directive lines immediately after
//! it, and the body. The header is discarded and replaced with a fresh
//! [`DirectiveSet`], giving the layout:
//!
//! ```text
//! <interpreter line>
//!
//! <directive line>*
//!
//! <body line>*
//! ```
//!
//! The header scan is a single pass that stops at the first line that is
//! neither the interpreter line nor a directive. Directive lines that appear
//! after that point, including after a blank line, are part of the body and
//! are written out unchanged.
//!
//! Lines are split on `\n` only, so a carriage return ending a line of a
//! CRLF template stays part of that line and is written back out with it.

use std::borrow::Cow;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::DirectiveSet;
use crate::Error;
use crate::Result;
use crate::directive::is_directive;

/// The marker that begins an interpreter line.
pub const INTERPRETER_MARKER: &str = "#!";

/// The permissions of scripts written for submission: readable and
/// executable by everyone, writable by the owner.
#[cfg(unix)]
pub(crate) const SCRIPT_MODE: u32 = 0o755;

/// Extra arguments appended to the final command of a script.
///
/// Each entry is rendered as ` --<key> <value>`, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraArgs(IndexMap<String, String>);

impl ExtraArgs {
    /// Creates an empty set of arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an argument, returning the previous value if there was one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> Option<String> {
        self.0.insert(key.into(), value.to_string())
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends the arguments to a command line.
    fn append_to(&self, line: &str) -> String {
        let (command, eol) = match line.strip_suffix('\r') {
            Some(command) => (command, "\r"),
            None => (line, ""),
        };
        let mut extended = command.to_string();
        for (key, value) in &self.0 {
            extended.push_str(" --");
            extended.push_str(key);
            extended.push(' ');
            extended.push_str(value);
        }
        extended.push_str(eol);
        extended
    }
}

impl<K, V> FromIterator<(K, V)> for ExtraArgs
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = Self::new();
        for (key, value) in iter {
            args.insert(key, value);
        }
        args
    }
}

/// A parsed job script template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTemplate {
    /// Where the template was read from.
    path: PathBuf,
    /// The interpreter line, if the first line had one.
    interpreter: Option<String>,
    /// Every line after the directive header.
    body: Vec<String>,
}

impl ScriptTemplate {
    /// Parses a template from its source text.
    pub fn parse(path: impl Into<PathBuf>, source: &str) -> Self {
        let mut lines = source
            .split_inclusive('\n')
            .map(|line| line.strip_suffix('\n').unwrap_or(line))
            .peekable();
        let interpreter = lines
            .next_if(|line| line.starts_with(INTERPRETER_MARKER))
            .map(str::to_string);
        while lines.next_if(|line| is_directive(line)).is_some() {}

        Self {
            path: path.into(),
            interpreter,
            body: lines.map(str::to_string).collect(),
        }
    }

    /// Reads and parses a template from disk.
    pub async fn read(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(path, &source))
    }

    /// The path the template was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The interpreter line, if any.
    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// The body lines.
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Renders the materialized script.
    ///
    /// When `extra_args` is non-empty, the last non-blank body line is taken
    /// to be the program invocation and the arguments are appended to it.
    /// Fails with [`Error::InvalidScript`] if there is no such line.
    pub fn render(
        &self,
        directives: &DirectiveSet,
        extra_args: Option<&ExtraArgs>,
    ) -> Result<String> {
        let body = match extra_args.filter(|args| !args.is_empty()) {
            Some(args) => Cow::Owned(self.body_with_args(args)?),
            None => Cow::Borrowed(&self.body),
        };

        let mut script = String::new();
        if let Some(interpreter) = &self.interpreter {
            script.push_str(interpreter);
            script.push('\n');
        }
        script.push('\n');
        for line in directives.lines() {
            script.push_str(&line);
            script.push('\n');
        }
        script.push('\n');
        for line in body.iter() {
            script.push_str(line);
            script.push('\n');
        }
        Ok(script)
    }

    /// Returns a copy of the body with the invocation line extended.
    fn body_with_args(&self, args: &ExtraArgs) -> Result<Vec<String>> {
        let index = self
            .body
            .iter()
            .rposition(|line| !line.trim().is_empty())
            .ok_or_else(|| Error::InvalidScript {
                path: self.path.clone(),
                reason: "extra arguments require a body ending in a command line".to_string(),
            })?;

        let mut body = self.body.clone();
        body[index] = args.append_to(&body[index]);
        Ok(body)
    }
}

/// Materializes a template into a submittable script at `output_path`.
///
/// Any existing file at `output_path` is overwritten. The script is made
/// executable by everyone.
pub async fn materialize(
    template_path: &Path,
    output_path: &Path,
    directives: &DirectiveSet,
    extra_args: Option<&ExtraArgs>,
) -> Result<()> {
    let template = ScriptTemplate::read(template_path).await?;
    let script = template.render(directives, extra_args)?;

    fs::write(output_path, script)
        .await
        .map_err(|e| Error::io(output_path, e))?;
    set_executable(output_path).await?;

    debug!(
        template = %template_path.display(),
        output = %output_path.display(),
        directives = directives.len(),
        "materialized job script"
    );
    Ok(())
}

/// Sets [`SCRIPT_MODE`] on a script.
pub(crate) async fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    fs::set_permissions(
        path,
        <std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(SCRIPT_MODE),
    )
    .await
    .map_err(|e| Error::io(path, e))?;
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
