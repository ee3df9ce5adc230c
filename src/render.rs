//! Note rendering
//!
//! Turns a [`Note`] into the lines written into a timeline buffer. The
//! `<mk-*>` tags are concealed by the editor's syntax file.

use crate::note::{AuthorKind, Note};

/// Marker prepended to every line of a quoted note
pub const QUOTE_MARKER: &str = " │ ";

/// Render a note into display lines, each prefixed with `prefix`
///
/// Quoted notes are rendered recursively below the outer body, one
/// [`QUOTE_MARKER`] deeper per level.
pub fn render(note: &Note, prefix: &str) -> Vec<String> {
    let mut lines = vec![header(note), String::new()];

    if let Some(text) = note.text.as_deref().filter(|text| !text.is_empty()) {
        lines.extend(text.split('\n').map(|line| format!("  {}", line)));
        lines.push(String::new());
    }

    if let Some(ref renote) = note.renote {
        lines.extend(render(renote, QUOTE_MARKER));
        lines.push(String::new());
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines
        .into_iter()
        .map(|line| format!("{}{}", prefix, line))
        .collect()
}

fn glyph(kind: AuthorKind) -> &'static str {
    match kind {
        AuthorKind::Cat => "🐱",
        AuthorKind::Automated => "🤖",
        AuthorKind::Person => "👤",
    }
}

fn header(note: &Note) -> String {
    let user = &note.user;
    let mut line = format!(
        "<mk-name>{} {}</mk-name> <mk-username>@{}</mk-username>",
        glyph(user.kind()),
        user.name.as_deref().unwrap_or(""),
        user.username
    );

    if let Some(ref host) = user.host {
        line.push_str(&format!("<mk-host>@{}</mk-host>", host));
    }

    line
}
