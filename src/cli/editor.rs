//! `config edit` support.

use std::path::Path;
use std::process::Command;

use crate::{Error, Result};

/// Command that opens `path` in `editor`, the value of `$EDITOR`.
///
/// The editor may carry its own arguments (`code --wait`).
pub fn editor_command(editor: Option<&str>, path: &Path) -> Result<Command> {
    let mut words = editor.unwrap_or_default().split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| Error::Config("EDITOR must be set".into()))?;
    let mut command = Command::new(program);
    command.args(words).arg(path);
    Ok(command)
}
