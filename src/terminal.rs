//! Interactive terminal adapters for the approval loop.

use std::time::Duration;
#[cfg(target_os = "linux")]
use std::time::Instant;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::approval::{APPROVAL_PROMPT, Clipboard, EDIT_PROMPT, Operator};
use crate::error::{Error, Result};

/// Reads operator decisions with rustyline.
pub struct RustylineOperator {
    editor: DefaultEditor,
}

impl RustylineOperator {
    /// Creates an operator bound to the controlling terminal.
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().map_err(readline_error)?;
        Ok(Self { editor })
    }

    /// Reads one line after `prompt`, recording non-empty lines in history.
    pub fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        let line = read(self.editor.readline(prompt))?;
        if let Some(line) = &line
            && !line.trim().is_empty()
        {
            let _ = self.editor.add_history_entry(line.trim());
        }
        Ok(line)
    }
}

fn readline_error(err: ReadlineError) -> Error {
    Error::edit(format!("line editor failed: {err}"), Some(Box::new(err)))
}

fn read(result: std::result::Result<String, ReadlineError>) -> Result<Option<String>> {
    match result {
        Ok(line) => Ok(Some(line)),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(err) => Err(readline_error(err)),
    }
}

impl Operator for RustylineOperator {
    fn read_choice(&mut self) -> Result<Option<String>> {
        read(self.editor.readline(APPROVAL_PROMPT))
    }

    fn edit_line(&mut self, prefill: &str) -> Result<Option<String>> {
        read(self.editor.readline_with_initial(EDIT_PROMPT, (prefill, "")))
    }
}

/// The desktop clipboard.
///
/// The handle is opened on first use and kept for as long as this value
/// lives.  On X11 and Wayland copied text disappears with its owner, so a
/// process that exits right after copying should use [`Self::holding_for`].
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
    hold: Option<Duration>,
}

impl SystemClipboard {
    /// Creates a clipboard that connects lazily.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes each copy keep ownership of the text for up to `hold`, returning
    /// early if another program takes the clipboard over.  Only Linux
    /// desktops need this; elsewhere the text is handed to the system.
    pub fn holding_for(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Returns how long each copy keeps ownership, if at all.
    pub fn hold(&self) -> Option<Duration> {
        self.hold
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&mut self, text: &str) -> Result<()> {
        let clipboard = match self.inner.take() {
            Some(clipboard) => clipboard,
            None => arboard::Clipboard::new().map_err(|err| Error::clipboard(err.to_string()))?,
        };
        let clipboard = self.inner.insert(clipboard);
        set_text(clipboard, text, self.hold).map_err(|err| Error::clipboard(err.to_string()))
    }
}

#[cfg(target_os = "linux")]
fn set_text(
    clipboard: &mut arboard::Clipboard,
    text: &str,
    hold: Option<Duration>,
) -> std::result::Result<(), arboard::Error> {
    use arboard::SetExtLinux;

    match hold {
        Some(hold) => clipboard
            .set()
            .wait_until(Instant::now() + hold)
            .text(text),
        None => clipboard.set_text(text),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_text(
    clipboard: &mut arboard::Clipboard,
    text: &str,
    _hold: Option<Duration>,
) -> std::result::Result<(), arboard::Error> {
    clipboard.set_text(text)
}
