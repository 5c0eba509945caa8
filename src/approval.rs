//! Operator approval for generated commands.
//!
//! A candidate command is shown to the operator, who may execute it, edit it,
//! copy it to the clipboard, or cancel.  Editing replaces the candidate and
//! shows it again; every other choice ends the loop.  A command runs at most
//! once per loop.

use crate::error::Result;
use crate::executor::Executor;
use crate::observability::{
    APPROVAL_CANCELLATIONS, APPROVAL_COPIES, APPROVAL_EDITS, APPROVAL_EXECUTIONS,
};
use crate::render::Renderer;

/// Prompt shown when asking for a decision.
pub const APPROVAL_PROMPT: &str = "Execute? [Y/n/e/c] ";

/// Prompt shown while editing a candidate.
pub const EDIT_PROMPT: &str = "Edit: ";

/// Source of operator decisions.
///
/// Both methods return `Ok(None)` when the operator ends input or
/// interrupts.
pub trait Operator {
    /// Reads one line in answer to the approval prompt.
    fn read_choice(&mut self) -> Result<Option<String>>;

    /// Lets the operator edit `prefill` and returns the edited line.
    fn edit_line(&mut self, prefill: &str) -> Result<Option<String>>;
}

/// A place to copy commands to.
pub trait Clipboard {
    /// Replaces the clipboard contents with `text`.
    fn copy(&mut self, text: &str) -> Result<()>;
}

/// A decision entered at the approval prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Run the candidate.
    Execute,
    /// Do nothing.
    Decline,
    /// Edit the candidate.
    Edit,
    /// Copy the candidate to the clipboard.
    Copy,
    /// Unrecognized input.
    Invalid(String),
}

impl Choice {
    /// Interprets operator input, ignoring case and surrounding whitespace.
    pub fn parse(input: &str) -> Self {
        let input = input.trim().to_lowercase();
        match input.as_str() {
            "" | "y" | "yes" => Choice::Execute,
            "n" | "no" => Choice::Decline,
            "e" | "edit" => Choice::Edit,
            "c" | "copy" => Choice::Copy,
            _ => Choice::Invalid(input),
        }
    }
}

/// Why a loop ended without running or copying anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The operator answered no.
    Declined,
    /// The operator aborted an edit.
    EditAborted,
    /// The operator entered something unrecognized.
    InvalidOption(String),
    /// Input ended or was interrupted at the approval prompt.
    EndOfInput,
}

/// Where the loop is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalState {
    /// The candidate is shown and a decision is pending.
    Presented(String),
    /// The candidate was approved.
    Executing(String),
    /// Nothing will run.
    Cancelled(CancelReason),
    /// The candidate was placed on the clipboard.
    Copied(String),
}

/// How a successful loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// The command ran and exited successfully.
    Executed(String),
    /// The command was copied to the clipboard.
    Copied(String),
    /// Nothing ran.
    Cancelled(CancelReason),
}

/// Drives one candidate through operator approval.
pub struct ApprovalLoop<'a> {
    operator: &'a mut dyn Operator,
    clipboard: &'a mut dyn Clipboard,
    executor: &'a mut dyn Executor,
}

impl<'a> ApprovalLoop<'a> {
    /// Creates a loop over the given operator, clipboard and executor.
    pub fn new(
        operator: &'a mut dyn Operator,
        clipboard: &'a mut dyn Clipboard,
        executor: &'a mut dyn Executor,
    ) -> Self {
        Self {
            operator,
            clipboard,
            executor,
        }
    }

    /// Runs the loop for `candidate`.
    ///
    /// Failures from the executor, clipboard or line editor end the loop and
    /// are returned as-is.
    pub fn run(&mut self, candidate: String, renderer: &mut dyn Renderer) -> Result<ApprovalOutcome> {
        let mut state = ApprovalState::Presented(candidate);
        loop {
            state = match state {
                ApprovalState::Presented(candidate) => self.present(candidate, renderer)?,
                ApprovalState::Executing(command) => {
                    APPROVAL_EXECUTIONS.click();
                    renderer.print_info("Executing...");
                    self.executor.run(&command)?;
                    renderer.print_success("✓ Executed");
                    return Ok(ApprovalOutcome::Executed(command));
                }
                ApprovalState::Copied(command) => {
                    APPROVAL_COPIES.click();
                    renderer.print_success("Copied to clipboard");
                    return Ok(ApprovalOutcome::Copied(command));
                }
                ApprovalState::Cancelled(reason) => {
                    APPROVAL_CANCELLATIONS.click();
                    match &reason {
                        CancelReason::InvalidOption(_) => {
                            renderer.print_info("Invalid option, cancelled")
                        }
                        _ => renderer.print_info("Cancelled"),
                    }
                    return Ok(ApprovalOutcome::Cancelled(reason));
                }
            };
        }
    }

    fn present(&mut self, candidate: String, renderer: &mut dyn Renderer) -> Result<ApprovalState> {
        renderer.print_command(&candidate);
        let Some(input) = self.operator.read_choice()? else {
            return Ok(ApprovalState::Cancelled(CancelReason::EndOfInput));
        };
        let next = match Choice::parse(&input) {
            Choice::Execute => ApprovalState::Executing(candidate),
            Choice::Decline => ApprovalState::Cancelled(CancelReason::Declined),
            Choice::Edit => {
                APPROVAL_EDITS.click();
                match self.operator.edit_line(&candidate)? {
                    None => ApprovalState::Cancelled(CancelReason::EditAborted),
                    Some(edited) => {
                        let edited = edited.trim();
                        if edited.is_empty() {
                            ApprovalState::Presented(candidate)
                        } else {
                            tracing::debug!(from = %candidate, to = %edited, "candidate edited");
                            ApprovalState::Presented(edited.to_string())
                        }
                    }
                }
            }
            Choice::Copy => {
                self.clipboard.copy(&candidate)?;
                ApprovalState::Copied(candidate)
            }
            Choice::Invalid(input) => ApprovalState::Cancelled(CancelReason::InvalidOption(input)),
        };
        Ok(next)
    }
}
