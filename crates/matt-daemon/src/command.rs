//! Interpretation of control-channel messages.

const QUIT: &str = "quit";

/// Action requested by a single client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop the daemon.
    Terminate,
    /// Journal the message and keep reading.
    LogAndContinue,
}

impl Command {
    /// Maps a message to its action.
    ///
    /// Only the exact, case-sensitive text `quit` terminates; a trailing
    /// `\n` or `\r\n` is ignored. Everything else, empty lines included, is
    /// journalled verbatim.
    #[must_use]
    pub fn interpret(message: &str) -> Self {
        if trim_line_ending(message) == QUIT {
            Self::Terminate
        } else {
            Self::LogAndContinue
        }
    }
}

/// Strips one trailing `\n` or `\r\n`.
#[must_use]
pub fn trim_line_ending(message: &str) -> &str {
    let Some(line) = message.strip_suffix('\n') else {
        return message;
    };
    line.strip_suffix('\r').unwrap_or(line)
}
