use std::io::{self, IsTerminal};

/// Abstracts terminal detection so output styling can be controlled in tests.
pub trait TerminalClient {
    /// Returns whether stdout is attached to a terminal.
    fn stdout_is_terminal(&self) -> bool;

    /// Returns whether stderr is attached to a terminal.
    fn stderr_is_terminal(&self) -> bool;
}

/// Terminal client backed by the process's real standard streams.
#[derive(Debug, Default)]
pub(crate) struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
