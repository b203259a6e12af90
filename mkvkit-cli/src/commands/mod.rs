//! CLI subcommand implementations.

pub mod completions;
pub mod edit;
pub mod info;
pub mod remux;

pub use completions::CmdCompletions;
pub use edit::CmdEdit;
pub use info::CmdInfo;
pub use remux::CmdRemux;

/// How a command that did not fail finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Nothing to report.
    Success,
    /// Done, but the input had structural anomalies.
    Warnings,
}

impl Status {
    /// Exit code for a failed command.
    pub const FAILURE_EXIT_CODE: i32 = 2;

    /// `Warnings` when any anomaly was recorded.
    pub fn from_anomalies(count: usize) -> Self {
        if count == 0 {
            Status::Success
        } else {
            Status::Warnings
        }
    }

    /// Process exit code.
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Warnings => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Status::from_anomalies(0).exit_code(), 0);
        assert_eq!(Status::from_anomalies(3).exit_code(), 1);
        assert_eq!(Status::FAILURE_EXIT_CODE, 2);
    }
}
