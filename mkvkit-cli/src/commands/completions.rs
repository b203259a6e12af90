//! Shell completion generation command.

use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};
use std::io;

/// Generate shell completions.
#[derive(Args, Debug)]
pub struct CmdCompletions {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CmdCompletions {
    /// Execute the completions command.
    pub fn run<C: CommandFactory>(&self) -> anyhow::Result<()> {
        let mut cmd = C::command();
        generate(self.shell, &mut cmd, "mkvkit", &mut io::stdout());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    #[command(name = "test")]
    struct TestCli {
        #[command(subcommand)]
        command: Option<TestCommands>,
    }

    #[derive(clap::Subcommand)]
    enum TestCommands {
        Completions(CmdCompletions),
    }

    #[test]
    fn test_shell_argument_parses() {
        let cli = TestCli::try_parse_from(["test", "completions", "zsh"]).unwrap();
        let Some(TestCommands::Completions(cmd)) = cli.command else {
            panic!("expected completions");
        };
        assert_eq!(cmd.shell, Shell::Zsh);
    }

    #[test]
    fn test_generated_script_names_binary() {
        let mut cmd = TestCli::command();
        let mut out = Vec::new();
        generate(Shell::Bash, &mut cmd, "mkvkit", &mut out);
        assert!(String::from_utf8(out).unwrap().contains("mkvkit"));
    }
}
