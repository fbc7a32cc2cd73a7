// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use confik::stage::{self, StageOptions};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "confik")]
#[command(
    author,
    version,
    about = "Stage .config files into the project root while a command runs",
    long_about = "Stage .config files into the project root while a command runs.\n\n\
                  Staged files are removed again when the command exits or the run is \
                  interrupted. Without a command, files stay staged until Ctrl-C."
)]
struct Cli {
    /// Show what would be staged without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Remove leftovers of a previous run and exit
    #[arg(long)]
    clean: bool,

    /// Do not hide staged files via .git/info/exclude
    #[arg(long)]
    no_gitignore: bool,

    /// Stage files even if the built-in registry lists them
    #[arg(long)]
    no_registry: bool,

    /// Command to run while files are staged, with its arguments
    #[arg(num_args = 1.., trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn stage_options(&self) -> StageOptions {
        StageOptions {
            dry_run: self.dry_run,
            gitignore: !self.no_gitignore,
            registry: !self.no_registry,
        }
    }
}

fn main() {
    // Logs go to stderr so they never mix with the command's stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CONFIK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    debug!("Parsed arguments: {:?}", cli);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("confik: {e}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let root = std::env::current_dir().context("failed to determine current directory")?;

    if cli.clean {
        stage::clean(&root)?;
        return Ok(0);
    }

    Ok(stage::run(&root, &cli.stage_options(), &cli.command)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_command() {
        let cli = Cli::try_parse_from(["confik", "--dry-run", "--no-registry", "npm", "test"]).unwrap();
        assert!(cli.dry_run);
        assert!(!cli.clean);
        assert_eq!(cli.command, vec!["npm", "test"]);

        let options = cli.stage_options();
        assert!(options.dry_run);
        assert!(options.gitignore);
        assert!(!options.registry);
    }

    #[test]
    fn test_command_arguments_keep_hyphens() {
        let cli = Cli::try_parse_from(["confik", "eslint", "--fix", "-c", "x", "--dry-run"]).unwrap();
        assert!(!cli.dry_run, "flags after the command belong to the command");
        assert_eq!(cli.command, vec!["eslint", "--fix", "-c", "x", "--dry-run"]);
    }

    #[test]
    fn test_double_dash_ends_options() {
        let cli = Cli::try_parse_from(["confik", "--no-gitignore", "--", "--weird-binary", "arg"]).unwrap();
        assert!(cli.no_gitignore);
        assert_eq!(cli.command, vec!["--weird-binary", "arg"]);
    }

    #[test]
    fn test_standalone_and_clean() {
        let cli = Cli::try_parse_from(["confik"]).unwrap();
        assert!(cli.command.is_empty());

        let cli = Cli::try_parse_from(["confik", "--clean"]).unwrap();
        assert!(cli.clean);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        assert!(Cli::try_parse_from(["confik", "--bogus", "npm"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
