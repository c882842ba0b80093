//! User-facing console output, kept separate from the tracing log stream.
//! Progress lines, warnings and interactive confirmations all flow through
//! here so drivers and transformations never print directly.

use std::io::{BufRead, Write};

use colored::Colorize;

/// How interactive confirmation prompts are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    /// Ask on stdin (default when attached to a terminal).
    #[default]
    Interactive,
    /// Answer every prompt with yes (batch runs).
    AssumeYes,
    /// Answer every prompt with no.
    AssumeNo,
}

/// Console handle threaded through the whole migration. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Console {
    verbose: bool,
    confirm: ConfirmMode,
}

impl Console {
    pub fn new(verbose: bool, confirm: ConfirmMode) -> Console {
        Console { verbose, confirm }
    }

    pub fn info(&self, msg: &str) {
        println!("{} {msg}", "INFO:".green().bold());
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{} {msg}", "WARNING:".yellow().bold());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{} {msg}", "ERROR:".red().bold());
    }

    pub fn verbose(&self, msg: &str) {
        if self.verbose {
            println!("{} {msg}", "VERBOSE:".dimmed());
        }
    }

    /// Progress line for the transformation pipeline: `[i/N] Transform <desc>`.
    pub fn progress(&self, index: usize, total: usize, description: &str) {
        println!("{} Transform {description}", format!("[{index:>2}/{total}]").cyan());
    }

    /// Ask a yes/no question. Non-interactive modes answer from configuration.
    pub fn ask_confirm(&self, question: &str) -> bool {
        match self.confirm {
            ConfirmMode::AssumeYes => true,
            ConfirmMode::AssumeNo => false,
            ConfirmMode::Interactive => {
                print!("{} {question} [y/N] ", "PROMPT:".blue().bold());
                let _ = std::io::stdout().flush();
                let mut line = String::new();
                let stdin = std::io::stdin();
                if stdin.lock().read_line(&mut line).is_err() {
                    return false;
                }
                matches!(line.trim(), "y" | "Y" | "yes" | "YES")
            }
        }
    }
}
