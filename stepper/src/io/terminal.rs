//! Line-oriented host for the CLI.

use std::io::{self, BufRead, StdinLock, Stdout, Write};

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::{PromptChoice, PromptRequest};
use crate::host::Host;

/// Echoes symbolic steps to `output` and reads ask-mode answers from `input`.
pub struct TerminalHost<R, W> {
    input: R,
    output: W,
}

impl TerminalHost<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalHost<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn ask(&mut self, request: &PromptRequest) -> Result<PromptChoice> {
        loop {
            write!(
                self.output,
                "{}\n{}\n[s]tep / [c]ontinue / [q]uit: ",
                request.title, request.text
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(PromptChoice::Cancel);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" | "s" | "step" => return Ok(PromptChoice::Step),
                "c" | "continue" => return Ok(PromptChoice::Continue),
                "q" | "quit" | "cancel" => return Ok(PromptChoice::Cancel),
                other => writeln!(self.output, "unknown answer {other:?}")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Host for TerminalHost<R, W> {
    fn execute_symbolic(&mut self, token: &str) -> Result<()> {
        writeln!(self.output, "{token}").context("write symbolic step")?;
        Ok(())
    }

    fn prompt(&mut self, request: &PromptRequest) -> PromptChoice {
        self.ask(request).unwrap_or_else(|err| {
            warn!(error = %err, "prompt failed; cancelling");
            PromptChoice::Cancel
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PromptRequest {
        PromptRequest {
            title: "Step 1/2".to_string(),
            text: "Keys A".to_string(),
        }
    }

    #[test]
    fn answers_map_to_choices() {
        let mut host = TerminalHost::new("wat\nc\n".as_bytes(), Vec::new());
        assert_eq!(host.prompt(&request()), PromptChoice::Continue);
        let out = String::from_utf8(host.into_output()).expect("utf8");
        assert!(out.starts_with("Step 1/2\nKeys A\n"));
        assert!(out.contains("unknown answer \"wat\""));
    }

    #[test]
    fn empty_line_steps_and_eof_cancels() {
        let mut host = TerminalHost::new("\n".as_bytes(), Vec::new());
        assert_eq!(host.prompt(&request()), PromptChoice::Step);
        assert_eq!(host.prompt(&request()), PromptChoice::Cancel);
    }

    #[test]
    fn symbolic_steps_are_echoed() {
        let mut host = TerminalHost::new(io::empty(), Vec::new());
        host.execute_symbolic("Keys F7").expect("echo");
        assert_eq!(host.into_output(), b"Keys F7\n");
    }
}
