// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::Result;
use console::{Style, style};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Editor, Helper};
use std::borrow::Cow;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, warn};

use super::OutputFormat;
use crate::bridge::error::describe;
use crate::session::{FatalSignal, Session, guard};

struct LuaHelper {
    session: Rc<Session>,
}

impl Helper for LuaHelper {}

impl Hinter for LuaHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<Self::Hint> {
        None
    }
}

impl Validator for LuaHelper {
    fn validate(&self, ctx: &mut ValidationContext<'_>) -> rustyline::Result<ValidationResult> {
        if self.session.is_incomplete(ctx.input()) {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

/// Start of the identifier path ending at the cursor, e.g. `pods().first` -> `first`
fn word_start(line_to_cursor: &str) -> usize {
    line_to_cursor
        .rfind(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.' || c == ':'))
        .map(|i| i + 1)
        .unwrap_or(0)
}

impl LuaHelper {
    fn candidates(&self, word: &str) -> (usize, Vec<String>) {
        match word.rfind(['.', ':']) {
            // `p:fi` completes members of the global `p`
            Some(sep) => {
                let owner = &word[..sep];
                let prefix = &word[sep + 1..];
                let names = if owner.contains(['.', ':']) {
                    Vec::new()
                } else {
                    self.session.member_names(owner)
                };
                (
                    sep + 1,
                    names.into_iter().filter(|n| n.starts_with(prefix)).collect(),
                )
            }
            None => (
                0,
                self.session
                    .global_names()
                    .into_iter()
                    .filter(|n| n.starts_with(word))
                    .collect(),
            ),
        }
    }
}

impl Completer for LuaHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];
        let start = word_start(line_to_cursor);
        let word = &line_to_cursor[start..];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let (offset, names) = self.candidates(word);
        let matches = names
            .into_iter()
            .map(|name| Pair {
                display: name.clone(),
                replacement: name,
            })
            .collect();
        Ok((start + offset, matches))
    }
}

impl Highlighter for LuaHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        _default: bool,
    ) -> Cow<'b, str> {
        Cow::Owned(style(prompt).green().bold().to_string())
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        false
    }
}

fn prompt(session: &Session) -> String {
    format!("kubelua (namespace=\"{}\")> ", session.namespace())
}

fn print_welcome(context: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "{} {} - Lua shell for Kubernetes",
        style("kubelua").cyan().bold(),
        style(format!("v{}", version)).dim()
    );
    println!(
        "{}",
        style("Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>").dim()
    );
    println!("{}", style(format!("Connected to context {}", context)).dim());
    println!(
        "{}",
        style("Type 'help' for examples, Ctrl+D to exit").dim()
    );
    println!();
}

fn print_help() {
    let help_style = Style::new().cyan();
    let cmd_style = Style::new().yellow();

    println!("{}", help_style.apply_to("Queries:"));
    println!("  {} - Pods in the session namespace", cmd_style.apply_to("pods()"));
    println!("  {} - Name glob, optionally namespaced", cmd_style.apply_to("pods(\"kube-system/core*\")"));
    println!("  {} - Label selector block", cmd_style.apply_to("pods(function(q) q.app:is(\"web\") end)"));
    println!("  {} - Label and field selectors", cmd_style.apply_to("pods{ labels = \"tier=db\", fields = \"status.phase=Running\" }"));
    println!("  {} - Single object by name", cmd_style.apply_to("deployment(\"shop/web\")"));
    println!();
    println!("{}", help_style.apply_to("Results:"));
    println!("  {} - Index, first, last or a random item", cmd_style.apply_to("p[0]  p:first()  p:last()  p:any()"));
    println!("  {} - Printing", cmd_style.apply_to("p:table()  p:names()  p:to_yaml()"));
    println!("  {} - Pods managed by an object", cmd_style.apply_to("deployment(\"web\"):pods()"));
    println!("  {} - Pod logs", cmd_style.apply_to("pod(\"web-1\"):logs():grep(\"ERROR\")"));
    println!();
    println!("{}", help_style.apply_to("Session:"));
    println!("  {} - Show or switch namespace (\"*\" for all)", cmd_style.apply_to("namespace(\"shop\")"));
    println!("  {} - Last result", cmd_style.apply_to("_"));
    println!("  {} - Quit", cmd_style.apply_to("quit"));
    println!();
}

pub struct ReplOptions {
    pub context: String,
    pub output: OutputFormat,
    pub history_path: Option<PathBuf>,
    pub history_size: usize,
}

/// Evaluate and print one chunk; only a panic escapes as an error
pub fn run_chunk(session: &Session, input: &str, output: &OutputFormat) -> std::result::Result<(), FatalSignal> {
    guard(|| match session.eval(input, "=stdin") {
        Ok(values) => {
            match session.render(&values, output) {
                Ok(lines) => {
                    for line in lines {
                        println!("{}", line);
                    }
                }
                Err(e) => println!("{} {}", style("Error:").red().bold(), style(e).red()),
            }
            if let Err(e) = session.set_last(&values) {
                debug!(error = %e, "Could not store last result");
            }
        }
        Err(e) => {
            println!("{} {}", style("Error:").red().bold(), style(describe(&e)).red());
        }
    })
}

/// Run the interactive loop; returns the panic that ended it, if any
pub fn run_repl(session: Rc<Session>, options: ReplOptions) -> Result<Option<FatalSignal>> {
    let helper = LuaHelper {
        session: Rc::clone(&session),
    };
    let config = rustyline::Config::builder()
        .auto_add_history(true)
        .max_history_size(options.history_size)?
        .build();

    let mut rl: Editor<LuaHelper, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(helper));

    if let Some(path) = &options.history_path
        && rl.load_history(path).is_err()
    {
        debug!(path = %path.display(), "No history loaded");
    }

    print_welcome(&options.context);

    let mut fatal = None;
    loop {
        match rl.readline(&prompt(&session)) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                match input {
                    "quit" | "exit" => {
                        println!("{}", style("Goodbye!").dim());
                        break;
                    }
                    "help" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                if let Err(signal) = run_chunk(&session, input, &options.output) {
                    eprintln!(
                        "{} {}",
                        style("Fatal:").red().bold(),
                        style(&signal.0).red()
                    );
                    fatal = Some(signal);
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", style("^C (type 'quit' or press Ctrl+D to exit)").dim());
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}", style("Goodbye!").dim());
                break;
            }
            Err(err) => {
                println!("{} {:?}", style("Error:").red().bold(), err);
                break;
            }
        }
    }

    if let Some(path) = &options.history_path
        && let Err(e) = rl.save_history(path)
    {
        warn!(path = %path.display(), error = %e, "Could not save history");
    }

    Ok(fatal)
}
