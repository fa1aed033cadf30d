//! Parsing of the line commands read from stdin.

use anyhow::{Context, Result, anyhow, bail};

pub const HELP: &str = "\
commands:
  add <text>                  create a task
  done <n> | undo <n>         mark row n complete / incomplete
  rename <n> <text>           change the text of row n
  due <n> <minutes|none>      set or clear the deadline of row n
  rm <n>                      delete row n
  login <user> | logout       switch identity
  list                        print the list
  fail                        make the next write fail
  help | quit";

/// A parsed command. Rows are 1-based, as printed.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Done { row: usize, completed: bool },
    Rename { row: usize, text: String },
    Due { row: usize, minutes: Option<u64> },
    Remove(usize),
    Login(String),
    Logout,
    List,
    Fail,
    Help,
    Quit,
}

fn row(arg: &str) -> Result<usize> {
    let n: usize = arg.parse().with_context(|| format!("not a row number: {arg:?}"))?;
    if n == 0 {
        bail!("rows are numbered from 1");
    }
    Ok(n)
}

/// Split `"<n> <rest>"`.
fn row_and_rest(args: &str) -> Result<(usize, &str)> {
    let (n, rest) = args.split_once(char::is_whitespace).ok_or_else(|| anyhow!("missing argument"))?;
    Ok((row(n)?, rest.trim()))
}

pub fn parse(line: &str) -> Result<Command> {
    let line = line.trim();
    let (verb, args) = match line.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "add" => Command::Add(args.to_string()),
        "done" => Command::Done { row: row(args)?, completed: true },
        "undo" => Command::Done { row: row(args)?, completed: false },
        "rename" => {
            let (row, text) = row_and_rest(args)?;
            Command::Rename { row, text: text.to_string() }
        }
        "due" => {
            let (row, when) = row_and_rest(args)?;
            let minutes = match when {
                "none" => None,
                m => Some(m.parse().with_context(|| format!("not a number of minutes: {m:?}"))?),
            };
            Command::Due { row, minutes }
        }
        "rm" => Command::Remove(row(args)?),
        "login" if !args.is_empty() => Command::Login(args.to_string()),
        "login" => bail!("usage: login <user>"),
        "logout" => Command::Logout,
        "list" | "ls" => Command::List,
        "fail" => Command::Fail,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command {other:?} (try `help`)"),
    };
    Ok(command)
}
