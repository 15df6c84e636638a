//! Command templates and blocking subprocess execution
//!
//! Templates are split like a POSIX shell would split them, then each word
//! has `$NAME` / `${NAME}` placeholders substituted. Substitution happens
//! after splitting, so values containing spaces or quotes stay a single
//! argument and are never re-interpreted by a shell. `$$` is a literal `$`.

use crate::error::{InstacloneError, InstacloneResult};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::debug;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|([A-Za-z_][A-Za-z0-9_]*)|\{([A-Za-z_][A-Za-z0-9_]*)\}|)")
            .expect("placeholder pattern is valid")
    })
}

/// Build a variable map from the process environment plus explicit bindings
pub fn env_with(bindings: &[(&str, &str)]) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    for (key, value) in bindings {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    vars
}

/// Substitute placeholders in a single word
fn expand_word(
    template: &str,
    word: &str,
    vars: &HashMap<String, String>,
) -> InstacloneResult<String> {
    let mut failure = None;
    let expanded = placeholder_re().replace_all(word, |caps: &Captures| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }
        match caps.get(2).or_else(|| caps.get(3)) {
            Some(name) => match vars.get(name.as_str()) {
                Some(value) => value.clone(),
                None => {
                    failure.get_or_insert_with(|| format!("undefined variable ${}", name.as_str()));
                    String::new()
                }
            },
            None => {
                failure.get_or_insert_with(|| {
                    "invalid placeholder (use $$ for a literal $)".to_string()
                });
                String::new()
            }
        }
    });

    match failure {
        Some(reason) => Err(InstacloneError::TemplateInvalid {
            template: template.to_string(),
            reason,
        }),
        None => Ok(expanded.into_owned()),
    }
}

/// Expand a template like `cp $LOCAL $REMOTE` into an argument vector
pub fn expand_to_argv(
    template: &str,
    vars: &HashMap<String, String>,
) -> InstacloneResult<Vec<String>> {
    let words = shell_words::split(template).map_err(|e| InstacloneError::TemplateInvalid {
        template: template.to_string(),
        reason: e.to_string(),
    })?;

    if words.is_empty() {
        return Err(InstacloneError::TemplateInvalid {
            template: template.to_string(),
            reason: "empty command".to_string(),
        });
    }

    words
        .iter()
        .map(|word| expand_word(template, word, vars))
        .collect()
}

/// Render an argument vector for logs and error messages
pub fn display_argv(argv: &[String]) -> String {
    shell_words::join(argv)
}

fn build_command(argv: &[String]) -> InstacloneResult<Command> {
    let (program, args) = argv.split_first().ok_or_else(|| InstacloneError::TemplateInvalid {
        template: String::new(),
        reason: "empty command".to_string(),
    })?;
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    Ok(command)
}

/// Run a command to completion, with its output sent to our stderr.
///
/// A nonzero exit is `CommandExit`; failure to start is `CommandFailed`.
pub fn run(argv: &[String]) -> InstacloneResult<()> {
    let shown = display_argv(argv);
    debug!("Executing: {}", shown);

    let status = build_command(argv)?
        .stdout(std::io::stderr())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| InstacloneError::command_failed(shown.clone(), e))?;

    if status.success() {
        Ok(())
    } else {
        Err(InstacloneError::CommandExit {
            command: shown,
            status: status.to_string(),
        })
    }
}

/// Run a command and capture its stdout
pub fn output(argv: &[String]) -> InstacloneResult<String> {
    let shown = display_argv(argv);
    debug!("Executing for output: {}", shown);

    let output = build_command(argv)?
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| InstacloneError::command_failed(shown.clone(), e))?;

    if !output.status.success() {
        return Err(InstacloneError::CommandExit {
            command: shown,
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
