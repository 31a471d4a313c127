//! Typed job script builder.
//!
//! A [`Script`] is an ordered list of [`Step`]s. Values stay structured until
//! [`Script::render`], which quotes every interpolated value for a POSIX shell
//! and chains the steps with `&&` so the first failing step stops the job.

use std::fmt;
use std::path::PathBuf;

use crate::CoreError;

const SHEBANG: &str = "#!/usr/bin/env bash";
const CONTINUATION: &str = " \\\n";

/// A named argument passed to the training entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    /// `--name=value`
    Long { name: String, value: String },
    /// Hydra-style `key=value` override.
    Override { key: String, value: String },
}

impl Flag {
    pub fn long(name: impl Into<String>, value: impl ToString) -> Self {
        Self::Long {
            name: name.into(),
            value: value.to_string(),
        }
    }

    pub fn set(key: impl Into<String>, value: impl ToString) -> Self {
        Self::Override {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Parse a user-supplied `key=value` override.
    pub fn parse_override(raw: &str) -> Result<Self, CoreError> {
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(Self::set(key.trim(), value))
            }
            _ => Err(CoreError::InvalidOverride(raw.to_string())),
        }
    }

    /// The flag name or override key.
    pub fn key(&self) -> &str {
        match self {
            Self::Long { name, .. } => name,
            Self::Override { key, .. } => key,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Long { value, .. } | Self::Override { value, .. } => value,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Long { name, value } => shell_escape(&format!("--{name}={value}")),
            Self::Override { key, value } => shell_escape(&format!("{key}={value}")),
        }
    }
}

/// One step of the job script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Print a progress marker to the job log.
    Echo(String),
    /// Log in to the tracking service with a token read from an exported variable.
    Authenticate { command: String, token_var: String },
    /// `export NAME=value`
    Export { name: String, value: String },
    /// Prepend an entry to a colon-separated search path, keeping any inherited value.
    PrependPath { name: String, entry: String },
    /// `cd dir`
    ChangeDir(PathBuf),
    /// Run a program with its flags.
    Invoke { program: Vec<String>, flags: Vec<Flag> },
}

impl Step {
    pub fn echo(message: impl Into<String>) -> Self {
        Self::Echo(message.into())
    }

    pub fn authenticate(
        command: impl Into<String>,
        token_var: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let token_var = token_var.into();
        check_env_name(&token_var)?;
        Ok(Self::Authenticate {
            command: command.into(),
            token_var,
        })
    }

    pub fn export(name: impl Into<String>, value: impl ToString) -> Result<Self, CoreError> {
        let name = name.into();
        check_env_name(&name)?;
        Ok(Self::Export {
            name,
            value: value.to_string(),
        })
    }

    pub fn prepend_path(
        name: impl Into<String>,
        entry: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        check_env_name(&name)?;
        Ok(Self::PrependPath {
            name,
            entry: entry.into(),
        })
    }

    pub fn change_dir(dir: impl Into<PathBuf>) -> Self {
        Self::ChangeDir(dir.into())
    }

    pub fn invoke<I, S>(program: I, flags: Vec<Flag>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Invoke {
            program: program.into_iter().map(Into::into).collect(),
            flags,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Echo(message) => format!("echo {}", shell_escape(message)),
            Self::Authenticate { command, token_var } => {
                let words: Vec<String> = command.split_whitespace().map(shell_escape).collect();
                format!("{} \"${token_var}\"", words.join(" "))
            }
            Self::Export { name, value } => format!("export {name}={}", shell_escape(value)),
            Self::PrependPath { name, entry } => {
                format!("export {name}={}\"${{{name}:+:${name}}}\"", shell_escape(entry))
            }
            Self::ChangeDir(dir) => format!("cd {}", shell_escape(&dir.to_string_lossy())),
            Self::Invoke { program, flags } => {
                let mut out = program
                    .iter()
                    .map(|word| shell_escape(word))
                    .collect::<Vec<_>>()
                    .join(" ");
                for flag in flags {
                    out.push_str(CONTINUATION);
                    out.push_str("    ");
                    out.push_str(&flag.render());
                }
                out
            }
        }
    }
}

/// Rendered-on-demand job script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Flags of the first `Invoke` step, if any.
    pub fn invocation_flags(&self) -> Option<&[Flag]> {
        self.steps.iter().find_map(|step| match step {
            Step::Invoke { flags, .. } => Some(flags.as_slice()),
            _ => None,
        })
    }

    /// Render to a bash script body.
    pub fn render(&self) -> String {
        let mut out = String::from(SHEBANG);
        out.push('\n');
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                out.push_str(CONTINUATION);
                out.push_str("&& ");
            }
            out.push_str(&step.render());
        }
        out.push('\n');
        out
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Minimal POSIX shell quoting: safe words pass through, everything else is
/// wrapped in single quotes.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:@=,+%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Whether `name` is usable as a shell variable name.
pub fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_env_name(name: &str) -> Result<(), CoreError> {
    if is_env_name(name) {
        Ok(())
    } else {
        Err(CoreError::InvalidEnvName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("plain-word_1.0"), "plain-word_1.0");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("two words"), "'two words'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_env_names() {
        assert!(is_env_name("CUDA_VISIBLE_DEVICES"));
        assert!(is_env_name("_x1"));
        assert!(!is_env_name("1X"));
        assert!(!is_env_name("A-B"));
        assert!(!is_env_name(""));
        assert_eq!(
            Step::export("BAD NAME", "x"),
            Err(CoreError::InvalidEnvName("BAD NAME".to_string()))
        );
    }

    #[test]
    fn test_render_chains_steps() {
        let script = Script::new()
            .step(Step::echo("start"))
            .step(Step::authenticate("wandb login", "WANDB").unwrap())
            .step(Step::export("HYDRA_FULL_ERROR", 1).unwrap())
            .step(Step::prepend_path("PYTHONPATH", "/code").unwrap())
            .step(Step::change_dir("/code/examples/chem"))
            .step(Step::invoke(
                ["python", "train.py"],
                vec![Flag::long("config-path", "conf"), Flag::set("trainer.gpus", 2)],
            ));

        let expected = "#!/usr/bin/env bash\n\
echo start \\\n\
&& wandb login \"$WANDB\" \\\n\
&& export HYDRA_FULL_ERROR=1 \\\n\
&& export PYTHONPATH=/code\"${PYTHONPATH:+:$PYTHONPATH}\" \\\n\
&& cd /code/examples/chem \\\n\
&& python train.py \\\n    --config-path=conf \\\n    trainer.gpus=2\n";
        assert_eq!(script.render(), expected);
    }

    #[test]
    fn test_values_are_quoted() {
        let script = Script::new().step(Step::invoke(
            ["python", "train.py"],
            vec![Flag::set("exp_manager.name", "my run; rm -rf /")],
        ));
        assert!(script
            .render()
            .contains("'exp_manager.name=my run; rm -rf /'"));
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            Flag::parse_override("trainer.max_steps=1000").unwrap(),
            Flag::set("trainer.max_steps", "1000")
        );
        assert_eq!(
            Flag::parse_override("model.name=a=b").unwrap().value(),
            "a=b"
        );
        assert!(Flag::parse_override("no_equals").is_err());
        assert!(Flag::parse_override("=value").is_err());
    }

    #[test]
    fn test_invocation_flags() {
        let script = Script::new()
            .step(Step::echo("x"))
            .step(Step::invoke(["python"], vec![Flag::set("a", "b")]));
        assert_eq!(script.invocation_flags().unwrap().len(), 1);
        assert!(Script::new().invocation_flags().is_none());
    }
}
