//! External program invocation with templated arguments.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::EngineError;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"))
}

/// An external program and its argument template.
///
/// Arguments may contain `{name}` placeholders that are filled in per job,
/// e.g. `["writeSigmaFile.pl", "{sth}", "{fls}", "{validity}", "{mode}"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandLine {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CommandLine {
    pub fn new<P: Into<PathBuf>>(program: P, args: &[&str]) -> Self {
        CommandLine {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    /// Placeholder names used by the argument template.
    pub fn placeholders(&self) -> Vec<String> {
        self.args
            .iter()
            .flat_map(|arg| placeholder().captures_iter(arg))
            .map(|caps| caps[1].to_owned())
            .collect()
    }

    /// Substitutes every placeholder. Unknown placeholders are an error.
    pub fn expand(&self, vars: &HashMap<&str, String>) -> Result<Vec<String>, EngineError> {
        self.args
            .iter()
            .map(|arg| {
                let mut missing = None;
                let expanded = placeholder().replace_all(arg, |caps: &regex::Captures| {
                    match vars.get(&caps[1]) {
                        Some(value) => value.clone(),
                        None => {
                            missing = Some(caps[1].to_owned());
                            String::new()
                        }
                    }
                });
                match missing {
                    Some(name) => Err(EngineError::new(format!(
                        "unknown placeholder {{{}}} in arguments of {}",
                        name,
                        self.program.display()
                    ))),
                    None => Ok(expanded.into_owned()),
                }
            })
            .collect()
    }

    /// Runs the program in `dir` and waits for it, appending its output to `dir/log_name`.
    pub fn run(&self, vars: &HashMap<&str, String>, dir: &Path, log_name: &str) -> Result<(), EngineError> {
        let args = self.expand(vars)?;
        let log_path = dir.join(log_name);
        let log = File::options().create(true).append(true).open(&log_path)?;
        let log_err = log.try_clone()?;

        debug!(program = %self.program.display(), ?args, dir = %dir.display(), "starting process");
        let status = Command::new(&self.program)
            .args(&args)
            .envs(&self.env)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .status()
            .map_err(|e| EngineError::new(format!("cannot start {}: {}", self.program.display(), e)))?;

        if !status.success() {
            return Err(EngineError::new(format!(
                "{} exited with {}. See '{}' for details.",
                self.program.display(),
                status,
                log_name
            )));
        }
        Ok(())
    }
}
