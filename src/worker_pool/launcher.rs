use anyhow::Result;
use std::path::PathBuf;
use tokio::process::Command;

use crate::worker_pool::work_unit::WorkUnit;

/// Builds the external process for one work unit.
///
/// The pool sets stdio and kill-on-drop itself; implementations only choose
/// the program, arguments, working directory and environment.
pub trait Launcher: Send + Sync {
    fn command(&self, unit: &WorkUnit) -> Result<Command>;

    /// Name used in launch-failure messages.
    fn program_name(&self, _unit: &WorkUnit) -> String {
        "external tool".to_string()
    }
}

impl<F> Launcher for F
where
    F: Fn(&WorkUnit) -> Result<Command> + Send + Sync,
{
    fn command(&self, unit: &WorkUnit) -> Result<Command> {
        self(unit)
    }
}

/// Program plus an argument template.
///
/// `{input}`, `{output}` and `{index}` are replaced per unit; the unit's own
/// `args` follow the template.
#[derive(Debug, Clone)]
pub struct ToolLauncher {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ToolLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn render_args(&self, unit: &WorkUnit) -> Vec<String> {
        let input = unit.input_path.to_string_lossy();
        let output = unit.output_path.to_string_lossy();
        let index = unit.index.to_string();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{index}", &index)
            })
            .chain(unit.args.iter().cloned())
            .collect()
    }
}

impl Launcher for ToolLauncher {
    fn command(&self, unit: &WorkUnit) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(unit));

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        Ok(cmd)
    }

    fn program_name(&self, _unit: &WorkUnit) -> String {
        self.program.display().to_string()
    }
}
