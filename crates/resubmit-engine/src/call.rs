//! Job scripts that call a single function.
//!
//! A [`FunctionCall`] names a module and a callable within it. The builder
//! synthesizes a one-line script that starts the interpreter, optionally
//! prepends a directory to its import search path, imports the callable and
//! invokes it. The script is written to `<save_dir>/run_<function>.sh`,
//! marked executable, and run through the [`Controller`] like any other
//! template.
//!
//! Arguments are literal source text and are inserted verbatim: string
//! arguments must already carry their own quotes (`"'data.csv'"`), and
//! nothing is escaped. The whole program is wrapped in double quotes on the
//! shell command line, so arguments must not contain unescaped double quotes
//! either.

use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use tokio::fs;
use tracing::debug;

use crate::Controller;
use crate::DirectiveSet;
use crate::Error;
use crate::Outcome;
use crate::Result;
use crate::RunRequest;
use crate::script::set_executable;

/// The interpreter line of synthesized scripts.
const SHELL_INTERPRETER: &str = "#!/bin/bash";

/// A call to a named function in a named module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// The module to import from.
    module: String,
    /// The function to call.
    function: String,
    /// Positional arguments, as literal source text.
    args: Vec<String>,
    /// Keyword arguments, as literal source text, in order.
    kwargs: IndexMap<String, String>,
    /// A directory to put at the front of the import search path.
    search_path: Option<PathBuf>,
}

impl FunctionCall {
    /// Creates a call with no arguments.
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            args: Vec::new(),
            kwargs: IndexMap::new(),
            search_path: None,
        }
    }

    /// Adds a positional argument.
    pub fn arg(mut self, literal: impl Into<String>) -> Self {
        self.args.push(literal.into());
        self
    }

    /// Adds a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, literal: impl Into<String>) -> Self {
        self.kwargs.insert(name.into(), literal.into());
        self
    }

    /// Puts a directory at the front of the import search path.
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// The name of the function being called.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The call expression, such as `train(1, lr=0.1)`.
    pub fn expression(&self) -> String {
        let arguments = self
            .args
            .iter()
            .cloned()
            .chain(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{function}({arguments})", function = self.function)
    }

    /// The interpreter program: imports followed by the call.
    pub fn program(&self) -> String {
        let mut statements = Vec::new();
        if let Some(path) = &self.search_path {
            statements.push("import sys".to_string());
            statements.push(format!("sys.path.insert(0, '{}')", path.display()));
        }
        statements.push(format!(
            "from {module} import {function}",
            module = self.module,
            function = self.function
        ));
        statements.push(self.expression());
        statements.join("; ")
    }

    /// The full script text for the given interpreter.
    pub fn script(&self, interpreter: &Path) -> String {
        format!(
            "{SHELL_INTERPRETER}\n{interpreter} -c \"{program}\"\n",
            interpreter = interpreter.display(),
            program = self.program()
        )
    }

    /// The file name the script is written to.
    pub fn script_name(&self) -> String {
        format!("run_{function}.sh", function = self.function)
    }

    /// Writes the script into `save_dir` and marks it executable.
    ///
    /// Returns the path of the script.
    pub async fn write(&self, interpreter: &Path, save_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(save_dir)
            .await
            .map_err(|e| Error::io(save_dir, e))?;

        let path = save_dir.join(self.script_name());
        fs::write(&path, self.script(interpreter))
            .await
            .map_err(|e| Error::io(&path, e))?;
        set_executable(&path).await?;

        debug!(path = %path.display(), program = %self.program(), "wrote function call script");
        Ok(path)
    }

    /// Writes the script and runs it to an outcome.
    ///
    /// Arguments are part of the call expression, so no extra arguments are
    /// appended to the script.
    pub async fn run(
        &self,
        controller: &Controller,
        interpreter: &Path,
        save_dir: &Path,
        directives: DirectiveSet,
    ) -> Result<Outcome> {
        let template = self.write(interpreter, save_dir).await?;
        let request = RunRequest::new(template, save_dir).with_directives(directives);
        controller.run(&request).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::tests::FakeGateway;

    fn call() -> FunctionCall {
        FunctionCall::new("experiments.train", "train")
            .arg("'data.csv'")
            .arg("3")
            .kwarg("lr", "0.01")
            .kwarg("tag", "'baseline'")
    }

    #[test]
    fn builds_call_expression() {
        assert_eq!(
            call().expression(),
            "train('data.csv', 3, lr=0.01, tag='baseline')"
        );
        assert_eq!(FunctionCall::new("m", "main").expression(), "main()");
    }

    #[test]
    fn builds_program_with_search_path() {
        assert_eq!(
            FunctionCall::new("task", "delay").program(),
            "from task import delay; delay()"
        );
        assert_eq!(
            FunctionCall::new("task", "read_txt")
                .arg("'a.txt'")
                .arg("'b.txt'")
                .search_path("/home/me/project")
                .program(),
            "import sys; sys.path.insert(0, '/home/me/project'); from task import read_txt; \
             read_txt('a.txt', 'b.txt')"
        );
    }

    #[test]
    fn builds_script() {
        assert_eq!(
            FunctionCall::new("task", "main").script(Path::new("/opt/env/bin/python")),
            "#!/bin/bash\n/opt/env/bin/python -c \"from task import main; main()\"\n"
        );
        assert_eq!(call().script_name(), "run_train.sh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn written_script_is_executable() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let path = call()
            .write(Path::new("python3"), &dir.path().join("save"))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("save").join("run_train.sh"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[tokio::test]
    async fn runs_through_controller() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("save");
        let gateway = FakeGateway::new([Some("9")], [false], [Some("COMPLETED")]);
        let controller = Controller::new(gateway.clone(), &ControllerConfig::default())
            .with_poll_interval(Duration::ZERO);

        let directives: DirectiveSet = [("job-name", "train")].into_iter().collect();
        let outcome = call()
            .run(&controller, Path::new("python3"), &save_dir, directives)
            .await
            .unwrap();
        assert!(outcome.is_success());

        let script = std::fs::read_to_string(save_dir.join("run_train.sh")).unwrap();
        let lines: Vec<_> = script.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[1], "");
        assert!(lines[2].starts_with("#SBATCH --job-name=train"));
        assert!(lines[3].starts_with("#SBATCH --output="));
        assert_eq!(lines[4], "");
        assert_eq!(
            lines[5],
            "python3 -c \"from experiments.train import train; train('data.csv', 3, lr=0.01, \
             tag='baseline')\""
        );
        assert_eq!(lines.len(), 6);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = std::fs::metadata(save_dir.join("run_train.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }
}
