//! Blocking launcher for the analysis scripts.

use std::path::Path;
use std::process::Command;

use tracing::{debug, error, info};

use crate::error::{AppResult, DeviceError};
use crate::hardware::capabilities::PostProcessing;

/// Runs scripts through an interpreter and waits for them to exit.
#[derive(Clone, Debug)]
pub struct ScriptRunner {
    interpreter: String,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl ScriptRunner {
    /// Runner using `interpreter` (for example `python3`).
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Interpreter the scripts are launched with.
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

impl PostProcessing for ScriptRunner {
    fn execute_script(&mut self, script: &Path, args: &[String]) -> AppResult<()> {
        info!(script = %script.display(), ?args, "running post-processing script");

        let output = Command::new(&self.interpreter)
            .arg(script)
            .args(args)
            .output()
            .map_err(|e| {
                DeviceError::PostProcessing(format!(
                    "failed to launch {} {}: {e}",
                    self.interpreter,
                    script.display()
                ))
            })?;

        if !output.stdout.is_empty() {
            debug!(stdout = %String::from_utf8_lossy(&output.stdout), "script output");
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(script = %script.display(), status = %output.status, %stderr, "script failed");
            Err(DeviceError::PostProcessing(format!(
                "{} exited with {}",
                script.display(),
                output.status
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_successful_script() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("ok.sh");
        fs::write(&script, "exit 0\n").unwrap();

        let mut runner = ScriptRunner::new("sh");
        assert!(runner.execute_script(&script, &["1.5".to_string()]).is_ok());
    }

    #[test]
    fn test_failing_script() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("bad.sh");
        fs::write(&script, "exit 3\n").unwrap();

        let mut runner = ScriptRunner::new("sh");
        assert!(matches!(
            runner.execute_script(&script, &[]),
            Err(DeviceError::PostProcessing(_))
        ));
    }

    #[test]
    fn test_script_receives_arguments() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("echo.sh");
        let out = dir.path().join("out.csv");
        fs::write(&script, "printf 'value\\n%s\\n' \"$1\" > \"$2\"\n").unwrap();

        let mut runner = ScriptRunner::new("sh");
        runner
            .execute_script(&script, &["4.5".to_string(), out.display().to_string()])
            .unwrap();
        assert_eq!(fs::read_to_string(out).unwrap(), "value\n4.5\n");
    }

    #[test]
    fn test_missing_interpreter() {
        let mut runner = ScriptRunner::new("definitely-not-an-interpreter");
        assert!(runner.execute_script(Path::new("x.py"), &[]).is_err());
    }
}
