// 🐚 Shell Collaborators - ingest_data.sh / write_results.sh
// The scripts are invoked by path with no arguments. Their exit code is
// printed; whether a failure stops the stage depends on `strict`.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

/// Exit code reported when the child was killed by a signal
/// or could not be started at all
pub const NO_EXIT_CODE: i32 = -1;

pub struct ScriptRunner {
    /// Turn non-zero exits and spawn failures into errors
    pub strict: bool,
}

impl ScriptRunner {
    pub fn new(strict: bool) -> Self {
        ScriptRunner { strict }
    }

    /// Run a script and return its exit code
    pub fn run(&self, script: &Path) -> Result<i32> {
        println!("{}", command_line(script));

        let code = match Command::new(script).status() {
            Ok(status) => status.code().unwrap_or(NO_EXIT_CODE),
            Err(e) if !self.strict => {
                log::warn!("could not start {}: {}", script.display(), e);
                NO_EXIT_CODE
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to start {}", script.display()));
            }
        };

        println!("{}", code);

        if code != 0 {
            if self.strict {
                bail!("{} exited with code {}", script.display(), code);
            }
            log::warn!("{} exited with code {}; continuing", script.display(), code);
        }

        Ok(code)
    }
}

/// Command vector in the `['./ingest_data.sh']` form the stage logs show
pub fn command_line(script: &Path) -> String {
    format!("['{}']", script.display())
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new(false)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_format() {
        assert_eq!(command_line(Path::new("./ingest_data.sh")), "['./ingest_data.sh']");
    }

    #[test]
    fn test_successful_script_returns_zero() {
        let runner = ScriptRunner::new(true);
        assert_eq!(runner.run(Path::new("true")).unwrap(), 0);
    }

    #[test]
    fn test_failure_tolerated_by_default() {
        let runner = ScriptRunner::default();
        assert_eq!(runner.run(Path::new("false")).unwrap(), 1);
    }

    #[test]
    fn test_failure_is_error_when_strict() {
        let runner = ScriptRunner::new(true);
        let err = runner.run(Path::new("false")).unwrap_err().to_string();
        assert!(err.contains("exited with code 1"));
    }

    #[test]
    fn test_missing_script() {
        let missing = Path::new("./no-such-ingest-script.sh");

        assert_eq!(ScriptRunner::default().run(missing).unwrap(), NO_EXIT_CODE);
        assert!(ScriptRunner::new(true).run(missing).is_err());
    }
}
