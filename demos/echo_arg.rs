//! Minimal instrumented binary used to exercise the harness end to end.
//!
//! Its coverage runtime takes the mode from `ECHO_ARG_COVER_MODE` and
//! records which branch of the entrypoint ran.

use bincover::{run_instrumented, CoverMode, CoverageRuntime, EntryOutcome};
use std::cell::Cell;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

const COVER_MODE_VAR: &str = "ECHO_ARG_COVER_MODE";

struct BranchCoverage {
    mode: Option<CoverMode>,
    branch: Cell<Option<&'static str>>,
}

impl BranchCoverage {
    fn from_env() -> Self {
        let mode = std::env::var(COVER_MODE_VAR)
            .ok()
            .and_then(|mode| mode.parse().ok());
        Self {
            mode,
            branch: Cell::new(None),
        }
    }

    fn hit(&self, branch: &'static str) {
        self.branch.set(Some(branch));
    }
}

impl CoverageRuntime for BranchCoverage {
    fn cover_mode(&self) -> Option<CoverMode> {
        self.mode
    }

    fn write_profile(&self, path: &Path) -> io::Result<()> {
        let mut profile = format!("mode: {}\n", self.mode.map(|m| m.as_str()).unwrap_or(""));
        if let Some(branch) = self.branch.get() {
            profile.push_str(&format!("demos/echo_arg.rs:{} 1 1\n", branch));
        }
        fs::write(path, profile)
    }
}

fn main() {
    let coverage = BranchCoverage::from_env();
    run_instrumented(&coverage, |args| match args.as_slice() {
        [_, arg] if arg == "-" => {
            coverage.hit("stdin");
            let mut input = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut input) {
                return EntryOutcome::new(format!("failed to read stdin: {}\n", e), 1);
            }
            EntryOutcome::new(input, 0)
        }
        [_, arg] => {
            coverage.hit("one_argument");
            EntryOutcome::new(format!("Your argument is \"{}\"\n", arg), 0)
        }
        [_] | [] => {
            coverage.hit("no_argument");
            EntryOutcome::new("Please provide an argument\n", 1)
        }
        _ => {
            coverage.hit("too_many_arguments");
            EntryOutcome::new("More than 2 arguments provided!\n", 2)
        }
    })
}
