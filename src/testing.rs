//! Scripted doubles for the process and probe seams.

use crate::error::ToolError;
use crate::install::SCRATCH_MARKER;
use crate::process::{CommandRunner, ProcessOutcome};
use crate::registry::ToolProbe;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a fake tool does on one invocation.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Exit 0 printing the bytes.
    Ok(Vec<u8>),
    /// Write the bytes to the scratch output argument, exit 0.
    WriteOutput(Vec<u8>),
    /// Overwrite the last argument (the input file), exit 0.
    RewriteInput(Vec<u8>),
    /// Overwrite the input file, then exit 1 with the message.
    CorruptInput(Vec<u8>, String),
    /// Exit 1 with the message on stderr.
    Fail(String),
    /// The binary does not exist.
    NotFound,
    /// The time budget elapsed.
    Timeout,
}

/// [`CommandRunner`] that replays a script per tool.
///
/// The last step of a script repeats forever. Tools without a script fail.
#[derive(Default)]
pub(crate) struct FakeRunner {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn script(&self, tool: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(tool.to_string(), steps.into());
    }

    pub(crate) fn calls(&self, tool: &str) -> usize {
        self.calls.lock().unwrap().get(tool).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn next_step(&self, tool: &str) -> Option<Step> {
        let mut scripts = self.scripts.lock().unwrap();
        let steps = scripts.get_mut(tool)?;
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

fn output_arg(args: &[String]) -> Option<PathBuf> {
    args.iter().find(|arg| arg.contains(SCRATCH_MARKER)).map(|arg| {
        let path = arg.split_once('=').map_or(arg.as_str(), |(_, value)| value);
        PathBuf::from(path)
    })
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutcome, ToolError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default() += 1;

        let step = self
            .next_step(program)
            .unwrap_or_else(|| Step::Fail(format!("no script for {program}")));

        match step {
            Step::Ok(stdout) => Ok(ProcessOutcome::success_with(stdout)),
            Step::WriteOutput(bytes) => {
                let target = output_arg(args).expect("no scratch output argument");
                fs::write(target, bytes).unwrap();
                Ok(ProcessOutcome::success_with(Vec::new()))
            }
            Step::RewriteInput(bytes) => {
                fs::write(args.last().expect("no input argument"), bytes).unwrap();
                Ok(ProcessOutcome::success_with(Vec::new()))
            }
            Step::CorruptInput(bytes, message) => {
                fs::write(args.last().expect("no input argument"), bytes).unwrap();
                Ok(ProcessOutcome::failure(1, message))
            }
            Step::Fail(message) => Ok(ProcessOutcome::failure(1, message)),
            Step::NotFound => Err(ToolError::NotFound),
            Step::Timeout => Err(ToolError::Timeout(timeout)),
        }
    }
}

/// [`ToolProbe`] answering from a fixed set, counting probes per tool.
pub(crate) struct StaticProbe {
    available: HashSet<String>,
    probes: Mutex<HashMap<String, usize>>,
}

impl StaticProbe {
    pub(crate) fn new(available: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            available: available.iter().map(ToString::to_string).collect(),
            probes: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn probe_count(&self, tool: &str) -> usize {
        self.probes.lock().unwrap().get(tool).copied().unwrap_or(0)
    }

    pub(crate) fn total_probes(&self) -> usize {
        self.probes.lock().unwrap().values().sum()
    }
}

impl ToolProbe for StaticProbe {
    fn probe(&self, tool: &str) -> bool {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default() += 1;
        self.available.contains(tool)
    }
}
