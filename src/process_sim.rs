// src/process_sim.rs
//
// Simulator backed by an external command, one OS process per repeat.
//
// Protocol:
// - argv: <program> <args...> --seed <seed>
// - stdin: the resolved ScenarioConfig as JSON, then EOF
// - stdout: one RawRunResult as JSON
// - exit status 0 on success; anything else is a simulation failure and the
//   tail of stderr is kept as the error message
//
// Each repeat runs in its own process group. A repeat that outlives the
// timeout has its whole group killed, forked workers included.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ConfigError;
use crate::scenario::ScenarioConfig;
use crate::simulator::{RawRunResult, SimulationError, Simulator};

const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone)]
pub struct ProcessSimulator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl ProcessSimulator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Whitespace-separated command line, e.g. `python sim_worker.py --full`.
    pub fn from_command_line(command: &str) -> Result<Self, ConfigError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ConfigError::validation("simulator_cmd", "command cannot be empty"))?;
        let mut sim = Self::new(program);
        sim.args = parts.map(str::to_string).collect();
        Ok(sim)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, SimulationError> {
        let deadline = self.timeout.map(|t| (Instant::now() + t, t));
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => {
                    return Err(SimulationError::Resource {
                        message: format!("waiting for simulator: {}", e),
                    })
                }
            }
            if let Some((at, limit)) = deadline {
                if Instant::now() >= at {
                    kill_process_group(child);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SimulationError::timeout(limit));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Simulator for ProcessSimulator {
    fn run(&self, scenario: &ScenarioConfig, seed: u64) -> Result<RawRunResult, SimulationError> {
        let payload = serde_json::to_vec(scenario).map_err(|e| SimulationError::Protocol {
            message: format!("serializing scenario: {}", e),
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--seed")
            .arg(seed.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| SimulationError::Resource {
                message: format!("spawning {}: {}", self.program.display(), e),
            })?;

        let missing_pipe = || SimulationError::Resource {
            message: "simulator pipes unavailable".to_string(),
        };
        let mut stdin = child.stdin.take().ok_or_else(missing_pipe)?;
        let mut stdout = child.stdout.take().ok_or_else(missing_pipe)?;
        let mut stderr = child.stderr.take().ok_or_else(missing_pipe)?;

        // Pipes are drained on their own threads so a chatty child cannot
        // block on a full buffer. A child that ignores stdin just breaks the pipe.
        let writer = thread::spawn(move || {
            let _ = stdin.write_all(&payload);
        });
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let err_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        });

        // On timeout a surviving grandchild may still hold the pipes open;
        // the detached threads exit once it does.
        let status = self.wait(&mut child)?;
        let _ = writer.join();
        let out = reader.join();
        let err = err_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(SimulationError::Failed {
                message: format!("{} ({})", status, stderr_tail(&err)),
            });
        }

        let out = match out {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => {
                return Err(SimulationError::Resource {
                    message: format!("reading simulator output: {}", e),
                })
            }
            Err(_) => {
                return Err(SimulationError::Resource {
                    message: "simulator output reader panicked".to_string(),
                })
            }
        };

        serde_json::from_slice(&out).map_err(|e| SimulationError::Protocol {
            message: e.to_string(),
        })
    }
}

/// SIGKILL the group led by `child`.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let _ = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", child.id()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn stderr_tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use crate::measures::MeasureList;
    use crate::params::CalibratedParameterSet;
    use crate::policy::{BeaconConfig, TestingPolicy};
    use crate::scenario::InitialSeedPolicy;
    use chrono::NaiveDate;

    fn scenario() -> ScenarioConfig {
        ScenarioConfig {
            simulation_info: "proc".to_string(),
            country: "GER".to_string(),
            area: "TU".to_string(),
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 1, 2).unwrap(),
            measure_list: MeasureList::new(Vec::new(), 24.0).unwrap(),
            beacon_config: BeaconConfig::All,
            testing_policy: TestingPolicy::beacon_environment(0.9, Interval::new(0.0, 24.0).unwrap())
                .unwrap(),
            roc_thresholds: vec![0.5],
            calibrated_params: CalibratedParameterSet::from_named([("beta_household", 1.0)])
                .unwrap(),
            initial_seed_policy: InitialSeedPolicy::Calibrated,
            full_scale: false,
            lockdown_measures_active: false,
            expected_daily_base_expo_per100k: 0.0,
        }
    }

    fn sh(script: &str) -> ProcessSimulator {
        // `sh -c script sh --seed N`: the seed lands in $2.
        ProcessSimulator::new("sh").arg("-c").arg(script).arg("sh")
    }

    #[test]
    fn reads_result_from_stdout() {
        let sim = sh(r#"cat >/dev/null; printf '{"horizon_hours": %s, "trajectory": {"times": [0.0], "series": {"infected": [1.0]}}}' "$2""#);
        let res = sim.run(&scenario(), 24).unwrap();
        assert_eq!(res.horizon_hours, 24.0);
        assert!(res.tracing_events.is_empty());
    }

    #[test]
    fn non_zero_exit_is_a_failure_with_stderr() {
        let sim = sh("echo 'no calibration' >&2; exit 3");
        match sim.run(&scenario(), 1) {
            Err(SimulationError::Failed { message }) => assert!(message.contains("no calibration")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn garbage_output_is_a_protocol_error() {
        let sim = sh("echo not-json");
        assert!(matches!(
            sim.run(&scenario(), 1),
            Err(SimulationError::Protocol { .. })
        ));
    }

    #[test]
    fn slow_child_is_killed() {
        let sim = sh("exec sleep 5").with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        assert!(matches!(
            sim.run(&scenario(), 1),
            Err(SimulationError::Timeout { limit_ms: 100 })
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn forked_worker_does_not_outlive_the_timeout() {
        // No exec: `sleep` is a grandchild holding stdout and stderr open.
        let sim = sh("cat >/dev/null; sleep 4; echo done")
            .with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        assert!(matches!(
            sim.run(&scenario(), 1),
            Err(SimulationError::Timeout { limit_ms: 100 })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_program_is_a_resource_error() {
        let sim = ProcessSimulator::new("/nonexistent/beacon-sim");
        assert!(matches!(
            sim.run(&scenario(), 1),
            Err(SimulationError::Resource { .. })
        ));
        assert!(ProcessSimulator::from_command_line("   ").is_err());
    }
}
