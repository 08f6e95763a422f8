//! Command batch scheduling.
//!
//! One input line (or pasted block) can carry several commands with
//! explicit ordering semantics:
//!
//! - `#` starts an end-of-line comment, stripped before any splitting
//! - commands are separated by `;` or newlines
//! - a command ending in `&` joins the current concurrent group;
//!   adjacent `&` commands run at the same time as one unit
//! - a plain command flushes any open group, then runs on its own
//!
//! `a&; b&; c; d&; e&` therefore runs `{a,b}` concurrently, then `c`,
//! then `{d,e}` concurrently. Units execute strictly in the order they
//! were produced; a concurrent unit completes as a whole before the
//! next unit starts. Failures inside a unit are logged and isolated:
//! one member's error neither cancels its siblings nor stops the units
//! after it.

use async_trait::async_trait;

/// One parsed command: dispatch name plus the unsplit argument tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Dispatch name (first whitespace-separated word).
    pub name: String,
    /// Remaining argument text, if any.
    pub args: Option<String>,
}

impl Command {
    fn parse(token: &str) -> Self {
        match token.split_once(' ') {
            Some((name, rest)) => Self {
                name: name.to_string(),
                args: Some(rest.trim().to_string()).filter(|rest| !rest.is_empty()),
            },
            None => Self {
                name: token.to_string(),
                args: None,
            },
        }
    }

    /// The command as typed.
    #[must_use]
    pub fn display(&self) -> String {
        match &self.args {
            Some(args) => format!("{} {args}", self.name),
            None => self.name.clone(),
        }
    }
}

/// One unit of execution in a scheduled batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleUnit {
    /// A single command, awaited before the next unit.
    Sequential(Command),
    /// Commands run concurrently; the group completes as a whole
    /// before the next unit starts.
    Concurrent(Vec<Command>),
}

/// Parse a raw input line into ordered schedule units.
#[must_use]
pub fn schedule(raw: &str) -> Vec<ScheduleUnit> {
    let mut units = Vec::new();
    let mut group: Vec<Command> = Vec::new();

    for line in raw.lines() {
        // End-of-line comment, stripped before splitting.
        let line = line.split('#').next().unwrap_or_default();

        for token in line.split(';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            if let Some(stripped) = token.strip_suffix('&') {
                let stripped = stripped.trim_end();
                if stripped.is_empty() {
                    continue;
                }
                let command = Command::parse(stripped);
                tracing::info!(
                    command = %command.display(),
                    group = units.len(),
                    "Added concurrent command to run group"
                );
                group.push(command);
                continue;
            }

            // A plain command closes the open concurrent group first.
            if !group.is_empty() {
                units.push(ScheduleUnit::Concurrent(std::mem::take(&mut group)));
            }

            let command = Command::parse(token);
            tracing::info!(
                command = %command.display(),
                group = units.len(),
                "Added sequential command to run group"
            );
            units.push(ScheduleUnit::Sequential(command));
        }
    }

    // Input ending on concurrent commands still flushes them as a
    // final unit.
    if !group.is_empty() {
        units.push(ScheduleUnit::Concurrent(group));
    }

    units
}

/// Executes named commands against session state.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command to completion.
    async fn run(&self, command: &Command) -> anyhow::Result<()>;
}

/// Execute schedule units in order under the scheduling contract.
pub async fn execute<R: CommandRunner>(runner: &R, units: Vec<ScheduleUnit>) {
    for unit in units {
        match unit {
            ScheduleUnit::Sequential(command) => {
                if let Err(error) = runner.run(&command).await {
                    tracing::error!(command = %command.display(), %error, "Command failed");
                }
            }
            ScheduleUnit::Concurrent(commands) => {
                let results =
                    futures::future::join_all(commands.iter().map(|command| runner.run(command)))
                        .await;

                for (command, result) in commands.iter().zip(results) {
                    if let Err(error) = result {
                        tracing::error!(
                            command = %command.display(),
                            %error,
                            "Concurrent command failed"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn cmd(text: &str) -> Command {
        Command::parse(text)
    }

    #[test]
    fn groups_concurrent_and_sequential_units() {
        let units = schedule("a&; b&; c; d&; e&");

        assert_eq!(
            units,
            vec![
                ScheduleUnit::Concurrent(vec![cmd("a"), cmd("b")]),
                ScheduleUnit::Sequential(cmd("c")),
                ScheduleUnit::Concurrent(vec![cmd("d"), cmd("e")]),
            ]
        );
    }

    #[test]
    fn comment_strips_to_end_of_line() {
        let units = schedule("buy AAPL 10 150.25 # scale in; sell SPY 5");
        assert_eq!(
            units,
            vec![ScheduleUnit::Sequential(cmd("buy AAPL 10 150.25"))]
        );
    }

    #[test]
    fn newlines_and_semicolons_both_split() {
        let units = schedule("add \"AAPL\"\nadd \"SPY\"; positions");
        assert_eq!(units.len(), 3);
    }

    #[test]
    fn empty_tokens_are_discarded() {
        assert!(schedule(";;; # nothing at all").is_empty());
        assert!(schedule("   ").is_empty());
    }

    #[test]
    fn ampersand_with_trailing_space_still_groups() {
        let units = schedule("a &; b");
        assert_eq!(
            units,
            vec![
                ScheduleUnit::Concurrent(vec![cmd("a")]),
                ScheduleUnit::Sequential(cmd("b")),
            ]
        );
    }

    #[test]
    fn command_args_keep_their_tail() {
        let command = cmd("buy AAPL -5000 0");
        assert_eq!(command.name, "buy");
        assert_eq!(command.args.as_deref(), Some("AAPL -5000 0"));
    }

    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, command: &Command) -> anyhow::Result<()> {
            self.log.lock().push(format!("start {}", command.name));

            // Commands named "slow" park long enough that unordered
            // execution would interleave the log.
            if command.name == "slow" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }

            if command.name == "bad" {
                self.log.lock().push("end bad".to_string());
                anyhow::bail!("boom");
            }

            self.log.lock().push(format!("end {}", command.name));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_unit_completes_before_next_unit() {
        let runner = Recorder {
            log: Mutex::new(Vec::new()),
        };

        execute(&runner, schedule("slow&; quick&; after")).await;

        let log = runner.log.lock().clone();
        let after_start = log.iter().position(|l| l == "start after").unwrap();
        let slow_end = log.iter().position(|l| l == "end slow").unwrap();
        let quick_end = log.iter().position(|l| l == "end quick").unwrap();

        assert!(slow_end < after_start);
        assert!(quick_end < after_start);
    }

    #[tokio::test(start_paused = true)]
    async fn member_failure_does_not_cancel_siblings_or_later_units() {
        let runner = Recorder {
            log: Mutex::new(Vec::new()),
        };

        execute(&runner, schedule("bad&; slow&; after")).await;

        let log = runner.log.lock().clone();
        assert!(log.contains(&"end slow".to_string()));
        assert!(log.contains(&"end after".to_string()));
    }

    #[tokio::test]
    async fn sequential_failure_does_not_stop_the_batch() {
        let runner = Recorder {
            log: Mutex::new(Vec::new()),
        };

        execute(&runner, schedule("bad; after")).await;

        let log = runner.log.lock().clone();
        assert!(log.contains(&"end after".to_string()));
    }
}
