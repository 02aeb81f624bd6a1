use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use frame_bus::testsrc::TESTSRC_SCHEME;
use frame_bus::{RestartPolicy, SupervisorConfig};
use serde::Deserialize;

const MAX_QUEUE_CAPACITY: usize = 1024;

/// Player settings. Precedence: defaults, then the JSON file given with
/// `--config`, then command line flags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    pub sources: Vec<String>,
    pub tick_hz: u32,
    pub queue_capacity: usize,
    pub hint_threshold: usize,
    pub stop_timeout_ms: u64,
    // 0 = restart forever
    pub max_failures: u32,
    pub run_for_secs: Option<u64>,
    pub verbose: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let supervisor = SupervisorConfig::default();
        Self {
            sources: Vec::new(),
            tick_hz: 60,
            queue_capacity: supervisor.queue_capacity,
            hint_threshold: supervisor.hint_threshold,
            stop_timeout_ms: supervisor.stop_timeout.as_millis() as u64,
            max_failures: supervisor.restart.max_consecutive_failures.unwrap_or(0),
            run_for_secs: None,
            verbose: false,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid player config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parse config {}", path.display()))
    }

    fn apply_args(&mut self, matches: &ArgMatches) {
        if let Some(sources) = matches.get_many::<String>("sources") {
            self.sources = sources.cloned().collect();
        }
        if let Some(v) = matches.get_one::<u32>("tick-hz") {
            self.tick_hz = *v;
        }
        if let Some(v) = matches.get_one::<usize>("queue-capacity") {
            self.queue_capacity = *v;
        }
        if let Some(v) = matches.get_one::<usize>("hint-threshold") {
            self.hint_threshold = *v;
        }
        if let Some(v) = matches.get_one::<u64>("stop-timeout-ms") {
            self.stop_timeout_ms = *v;
        }
        if let Some(v) = matches.get_one::<u32>("max-failures") {
            self.max_failures = *v;
        }
        if let Some(v) = matches.get_one::<u64>("run-for") {
            self.run_for_secs = Some(*v);
        }
        if matches.get_flag("verbose") {
            self.verbose = true;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.tick_hz == 0 {
            bail!("tick rate must be at least 1 Hz");
        }
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            bail!("queue capacity must be between 1 and {}", MAX_QUEUE_CAPACITY);
        }
        Ok(())
    }

    /// The configured sources, or a single test pattern when none are given.
    pub fn locators(&self) -> Vec<String> {
        if self.sources.is_empty() {
            vec![TESTSRC_SCHEME.to_string()]
        } else {
            self.sources.clone()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz as f64)
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_for_secs.map(Duration::from_secs)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let restart = RestartPolicy {
            max_consecutive_failures: (self.max_failures > 0).then_some(self.max_failures),
            ..RestartPolicy::default()
        };
        SupervisorConfig {
            queue_capacity: self.queue_capacity,
            hint_threshold: self.hint_threshold,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            restart,
        }
    }
}

pub fn command() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("sources")
                .value_name("SOURCE")
                .help("Video files/URLs or testsrc[:key=value&...] locators, one per texture slot.")
                .num_args(0..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON file with player settings.")
                .value_parser(value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("tick-hz")
                .long("tick-hz")
                .value_name("HZ")
                .help("Render ticks per second.")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("queue-capacity")
                .long("queue-capacity")
                .value_name("N")
                .help("Frames buffered per direction and slot.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("hint-threshold")
                .long("hint-threshold")
                .value_name("N")
                .help("Wake the render loop once more than N frames are queued.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("stop-timeout-ms")
                .long("stop-timeout-ms")
                .value_name("MS")
                .help("Terminate pipelines that do not acknowledge a stop in time.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("max-failures")
                .long("max-failures")
                .value_name("N")
                .help("Give up on a source after N consecutive failures (0 = never).")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("run-for")
                .long("run-for")
                .value_name("SECS")
                .help("Shut down after this many seconds.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log every frame.")
                .action(ArgAction::SetTrue),
        )
}

pub fn from_args<I, T>(args: I) -> anyhow::Result<PlayerConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let mut config = match matches.get_one::<std::path::PathBuf>("config") {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    config.apply_args(&matches);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
