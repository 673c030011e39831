//! TOML job files and the merge of file, command-line and default settings.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use strata_core::{Fill, PartitionMode, RunConfig};

/// Top-level job configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// `[run]`: how the product is computed.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Matrix dimension; the positional argument takes precedence.
    pub size: Option<usize>,
    /// Participants in the group.
    pub ranks: Option<usize>,
    /// Worker threads per participant.
    pub threads: Option<usize>,
    pub mode: Option<PartitionMode>,
    pub fill: Option<FillKind>,
    /// Seed for `fill = "seeded"`.
    pub seed: Option<u64>,
}

/// `[output]`: what is written where.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    pub dump: Option<PathBuf>,
    #[serde(default)]
    pub debug: bool,
}

/// Operand initialisation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FillKind {
    Zeros,
    #[default]
    RowIndex,
    Seeded,
}

const DEFAULT_SEED: u64 = 1;

impl FillKind {
    fn with_seed(self, seed: Option<u64>) -> Fill {
        match self {
            FillKind::Zeros => Fill::Zeros,
            FillKind::RowIndex => Fill::RowIndex,
            FillKind::Seeded => Fill::Seeded(seed.unwrap_or(DEFAULT_SEED)),
        }
    }
}

/// Positional tokens, accepted in any order as the historical driver did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunToken {
    /// Matrix dimension N.
    Size(usize),
    /// `dump=<path>`
    Dump(PathBuf),
    /// `debug`
    Debug,
}

impl FromStr for RunToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "debug" {
            return Ok(Self::Debug);
        }
        if let Some(path) = s.strip_prefix("dump=") {
            if path.is_empty() {
                return Err("dump= needs a file name".into());
            }
            return Ok(Self::Dump(PathBuf::from(path)));
        }
        if s.starts_with(|c: char| c.is_ascii_digit()) {
            return s
                .parse()
                .map(Self::Size)
                .map_err(|e| format!("invalid matrix size '{s}': {e}"));
        }
        Err(format!(
            "unknown argument '{s}' (expected a matrix size, 'dump=<path>' or 'debug')"
        ))
    }
}

/// Values given on the command line; `None` defers to the job file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub tokens: Vec<RunToken>,
    pub ranks: Option<usize>,
    pub threads: Option<usize>,
    pub mode: Option<PartitionMode>,
    pub fill: Option<FillKind>,
    pub seed: Option<u64>,
    pub verify: bool,
    pub mpi: bool,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub run: RunConfig,
    /// Participants for an in-process group. Ignored under MPI.
    pub ranks: usize,
    pub dump: Option<PathBuf>,
    pub debug: bool,
    pub verify: bool,
    pub mpi: bool,
}

impl Settings {
    /// Merge command-line values over the job file over the defaults.
    pub fn resolve(cli: Overrides, job: JobConfig) -> Result<Self> {
        let JobConfig { run, output } = job;

        let mut size = None;
        let mut dump = output.dump;
        let mut debug = output.debug;
        for token in cli.tokens {
            match token {
                RunToken::Size(n) => size = Some(n),
                RunToken::Dump(path) => dump = Some(path),
                RunToken::Debug => debug = true,
            }
        }

        let Some(n) = size.or(run.size) else {
            bail!("No matrix size given (pass it as an argument or set run.size)");
        };
        let ranks = cli.ranks.or(run.ranks).unwrap_or(1);
        if ranks == 0 {
            bail!("ranks must be at least 1");
        }
        let threads = match cli.threads.or(run.threads) {
            Some(0) => bail!("threads must be at least 1"),
            Some(t) => t,
            None => (rayon::current_num_threads() / ranks).max(1),
        };
        let fill = cli
            .fill
            .or(run.fill)
            .unwrap_or_default()
            .with_seed(cli.seed.or(run.seed));

        Ok(Self {
            run: RunConfig {
                n,
                threads,
                mode: cli.mode.or(run.mode).unwrap_or_default(),
                fill,
            },
            ranks,
            dump,
            debug,
            verify: cli.verify,
            mpi: cli.mpi,
        })
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn overrides(size: usize) -> Overrides {
        Overrides {
            tokens: vec![RunToken::Size(size)],
            ..Default::default()
        }
    }

    #[test]
    fn run_tokens_parse() {
        assert_eq!("debug".parse::<RunToken>(), Ok(RunToken::Debug));
        assert_eq!("512".parse::<RunToken>(), Ok(RunToken::Size(512)));
        assert_eq!(
            "dump=out/c.bin".parse::<RunToken>(),
            Ok(RunToken::Dump(PathBuf::from("out/c.bin")))
        );
        assert!("dump=".parse::<RunToken>().is_err());
        assert!("verbose".parse::<RunToken>().is_err());
        assert!("12x".parse::<RunToken>().is_err());
    }

    #[test]
    fn tokens_resolve_in_any_order() {
        let cli = Overrides {
            tokens: vec![
                RunToken::Dump(PathBuf::from("c.bin")),
                RunToken::Debug,
                RunToken::Size(8),
            ],
            ..Default::default()
        };
        let s = Settings::resolve(cli, JobConfig::default()).unwrap();
        assert_eq!(s.run.n, 8);
        assert_eq!(s.dump, Some(PathBuf::from("c.bin")));
        assert!(s.debug);
    }

    #[test]
    fn defaults_apply_without_file() {
        let s = Settings::resolve(overrides(64), JobConfig::default()).unwrap();
        assert_eq!(s.run.n, 64);
        assert_eq!(s.ranks, 1);
        assert!(s.run.threads >= 1);
        assert_eq!(s.run.mode, PartitionMode::Remainder);
        assert_eq!(s.run.fill, Fill::RowIndex);
        assert_eq!(s.dump, None);
        assert!(!s.debug);
    }

    #[test]
    fn job_file_parses_and_command_line_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[run]
size = 12
ranks = 3
threads = 2
mode = "strict"
fill = "seeded"
seed = 7

[output]
dump = "from-file.bin"
debug = true
"#
        )
        .unwrap();
        let job = load_config(file.path()).unwrap();
        assert_eq!(job.run.mode, Some(PartitionMode::Strict));

        let cli = Overrides {
            ranks: Some(4),
            tokens: vec![RunToken::Dump(PathBuf::from("cli.bin"))],
            ..Default::default()
        };
        let s = Settings::resolve(cli, job).unwrap();
        assert_eq!(s.run.n, 12);
        assert_eq!(s.ranks, 4);
        assert_eq!(s.run.threads, 2);
        assert_eq!(s.run.mode, PartitionMode::Strict);
        assert_eq!(s.run.fill, Fill::Seeded(7));
        assert_eq!(s.dump, Some(PathBuf::from("cli.bin")));
        assert!(s.debug);
    }

    #[test]
    fn seeded_fill_defaults_its_seed() {
        let cli = Overrides {
            fill: Some(FillKind::Seeded),
            ..overrides(3)
        };
        let s = Settings::resolve(cli, JobConfig::default()).unwrap();
        assert_eq!(s.run.fill, Fill::Seeded(DEFAULT_SEED));
    }

    #[test]
    fn missing_size_and_zero_counts_are_rejected() {
        assert!(Settings::resolve(Overrides::default(), JobConfig::default()).is_err());
        let zero_ranks = Overrides {
            ranks: Some(0),
            ..overrides(4)
        };
        assert!(Settings::resolve(zero_ranks, JobConfig::default()).is_err());
        let zero_threads = Overrides {
            threads: Some(0),
            ..overrides(4)
        };
        assert!(Settings::resolve(zero_threads, JobConfig::default()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nsize = 4\nworkers = 2").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/nonexistent/strata-job.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config"));
    }
}
