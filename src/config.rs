//! Process-wide configuration: CLI flags, the reloadable TOML file, and the
//! live counters the dispatcher pool coordinates through.
//!
//! Grounded on `original_source/asdb_jobs/config.py::RunConfig` and
//! `asdb_jobs/__main__.py`'s `argparse` setup, reshaped per the Design Note
//! in `spec.md` §9: the dataclass's single mutable bag is split into an
//! immutable [`StartupConfig`] and a reloadable [`ReloadableConfig`], the
//! latter guarded by an `RwLock` since Tokio's multi-threaded runtime means
//! more than one OS thread can touch it concurrently (the original's
//! single-event-loop assumption does not hold here).
//!
//! The config file is consulted twice in different ways: once at process
//! bootstrap (`RunConfig::bootstrap`), where any recognized key --
//! including ones that live in the immutable startup subset -- wins over
//! CLI flags and defaults, exactly like `config.py`'s `update_from_dict`;
//! and then repeatedly on every dispatcher/supervisor tick
//! (`reload_if_changed`), where only the reloadable subset (`cpus`,
//! `max_jobs`) is adopted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use clap::Parser;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::AsdbJobsError;

const DEFAULT_CONFIGFILE: &str = "asdb-jobs.toml";
const DEFAULT_DB_DIR: &str = "databases";
const DEFAULT_WORKDIR: &str = "workdir";
const DEFAULT_MAX_JOBS: i64 = 5;
const DEFAULT_NAME: &str = "asdb-jobs";

fn default_cpus() -> usize {
    // `max(1, cpu_count / DEFAULT_JOBS)`, the same heuristic as
    // `asdb_jobs/__main__.py`'s `DEFAULT_CPUS`.
    (std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        / DEFAULT_MAX_JOBS.max(1) as usize)
        .max(1)
}

/// Command-line flags, mirroring the `argparse` setup in
/// `asdb_jobs/__main__.py`.
#[derive(Parser, Debug)]
#[command(name = "asdb-jobs", about = "Background job runner for the antiSMASH database")]
pub struct Cli {
    /// Location of the configuration file to use.
    #[arg(short = 'c', long = "configfile", value_name = "PATH")]
    pub configfile: Option<PathBuf>,

    /// How many CPUs to use per job.
    #[arg(short = 'C', long = "cpus", value_name = "N")]
    pub cpus: Option<usize>,

    /// Directory containing the database files to use.
    #[arg(short = 'D', long = "db-dir", value_name = "PATH")]
    pub db_dir: Option<PathBuf>,

    /// How many background jobs to run.
    #[arg(short = 'j', long = "max-jobs", value_name = "N")]
    pub max_jobs: Option<i64>,

    /// Name of the job runner.
    #[arg(short = 'n', long = "name", value_name = "NAME")]
    pub name: Option<String>,

    /// Working directory to keep the job files in.
    #[arg(short = 'w', long = "workdir", value_name = "PATH")]
    pub workdir: Option<PathBuf>,

    /// Print the version string (crate version plus git short SHA) and exit.
    #[arg(short = 'V', long = "version")]
    pub version: bool,
}

/// Database connection parameters.
///
/// Part of the immutable startup subset per the Design Note in `spec.md`
/// §9: credentials are never re-read on a tick, only at bootstrap.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub database: String,
    pub password: String,
    pub port: u16,
    pub user: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: "antismash".to_string(),
            password: "secret".to_string(),
            port: 5432,
            user: "postgres".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Assemble a `postgres://` connection string for `sqlx::PgPool`.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// The immutable subset of runtime configuration: set once at process
/// startup (CLI flags, then the config file) and never re-read on a tick.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub configfile: PathBuf,
    pub db_dir: PathBuf,
    pub name: String,
    pub workdir: PathBuf,
    pub database: DatabaseConfig,
}

/// The reloadable subset: re-read from `configfile` on every dispatcher and
/// supervisor tick, merged in only if the file's content actually changed.
#[derive(Debug, Clone)]
pub struct ReloadableConfig {
    pub cpus: usize,
    pub max_jobs: i64,
}

/// The shape of the TOML config file. All fields are optional: unknown keys
/// are ignored (no `deny_unknown_fields`), matching `spec.md` §6, and any
/// key that is absent simply leaves the in-memory value untouched.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    cpus: Option<usize>,
    db_dir: Option<PathBuf>,
    max_jobs: Option<i64>,
    name: Option<String>,
    workdir: Option<PathBuf>,
    host: Option<String>,
    database: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    user: Option<String>,
}

impl ConfigFile {
    fn read(path: &Path) -> Option<(Self, [u8; 16])> {
        let data = std::fs::read_to_string(path).ok()?;
        let digest = md5::compute(data.as_bytes()).0;
        let parsed: Self = toml::from_str(&data)
            .map_err(|err| debug!(path = %path.display(), error = %err, "config file did not parse"))
            .ok()?;
        Some((parsed, digest))
    }

    fn apply_to_startup(&self, startup: &mut StartupConfig) {
        if let Some(v) = &self.db_dir {
            startup.db_dir = v.clone();
        }
        if let Some(v) = &self.name {
            startup.name = v.clone();
        }
        if let Some(v) = &self.workdir {
            startup.workdir = v.clone();
        }
        if let Some(v) = &self.host {
            startup.database.host = v.clone();
        }
        if let Some(v) = &self.database {
            startup.database.database = v.clone();
        }
        if let Some(v) = &self.password {
            startup.database.password = v.clone();
        }
        if let Some(v) = self.port {
            startup.database.port = v;
        }
        if let Some(v) = &self.user {
            startup.database.user = v.clone();
        }
    }

    fn apply_to_reloadable(&self, reloadable: &mut ReloadableConfig) {
        if let Some(v) = self.cpus {
            reloadable.cpus = v;
        }
        if let Some(v) = self.max_jobs {
            reloadable.max_jobs = v;
        }
    }
}

/// Process-wide mutable configuration: the startup subset, the reloadable
/// subset behind an `RwLock`, and the live counters the dispatcher pool
/// reads and writes at well-defined await-boundaries (`spec.md` §5).
pub struct RunConfig {
    pub startup: StartupConfig,
    reloadable: RwLock<ReloadableConfig>,
    running_jobs: AtomicI64,
    config_file_hash: RwLock<Option<[u8; 16]>>,
}

impl RunConfig {
    pub fn new(startup: StartupConfig, reloadable: ReloadableConfig) -> Self {
        Self {
            startup,
            reloadable: RwLock::new(reloadable),
            running_jobs: AtomicI64::new(0),
            config_file_hash: RwLock::new(None),
        }
    }

    /// Build configuration from CLI flags and (if present) the config file,
    /// the file winning over flags and defaults for any key it sets --
    /// matching `config.py`'s `from_argparse` followed by `read_config`.
    pub fn bootstrap(cli: &Cli) -> Self {
        let mut startup = StartupConfig {
            configfile: cli
                .configfile
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIGFILE)),
            db_dir: cli.db_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DB_DIR)),
            name: cli.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_string()),
            workdir: cli.workdir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR)),
            database: DatabaseConfig::default(),
        };
        let mut reloadable = ReloadableConfig {
            cpus: cli.cpus.unwrap_or_else(default_cpus),
            max_jobs: cli.max_jobs.unwrap_or(DEFAULT_MAX_JOBS),
        };

        let hash = match ConfigFile::read(&startup.configfile) {
            Some((parsed, digest)) => {
                parsed.apply_to_startup(&mut startup);
                parsed.apply_to_reloadable(&mut reloadable);
                Some(digest)
            }
            None => None,
        };

        Self {
            startup,
            reloadable: RwLock::new(reloadable),
            running_jobs: AtomicI64::new(0),
            config_file_hash: RwLock::new(hash),
        }
    }

    /// The directory containing the database files to mount into the
    /// sandbox container. Part of the immutable startup subset.
    pub fn db_dir(&self) -> &Path {
        &self.startup.db_dir
    }

    pub fn cpus(&self) -> usize {
        self.reloadable.read().unwrap().cpus
    }

    pub fn max_jobs(&self) -> i64 {
        self.reloadable.read().unwrap().max_jobs
    }

    pub fn set_max_jobs(&self, value: i64) {
        self.reloadable.write().unwrap().max_jobs = value;
    }

    pub fn running_jobs(&self) -> i64 {
        self.running_jobs.load(Ordering::SeqCst)
    }

    /// Called when a dispatcher starts up.
    pub fn up(&self) {
        self.running_jobs.fetch_add(1, Ordering::SeqCst);
    }

    /// Called when a dispatcher exits.
    pub fn down(&self) {
        self.running_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    /// Whether the pool should grow: `running_jobs < max_jobs`.
    pub fn want_more_jobs(&self) -> bool {
        self.running_jobs() < self.max_jobs()
    }

    /// Whether the pool is over-target: `running_jobs > max_jobs`.
    pub fn want_less_jobs(&self) -> bool {
        self.running_jobs() > self.max_jobs()
    }

    /// Re-read `configfile` from disk, merging `cpus`/`max_jobs` into the
    /// reloadable subset only if the file's content changed since the last
    /// read (the md5-digest gate from `config.py::read_config`). Fields in
    /// the immutable startup subset are never touched here.
    ///
    /// Returns `true` if the file was (re-)adopted, `false` if it was
    /// unchanged, missing, or did not parse.
    pub fn reload_if_changed(&self) -> Result<bool, AsdbJobsError> {
        let Some((parsed, digest)) = ConfigFile::read(&self.startup.configfile) else {
            return Ok(false);
        };

        {
            let current = self.config_file_hash.read().unwrap();
            if current.as_ref() == Some(&digest) {
                return Ok(false);
            }
        }
        *self.config_file_hash.write().unwrap() = Some(digest);

        parsed.apply_to_reloadable(&mut self.reloadable.write().unwrap());
        info!(path = %self.startup.configfile.display(), "adopted updated configuration file");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    struct TempToml(PathBuf);

    impl TempToml {
        fn new(contents: &str) -> Self {
            let mut path = std::env::temp_dir();
            path.push(format!(
                "asdb-jobs-test-{}-{}.toml",
                std::process::id(),
                contents.len()
            ));
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
            Self(path)
        }
    }

    impl Drop for TempToml {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn bare_startup(configfile: PathBuf) -> StartupConfig {
        StartupConfig {
            configfile,
            db_dir: PathBuf::from("."),
            name: "test".into(),
            workdir: PathBuf::from("."),
            database: DatabaseConfig::default(),
        }
    }

    #[test]
    fn up_down_track_running_jobs() {
        let cfg = RunConfig::new(
            bare_startup(PathBuf::from("unused.toml")),
            ReloadableConfig { cpus: 1, max_jobs: 2 },
        );
        assert_eq!(cfg.running_jobs(), 0);
        cfg.up();
        cfg.up();
        assert_eq!(cfg.running_jobs(), 2);
        assert!(!cfg.want_more_jobs());
        assert!(!cfg.want_less_jobs());
        cfg.down();
        assert!(cfg.want_more_jobs());
    }

    #[test]
    fn reload_is_a_no_op_when_content_is_unchanged() {
        let path = TempToml::new("max_jobs = 7\n");
        let cfg = RunConfig::new(
            bare_startup(path.0.clone()),
            ReloadableConfig { cpus: 1, max_jobs: 5 },
        );

        assert!(cfg.reload_if_changed().unwrap());
        assert_eq!(cfg.max_jobs(), 7);
        assert!(!cfg.reload_if_changed().unwrap());
    }

    #[test]
    fn reload_ignores_unknown_keys() {
        let path = TempToml::new("max_jobs = 3\nnonsense_key = \"whatever\"\n");
        let cfg = RunConfig::new(
            bare_startup(path.0.clone()),
            ReloadableConfig { cpus: 1, max_jobs: 5 },
        );
        assert!(cfg.reload_if_changed().unwrap());
        assert_eq!(cfg.max_jobs(), 3);
    }

    #[test]
    fn bootstrap_config_file_wins_over_cli_flags() {
        let path = TempToml::new("max_jobs = 9\nname = \"from-file\"\n");
        let cli = Cli {
            configfile: Some(path.0.clone()),
            cpus: Some(1),
            db_dir: None,
            max_jobs: Some(2),
            name: Some("from-cli".into()),
            workdir: None,
            version: false,
        };
        let cfg = RunConfig::bootstrap(&cli);
        assert_eq!(cfg.max_jobs(), 9);
        assert_eq!(cfg.startup.name, "from-file");
    }
}
