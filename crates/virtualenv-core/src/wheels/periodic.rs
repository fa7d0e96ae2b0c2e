//! Background refresh of the embedded seed wheels.
//!
//! Each distribution keeps a ledger in the app data. A creation may start a
//! detached update when the last one completed long enough ago, and later
//! creations pick up a newer wheel once it has been public for a while.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time};
use url::Url;

use super::download::download_wheel;
use super::wheel::Wheel;
use crate::app_data::AppData;
use crate::config::EnvSnapshot;
use crate::error::VirtualenvError;

pub const PYPI_URL_ENV: &str = "VIRTUALENV_PYPI_URL";
const DEFAULT_PYPI_URL: &str = "https://pypi.org";
pub const PERIODIC_UPDATE_COMMAND: &str = "__periodic-update";

const LEDGER_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");
const PYPI_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

const UPDATE_PERIOD: Duration = Duration::days(14);
const UPDATE_ABORTED_AFTER: Duration = Duration::hours(1);
const RELEASE_GRACE: Duration = Duration::days(28);
const FOUND_GRACE: Duration = Duration::hours(1);

mod ledger_time {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::{OffsetDateTime, PrimitiveDateTime};

    use super::LEDGER_FORMAT;

    pub fn serialize<S: Serializer>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => {
                let text = value.format(LEDGER_FORMAT).map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&text)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|text| {
            PrimitiveDateTime::parse(&text, LEDGER_FORMAT)
                .map(PrimitiveDateTime::assume_utc)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// One wheel the updater found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVersion {
    pub filename: String,
    #[serde(with = "ledger_time", default)]
    pub release_date: Option<OffsetDateTime>,
    #[serde(with = "ledger_time", default)]
    pub found_date: Option<OffsetDateTime>,
    pub source: String,
}

impl NewVersion {
    /// Periodic finds are only used once released for four weeks and seen
    /// for an hour; manual ones immediately.
    pub fn usable(&self, now: OffsetDateTime) -> bool {
        if self.source != "periodic" {
            return true;
        }
        let released = self.release_date.is_some_and(|date| now - date >= RELEASE_GRACE);
        let settled = self.found_date.is_some_and(|date| now - date >= FOUND_GRACE);
        released && settled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLog {
    #[serde(with = "ledger_time", default)]
    pub started: Option<OffsetDateTime>,
    #[serde(with = "ledger_time", default)]
    pub completed: Option<OffsetDateTime>,
    #[serde(default)]
    pub periodic: Option<bool>,
    #[serde(default)]
    pub versions: Vec<NewVersion>,
}

impl UpdateLog {
    pub fn load(app_data: &AppData, distribution: &str, for_py_version: &str) -> Self {
        app_data
            .embed_update_log(distribution, for_py_version)
            .read()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, app_data: &AppData, distribution: &str, for_py_version: &str) -> Result<()> {
        app_data
            .embed_update_log(distribution, for_py_version)
            .write(&serde_json::to_value(self)?)
    }

    /// Completed over two weeks ago (or never) and no attempt running
    /// within the last hour.
    pub fn needs_update(&self, now: OffsetDateTime) -> bool {
        if self.completed.is_some_and(|completed| now - completed < UPDATE_PERIOD) {
            return false;
        }
        self.started.map_or(true, |started| now - started >= UPDATE_ABORTED_AFTER)
    }
}

/// Pick the wheel to seed with: a sufficiently aged update over `wheel`.
/// With `do_periodic_update` a background refresh may be started.
pub fn periodic_update(
    distribution: &str,
    for_py_version: &str,
    wheel: Option<Wheel>,
    app_data: &AppData,
    do_periodic_update: bool,
    interpreter: &Path,
) -> Result<Option<Wheel>> {
    if do_periodic_update {
        handle_auto_update(distribution, for_py_version, wheel.as_ref(), app_data, interpreter)?;
    }
    let now = OffsetDateTime::now_utc();
    let log = UpdateLog::load(app_data, distribution, for_py_version);
    for version in &log.versions {
        if wheel.as_ref().is_some_and(|wheel| wheel.filename() == version.filename) {
            break;
        }
        if !version.usable(now) {
            continue;
        }
        let candidate = app_data.house(for_py_version).join(&version.filename);
        if let Some(updated) = Wheel::from_path(&candidate).filter(Wheel::exists) {
            tracing::debug!(wheel = %updated, "using periodically updated wheel");
            return Ok(Some(updated));
        }
    }
    Ok(wheel)
}

fn handle_auto_update(
    distribution: &str,
    for_py_version: &str,
    wheel: Option<&Wheel>,
    app_data: &AppData,
    interpreter: &Path,
) -> Result<()> {
    let store = app_data.embed_update_log(distribution, for_py_version);
    let guard = match store.locked(true) {
        Ok(guard) => guard,
        Err(err) if matches!(err.downcast_ref::<VirtualenvError>(), Some(VirtualenvError::LockTimeout { .. })) => {
            tracing::debug!(distribution, "periodic update already in progress");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let mut log = UpdateLog::load(app_data, distribution, for_py_version);
    if !log.needs_update(OffsetDateTime::now_utc()) {
        return Ok(());
    }
    log.started = Some(OffsetDateTime::now_utc());
    log.periodic = Some(true);
    log.save(app_data, distribution, for_py_version)?;
    drop(guard);
    trigger_update(distribution, for_py_version, wheel, app_data, interpreter)
}

/// Start the detached `__periodic-update` child and return without
/// waiting for it.
pub fn trigger_update(
    distribution: &str,
    for_py_version: &str,
    wheel: Option<&Wheel>,
    app_data: &AppData,
    interpreter: &Path,
) -> Result<()> {
    let exe = std::env::current_exe().context("failed to locate the running executable")?;
    let wheel_arg = wheel.map_or_else(String::new, |wheel| wheel.path().display().to_string());
    let mut command = Command::new(&exe);
    command
        .arg(PERIODIC_UPDATE_COMMAND)
        .arg(distribution)
        .arg(for_py_version)
        .arg(&wheel_arg)
        .arg(app_data.root())
        .arg("--interpreter")
        .arg(interpreter)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    detach(&mut command);
    let child = command
        .spawn()
        .with_context(|| format!("failed to start {}", exe.display()))?;
    let version = wheel.map_or("<none>", Wheel::version);
    tracing::info!(
        "triggered periodic upgrade of {distribution}=={version} (for python {for_py_version}) via background process having PID {}",
        child.id()
    );
    Ok(())
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// The body of the background child: download the newest wheel and record
/// it in the ledger.
pub fn do_update(
    distribution: &str,
    for_py_version: &str,
    embed_wheel: Option<&Path>,
    app_data: &AppData,
    interpreter: &Path,
    env: &EnvSnapshot,
) -> Result<Option<NewVersion>> {
    let house = app_data.house(for_py_version);
    let result = download_wheel(distribution, None, for_py_version, &[], &house, interpreter, env);
    let _guard = app_data.embed_update_log(distribution, for_py_version).locked(false)?;
    let mut log = UpdateLog::load(app_data, distribution, for_py_version);
    let now = OffsetDateTime::now_utc();
    log.completed = Some(now);
    let found = match result {
        Ok(wheel) => {
            let known = log.versions.iter().any(|v| v.filename == wheel.filename());
            let embedded = embed_wheel
                .and_then(Path::file_name)
                .is_some_and(|name| name.to_string_lossy() == wheel.filename());
            if known || embedded {
                None
            } else {
                let version = NewVersion {
                    filename: wheel.filename(),
                    release_date: release_date_for(&wheel, env),
                    found_date: Some(now),
                    source: if log.periodic == Some(true) { "periodic" } else { "manual" }.to_string(),
                };
                log.versions.insert(0, version.clone());
                Some(version)
            }
        }
        Err(err) => {
            tracing::error!(distribution, for_py_version, "periodic update failed: {err:#}");
            None
        }
    };
    log.save(app_data, distribution, for_py_version)?;
    Ok(found)
}

/// Upload time from PyPI, else an estimate from the version number.
pub fn release_date_for(wheel: &Wheel, env: &EnvSnapshot) -> Option<OffsetDateTime> {
    let base = env.var(PYPI_URL_ENV).unwrap_or(DEFAULT_PYPI_URL);
    match fetch_release_date(base, wheel.distribution(), wheel.version()) {
        Ok(Some(date)) => return Some(date),
        Ok(None) => tracing::debug!(wheel = %wheel, "release not listed on index"),
        Err(err) => tracing::debug!(wheel = %wheel, "release date lookup failed: {err:#}"),
    }
    approximate_release_date(&wheel.version_tuple())
}

fn fetch_release_date(base: &str, distribution: &str, version: &str) -> Result<Option<OffsetDateTime>> {
    let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))
        .with_context(|| format!("invalid index url {base}"))?;
    let url = base
        .join(&format!("pypi/{distribution}/json"))
        .with_context(|| format!("invalid index url {base}"))?;
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("virtualenv/", env!("CARGO_PKG_VERSION")))
        .timeout(StdDuration::from_secs(5))
        .build()
        .context("failed to build http client")?;
    let body: serde_json::Value = client
        .get(url.clone())
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("unexpected response for {url}"))?
        .json()
        .with_context(|| format!("invalid json from {url}"))?;
    let Some(upload_time) = body["releases"][version][0]["upload_time"].as_str() else {
        return Ok(None);
    };
    let upload_time = upload_time.split('.').next().unwrap_or(upload_time);
    let parsed = PrimitiveDateTime::parse(upload_time, PYPI_FORMAT)
        .with_context(|| format!("unexpected upload time {upload_time}"))?;
    Ok(Some(parsed.assume_utc()))
}

/// Releases of the form `YY.N` ship roughly at the start of month `3N+1`;
/// the estimate is the end of that month.
pub fn approximate_release_date(version: &[u64]) -> Option<OffsetDateTime> {
    let year = i32::try_from(*version.first()?).ok()? + 2000;
    let minor = version.get(1).copied().unwrap_or(0);
    let month = Month::try_from(u8::try_from(minor * 3 + 1).ok()?).ok()?;
    let start = Date::from_calendar_date(year, month, 1).ok()?;
    let days = i64::from(month.length(year));
    Some(PrimitiveDateTime::new(start, Time::MIDNIGHT).assume_utc() + Duration::days(days))
}

/// Arguments of the hidden child command, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicUpdateArgs {
    pub distribution: String,
    pub for_py_version: String,
    pub wheel: Option<PathBuf>,
    pub app_data: PathBuf,
    pub interpreter: PathBuf,
}

impl PeriodicUpdateArgs {
    pub fn run(&self, env: &EnvSnapshot) -> Result<()> {
        let app_data = AppData::store(&self.app_data);
        do_update(
            &self.distribution,
            &self.for_py_version,
            self.wheel.as_deref(),
            &app_data,
            &self.interpreter,
            env,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn trigger_rules() {
        let now = datetime!(2024-06-01 12:00 UTC);
        let mut log = UpdateLog::default();
        assert!(log.needs_update(now));

        log.started = Some(now - Duration::minutes(30));
        assert!(!log.needs_update(now));
        log.started = Some(now - Duration::hours(2));
        assert!(log.needs_update(now));

        log.completed = Some(now - Duration::days(3));
        assert!(!log.needs_update(now));
        log.completed = Some(now - Duration::days(15));
        assert!(log.needs_update(now));
    }

    #[test]
    fn periodic_versions_wait_for_grace() {
        let now = datetime!(2024-06-01 12:00 UTC);
        let mut version = NewVersion {
            filename: "pip-24.0-py3-none-any.whl".into(),
            release_date: Some(now - Duration::days(10)),
            found_date: Some(now - Duration::days(2)),
            source: "periodic".into(),
        };
        assert!(!version.usable(now));
        version.release_date = Some(now - Duration::days(30));
        assert!(version.usable(now));
        version.found_date = Some(now - Duration::minutes(5));
        assert!(!version.usable(now));
        version.source = "manual".into();
        assert!(version.usable(now));
    }

    #[test]
    fn ledger_round_trips_through_app_data() -> Result<()> {
        let temp = tempdir()?;
        let app_data = AppData::store(temp.path());
        let log = UpdateLog {
            started: Some(datetime!(2024-06-01 12:00:00.5 UTC)),
            completed: None,
            periodic: Some(true),
            versions: vec![NewVersion {
                filename: "pip-24.0-py3-none-any.whl".into(),
                release_date: Some(datetime!(2024-02-03 10:00 UTC)),
                found_date: Some(datetime!(2024-06-01 12:30 UTC)),
                source: "periodic".into(),
            }],
        };
        log.save(&app_data, "pip", "3.12")?;
        let raw = app_data.embed_update_log("pip", "3.12").read().expect("ledger written");
        assert_eq!(raw["started"], json!("2024-06-01T12:00:00.500000Z"));
        assert_eq!(raw["completed"], json!(null));
        assert_eq!(UpdateLog::load(&app_data, "pip", "3.12"), log);
        Ok(())
    }

    #[test]
    fn aged_updates_replace_the_embedded_wheel() -> Result<()> {
        let temp = tempdir()?;
        let app_data = AppData::store(temp.path());
        let house = app_data.house("3.12");
        std::fs::create_dir_all(&house)?;
        std::fs::write(house.join("pip-24.0-py3-none-any.whl"), b"")?;
        let now = OffsetDateTime::now_utc();
        let log = UpdateLog {
            completed: Some(now),
            versions: vec![NewVersion {
                filename: "pip-24.0-py3-none-any.whl".into(),
                release_date: Some(now - Duration::days(60)),
                found_date: Some(now - Duration::days(1)),
                source: "periodic".into(),
            }],
            ..UpdateLog::default()
        };
        log.save(&app_data, "pip", "3.12")?;
        let embedded = Wheel::new("/bundle/pip-23.3-py3-none-any.whl")?;
        let chosen = periodic_update("pip", "3.12", Some(embedded), &app_data, false, Path::new("python"))?
            .expect("a wheel");
        assert_eq!(chosen.version(), "24.0");
        Ok(())
    }

    #[test]
    fn version_number_estimates_release() {
        let date = approximate_release_date(&[24, 2]).expect("valid date");
        assert_eq!(date, datetime!(2024-08-01 0:00 UTC));
        assert!(approximate_release_date(&[24, 9]).is_none());
        assert!(approximate_release_date(&[]).is_none());
    }

    #[test]
    fn release_date_from_index() -> Result<()> {
        use httptest::{matchers::*, responders::*, Expectation, Server};
        let server = match std::panic::catch_unwind(Server::run) {
            Ok(server) => server,
            Err(_) => {
                eprintln!("skipping release date test (httptest server unavailable)");
                return Ok(());
            }
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/pypi/pip/json")).respond_with(json_encoded(
                json!({"releases": {"24.0": [{"upload_time": "2024-02-03T11:58:05"}]}}),
            )),
        );
        let base = server.url_str("");
        let env = EnvSnapshot::from_pairs(&[(PYPI_URL_ENV, base.as_str())]);
        let wheel = Wheel::new("/house/pip-24.0-py3-none-any.whl")?;
        let date = release_date_for(&wheel, &env).expect("date");
        assert_eq!(date, datetime!(2024-02-03 11:58:05 UTC));
        Ok(())
    }
}
