//! One environment creation: discovery, then the creator, then the seeder.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;

use crate::app_data::{AppData, AppDataOptions};
use crate::config::EnvSnapshot;
use crate::create::{Creator, CreatorOptions};
use crate::discovery::{get_interpreter, PyInfo};
use crate::outcome::ExecutionOutcome;
use crate::seed::{SeedOptions, Seeder};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Discovery requests, tried in order.
    pub python: Vec<String>,
    pub app_data: AppDataOptions,
    pub creator: CreatorOptions,
    pub seed: SeedOptions,
    /// Accepted and reported; no scripts are generated.
    pub activators: Vec<String>,
}

#[derive(Debug)]
pub struct Session {
    app_data: AppData,
    creator: Creator,
    seeder: Seeder,
    activators: Vec<String>,
}

impl Session {
    /// Resolve the interpreter and pick the creator without touching the
    /// destination yet.
    pub fn build(options: SessionOptions, env: &EnvSnapshot) -> Result<Self> {
        let app_data = AppData::open(&options.app_data, env)?;
        if let Err(err) = app_data.house_keep() {
            tracing::warn!(root = %app_data.root().display(), "app data house keeping failed: {err:#}");
        }
        let interpreter = get_interpreter(&app_data, &options.python, env)?;
        tracing::debug!(interpreter = %interpreter, "selected interpreter");
        let creator = Creator::select(&interpreter, options.creator)?;
        Ok(Self {
            app_data,
            creator,
            seeder: Seeder::new(options.seed),
            activators: options.activators,
        })
    }

    pub fn interpreter(&self) -> &PyInfo {
        self.creator.interpreter()
    }

    pub fn creator(&self) -> &Creator {
        &self.creator
    }

    pub fn seeder(&self) -> &Seeder {
        &self.seeder
    }

    pub fn app_data(&self) -> &AppData {
        &self.app_data
    }

    pub fn run(&self, env: &EnvSnapshot) -> Result<()> {
        tracing::info!(creator = %self.creator, "create virtual environment");
        self.creator
            .run()
            .with_context(|| format!("failed to create {}", self.creator.dest().display()))?;
        if self.seeder.enabled() {
            tracing::info!(seeder = %self.seeder.describe(&self.creator, &self.app_data), "add seed packages");
        }
        self.seeder.run(&self.creator, &self.app_data, env)?;
        Ok(())
    }

    fn outcome(&self, elapsed: Duration) -> ExecutionOutcome {
        let message = format!(
            "created virtual environment {} in {}ms",
            self.interpreter().describe(),
            elapsed.as_millis()
        );
        let mut lines = vec![
            format!("creator {}", self.creator),
            format!("seeder {}", self.seeder.describe(&self.creator, &self.app_data)),
        ];
        if !self.activators.is_empty() {
            lines.push(format!("activators {}", self.activators.join(",")));
        }
        ExecutionOutcome::success(
            message,
            json!({
                "dest": self.creator.dest().display().to_string(),
                "creator": self.creator.kind().to_string(),
                "seeder": self.seeder.kind().to_string(),
                "lines": lines,
            }),
        )
    }
}

/// Create one environment and describe what was done.
pub fn create_environment(options: SessionOptions, env: &EnvSnapshot) -> Result<ExecutionOutcome> {
    let start = Instant::now();
    let session = Session::build(options, env)?;
    session.run(env)?;
    Ok(session.outcome(start.elapsed()))
}
