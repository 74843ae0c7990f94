//! Scripted deployment plans for the `run` command.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use deploy_core::{ConnectionParams, DbType, JobKind};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub(crate) enum PlanKind {
    #[default]
    Migration,
    MetadataExport,
}

impl From<PlanKind> for JobKind {
    fn from(kind: PlanKind) -> Self {
        match kind {
            PlanKind::Migration => JobKind::Migration,
            PlanKind::MetadataExport => JobKind::MetadataExport,
        }
    }
}

/// Projects and workbooks may be named by LUID or by display name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct DeployPlan {
    pub source_project: String,
    pub workbook: String,
    #[serde(default)]
    pub target_project: Option<String>,
    #[serde(default)]
    pub kind: PlanKind,
    #[serde(default)]
    pub datasources: Vec<DatasourcePlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DatasourcePlan {
    /// Datasource LUID or name.
    pub datasource: String,
    pub db_type: Option<String>,
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Index of a source connection to pre-fill host, port and username from.
    pub use_source_connection: Option<usize>,
}

impl DeployPlan {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        let plan: DeployPlan = ron::from_str(&text)
            .with_context(|| format!("failed to parse plan {}", path.display()))?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.source_project.trim().is_empty() {
            bail!("plan needs a source_project");
        }
        if self.workbook.trim().is_empty() {
            bail!("plan needs a workbook");
        }
        if self.kind == PlanKind::Migration
            && self.target_project.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            bail!("a migration plan needs a target_project");
        }
        for entry in &self.datasources {
            if let Some(raw) = entry.db_type.as_deref() {
                if DbType::parse(raw).is_none() {
                    bail!("unknown db_type {raw:?} for datasource {}", entry.datasource);
                }
            }
        }
        Ok(())
    }

    /// Finds the entry for a datasource by LUID first, then by name.
    pub(crate) fn datasource(&self, luid: &str, name: &str) -> Option<&DatasourcePlan> {
        self.datasources
            .iter()
            .find(|entry| entry.datasource == luid)
            .or_else(|| self.datasources.iter().find(|entry| entry.datasource == name))
    }
}

impl DatasourcePlan {
    pub(crate) fn db_type(&self) -> Option<DbType> {
        self.db_type.as_deref().and_then(DbType::parse)
    }

    /// Overlays the non-empty plan fields on `base`.
    pub(crate) fn connection_over(&self, base: &ConnectionParams) -> ConnectionParams {
        let pick = |planned: &str, current: &str| {
            if planned.trim().is_empty() {
                current.to_string()
            } else {
                planned.to_string()
            }
        };
        ConnectionParams {
            host: pick(&self.host, &base.host),
            port: pick(&self.port, &base.port),
            database: pick(&self.database, &base.database),
            username: pick(&self.username, &base.username),
            password: pick(&self.password, &base.password),
        }
    }
}
