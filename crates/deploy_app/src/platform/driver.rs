//! Synchronous app loop: feeds messages through `update`, hands effects to
//! the engine and renders what changed.

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use deploy_core::{
    update, AppState, ConfigPatch, JobOutcome, Msg, NoticeLevel, Project, Verification, Workbook,
    WorkflowStep,
};
use deploy_logging::{deploy_debug, deploy_info};

use super::effects::EffectRunner;
use super::plan::DeployPlan;
use super::render;

/// Upper bound for a catalog lookup or connection test.
const REQUEST_WAIT: Duration = Duration::from_secs(60);
/// Interval of render ticks while waiting for the engine.
const TICK: Duration = Duration::from_millis(75);

pub(crate) struct Session<W: Write> {
    state: AppState,
    runner: EffectRunner,
    out: W,
    rendered: Vec<String>,
    last_error: Option<String>,
}

impl<W: Write> Session<W> {
    pub(crate) fn new(runner: EffectRunner, out: W) -> Self {
        Self {
            state: AppState::new(),
            runner,
            out,
            rendered: Vec::new(),
            last_error: None,
        }
    }

    pub(crate) fn dispatch(&mut self, msg: Msg) -> anyhow::Result<()> {
        let state = std::mem::take(&mut self.state);
        let (mut state, effects) = update(state, msg);
        let notices = state.take_notices();
        let dirty = state.consume_dirty();
        let view = dirty.then(|| state.view());
        self.state = state;
        self.runner.enqueue(effects);

        for notice in notices {
            if notice.level == NoticeLevel::Error {
                self.last_error = Some(notice.text.clone());
            }
            writeln!(self.out, "{}", render::notice_line(&notice))?;
        }
        if let Some(view) = view {
            let lines = render::render(&view);
            for line in lines.iter().filter(|line| !self.rendered.contains(line)) {
                writeln!(self.out, "{line}")?;
            }
            self.rendered = lines;
        }
        Ok(())
    }

    /// Pumps engine events until `done` holds or `timeout` elapses.
    pub(crate) fn wait_until(
        &mut self,
        what: &str,
        timeout: Option<Duration>,
        done: impl Fn(&AppState) -> bool,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        while !done(&self.state) {
            if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                bail!("timed out waiting for {what}");
            }
            let msg = self
                .runner
                .next_msg(TICK)
                .with_context(|| format!("lost the engine while waiting for {what}"))?;
            self.dispatch(msg.unwrap_or(Msg::Tick))?;
        }
        Ok(())
    }

    fn take_error(&mut self, fallback: &str) -> anyhow::Error {
        anyhow!(self.last_error.take().unwrap_or_else(|| fallback.to_string()))
    }

    pub(crate) fn load_projects(&mut self) -> anyhow::Result<Vec<Project>> {
        self.last_error = None;
        self.dispatch(Msg::Mounted)?;
        self.wait_until("projects", Some(REQUEST_WAIT), |state| {
            !state.view().projects_loading
        })?;
        if let Some(err) = self.last_error.take() {
            bail!(err);
        }
        Ok(self.state.projects().to_vec())
    }

    pub(crate) fn load_workbooks(&mut self, project: &str) -> anyhow::Result<Vec<Workbook>> {
        self.last_error = None;
        self.dispatch(Msg::SourceProjectSelected(Some(project.to_string())))?;
        self.wait_until("workbooks", Some(REQUEST_WAIT), |state| {
            !state.view().workbooks_loading
        })?;
        if let Some(err) = self.last_error.take() {
            bail!(err);
        }
        Ok(self.state.workbooks().to_vec())
    }

    /// Plays a plan from project selection to the job outcome.
    pub(crate) fn run_plan(&mut self, plan: &DeployPlan) -> anyhow::Result<JobOutcome> {
        let projects = self.load_projects()?;
        let source = resolve_project(&projects, &plan.source_project)?;
        let workbooks = self.load_workbooks(&source.luid)?;
        let workbook = workbooks
            .iter()
            .find(|wb| wb.luid == plan.workbook || wb.name == plan.workbook)
            .ok_or_else(|| anyhow!("workbook {:?} not found in {}", plan.workbook, source.name))?;
        self.dispatch(Msg::WorkbookSelected(Some(workbook.luid.clone())))?;
        if let Some(target) = plan.target_project.as_deref() {
            let target = resolve_project(&projects, target)?;
            self.dispatch(Msg::TargetProjectSelected(Some(target.luid.clone())))?;
        }

        self.dispatch(Msg::NextClicked)?;
        if self.state.step() != WorkflowStep::Configuration {
            return Err(self.take_error("could not start configuration"));
        }

        let total = self.state.datasources().len();
        for index in 0..total {
            if index > 0 {
                self.dispatch(Msg::EntityNext)?;
            }
            self.configure_current(plan)?;
        }

        self.dispatch(Msg::ExecuteClicked(plan.kind.into()))?;
        if self.state.step() != WorkflowStep::Executing {
            return Err(self.take_error("could not start the job"));
        }
        deploy_info!("Waiting for {:?} to finish", plan.kind);
        self.wait_until("the job", None, |state| state.job().is_none())?;

        self.state
            .outcome()
            .cloned()
            .context("job ended without an outcome")
    }

    fn configure_current(&mut self, plan: &DeployPlan) -> anyhow::Result<()> {
        let datasource = self
            .state
            .current_datasource()
            .cloned()
            .context("no datasource to configure")?;
        let entry = plan
            .datasource(datasource.luid.as_str(), &datasource.name)
            .with_context(|| format!("plan has no entry for datasource {}", datasource.name))?;

        if let Some(index) = entry.use_source_connection {
            self.dispatch(Msg::SourceInfoToggled)?;
            self.wait_until("source connection details", Some(REQUEST_WAIT), |state| {
                !state.view().source_info_loading
            })?;
            self.dispatch(Msg::SourceConnectionToggled {
                index,
                checked: true,
            })?;
            self.dispatch(Msg::SourceInfoToggled)?;
        }

        let current = self.state.current_config().cloned().unwrap_or_default();
        let mut patch = ConfigPatch::new().connection(entry.connection_over(&current.connection));
        if let Some(db_type) = entry.db_type() {
            patch = patch.db_type(db_type);
        }
        self.dispatch(Msg::ConfigEdited(patch))?;

        deploy_debug!("Testing planned connection for {}", datasource.name);
        self.last_error = None;
        self.dispatch(Msg::TestConnectionClicked)?;
        self.wait_until("the connection test", Some(REQUEST_WAIT), |state| {
            !state.view().entity.is_some_and(|entity| entity.testing)
        })?;
        let verified = self
            .state
            .current_config()
            .is_some_and(|config| config.verification == Verification::Success);
        if !verified {
            return Err(self.take_error("connection test failed"));
        }
        Ok(())
    }

    pub(crate) fn write_lines(&mut self, lines: &[String]) -> anyhow::Result<()> {
        for line in lines {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    pub(crate) fn finish(self) {
        self.runner.shutdown();
    }
}

fn resolve_project<'a>(projects: &'a [Project], wanted: &str) -> anyhow::Result<&'a Project> {
    projects
        .iter()
        .find(|p| p.luid == wanted)
        .or_else(|| projects.iter().find(|p| p.name == wanted))
        .ok_or_else(|| anyhow!("project {wanted:?} not found"))
}
