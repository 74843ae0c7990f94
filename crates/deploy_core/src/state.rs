use crate::view_model::{AppViewModel, EntityView, ProgressView};
use crate::{
    ActiveJob, ConfigStore, ConnectionInfo, DatasourceConfig, DatasourceRef, Effect, EntityId,
    Epochs, FetchSlot, JobOutcome, Project, Workbook,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowStep {
    #[default]
    Selection,
    Configuration,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible message; each one is handed out exactly once by [`AppState::take_notices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppState {
    step: WorkflowStep,
    epochs: Epochs,
    projects: Vec<Project>,
    projects_loading: bool,
    source_project: Option<String>,
    workbooks: Vec<Workbook>,
    workbooks_loading: bool,
    workbook: Option<String>,
    target_project: Option<String>,
    configs: ConfigStore,
    entity_index: usize,
    chosen_connection: Option<usize>,
    info_visible: bool,
    info_loading: bool,
    connection_info: Option<ConnectionInfo>,
    testing: Option<EntityId>,
    job: Option<ActiveJob>,
    outcome: Option<JobOutcome>,
    notices: Vec<Notice>,
    dirty: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> AppViewModel {
        let entity = self.current_datasource().map(|ds| EntityView {
            index: self.entity_index,
            total: self.datasources().len(),
            id: ds.luid.clone(),
            name: ds.name.clone(),
            config: self.configs.get(&ds.luid).cloned().unwrap_or_default(),
            testing: self.testing.as_ref() == Some(&ds.luid),
            chosen_connection: self.chosen_connection,
        });
        AppViewModel {
            step: self.step,
            projects: self.projects.clone(),
            projects_loading: self.projects_loading,
            source_project: self.source_project.clone(),
            workbooks: self.workbooks.clone(),
            workbooks_loading: self.workbooks_loading,
            workbook: self.workbook.clone(),
            target_project: self.target_project.clone(),
            entity,
            source_info_visible: self.info_visible,
            source_info_loading: self.info_loading,
            source_info: self.connection_info.clone(),
            all_ready: self.all_datasources_ready(),
            progress: self.job.as_ref().map(ProgressView::from_job),
            outcome: self.outcome.clone(),
            dirty: self.dirty,
        }
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    pub fn epochs(&self) -> &Epochs {
        &self.epochs
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.configs
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn workbooks(&self) -> &[Workbook] {
        &self.workbooks
    }

    pub fn selected_workbook(&self) -> Option<&Workbook> {
        let luid = self.workbook.as_deref()?;
        self.workbooks.iter().find(|wb| wb.luid == luid)
    }

    pub fn datasources(&self) -> &[DatasourceRef] {
        self.selected_workbook()
            .map(|wb| wb.datasources.as_slice())
            .unwrap_or_default()
    }

    pub fn current_datasource(&self) -> Option<&DatasourceRef> {
        if self.step == WorkflowStep::Selection {
            return None;
        }
        self.datasources().get(self.entity_index)
    }

    pub fn current_entity(&self) -> Option<EntityId> {
        self.current_datasource().map(|ds| ds.luid.clone())
    }

    pub fn current_config(&self) -> Option<&DatasourceConfig> {
        let ds = self.current_datasource()?;
        self.configs.get(&ds.luid)
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection_info.as_ref()
    }

    pub fn job(&self) -> Option<&ActiveJob> {
        self.job.as_ref()
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.outcome.as_ref()
    }

    pub fn target_project(&self) -> Option<&str> {
        self.target_project.as_deref()
    }

    pub fn all_datasources_ready(&self) -> bool {
        let ids = self.entity_ids();
        !ids.is_empty() && self.configs.all_ready(&ids, DatasourceConfig::is_ready)
    }

    /// Drains queued user-visible notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Returns whether state changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn entity_ids(&self) -> Vec<EntityId> {
        self.datasources().iter().map(|ds| ds.luid.clone()).collect()
    }

    pub(crate) fn notify(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.notices.push(Notice {
            level,
            text: text.into(),
        });
        self.mark_dirty();
    }

    pub(crate) fn set_step(&mut self, step: WorkflowStep) {
        self.step = step;
        self.mark_dirty();
    }

    pub(crate) fn epochs_mut(&mut self) -> &mut Epochs {
        &mut self.epochs
    }

    pub(crate) fn configs_mut(&mut self) -> &mut ConfigStore {
        self.mark_dirty();
        &mut self.configs
    }

    pub(crate) fn source_project(&self) -> Option<&str> {
        self.source_project.as_deref()
    }

    pub(crate) fn workbook_luid(&self) -> Option<&str> {
        self.workbook.as_deref()
    }

    pub(crate) fn set_projects_loading(&mut self, loading: bool) {
        self.projects_loading = loading;
        self.mark_dirty();
    }

    pub(crate) fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
        self.projects_loading = false;
        self.mark_dirty();
    }

    pub(crate) fn set_source_project(&mut self, project: Option<String>) {
        self.source_project = project;
        self.mark_dirty();
    }

    /// Drops the workbook list and selection synchronously.
    pub(crate) fn clear_workbooks(&mut self, loading: bool) {
        self.workbooks.clear();
        self.workbook = None;
        self.workbooks_loading = loading;
        self.mark_dirty();
    }

    pub(crate) fn set_workbooks(&mut self, workbooks: Vec<Workbook>) {
        self.workbooks = workbooks;
        self.workbook = None;
        self.workbooks_loading = false;
        self.mark_dirty();
    }

    pub(crate) fn set_workbooks_loading(&mut self, loading: bool) {
        self.workbooks_loading = loading;
        self.mark_dirty();
    }

    pub(crate) fn set_workbook(&mut self, luid: Option<String>) {
        self.workbook = luid;
        self.mark_dirty();
    }

    pub(crate) fn set_target_project(&mut self, target: Option<String>) {
        self.target_project = target;
        self.mark_dirty();
    }

    pub(crate) fn entity_index(&self) -> usize {
        self.entity_index
    }

    pub(crate) fn set_entity_index(&mut self, index: usize) {
        self.entity_index = index;
        self.chosen_connection = None;
        self.mark_dirty();
    }

    pub(crate) fn set_chosen_connection(&mut self, index: Option<usize>) {
        self.chosen_connection = index;
        self.mark_dirty();
    }

    pub(crate) fn info_visible(&self) -> bool {
        self.info_visible
    }

    pub(crate) fn show_info(&mut self, visible: bool) {
        self.info_visible = visible;
        self.info_loading = visible;
        self.connection_info = None;
        self.mark_dirty();
    }

    pub(crate) fn set_connection_info(&mut self, info: Option<ConnectionInfo>) {
        self.connection_info = info;
        self.info_loading = false;
        self.mark_dirty();
    }

    pub(crate) fn testing(&self) -> Option<&EntityId> {
        self.testing.as_ref()
    }

    pub(crate) fn set_testing(&mut self, entity: Option<EntityId>) {
        self.testing = entity;
        self.mark_dirty();
    }

    pub(crate) fn job_mut(&mut self) -> Option<&mut ActiveJob> {
        self.mark_dirty();
        self.job.as_mut()
    }

    pub(crate) fn start_job(&mut self, job: ActiveJob) {
        self.job = Some(job);
        self.outcome = None;
        self.mark_dirty();
    }

    pub(crate) fn take_job(&mut self) -> Option<ActiveJob> {
        self.mark_dirty();
        self.job.take()
    }

    pub(crate) fn set_outcome(&mut self, outcome: Option<JobOutcome>) {
        self.outcome = outcome;
        self.mark_dirty();
    }

    /// Cancels the dependent requests of the configuration step and stops any
    /// running job. Store contents are left to the caller.
    pub(crate) fn abandon_configuration(&mut self, effects: &mut Vec<Effect>) {
        if let Some(job) = self.take_job() {
            self.epochs.advance(FetchSlot::Job);
            effects.push(Effect::CancelJob { run: job.run });
        }
        for slot in [FetchSlot::ConnectionInfo, FetchSlot::ConnectionTest] {
            self.epochs.advance(slot);
            effects.push(Effect::CancelSlot { slot });
        }
        self.info_visible = false;
        self.info_loading = false;
        self.connection_info = None;
        self.testing = None;
        self.chosen_connection = None;
        self.outcome = None;
        self.mark_dirty();
    }

    /// Reinitializes the store to defaults for the selected workbook's datasources.
    pub(crate) fn reset_configuration(&mut self) {
        let ids = self.entity_ids();
        self.configs.reset(&ids);
        self.entity_index = 0;
        self.chosen_connection = None;
        self.mark_dirty();
    }
}
