use deploy_logging::{deploy_debug, deploy_info, deploy_warn};

use crate::{
    ActiveJob, AppState, ConfigPatch, ConnectionParams, ConnectionTestReport,
    ConnectionTestRequest, DatasourceDeployment, DbType, DeployStep, Effect, EntityId, Epoch,
    FailureClass, FetchPayload, FetchRequest, FetchSlot, JobKind, JobOutcome, JobRequest,
    JobResult, Msg, NoticeLevel, Verification, WorkflowStep,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: AppState, msg: Msg) -> (AppState, Vec<Effect>) {
    let mut effects = Vec::new();
    match msg {
        Msg::Mounted => {
            let epoch = state.epochs_mut().advance(FetchSlot::Projects);
            state.set_projects_loading(true);
            effects.push(Effect::Fetch {
                epoch,
                request: FetchRequest::Projects,
            });
        }
        Msg::SourceProjectSelected(project) => {
            select_source_project(&mut state, non_empty(project), &mut effects);
        }
        Msg::WorkbookSelected(luid) => {
            select_workbook(&mut state, non_empty(luid), &mut effects);
        }
        Msg::TargetProjectSelected(target) => {
            if state.step() == WorkflowStep::Executing {
                deploy_debug!("Target change ignored while a job is running");
            } else {
                state.set_target_project(non_empty(target));
            }
        }
        Msg::NextClicked => advance_to_configuration(&mut state),
        Msg::EntityNext => {
            let next = state.entity_index() + 1;
            if next < state.datasources().len() {
                show_entity(&mut state, next, &mut effects);
            }
        }
        Msg::EntityPrev => {
            if let Some(prev) = state.entity_index().checked_sub(1) {
                show_entity(&mut state, prev, &mut effects);
            }
        }
        Msg::SourceInfoToggled => toggle_source_info(&mut state, &mut effects),
        Msg::ConfigEdited(patch) => edit_current(&mut state, patch, &mut effects),
        Msg::SourceConnectionToggled { index, checked } => {
            toggle_source_connection(&mut state, index, checked, &mut effects);
        }
        Msg::TestConnectionClicked => request_connection_test(&mut state, &mut effects),
        Msg::ExecuteClicked(kind) => execute(&mut state, kind, &mut effects),
        Msg::TargetCleared => {
            if state.step() == WorkflowStep::Configuration {
                state.abandon_configuration(&mut effects);
                state.set_target_project(None);
                state.reset_configuration();
            }
        }
        Msg::ClearClicked => clear_all(&mut state, &mut effects),
        Msg::FetchCompleted {
            slot,
            epoch,
            result,
        } => {
            if state.epochs().is_current(slot, epoch) {
                apply_fetch(&mut state, slot, result);
            } else {
                deploy_debug!(
                    "Discarding stale {:?} response (epoch {}, current {})",
                    slot,
                    epoch,
                    state.epochs().current(slot)
                );
            }
        }
        Msg::ConnectionTested {
            entity,
            epoch,
            result,
        } => apply_connection_test(&mut state, entity, epoch, result),
        Msg::JobSubmitted { run, job_id } => {
            if let Some(job) = current_job(&mut state, run) {
                deploy_info!("Run {} accepted by backend as job {}", run, job_id);
                job.job_id = Some(job_id);
            }
        }
        Msg::JobProgress {
            run,
            stage,
            message,
            step,
        } => {
            if let Some(job) = current_job(&mut state, run) {
                if stage < job.stage {
                    deploy_warn!(
                        "Ignoring regressed stage {} (current {}) for run {}",
                        stage,
                        job.stage,
                        run
                    );
                } else {
                    job.stage = stage;
                    job.message = message;
                    if let Some(step) = step.as_deref().and_then(DeployStep::from_key) {
                        job.step = Some(step);
                    }
                }
            }
        }
        Msg::JobFinished { run, result } => finish_job(&mut state, run, result),
        Msg::Tick | Msg::NoOp => {}
    }

    (state, effects)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn select_source_project(state: &mut AppState, project: Option<String>, effects: &mut Vec<Effect>) {
    if state.source_project() == project.as_deref() {
        return;
    }
    // A new source invalidates everything downstream of it.
    if state.step() != WorkflowStep::Selection {
        state.abandon_configuration(effects);
    }
    state.configs_mut().clear();
    state.set_target_project(None);
    state.set_entity_index(0);
    state.set_step(WorkflowStep::Selection);
    state.set_source_project(project.clone());

    let epoch = state.epochs_mut().advance(FetchSlot::Workbooks);
    match project {
        Some(project_luid) => {
            state.clear_workbooks(true);
            effects.push(Effect::Fetch {
                epoch,
                request: FetchRequest::Workbooks { project_luid },
            });
        }
        None => {
            state.clear_workbooks(false);
            effects.push(Effect::CancelSlot {
                slot: FetchSlot::Workbooks,
            });
        }
    }
}

fn select_workbook(state: &mut AppState, luid: Option<String>, effects: &mut Vec<Effect>) {
    if state.workbook_luid() == luid.as_deref() {
        return;
    }
    if let Some(luid) = luid.as_deref() {
        if !state.workbooks().iter().any(|wb| wb.luid == luid) {
            state.notify(NoticeLevel::Error, format!("Unknown workbook {luid}"));
            return;
        }
    }
    state.set_workbook(luid);

    match state.step() {
        WorkflowStep::Selection => {}
        WorkflowStep::Configuration | WorkflowStep::Executing => {
            state.abandon_configuration(effects);
            if state.datasources().is_empty() {
                state.configs_mut().clear();
                state.set_entity_index(0);
                state.set_step(WorkflowStep::Selection);
            } else {
                state.reset_configuration();
                state.set_step(WorkflowStep::Configuration);
            }
        }
    }
}

fn advance_to_configuration(state: &mut AppState) {
    if state.step() != WorkflowStep::Selection {
        return;
    }
    if state.selected_workbook().is_none() {
        state.notify(NoticeLevel::Error, "Please select a workbook");
        return;
    }
    if state.datasources().is_empty() {
        state.notify(
            NoticeLevel::Error,
            "The selected workbook has no datasources to configure",
        );
        return;
    }
    state.reset_configuration();
    state.set_outcome(None);
    state.set_step(WorkflowStep::Configuration);
}

fn show_entity(state: &mut AppState, index: usize, effects: &mut Vec<Effect>) {
    if state.step() == WorkflowStep::Selection {
        return;
    }
    state.set_entity_index(index);
    if state.info_visible() {
        fetch_source_info(state, effects);
    }
}

fn toggle_source_info(state: &mut AppState, effects: &mut Vec<Effect>) {
    if state.step() != WorkflowStep::Configuration {
        return;
    }
    if state.info_visible() {
        state.epochs_mut().advance(FetchSlot::ConnectionInfo);
        state.show_info(false);
        effects.push(Effect::CancelSlot {
            slot: FetchSlot::ConnectionInfo,
        });
    } else {
        fetch_source_info(state, effects);
    }
}

fn fetch_source_info(state: &mut AppState, effects: &mut Vec<Effect>) {
    let Some(datasource) = state.current_entity() else {
        state.notify(NoticeLevel::Error, "No datasource selected");
        return;
    };
    let epoch = state.epochs_mut().advance(FetchSlot::ConnectionInfo);
    state.show_info(true);
    effects.push(Effect::Fetch {
        epoch,
        request: FetchRequest::ConnectionInfo { datasource },
    });
}

fn edit_current(state: &mut AppState, mut patch: ConfigPatch, effects: &mut Vec<Effect>) {
    if state.step() != WorkflowStep::Configuration || patch.is_empty() {
        return;
    }
    let Some(entity) = state.current_entity() else {
        return;
    };
    // Only a connection test result can verify a record.
    patch.verification = Some(Verification::Unverified);
    invalidate_pending_test(state, &entity, effects);
    state.configs_mut().update(&entity, patch);
}

fn toggle_source_connection(
    state: &mut AppState,
    index: usize,
    checked: bool,
    effects: &mut Vec<Effect>,
) {
    if state.step() != WorkflowStep::Configuration {
        return;
    }
    let Some(entity) = state.current_entity() else {
        return;
    };
    let source = state
        .connection_info()
        .filter(|info| info.datasource == entity)
        .and_then(|info| info.connections.get(index))
        .cloned();

    invalidate_pending_test(state, &entity, effects);
    if checked {
        let Some(source) = source else {
            state.notify(NoticeLevel::Error, "Source connection details are not loaded");
            return;
        };
        let mut patch = ConfigPatch::new()
            .connection(ConnectionParams {
                host: source.host,
                port: source.port,
                username: source.username,
                // Passwords and database names are never copied from the source.
                password: String::new(),
                database: String::new(),
            })
            .verification(Verification::Unverified);
        if let Some(db_type) = DbType::from_connection_type(&source.connection_type) {
            patch = patch.db_type(db_type);
        }
        state.set_chosen_connection(Some(index));
        state.configs_mut().update(&entity, patch);
    } else {
        state.set_chosen_connection(None);
        state.configs_mut().update(
            &entity,
            ConfigPatch::new()
                .connection(ConnectionParams::default())
                .verification(Verification::Unverified),
        );
    }
}

fn invalidate_pending_test(state: &mut AppState, entity: &EntityId, effects: &mut Vec<Effect>) {
    if state.testing() == Some(entity) {
        state.epochs_mut().advance(FetchSlot::ConnectionTest);
        state.set_testing(None);
        effects.push(Effect::CancelSlot {
            slot: FetchSlot::ConnectionTest,
        });
    }
}

fn request_connection_test(state: &mut AppState, effects: &mut Vec<Effect>) {
    if state.step() != WorkflowStep::Configuration {
        return;
    }
    let Some(entity) = state.current_entity() else {
        return;
    };
    let record = state.current_config().cloned().unwrap_or_default();
    let Some(db_type) = record.db_type else {
        state.notify(NoticeLevel::Error, "Please select a database type");
        return;
    };
    if !record.connection.is_complete() {
        state.notify(
            NoticeLevel::Error,
            format!(
                "Please fill in all database credentials (missing: {})",
                record.connection.missing_fields().join(", ")
            ),
        );
        return;
    }

    let epoch = state.epochs_mut().advance(FetchSlot::ConnectionTest);
    state.set_testing(Some(entity.clone()));
    effects.push(Effect::TestConnection {
        entity,
        epoch,
        request: ConnectionTestRequest {
            db_type,
            connection: record.connection.trimmed(),
        },
    });
}

fn apply_connection_test(
    state: &mut AppState,
    entity: EntityId,
    epoch: Epoch,
    result: Result<ConnectionTestReport, String>,
) {
    if !state.epochs().is_current(FetchSlot::ConnectionTest, epoch)
        || !state.configs().contains(&entity)
    {
        deploy_debug!("Discarding stale connection test for {}", entity);
        return;
    }
    state.set_testing(None);
    let (verification, level, text) = match result {
        Ok(report) if report.success => (Verification::Success, NoticeLevel::Info, report.message),
        Ok(report) => (Verification::Error, NoticeLevel::Error, report.message),
        Err(err) => (
            Verification::Error,
            NoticeLevel::Error,
            format!("Connection test failed: {err}"),
        ),
    };
    state
        .configs_mut()
        .update(&entity, ConfigPatch::new().verification(verification));
    state.notify(level, text);
}

fn execute(state: &mut AppState, kind: JobKind, effects: &mut Vec<Effect>) {
    if state.step() != WorkflowStep::Configuration {
        return;
    }
    let Some(workbook) = state.selected_workbook().cloned() else {
        state.notify(NoticeLevel::Error, "Please select a workbook");
        return;
    };
    let target = state.target_project().map(ToOwned::to_owned);
    if kind == JobKind::Migration && target.is_none() {
        state.notify(NoticeLevel::Error, "Please select a target project!");
        return;
    }
    if !state.all_datasources_ready() {
        state.notify(
            NoticeLevel::Error,
            "Every datasource needs complete credentials and a successful connection test",
        );
        return;
    }

    let request = match kind {
        JobKind::Migration => {
            let datasources = workbook
                .datasources
                .iter()
                .filter_map(|ds| {
                    let record = state.configs().get(&ds.luid)?;
                    Some(DatasourceDeployment {
                        datasource: ds.luid.clone(),
                        db_type: record.db_type?,
                        connection: record.connection.trimmed(),
                    })
                })
                .collect();
            JobRequest::Migration {
                source_workbook: workbook.luid.clone(),
                target_project: target.unwrap_or_default(),
                datasources,
            }
        }
        JobKind::MetadataExport => JobRequest::MetadataExport {
            workbook_id: workbook.id.clone(),
            workbook_luid: workbook.luid.clone(),
            datasources: workbook.entity_ids(),
            datasource_ids: workbook
                .datasources
                .iter()
                .filter_map(|ds| ds.id.clone())
                .collect(),
        },
    };

    let run = state.epochs_mut().advance(FetchSlot::Job);
    state.start_job(ActiveJob::new(run, kind));
    state.set_step(WorkflowStep::Executing);
    deploy_info!("Starting {} run {}", kind.label(), run);
    effects.push(Effect::SubmitJob { run, request });
}

fn current_job(state: &mut AppState, run: Epoch) -> Option<&mut ActiveJob> {
    let is_current = state.job().is_some_and(|job| job.run == run);
    if !is_current {
        deploy_debug!("Ignoring event for inactive run {}", run);
        return None;
    }
    state.job_mut()
}

fn finish_job(state: &mut AppState, run: Epoch, result: JobResult) {
    if current_job(state, run).is_none() {
        return;
    }
    let Some(job) = state.take_job() else {
        return;
    };
    state.set_step(WorkflowStep::Configuration);

    match &result {
        Ok(success) => {
            let text = match (job.kind, success.result_url.is_some()) {
                (JobKind::Migration, true) => "Migration completed successfully!".to_string(),
                (JobKind::Migration, false) => "Migration completed!".to_string(),
                (JobKind::MetadataExport, _) => "Metadata downloaded successfully!".to_string(),
            };
            state.notify(NoticeLevel::Info, text);
        }
        Err(failure) => {
            let text = match failure.class {
                FailureClass::Cancelled => None,
                FailureClass::Terminal => {
                    Some(format!("{} failed: {}", job.kind.label(), failure.message))
                }
                FailureClass::Timeout | FailureClass::ConnectionLost => Some(format!(
                    "{}. Please check backend logs.",
                    failure.message.trim_end_matches('.')
                )),
                FailureClass::Transport => Some(format!(
                    "Failed to start {}: {}",
                    job.kind.label().to_lowercase(),
                    failure.message
                )),
            };
            if let Some(text) = text {
                state.notify(NoticeLevel::Error, text);
            }
        }
    }
    state.set_outcome(Some(JobOutcome {
        kind: job.kind,
        result,
    }));
}

fn clear_all(state: &mut AppState, effects: &mut Vec<Effect>) {
    state.abandon_configuration(effects);
    state.epochs_mut().advance(FetchSlot::Workbooks);
    effects.push(Effect::CancelSlot {
        slot: FetchSlot::Workbooks,
    });
    state.set_source_project(None);
    state.clear_workbooks(false);
    state.set_target_project(None);
    state.configs_mut().clear();
    state.set_entity_index(0);
    state.set_step(WorkflowStep::Selection);
}

fn apply_fetch(state: &mut AppState, slot: FetchSlot, result: Result<FetchPayload, String>) {
    match (slot, result) {
        (FetchSlot::Projects, Ok(FetchPayload::Projects(projects))) => {
            deploy_info!("Loaded {} projects", projects.len());
            state.set_projects(projects);
        }
        (FetchSlot::Workbooks, Ok(FetchPayload::Workbooks(workbooks))) => {
            deploy_info!("Loaded {} workbooks", workbooks.len());
            state.set_workbooks(workbooks);
        }
        (FetchSlot::ConnectionInfo, Ok(FetchPayload::ConnectionInfo(info))) => {
            state.set_connection_info(Some(info));
        }
        (FetchSlot::Projects, Err(err)) => {
            state.set_projects_loading(false);
            state.notify(NoticeLevel::Error, format!("Failed to load projects: {err}"));
        }
        (FetchSlot::Workbooks, Err(err)) => {
            state.set_workbooks_loading(false);
            state.notify(NoticeLevel::Error, format!("Failed to load workbooks: {err}"));
        }
        (FetchSlot::ConnectionInfo, Err(err)) => {
            state.set_connection_info(None);
            state.notify(
                NoticeLevel::Error,
                format!("Failed to load database info: {err}"),
            );
        }
        (slot, Ok(_)) => {
            deploy_warn!("Fetch payload does not match slot {:?}; ignored", slot);
        }
        (slot, Err(err)) => {
            deploy_warn!("Unexpected failure for slot {:?}: {}", slot, err);
        }
    }
}
