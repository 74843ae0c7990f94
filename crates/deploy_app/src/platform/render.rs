use deploy_core::{
    AppViewModel, EntityView, JobOutcome, Notice, NoticeLevel, Project, ProgressView, StepStatus,
    Verification, Workbook, WorkflowStep,
};

/// Status lines for the current view; the driver prints the ones that changed.
pub(crate) fn render(view: &AppViewModel) -> Vec<String> {
    let mut lines = Vec::new();
    match view.step {
        WorkflowStep::Selection => {
            if view.projects_loading {
                lines.push("Loading projects...".to_string());
            }
            if view.workbooks_loading {
                lines.push("Loading workbooks...".to_string());
            }
        }
        WorkflowStep::Configuration => {
            if let Some(entity) = &view.entity {
                lines.push(format_entity(entity, view.all_ready));
            }
            if view.source_info_loading {
                lines.push("Loading source connection details...".to_string());
            }
        }
        WorkflowStep::Executing => {
            if let Some(progress) = &view.progress {
                lines.extend(format_progress(progress));
            }
        }
    }
    lines
}

pub(crate) fn project_lines(projects: &[Project]) -> Vec<String> {
    if projects.is_empty() {
        return vec!["No projects found.".to_string()];
    }
    projects
        .iter()
        .map(|project| format!("{}  {}", project.luid, project.name))
        .collect()
}

pub(crate) fn workbook_lines(workbooks: &[Workbook]) -> Vec<String> {
    if workbooks.is_empty() {
        return vec!["No workbooks found.".to_string()];
    }
    let mut lines = Vec::new();
    for workbook in workbooks {
        lines.push(format!("{}  {}", workbook.luid, workbook.name));
        for datasource in &workbook.datasources {
            lines.push(format!("    {}  {}", datasource.luid, datasource.name));
        }
    }
    lines
}

pub(crate) fn notice_line(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => notice.text.clone(),
        NoticeLevel::Error => format!("error: {}", notice.text),
    }
}

pub(crate) fn outcome_lines(outcome: &JobOutcome) -> Vec<String> {
    match &outcome.result {
        Ok(success) => {
            let mut lines = vec![format!("{} finished: {}", outcome.kind.label(), success.message)];
            if let Some(url) = outcome.result_url() {
                lines.push(format!("Result: {url}"));
            }
            lines
        }
        Err(failure) => vec![format!(
            "{} did not finish: {}",
            outcome.kind.label(),
            failure.message
        )],
    }
}

fn format_entity(entity: &EntityView, all_ready: bool) -> String {
    let db_type = entity
        .config
        .db_type
        .map_or("no database type", |db| db.as_str());
    let status = if entity.testing {
        "testing"
    } else {
        match entity.config.verification {
            Verification::Unverified => "unverified",
            Verification::Success => "verified",
            Verification::Error => "failed",
        }
    };
    let ready = if all_ready { " [all ready]" } else { "" };
    format!(
        "Datasource {}/{}: {} ({}, {}){}",
        entity.index + 1,
        entity.total,
        entity.name,
        db_type,
        status,
        ready
    )
}

fn format_progress(progress: &ProgressView) -> Vec<String> {
    let mut lines = vec![format!(
        "{} [stage {}] {}",
        progress.kind.label(),
        progress.stage,
        progress.message
    )];
    if progress.steps.is_empty() {
        return lines;
    }
    let markers: String = progress
        .steps
        .iter()
        .map(|(_, status)| match status {
            StepStatus::Completed => "[x]",
            StepStatus::Active => "[>]",
            StepStatus::Pending => "[ ]",
        })
        .collect();
    let active = progress
        .steps
        .iter()
        .find(|(_, status)| *status == StepStatus::Active)
        .map_or("", |(step, _)| step.label());
    lines.push(format!("{markers} {active}").trim_end().to_string());
    lines
}
