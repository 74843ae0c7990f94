use std::collections::HashMap;
use std::time::Duration;

use deploy_core::{
    ConnectionInfo, ConnectionParams, ConnectionTestReport, DatasourceRef, DbType, Effect,
    EntityId, Epoch, FailureClass, FetchPayload, FetchRequest, FetchSlot, JobFailed, JobRequest,
    JobResult, JobSucceeded, Msg, Project, SourceConnection, Workbook,
};
use deploy_engine::{
    ConnectionTestReply, DbConfig, EngineError, EngineEvent, EngineHandle, FailureKind,
    FetchOutput, JobFailure, JobSpec, JobSuccess, MetadataExportRequest, MigrationDatasource,
    MigrationRequest, Slot,
};
use deploy_logging::{deploy_debug, deploy_info, deploy_warn};

/// Carries core effects to the engine and engine events back as messages.
pub(crate) struct EffectRunner {
    engine: EngineHandle,
    /// Datasource each connection-info request was issued for, by epoch.
    info_requests: HashMap<Epoch, EntityId>,
}

impl EffectRunner {
    pub(crate) fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            info_requests: HashMap::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Fetch { epoch, request } => {
                    deploy_debug!("Fetch {:?} at epoch {}", request, epoch);
                    let request = match request {
                        FetchRequest::Projects => deploy_engine::FetchRequest::Projects,
                        FetchRequest::Workbooks { project_luid } => {
                            deploy_engine::FetchRequest::Workbooks { project_luid }
                        }
                        FetchRequest::ConnectionInfo { datasource } => {
                            // Only the latest request of the slot can still be delivered.
                            self.info_requests.clear();
                            self.info_requests.insert(epoch, datasource.clone());
                            deploy_engine::FetchRequest::ConnectionInfo {
                                datasource_luid: datasource.to_string(),
                            }
                        }
                    };
                    self.engine.fetch(epoch, request);
                }
                Effect::CancelSlot { slot } => self.engine.cancel_slot(engine_slot(slot)),
                Effect::TestConnection {
                    entity,
                    epoch,
                    request,
                } => {
                    deploy_info!("Testing connection for datasource {}", entity);
                    self.engine.test_connection(
                        entity.as_str(),
                        epoch,
                        db_config(request.db_type, &request.connection),
                    );
                }
                Effect::SubmitJob { run, request } => {
                    deploy_info!("Submitting {} as run {}", request.kind().label(), run);
                    self.engine.run_job(run, job_spec(request));
                }
                Effect::CancelJob { run } => self.engine.cancel_job(run),
            }
        }
    }

    /// Waits up to `timeout` for the next engine event; fails once the engine is gone.
    pub(crate) fn next_msg(&mut self, timeout: Duration) -> Result<Option<Msg>, EngineError> {
        let event = self.engine.recv_timeout(timeout)?;
        Ok(event.map(|event| self.translate(event)))
    }

    pub(crate) fn shutdown(self) {
        self.engine.shutdown();
    }

    fn translate(&mut self, event: EngineEvent) -> Msg {
        match event {
            EngineEvent::FetchCompleted {
                slot,
                epoch,
                result,
            } => {
                let result = match result {
                    Ok(output) => match self.payload(epoch, output) {
                        Some(payload) => Ok(payload),
                        None => return Msg::NoOp,
                    },
                    Err(err) => Err(err.to_string()),
                };
                Msg::FetchCompleted {
                    slot: core_slot(slot),
                    epoch,
                    result,
                }
            }
            EngineEvent::ConnectionTested { key, epoch, result } => Msg::ConnectionTested {
                entity: EntityId::new(key),
                epoch,
                result: result.map(test_report).map_err(|err| err.to_string()),
            },
            EngineEvent::JobSubmitted { run, job_id } => Msg::JobSubmitted { run, job_id },
            EngineEvent::JobProgress { run, update } => Msg::JobProgress {
                run,
                stage: update.stage,
                message: update.message,
                step: update.step,
            },
            EngineEvent::JobCompleted { run, result } => Msg::JobFinished {
                run,
                result: job_result(result),
            },
        }
    }

    fn payload(&mut self, epoch: Epoch, output: FetchOutput) -> Option<FetchPayload> {
        Some(match output {
            FetchOutput::Projects(projects) => FetchPayload::Projects(
                projects
                    .into_iter()
                    .map(|p| Project {
                        luid: p.project_luid,
                        name: p.project_name,
                    })
                    .collect(),
            ),
            FetchOutput::Workbooks(workbooks) => FetchPayload::Workbooks(
                workbooks
                    .into_iter()
                    .map(|wb| Workbook {
                        id: wb.id,
                        luid: wb.luid,
                        name: wb.name,
                        datasources: wb
                            .datasources
                            .into_iter()
                            .map(|ds| DatasourceRef {
                                luid: EntityId::new(ds.luid),
                                id: ds.id,
                                name: ds.name,
                            })
                            .collect(),
                    })
                    .collect(),
            ),
            FetchOutput::ConnectionInfo(info) => {
                let Some(datasource) = self.info_requests.remove(&epoch) else {
                    deploy_warn!("Connection info for unknown request epoch {}", epoch);
                    return None;
                };
                FetchPayload::ConnectionInfo(ConnectionInfo {
                    datasource,
                    datasource_name: info.datasource_name,
                    connections: info
                        .connections
                        .into_iter()
                        .map(|c| SourceConnection {
                            connection_type: c.connection_type,
                            host: c.host,
                            port: c.port,
                            username: c.username,
                        })
                        .collect(),
                })
            }
        })
    }
}

fn engine_slot(slot: FetchSlot) -> Slot {
    match slot {
        FetchSlot::Projects => Slot::Projects,
        FetchSlot::Workbooks => Slot::Workbooks,
        FetchSlot::ConnectionInfo => Slot::ConnectionInfo,
        FetchSlot::ConnectionTest => Slot::ConnectionTest,
        FetchSlot::Job => Slot::Job,
    }
}

fn core_slot(slot: Slot) -> FetchSlot {
    match slot {
        Slot::Projects => FetchSlot::Projects,
        Slot::Workbooks => FetchSlot::Workbooks,
        Slot::ConnectionInfo => FetchSlot::ConnectionInfo,
        Slot::ConnectionTest => FetchSlot::ConnectionTest,
        Slot::Job => FetchSlot::Job,
    }
}

fn db_config(db_type: DbType, connection: &ConnectionParams) -> DbConfig {
    DbConfig {
        db_type: db_type.as_str().to_string(),
        host: connection.host.clone(),
        port: connection.port.clone(),
        dbname: connection.database.clone(),
        username: connection.username.clone(),
        password: connection.password.clone(),
    }
}

fn test_report(reply: ConnectionTestReply) -> ConnectionTestReport {
    let success = reply.succeeded();
    let message = if reply.message.trim().is_empty() {
        if success {
            "Connection successful".to_string()
        } else {
            "Connection failed".to_string()
        }
    } else {
        reply.message
    };
    ConnectionTestReport { success, message }
}

fn job_spec(request: JobRequest) -> JobSpec {
    match request {
        JobRequest::Migration {
            source_workbook,
            target_project,
            datasources,
        } => JobSpec::Migration(MigrationRequest::new(
            source_workbook,
            target_project,
            datasources
                .iter()
                .map(|ds| MigrationDatasource {
                    datasource_luid: ds.datasource.to_string(),
                    db_config: db_config(ds.db_type, &ds.connection),
                })
                .collect(),
        )),
        JobRequest::MetadataExport {
            workbook_id,
            workbook_luid,
            datasources,
            datasource_ids,
        } => JobSpec::MetadataExport(MetadataExportRequest {
            workbook_id,
            workbook_luid,
            datasource_luids: datasources.iter().map(ToString::to_string).collect(),
            datasource_ids,
        }),
    }
}

fn job_result(result: Result<JobSuccess, JobFailure>) -> JobResult {
    match result {
        Ok(success) => Ok(JobSucceeded {
            message: success.message,
            result_url: success.result_url,
        }),
        Err(failure) => Err(JobFailed {
            class: failure_class(failure.kind),
            message: failure.message,
        }),
    }
}

fn failure_class(kind: FailureKind) -> FailureClass {
    match kind {
        FailureKind::Cancelled => FailureClass::Cancelled,
        FailureKind::Terminal => FailureClass::Terminal,
        FailureKind::Timeout => FailureClass::Timeout,
        FailureKind::ConnectionLost => FailureClass::ConnectionLost,
        FailureKind::Network | FailureKind::Validation => FailureClass::Transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::DatasourceDeployment;
    use pretty_assertions::assert_eq;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: "db.internal".into(),
            port: "5439".into(),
            database: "warehouse".into(),
            username: "etl".into(),
            password: "secret".into(),
        }
    }

    #[test]
    fn migration_requests_carry_wire_names() {
        let spec = job_spec(JobRequest::Migration {
            source_workbook: "wb".into(),
            target_project: "target".into(),
            datasources: vec![DatasourceDeployment {
                datasource: EntityId::new("ds-1"),
                db_type: DbType::Redshift,
                connection: params(),
            }],
        });

        let JobSpec::Migration(request) = spec else {
            panic!("expected a migration");
        };
        assert_eq!(request.datasource_luids, vec!["ds-1".to_string()]);
        assert_eq!(request.datasources[0].db_config.db_type, "Redshift");
        assert_eq!(request.datasources[0].db_config.dbname, "warehouse");
    }

    #[test]
    fn failure_kinds_map_onto_user_facing_classes() {
        assert_eq!(failure_class(FailureKind::Network), FailureClass::Transport);
        assert_eq!(failure_class(FailureKind::Validation), FailureClass::Transport);
        assert_eq!(
            failure_class(FailureKind::ConnectionLost),
            FailureClass::ConnectionLost
        );

        let result = job_result(Err(JobFailure::cancelled()));
        assert_eq!(result.unwrap_err().class, FailureClass::Cancelled);
    }

    #[test]
    fn blank_test_replies_get_a_message() {
        let report = test_report(ConnectionTestReply {
            status: "error".into(),
            message: " ".into(),
        });
        assert_eq!(
            report,
            ConnectionTestReport {
                success: false,
                message: "Connection failed".into(),
            }
        );
    }
}
