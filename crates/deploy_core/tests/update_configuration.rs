use std::sync::Once;

use deploy_core::{
    update, AppState, ConfigPatch, ConnectionInfo, ConnectionParams, ConnectionTestReport,
    DatasourceConfig, DatasourceRef, DbType, Effect, EntityId, Epoch, FetchPayload, FetchRequest,
    FetchSlot, JobKind, Msg, SourceConnection, Verification, Workbook, WorkflowStep,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(deploy_logging::initialize_for_tests);
}

fn workbook(luid: &str, datasources: &[&str]) -> Workbook {
    Workbook {
        id: format!("id-{luid}"),
        luid: luid.to_string(),
        name: format!("Workbook {luid}"),
        datasources: datasources
            .iter()
            .map(|ds| DatasourceRef {
                luid: (*ds).into(),
                id: None,
                name: format!("Datasource {ds}"),
            })
            .collect(),
    }
}

/// Drives the workflow to the configuration step for a workbook with `datasources`.
fn configuring(datasources: &[&str]) -> AppState {
    let (state, effects) = update(
        AppState::new(),
        Msg::SourceProjectSelected(Some("source".into())),
    );
    let epoch = match &effects[..] {
        [Effect::Fetch { epoch, .. }] => *epoch,
        other => panic!("unexpected effects {other:?}"),
    };
    let (state, _) = update(
        state,
        Msg::FetchCompleted {
            slot: FetchSlot::Workbooks,
            epoch,
            result: Ok(FetchPayload::Workbooks(vec![workbook("wb", datasources)])),
        },
    );
    let (state, _) = update(state, Msg::WorkbookSelected(Some("wb".into())));
    let (state, _) = update(state, Msg::TargetProjectSelected(Some("target".into())));
    let (state, _) = update(state, Msg::NextClicked);
    assert_eq!(state.step(), WorkflowStep::Configuration);
    state
}

fn params() -> ConnectionParams {
    ConnectionParams {
        host: "db.internal".into(),
        port: "5432".into(),
        database: "sales".into(),
        username: "etl".into(),
        password: "secret".into(),
    }
}

fn fill_current(state: AppState) -> AppState {
    let (state, _) = update(
        state,
        Msg::ConfigEdited(
            ConfigPatch::new()
                .db_type(DbType::PostgreSql)
                .connection(params()),
        ),
    );
    state
}

fn test_epoch(effects: &[Effect]) -> (EntityId, Epoch) {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::TestConnection { entity, epoch, .. } => Some((entity.clone(), *epoch)),
            _ => None,
        })
        .expect("test connection effect")
}

fn verify_current(state: AppState) -> AppState {
    let (state, effects) = update(state, Msg::TestConnectionClicked);
    let (entity, epoch) = test_epoch(&effects);
    let (mut state, _) = update(
        state,
        Msg::ConnectionTested {
            entity,
            epoch,
            result: Ok(ConnectionTestReport {
                success: true,
                message: "PostgreSQL connection successful".into(),
            }),
        },
    );
    state.take_notices();
    state
}

#[test]
fn readiness_requires_every_datasource_to_be_verified() {
    init_logging();
    let state = configuring(&["A", "B"]);

    let state = verify_current(fill_current(state));
    assert_eq!(
        state.configs().get(&"A".into()).unwrap().verification,
        Verification::Success
    );
    assert_eq!(
        state.configs().get(&"B".into()),
        Some(&DatasourceConfig::default())
    );
    assert!(!state.all_datasources_ready());

    let (mut state, effects) = update(state, Msg::ExecuteClicked(JobKind::Migration));
    assert!(effects.is_empty());
    assert_eq!(state.step(), WorkflowStep::Configuration);
    assert_eq!(state.take_notices().len(), 1);

    let (state, _) = update(state, Msg::EntityNext);
    assert_eq!(state.current_entity(), Some("B".into()));
    let state = verify_current(fill_current(state));
    assert!(state.all_datasources_ready());

    let (state, effects) = update(state, Msg::ExecuteClicked(JobKind::Migration));
    assert_eq!(state.step(), WorkflowStep::Executing);
    assert!(matches!(effects.as_slice(), [Effect::SubmitJob { .. }]));
}

#[test]
fn navigation_never_mutates_the_store() {
    init_logging();
    let state = fill_current(configuring(&["A", "B", "C"]));
    let before = state.configs().clone();

    let (state, _) = update(state, Msg::EntityNext);
    let (state, _) = update(state, Msg::EntityNext);
    let (state, _) = update(state, Msg::EntityNext);
    assert_eq!(state.current_entity(), Some("C".into()));
    let (state, _) = update(state, Msg::EntityPrev);
    let (state, _) = update(state, Msg::EntityPrev);
    let (state, _) = update(state, Msg::EntityPrev);
    assert_eq!(state.current_entity(), Some("A".into()));

    assert_eq!(state.configs(), &before);
}

#[test]
fn test_connection_validates_before_any_request() {
    init_logging();
    let state = configuring(&["A"]);

    let (mut state, effects) = update(state, Msg::TestConnectionClicked);
    assert!(effects.is_empty());
    let notices = state.take_notices();
    assert_eq!(notices[0].text, "Please select a database type");

    let (state, _) = update(
        state,
        Msg::ConfigEdited(ConfigPatch::new().db_type(DbType::MySql)),
    );
    let (mut state, effects) = update(state, Msg::TestConnectionClicked);
    assert!(effects.is_empty());
    assert!(state.take_notices()[0].text.contains("host"));
}

#[test]
fn failed_connection_test_marks_only_that_datasource() {
    init_logging();
    let state = fill_current(configuring(&["A", "B"]));
    let (state, effects) = update(state, Msg::TestConnectionClicked);
    let (entity, epoch) = test_epoch(&effects);

    // The user moves on before the result arrives; it still belongs to A.
    let (state, _) = update(state, Msg::EntityNext);
    let (mut state, _) = update(
        state,
        Msg::ConnectionTested {
            entity,
            epoch,
            result: Ok(ConnectionTestReport {
                success: false,
                message: "password authentication failed".into(),
            }),
        },
    );

    assert_eq!(
        state.configs().get(&"A".into()).unwrap().verification,
        Verification::Error
    );
    assert_eq!(
        state.configs().get(&"B".into()).unwrap().verification,
        Verification::Unverified
    );
    assert_eq!(state.take_notices().len(), 1);
}

#[test]
fn editing_after_a_test_discards_its_result_and_unverifies() {
    init_logging();
    let state = verify_current(fill_current(configuring(&["A"])));
    assert!(state.all_datasources_ready());

    let (state, effects) = update(state, Msg::TestConnectionClicked);
    let (entity, epoch) = test_epoch(&effects);
    let mut edited = params();
    edited.password = "rotated".into();
    let (state, effects) = update(
        state,
        Msg::ConfigEdited(ConfigPatch::new().connection(edited)),
    );
    assert!(!state.all_datasources_ready());
    assert_eq!(
        effects,
        vec![Effect::CancelSlot {
            slot: FetchSlot::ConnectionTest
        }]
    );

    let (state, _) = update(
        state,
        Msg::ConnectionTested {
            entity,
            epoch,
            result: Ok(ConnectionTestReport {
                success: true,
                message: "ok".into(),
            }),
        },
    );
    assert_eq!(
        state.configs().get(&"A".into()).unwrap().verification,
        Verification::Unverified
    );
}

#[test]
fn edits_cannot_mark_a_datasource_verified() {
    init_logging();
    let state = fill_current(configuring(&["A"]));

    let (mut state, effects) = update(
        state,
        Msg::ConfigEdited(
            ConfigPatch::new()
                .connection(params())
                .verification(Verification::Success),
        ),
    );
    state.take_notices();
    assert!(effects.is_empty());
    assert_eq!(
        state.current_config().unwrap().verification,
        Verification::Unverified
    );
    assert!(!state.all_datasources_ready());

    let (mut state, effects) = update(state, Msg::ExecuteClicked(JobKind::Migration));
    assert!(effects.is_empty());
    assert_eq!(state.step(), WorkflowStep::Configuration);
    assert_eq!(state.take_notices().len(), 1);
}

#[test]
fn unverified_edits_without_a_pending_test_cancel_nothing() {
    init_logging();
    let state = verify_current(fill_current(configuring(&["A"])));

    let (state, effects) = update(
        state,
        Msg::ConfigEdited(ConfigPatch::new().db_type(DbType::MySql)),
    );

    assert!(effects.is_empty());
    assert_eq!(
        state.current_config().unwrap().verification,
        Verification::Unverified
    );
}

#[test]
fn source_connection_autofill_never_copies_the_password() {
    init_logging();
    let state = configuring(&["A"]);
    let (state, effects) = update(state, Msg::SourceInfoToggled);
    let epoch = match &effects[..] {
        [Effect::Fetch {
            epoch,
            request: FetchRequest::ConnectionInfo { datasource },
        }] => {
            assert_eq!(datasource, &EntityId::from("A"));
            *epoch
        }
        other => panic!("unexpected effects {other:?}"),
    };
    let (state, _) = update(
        state,
        Msg::FetchCompleted {
            slot: FetchSlot::ConnectionInfo,
            epoch,
            result: Ok(FetchPayload::ConnectionInfo(ConnectionInfo {
                datasource: "A".into(),
                datasource_name: "Datasource A".into(),
                connections: vec![SourceConnection {
                    connection_type: "postgres".into(),
                    host: "prod-db".into(),
                    port: "5432".into(),
                    username: "reader".into(),
                }],
            })),
        },
    );

    let (state, _) = update(
        state,
        Msg::SourceConnectionToggled {
            index: 0,
            checked: true,
        },
    );
    let record = state.current_config().unwrap();
    assert_eq!(record.db_type, Some(DbType::PostgreSql));
    assert_eq!(record.connection.host, "prod-db");
    assert_eq!(record.connection.username, "reader");
    assert!(record.connection.password.is_empty());

    let (state, _) = update(
        state,
        Msg::SourceConnectionToggled {
            index: 0,
            checked: false,
        },
    );
    assert_eq!(
        state.current_config().unwrap().connection,
        ConnectionParams::default()
    );
}

#[test]
fn source_info_follows_the_displayed_datasource() {
    init_logging();
    let state = configuring(&["A", "B"]);
    let (state, first) = update(state, Msg::SourceInfoToggled);
    let (state, second) = update(state, Msg::EntityNext);

    let stale_epoch = match &first[..] {
        [Effect::Fetch { epoch, .. }] => *epoch,
        other => panic!("unexpected effects {other:?}"),
    };
    assert!(matches!(
        &second[..],
        [Effect::Fetch {
            request: FetchRequest::ConnectionInfo { datasource },
            ..
        }] if datasource == &EntityId::from("B")
    ));

    let (state, _) = update(
        state,
        Msg::FetchCompleted {
            slot: FetchSlot::ConnectionInfo,
            epoch: stale_epoch,
            result: Ok(FetchPayload::ConnectionInfo(ConnectionInfo {
                datasource: "A".into(),
                datasource_name: "Datasource A".into(),
                connections: Vec::new(),
            })),
        },
    );
    assert!(state.connection_info().is_none());
    assert!(state.view().source_info_loading);
}

#[test]
fn target_cleared_resets_every_record() {
    init_logging();
    let state = verify_current(fill_current(configuring(&["A", "B"])));
    let (state, _) = update(state, Msg::EntityNext);

    let (state, _) = update(state, Msg::TargetCleared);

    assert_eq!(state.target_project(), None);
    assert_eq!(state.current_entity(), Some("A".into()));
    assert_eq!(state.configs().len(), 2);
    assert_eq!(
        state.configs().get(&"A".into()),
        Some(&DatasourceConfig::default())
    );
}
