use crate::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub luid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasourceRef {
    pub luid: EntityId,
    /// Metadata API id, when the listing carries one.
    pub id: Option<String>,
    pub name: String,
}

/// A workbook and the datasources that must be configured before it can be deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workbook {
    pub id: String,
    pub luid: String,
    pub name: String,
    pub datasources: Vec<DatasourceRef>,
}

impl Workbook {
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.datasources.iter().map(|ds| ds.luid.clone()).collect()
    }
}

/// A connection the datasource currently uses on the source site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceConnection {
    pub connection_type: String,
    pub host: String,
    pub port: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub datasource: EntityId,
    pub datasource_name: String,
    pub connections: Vec<SourceConnection>,
}
