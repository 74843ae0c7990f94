use crate::{ConnectionTestRequest, EntityId, Epoch, FetchSlot, JobRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Issue `request`, superseding whatever is in flight for its slot.
    Fetch { epoch: Epoch, request: FetchRequest },
    /// Cancel the in-flight request of `slot`, if any.
    CancelSlot { slot: FetchSlot },
    TestConnection {
        entity: EntityId,
        epoch: Epoch,
        request: ConnectionTestRequest,
    },
    SubmitJob { run: Epoch, request: JobRequest },
    /// Stop observing run `run`: close its stream or stop its poll loop.
    CancelJob { run: Epoch },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Projects,
    Workbooks { project_luid: String },
    ConnectionInfo { datasource: EntityId },
}

impl FetchRequest {
    pub fn slot(&self) -> FetchSlot {
        match self {
            FetchRequest::Projects => FetchSlot::Projects,
            FetchRequest::Workbooks { .. } => FetchSlot::Workbooks,
            FetchRequest::ConnectionInfo { .. } => FetchSlot::ConnectionInfo,
        }
    }
}
