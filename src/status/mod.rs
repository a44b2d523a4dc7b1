pub mod presentation;
pub mod reconciler;
pub mod store;
pub mod types;

pub use presentation::{indicator, short_label, Indicator};
pub use reconciler::reconcile;
pub use store::{
    ChannelListener, NullListener, StatusEvent, StatusListener, SubstateStore, UserStop,
};
pub use types::{
    InstallationState, PublicationState, ServiceState, Snapshot, Status, StatusOverride,
    Substate, SubstateCategory, SwitchIntent, TorState,
};
