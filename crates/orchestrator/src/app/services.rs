use std::sync::Arc;

use api_types::OutboundCommand;
use tokio::sync::mpsc;

use crate::config::Profile;
use crate::domain::controller::Controller;
use crate::domain::scheduler::AffinityScheduler;
use crate::domain::scheduler::CpuManager;

/// Application dependencies.
///
/// The actors are moved into their tasks when the application starts, so
/// they are only present until then.
pub struct ApplicationServices {
    pub profile: Arc<Profile>,
    pub cpu: Arc<dyn CpuManager>,
    pub scheduler: Option<AffinityScheduler>,
    pub controller: Option<Controller>,
    pub command_receiver: Option<mpsc::UnboundedReceiver<OutboundCommand>>,
}
