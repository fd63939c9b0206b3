//! Server state

use std::sync::Arc;

use crate::app::state::AppState;
use crate::deploy::service::DeployService;
use crate::sites::provisioner::SiteProvisioner;

/// Server state shared across handlers
pub struct ServerState {
    pub provisioner: Arc<SiteProvisioner>,
    pub deploys: Arc<DeployService>,
}

impl ServerState {
    pub fn new(provisioner: Arc<SiteProvisioner>, deploys: Arc<DeployService>) -> Self {
        Self {
            provisioner,
            deploys,
        }
    }

    pub fn from_app_state(app_state: &AppState) -> Self {
        Self::new(app_state.provisioner.clone(), app_state.deploys.clone())
    }
}
