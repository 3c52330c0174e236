//! Auto-redirect mode: the ingress/egress pair attached to one interface.

use crate::config::{AutoRedirectConfig, FlowTableConfig};
use crate::conntrack::FlowTable;
use crate::egress::EgressRestorer;
use crate::error::Result;
use crate::ingress::IngressRedirector;
use crate::params::{ParamStore, RedirectParams};
use std::sync::Arc;
use tracing::info;

/// Shared state of auto-redirect mode.
///
/// The ingress redirector and egress restorer handed out by one instance see
/// the same flow table and parameter snapshot.
pub struct AutoRedirect {
    params: Arc<ParamStore<RedirectParams>>,
    flows: Arc<FlowTable>,
}

impl AutoRedirect {
    pub fn new(params: Arc<ParamStore<RedirectParams>>, flows: Arc<FlowTable>) -> Self {
        Self { params, flows }
    }

    pub fn from_config(
        config: Option<&AutoRedirectConfig>,
        flow_table: &FlowTableConfig,
    ) -> Result<Self> {
        let flows = Arc::new(flow_table.build()?);
        let params = match config {
            Some(config) => {
                config.validate()?;
                info!(target = %config.target, "Auto-redirect configured");
                ParamStore::new(config.params())
            }
            None => ParamStore::empty(),
        };

        Ok(Self::new(Arc::new(params), flows))
    }

    pub fn ingress(&self) -> IngressRedirector {
        IngressRedirector::new(Arc::clone(&self.params), Arc::clone(&self.flows))
    }

    pub fn egress(&self) -> EgressRestorer {
        EgressRestorer::new(Arc::clone(&self.params), Arc::clone(&self.flows))
    }

    /// Parameter store; publishing a new snapshot takes effect on the next
    /// packet of both directions.
    pub fn params(&self) -> &Arc<ParamStore<RedirectParams>> {
        &self.params
    }

    pub fn flows(&self) -> &Arc<FlowTable> {
        &self.flows
    }
}
