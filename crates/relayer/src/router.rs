use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use pn_types::{
    event::{ContractEvent, EventFilter, EventKind, RawEvent},
    Address,
};

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ContractEvent) -> Result<()>;
}

#[derive(Clone)]
pub struct Route {
    pub filter: EventFilter,
    pub handler: Arc<dyn EventHandler>,
}

/// A contract and the events watched on it.
#[derive(Clone)]
pub struct WatchItem {
    contract: Address,
    routes: BTreeMap<EventKind, Route>,
}

impl WatchItem {
    pub fn new(contract: Address) -> Self {
        WatchItem {
            contract,
            routes: BTreeMap::new(),
        }
    }

    pub fn contract(&self) -> &Address {
        &self.contract
    }

    /// Register the handler of an event; an existing route is replaced.
    pub fn register(
        &mut self,
        kind: EventKind,
        filter: EventFilter,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        if self.routes.insert(kind, Route { filter, handler }).is_some() {
            log::debug!("replaced route of {} on {:?}", kind, self.contract);
        }
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = (&EventKind, &Route)> {
        self.routes.iter()
    }

    /// Decode `raw` and pick its handler. `Ok(None)` for events nobody
    /// subscribed to or that fail the route filter.
    pub fn route(&self, raw: &RawEvent) -> Result<Option<(ContractEvent, Arc<dyn EventHandler>)>> {
        let route = match EventKind::from_name(&raw.event).and_then(|kind| self.routes.get(&kind)) {
            Some(route) => route,
            None => return Ok(None),
        };
        if !route.filter.matches(&raw.return_values) {
            return Ok(None);
        }
        let event = raw.decode().with_context(|| {
            format!(
                "decode {} at block {} log {}",
                raw.event, raw.block_number, raw.log_index
            )
        })?;
        Ok(Some((event, Arc::clone(&route.handler))))
    }
}
