//! Viewer sessions - one per attached requester or admin view.
//!
//! A session keeps a fresh copy of the requests it can see, re-read on every
//! desk event and on a fixed poll interval as a fallback. It owns the escrow
//! timers it started; dropping the session tears all of its tasks down.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::config::Config;
use crate::core::{Error, Offer, RequestId, Result, Side, TradeRequest, UserId};
use crate::desk::{ReviewOutcome, TradeDesk, TradeInput};
use crate::escrow::EscrowTimer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Requester(UserId),
    Admin,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewerTiming {
    pub poll_interval: Duration,
    pub escrow_tick: Duration,
}

impl From<&Config> for ViewerTiming {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.viewer.poll_interval(),
            escrow_tick: config.escrow.tick_period(),
        }
    }
}

fn visible(desk: &TradeDesk, role: &Role) -> Vec<TradeRequest> {
    match role {
        Role::Requester(user) => desk.list_for_user(user, usize::MAX),
        Role::Admin => desk.list(),
    }
}

pub struct ViewerSession {
    desk: TradeDesk,
    role: Role,
    timing: ViewerTiming,
    view: watch::Receiver<Vec<TradeRequest>>,
    poller: JoinHandle<()>,
    escrows: HashMap<RequestId, EscrowTimer>,
}

impl ViewerSession {
    pub fn attach(desk: TradeDesk, role: Role, timing: ViewerTiming) -> Self {
        let events = desk.subscribe();
        let (tx, view) = watch::channel(visible(&desk, &role));

        let task_desk = desk.clone();
        let task_role = role.clone();
        let poll_interval = timing.poll_interval;
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    event = events.recv_async() => {
                        if event.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                }
                let fresh = visible(&task_desk, &task_role);
                tx.send_if_modified(|current| {
                    if *current != fresh {
                        *current = fresh;
                        true
                    } else {
                        false
                    }
                });
            }
        });

        info!("Viewer attached: {:?}", role);
        Self {
            desk,
            role,
            timing,
            view,
            poller,
            escrows: HashMap::new(),
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Latest requests visible to this view, most recent first
    pub fn requests(&self) -> Vec<TradeRequest> {
        self.view.borrow().clone()
    }

    /// Wait until the visible requests change.
    pub async fn changed(&mut self) -> Result<()> {
        self.view
            .changed()
            .await
            .map_err(|_| Error::InvalidState("viewer poller stopped".into()))
    }

    /// Escrow timers of this view that are still ticking
    pub fn active_escrows(&self) -> usize {
        self.escrows.values().filter(|t| !t.is_finished()).count()
    }

    fn requester(&self) -> Result<&UserId> {
        match &self.role {
            Role::Requester(user) => Ok(user),
            Role::Admin => Err(Error::InvalidState("admin views cannot submit trades".into())),
        }
    }

    fn require_admin(&self) -> Result<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Requester(_) => Err(Error::InvalidState("only admin views can review".into())),
        }
    }

    /// Submit through the desk; a sell starts an escrow timer owned by this view.
    pub fn submit(&mut self, offer: &Offer, input: TradeInput) -> Result<RequestId> {
        let user = self.requester()?.clone();
        let side = input.side();
        let id = self.desk.submit(&user, offer, input)?;
        if side == Side::Sell {
            let timer = EscrowTimer::start(self.desk.clone(), id.clone(), self.timing.escrow_tick);
            self.escrows.insert(id.clone(), timer);
        }
        Ok(id)
    }

    /// Release the escrow and stop its timer.
    pub fn release(&mut self, id: &RequestId) -> Result<()> {
        self.desk.release_escrow(id)?;
        self.escrows.remove(id);
        Ok(())
    }

    /// Close the escrow view without releasing.
    pub fn close_escrow(&mut self, id: &RequestId) -> bool {
        let closed = self.escrows.remove(id).is_some();
        if closed {
            debug!("Escrow view for {} closed", id);
        }
        closed
    }

    pub fn accept(&self, id: &RequestId) -> Result<ReviewOutcome> {
        self.require_admin()?;
        self.desk.accept(id)
    }

    pub fn deny(&self, id: &RequestId) -> Result<ReviewOutcome> {
        self.require_admin()?;
        self.desk.deny(id)
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.poller.abort();
        // timers detach their sessions as they drop
        self.escrows.clear();
        debug!("Viewer detached: {:?}", self.role);
    }
}
