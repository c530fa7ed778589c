//! Scheduled plan firings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bon::Builder;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::TriggerRouter;
use crate::error::{AgoraError, Result};
use crate::types::{EntityId, SpaceId};

/// When a plan fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fire once after `delay`.
    Once { delay: Duration },
    /// Fire every `interval`, first after one interval.
    Every { interval: Duration },
}

/// A scheduled instruction for one agent.
#[derive(Debug, Clone, Builder)]
pub struct Plan {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub agent_entity_id: EntityId,
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    pub instructions: String,
    pub space_id: Option<SpaceId>,
    pub schedule: Schedule,
}

/// Runs plan timers and pushes `Plan` triggers when they fire.
pub struct PlanScheduler {
    router: Arc<TriggerRouter>,
    plans: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl PlanScheduler {
    pub fn new(router: Arc<TriggerRouter>) -> Self {
        Self {
            router,
            plans: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a plan's timer. Returns its id.
    ///
    /// A one-shot plan forgets itself once it has fired.
    pub fn schedule(&self, plan: Plan) -> Result<Uuid> {
        if let Schedule::Every { interval } = plan.schedule {
            if interval.is_zero() {
                return Err(AgoraError::InvalidArgument(
                    "plan interval must be positive".into(),
                ));
            }
        }
        let id = plan.id;
        let token = self.shutdown.child_token();
        self.plans
            .lock()
            .map_err(|_| AgoraError::InvalidState("plan table poisoned".into()))?
            .insert(id, token.clone());

        let router = self.router.clone();
        let plans = self.plans.clone();
        tokio::spawn(async move {
            match plan.schedule {
                Schedule::Once { delay } => {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            if let Ok(mut plans) = plans.lock() {
                                plans.remove(&plan.id);
                            }
                            fire(&router, &plan).await;
                        }
                    }
                }
                Schedule::Every { interval } => {
                    let start = tokio::time::Instant::now() + interval;
                    let mut ticker = tokio::time::interval_at(start, interval);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => fire(&router, &plan).await,
                        }
                    }
                }
            }
        });
        tracing::info!(plan_id = %id, "plan scheduled");
        Ok(id)
    }

    /// Stop a plan. Returns `false` when the id is unknown or a one-shot
    /// plan already fired.
    pub fn cancel(&self, plan_id: Uuid) -> bool {
        let token = self
            .plans
            .lock()
            .ok()
            .and_then(|mut plans| plans.remove(&plan_id));
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Plans that can still fire.
    pub fn len(&self) -> usize {
        self.plans.lock().map(|plans| plans.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every plan.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(mut plans) = self.plans.lock() {
            plans.clear();
        }
    }
}

async fn fire(router: &TriggerRouter, plan: &Plan) {
    tracing::debug!(plan_id = %plan.id, agent = %plan.agent_entity_id, "plan fired");
    if let Err(e) = router
        .plan(
            plan.agent_entity_id,
            plan.id,
            plan.name.clone(),
            plan.instructions.clone(),
            plan.space_id,
        )
        .await
    {
        tracing::warn!(plan_id = %plan.id, error = %e, "plan delivery failed");
    }
}
