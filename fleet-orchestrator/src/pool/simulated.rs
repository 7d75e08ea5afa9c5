//! In-process simulated worker fleet.
//!
//! Every simulated worker is a tokio task speaking the worker side of the
//! protocol over the fabric: it creates its own topic, announces READY on
//! the host topic, waits for a dispatch and reports an outcome. A reset
//! restarts the task; a delete aborts it.

use super::ComputeProvider;
use crate::error::{ComputeError, ComputeResult, FabricError};
use crate::fabric::MessagingFabric;
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_types::{Dispatch, ImageClass, Outcome, WorkerEvent, WorkerName};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What a simulated worker does with a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBehavior {
    /// Report `outcome` after running for `after`.
    Report {
        /// Classification to report.
        outcome: Outcome,
        /// Simulated run time.
        after: Duration,
    },
    /// Never report; only the watchdog recovers the worker.
    Hang,
}

type Script = Arc<dyn Fn(&ImageClass, &Dispatch) -> SimBehavior + Send + Sync>;

struct SimWorker {
    image_class: ImageClass,
    boots: u32,
    task: JoinHandle<()>,
}

/// Simulated fleet acting as a compute provider.
pub struct SimulatedFleet {
    fabric: Arc<dyn MessagingFabric>,
    host_topic: String,
    boot_delay: Duration,
    script: Script,
    workers: DashMap<WorkerName, SimWorker>,
}

impl std::fmt::Debug for SimulatedFleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedFleet")
            .field("host_topic", &self.host_topic)
            .field("boot_delay", &self.boot_delay)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedFleet {
    /// Create a fleet whose workers boot in `boot_delay` and run each test
    /// case for `run_delay`.
    ///
    /// The default script reports DETECTED for flag strings enabling
    /// extension changes (`-ext=Yes`) and NOT_DETECTED otherwise.
    pub fn new(
        fabric: Arc<dyn MessagingFabric>,
        host_topic: impl Into<String>,
        boot_delay: Duration,
        run_delay: Duration,
    ) -> Self {
        Self {
            fabric,
            host_topic: host_topic.into(),
            boot_delay,
            script: Arc::new(move |_: &ImageClass, dispatch: &Dispatch| SimBehavior::Report {
                outcome: if dispatch.flags.contains("-ext=Yes ") {
                    Outcome::Detected
                } else {
                    Outcome::NotDetected
                },
                after: run_delay,
            }),
            workers: DashMap::new(),
        }
    }

    /// Replace the behavior script.
    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&ImageClass, &Dispatch) -> SimBehavior + Send + Sync + 'static,
    {
        self.script = Arc::new(script);
        self
    }

    /// Number of simulated workers that exist.
    pub fn running(&self) -> usize {
        self.workers.len()
    }

    fn boot(&self, name: &WorkerName, image_class: &ImageClass, boot: u32) -> JoinHandle<()> {
        let cycle = BootCycle {
            fabric: Arc::clone(&self.fabric),
            host_topic: self.host_topic.clone(),
            topic: format!("guest_topic-{}-{}", name, boot),
            name: name.clone(),
            image_class: image_class.clone(),
            boot_delay: self.boot_delay,
            script: Arc::clone(&self.script),
        };

        tokio::spawn(async move {
            let name = cycle.name.clone();
            if let Err(e) = cycle.run().await {
                tracing::warn!("Simulated worker {} stopped: {}", name, e);
            }
        })
    }
}

/// One boot of a simulated worker, up to its report.
struct BootCycle {
    fabric: Arc<dyn MessagingFabric>,
    host_topic: String,
    topic: String,
    name: WorkerName,
    image_class: ImageClass,
    boot_delay: Duration,
    script: Script,
}

impl BootCycle {
    async fn run(self) -> Result<(), FabricError> {
        tokio::time::sleep(self.boot_delay).await;

        self.fabric.create_topic(&self.topic).await?;
        let mut dispatches = self.fabric.subscribe(&self.topic).await?;

        let ready = WorkerEvent::Ready {
            worker: self.name.clone(),
            result_channel: self.topic.clone(),
        };
        self.fabric.publish(&self.host_topic, ready.to_message()).await?;

        let Some(delivery) = dispatches.next().await else {
            // Topic deleted: no work for this worker.
            return Ok(());
        };
        let dispatch = match Dispatch::from_message(delivery.message()) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                tracing::error!("Simulated worker {} got a bad dispatch: {}", self.name, e);
                delivery.ack();
                return Ok(());
            }
        };
        delivery.ack();

        match (self.script)(&self.image_class, &dispatch) {
            SimBehavior::Report { outcome, after } => {
                tokio::time::sleep(after).await;
                let result = WorkerEvent::Result {
                    worker: self.name.clone(),
                    outcome,
                };
                self.fabric.publish(&self.host_topic, result.to_message()).await?;
            }
            SimBehavior::Hang => {
                tracing::debug!("Simulated worker {} hangs on {}", self.name, dispatch.flags);
                std::future::pending::<()>().await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeProvider for SimulatedFleet {
    async fn create(&self, name: &WorkerName, image_class: &ImageClass) -> ComputeResult<()> {
        if self.workers.contains_key(name) {
            return Err(ComputeError::Create {
                worker: name.clone(),
                reason: "worker already exists".to_string(),
            });
        }

        let task = self.boot(name, image_class, 0);
        self.workers.insert(
            name.clone(),
            SimWorker {
                image_class: image_class.clone(),
                boots: 0,
                task,
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &WorkerName) -> ComputeResult<()> {
        if let Some((_, worker)) = self.workers.remove(name) {
            worker.task.abort();
        }
        Ok(())
    }

    async fn reset(&self, name: &WorkerName) -> ComputeResult<()> {
        let mut worker = self
            .workers
            .get_mut(name)
            .ok_or_else(|| ComputeError::Reset {
                worker: name.clone(),
                reason: "no such worker".to_string(),
            })?;

        worker.task.abort();
        worker.boots += 1;
        let (class, boots) = (worker.image_class.clone(), worker.boots);
        worker.task = self.boot(name, &class, boots);
        Ok(())
    }
}

impl Drop for SimulatedFleet {
    fn drop(&mut self) {
        for worker in self.workers.iter() {
            worker.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{MemoryFabric, Subscription};

    async fn fleet() -> (Arc<MemoryFabric>, SimulatedFleet) {
        let fabric = Arc::new(MemoryFabric::new(Duration::from_millis(10)));
        fabric.create_topic("host").await.unwrap();
        let fleet = SimulatedFleet::new(
            fabric.clone(),
            "host",
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        (fabric, fleet)
    }

    async fn next_event(sub: &mut Box<dyn Subscription>) -> WorkerEvent {
        let delivery = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("event within timeout")
            .expect("host topic open");
        let event = WorkerEvent::try_from(delivery.message()).unwrap();
        delivery.ack();
        event
    }

    #[tokio::test]
    async fn worker_announces_ready_then_reports() {
        let (fabric, fleet) = fleet().await;
        let mut host = fabric.subscribe("host").await.unwrap();
        let name = WorkerName::new("img-000001");
        let class = ImageClass::new("img");

        fleet.create(&name, &class).await.unwrap();

        let WorkerEvent::Ready { worker, result_channel } = next_event(&mut host).await else {
            panic!("expected READY");
        };
        assert_eq!(worker, name);

        let dispatch = Dispatch {
            flags: "-encr=ASY -ext=Yes -root=.\\files".into(),
            artifact: "payload.exe".into(),
        };
        fabric
            .publish(&result_channel, dispatch.to_message(&class))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut host).await,
            WorkerEvent::Result {
                worker: name,
                outcome: Outcome::Detected
            }
        );
    }

    #[tokio::test]
    async fn reset_boots_again_on_fresh_topic() {
        let (fabric, fleet) = fleet().await;
        let mut host = fabric.subscribe("host").await.unwrap();
        let name = WorkerName::new("img-000001");
        fleet.create(&name, &ImageClass::new("img")).await.unwrap();

        let WorkerEvent::Ready { result_channel: first, .. } = next_event(&mut host).await else {
            panic!("expected READY");
        };
        fleet.reset(&name).await.unwrap();
        let WorkerEvent::Ready { result_channel: second, .. } = next_event(&mut host).await else {
            panic!("expected READY");
        };

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn hanging_worker_stays_silent() {
        let (fabric, fleet) = fleet().await;
        let fleet = fleet.with_script(|_, _| SimBehavior::Hang);
        let mut host = fabric.subscribe("host").await.unwrap();
        let name = WorkerName::new("img-000001");
        let class = ImageClass::new("img");
        fleet.create(&name, &class).await.unwrap();

        let WorkerEvent::Ready { result_channel, .. } = next_event(&mut host).await else {
            panic!("expected READY");
        };
        let dispatch = Dispatch {
            flags: "-x".into(),
            artifact: "a".into(),
        };
        fabric
            .publish(&result_channel, dispatch.to_message(&class))
            .await
            .unwrap();

        let silence = tokio::time::timeout(Duration::from_millis(50), host.next()).await;
        assert!(silence.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_reset_needs_worker() {
        let (_fabric, fleet) = fleet().await;
        let name = WorkerName::new("img-000001");
        fleet.create(&name, &ImageClass::new("img")).await.unwrap();
        assert!(fleet.create(&name, &ImageClass::new("img")).await.is_err());

        fleet.delete(&name).await.unwrap();
        fleet.delete(&name).await.unwrap();
        assert_eq!(fleet.running(), 0);
        assert!(matches!(
            fleet.reset(&name).await,
            Err(ComputeError::Reset { .. })
        ));
    }
}
