//! Module registry and lifecycle.
//!
//! The manager owns the agent's long-running modules. Every module is
//! registered under a unique name, receives the shared push callback
//! (the single route into the outbound queue), and runs on its own
//! task between [`ModuleManager::start`] and [`ModuleManager::stop`].

use std::sync::Arc;

use anyhow::{bail, Context};
use log::{error, info};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use vigil_queue::{Message, MultiTypeQueue};

/// The injected event route: modules push messages through this and
/// get back the number of items accepted (negative on failure).
pub type PushMessage = Arc<dyn Fn(Message) -> i32 + Send + Sync>;

/// Contract every long-running module fulfills.
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One-time configuration before start.
    fn setup(&self, config: &serde_json::Value) -> anyhow::Result<()>;

    /// Blocks until [`Module::stop`] is invoked.
    fn run(&self) -> anyhow::Result<()>;

    fn stop(&self);

    /// Receives the shared push callback at registration time.
    fn set_push_message(&self, push: PushMessage);
}

/// Builds the standard push callback over the agent queue.
pub fn queue_push_callback(queue: Arc<MultiTypeQueue>) -> PushMessage {
    Arc::new(move |message: Message| match queue.push(&message, false) {
        Ok(n) => n as i32,
        Err(err) => {
            error!("failed to enqueue message: {err}");
            -1
        }
    })
}

pub struct ModuleManager {
    modules: Mutex<Vec<Arc<dyn Module>>>,
    push: PushMessage,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ModuleManager {
    pub fn new(push: PushMessage) -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            push,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a module; names must be unique.
    pub fn add_module(&self, module: Arc<dyn Module>) -> anyhow::Result<()> {
        let mut modules = self.modules.lock();
        if modules.iter().any(|m| m.name() == module.name()) {
            bail!("module '{}' already exists", module.name());
        }
        module.set_push_message(self.push.clone());
        modules.push(module);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.lock().iter().find(|m| m.name() == name).cloned()
    }

    /// Configures every registered module.
    pub fn setup(&self, config: &serde_json::Value) -> anyhow::Result<()> {
        for module in self.modules.lock().iter() {
            module
                .setup(config)
                .with_context(|| format!("setting up module '{}'", module.name()))?;
        }
        Ok(())
    }

    /// Launches every module's `run` on its own blocking task. Returns
    /// once all tasks are spawned; modules may still be initializing.
    pub fn start(&self) {
        let modules = self.modules.lock();
        let mut tasks = self.tasks.lock();
        for module in modules.iter() {
            let module = module.clone();
            info!("starting module {}", module.name());
            tasks.push(tokio::task::spawn_blocking(move || {
                if let Err(err) = module.run() {
                    error!("module {} exited with error: {err:#}", module.name());
                }
            }));
        }
    }

    /// Signals every module to stop and waits for their tasks.
    pub async fn stop(&self) {
        for module in self.modules.lock().iter() {
            info!("stopping module {}", module.name());
            module.stop();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                error!("module task failed to join: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use vigil_queue::{MessageType, QueueConfig, ShutdownSignal};

    struct TestModule {
        name: &'static str,
        running: AtomicBool,
        stop_requested: AtomicBool,
        setups: AtomicUsize,
        push: Mutex<Option<PushMessage>>,
    }

    impl TestModule {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                setups: AtomicUsize::new(0),
                push: Mutex::new(None),
            })
        }
    }

    impl Module for TestModule {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&self, _config: &serde_json::Value) -> anyhow::Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn run(&self) -> anyhow::Result<()> {
            self.running.store(true, Ordering::SeqCst);
            if let Some(push) = self.push.lock().as_ref() {
                let accepted = push(Message::new(
                    MessageType::Stateful,
                    json!({"module": self.name}),
                    self.name,
                ));
                assert_eq!(accepted, 1);
            }
            while !self.stop_requested.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Ok(())
        }

        fn stop(&self) {
            self.stop_requested.store(true, Ordering::SeqCst);
        }

        fn set_push_message(&self, push: PushMessage) {
            *self.push.lock() = Some(push);
        }
    }

    fn test_queue() -> (tempfile::TempDir, Arc<MultiTypeQueue>) {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(
            MultiTypeQueue::new(QueueConfig::with_data_path(dir.path()), ShutdownSignal::new())
                .unwrap(),
        );
        (dir, queue)
    }

    #[test]
    fn duplicate_module_names_are_rejected() {
        let (_dir, queue) = test_queue();
        let manager = ModuleManager::new(queue_push_callback(queue));
        manager.add_module(TestModule::new("inventory")).unwrap();
        assert!(manager.add_module(TestModule::new("inventory")).is_err());
        assert!(manager.get_module("inventory").is_some());
        assert!(manager.get_module("missing").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_runs_modules_and_stop_joins_them() {
        let (_dir, queue) = test_queue();
        let manager = ModuleManager::new(queue_push_callback(queue.clone()));

        let module = TestModule::new("inventory");
        manager.add_module(module.clone()).unwrap();
        manager.setup(&json!({})).unwrap();
        assert_eq!(module.setups.load(Ordering::SeqCst), 1);

        manager.start();
        while !module.running.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        manager.stop().await;

        // The module's push went through the shared callback into the
        // queue.
        assert_eq!(queue.size_per_type(MessageType::Stateful).unwrap(), 1);
    }
}
