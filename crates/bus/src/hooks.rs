/// Callback invoked after a reconciliation step, keyed by the affected
/// tenant. Owned by other subsystems (cache warmers, metrics, schedulers).
pub type LifecycleHook = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Ordered, append-only lists of reconciliation callbacks.
///
/// Registration order is invocation order. A failing hook is logged and does
/// not short-circuit the hooks after it. There is no removal API.
#[derive(Default)]
pub struct LifecycleHookRegistry {
    on_add: Vec<LifecycleHook>,
    on_update: Vec<LifecycleHook>,
    on_delete: Vec<LifecycleHook>,
}

impl LifecycleHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_add<F>(&mut self, hook: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_add.push(Box::new(hook));
    }

    pub fn register_update<F>(&mut self, hook: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_update.push(Box::new(hook));
    }

    pub fn register_delete<F>(&mut self, hook: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_delete.push(Box::new(hook));
    }

    pub fn run_add(&self, app_key: &str) {
        Self::run(&self.on_add, "add", app_key);
    }

    pub fn run_update(&self, app_key: &str) {
        Self::run(&self.on_update, "update", app_key);
    }

    pub fn run_delete(&self, app_key: &str) {
        Self::run(&self.on_delete, "delete", app_key);
    }

    fn run(hooks: &[LifecycleHook], kind: &str, app_key: &str) {
        for (index, hook) in hooks.iter().enumerate() {
            if let Err(err) = hook(app_key) {
                tracing::warn!(
                    "{} hook #{} failed for tenant {}: {:#}",
                    kind,
                    index,
                    app_key,
                    err
                );
            }
        }
    }
}
