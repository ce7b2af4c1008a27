use std::sync::Arc;

use crate::caps::{
    Capabilities, CapsCache, CapsError, DeviceType, HardwareIds, InitGuard, ShaderModel,
};
use crate::native::{AdapterDesc, EncoderOf, NativeAdapter};
use crate::task::{ContextId, TaskPoolLock};

use super::{ContextConfig, DeviceContext, DeviceError, PoolOf};

struct ContextEntry<A: NativeAdapter> {
    context: Arc<DeviceContext<A>>,
    /// Outstanding `init_d3d` calls not yet matched by `release_d3d`.
    usage: u32,
}

/// Contexts of one logical device, guarded by the init mutex.
struct Contexts<A: NativeAdapter> {
    entries: Vec<ContextEntry<A>>,
    default: Option<ContextId>,
}

impl<A: NativeAdapter> Contexts<A> {
    fn position(&self, id: ContextId) -> Option<usize> {
        self.entries.iter().position(|e| e.context.id() == id)
    }
}

/// One physical adapter as seen by the compute API.
///
/// Owns the adapter's capability cache and the hardware-bound contexts
/// created on it. All contexts share one task pool.
///
/// Lock order: the task-pool lock may be held while taking the init mutex,
/// never the other way around.
pub struct LogicalDevice<A: NativeAdapter> {
    adapter: A,
    desc: AdapterDesc,
    pool: Arc<PoolOf<A>>,
    config: ContextConfig,
    /// Capability cache plus the init mutex guarding the contexts.
    caps: CapsCache<Contexts<A>>,
}

impl<A: NativeAdapter> LogicalDevice<A> {
    pub fn new(adapter: A, pool: Arc<PoolOf<A>>, config: ContextConfig) -> Self {
        let desc = adapter.describe();
        log::debug!("logical device for '{}' (luid {:#x})", desc.name, desc.luid);
        Self {
            adapter,
            desc,
            pool,
            config,
            caps: CapsCache::new(Contexts { entries: Vec::new(), default: None }),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn pool(&self) -> &Arc<PoolOf<A>> {
        &self.pool
    }

    // ── capabilities ─────────────────────────────────────────────────────

    /// Fills the capability cache if it is still empty.
    ///
    /// Uses `device` when one is at hand, otherwise creates a transient
    /// native device for the query. Only a guard of this device's own init
    /// mutex is accepted.
    fn cache_caps(
        &self,
        init: &InitGuard<'_, Contexts<A>>,
        device: Option<&A::Device>,
    ) -> Result<Arc<Capabilities>, CapsError> {
        init.get_or_compute(|| match device {
            Some(device) => self.adapter.query_caps(device),
            None => {
                log::debug!("creating transient device to query '{}'", self.desc.name);
                let (device, _queue) = self.adapter.create_device()?;
                self.adapter.query_caps(&device)
            }
        })
    }

    /// The capability snapshot, computed on first use.
    pub fn caps(&self) -> Result<Arc<Capabilities>, CapsError> {
        if let Some(recorded) = self.caps.get() {
            return recorded;
        }
        let init = self.contexts();
        self.cache_caps(&init, None)
    }

    /// True if the adapter is usable: it reports itself valid and its
    /// capabilities could be queried.
    pub fn is_available(&self) -> bool {
        self.desc.is_valid && self.caps().is_ok()
    }

    pub fn global_mem_size(&self) -> Result<u64, CapsError> {
        Ok(self.caps()?.global_mem_size())
    }

    pub fn hardware_ids(&self) -> Result<HardwareIds, CapsError> {
        Ok(self.caps()?.hardware_ids)
    }

    pub fn device_type(&self) -> Result<DeviceType, CapsError> {
        Ok(self.caps()?.device_type())
    }

    pub fn is_mcdm(&self) -> Result<bool, CapsError> {
        Ok(self.caps()?.is_mcdm)
    }

    pub fn is_uma(&self) -> Result<bool, CapsError> {
        Ok(self.caps()?.architecture.uma)
    }

    pub fn supports_int16(&self) -> Result<bool, CapsError> {
        Ok(self.caps()?.options.native_16bit_ops)
    }

    pub fn supports_typed_uav_load(&self) -> Result<bool, CapsError> {
        Ok(self.caps()?.options.typed_uav_load_additional_formats)
    }

    pub fn shader_model(&self) -> Result<ShaderModel, CapsError> {
        Ok(self.caps()?.shader_model)
    }

    /// Minimum and maximum wave lane counts.
    pub fn wave_sizes(&self) -> Result<(u32, u32), CapsError> {
        Ok(self.caps()?.wave_sizes())
    }

    /// Adapter description string; needs no capability query.
    pub fn device_name(&self) -> &str {
        &self.desc.name
    }

    pub fn adapter_luid(&self) -> u64 {
        self.desc.luid
    }

    // ── contexts ─────────────────────────────────────────────────────────

    /// Obtains a hardware-bound context.
    ///
    /// With `imported` handles, a context already bound to the same pair is
    /// reused, otherwise a new context referencing (but not owning) them is
    /// created. Without handles, the default context or the first owned one
    /// is reused, otherwise a native device is created. Each successful call
    /// must be matched by [`LogicalDevice::release_d3d`].
    pub fn init_d3d(
        &self,
        imported: Option<(Arc<A::Device>, Arc<A::Queue>)>,
    ) -> Result<Arc<DeviceContext<A>>, DeviceError> {
        let mut contexts = self.contexts();

        let reused = match &imported {
            Some((device, queue)) => contexts
                .entries
                .iter()
                .position(|e| e.context.binds(device, queue)),
            None => contexts
                .default
                .and_then(|id| contexts.position(id))
                .or_else(|| contexts.entries.iter().position(|e| !e.context.is_imported())),
        };
        if let Some(index) = reused {
            let entry = &mut contexts.entries[index];
            entry.usage += 1;
            log::debug!("{}: reused (usage {})", entry.context.id(), entry.usage);
            return Ok(Arc::clone(&entry.context));
        }

        let (device, queue, is_imported) = match imported {
            Some((device, queue)) => (device, queue, true),
            None => {
                let (device, queue) = self.adapter.create_device()?;
                (device, queue, false)
            }
        };

        let caps = self.cache_caps(&contexts, Some(device.as_ref()))?;
        let context = Arc::new(DeviceContext::new(
            device,
            queue,
            is_imported,
            &caps,
            Arc::clone(&self.pool),
            self.config.clone(),
        )?);
        contexts.entries.push(ContextEntry { context: Arc::clone(&context), usage: 1 });
        drop(contexts);

        // Registered after the init mutex is released to keep the lock order.
        let mut lock = self.pool.lock();
        if !context.is_released() {
            lock.register_context(context.id());
        }
        drop(lock);
        Ok(context)
    }

    /// Drops one usage of `context`; the last release flushes it, drains its
    /// workers and drops its native handles.
    ///
    /// Other contexts and the capability cache are unaffected.
    pub fn release_d3d(&self, context: &Arc<DeviceContext<A>>) -> Result<(), DeviceError> {
        let removed = {
            let mut contexts = self.contexts();
            let index = contexts
                .position(context.id())
                .ok_or(DeviceError::ContextReleased(context.id()))?;

            let entry = &mut contexts.entries[index];
            entry.usage -= 1;
            if entry.usage > 0 {
                log::debug!("{}: released (usage {})", entry.context.id(), entry.usage);
                return Ok(());
            }
            if contexts.default == Some(context.id()) {
                contexts.default = None;
            }
            contexts.entries.remove(index).context
        };

        removed.teardown();
        Ok(())
    }

    /// Marks `context` as the one handed out by [`LogicalDevice::init_d3d`]
    /// calls without handles.
    pub fn set_default_context(&self, context: &DeviceContext<A>) -> Result<(), DeviceError> {
        let mut contexts = self.contexts();
        if contexts.position(context.id()).is_none() {
            return Err(DeviceError::ContextReleased(context.id()));
        }
        contexts.default = Some(context.id());
        Ok(())
    }

    pub fn default_context(&self) -> Option<Arc<DeviceContext<A>>> {
        let contexts = self.contexts();
        let index = contexts.default.and_then(|id| contexts.position(id))?;
        Some(Arc::clone(&contexts.entries[index].context))
    }

    /// True while at least one context is live.
    pub fn has_d3d_device(&self) -> bool {
        !self.contexts().entries.is_empty()
    }

    pub fn context_count(&self) -> usize {
        self.contexts().entries.len()
    }

    /// Flushes every live context. Keeps going past failing contexts and
    /// returns the first error.
    pub fn flush_all_devices(
        &self,
        lock: &mut TaskPoolLock<'_, EncoderOf<A>>,
    ) -> Result<(), DeviceError> {
        if !lock.belongs_to(&self.pool) {
            log::error!("flush_all_devices: lock taken on another task pool");
            return Err(DeviceError::ForeignPoolLock);
        }

        let live: Vec<Arc<DeviceContext<A>>> = self
            .contexts()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.context))
            .collect();

        let mut first_err = None;
        for context in live {
            if let Err(err) = context.flush(lock) {
                log::warn!("{}: flush failed: {err}", context.id());
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn contexts(&self) -> InitGuard<'_, Contexts<A>> {
        self.caps.lock()
    }
}

impl<A: NativeAdapter> Drop for LogicalDevice<A> {
    fn drop(&mut self) {
        {
            let mut lock = self.pool.lock();
            if let Err(err) = self.flush_all_devices(&mut lock) {
                log::warn!("flush on logical device drop: {err}");
            }
        }

        let contexts = self.caps.get_mut();
        contexts.default = None;
        for entry in std::mem::take(&mut contexts.entries) {
            entry.context.teardown();
        }
        log::debug!("logical device for '{}' dropped", self.desc.name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::native::mock::MockAdapter;
    use crate::native::NativeError;
    use crate::task::{TaskFailure, TaskId, TaskPool, TaskState};

    fn logical(adapter: MockAdapter) -> LogicalDevice<MockAdapter> {
        LogicalDevice::new(adapter, Arc::new(TaskPool::new()), ContextConfig::default())
    }

    fn run_marker(ctx: &DeviceContext<MockAdapter>, marker: u32) -> TaskId {
        let task = ctx.pool().create_task(move |enc: &mut Vec<u32>| {
            enc.push(marker);
            Ok(())
        });
        let mut lock = ctx.pool().lock();
        ctx.submit_task(task, &mut lock).unwrap();
        ctx.ready_task(task, &mut lock).unwrap();
        task
    }

    // ── capabilities ─────────────────────────────────────────────────────

    #[test]
    fn concurrent_first_queries_compute_caps_once() {
        let device = Arc::new(logical(
            MockAdapter::new().with_caps_delay(Duration::from_millis(20)),
        ));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let device = Arc::clone(&device);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    device.caps().unwrap()
                })
            })
            .collect();
        let results: Vec<Arc<Capabilities>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(device.adapter().caps_queries.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn racing_query_and_context_creation_compute_caps_once() {
        let device = Arc::new(logical(
            MockAdapter::new().with_caps_delay(Duration::from_millis(20)),
        ));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let device = Arc::clone(&device);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        device.caps().map(|_| ()).map_err(DeviceError::from)
                    } else {
                        device.init_d3d(None).map(|_| ())
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(device.adapter().caps_queries.load(Ordering::SeqCst), 1);
        assert_eq!(device.context_count(), 1);
    }

    #[test]
    fn caps_failure_is_sticky() {
        let device = logical(MockAdapter::new().failing_caps());

        assert!(!device.is_available());
        let first = device.global_mem_size().unwrap_err();
        let second = device.shader_model().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(first, CapsError(NativeError::CapsQuery("mock failure".to_string())));
        assert_eq!(device.adapter().caps_queries.load(Ordering::SeqCst), 1);

        assert!(matches!(device.init_d3d(None), Err(DeviceError::Caps(_))));
        assert!(!device.has_d3d_device());
    }

    #[test]
    fn queries_read_the_snapshot() {
        let device = logical(MockAdapter::new());

        assert!(device.is_available());
        assert_eq!(device.device_name(), "mock adapter");
        assert_eq!(device.adapter_luid(), 42);
        assert_eq!(device.global_mem_size().unwrap(), 4 << 30);
        assert_eq!(device.device_type().unwrap(), DeviceType::Gpu);
        assert_eq!(device.wave_sizes().unwrap(), (32, 64));
        assert_eq!(device.shader_model().unwrap(), ShaderModel::new(6, 5));
        assert_eq!(device.hardware_ids().unwrap().vendor_id, 0x1414);
        assert!(!device.is_uma().unwrap());
        assert!(!device.is_mcdm().unwrap());
        assert!(!device.supports_int16().unwrap());
        assert!(!device.supports_typed_uav_load().unwrap());
    }

    #[test]
    fn transient_device_used_for_queries_is_dropped() {
        let adapter = MockAdapter::new();
        let destroyed = Arc::clone(&adapter.destroyed);
        let device = logical(adapter);

        device.caps().unwrap();
        assert_eq!(device.adapter().devices_created.load(Ordering::SeqCst), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    // ── contexts ─────────────────────────────────────────────────────────

    #[test]
    fn init_without_handles_reuses_owned_context() {
        let device = logical(MockAdapter::new());

        let first = device.init_d3d(None).unwrap();
        let second = device.init_d3d(None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(device.context_count(), 1);

        device.release_d3d(&first).unwrap();
        assert!(!first.is_released());
        device.release_d3d(&second).unwrap();
        assert!(first.is_released());
        assert!(!device.has_d3d_device());
    }

    #[test]
    fn imported_handles_are_never_destroyed() {
        let device = logical(MockAdapter::new());
        let (native_device, native_queue) = device.adapter().create_device().unwrap();
        let imported = Some((Arc::clone(&native_device), Arc::clone(&native_queue)));

        let ctx = device.init_d3d(imported.clone()).unwrap();
        let again = device.init_d3d(imported).unwrap();
        assert!(Arc::ptr_eq(&ctx, &again));
        assert!(ctx.is_imported());

        let task = run_marker(&ctx, 7);
        assert_eq!(ctx.wait(task).unwrap(), Ok(()));

        device.release_d3d(&ctx).unwrap();
        device.release_d3d(&again).unwrap();
        assert!(ctx.is_released());
        assert_eq!(device.adapter().destroyed(), 0);
        assert_eq!(native_queue.executed(), vec![7]);
    }

    #[test]
    fn owned_handles_are_destroyed_on_last_release() {
        let device = logical(MockAdapter::new());
        let ctx = device.init_d3d(None).unwrap();
        assert!(!ctx.is_imported());

        let task = run_marker(&ctx, 1);
        assert_eq!(ctx.wait(task).unwrap(), Ok(()));

        device.release_d3d(&ctx).unwrap();
        assert_eq!(device.adapter().destroyed(), 2);
    }

    #[test]
    fn releasing_one_context_leaves_others_running() {
        let device = logical(MockAdapter::new());
        let owned = device.init_d3d(None).unwrap();
        let (native_device, native_queue) = device.adapter().create_device().unwrap();
        let imported = device.init_d3d(Some((native_device, native_queue))).unwrap();
        assert_eq!(device.context_count(), 2);

        device.release_d3d(&owned).unwrap();

        let task = run_marker(&imported, 3);
        assert_eq!(imported.wait(task).unwrap(), Ok(()));
        assert!(device.caps().is_ok());
        assert_eq!(device.adapter().caps_queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_of_unknown_context_fails() {
        let device = logical(MockAdapter::new());
        let ctx = device.init_d3d(None).unwrap();
        device.release_d3d(&ctx).unwrap();
        assert_eq!(device.release_d3d(&ctx), Err(DeviceError::ContextReleased(ctx.id())));
    }

    #[test]
    fn default_context_is_preferred() {
        let device = logical(MockAdapter::new());
        let owned = device.init_d3d(None).unwrap();
        let (native_device, native_queue) = device.adapter().create_device().unwrap();
        let imported = device.init_d3d(Some((native_device, native_queue))).unwrap();

        device.set_default_context(&imported).unwrap();
        let picked = device.init_d3d(None).unwrap();
        assert!(Arc::ptr_eq(&picked, &imported));
        assert!(!Arc::ptr_eq(&picked, &owned));
        assert!(Arc::ptr_eq(&device.default_context().unwrap(), &imported));
    }

    #[test]
    fn flush_all_devices_flushes_every_context() {
        let device = logical(MockAdapter::new());
        let first = device.init_d3d(None).unwrap();
        let (native_device, native_queue) = device.adapter().create_device().unwrap();
        let second = device
            .init_d3d(Some((native_device, Arc::clone(&native_queue))))
            .unwrap();

        let a = run_marker(&first, 1);
        let b = run_marker(&second, 2);
        device.flush_all_devices(&mut device.pool().lock()).unwrap();

        let pool = device.pool();
        assert_eq!(pool.wait_timeout(a, Duration::from_secs(5)).unwrap(), Some(Ok(())));
        assert_eq!(pool.wait_timeout(b, Duration::from_secs(5)).unwrap(), Some(Ok(())));
        assert_eq!(native_queue.executed(), vec![2]);
    }

    #[test]
    fn flush_all_devices_rejects_lock_of_another_pool() {
        let device = logical(MockAdapter::new());
        let ctx = device.init_d3d(None).unwrap();
        let task = run_marker(&ctx, 1);

        let other: PoolOf<MockAdapter> = TaskPool::new();
        assert_eq!(
            device.flush_all_devices(&mut other.lock()),
            Err(DeviceError::ForeignPoolLock)
        );
        assert_eq!(device.pool().state(task).unwrap(), TaskState::Ready);

        device.flush_all_devices(&mut device.pool().lock()).unwrap();
        assert_eq!(
            device.pool().wait_timeout(task, Duration::from_secs(5)).unwrap(),
            Some(Ok(()))
        );
    }

    #[test]
    fn drop_resolves_outstanding_tasks() {
        let pool = Arc::new(TaskPool::new());
        let device = LogicalDevice::new(MockAdapter::new(), Arc::clone(&pool), ContextConfig::default());
        let ctx = device.init_d3d(None).unwrap();

        let ready = run_marker(&ctx, 1);
        let stuck = ctx.pool().create_task(|_: &mut Vec<u32>| Ok(()));
        ctx.submit_task(stuck, &mut pool.lock()).unwrap();

        drop(device);

        assert!(ctx.is_released());
        assert_eq!(pool.outcome(ready).unwrap(), Some(Ok(())));
        assert_eq!(pool.outcome(stuck).unwrap(), Some(Err(TaskFailure::Cancelled)));
    }

    #[test]
    fn context_released_rejects_new_work() {
        let device = logical(MockAdapter::new());
        let ctx = device.init_d3d(None).unwrap();
        device.release_d3d(&ctx).unwrap();

        let task = ctx.pool().create_task(|_: &mut Vec<u32>| Ok(()));
        assert_eq!(
            ctx.submit_task(task, &mut device.pool().lock()),
            Err(DeviceError::ContextReleased(ctx.id()))
        );
        assert_eq!(device.pool().release(task), Ok(()));
    }
}
