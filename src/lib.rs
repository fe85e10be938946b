//! A register-based bytecode interpreter that replays precompiled GPU
//! modules against `wgpu` (§1, §2). The crate root exposes the
//! host-facing lifecycle API (§6.4): `init`/`shutdown` process-wide
//! setup, and an opaque [`Animation`] handle created from a module's
//! bytes and driven one frame at a time.
//!
//! Everything below the host API — module parsing, the opcode scanner,
//! WGSL dependency resolution, the dispatcher, and the backend
//! implementations — is reusable on its own; most embedders only need
//! this module.

pub mod arrays;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod module;
pub mod opcode;
pub mod scanner;
pub mod varint;
pub mod wgsl;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub use backend::native::NativeBackend;
pub use config::{ErrorCallback, RuntimeConfig};
pub use driver::Driver;
pub use error::{CoreError, CoreResult, ErrorCode};

fn runtime_config() -> &'static RuntimeConfig {
    static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();
    CONFIG.get_or_init(RuntimeConfig::new)
}

/// Idempotent-in-intent process-wide setup (§6.4). Must be called once
/// before [`Animation::create`]; a second call without an intervening
/// [`shutdown`] returns `AlreadyInitialized`.
pub fn init() -> CoreResult<()> {
    runtime_config().init()
}

/// Tears down process-wide state installed by [`init`].
pub fn shutdown() -> CoreResult<()> {
    runtime_config().shutdown()
}

/// Installs a thread-safe error sink invoked whenever an `Animation`
/// operation fails. Replaces any previously installed callback.
pub fn set_error_callback(callback: ErrorCallback) {
    runtime_config().set_error_callback(callback);
}

/// Per-animation frame counter (§4.9), incremented on each `render`
/// call and readable without taking any lock. Draw/dispatch counts live
/// on the backend itself (`NativeBackend::draw_call_count` /
/// `dispatch_call_count`) since they're produced there.
#[derive(Default)]
struct Counters {
    frames: AtomicU64,
}

/// A running instance of a loaded module, bound to a surface and
/// driven one frame at a time (§6.4). Dropping an `Animation` releases
/// its backend resources.
pub struct Animation {
    driver: Driver<NativeBackend>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    counters: Counters,
}

impl Animation {
    /// Parses `bytes` as a module container, configures a `wgpu` surface
    /// for `window` at `width x height`, and returns an `Animation` ready
    /// to render (§6.4 `create`).
    pub fn create<W>(bytes: &[u8], window: &W, width: u32, height: u32) -> CoreResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        runtime_config().require_initialized()?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let target = wgpu::SurfaceTargetUnsafe::from_window(window).map_err(|e| {
            log::error!("failed to derive a surface target from the window handle: {e}");
            CoreError::ContextFailure
        })?;
        let surface = unsafe {
            instance
                .create_surface_unsafe(target)
                .map_err(|_| CoreError::ContextFailure)?
        };

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|_| CoreError::ContextFailure)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|_| CoreError::ContextFailure)?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let backend = NativeBackend::new(device.clone(), queue.clone(), surface_format);
        let driver = Driver::load(bytes, backend)?;

        log::info!("animation created at {width}x{height}, format={surface_format:?}");

        Ok(Self {
            driver,
            device,
            queue,
            surface,
            surface_config,
            counters: Counters::default(),
        })
    }

    /// Drives exactly one frame at `time_seconds` (§6.4 `render`).
    /// Returns the host-facing [`ErrorCode`] rather than propagating the
    /// richer `CoreError`, matching the lifecycle API's contract.
    pub fn render(&mut self, time_seconds: f32) -> ErrorCode {
        match self.render_inner(time_seconds) {
            Ok(()) => ErrorCode::Ok,
            Err(err) => {
                let code = ErrorCode::from(&err);
                runtime_config().report_error(&err);
                code
            }
        }
    }

    fn render_inner(&mut self, time_seconds: f32) -> CoreResult<()> {
        let frame = self
            .surface
            .get_current_texture()
            .map_err(|e| CoreError::SurfaceTextureUnavailable(e.to_string()))?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.driver.backend_mut().begin_frame(view);
        let result = self.driver.render_frame(time_seconds);
        self.driver.backend_mut().end_frame();
        frame.present();

        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Reconfigures the surface after a window resize (§6.4 `resize`).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface_config.width = width.max(1);
        self.surface_config.height = height.max(1);
        self.surface.configure(&self.device, &self.surface_config);
    }

    pub fn frame_count(&self) -> u64 {
        self.counters.frames.load(Ordering::Relaxed)
    }

    pub fn compute_call_count(&self) -> u64 {
        self.driver.backend().dispatch_call_count()
    }

    pub fn render_call_count(&self) -> u64 {
        self.driver.backend().draw_call_count()
    }

    pub fn reset_counters(&self) {
        self.counters.frames.store(0, Ordering::Relaxed);
        self.driver.backend().reset_call_counts();
    }
}

// destroy() is expressed as Drop rather than an explicit method: there's
// nothing additional to release beyond what wgpu's handles already do on
// drop, and an explicit destroy() would just be an early drop() in disguise.
