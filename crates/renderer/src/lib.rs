//! Live-edit playground orchestrator.
//!
//! Ties the other crates together into a polled session:
//!
//! ```text
//! editor buffers ──► Debouncer ──► validate ──► markers
//!                        │             │
//!                        │        (all clean)
//!                        ▼             ▼
//!                  script texts    rebuild: compile program,
//!                        │         upload geometry, run init
//!                        ▼             │
//!                 RenderCallable ◄─────┘
//!                        │
//!   every tick:   invoke(S, time) ──► UniformBatch ──► draw
//! ```
//!
//! The host owns the clock and calls [`Playground::tick`] once per frame with
//! the current instant; the playground never blocks or spawns threads. A
//! session stays useful mid-edit: broken sources produce markers and leave the
//! last good program running, broken scripts degrade to no-ops, and only GPU
//! resource creation is allowed to fail hard.

use std::mem;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use diagnostics::{validate, Diagnostic, Stage};
use sandbox::{InitCallable, RenderCallable, SessionState, UniformBatch};

mod debounce;
mod gpu;
mod sources;

pub use debounce::{Debouncer, DEFAULT_DEBOUNCE};
pub use gpu::{CompiledProgram, GeometryBuffer, GpuContext, ResourceError};
pub use sources::{
    header_line_count, ShaderSource, DEFAULT_FRAGMENT_SHADER, DEFAULT_INIT_SCRIPT,
    DEFAULT_RENDER_SCRIPT, DEFAULT_VERTEX_SHADER, SHADER_HEADER,
};

/// Where the session currently is in its build lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No program has been promoted yet.
    Idle,
    /// A rebuild is in flight this tick.
    Building,
    /// A program is live and drawing (or would be, with a GPU attached).
    Ready,
}

/// Initial sources and tuning knobs for a [`Playground`].
#[derive(Debug, Clone)]
pub struct PlaygroundConfig {
    pub surface_size: (u32, u32),
    pub debounce_interval: Duration,
    /// Floats per vertex in the quad buffer; clamped to at least 3.
    pub vertex_stride: usize,
    pub vertex_source: String,
    pub fragment_source: String,
    pub init_source: String,
    pub render_source: String,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            surface_size: (800, 600),
            debounce_interval: DEFAULT_DEBOUNCE,
            vertex_stride: 3,
            vertex_source: DEFAULT_VERTEX_SHADER.to_string(),
            fragment_source: DEFAULT_FRAGMENT_SHADER.to_string(),
            init_source: DEFAULT_INIT_SCRIPT.to_string(),
            render_source: DEFAULT_RENDER_SCRIPT.to_string(),
        }
    }
}

/// One live-editing session: four editable buffers, one GPU program, one
/// script state bag.
pub struct Playground {
    surface_size: (u32, u32),
    vertex_stride: usize,

    vertex_edits: Debouncer,
    fragment_edits: Debouncer,
    init_edits: Debouncer,
    render_edits: Debouncer,

    vertex_source: ShaderSource,
    fragment_source: ShaderSource,
    init_text: String,
    render_text: String,

    vertex_markers: Vec<Diagnostic>,
    fragment_markers: Vec<Diagnostic>,

    gpu: Option<GpuContext>,
    program: Option<CompiledProgram>,
    geometry: Option<GeometryBuffer>,
    fatal: Option<ResourceError>,

    batch: UniformBatch,
    render_callable: RenderCallable,
    state: SessionState,

    started_at: Option<Instant>,
    needs_rebuild: bool,
    stride_changed: bool,
    viewport_dirty: bool,
    phase: Phase,
}

impl Playground {
    /// Builds a session from the given sources, validating them immediately.
    ///
    /// The first [`tick`](Self::tick) performs the initial rebuild (assuming
    /// the shaders are clean); until then the phase is [`Phase::Idle`].
    pub fn new(config: PlaygroundConfig) -> Self {
        let vertex_source = ShaderSource::new(Stage::Vertex, config.vertex_source);
        let fragment_source = ShaderSource::new(Stage::Fragment, config.fragment_source);
        let vertex_markers = validate(
            Stage::Vertex,
            &vertex_source.effective(),
            header_line_count(),
        );
        let fragment_markers = validate(
            Stage::Fragment,
            &fragment_source.effective(),
            header_line_count(),
        );

        let batch = UniformBatch::new();
        let render_callable = RenderCallable::compile(&config.render_source, &batch);

        Self {
            surface_size: config.surface_size,
            vertex_stride: config.vertex_stride.max(3),
            vertex_edits: Debouncer::new(config.debounce_interval),
            fragment_edits: Debouncer::new(config.debounce_interval),
            init_edits: Debouncer::new(config.debounce_interval),
            render_edits: Debouncer::new(config.debounce_interval),
            vertex_source,
            fragment_source,
            init_text: config.init_source,
            render_text: config.render_source,
            vertex_markers,
            fragment_markers,
            gpu: None,
            program: None,
            geometry: None,
            fatal: None,
            batch,
            render_callable,
            state: SessionState::new(),
            started_at: None,
            needs_rebuild: true,
            stride_changed: true,
            viewport_dirty: false,
            phase: Phase::Idle,
        }
    }

    /// Adopts a host-provided GL context. Without one the session still
    /// validates, rebuilds and runs scripts; it just never draws.
    pub fn attach_gpu(&mut self, gl: glow::Context) -> Result<(), ResourceError> {
        self.gpu = Some(GpuContext::new(gl)?);
        self.needs_rebuild = true;
        self.stride_changed = true;
        Ok(())
    }

    /// Submits replacement vertex shader text; takes effect after the quiet
    /// interval.
    pub fn set_vertex_source(&mut self, text: impl Into<String>, now: Instant) {
        self.vertex_edits.submit(text.into(), now);
    }

    /// Submits replacement fragment shader text; takes effect after the quiet
    /// interval.
    pub fn set_fragment_source(&mut self, text: impl Into<String>, now: Instant) {
        self.fragment_edits.submit(text.into(), now);
    }

    /// Submits replacement init script text. Propagation triggers a rebuild
    /// and therefore a fresh session state.
    pub fn set_init_script(&mut self, text: impl Into<String>, now: Instant) {
        self.init_edits.submit(text.into(), now);
    }

    /// Submits replacement render script text. Propagation swaps the callable
    /// in place; the session state is untouched.
    pub fn set_render_script(&mut self, text: impl Into<String>, now: Instant) {
        self.render_edits.submit(text.into(), now);
    }

    /// Changes the vertex stride, scheduling a geometry re-upload.
    pub fn set_vertex_stride(&mut self, stride_in_floats: usize) {
        let stride = stride_in_floats.max(3);
        if stride != self.vertex_stride {
            self.vertex_stride = stride;
            self.stride_changed = true;
            self.needs_rebuild = true;
        }
    }

    /// Notifies the session that the drawing surface changed size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.surface_size {
            self.surface_size = (width, height);
            self.viewport_dirty = true;
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The latched GPU resource failure, if any.
    ///
    /// Resource creation failing implies a missing platform capability, so
    /// the first [`ResourceError`] is recorded here once and the session
    /// stops drawing and rebuilding. Scripts, diagnostics and the clock keep
    /// running; the host decides whether to tear the session down.
    pub fn fatal_error(&self) -> Option<&ResourceError> {
        self.fatal.as_ref()
    }

    pub fn vertex_diagnostics(&self) -> &[Diagnostic] {
        &self.vertex_markers
    }

    pub fn fragment_diagnostics(&self) -> &[Diagnostic] {
        &self.fragment_markers
    }

    /// The script state bag as of the most recent tick.
    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    /// Advances the session one frame.
    ///
    /// In order: release debounced edits and revalidate, rebuild if needed
    /// and permitted, refresh the viewport if the surface changed, then run
    /// the render script and draw. The elapsed-time base is set on the first
    /// tick and never reset afterwards, so shader animation stays continuous
    /// across edits and rebuilds.
    ///
    /// A latched resource failure (see [`fatal_error`](Self::fatal_error))
    /// suppresses rebuilds and draws while the scripts and the clock keep
    /// running.
    pub fn tick(&mut self, now: Instant) {
        let started_at = *self.started_at.get_or_insert(now);

        self.absorb_edits(now);

        if self.fatal.is_none()
            && self.needs_rebuild
            && self.vertex_markers.is_empty()
            && self.fragment_markers.is_empty()
        {
            self.rebuild();
        }

        if self.viewport_dirty {
            if let (Some(gpu), Some(program)) = (&self.gpu, &self.program) {
                gpu.refresh_viewport(program, self.surface_size);
            }
            self.viewport_dirty = false;
        }

        let elapsed = now.duration_since(started_at).as_secs_f64();
        let state = mem::take(&mut self.state);
        self.state = self.render_callable.invoke(state, elapsed);

        let commands = self.batch.drain();
        if self.fatal.is_some() {
            return;
        }
        if let (Some(gpu), Some(program), Some(geometry)) =
            (&self.gpu, &self.program, &self.geometry)
        {
            gpu.begin_frame();
            gpu.bind(program);
            for command in &commands {
                gpu.apply_uniform(program, command);
            }
            gpu.draw(program, geometry);
        }
    }

    /// Polls all four debouncers and folds released edits into the session.
    fn absorb_edits(&mut self, now: Instant) {
        if let Some(text) = self.vertex_edits.poll(now) {
            if self.vertex_source.set_body(text) {
                self.vertex_markers = validate(
                    Stage::Vertex,
                    &self.vertex_source.effective(),
                    header_line_count(),
                );
                if self.vertex_markers.is_empty() {
                    self.needs_rebuild = true;
                }
            }
        }
        if let Some(text) = self.fragment_edits.poll(now) {
            if self.fragment_source.set_body(text) {
                self.fragment_markers = validate(
                    Stage::Fragment,
                    &self.fragment_source.effective(),
                    header_line_count(),
                );
                if self.fragment_markers.is_empty() {
                    self.needs_rebuild = true;
                }
            }
        }
        if let Some(text) = self.init_edits.poll(now) {
            if text != self.init_text {
                self.init_text = text;
                self.needs_rebuild = true;
            }
        }
        if let Some(text) = self.render_edits.poll(now) {
            if text != self.render_text {
                self.render_text = text;
                // Hot swap: the running state is preserved across render
                // script edits; only a rebuild resets it.
                self.render_callable = RenderCallable::compile(&self.render_text, &self.batch);
            }
        }
    }

    /// Tears down and re-establishes the program, geometry and session state.
    ///
    /// Only reached when both shader stages validated cleanly, so a rebuild
    /// never demotes a working session to a broken one. GPU object creation
    /// failing is the exception: it latches as the session's fatal error and
    /// is never retried.
    fn rebuild(&mut self) {
        self.phase = Phase::Building;
        debug!(stride = self.vertex_stride, "rebuilding session");

        if let Some(gpu) = &self.gpu {
            let compiled = gpu.compile_program(
                &self.vertex_source.effective(),
                &self.fragment_source.effective(),
            );
            match compiled {
                Ok(program) => {
                    if let Some(old) = self.program.replace(program) {
                        gpu.retire_program(&old);
                    }
                }
                Err(err) => {
                    error!(%err, "program object creation failed; session stops drawing");
                    self.fatal = Some(err);
                    self.needs_rebuild = false;
                    return;
                }
            }

            if self.stride_changed || self.geometry.is_none() {
                match gpu.upload_quad(self.vertex_stride) {
                    Ok(geometry) => {
                        if let Some(old) = self.geometry.replace(geometry) {
                            gpu.retire_geometry(&old);
                        }
                    }
                    Err(err) => {
                        error!(%err, "geometry upload failed; session stops drawing");
                        self.fatal = Some(err);
                        self.needs_rebuild = false;
                        return;
                    }
                }
            }

            if let (Some(program), Some(geometry)) = (&self.program, &self.geometry) {
                gpu.bind_vertex_layout(program, geometry, self.surface_size);
            }
        }

        // Uniform commands recorded against the retired program are stale.
        self.batch.drain();

        let init = InitCallable::compile(&self.init_text, &self.batch);
        self.state = init.invoke();
        self.render_callable = RenderCallable::compile(&self.render_text, &self.batch);

        self.needs_rebuild = false;
        self.stride_changed = false;
        self.phase = Phase::Ready;
    }
}
