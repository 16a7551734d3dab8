//! Thin, fallible wrappers over the GL object model.
//!
//! Everything here takes the explicit [`GpuContext`] handle; there is no
//! module-level singleton. Creation failures are [`ResourceError`]s and fatal
//! to the session. Compile/link *status* failures are not: the validator in
//! the diagnostics crate is the authoritative gate, so an invalid handle is
//! logged and tolerated; it simply renders nothing until the source is
//! fixed.

use glow::HasContext;
use tracing::{debug, warn};

use diagnostics::Stage;
use sandbox::{UniformCommand, UniformValue};

/// GPU resource creation failed; the only fatal error class in the
/// playground. No retry is attempted because it implies a missing platform
/// capability.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to create GL context: {0}")]
    ContextCreation(String),
    #[error("failed to create {kind}: {message}")]
    ObjectCreation {
        kind: &'static str,
        message: String,
    },
}

/// Linked GPU program together with the shader objects it was built from.
///
/// Valid only for the shader pair it was compiled from; the orchestrator
/// retires it whenever either stage's effective text changes.
pub struct CompiledProgram {
    pub(crate) program: glow::NativeProgram,
    vertex: glow::NativeShader,
    fragment: glow::NativeShader,
}

/// Vertex data bound to the program, with its layout bookkeeping.
pub struct GeometryBuffer {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
    stride_in_floats: usize,
    vertex_count: i32,
}

impl GeometryBuffer {
    pub fn stride_in_floats(&self) -> usize {
        self.stride_in_floats
    }

    pub fn vertex_count(&self) -> i32 {
        self.vertex_count
    }
}

/// Full-screen quad as a triangle strip, `stride` floats per vertex.
///
/// The position attribute consumes the first three floats; any extra floats
/// in the stride are zero-padded and free for user attribute experiments.
pub fn quad_vertices(stride: usize) -> Vec<f32> {
    let corners: [[f32; 3]; 4] = [
        [-1.0, 1.0, 0.0],
        [-1.0, -1.0, 0.0],
        [1.0, 1.0, 0.0],
        [1.0, -1.0, 0.0],
    ];
    let mut data = Vec::with_capacity(4 * stride);
    for corner in corners {
        data.extend_from_slice(&corner);
        data.extend(std::iter::repeat(0.0).take(stride.saturating_sub(3)));
    }
    data
}

/// Single owner of the shared GL state.
pub struct GpuContext {
    gl: glow::Context,
}

impl GpuContext {
    /// Wraps a host-provided GL context, rejecting versions too old to hold
    /// the pipeline state the playground assumes.
    pub fn new(gl: glow::Context) -> Result<Self, ResourceError> {
        let major = unsafe { gl.get_parameter_i32(glow::MAJOR_VERSION) };
        if major < 3 {
            return Err(ResourceError::ContextCreation(format!(
                "OpenGL {major}.x reported; 3.x or newer is required"
            )));
        }
        debug!(major, "GL context adopted");
        Ok(Self { gl })
    }

    /// Compiles both stages and links them into a fresh program.
    ///
    /// Only object creation can fail. A stage the driver rejects is logged
    /// and carried through: the diagnostics validator has already told the
    /// editor what is wrong, and the orchestrator will not promote a stage
    /// with markers anyway.
    pub fn compile_program(
        &self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<CompiledProgram, ResourceError> {
        let vertex = self.compile_shader_stage(vertex_source, Stage::Vertex)?;
        let fragment = self.compile_shader_stage(fragment_source, Stage::Fragment)?;

        let program = unsafe { self.gl.create_program() }.map_err(|message| {
            ResourceError::ObjectCreation {
                kind: "program",
                message,
            }
        })?;
        unsafe {
            self.gl.attach_shader(program, vertex);
            self.gl.attach_shader(program, fragment);
            self.gl.link_program(program);
            if !self.gl.get_program_link_status(program) {
                warn!(
                    log = %self.gl.get_program_info_log(program),
                    "driver rejected program link"
                );
            }
            self.gl.use_program(Some(program));
        }
        Ok(CompiledProgram {
            program,
            vertex,
            fragment,
        })
    }

    fn compile_shader_stage(
        &self,
        source: &str,
        stage: Stage,
    ) -> Result<glow::NativeShader, ResourceError> {
        let shader = unsafe { self.gl.create_shader(stage_to_gl(stage)) }.map_err(|message| {
            ResourceError::ObjectCreation {
                kind: "shader",
                message,
            }
        })?;
        unsafe {
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                warn!(
                    %stage,
                    log = %self.gl.get_shader_info_log(shader),
                    "driver rejected shader"
                );
            }
        }
        Ok(shader)
    }

    /// Deletes a retired program's GPU handles. Must happen before the next
    /// tick can bind them.
    pub fn retire_program(&self, compiled: &CompiledProgram) {
        unsafe {
            self.gl.delete_program(compiled.program);
            self.gl.delete_shader(compiled.vertex);
            self.gl.delete_shader(compiled.fragment);
        }
    }

    /// Creates a buffer object and uploads `data` to it.
    pub fn create_and_upload_buffer(
        &self,
        target: u32,
        usage: u32,
        data: &[f32],
    ) -> Result<glow::NativeBuffer, ResourceError> {
        let buffer = unsafe { self.gl.create_buffer() }.map_err(|message| {
            ResourceError::ObjectCreation {
                kind: "buffer",
                message,
            }
        })?;
        unsafe {
            self.gl.bind_buffer(target, Some(buffer));
            self.gl
                .buffer_data_u8_slice(target, bytemuck::cast_slice(data), usage);
        }
        Ok(buffer)
    }

    /// Uploads the full-screen quad at the requested vertex stride.
    pub fn upload_quad(&self, stride_in_floats: usize) -> Result<GeometryBuffer, ResourceError> {
        let stride = stride_in_floats.max(3);
        let data = quad_vertices(stride);
        let vao = unsafe { self.gl.create_vertex_array() }.map_err(|message| {
            ResourceError::ObjectCreation {
                kind: "vertex array",
                message,
            }
        })?;
        unsafe {
            self.gl.bind_vertex_array(Some(vao));
        }
        let vbo = self.create_and_upload_buffer(glow::ARRAY_BUFFER, glow::STATIC_DRAW, &data)?;
        Ok(GeometryBuffer {
            vao,
            vbo,
            stride_in_floats: stride,
            vertex_count: (data.len() / stride) as i32,
        })
    }

    pub fn retire_geometry(&self, geometry: &GeometryBuffer) {
        unsafe {
            self.gl.delete_buffer(geometry.vbo);
            self.gl.delete_vertex_array(geometry.vao);
        }
    }

    /// Wires the program to the geometry and establishes the fixed pipeline
    /// state for this episode.
    ///
    /// Resolves the `aPos` attribute by name, sets up stride/offset, enables
    /// farthest-wins depth testing with an inverted clear depth, configures
    /// premultiplied blending, and uploads the aspect projection. All of this
    /// happens once per rebuild, not per frame.
    pub fn bind_vertex_layout(
        &self,
        program: &CompiledProgram,
        geometry: &GeometryBuffer,
        surface: (u32, u32),
    ) {
        self.refresh_viewport(program, surface);
        unsafe {
            self.gl.enable(glow::DEPTH_TEST);
            self.gl.depth_func(glow::LEQUAL);
            self.gl.clear_depth_f32(-1.0);
            self.gl.enable(glow::BLEND);
            self.gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);

            self.gl.bind_vertex_array(Some(geometry.vao));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(geometry.vbo));
            match self.gl.get_attrib_location(program.program, "aPos") {
                Some(location) => {
                    self.gl.enable_vertex_attrib_array(location);
                    let stride_bytes =
                        (geometry.stride_in_floats * std::mem::size_of::<f32>()) as i32;
                    self.gl.vertex_attrib_pointer_f32(
                        location,
                        3,
                        glow::FLOAT,
                        false,
                        stride_bytes,
                        0,
                    );
                }
                None => warn!("program has no aPos attribute; nothing will draw"),
            }
        }
    }

    /// Re-derives the viewport and aspect projection for the surface size.
    pub fn refresh_viewport(&self, program: &CompiledProgram, surface: (u32, u32)) {
        let (width, height) = surface;
        unsafe {
            self.gl.use_program(Some(program.program));
            self.gl.viewport(0, 0, width as i32, height as i32);
        }
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let field_of_view = std::f32::consts::PI * (40.0 / 180.0);
        let projection = transform::perspective(field_of_view, aspect, 0.0, 2000.0);
        self.apply_uniform(
            program,
            &UniformCommand {
                name: "uAspect".to_string(),
                value: UniformValue::Mat4 {
                    transpose: false,
                    values: projection.to_vec(),
                },
            },
        );
    }

    /// Makes `program` the active one for subsequent uniform uploads.
    pub fn bind(&self, program: &CompiledProgram) {
        unsafe {
            self.gl.use_program(Some(program.program));
        }
    }

    /// Uploads one type-tagged uniform value.
    ///
    /// The location is resolved against the given program on every call,
    /// never cached across rebuilds. Unresolved names are silently ignored;
    /// unused uniforms are common while iterating on a shader.
    pub fn apply_uniform(&self, program: &CompiledProgram, command: &UniformCommand) {
        let location = unsafe { self.gl.get_uniform_location(program.program, &command.name) };
        let Some(location) = location else {
            return;
        };
        unsafe {
            match &command.value {
                UniformValue::Float(v) => self.gl.uniform_1_f32(Some(&location), *v),
                UniformValue::Vec2([x, y]) => self.gl.uniform_2_f32(Some(&location), *x, *y),
                UniformValue::Vec3([x, y, z]) => self.gl.uniform_3_f32(Some(&location), *x, *y, *z),
                UniformValue::Vec4([x, y, z, w]) => {
                    self.gl.uniform_4_f32(Some(&location), *x, *y, *z, *w)
                }
                UniformValue::Int(v) => self.gl.uniform_1_i32(Some(&location), *v),
                UniformValue::FloatArray { components, values } => match components {
                    1 => self.gl.uniform_1_f32_slice(Some(&location), values),
                    2 => self.gl.uniform_2_f32_slice(Some(&location), values),
                    3 => self.gl.uniform_3_f32_slice(Some(&location), values),
                    4 => self.gl.uniform_4_f32_slice(Some(&location), values),
                    other => {
                        warn!(components = other, name = %command.name, "bad component count")
                    }
                },
                UniformValue::Mat4 { transpose, values } => {
                    self.gl
                        .uniform_matrix_4_f32_slice(Some(&location), *transpose, values)
                }
            }
        }
    }

    /// Clears color and depth ahead of the episode's draw.
    pub fn begin_frame(&self) {
        unsafe {
            self.gl.clear_color(0.0, 0.0, 0.0, 1.0);
            self.gl
                .clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    /// Issues the triangle-strip draw for the current geometry.
    pub fn draw(&self, program: &CompiledProgram, geometry: &GeometryBuffer) {
        unsafe {
            self.gl.use_program(Some(program.program));
            self.gl.bind_vertex_array(Some(geometry.vao));
            self.gl
                .draw_arrays(glow::TRIANGLE_STRIP, 0, geometry.vertex_count);
        }
    }
}

fn stage_to_gl(stage: Stage) -> u32 {
    match stage {
        Stage::Vertex => glow::VERTEX_SHADER,
        Stage::Fragment => glow::FRAGMENT_SHADER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_covers_clip_space_at_minimum_stride() {
        let data = quad_vertices(3);
        assert_eq!(data.len(), 12);
        assert_eq!(&data[0..3], &[-1.0, 1.0, 0.0]);
        assert_eq!(&data[9..12], &[1.0, -1.0, 0.0]);
    }

    #[test]
    fn wider_strides_zero_pad_each_vertex() {
        let data = quad_vertices(5);
        assert_eq!(data.len(), 20);
        // Padding floats sit directly after each position triple.
        assert_eq!(data[3], 0.0);
        assert_eq!(data[4], 0.0);
        assert_eq!(&data[5..8], &[-1.0, -1.0, 0.0]);
    }

    #[test]
    fn undersized_strides_are_clamped_to_positions() {
        let data = quad_vertices(1);
        assert_eq!(data.len(), 12);
    }

    #[test]
    fn resource_errors_name_the_failing_object() {
        let error = ResourceError::ObjectCreation {
            kind: "buffer",
            message: "out of handles".into(),
        };
        assert_eq!(error.to_string(), "failed to create buffer: out of handles");
    }
}
