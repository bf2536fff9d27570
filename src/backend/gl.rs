// OpenGL driver - the GPU Interface over a glow context
//
// Thin, zero-cost forwarding: every verb maps to exactly one GL call (clear is
// two). Nothing here checks errors; callers wrap verbs with `checked`.
//
// Core profile contexts reject vertex attribute calls without a vertex array
// object, so one VAO is created at bind time and stays bound for the lifetime
// of the device. Attribute state is still enabled/disabled per frame.

use crate::backend::device::{
    AttribLayout, AttribLocation, BufferId, ElementType, ErrorCode, GpuError, GpuInterface,
    Primitive, ProgramId, ShaderId, ShaderKind,
};
use glow::HasContext;
use std::num::NonZeroU32;

pub struct GlowDevice {
    gl: glow::Context,
    vertex_array: glow::NativeVertexArray,
}

impl GlowDevice {
    /// Wrap a loaded context.
    ///
    /// # Safety
    /// The GL context `gl` was loaded from must be current on this thread for
    /// the whole lifetime of the device.
    pub unsafe fn new(gl: glow::Context) -> Result<Self, GpuError> {
        let vertex_array = gl
            .create_vertex_array()
            .map_err(|reason| GpuError::Allocation { object: "vertex array", reason })?;
        gl.bind_vertex_array(Some(vertex_array));

        log::info!("OpenGL version: {}", gl.get_parameter_string(glow::VERSION));
        log::info!("OpenGL renderer: {}", gl.get_parameter_string(glow::RENDERER));
        log::info!(
            "GLSL version: {}",
            gl.get_parameter_string(glow::SHADING_LANGUAGE_VERSION)
        );

        Ok(Self { gl, vertex_array })
    }
}

impl Drop for GlowDevice {
    fn drop(&mut self) {
        unsafe {
            self.gl.bind_vertex_array(None);
            self.gl.delete_vertex_array(self.vertex_array);
        }
    }
}

fn shader(id: ShaderId) -> glow::NativeShader {
    glow::NativeShader(id.0)
}

fn program(id: ProgramId) -> glow::NativeProgram {
    glow::NativeProgram(id.0)
}

fn buffer(id: BufferId) -> glow::NativeBuffer {
    glow::NativeBuffer(id.0)
}

fn primitive(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::Triangles => glow::TRIANGLES,
    }
}

fn element(element: ElementType) -> u32 {
    match element {
        ElementType::F32 => glow::FLOAT,
    }
}

impl GpuInterface for GlowDevice {
    fn create_shader(&mut self, kind: ShaderKind) -> Result<ShaderId, GpuError> {
        let stage = match kind {
            ShaderKind::Vertex => glow::VERTEX_SHADER,
            ShaderKind::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = unsafe { self.gl.create_shader(stage) }
            .map_err(|reason| GpuError::Allocation { object: "shader", reason })?;
        Ok(ShaderId(shader.0))
    }

    fn shader_source(&mut self, id: ShaderId, source: &str) {
        unsafe { self.gl.shader_source(shader(id), source) }
    }

    fn compile_shader(&mut self, id: ShaderId) {
        unsafe { self.gl.compile_shader(shader(id)) }
    }

    fn shader_compile_status(&self, id: ShaderId) -> bool {
        unsafe { self.gl.get_shader_compile_status(shader(id)) }
    }

    fn shader_info_log(&self, id: ShaderId) -> String {
        unsafe { self.gl.get_shader_info_log(shader(id)) }
    }

    fn delete_shader(&mut self, id: ShaderId) {
        unsafe { self.gl.delete_shader(shader(id)) }
    }

    fn create_program(&mut self) -> Result<ProgramId, GpuError> {
        let program = unsafe { self.gl.create_program() }
            .map_err(|reason| GpuError::Allocation { object: "program", reason })?;
        Ok(ProgramId(program.0))
    }

    fn attach_shader(&mut self, p: ProgramId, s: ShaderId) {
        unsafe { self.gl.attach_shader(program(p), shader(s)) }
    }

    fn detach_shader(&mut self, p: ProgramId, s: ShaderId) {
        unsafe { self.gl.detach_shader(program(p), shader(s)) }
    }

    fn link_program(&mut self, p: ProgramId) {
        unsafe { self.gl.link_program(program(p)) }
    }

    fn program_link_status(&self, p: ProgramId) -> bool {
        unsafe { self.gl.get_program_link_status(program(p)) }
    }

    fn program_info_log(&self, p: ProgramId) -> String {
        unsafe { self.gl.get_program_info_log(program(p)) }
    }

    fn attrib_location(&self, p: ProgramId, name: &str) -> Option<AttribLocation> {
        unsafe { self.gl.get_attrib_location(program(p), name) }.map(AttribLocation)
    }

    fn use_program(&mut self, p: Option<ProgramId>) {
        unsafe { self.gl.use_program(p.map(program)) }
    }

    fn delete_program(&mut self, p: ProgramId) {
        unsafe { self.gl.delete_program(program(p)) }
    }

    fn create_buffer(&mut self) -> Result<BufferId, GpuError> {
        let created = unsafe { self.gl.create_buffer() }
            .map_err(|reason| GpuError::Allocation { object: "buffer", reason })?;
        Ok(BufferId(created.0))
    }

    fn bind_array_buffer(&mut self, id: Option<BufferId>) {
        unsafe { self.gl.bind_buffer(glow::ARRAY_BUFFER, id.map(buffer)) }
    }

    fn array_buffer_data_static(&mut self, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(glow::ARRAY_BUFFER, data, glow::STATIC_DRAW)
        }
    }

    fn array_buffer_binding(&self) -> Option<BufferId> {
        let name = unsafe { self.gl.get_parameter_i32(glow::ARRAY_BUFFER_BINDING) };
        NonZeroU32::new(name as u32).map(BufferId)
    }

    fn delete_buffer(&mut self, id: BufferId) {
        unsafe { self.gl.delete_buffer(buffer(id)) }
    }

    fn enable_vertex_attrib(&mut self, location: AttribLocation) {
        unsafe { self.gl.enable_vertex_attrib_array(location.0) }
    }

    fn disable_vertex_attrib(&mut self, location: AttribLocation) {
        unsafe { self.gl.disable_vertex_attrib_array(location.0) }
    }

    fn vertex_attrib_layout(&mut self, location: AttribLocation, layout: &AttribLayout) {
        unsafe {
            self.gl.vertex_attrib_pointer_f32(
                location.0,
                layout.components,
                element(layout.element),
                layout.normalized,
                layout.stride,
                layout.offset,
            )
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn clear(&mut self, [r, g, b, a]: [f32; 4]) {
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(primitive(mode), first, count) }
    }

    fn last_error(&mut self) -> Option<ErrorCode> {
        let code = unsafe { self.gl.get_error() };
        (code != glow::NO_ERROR).then_some(ErrorCode(code))
    }
}
