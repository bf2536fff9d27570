// Software driver - headless implementation of the GPU Interface
//
// Tracks driver state the way a desktop driver does (object tables, current
// program, array buffer binding, per-slot attribute state, sticky error flag)
// and rasterizes triangle draws into a CPU framebuffer. Misuse raises the same
// error codes a real driver would instead of panicking.

mod exec;
pub mod glsl;
pub mod raster;

use crate::backend::device::{
    AttribLayout, AttribLocation, BufferId, ErrorCode, GpuError, GpuInterface, Primitive,
    ProgramId, ShaderId, ShaderKind,
};
use exec::Value;
use glam::Vec4;
use glsl::{Input, OutputSlot, Stage, MAX_VERTEX_ATTRIBS};
use naga::{Binding, BuiltIn};
use raster::{Framebuffer, Viewport};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::rc::Rc;

// =============================================================================
// OBJECTS
// =============================================================================

struct ShaderObject {
    kind: ShaderKind,
    source: String,
    compiled: Option<Rc<Stage>>,
    log: String,
    /// Deleted while attached; freed once no program references it
    delete_pending: bool,
}

struct ProgramObject {
    attached: Vec<ShaderId>,
    linked: Option<LinkedProgram>,
    log: String,
}

/// Executable state captured at link time
#[derive(Debug, Clone)]
struct LinkedProgram {
    vertex: Rc<Stage>,
    /// Vertex entry point arguments, in order
    inputs: Vec<VertexInput>,
    attributes: Vec<(String, AttribLocation)>,
    position: OutputSlot,
    /// The fragment stage runs once at link time; its inputs are rejected
    color: Vec4,
}

#[derive(Debug, Clone, Copy)]
enum VertexInput {
    Attribute {
        location: AttribLocation,
        components: usize,
    },
    VertexIndex,
    InstanceIndex,
}

struct BufferObject {
    data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct VertexAttrib {
    enabled: bool,
    pointer: Option<AttribPointer>,
}

#[derive(Debug, Clone, Copy)]
struct AttribPointer {
    buffer: BufferId,
    layout: AttribLayout,
}

/// The most recent draw the device executed
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub primitive: Primitive,
    pub count: i32,
    /// Fragment stage output for every covered pixel
    pub color: Vec4,
    /// Clip-space positions produced by the vertex stage
    pub positions: Vec<Vec4>,
}

/// Live object counts, for leak checks
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectCounts {
    pub shaders: usize,
    pub programs: usize,
    pub buffers: usize,
}

// =============================================================================
// DEVICE
// =============================================================================

pub struct SoftwareDevice {
    next_name: u32,
    shaders: HashMap<ShaderId, ShaderObject>,
    programs: HashMap<ProgramId, ProgramObject>,
    buffers: HashMap<BufferId, BufferObject>,
    current_program: Option<ProgramId>,
    array_buffer: Option<BufferId>,
    attribs: [VertexAttrib; MAX_VERTEX_ATTRIBS as usize],
    viewport: Viewport,
    framebuffer: Framebuffer,
    error: Option<ErrorCode>,
    #[cfg(test)]
    draw_count: usize,
    #[cfg(test)]
    last_draw: Option<DrawCall>,
}

impl SoftwareDevice {
    /// Create a device rendering into a `width` x `height` framebuffer.
    /// The viewport starts out covering the whole framebuffer.
    pub fn new(width: u32, height: u32) -> Self {
        log::debug!("Creating software device: {}x{}", width, height);
        Self {
            next_name: 0,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            current_program: None,
            array_buffer: None,
            attribs: [VertexAttrib::default(); MAX_VERTEX_ATTRIBS as usize],
            viewport: Viewport {
                x: 0,
                y: 0,
                width: width as i32,
                height: height as i32,
            },
            framebuffer: Framebuffer::new(width, height),
            error: None,
            #[cfg(test)]
            draw_count: 0,
            #[cfg(test)]
            last_draw: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an error; like the driver, the first unread flag wins
    fn raise(&mut self, code: ErrorCode) {
        log::trace!("Software device raised {}", code);
        self.error.get_or_insert(code);
    }

    fn allocate_name(&mut self) -> NonZeroU32 {
        self.next_name += 1;
        NonZeroU32::new(self.next_name).unwrap_or(NonZeroU32::MIN)
    }

    fn valid_slot(&mut self, location: AttribLocation) -> Option<usize> {
        if location.0 < MAX_VERTEX_ATTRIBS {
            Some(location.0 as usize)
        } else {
            self.raise(ErrorCode::INVALID_VALUE);
            None
        }
    }

    /// Drop shaders that were deleted while attached and are now unreferenced
    fn collect_shaders(&mut self) {
        let programs = &self.programs;
        self.shaders.retain(|id, shader| {
            !shader.delete_pending || programs.values().any(|p| p.attached.contains(id))
        });
    }

    fn link(&self, program: &ProgramObject) -> Result<LinkedProgram, String> {
        let mut vertex = None;
        let mut fragment = None;

        for id in &program.attached {
            let Some(shader) = self.shaders.get(id) else { continue };
            let Some(stage) = shader.compiled.as_ref() else {
                return Err(format!("ERROR: Linking with uncompiled {} shader\n", shader.kind));
            };
            let slot = match shader.kind {
                ShaderKind::Vertex => &mut vertex,
                ShaderKind::Fragment => &mut fragment,
            };
            if slot.replace(stage).is_some() {
                return Err(format!("ERROR: Multiple {} shaders attached\n", shader.kind));
            }
        }

        let vertex = vertex.ok_or("ERROR: Linking requires a vertex shader\n")?;
        let fragment = fragment.ok_or("ERROR: Linking requires a fragment shader\n")?;

        let written = vertex.output_locations();
        if let Some(input) = fragment.inputs().into_iter().next() {
            let name = match input {
                Input::Location { name, location, .. } if !written.contains(&location) => {
                    return Err(format!(
                        "ERROR: Input of fragment shader '{}' not written by vertex shader\n",
                        name
                    ));
                }
                Input::Location { name, .. } => name,
                Input::BuiltIn(builtin) => format!("{:?}", builtin),
            };
            return Err(format!(
                "ERROR: Fragment input '{}' is not supported by the software driver\n",
                name
            ));
        }

        let (inputs, attributes) = vertex_inputs(vertex)?;
        let position = vertex
            .output(|b| matches!(b, Binding::BuiltIn(BuiltIn::Position { .. })))
            .ok_or("ERROR: Vertex shader does not write gl_Position\n")?;
        let color = fragment_color(fragment)?;

        Ok(LinkedProgram {
            vertex: Rc::clone(vertex),
            inputs,
            attributes,
            position,
            color,
        })
    }

    /// Fetch the attribute at `location` for vertex `index`
    fn fetch(&mut self, location: AttribLocation, index: usize) -> Option<Vec4> {
        let slot = self.attribs[location.0 as usize];
        let mut value = [0.0, 0.0, 0.0, 1.0];

        if !slot.enabled {
            return Some(Vec4::from_array(value));
        }

        let Some(pointer) = slot.pointer else {
            self.raise(ErrorCode::INVALID_OPERATION);
            return None;
        };
        let Some(data) = self.buffers.get(&pointer.buffer).and_then(|b| b.data.as_deref()) else {
            self.raise(ErrorCode::INVALID_OPERATION);
            return None;
        };

        let layout = pointer.layout;
        let element = layout.element.size();
        let start = layout.offset as usize + index * layout.effective_stride();
        let end = start + layout.components as usize * element;
        let Some(bytes) = data.get(start..end) else {
            log::trace!("Vertex {} reads past the end of buffer {:?}", index, pointer.buffer);
            self.raise(ErrorCode::INVALID_OPERATION);
            return None;
        };

        for (component, chunk) in bytes.chunks_exact(element).enumerate() {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(chunk);
            value[component] = f32::from_ne_bytes(raw);
        }

        Some(Vec4::from_array(value))
    }

    /// Run the vertex stage for vertex `index`.
    /// `None` when the driver error flag was raised.
    fn shade_vertex(&mut self, linked: &LinkedProgram, index: usize) -> Option<Vec4> {
        let mut arguments = Vec::with_capacity(linked.inputs.len());
        for input in &linked.inputs {
            arguments.push(match *input {
                VertexInput::Attribute {
                    location,
                    components,
                } => {
                    let value = self.fetch(location, index)?.to_array();
                    Value::from_components(&value[..components.min(4)])
                }
                VertexInput::VertexIndex => Value::Scalar(index as f32),
                VertexInput::InstanceIndex => Value::Scalar(0.0),
            });
        }

        let vertex = &linked.vertex;
        let clip = exec::run_entry_point(&vertex.module, vertex.entry, arguments)
            .and_then(|result| {
                result
                    .and_then(|value| linked.position.read(value))
                    .and_then(|value| value.to_vec4())
                    .ok_or_else(|| "no clip-space position written".to_string())
            });

        match clip {
            Ok(clip) => Some(clip),
            Err(e) => {
                log::debug!("Vertex stage failed on vertex {}: {}", index, e);
                self.raise(ErrorCode::INVALID_OPERATION);
                None
            }
        }
    }
}

/// Attribute arguments by location, plus the built-ins the driver can supply
fn vertex_inputs(
    vertex: &Stage,
) -> Result<(Vec<VertexInput>, Vec<(String, AttribLocation)>), String> {
    let mut taken = [false; MAX_VERTEX_ATTRIBS as usize];
    let mut inputs = Vec::new();
    let mut attributes = Vec::new();

    for input in vertex.inputs() {
        match input {
            Input::Location {
                name,
                location,
                components,
            } => {
                if location >= MAX_VERTEX_ATTRIBS {
                    return Err(format!(
                        "ERROR: Attribute '{}' location {} exceeds the maximum of {}\n",
                        name,
                        location,
                        MAX_VERTEX_ATTRIBS - 1
                    ));
                }
                if std::mem::replace(&mut taken[location as usize], true) {
                    return Err(format!(
                        "ERROR: Attribute '{}' shares location {} with another attribute\n",
                        name, location
                    ));
                }
                let components = components.ok_or_else(|| {
                    format!("ERROR: Attribute '{}' must be a scalar or vector\n", name)
                })?;
                inputs.push(VertexInput::Attribute {
                    location: AttribLocation(location),
                    components,
                });
                attributes.push((name, AttribLocation(location)));
            }
            Input::BuiltIn(BuiltIn::VertexIndex) => inputs.push(VertexInput::VertexIndex),
            Input::BuiltIn(BuiltIn::InstanceIndex) => inputs.push(VertexInput::InstanceIndex),
            Input::BuiltIn(other) => {
                return Err(format!("ERROR: Vertex input {:?} is not supported\n", other));
            }
        }
    }

    Ok((inputs, attributes))
}

/// Color the fragment stage writes to location 0. Fragments take no inputs
/// on this driver, so one invocation at link time covers every pixel.
fn fragment_color(fragment: &Stage) -> Result<Vec4, String> {
    let slot = fragment
        .output(|b| matches!(b, Binding::Location { location: 0, .. }))
        .ok_or("ERROR: Fragment shader does not write a color output\n")?;

    let result = exec::run_entry_point(&fragment.module, fragment.entry, Vec::new())
        .map_err(|e| format!("ERROR: Fragment shader failed: {}\n", e))?;

    result
        .and_then(|value| slot.read(value))
        .and_then(|value| value.to_vec4())
        .ok_or_else(|| "ERROR: Fragment color output must be a vec4\n".to_string())
}

impl GpuInterface for SoftwareDevice {
    fn create_shader(&mut self, kind: ShaderKind) -> Result<ShaderId, GpuError> {
        let id = ShaderId(self.allocate_name());
        self.shaders.insert(
            id,
            ShaderObject {
                kind,
                source: String::new(),
                compiled: None,
                log: String::new(),
                delete_pending: false,
            },
        );
        Ok(id)
    }

    fn shader_source(&mut self, shader: ShaderId, source: &str) {
        match self.shaders.get_mut(&shader) {
            Some(object) => object.source = source.to_owned(),
            None => self.raise(ErrorCode::INVALID_VALUE),
        }
    }

    fn compile_shader(&mut self, shader: ShaderId) {
        let Some(object) = self.shaders.get_mut(&shader) else {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        };

        match glsl::compile(object.kind, &object.source) {
            Ok(stage) => {
                object.compiled = Some(Rc::new(stage));
                object.log.clear();
            }
            Err(log) => {
                object.compiled = None;
                object.log = log;
            }
        }
    }

    fn shader_compile_status(&self, shader: ShaderId) -> bool {
        self.shaders
            .get(&shader)
            .is_some_and(|s| s.compiled.is_some())
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        self.shaders
            .get(&shader)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        let attached = self.programs.values().any(|p| p.attached.contains(&shader));
        match self.shaders.get_mut(&shader) {
            Some(object) if attached => object.delete_pending = true,
            Some(_) => {
                self.shaders.remove(&shader);
            }
            None => self.raise(ErrorCode::INVALID_VALUE),
        }
    }

    fn create_program(&mut self) -> Result<ProgramId, GpuError> {
        let id = ProgramId(self.allocate_name());
        self.programs.insert(
            id,
            ProgramObject {
                attached: Vec::new(),
                linked: None,
                log: String::new(),
            },
        );
        Ok(id)
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if !self.shaders.contains_key(&shader) {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        }
        let Some(object) = self.programs.get_mut(&program) else {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        };
        if object.attached.contains(&shader) {
            self.raise(ErrorCode::INVALID_OPERATION);
            return;
        }
        object.attached.push(shader);
    }

    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        let Some(object) = self.programs.get_mut(&program) else {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        };
        let before = object.attached.len();
        object.attached.retain(|s| *s != shader);
        if object.attached.len() == before {
            self.raise(ErrorCode::INVALID_OPERATION);
            return;
        }
        self.collect_shaders();
    }

    fn link_program(&mut self, program: ProgramId) {
        let Some(object) = self.programs.get(&program) else {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        };

        let outcome = self.link(object);
        let Some(object) = self.programs.get_mut(&program) else { return };
        match outcome {
            Ok(linked) => {
                object.linked = Some(linked);
                object.log.clear();
            }
            Err(log) => {
                object.linked = None;
                object.log = log;
            }
        }
    }

    fn program_link_status(&self, program: ProgramId) -> bool {
        self.programs
            .get(&program)
            .is_some_and(|p| p.linked.is_some())
    }

    fn program_info_log(&self, program: ProgramId) -> String {
        self.programs
            .get(&program)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation> {
        self.programs
            .get(&program)?
            .linked
            .as_ref()?
            .attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, location)| *location)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        match program {
            None => self.current_program = None,
            Some(id) => match self.programs.get(&id) {
                None => self.raise(ErrorCode::INVALID_VALUE),
                Some(object) if object.linked.is_none() => self.raise(ErrorCode::INVALID_OPERATION),
                Some(_) => self.current_program = Some(id),
            },
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.collect_shaders();
    }

    fn create_buffer(&mut self) -> Result<BufferId, GpuError> {
        let id = BufferId(self.allocate_name());
        self.buffers.insert(id, BufferObject { data: None });
        Ok(id)
    }

    fn bind_array_buffer(&mut self, buffer: Option<BufferId>) {
        match buffer {
            Some(id) if !self.buffers.contains_key(&id) => self.raise(ErrorCode::INVALID_OPERATION),
            _ => self.array_buffer = buffer,
        }
    }

    fn array_buffer_data_static(&mut self, data: &[u8]) {
        let Some(bound) = self.array_buffer else {
            self.raise(ErrorCode::INVALID_OPERATION);
            return;
        };
        if let Some(object) = self.buffers.get_mut(&bound) {
            object.data = Some(data.to_vec());
        }
    }

    fn array_buffer_binding(&self) -> Option<BufferId> {
        self.array_buffer
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        // Unknown names are silently ignored, as on the driver
        if self.buffers.remove(&buffer).is_none() {
            return;
        }
        if self.array_buffer == Some(buffer) {
            self.array_buffer = None;
        }
        for attrib in &mut self.attribs {
            if attrib.pointer.is_some_and(|p| p.buffer == buffer) {
                attrib.pointer = None;
            }
        }
    }

    fn enable_vertex_attrib(&mut self, location: AttribLocation) {
        if let Some(slot) = self.valid_slot(location) {
            self.attribs[slot].enabled = true;
        }
    }

    fn disable_vertex_attrib(&mut self, location: AttribLocation) {
        if let Some(slot) = self.valid_slot(location) {
            self.attribs[slot].enabled = false;
        }
    }

    fn vertex_attrib_layout(&mut self, location: AttribLocation, layout: &AttribLayout) {
        let Some(slot) = self.valid_slot(location) else { return };
        if !(1..=4).contains(&layout.components) || layout.stride < 0 || layout.offset < 0 {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        }
        let Some(buffer) = self.array_buffer else {
            self.raise(ErrorCode::INVALID_OPERATION);
            return;
        };
        self.attribs[slot].pointer = Some(AttribPointer { buffer, layout: *layout });
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        if width < 0 || height < 0 {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        }
        self.viewport = Viewport { x, y, width, height };
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.framebuffer.clear(Vec4::from_array(color).clamp(Vec4::ZERO, Vec4::ONE));
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: i32, count: i32) {
        if first < 0 || count < 0 {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        }
        let Some(end) = first.checked_add(count) else {
            self.raise(ErrorCode::INVALID_VALUE);
            return;
        };
        let Some(program) = self.current_program else {
            self.raise(ErrorCode::INVALID_OPERATION);
            return;
        };
        let Some(linked) = self.programs.get(&program).and_then(|p| p.linked.clone()) else {
            self.raise(ErrorCode::INVALID_OPERATION);
            return;
        };

        // Vertex stage
        let mut positions = Vec::new();
        for index in first as usize..end as usize {
            let Some(clip) = self.shade_vertex(&linked, index) else { return };
            positions.push(clip);
        }

        // Primitive assembly + rasterization
        let triangles: Vec<[Vec4; 3]> = match primitive {
            Primitive::Triangles => positions
                .chunks_exact(3)
                .map(|t| [t[0], t[1], t[2]])
                .collect(),
        };

        let viewport = self.viewport;
        let pixels: usize = triangles
            .into_iter()
            .map(|triangle| self.framebuffer.fill_triangle(&viewport, triangle, linked.color))
            .sum();
        log::trace!("Drew {} vertices, {} pixels", count, pixels);

        #[cfg(test)]
        {
            self.draw_count += 1;
            self.last_draw = Some(DrawCall {
                primitive,
                count,
                color: linked.color,
                positions,
            });
        }
    }

    fn last_error(&mut self) -> Option<ErrorCode> {
        self.error.take()
    }
}

#[cfg(test)]
impl SoftwareDevice {
    pub fn current_viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    pub fn enabled_attributes(&self) -> Vec<AttribLocation> {
        self.attribs
            .iter()
            .enumerate()
            .filter(|(_, a)| a.enabled)
            .map(|(slot, _)| AttribLocation(slot as u32))
            .collect()
    }

    /// Draws executed so far
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn last_draw(&self) -> Option<&DrawCall> {
        self.last_draw.as_ref()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer)?.data.as_deref()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Vec4> {
        self.framebuffer.pixel(x, y)
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer.size()
    }

    pub fn live_objects(&self) -> ObjectCounts {
        ObjectCounts {
            shaders: self.shaders.len(),
            programs: self.programs.len(),
            buffers: self.buffers.len(),
        }
    }
}
