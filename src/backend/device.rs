// GPU Interface - the fixed verb set every component talks to
//
// Design: one explicit device value passed by `&mut` into every constructor,
// no ambient "current context" anywhere in the crate.
// Errors: verbs never log on their own. Wrap a verb with `checked` to turn the
// driver's sticky error flag into a `Result`.

use std::fmt;
use std::num::NonZeroU32;
use thiserror::Error;

/// Opaque shader object handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub NonZeroU32);

/// Opaque program object handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub NonZeroU32);

/// Opaque buffer object handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub NonZeroU32);

/// Vertex attribute slot, resolved from a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttribLocation(pub u32);

impl fmt::Display for AttribLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderKind::Vertex => f.write_str("vertex"),
            ShaderKind::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
}

/// Element type of a vertex attribute component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::F32 => std::mem::size_of::<f32>(),
        }
    }
}

/// How one attribute is laid out inside the bound array buffer.
///
/// `stride == 0` means tightly packed, like the driver convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttribLayout {
    pub components: i32,
    pub element: ElementType,
    pub normalized: bool,
    pub stride: i32,
    pub offset: i32,
}

impl AttribLayout {
    /// Tightly packed float components starting at the beginning of the buffer
    pub fn packed_f32(components: i32) -> Self {
        Self {
            components,
            element: ElementType::F32,
            normalized: false,
            stride: 0,
            offset: 0,
        }
    }

    /// Distance in bytes between consecutive vertices
    pub fn effective_stride(&self) -> usize {
        if self.stride == 0 {
            self.components.max(0) as usize * self.element.size()
        } else {
            self.stride as usize
        }
    }
}

/// Numeric driver error code, as reported by the error flag query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const INVALID_ENUM: ErrorCode = ErrorCode(0x0500);
    pub const INVALID_VALUE: ErrorCode = ErrorCode(0x0501);
    pub const INVALID_OPERATION: ErrorCode = ErrorCode(0x0502);
    pub const OUT_OF_MEMORY: ErrorCode = ErrorCode(0x0505);
    pub const INVALID_FRAMEBUFFER_OPERATION: ErrorCode = ErrorCode(0x0506);

    pub fn name(self) -> &'static str {
        match self {
            Self::INVALID_ENUM => "INVALID_ENUM",
            Self::INVALID_VALUE => "INVALID_VALUE",
            Self::INVALID_OPERATION => "INVALID_OPERATION",
            Self::OUT_OF_MEMORY => "OUT_OF_MEMORY",
            Self::INVALID_FRAMEBUFFER_OPERATION => "INVALID_FRAMEBUFFER_OPERATION",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#06x})", self.name(), self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("failed to create {object}: {reason}")]
    Allocation { object: &'static str, reason: String },

    #[error("driver error during {operation}: {code}")]
    Driver {
        operation: &'static str,
        code: ErrorCode,
    },
}

/// The GPU verbs the renderer depends on.
///
/// Verbs mirror the driver: most of them cannot fail directly and instead
/// raise the sticky error flag read by `last_error`.
pub trait GpuInterface {
    // Shader stages
    fn create_shader(&mut self, kind: ShaderKind) -> Result<ShaderId, GpuError>;
    fn shader_source(&mut self, shader: ShaderId, source: &str);
    fn compile_shader(&mut self, shader: ShaderId);
    fn shader_compile_status(&self, shader: ShaderId) -> bool;
    fn shader_info_log(&self, shader: ShaderId) -> String;
    fn delete_shader(&mut self, shader: ShaderId);

    // Programs
    fn create_program(&mut self) -> Result<ProgramId, GpuError>;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn link_program(&mut self, program: ProgramId);
    fn program_link_status(&self, program: ProgramId) -> bool;
    fn program_info_log(&self, program: ProgramId) -> String;
    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<AttribLocation>;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn delete_program(&mut self, program: ProgramId);

    // Buffers
    fn create_buffer(&mut self) -> Result<BufferId, GpuError>;
    fn bind_array_buffer(&mut self, buffer: Option<BufferId>);
    fn array_buffer_data_static(&mut self, data: &[u8]);
    fn array_buffer_binding(&self) -> Option<BufferId>;
    fn delete_buffer(&mut self, buffer: BufferId);

    // Vertex attributes
    fn enable_vertex_attrib(&mut self, location: AttribLocation);
    fn disable_vertex_attrib(&mut self, location: AttribLocation);
    fn vertex_attrib_layout(&mut self, location: AttribLocation, layout: &AttribLayout);

    // Drawing
    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&mut self, color: [f32; 4]);
    fn draw_arrays(&mut self, primitive: Primitive, first: i32, count: i32);

    /// Read and reset the driver error flag
    fn last_error(&mut self) -> Option<ErrorCode>;
}

/// Run one verb and check the driver error flag right after it.
///
/// Drivers may queue several flags; the first one is returned, the rest are
/// drained so they cannot be blamed on the next operation.
pub fn checked<G, T>(
    gpu: &mut G,
    operation: &'static str,
    verb: impl FnOnce(&mut G) -> T,
) -> Result<T, GpuError>
where
    G: GpuInterface + ?Sized,
{
    let value = verb(gpu);

    let Some(code) = gpu.last_error() else {
        return Ok(value);
    };

    while let Some(extra) = gpu.last_error() {
        log::debug!("Additional driver error during {}: {}", operation, extra);
    }

    Err(GpuError::Driver { operation, code })
}
