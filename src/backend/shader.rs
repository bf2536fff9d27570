// Shader program builder
//
// Build protocol: compile both stages, check both statuses, link, check link
// status, release the stages. Every status is queried explicitly; a `Program`
// value only exists once the driver confirmed the link.

use crate::backend::device::{
    checked, AttribLocation, GpuError, GpuInterface, ProgramId, ShaderId, ShaderKind,
};
use std::collections::HashMap;
use thiserror::Error;

/// Vertex stage of the triangle pipeline
pub const TRIANGLE_VERT: &str = include_str!("../shaders/triangle.vert");

/// Fragment stage of the triangle pipeline
pub const TRIANGLE_FRAG: &str = include_str!("../shaders/triangle.frag");

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error(
        "shader compilation failed{}{}",
        stage_log("vertex", .vertex),
        stage_log("fragment", .fragment)
    )]
    Compile {
        vertex: Option<String>,
        fragment: Option<String>,
    },

    #[error("program link failed: {log}")]
    Link { log: String },

    #[error("attribute '{name}' is not an active input of the program")]
    AttributeNotFound { name: String },

    #[error(transparent)]
    Driver(#[from] GpuError),
}

fn stage_log(stage: &str, log: &Option<String>) -> String {
    match log {
        Some(log) if log.is_empty() => format!("\n  {} stage: (no log)", stage),
        Some(log) => format!("\n  {} stage: {}", stage, log.trim_end()),
        None => String::new(),
    }
}

/// Driver logs may carry their terminator. A log that is only the terminator
/// (length <= 1) counts as empty.
fn normalize_log(raw: String) -> String {
    if raw.len() <= 1 {
        return String::new();
    }
    raw.trim_end_matches('\0').to_string()
}

// =============================================================================
// STAGES
// =============================================================================

/// One compiled (or failed) shader stage
#[derive(Debug)]
pub struct ShaderStage {
    kind: ShaderKind,
    log: String,
    handle: ShaderId,
    compiled: bool,
}

impl ShaderStage {
    /// Delete the stage object. Programs it was linked into keep working.
    pub fn release<G: GpuInterface + ?Sized>(self, gpu: &mut G) -> Result<(), GpuError> {
        checked(gpu, "delete shader", |g| g.delete_shader(self.handle))
    }
}

/// Create and compile one stage.
///
/// Succeeds whenever the driver could allocate the stage; whether it compiled
/// is recorded on the returned value.
pub fn compile<G: GpuInterface + ?Sized>(
    gpu: &mut G,
    kind: ShaderKind,
    source: &str,
) -> Result<ShaderStage, ProgramError> {
    let handle = gpu.create_shader(kind)?;

    let compiled = checked(gpu, "compile shader", |g| {
        g.shader_source(handle, source);
        g.compile_shader(handle);
        g.shader_compile_status(handle)
    });
    let compiled = match compiled {
        Ok(status) => status,
        Err(e) => {
            gpu.delete_shader(handle);
            return Err(e.into());
        }
    };

    let log = normalize_log(gpu.shader_info_log(handle));
    log::debug!(
        "Compiled {} shader {:?}: {}",
        kind,
        handle,
        if compiled { "ok" } else { "failed" }
    );

    Ok(ShaderStage {
        kind,
        log,
        handle,
        compiled,
    })
}

// =============================================================================
// PROGRAM
// =============================================================================

/// A successfully linked program
#[derive(Debug)]
pub struct Program {
    handle: ProgramId,
    link_log: String,
    attributes: HashMap<String, AttribLocation>,
}

impl Program {
    pub fn handle(&self) -> ProgramId {
        self.handle
    }

    /// Look up the slot of an active vertex input. Resolved names are
    /// remembered and not queried again.
    pub fn resolve_attribute<G: GpuInterface + ?Sized>(
        &mut self,
        gpu: &mut G,
        name: &str,
    ) -> Result<AttribLocation, ProgramError> {
        if let Some(location) = self.attributes.get(name) {
            return Ok(*location);
        }

        let handle = self.handle;
        let location = checked(gpu, "get attribute location", |g| {
            g.attrib_location(handle, name)
        })?
        .ok_or_else(|| ProgramError::AttributeNotFound {
            name: name.to_owned(),
        })?;

        log::debug!("Attribute '{}' resolved to location {}", name, location);
        self.attributes.insert(name.to_owned(), location);
        Ok(location)
    }

    pub fn release<G: GpuInterface + ?Sized>(self, gpu: &mut G) -> Result<(), GpuError> {
        log::debug!("Releasing program {:?}", self.handle);
        checked(gpu, "delete program", |g| g.delete_program(self.handle))
    }
}

/// Link two compiled stages. The stages stay owned by the caller.
pub fn link<G: GpuInterface + ?Sized>(
    gpu: &mut G,
    vertex: &ShaderStage,
    fragment: &ShaderStage,
) -> Result<Program, ProgramError> {
    let handle = gpu.create_program()?;

    let linked = checked(gpu, "link program", |g| {
        g.attach_shader(handle, vertex.handle);
        g.attach_shader(handle, fragment.handle);
        g.link_program(handle);
        g.detach_shader(handle, vertex.handle);
        g.detach_shader(handle, fragment.handle);
        g.program_link_status(handle)
    });
    let linked = match linked {
        Ok(status) => status,
        Err(e) => {
            gpu.delete_program(handle);
            return Err(e.into());
        }
    };

    let link_log = normalize_log(gpu.program_info_log(handle));
    if !linked {
        gpu.delete_program(handle);
        return Err(ProgramError::Link { log: link_log });
    }

    Ok(Program {
        handle,
        link_log,
        attributes: HashMap::new(),
    })
}

/// Compile both stages, link them and release the stages.
///
/// Both stages are compiled before either status is looked at, so a single
/// run reports every compile error.
pub fn build_program<G: GpuInterface + ?Sized>(
    gpu: &mut G,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<Program, ProgramError> {
    let vertex = compile(gpu, ShaderKind::Vertex, vertex_source)?;
    let fragment = match compile(gpu, ShaderKind::Fragment, fragment_source) {
        Ok(fragment) => fragment,
        Err(e) => {
            release_stage(gpu, vertex);
            return Err(e);
        }
    };

    let result = if vertex.compiled && fragment.compiled {
        link(gpu, &vertex, &fragment)
    } else {
        Err(ProgramError::Compile {
            vertex: (!vertex.compiled).then(|| vertex.log.clone()),
            fragment: (!fragment.compiled).then(|| fragment.log.clone()),
        })
    };

    for stage in [&vertex, &fragment] {
        if stage.compiled && !stage.log.is_empty() {
            log::info!("{} shader compile log:\n{}", stage.kind, stage.log.trim_end());
        }
    }
    release_stage(gpu, vertex);
    release_stage(gpu, fragment);

    let program = result?;
    if !program.link_log.is_empty() {
        log::info!("Program link log:\n{}", program.link_log.trim_end());
    }
    log::info!("Shader program {:?} linked", program.handle);
    Ok(program)
}

fn release_stage<G: GpuInterface + ?Sized>(gpu: &mut G, stage: ShaderStage) {
    let kind = stage.kind;
    if let Err(e) = stage.release(gpu) {
        log::warn!("Failed to release {} shader: {}", kind, e);
    }
}
