// Per-frame binding scope
//
// Everything a tick binds goes through a `FrameContext`. When the context is
// finished, or dropped during unwinding, every attribute slot it enabled is
// disabled again and the array buffer is unbound, so the next frame starts
// from neutral attribute state. The program stays current between frames.

use crate::backend::buffer::GeometryBuffer;
use crate::backend::device::{
    checked, AttribLayout, AttribLocation, BufferId, GpuError, GpuInterface, Primitive,
};
use crate::backend::shader::Program;

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Driver errors, in the order they were detected
    pub errors: Vec<GpuError>,
    /// Whether a draw call went through without a driver error
    pub drew: bool,
}

pub struct FrameContext<'g, G: GpuInterface + ?Sized> {
    gpu: &'g mut G,
    buffer: Option<BufferId>,
    enabled: Vec<AttribLocation>,
    errors: Vec<GpuError>,
    drew: bool,
    finished: bool,
}

impl<'g, G: GpuInterface + ?Sized> FrameContext<'g, G> {
    pub fn new(gpu: &'g mut G) -> Self {
        Self {
            gpu,
            buffer: None,
            enabled: Vec::new(),
            errors: Vec::new(),
            drew: false,
            finished: false,
        }
    }

    /// Run one checked verb; a driver error is logged and recorded, never retried
    fn step<T>(&mut self, operation: &'static str, verb: impl FnOnce(&mut G) -> T) -> Option<T> {
        match checked(&mut *self.gpu, operation, verb) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("{}", e);
                self.errors.push(e);
                None
            }
        }
    }

    pub fn viewport(&mut self, width: u32, height: u32) {
        let (width, height) = (clamp_dimension(width), clamp_dimension(height));
        self.step("set viewport", |g| g.viewport(0, 0, width, height));
    }

    pub fn clear(&mut self, color: [f32; 4]) {
        self.step("clear", |g| g.clear(color));
    }

    pub fn use_program(&mut self, program: &Program) {
        let handle = program.handle();
        self.step("use program", |g| g.use_program(Some(handle)));
    }

    pub fn bind_buffer(&mut self, geometry: &GeometryBuffer) {
        let handle = geometry.handle();
        // Recorded up front so the unbind happens even if the bind failed
        self.buffer = Some(handle);
        self.step("bind vertex buffer", |g| g.bind_array_buffer(Some(handle)));
    }

    /// Enable `location` and describe its layout in the bound buffer
    pub fn enable_attribute(&mut self, location: AttribLocation, layout: &AttribLayout) {
        if !self.enabled.contains(&location) {
            self.enabled.push(location);
        }
        self.step("enable vertex attribute", |g| g.enable_vertex_attrib(location));
        self.step("describe vertex attribute", |g| g.vertex_attrib_layout(location, layout));
    }

    pub fn draw(&mut self, primitive: Primitive, first: usize, count: usize) {
        let (Ok(first), Ok(count)) = (i32::try_from(first), i32::try_from(count)) else {
            log::warn!("Draw range {}+{} does not fit the driver's index type", first, count);
            return;
        };
        if self.step("draw arrays", |g| g.draw_arrays(primitive, first, count)).is_some() {
            self.drew = true;
        }
    }

    /// Restore neutral attribute state and hand back the report
    pub fn finish(mut self) -> FrameReport {
        self.restore();
        FrameReport {
            errors: std::mem::take(&mut self.errors),
            drew: self.drew,
        }
    }

    fn restore(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        for location in std::mem::take(&mut self.enabled) {
            self.step("disable vertex attribute", |g| g.disable_vertex_attrib(location));
        }
        if self.buffer.take().is_some() {
            self.step("unbind vertex buffer", |g| g.bind_array_buffer(None));
        }
    }
}

impl<G: GpuInterface + ?Sized> Drop for FrameContext<'_, G> {
    fn drop(&mut self) {
        self.restore();
    }
}

fn clamp_dimension(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::TRIANGLE;
    use crate::backend::device::ErrorCode;
    use crate::backend::shader::{build_program, TRIANGLE_FRAG, TRIANGLE_VERT};
    use crate::backend::software::SoftwareDevice;
    use pretty_assertions::assert_eq;

    fn setup() -> (SoftwareDevice, Program, GeometryBuffer, AttribLocation) {
        let mut gpu = SoftwareDevice::new(16, 16);
        let mut program = build_program(&mut gpu, TRIANGLE_VERT, TRIANGLE_FRAG).unwrap();
        let position = program.resolve_attribute(&mut gpu, "position").unwrap();
        let geometry = GeometryBuffer::from_points(&mut gpu, &TRIANGLE).unwrap();
        (gpu, program, geometry, position)
    }

    #[test]
    fn finish_restores_neutral_state() {
        let (mut gpu, program, geometry, position) = setup();

        let mut frame = FrameContext::new(&mut gpu);
        frame.use_program(&program);
        frame.bind_buffer(&geometry);
        frame.enable_attribute(position, geometry.layout());
        frame.draw(Primitive::Triangles, 0, geometry.vertex_count());
        let report = frame.finish();

        assert_eq!(report, FrameReport { errors: vec![], drew: true });
        assert!(gpu.enabled_attributes().is_empty());
        assert_eq!(gpu.array_buffer_binding(), None);
        assert_eq!(gpu.current_program(), Some(program.handle()));
    }

    #[test]
    fn dropping_mid_frame_still_unbinds() {
        let (mut gpu, _program, geometry, position) = setup();

        {
            let mut frame = FrameContext::new(&mut gpu);
            frame.bind_buffer(&geometry);
            frame.enable_attribute(position, geometry.layout());
        }

        assert!(gpu.enabled_attributes().is_empty());
        assert_eq!(gpu.array_buffer_binding(), None);
    }

    #[test]
    fn driver_errors_are_reported_with_operation() {
        let (mut gpu, program, geometry, _position) = setup();

        let mut frame = FrameContext::new(&mut gpu);
        frame.use_program(&program);
        frame.bind_buffer(&geometry);
        frame.enable_attribute(AttribLocation(20), geometry.layout());
        let report = frame.finish();

        assert!(!report.errors.is_empty());
        assert_eq!(
            report.errors[0],
            GpuError::Driver {
                operation: "enable vertex attribute",
                code: ErrorCode::INVALID_VALUE,
            }
        );
        assert!(!report.drew);
        assert_eq!(gpu.array_buffer_binding(), None);
    }

    #[test]
    fn failed_draw_is_not_counted() {
        let (mut gpu, _program, geometry, position) = setup();

        // No program bound
        let mut frame = FrameContext::new(&mut gpu);
        frame.bind_buffer(&geometry);
        frame.enable_attribute(position, geometry.layout());
        frame.draw(Primitive::Triangles, 0, 3);
        let report = frame.finish();

        assert!(!report.drew);
        assert_eq!(
            report.errors,
            vec![GpuError::Driver {
                operation: "draw arrays",
                code: ErrorCode::INVALID_OPERATION,
            }]
        );
    }
}
