// Backend module - GPU Interface, drivers and the components built on it
//
// Design: every component takes the device explicitly (`&mut G` where
// `G: GpuInterface`); the OpenGL and software drivers are interchangeable.

pub mod binding;
pub mod buffer;
pub mod device;
pub mod gl;
pub mod shader;
pub mod software;
pub mod surface;
