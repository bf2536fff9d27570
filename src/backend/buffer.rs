// Geometry buffer - immutable vertex data living on the GPU
//
// Uploaded once with a static usage hint, never mutated, released exactly once
// at shutdown (`release` consumes the value).

use crate::backend::device::{checked, AttribLayout, BufferId, GpuError, GpuInterface};
use glam::Vec2;
use thiserror::Error;

/// The fixed triangle, counter-clockwise in normalized device coordinates
pub const TRIANGLE: [Vec2; 3] = [
    Vec2::new(0.0, 0.5),
    Vec2::new(-0.5, -0.5),
    Vec2::new(0.5, -0.5),
];

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("components per vertex must be between 1 and 4, got {0}")]
    InvalidComponentCount(usize),

    #[error("vertex data is empty")]
    Empty,

    #[error("{len} floats do not divide into vertices of {components} components")]
    Misaligned { len: usize, components: usize },

    #[error(transparent)]
    Driver(#[from] GpuError),
}

#[derive(Debug)]
pub struct GeometryBuffer {
    handle: BufferId,
    vertex_count: usize,
    layout: AttribLayout,
}

impl GeometryBuffer {
    /// Upload `data` as consecutive vertices of `components_per_vertex` floats.
    ///
    /// The array buffer binding is cleared again before returning.
    pub fn upload<G: GpuInterface + ?Sized>(
        gpu: &mut G,
        data: &[f32],
        components_per_vertex: usize,
    ) -> Result<Self, GeometryError> {
        if !(1..=4).contains(&components_per_vertex) {
            return Err(GeometryError::InvalidComponentCount(components_per_vertex));
        }
        if data.is_empty() {
            return Err(GeometryError::Empty);
        }
        if data.len() % components_per_vertex != 0 {
            return Err(GeometryError::Misaligned {
                len: data.len(),
                components: components_per_vertex,
            });
        }

        let handle = gpu.create_buffer()?;
        let bytes: &[u8] = bytemuck::cast_slice(data);

        let uploaded = checked(gpu, "upload vertex buffer", |g| {
            g.bind_array_buffer(Some(handle));
            g.array_buffer_data_static(bytes);
            g.bind_array_buffer(None);
        });
        if let Err(e) = uploaded {
            gpu.bind_array_buffer(None);
            gpu.delete_buffer(handle);
            return Err(e.into());
        }

        let vertex_count = data.len() / components_per_vertex;
        log::debug!(
            "Uploaded buffer {:?}: {} vertices x {} components ({} bytes)",
            handle,
            vertex_count,
            components_per_vertex,
            bytes.len()
        );

        Ok(Self {
            handle,
            vertex_count,
            layout: AttribLayout::packed_f32(components_per_vertex as i32),
        })
    }

    /// Upload 2D vertices
    pub fn from_points<G: GpuInterface + ?Sized>(
        gpu: &mut G,
        points: &[Vec2],
    ) -> Result<Self, GeometryError> {
        Self::upload(gpu, bytemuck::cast_slice(points), 2)
    }

    pub fn handle(&self) -> BufferId {
        self.handle
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Attribute layout describing one vertex of this buffer
    pub fn layout(&self) -> &AttribLayout {
        &self.layout
    }

    pub fn release<G: GpuInterface + ?Sized>(self, gpu: &mut G) -> Result<(), GpuError> {
        log::debug!("Releasing buffer {:?}", self.handle);
        checked(gpu, "delete buffer", |g| g.delete_buffer(self.handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareDevice;
    use pretty_assertions::assert_eq;

    #[test]
    fn six_floats_make_three_vertices() {
        let mut gpu = SoftwareDevice::new(4, 4);
        let data = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
        let geometry = GeometryBuffer::upload(&mut gpu, &data, 2).unwrap();

        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.layout().components, 2);
        assert_eq!(*geometry.layout(), AttribLayout::packed_f32(2));
        assert_eq!(
            gpu.buffer_contents(geometry.handle()),
            Some(bytemuck::cast_slice::<f32, u8>(&data))
        );
    }

    #[test]
    fn upload_leaves_no_buffer_bound() {
        let mut gpu = SoftwareDevice::new(4, 4);
        GeometryBuffer::from_points(&mut gpu, &TRIANGLE).unwrap();
        assert_eq!(gpu.array_buffer_binding(), None);
    }

    #[test]
    fn misaligned_data_is_rejected() {
        let mut gpu = SoftwareDevice::new(4, 4);
        let err = GeometryBuffer::upload(&mut gpu, &[0.0; 5], 2).unwrap_err();
        assert!(matches!(err, GeometryError::Misaligned { len: 5, components: 2 }));
        assert_eq!(gpu.live_objects().buffers, 0);
    }

    #[test]
    fn empty_data_and_bad_component_counts_are_rejected() {
        let mut gpu = SoftwareDevice::new(4, 4);
        assert!(matches!(
            GeometryBuffer::upload(&mut gpu, &[], 2),
            Err(GeometryError::Empty)
        ));
        for components in [0, 5] {
            assert!(matches!(
                GeometryBuffer::upload(&mut gpu, &[0.0; 20], components),
                Err(GeometryError::InvalidComponentCount(c)) if c == components
            ));
        }
    }

    #[test]
    fn release_frees_the_buffer() {
        let mut gpu = SoftwareDevice::new(4, 4);
        let geometry = GeometryBuffer::from_points(&mut gpu, &TRIANGLE).unwrap();
        assert_eq!(gpu.live_objects().buffers, 1);
        geometry.release(&mut gpu).unwrap();
        assert_eq!(gpu.live_objects().buffers, 0);
    }
}
