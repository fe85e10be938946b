//! Serializes backend calls into the binary stream an external executor
//! replays (§6.3): an 8-byte header followed by `[opcode:u8][operands…]`
//! records, data-blob references rewritten as `(ptr:u32, len:u32)` into a
//! side data pool, terminated by a lone `0xFF` byte.
//!
//! The buffer is pre-sized at construction. A command that would overflow
//! it is dropped silently and counted in `dropped` rather than growing
//! the allocation (§4.6 "no allocation is performed inside step").

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CoreError;

use super::{Backend, IndexFormat, LoadOp, StoreOp};

const TERMINATOR: u8 = 0xFF;

mod tag {
    pub const CREATE_BUFFER: u8 = 0x01;
    pub const CREATE_TEXTURE: u8 = 0x02;
    pub const CREATE_SAMPLER: u8 = 0x03;
    pub const CREATE_SHADER: u8 = 0x04;
    pub const CREATE_RENDER_PIPELINE: u8 = 0x05;
    pub const CREATE_COMPUTE_PIPELINE: u8 = 0x06;
    pub const CREATE_BIND_GROUP: u8 = 0x07;
    pub const CREATE_BIND_GROUP_LAYOUT: u8 = 0x08;
    pub const CREATE_PIPELINE_LAYOUT: u8 = 0x09;
    pub const CREATE_TEXTURE_VIEW: u8 = 0x0a;
    pub const CREATE_QUERY_SET: u8 = 0x0b;
    pub const CREATE_IMAGE_BITMAP: u8 = 0x0c;
    pub const CREATE_RENDER_BUNDLE: u8 = 0x0d;
    pub const BEGIN_RENDER_PASS: u8 = 0x10;
    pub const BEGIN_COMPUTE_PASS: u8 = 0x11;
    pub const END_PASS: u8 = 0x12;
    pub const SET_PIPELINE: u8 = 0x13;
    pub const SET_BIND_GROUP: u8 = 0x14;
    pub const SET_VERTEX_BUFFER: u8 = 0x15;
    pub const SET_INDEX_BUFFER: u8 = 0x16;
    pub const DRAW: u8 = 0x17;
    pub const DRAW_INDEXED: u8 = 0x18;
    pub const DISPATCH: u8 = 0x19;
    pub const EXECUTE_BUNDLES: u8 = 0x1a;
    pub const WRITE_BUFFER: u8 = 0x20;
    pub const WRITE_TIME_UNIFORM: u8 = 0x21;
    pub const SUBMIT: u8 = 0x22;
    pub const COPY_EXTERNAL_IMAGE: u8 = 0x23;
}

/// Appends backend calls to a pre-sized byte buffer, dropping whatever
/// doesn't fit instead of growing it.
pub struct CommandBufferBackend {
    body: Vec<u8>,
    capacity: usize,
    cmd_count: u16,
    /// Side pool holding data-blob payloads (shader sources, write
    /// payloads, descriptor blobs) referenced from the stream as
    /// `(ptr, len)` pairs instead of being inlined.
    data_pool: Vec<u8>,
    dropped: AtomicU64,
}

impl CommandBufferBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            body: Vec::with_capacity(capacity),
            capacity,
            cmd_count: 0,
            data_pool: Vec::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Serializes the header + body + terminator into one contiguous
    /// buffer for handoff to the external executor.
    pub fn finish(&self) -> Vec<u8> {
        let total_len = 8 + self.body.len() + 1;
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&(total_len as u32).to_le_bytes());
        out.extend_from_slice(&self.cmd_count.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&self.body);
        out.push(TERMINATOR);
        out
    }

    fn push_data(&mut self, data: &[u8]) -> (u32, u32) {
        let ptr = self.data_pool.len() as u32;
        self.data_pool.extend_from_slice(data);
        (ptr, data.len() as u32)
    }

    /// Appends `record` to the body if it fits within `capacity`; drops
    /// it and bumps the diagnostic counter otherwise.
    fn emit(&mut self, record: &[u8]) {
        if self.body.len() + record.len() > self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.body.extend_from_slice(record);
        self.cmd_count = self.cmd_count.saturating_add(1);
    }
}

impl Backend for CommandBufferBackend {
    fn create_buffer(&mut self, id: u32, size: u64, usage: u8) -> Result<(), CoreError> {
        let mut rec = vec![tag::CREATE_BUFFER];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&size.to_le_bytes());
        rec.push(usage);
        self.emit(&rec);
        Ok(())
    }

    fn create_texture(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_TEXTURE];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_sampler(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_SAMPLER];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_shader(&mut self, id: u32, wgsl_source: &str) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(wgsl_source.as_bytes());
        let mut rec = vec![tag::CREATE_SHADER];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_render_pipeline(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_RENDER_PIPELINE];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_compute_pipeline(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_COMPUTE_PIPELINE];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_bind_group(
        &mut self,
        id: u32,
        layout_id: u32,
        entries_desc: &[u8],
    ) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(entries_desc);
        let mut rec = vec![tag::CREATE_BIND_GROUP];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&layout_id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_bind_group_layout(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_BIND_GROUP_LAYOUT];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_pipeline_layout(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_PIPELINE_LAYOUT];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_texture_view(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_TEXTURE_VIEW];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_query_set(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_QUERY_SET];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_image_bitmap(&mut self, id: u32, image_blob: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(image_blob);
        let mut rec = vec![tag::CREATE_IMAGE_BITMAP];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn create_render_bundle(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(desc);
        let mut rec = vec![tag::CREATE_RENDER_BUNDLE];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        color_id: u32,
        load: LoadOp,
        store: StoreOp,
        depth_id: Option<u32>,
    ) -> Result<(), CoreError> {
        let mut rec = vec![tag::BEGIN_RENDER_PASS];
        rec.extend_from_slice(&color_id.to_le_bytes());
        rec.push(matches!(load, LoadOp::Clear) as u8);
        rec.push(matches!(store, StoreOp::Discard) as u8);
        rec.extend_from_slice(&depth_id.unwrap_or(0xFFFF_FFFF).to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn begin_compute_pass(&mut self) -> Result<(), CoreError> {
        self.emit(&[tag::BEGIN_COMPUTE_PASS]);
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), CoreError> {
        self.emit(&[tag::END_PASS]);
        Ok(())
    }

    fn set_pipeline(&mut self, id: u32) -> Result<(), CoreError> {
        let mut rec = vec![tag::SET_PIPELINE];
        rec.extend_from_slice(&id.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn set_bind_group(&mut self, slot: u8, id: u32) -> Result<(), CoreError> {
        let mut rec = vec![tag::SET_BIND_GROUP, slot];
        rec.extend_from_slice(&id.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u8, id: u32) -> Result<(), CoreError> {
        let mut rec = vec![tag::SET_VERTEX_BUFFER, slot];
        rec.extend_from_slice(&id.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn set_index_buffer(&mut self, id: u32, format: IndexFormat) -> Result<(), CoreError> {
        let mut rec = vec![tag::SET_INDEX_BUFFER];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.push(matches!(format, IndexFormat::Uint32) as u8);
        self.emit(&rec);
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), CoreError> {
        let mut rec = vec![tag::DRAW];
        for v in [vertex_count, instance_count, first_vertex, first_instance] {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        self.emit(&rec);
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), CoreError> {
        let mut rec = vec![tag::DRAW_INDEXED];
        for v in [index_count, instance_count, first_index] {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        rec.extend_from_slice(&base_vertex.to_le_bytes());
        rec.extend_from_slice(&first_instance.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CoreError> {
        let mut rec = vec![tag::DISPATCH];
        for v in [x, y, z] {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        self.emit(&rec);
        Ok(())
    }

    fn execute_bundles(&mut self, bundle_ids: &[u32]) -> Result<(), CoreError> {
        let mut rec = vec![tag::EXECUTE_BUNDLES];
        rec.push(bundle_ids.len() as u8);
        for id in bundle_ids {
            rec.extend_from_slice(&id.to_le_bytes());
        }
        self.emit(&rec);
        Ok(())
    }

    fn write_buffer(&mut self, id: u32, offset: u64, data: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(data);
        let mut rec = vec![tag::WRITE_BUFFER];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&offset.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn write_time_uniform(&mut self, id: u32, offset: u64, time: f32) -> Result<(), CoreError> {
        let mut rec = vec![tag::WRITE_TIME_UNIFORM];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&offset.to_le_bytes());
        rec.extend_from_slice(&time.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CoreError> {
        self.emit(&[tag::SUBMIT]);
        Ok(())
    }

    fn copy_external_image_to_texture(&mut self, id: u32, image_blob: &[u8]) -> Result<(), CoreError> {
        let (ptr, len) = self.push_data(image_blob);
        let mut rec = vec![tag::COPY_EXTERNAL_IMAGE];
        rec.extend_from_slice(&id.to_le_bytes());
        rec.extend_from_slice(&ptr.to_le_bytes());
        rec.extend_from_slice(&len.to_le_bytes());
        self.emit(&rec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_terminator_frame_the_body() {
        let mut backend = CommandBufferBackend::new(4096);
        backend.create_buffer(0, 64, 0x40).unwrap();
        backend.submit().unwrap();
        let stream = backend.finish();
        let total_len = u32::from_le_bytes(stream[0..4].try_into().unwrap()) as usize;
        assert_eq!(total_len, stream.len());
        assert_eq!(*stream.last().unwrap(), TERMINATOR);
        let cmd_count = u16::from_le_bytes(stream[4..6].try_into().unwrap());
        assert_eq!(cmd_count, 2);
    }

    #[test]
    fn overflow_drops_silently_and_counts() {
        let mut backend = CommandBufferBackend::new(8);
        for _ in 0..20 {
            backend.submit().unwrap();
        }
        assert!(backend.dropped_count() > 0);
    }

    #[test]
    fn data_blob_references_point_into_the_pool() {
        let mut backend = CommandBufferBackend::new(4096);
        backend.create_shader(3, "fn main() {}").unwrap();
        assert_eq!(backend.data_pool, b"fn main() {}");
    }
}
