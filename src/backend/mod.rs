//! The backend capability set (§4.5).
//!
//! A `Backend` is the fixed set of GPU operations the dispatcher can
//! invoke; it knows nothing about bytecode, pools, or pass ranges. Three
//! implementations live in this module: [`native`] drives `wgpu`
//! directly, [`command_buffer`] serializes calls for an external
//! executor, and [`mock`] records calls for tests.
//!
//! The dispatcher is generic over `B: Backend` so the hot path never pays
//! for a vtable call (§9 "Backend polymorphism without dynamic dispatch").

pub mod command_buffer;
pub mod descriptor;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod native;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Everything the dispatcher can ask a backend to do. Ids are resource
/// slots already resolved by the dispatcher (pool arithmetic, if any,
/// has already happened — the backend only ever sees a concrete id).
pub trait Backend {
    /// Resource creation. `desc` is the raw descriptor blob from the
    /// module's data table, or empty when the opcode carries none.
    fn create_buffer(&mut self, id: u32, size: u64, usage: u8) -> Result<(), CoreError>;
    fn create_texture(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_sampler(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_shader(&mut self, id: u32, wgsl_source: &str) -> Result<(), CoreError>;
    fn create_render_pipeline(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_compute_pipeline(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_bind_group(
        &mut self,
        id: u32,
        layout_id: u32,
        entries_desc: &[u8],
    ) -> Result<(), CoreError>;
    fn create_bind_group_layout(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_pipeline_layout(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_texture_view(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_query_set(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;
    fn create_image_bitmap(&mut self, id: u32, image_blob: &[u8]) -> Result<(), CoreError>;
    fn create_render_bundle(&mut self, id: u32, desc: &[u8]) -> Result<(), CoreError>;

    // --- pass control ---
    fn begin_render_pass(
        &mut self,
        color_id: u32,
        load: LoadOp,
        store: StoreOp,
        depth_id: Option<u32>,
    ) -> Result<(), CoreError>;
    fn begin_compute_pass(&mut self) -> Result<(), CoreError>;
    fn end_pass(&mut self) -> Result<(), CoreError>;

    // --- bindings ---
    fn set_pipeline(&mut self, id: u32) -> Result<(), CoreError>;
    fn set_bind_group(&mut self, slot: u8, id: u32) -> Result<(), CoreError>;
    fn set_vertex_buffer(&mut self, slot: u8, id: u32) -> Result<(), CoreError>;
    fn set_index_buffer(&mut self, id: u32, format: IndexFormat) -> Result<(), CoreError>;

    // --- draw / dispatch ---
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), CoreError>;
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), CoreError>;
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CoreError>;
    fn execute_bundles(&mut self, bundle_ids: &[u32]) -> Result<(), CoreError>;

    // --- queue ---
    fn write_buffer(&mut self, id: u32, offset: u64, data: &[u8]) -> Result<(), CoreError>;
    fn write_time_uniform(&mut self, id: u32, offset: u64, time: f32) -> Result<(), CoreError>;
    fn submit(&mut self) -> Result<(), CoreError>;
    fn copy_external_image_to_texture(
        &mut self,
        id: u32,
        image_blob: &[u8],
    ) -> Result<(), CoreError>;

    // --- embedded VM (optional capability) ---
    fn init_wasm_module(&mut self, id: u32, name: &str) -> Result<(), CoreError> {
        let _ = (id, name);
        Ok(())
    }
    fn call_wasm_func(&mut self, module_id: u32, name: &str, args: &[i32]) -> Result<(), CoreError> {
        let _ = (module_id, name, args);
        Ok(())
    }
    fn write_buffer_from_wasm(&mut self, buffer_id: u32, module_id: u32) -> Result<(), CoreError> {
        let _ = (buffer_id, module_id);
        Ok(())
    }
}
