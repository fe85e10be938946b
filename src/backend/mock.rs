//! Recording backend used by tests (§4.5.3).
//!
//! Appends a typed [`Call`] for every invocation instead of touching a
//! GPU. Golden-sequence tests assert on `MockBackend::calls`.

use super::{Backend, IndexFormat, LoadOp, StoreOp};
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer { id: u32, size: u64, usage: u8 },
    CreateTexture { id: u32 },
    CreateSampler { id: u32 },
    CreateShaderModule { id: u32, source: String },
    CreateRenderPipeline { id: u32 },
    CreateComputePipeline { id: u32 },
    CreateBindGroup { id: u32, layout_id: u32 },
    CreateBindGroupLayout { id: u32 },
    CreatePipelineLayout { id: u32 },
    CreateTextureView { id: u32 },
    CreateQuerySet { id: u32 },
    CreateImageBitmap { id: u32 },
    CreateRenderBundle { id: u32 },
    BeginRenderPass { color_id: u32, load: LoadOp, store: StoreOp, depth_id: Option<u32> },
    BeginComputePass,
    EndPass,
    SetPipeline { id: u32 },
    SetBindGroup { slot: u8, id: u32 },
    SetVertexBuffer { slot: u8, id: u32 },
    SetIndexBuffer { id: u32, format: IndexFormat },
    Draw { vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32 },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    ExecuteBundles { bundle_ids: Vec<u32> },
    WriteBuffer { id: u32, offset: u64, data: Vec<u8> },
    WriteTimeUniform { id: u32, offset: u64, time: f32 },
    Submit,
    CopyExternalImageToTexture { id: u32 },
    InitWasmModule { id: u32, name: String },
    CallWasmFunc { module_id: u32, name: String, args: Vec<i32> },
    WriteBufferFromWasm { buffer_id: u32, module_id: u32 },
}

#[derive(Debug, Default)]
pub struct MockBackend {
    pub calls: Vec<Call>,
    created_ids: std::collections::HashSet<(&'static str, u32)>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn idempotent(&mut self, kind: &'static str, id: u32) -> bool {
        self.created_ids.insert((kind, id))
    }
}

impl Backend for MockBackend {
    fn create_buffer(&mut self, id: u32, size: u64, usage: u8) -> Result<(), CoreError> {
        if self.idempotent("buffer", id) {
            self.calls.push(Call::CreateBuffer { id, size, usage });
        }
        Ok(())
    }

    fn create_texture(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("texture", id) {
            self.calls.push(Call::CreateTexture { id });
        }
        Ok(())
    }

    fn create_sampler(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("sampler", id) {
            self.calls.push(Call::CreateSampler { id });
        }
        Ok(())
    }

    fn create_shader(&mut self, id: u32, wgsl_source: &str) -> Result<(), CoreError> {
        if self.idempotent("shader", id) {
            self.calls.push(Call::CreateShaderModule {
                id,
                source: wgsl_source.to_string(),
            });
        }
        Ok(())
    }

    fn create_render_pipeline(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("render_pipeline", id) {
            self.calls.push(Call::CreateRenderPipeline { id });
        }
        Ok(())
    }

    fn create_compute_pipeline(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("compute_pipeline", id) {
            self.calls.push(Call::CreateComputePipeline { id });
        }
        Ok(())
    }

    fn create_bind_group(
        &mut self,
        id: u32,
        layout_id: u32,
        _entries_desc: &[u8],
    ) -> Result<(), CoreError> {
        if self.idempotent("bind_group", id) {
            self.calls.push(Call::CreateBindGroup { id, layout_id });
        }
        Ok(())
    }

    fn create_bind_group_layout(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("bind_group_layout", id) {
            self.calls.push(Call::CreateBindGroupLayout { id });
        }
        Ok(())
    }

    fn create_pipeline_layout(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("pipeline_layout", id) {
            self.calls.push(Call::CreatePipelineLayout { id });
        }
        Ok(())
    }

    fn create_texture_view(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("texture_view", id) {
            self.calls.push(Call::CreateTextureView { id });
        }
        Ok(())
    }

    fn create_query_set(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("query_set", id) {
            self.calls.push(Call::CreateQuerySet { id });
        }
        Ok(())
    }

    fn create_image_bitmap(&mut self, id: u32, _image_blob: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("image_bitmap", id) {
            self.calls.push(Call::CreateImageBitmap { id });
        }
        Ok(())
    }

    fn create_render_bundle(&mut self, id: u32, _desc: &[u8]) -> Result<(), CoreError> {
        if self.idempotent("render_bundle", id) {
            self.calls.push(Call::CreateRenderBundle { id });
        }
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        color_id: u32,
        load: LoadOp,
        store: StoreOp,
        depth_id: Option<u32>,
    ) -> Result<(), CoreError> {
        self.calls.push(Call::BeginRenderPass {
            color_id,
            load,
            store,
            depth_id,
        });
        Ok(())
    }

    fn begin_compute_pass(&mut self) -> Result<(), CoreError> {
        self.calls.push(Call::BeginComputePass);
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), CoreError> {
        self.calls.push(Call::EndPass);
        Ok(())
    }

    fn set_pipeline(&mut self, id: u32) -> Result<(), CoreError> {
        self.calls.push(Call::SetPipeline { id });
        Ok(())
    }

    fn set_bind_group(&mut self, slot: u8, id: u32) -> Result<(), CoreError> {
        self.calls.push(Call::SetBindGroup { slot, id });
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u8, id: u32) -> Result<(), CoreError> {
        self.calls.push(Call::SetVertexBuffer { slot, id });
        Ok(())
    }

    fn set_index_buffer(&mut self, id: u32, format: IndexFormat) -> Result<(), CoreError> {
        self.calls.push(Call::SetIndexBuffer { id, format });
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), CoreError> {
        self.calls.push(Call::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
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
        self.calls.push(Call::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), CoreError> {
        self.calls.push(Call::Dispatch { x, y, z });
        Ok(())
    }

    fn execute_bundles(&mut self, bundle_ids: &[u32]) -> Result<(), CoreError> {
        self.calls.push(Call::ExecuteBundles {
            bundle_ids: bundle_ids.to_vec(),
        });
        Ok(())
    }

    fn write_buffer(&mut self, id: u32, offset: u64, data: &[u8]) -> Result<(), CoreError> {
        self.calls.push(Call::WriteBuffer {
            id,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn write_time_uniform(&mut self, id: u32, offset: u64, time: f32) -> Result<(), CoreError> {
        self.calls.push(Call::WriteTimeUniform { id, offset, time });
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CoreError> {
        self.calls.push(Call::Submit);
        Ok(())
    }

    fn copy_external_image_to_texture(
        &mut self,
        id: u32,
        _image_blob: &[u8],
    ) -> Result<(), CoreError> {
        self.calls.push(Call::CopyExternalImageToTexture { id });
        Ok(())
    }

    fn init_wasm_module(&mut self, id: u32, name: &str) -> Result<(), CoreError> {
        self.calls.push(Call::InitWasmModule {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn call_wasm_func(&mut self, module_id: u32, name: &str, args: &[i32]) -> Result<(), CoreError> {
        self.calls.push(Call::CallWasmFunc {
            module_id,
            name: name.to_string(),
            args: args.to_vec(),
        });
        Ok(())
    }

    fn write_buffer_from_wasm(&mut self, buffer_id: u32, module_id: u32) -> Result<(), CoreError> {
        self.calls.push(Call::WriteBufferFromWasm {
            buffer_id,
            module_id,
        });
        Ok(())
    }
}
