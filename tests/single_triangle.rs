//! End-to-end smoke test: the opcode sequence a compiler would emit for
//! a single triangle draw, run against the mock backend and checked
//! against the exact call sequence the native backend would also see.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::{Call, MockBackend};
use gpuvm::backend::{LoadOp, StoreOp};
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

#[test]
fn single_triangle_frame_executes_in_order() {
    let mut c = ContainerBuilder::new();
    let wgsl_data = c.push_data(b"@vertex fn vs() {}");
    let wgsl_id = c.push_wgsl(wgsl_data as u16, vec![]);
    let pipeline_desc = c.push_data(b"\x00\x00");

    let bc = &mut c.bytecode;

    bc.push(Opcode::CreateBuffer as u8);
    encode(0, bc); // buffer id
    encode(36, bc); // size
    bc.push(0x01); // usage bits

    bc.push(Opcode::CreateShader as u8);
    encode(0, bc); // shader id
    encode(wgsl_id, bc);

    bc.push(Opcode::CreateRenderPipeline as u8);
    encode(0, bc); // pipeline id
    encode(pipeline_desc, bc);

    bc.push(Opcode::BeginRenderPass as u8);
    encode(u32::MAX, bc); // surface target
    bc.push(1); // load = clear
    bc.push(0); // store = store
    encode(u32::MAX, bc); // no depth

    bc.push(Opcode::SetPipeline as u8);
    encode(0, bc);

    bc.push(Opcode::SetVertexBuffer as u8);
    bc.push(0); // slot
    encode(0, bc); // buffer id

    bc.push(Opcode::Draw as u8);
    encode(3, bc); // vertex_count
    encode(1, bc); // instance_count
    encode(0, bc); // first_vertex
    encode(0, bc); // first_instance

    bc.push(Opcode::EndPass as u8);
    bc.push(Opcode::Submit as u8);
    bc.push(Opcode::EndFrame as u8);

    let bytes = c.build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
    driver.render_frame(0.0).unwrap();

    let calls = &driver.backend().calls;
    assert_eq!(
        calls,
        &vec![
            Call::CreateBuffer { id: 0, size: 36, usage: 1 },
            Call::CreateShaderModule { id: 0, source: "@vertex fn vs() {}".to_string() },
            Call::CreateRenderPipeline { id: 0 },
            Call::BeginRenderPass {
                color_id: u32::MAX,
                load: LoadOp::Clear,
                store: StoreOp::Store,
                depth_id: None,
            },
            Call::SetPipeline { id: 0 },
            Call::SetVertexBuffer { slot: 0, id: 0 },
            Call::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 },
            Call::EndPass,
            Call::Submit,
        ]
    );
    assert_eq!(driver.frame_counter(), 1);
}
