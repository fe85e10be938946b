//! Pool-indexed resource binding (boids-style ping-pong): the same
//! `set_vertex_buffer_pool` opcode resolves to a different concrete
//! buffer id each frame as `frame_counter` advances and wraps.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::{Call, MockBackend};
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

fn build() -> Vec<u8> {
    let mut c = ContainerBuilder::new();
    let bc = &mut c.bytecode;

    bc.push(Opcode::SetVertexBufferPool as u8);
    bc.push(0); // slot
    encode(100, bc); // base
    bc.push(2); // pool_size
    bc.push(0); // offset
    bc.push(Opcode::EndFrame as u8);

    c.build()
}

#[test]
fn pool_id_alternates_across_frames() {
    let bytes = build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();

    driver.render_frame(0.0).unwrap();
    driver.render_frame(1.0 / 60.0).unwrap();
    driver.render_frame(2.0 / 60.0).unwrap();

    assert_eq!(
        driver.backend().calls,
        vec![
            Call::SetVertexBuffer { slot: 0, id: 100 },
            Call::SetVertexBuffer { slot: 0, id: 101 },
            Call::SetVertexBuffer { slot: 0, id: 100 },
        ]
    );
}
