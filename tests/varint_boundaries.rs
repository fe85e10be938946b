//! Operand varints at every width-tier boundary decode to the same
//! value the dispatcher sees, exercised through `create_buffer`'s `size`
//! operand rather than `varint` directly.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::{Call, MockBackend};
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

fn buffer_with_size(size: u32) -> Vec<u8> {
    let mut c = ContainerBuilder::new();
    let bc = &mut c.bytecode;
    bc.push(Opcode::CreateBuffer as u8);
    encode(0, bc);
    encode(size, bc);
    bc.push(0);
    bc.push(Opcode::EndFrame as u8);
    c.build()
}

#[test]
fn sizes_spanning_every_varint_width_round_trip() {
    for size in [0u32, 63, 64, 16_383, 16_384, 5_000_000, u32::MAX] {
        let bytes = buffer_with_size(size);
        let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
        driver.render_frame(0.0).unwrap();
        assert_eq!(
            driver.backend().calls,
            vec![Call::CreateBuffer { id: 0, size: size as u64, usage: 0 }],
            "size {size} did not round-trip"
        );
    }
}
