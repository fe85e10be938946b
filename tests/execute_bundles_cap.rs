//! `execute_bundles` caps the ids handed to the backend at
//! `MAX_EXECUTED_BUNDLES` (16) but still consumes every declared varint
//! from the stream, so the opcode after it decodes from the right pc.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::{Call, MockBackend};
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

#[test]
fn excess_bundle_ids_are_dropped_but_pc_still_advances_past_them() {
    let mut c = ContainerBuilder::new();
    let bc = &mut c.bytecode;

    let declared = 20u32;
    bc.push(Opcode::ExecuteBundles as u8);
    encode(declared, bc);
    for id in 0..declared {
        encode(id, bc);
    }
    bc.push(Opcode::Submit as u8);
    bc.push(Opcode::EndFrame as u8);

    let bytes = c.build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
    driver.render_frame(0.0).unwrap();

    assert_eq!(
        driver.backend().calls,
        vec![
            Call::ExecuteBundles { bundle_ids: (0..16).collect() },
            Call::Submit,
        ]
    );
}
