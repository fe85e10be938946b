//! Multi-pass scene switching: two passes are defined up front, never
//! executed inline, and only run when `exec_pass` references them from
//! the frame body — in an order different from their definition order.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::{Call, MockBackend};
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

#[test]
fn only_referenced_passes_run_and_in_exec_order() {
    let mut c = ContainerBuilder::new();
    let bc = &mut c.bytecode;

    // pass 0: draws buffer 10
    bc.push(Opcode::DefinePass as u8);
    encode(0, bc); // pass id
    bc.push(0); // kind, unused
    encode(0, bc); // desc id, unused
    bc.push(Opcode::SetPipeline as u8);
    encode(10, bc);
    bc.push(Opcode::EndPassDef as u8);

    // pass 1: draws buffer 20
    bc.push(Opcode::DefinePass as u8);
    encode(1, bc);
    bc.push(0);
    encode(0, bc);
    bc.push(Opcode::SetPipeline as u8);
    encode(20, bc);
    bc.push(Opcode::EndPassDef as u8);

    // frame body: run pass 1 before pass 0, and never run a third,
    // undefined pass.
    bc.push(Opcode::ExecPass as u8);
    encode(1, bc);
    bc.push(Opcode::ExecPass as u8);
    encode(99, bc); // missing id: silent no-op
    bc.push(Opcode::ExecPass as u8);
    encode(0, bc);
    bc.push(Opcode::EndFrame as u8);

    let bytes = c.build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
    driver.render_frame(0.0).unwrap();

    assert_eq!(
        driver.backend().calls,
        vec![
            Call::SetPipeline { id: 20 },
            Call::SetPipeline { id: 10 },
        ]
    );
}
