//! `exec_pass_once` initialization semantics: a pass referenced by
//! `exec_pass_once` runs on the first frame only, even across many
//! subsequent frames that reference it again.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::MockBackend;
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

#[test]
fn init_pass_runs_exactly_once_across_five_frames() {
    let mut c = ContainerBuilder::new();
    let bc = &mut c.bytecode;

    bc.push(Opcode::DefinePass as u8);
    encode(0, bc);
    bc.push(0);
    encode(0, bc);
    bc.push(Opcode::CreateBuffer as u8);
    encode(0, bc);
    encode(16, bc);
    bc.push(0);
    bc.push(Opcode::EndPassDef as u8);

    bc.push(Opcode::ExecPassOnce as u8);
    encode(0, bc);
    bc.push(Opcode::EndFrame as u8);

    let bytes = c.build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();

    for _ in 0..5 {
        driver.render_frame(0.0).unwrap();
    }

    assert_eq!(driver.backend().calls.len(), 1);
    assert_eq!(driver.frame_counter(), 5);
}
