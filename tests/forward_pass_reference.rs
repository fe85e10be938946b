//! A pass can be referenced by `exec_pass` before its `define_pass`
//! appears later in the same bytecode stream, since pass ranges are
//! scanned up front rather than discovered as execution reaches them.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::{Call, MockBackend};
use gpuvm::driver::Driver;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

#[test]
fn exec_pass_resolves_a_pass_defined_later_in_the_stream() {
    let mut c = ContainerBuilder::new();
    let bc = &mut c.bytecode;

    // exec_pass(0) appears before define_pass(0) in the stream.
    bc.push(Opcode::ExecPass as u8);
    encode(0, bc);
    bc.push(Opcode::EndFrame as u8);

    // define_pass's own body is never reached by linear pc advancement
    // here (end_frame above ends the frame first); only Dispatcher::new
    // scanning the whole stream up front makes pass 0 resolvable at all.
    bc.push(Opcode::DefinePass as u8);
    encode(0, bc);
    bc.push(0);
    encode(0, bc);
    bc.push(Opcode::SetPipeline as u8);
    encode(7, bc);
    bc.push(Opcode::EndPassDef as u8);

    let bytes = c.build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
    driver.render_frame(0.0).unwrap();

    assert_eq!(driver.backend().calls, vec![Call::SetPipeline { id: 7 }]);
}
