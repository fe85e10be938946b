//! A module whose header declares a narrower plugin set than an opcode
//! it contains is rejected with `PluginDisabled` rather than silently
//! running the opcode anyway.

mod common;

use common::ContainerBuilder;
use gpuvm::backend::mock::MockBackend;
use gpuvm::driver::Driver;
use gpuvm::error::CoreError;
use gpuvm::opcode::Opcode;
use gpuvm::varint::encode;

#[test]
fn draw_without_the_render_plugin_enabled_is_rejected() {
    let mut c = ContainerBuilder::new();
    // core + compute only, no render.
    c.set_plugins(0b0000_0101);
    let bc = &mut c.bytecode;
    bc.push(Opcode::Draw as u8);
    encode(3, bc);
    encode(1, bc);
    encode(0, bc);
    encode(0, bc);
    bc.push(Opcode::EndFrame as u8);

    let bytes = c.build();
    let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
    let err = driver.render_frame(0.0).unwrap_err();
    assert!(matches!(err, CoreError::PluginDisabled { plugin: "render" }));
}
