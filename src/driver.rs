//! The execution driver (§4.6): load a module, build a dispatcher, and
//! run one frame per call. This is the thin loop a host embeds; the
//! richer lifecycle (surface management, error callbacks) lives in the
//! crate root's `Animation` type, which owns a `Driver` per instance.

use std::sync::Arc;

use crate::backend::Backend;
use crate::dispatcher::Dispatcher;
use crate::error::CoreResult;
use crate::module::Module;

/// Owns a loaded module and the dispatcher running it against one
/// backend instance.
pub struct Driver<B: Backend> {
    dispatcher: Dispatcher<B>,
}

impl<B: Backend> Driver<B> {
    /// Parses `bytes` into a [`Module`] and scans its bytecode for pass
    /// definitions before handing control to the caller.
    pub fn load(bytes: &[u8], backend: B) -> CoreResult<Self> {
        let module = Arc::new(Module::load(bytes)?);
        log::debug!(
            "loaded module: {} bytes of bytecode, plugin_set=0x{:02x}",
            module.bytecode().len(),
            module.plugin_set.0
        );
        Ok(Self {
            dispatcher: Dispatcher::new(module, backend),
        })
    }

    /// Runs exactly one frame at `time_seconds`, resetting `pc` to the
    /// start of the bytecode stream first.
    pub fn render_frame(&mut self, time_seconds: f32) -> CoreResult<()> {
        self.dispatcher.set_current_time(time_seconds);
        self.dispatcher.run_frame()
    }

    pub fn frame_counter(&self) -> u32 {
        self.dispatcher.frame_counter()
    }

    pub fn backend(&self) -> &B {
        self.dispatcher.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.dispatcher.backend_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::module::{MAGIC, SUPPORTED_VERSION};

    fn minimal_container(bytecode: &[u8]) -> Vec<u8> {
        const HEADER_LEN: usize = 28;
        let strings_offset = HEADER_LEN as u32;
        let data_offset = strings_offset + 4;
        let wgsl_offset = data_offset + 4;
        let bytecode_offset = wgsl_offset + 4;
        let end_offset = bytecode_offset + bytecode.len() as u32;

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        out.push(0b0011_1111);
        out.push(0);
        out.extend_from_slice(&strings_offset.to_le_bytes());
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&wgsl_offset.to_le_bytes());
        out.extend_from_slice(&bytecode_offset.to_le_bytes());
        out.extend_from_slice(&end_offset.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(bytecode);
        out
    }

    #[test]
    fn render_frame_advances_frame_counter() {
        let bytecode = [crate::opcode::Opcode::EndFrame as u8];
        let bytes = minimal_container(&bytecode);
        let mut driver = Driver::load(&bytes, MockBackend::new()).unwrap();
        driver.render_frame(0.0).unwrap();
        driver.render_frame(1.0 / 60.0).unwrap();
        assert_eq!(driver.frame_counter(), 2);
    }

    #[test]
    fn rejects_malformed_container() {
        assert!(Driver::load(b"nope", MockBackend::new()).is_err());
    }
}
