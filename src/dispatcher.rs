//! The bytecode dispatcher (§4.3): decodes one opcode at a time, resolves
//! pool arithmetic, and drives a [`Backend`]. Generic over `B: Backend` so
//! the interpreter loop never pays for a vtable call per opcode (§9
//! "Backend polymorphism without dynamic dispatch on the hot path").

use std::collections::HashMap;

use crate::arrays::{ElementType, TypedArray};
use crate::backend::{Backend, IndexFormat, LoadOp, StoreOp};
use crate::error::CoreError;
use crate::module::Module;
use crate::opcode::Opcode;
use crate::scanner::{PassRange, Scanner};
use crate::varint;
use crate::wgsl;

/// Bound on distinct `pass_id`s the fixed `executed_once` bitset can
/// track directly; pass ids beyond this are rejected rather than
/// spilling into a fallible heap set (§9).
const MAX_PASS_ID: usize = 1 << 16;

/// Per-entry execution cap (§4.3.1): one `exec_pass`/`exec_pass_once`
/// invocation, or one top-level frame step loop, may decode at most this
/// many opcodes before the dispatcher gives up and errors out.
const MAX_OPCODES_PER_PASS_ENTRY: usize = 1_000;

/// Cap on opcodes decoded directly in a frame body (outside any pass),
/// matching the "no more than 10,000 opcodes per frame" ceiling.
const MAX_OPCODES_PER_FRAME: usize = 10_000;

/// Execution state that survives across frames: the `pc`, whatever pass
/// is currently open, `executed_once`'s bitset, and the frame counter
/// that drives pool arithmetic.
pub struct Dispatcher<B: Backend> {
    module: std::sync::Arc<Module>,
    backend: B,
    pass_ranges: HashMap<u32, PassRange>,
    executed_once: Vec<bool>,
    frame_counter: u32,
    in_pass_def: bool,
    in_frame_def: bool,
    /// Wall-clock seconds for this frame, set by the driver before
    /// `run_frame` and consumed by `write_time_uniform` (§4.6).
    current_time: f32,
    /// Host-side arrays staged by the "data generation" opcodes, read back
    /// by `write_buffer_from_array` keyed by array id, not buffer id.
    arrays: HashMap<u32, TypedArray>,
}

impl<B: Backend> Dispatcher<B> {
    /// Scans `module`'s bytecode for pass definitions up front (§4.2) and
    /// constructs a dispatcher ready to run frames against `backend`.
    pub fn new(module: std::sync::Arc<Module>, backend: B) -> Self {
        let pass_ranges = Scanner::new(module.bytecode()).scan_pass_definitions();
        Self {
            module,
            backend,
            pass_ranges,
            executed_once: vec![false; MAX_PASS_ID],
            frame_counter: 0,
            in_pass_def: false,
            in_frame_def: false,
            current_time: 0.0,
            arrays: HashMap::new(),
        }
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn set_current_time(&mut self, seconds: f32) {
        self.current_time = seconds;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Runs the bytecode from `pc = 0` to the end of the top-level
    /// stream, executing one frame's worth of opcodes. Exits cleanly at
    /// end of bytecode or when `end_frame` is hit at the top level.
    pub fn run_frame(&mut self) -> Result<(), CoreError> {
        let bytecode_len = self.module.bytecode().len();
        let mut pc = 0usize;
        let mut opcodes_decoded = 0usize;

        while pc < bytecode_len {
            opcodes_decoded += 1;
            if opcodes_decoded > MAX_OPCODES_PER_FRAME {
                return Err(CoreError::InvalidArgument(
                    "frame exceeded the per-frame opcode cap".to_string(),
                ));
            }
            let (next_pc, frame_ended) = self.step(pc)?;
            pc = next_pc;
            if frame_ended {
                break;
            }
        }
        Ok(())
    }

    /// Decodes and executes exactly one opcode at `pc`, returning the pc
    /// just past it and whether this opcode was a top-level `end_frame`.
    fn step(&mut self, pc: usize) -> Result<(usize, bool), CoreError> {
        let bc = self.module.bytecode();
        let opcode_byte = *bc.get(pc).ok_or(CoreError::UnexpectedEnd {
            what: "opcode byte",
            pc,
        })?;
        let op = Opcode::from_byte(opcode_byte).ok_or(CoreError::UnknownOpcode {
            opcode: opcode_byte,
            pc,
        })?;

        if !self.module.plugin_set.contains(op.owning_plugin()) {
            return Err(CoreError::PluginDisabled {
                plugin: op.owning_plugin().name(),
            });
        }

        let operand_pc = pc + 1;
        self.execute_one(op, operand_pc)
    }

    /// Executes `op` whose operands start at `operand_pc`, returning the
    /// pc just past its operands and whether it was a top-level
    /// `end_frame`.
    fn execute_one(&mut self, op: Opcode, operand_pc: usize) -> Result<(usize, bool), CoreError> {
        use Opcode::*;
        let bc = self.module.bytecode();

        macro_rules! varint {
            ($p:expr) => {{
                let (v, len) = varint::decode(bc, $p)?;
                (v, $p + len)
            }};
        }
        macro_rules! byte {
            ($p:expr) => {{
                let v = *bc.get($p).ok_or(CoreError::UnexpectedEnd {
                    what: "operand byte",
                    pc: $p,
                })?;
                (v, $p + 1)
            }};
        }

        match op {
            Nop => Ok((operand_pc, false)),

            CreateBuffer => {
                let (id, p) = varint!(operand_pc);
                let (size, p) = varint!(p);
                let (usage, p) = byte!(p);
                self.backend.create_buffer(id, size as u64, usage)?;
                Ok((p, false))
            }
            CreateTexture => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_texture(id, desc)?;
                Ok((p, false))
            }
            CreateSampler => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_sampler(id, desc)?;
                Ok((p, false))
            }
            CreateShader => {
                let (id, p) = varint!(operand_pc);
                let (wgsl_id, p) = varint!(p);
                let source = wgsl::resolve(&self.module, wgsl_id)?;
                self.backend.create_shader(id, &source)?;
                Ok((p, false))
            }
            CreateRenderPipeline => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_render_pipeline(id, desc)?;
                Ok((p, false))
            }
            CreateComputePipeline => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_compute_pipeline(id, desc)?;
                Ok((p, false))
            }
            CreateBindGroup => {
                let (id, p) = varint!(operand_pc);
                let (layout_id, p) = varint!(p);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_bind_group(id, layout_id, desc)?;
                Ok((p, false))
            }
            CreateBindGroupLayout => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_bind_group_layout(id, desc)?;
                Ok((p, false))
            }
            CreatePipelineLayout => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_pipeline_layout(id, desc)?;
                Ok((p, false))
            }
            CreateTextureView => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_texture_view(id, desc)?;
                Ok((p, false))
            }
            CreateQuerySet => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_query_set(id, desc)?;
                Ok((p, false))
            }
            CreateImageBitmap => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let blob = self.data_blob(data_id)?;
                self.backend.create_image_bitmap(id, blob)?;
                Ok((p, false))
            }
            CreateRenderBundle => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let desc = self.data_blob(data_id)?;
                self.backend.create_render_bundle(id, desc)?;
                Ok((p, false))
            }

            BeginRenderPass => {
                let (color_id, p) = varint!(operand_pc);
                let (load, p) = byte!(p);
                let (store, p) = byte!(p);
                let (depth_id, p) = varint!(p);
                let load = if load == 0 { LoadOp::Load } else { LoadOp::Clear };
                let store = if store == 0 { StoreOp::Store } else { StoreOp::Discard };
                let depth = if depth_id == u32::MAX { None } else { Some(depth_id) };
                self.backend.begin_render_pass(color_id, load, store, depth)?;
                Ok((p, false))
            }
            BeginComputePass => {
                self.backend.begin_compute_pass()?;
                Ok((operand_pc, false))
            }
            EndPass => {
                self.backend.end_pass()?;
                Ok((operand_pc, false))
            }
            SetPipeline => {
                let (id, p) = varint!(operand_pc);
                self.backend.set_pipeline(id)?;
                Ok((p, false))
            }
            SetBindGroup => {
                let (slot, p) = byte!(operand_pc);
                let (id, p) = varint!(p);
                self.backend.set_bind_group(slot, id)?;
                Ok((p, false))
            }
            SetVertexBuffer => {
                let (slot, p) = byte!(operand_pc);
                let (id, p) = varint!(p);
                self.backend.set_vertex_buffer(slot, id)?;
                Ok((p, false))
            }
            SetIndexBuffer => {
                let (id, p) = varint!(operand_pc);
                let (format, p) = byte!(p);
                let format = if format == 0 { IndexFormat::Uint16 } else { IndexFormat::Uint32 };
                self.backend.set_index_buffer(id, format)?;
                Ok((p, false))
            }
            Draw => {
                let (vertex_count, p) = varint!(operand_pc);
                let (instance_count, p) = varint!(p);
                let (first_vertex, p) = varint!(p);
                let (first_instance, p) = varint!(p);
                self.backend.draw(vertex_count, instance_count, first_vertex, first_instance)?;
                Ok((p, false))
            }
            DrawIndexed => {
                let (index_count, p) = varint!(operand_pc);
                let (instance_count, p) = varint!(p);
                let (first_index, p) = varint!(p);
                let (base_vertex, p) = varint!(p);
                let (first_instance, p) = varint!(p);
                self.backend.draw_indexed(
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex as i32,
                    first_instance,
                )?;
                Ok((p, false))
            }
            Dispatch => {
                let (x, p) = varint!(operand_pc);
                let (y, p) = varint!(p);
                let (z, p) = varint!(p);
                self.backend.dispatch(x, y, z)?;
                Ok((p, false))
            }
            ExecuteBundles => {
                let (n, mut p) = varint!(operand_pc);
                let mut ids = Vec::with_capacity((n as usize).min(crate::scanner::MAX_EXECUTED_BUNDLES));
                for i in 0..n {
                    let (id, next) = varint!(p);
                    p = next;
                    if (i as usize) < crate::scanner::MAX_EXECUTED_BUNDLES {
                        ids.push(id);
                    }
                }
                self.backend.execute_bundles(&ids)?;
                Ok((p, false))
            }

            WriteBuffer => {
                let (id, p) = varint!(operand_pc);
                let (offset, p) = varint!(p);
                let (data_id, p) = varint!(p);
                let data = self.data_blob(data_id)?;
                self.backend.write_buffer(id, offset as u64, data)?;
                Ok((p, false))
            }
            WriteTimeUniform => {
                let (id, p) = varint!(operand_pc);
                let (offset, p) = varint!(p);
                let (_size, p) = varint!(p);
                self.backend.write_time_uniform(id, offset as u64, self.current_time)?;
                Ok((p, false))
            }
            Submit => {
                self.backend.submit()?;
                Ok((operand_pc, false))
            }
            CopyExternalImageToTexture => {
                let (id, p) = varint!(operand_pc);
                let (data_id, p) = varint!(p);
                let blob = self.data_blob(data_id)?;
                self.backend.copy_external_image_to_texture(id, blob)?;
                Ok((p, false))
            }

            DefineFrame => {
                let (_frame_id, p) = varint!(operand_pc);
                let (_name_id, p) = varint!(p);
                self.in_frame_def = true;
                Ok((p, false))
            }
            EndFrame => {
                self.in_frame_def = false;
                self.frame_counter = self.frame_counter.wrapping_add(1);
                Ok((operand_pc, true))
            }
            DefinePass => {
                // define_pass does not execute its body; the scanner has
                // already recorded pass_ranges[id] during construction,
                // so we only need to skip past end_pass_def here.
                let scanner = Scanner::new(bc);
                let (pass_id, p) = varint!(operand_pc);
                let (_kind, p) = byte!(p);
                let (_desc_id, p) = varint!(p);
                let mut cursor = p;
                loop {
                    let byte = *bc.get(cursor).ok_or(CoreError::UnterminatedPassDefinition { pass_id })?;
                    if byte == Opcode::EndPassDef as u8 {
                        cursor += 1;
                        break;
                    }
                    let inner_op = Opcode::from_byte(byte).ok_or(CoreError::UnknownOpcode {
                        opcode: byte,
                        pc: cursor,
                    })?;
                    cursor = scanner.skip(inner_op, cursor + 1)?;
                }
                Ok((cursor, false))
            }
            EndPassDef => {
                // Reached only if control falls through a pass body
                // linearly rather than via the define_pass skip above;
                // treat as a plain boundary marker.
                self.in_pass_def = false;
                Ok((operand_pc, false))
            }
            ExecPass => {
                let (pass_id, p) = varint!(operand_pc);
                self.exec_pass_range(pass_id)?;
                Ok((p, false))
            }
            ExecPassOnce => {
                let (pass_id, p) = varint!(operand_pc);
                if self.mark_executed_once(pass_id)? {
                    self.exec_pass_range(pass_id)?;
                }
                Ok((p, false))
            }

            SetVertexBufferPool => {
                let (slot, p) = byte!(operand_pc);
                let (base, p) = varint!(p);
                let (pool_size, p) = byte!(p);
                let (offset, p) = byte!(p);
                let actual_id = resolve_pool_id(base, self.frame_counter, offset as u32, pool_size as u32)?;
                self.backend.set_vertex_buffer(slot, actual_id)?;
                Ok((p, false))
            }
            SetBindGroupPool => {
                let (slot, p) = byte!(operand_pc);
                let (base, p) = varint!(p);
                let (pool_size, p) = byte!(p);
                let (offset, p) = byte!(p);
                let actual_id = resolve_pool_id(base, self.frame_counter, offset as u32, pool_size as u32)?;
                self.backend.set_bind_group(slot, actual_id)?;
                Ok((p, false))
            }

            InitWasmModule => {
                let (id, p) = varint!(operand_pc);
                let (name_id, p) = varint!(p);
                let name = self.string_lookup(name_id)?;
                self.backend.init_wasm_module(id, name)?;
                Ok((p, false))
            }
            CallWasmFunc => {
                let (module_id, p) = varint!(operand_pc);
                let (name_id, p) = varint!(p);
                let name = self.string_lookup(name_id)?;
                let (argc, mut p) = varint!(p);
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    let (tag, next) = byte!(p);
                    p = next;
                    match tag {
                        0 => {
                            let (v, next) = varint!(p);
                            p = next;
                            args.push(v as i32);
                        }
                        1 => {
                            let bytes = bc.get(p..p + 4).ok_or(CoreError::UnexpectedEnd {
                                what: "wasm f32 arg",
                                pc: p,
                            })?;
                            p += 4;
                            args.push(f32::from_le_bytes(bytes.try_into().unwrap()) as i32);
                        }
                        other => {
                            return Err(CoreError::InvalidArgument(format!(
                                "unknown wasm arg type tag {other}"
                            )))
                        }
                    }
                }
                self.backend.call_wasm_func(module_id, name, &args)?;
                Ok((p, false))
            }
            WriteBufferFromWasm => {
                let (buffer_id, p) = varint!(operand_pc);
                let (module_id, p) = varint!(p);
                let (_name_id, p) = varint!(p);
                self.backend.write_buffer_from_wasm(buffer_id, module_id)?;
                Ok((p, false))
            }

            CreateTypedArray => {
                let (id, p) = varint!(operand_pc);
                let (length, p) = varint!(p);
                let (element_type, p) = byte!(p);
                let element_type = ElementType::from_code(element_type)?;
                self.arrays.insert(id, TypedArray::new(length, element_type));
                Ok((p, false))
            }
            FillConstant => {
                let (array_id, p) = varint!(operand_pc);
                let (bits, p) = varint!(p);
                self.array_mut(array_id)?.fill_constant(bits);
                Ok((p, false))
            }
            FillRandom => {
                let (array_id, p) = varint!(operand_pc);
                let (seed, p) = varint!(p);
                self.array_mut(array_id)?.fill_random(seed);
                Ok((p, false))
            }
            FillExpression => {
                let (array_id, p) = varint!(operand_pc);
                let (expr_id, p) = varint!(p);
                let expr = self.string_lookup(expr_id)?.to_string();
                self.array_mut(array_id)?.fill_expression(&expr)?;
                Ok((p, false))
            }
            WriteBufferFromArray => {
                let (buffer_id, p) = varint!(operand_pc);
                let (array_id, p) = varint!(p);
                let array = self
                    .arrays
                    .get(&array_id)
                    .ok_or(CoreError::ArrayNotFound { id: array_id })?;
                self.backend.write_buffer(buffer_id, 0, array.bytes())?;
                Ok((p, false))
            }
        }
    }

    /// Runs the opcodes in `pass_ranges[pass_id]`, bounded by the
    /// per-entry opcode cap, restoring nothing (callers don't nest
    /// `pc` — pass bodies never call back into the top-level cursor).
    fn exec_pass_range(&mut self, pass_id: u32) -> Result<(), CoreError> {
        let range = match self.pass_ranges.get(&pass_id) {
            Some(r) => *r,
            // Missing pass id is a silent no-op for both exec_pass and
            // exec_pass_once (§9, unified).
            None => return Ok(()),
        };

        let mut pc = range.start;
        let mut decoded = 0usize;
        while pc < range.end {
            decoded += 1;
            if decoded > MAX_OPCODES_PER_PASS_ENTRY {
                return Err(CoreError::InvalidArgument(
                    "pass execution exceeded the per-entry opcode cap".to_string(),
                ));
            }
            let (next_pc, _) = self.step(pc)?;
            pc = next_pc;
        }
        Ok(())
    }

    /// Returns `true` the first time `pass_id` is seen, `false` on every
    /// later call — the `exec_pass_once` semantics.
    fn mark_executed_once(&mut self, pass_id: u32) -> Result<bool, CoreError> {
        let idx = pass_id as usize;
        if idx >= self.executed_once.len() {
            return Err(CoreError::UnknownPassOnce { pass_id });
        }
        if self.executed_once[idx] {
            Ok(false)
        } else {
            self.executed_once[idx] = true;
            Ok(true)
        }
    }

    fn data_blob(&self, id: u32) -> Result<&[u8], CoreError> {
        self.module.data(id).ok_or(CoreError::IdOutOfRange {
            kind: "data",
            id,
            len: self.module.data_len(),
        })
    }

    fn string_lookup(&self, id: u32) -> Result<&str, CoreError> {
        let bytes = self.module.string(id).ok_or(CoreError::IdOutOfRange {
            kind: "string",
            id,
            len: self.module.strings_len(),
        })?;
        std::str::from_utf8(bytes)
            .map_err(|_| CoreError::InvalidArgument(format!("string {id} is not valid UTF-8")))
    }

    fn array_mut(&mut self, id: u32) -> Result<&mut TypedArray, CoreError> {
        self.arrays.get_mut(&id).ok_or(CoreError::ArrayNotFound { id })
    }
}

/// Resolves `base + (frame_counter + offset) mod pool_size` (§4.3.2).
fn resolve_pool_id(base: u32, frame_counter: u32, offset: u32, pool_size: u32) -> Result<u32, CoreError> {
    if pool_size == 0 {
        return Err(CoreError::InvalidResource { pool_size });
    }
    let slot = (frame_counter.wrapping_add(offset)) % pool_size;
    Ok(base + slot)
}
