//! Opcode scanner: bounded forward-only skip and pass discovery (§4.2).
//!
//! The scanner never executes an opcode; it only walks past one to find
//! where the next opcode starts. `skip` is the single point of truth for
//! operand widths — the dispatcher's decode path and this module must
//! agree on every opcode, or pass discovery silently desyncs (§9).

use std::collections::HashMap;

use crate::error::CoreError;
use crate::opcode::Opcode;
use crate::varint::skip_len;

/// Hard ceiling on opcodes visited by a single outer or inner scan. Keeps
/// a malformed bytecode blob from looping the scanner forever.
pub const SCAN_ITERATION_CAP: usize = 50_000;

/// Cap on `execute_bundles`' declared count; more than this still
/// advances `pc` past every varint but only the first 16 ids are kept —
/// this mirrors the emitter's own behavior (§9) and keeps scanner and
/// dispatcher positions identical.
pub const MAX_EXECUTED_BUNDLES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRange {
    pub start: usize,
    pub end: usize,
}

pub struct Scanner<'a> {
    bytecode: &'a [u8],
}

impl<'a> Scanner<'a> {
    pub fn new(bytecode: &'a [u8]) -> Self {
        Self { bytecode }
    }

    /// Advance past the operands of the opcode found at `pc` (the opcode
    /// byte itself is assumed already consumed by the caller at `pc - 1`;
    /// here `pc` is one past that byte, positioned at the start of its
    /// operands). Returns the offset one past the operands.
    pub fn skip(&self, op: Opcode, pc: usize) -> Result<usize, CoreError> {
        use Opcode::*;
        let bc = self.bytecode;
        let mut p = pc;

        macro_rules! varint {
            () => {{
                let len = skip_len(bc, p)?;
                p += len;
            }};
        }
        macro_rules! byte {
            () => {{
                if p >= bc.len() {
                    return Err(CoreError::UnexpectedEnd {
                        what: "opcode operand byte",
                        pc: p,
                    });
                }
                p += 1;
            }};
        }

        match op {
            Nop | Submit | EndPass | EndFrame | EndPassDef => {}

            CreateBuffer => {
                varint!(); // id
                varint!(); // size
                byte!(); // usage
            }
            CreateTexture | CreateSampler | CreateTextureView | CreateQuerySet
            | CreateRenderBundle => {
                varint!(); // id
                varint!(); // desc_data_id
            }
            CreateShader => {
                varint!(); // id
                varint!(); // wgsl_id
            }
            CreateBindGroup => {
                varint!(); // id
                varint!(); // layout_id
                varint!(); // entries_data_id
            }
            CreateBindGroupLayout | CreatePipelineLayout => {
                varint!(); // id
                varint!(); // desc_data_id
            }
            CreateRenderPipeline | CreateComputePipeline => {
                varint!(); // id
                varint!(); // desc_data_id
            }
            CreateImageBitmap => {
                varint!(); // id
                varint!(); // data_id
            }

            BeginRenderPass => {
                varint!(); // color_id
                byte!(); // load
                byte!(); // store
                varint!(); // depth_id
            }
            BeginComputePass => {}
            SetPipeline => {
                varint!(); // id
            }
            SetBindGroup => {
                byte!(); // slot
                varint!(); // id
            }
            SetVertexBuffer => {
                byte!(); // slot
                varint!(); // id
            }
            SetIndexBuffer => {
                varint!(); // id
                byte!(); // index_format
            }
            Draw => {
                varint!(); // vtx
                varint!(); // inst
                varint!(); // first_vtx
                varint!(); // first_inst
            }
            DrawIndexed => {
                varint!(); // idx
                varint!(); // inst
                varint!(); // first_idx
                varint!(); // base_vtx
                varint!(); // first_inst
            }
            Dispatch => {
                varint!(); // x
                varint!(); // y
                varint!(); // z
            }
            ExecuteBundles => {
                let (n, len) = crate::varint::decode(bc, p)?;
                p += len;
                for _ in 0..n {
                    varint!();
                }
            }

            WriteBuffer => {
                varint!(); // id
                varint!(); // offset
                varint!(); // data_id
            }
            WriteTimeUniform => {
                varint!(); // id
                varint!(); // offset
                varint!(); // size
            }
            CopyExternalImageToTexture => {
                varint!(); // id
                varint!(); // data_id
            }

            DefineFrame => {
                varint!(); // frame_id
                varint!(); // name_string_id
            }
            DefinePass => {
                varint!(); // pass_id
                byte!(); // kind
                varint!(); // desc_id
            }
            ExecPass | ExecPassOnce => {
                varint!(); // pass_id
            }

            SetVertexBufferPool | SetBindGroupPool => {
                byte!(); // slot
                varint!(); // base
                byte!(); // pool
                byte!(); // offset
            }

            InitWasmModule => {
                varint!(); // id
                varint!(); // name_string_id
            }
            CallWasmFunc => {
                varint!(); // module_id
                varint!(); // name_string_id
                let (argc, len) = crate::varint::decode(bc, p)?;
                p += len;
                for _ in 0..argc {
                    // argument type tag then a value whose width depends
                    // on the tag: 0=i32 (varint), 1=f32 (4 bytes fixed).
                    if p >= bc.len() {
                        return Err(CoreError::UnexpectedEnd {
                            what: "wasm arg tag",
                            pc: p,
                        });
                    }
                    let tag = bc[p];
                    p += 1;
                    match tag {
                        0 => varint!(),
                        1 => {
                            if p + 4 > bc.len() {
                                return Err(CoreError::UnexpectedEnd {
                                    what: "wasm f32 arg",
                                    pc: p,
                                });
                            }
                            p += 4;
                        }
                        _ => {
                            return Err(CoreError::UnexpectedEnd {
                                what: "wasm arg tag",
                                pc: p,
                            })
                        }
                    }
                }
            }
            WriteBufferFromWasm => {
                varint!(); // buffer_id
                varint!(); // module_id
                varint!(); // name_string_id
            }

            CreateTypedArray => {
                varint!(); // id
                varint!(); // length
                byte!(); // element_type
            }
            FillConstant => {
                varint!(); // array_id
                varint!(); // bits (reinterpreted by dispatcher)
            }
            FillRandom => {
                varint!(); // array_id
                varint!(); // seed
            }
            FillExpression => {
                varint!(); // array_id
                varint!(); // expr_string_id
            }
            WriteBufferFromArray => {
                varint!(); // buffer_id
                varint!(); // array_id
            }
        }

        Ok(p)
    }

    /// Scan the whole bytecode once, recording the `[start, end)` body of
    /// every `define_pass … end_pass_def` encountered. Malformed opcodes
    /// are skipped (catch-and-skip, §7) so one bad region doesn't hide
    /// later pass definitions; the cap bounds total work on hostile input.
    pub fn scan_pass_definitions(&self) -> HashMap<u32, PassRange> {
        let mut ranges = HashMap::new();
        let bc = self.bytecode;
        let mut pc = 0usize;
        let mut iterations = 0usize;

        while pc < bc.len() && iterations < SCAN_ITERATION_CAP {
            iterations += 1;
            let opcode_byte = bc[pc];
            let op = match Opcode::from_byte(opcode_byte) {
                Some(op) => op,
                None => {
                    pc += 1;
                    continue;
                }
            };

            if op == Opcode::DefinePass {
                match self.scan_one_pass_definition(pc + 1) {
                    Ok((pass_id, body_start, body_end, after)) => {
                        ranges.insert(pass_id, PassRange {
                            start: body_start,
                            end: body_end,
                        });
                        pc = after;
                        continue;
                    }
                    Err(_) => {
                        pc += 1;
                        continue;
                    }
                }
            }

            match self.skip(op, pc + 1) {
                Ok(after) => pc = after,
                Err(_) => pc += 1,
            }
        }

        ranges
    }

    /// Parse one `define_pass <id> <kind> <desc_id> … end_pass_def`,
    /// starting just after the `define_pass` opcode byte. Returns the
    /// pass id, the body's `[start, end)`, and the pc just past
    /// `end_pass_def`.
    fn scan_one_pass_definition(
        &self,
        operand_pc: usize,
    ) -> Result<(u32, usize, usize, usize), CoreError> {
        let bc = self.bytecode;
        let (pass_id, len) = crate::varint::decode(bc, operand_pc)?;
        let mut p = operand_pc + len;
        if p >= bc.len() {
            return Err(CoreError::UnexpectedEnd {
                what: "define_pass kind",
                pc: p,
            });
        }
        p += 1; // kind byte
        let (_desc_id, len) = crate::varint::decode(bc, p)?;
        p += len;

        let body_start = p;
        let mut iterations = 0usize;
        while p < bc.len() && iterations < SCAN_ITERATION_CAP {
            iterations += 1;
            let byte = bc[p];
            if byte == Opcode::EndPassDef as u8 {
                return Ok((pass_id, body_start, p, p + 1));
            }
            let op = match Opcode::from_byte(byte) {
                Some(op) => op,
                None => {
                    p += 1;
                    continue;
                }
            };
            p = self.skip(op, p + 1)?;
        }

        Err(CoreError::UnterminatedPassDefinition { pass_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::encode;

    fn emit_op(buf: &mut Vec<u8>, op: Opcode) {
        buf.push(op as u8);
    }

    #[test]
    fn scanner_emitter_bijection_for_every_opcode() {
        // For each opcode, emit a representative operand sequence and
        // assert the scanner's skip lands exactly after it.
        let cases: Vec<(Opcode, Vec<u8>)> = vec![
            (Opcode::Nop, vec![]),
            (Opcode::CreateBuffer, {
                let mut b = Vec::new();
                encode(1, &mut b);
                encode(1024, &mut b);
                b.push(0x20);
                b
            }),
            (Opcode::Draw, {
                let mut b = Vec::new();
                for v in [3u32, 1, 0, 0] {
                    encode(v, &mut b);
                }
                b
            }),
            (Opcode::DrawIndexed, {
                let mut b = Vec::new();
                for v in [6u32, 1, 0, 0, 0] {
                    encode(v, &mut b);
                }
                b
            }),
            (Opcode::Dispatch, {
                let mut b = Vec::new();
                for v in [8u32, 8, 1] {
                    encode(v, &mut b);
                }
                b
            }),
            (Opcode::BeginRenderPass, {
                let mut b = Vec::new();
                encode(0, &mut b);
                b.push(1);
                b.push(0);
                encode(0, &mut b);
                b
            }),
            (Opcode::SetBindGroup, {
                let mut b = vec![0u8];
                encode(5, &mut b);
                b
            }),
            (Opcode::ExecuteBundles, {
                let mut b = Vec::new();
                encode(3, &mut b);
                for v in [0u32, 1, 2] {
                    encode(v, &mut b);
                }
                b
            }),
            (Opcode::SetVertexBufferPool, {
                let mut b = vec![0u8];
                encode(0, &mut b);
                b.push(2);
                b.push(1);
                b
            }),
        ];

        for (op, operands) in cases {
            let mut buf = Vec::new();
            emit_op(&mut buf, op);
            buf.extend_from_slice(&operands);
            let scanner = Scanner::new(&buf);
            let end = scanner.skip(op, 1).unwrap();
            assert_eq!(end, buf.len(), "mismatch for {op:?}");
        }
    }

    #[test]
    fn finds_forward_referenced_pass() {
        let mut bc = Vec::new();
        // define_frame 0 { exec_pass 0 } end_frame
        bc.push(Opcode::DefineFrame as u8);
        encode(0, &mut bc);
        encode(0, &mut bc);
        bc.push(Opcode::ExecPass as u8);
        encode(0, &mut bc);
        bc.push(Opcode::EndFrame as u8);
        // define_pass 0 (render) desc=0 { dispatch } end_pass_def
        bc.push(Opcode::DefinePass as u8);
        encode(0, &mut bc);
        bc.push(0);
        encode(0, &mut bc);
        bc.push(Opcode::Dispatch as u8);
        for v in [1u32, 1, 1] {
            encode(v, &mut bc);
        }
        bc.push(Opcode::EndPassDef as u8);

        let scanner = Scanner::new(&bc);
        let ranges = scanner.scan_pass_definitions();
        assert!(ranges.contains_key(&0));
    }

    #[test]
    fn scanner_recovers_after_malformed_region_and_still_finds_later_pass() {
        // create_bind_group with 3 varints followed by unrelated opcodes,
        // then a define_pass — regression test for scanner desync (§8).
        let mut bc = Vec::new();
        bc.push(Opcode::CreateBindGroup as u8);
        encode(0, &mut bc);
        encode(0, &mut bc);
        encode(0, &mut bc);
        bc.push(Opcode::Nop as u8);
        bc.push(Opcode::DefinePass as u8);
        encode(7, &mut bc);
        bc.push(1);
        encode(0, &mut bc);
        bc.push(Opcode::EndPassDef as u8);

        let scanner = Scanner::new(&bc);
        let ranges = scanner.scan_pass_definitions();
        assert!(ranges.contains_key(&7));
    }

    #[test]
    fn scan_never_reads_past_bytecode_len() {
        let bc = vec![Opcode::DefinePass as u8, 0xff, 0xff, 0xff];
        let scanner = Scanner::new(&bc);
        let ranges = scanner.scan_pass_definitions();
        for range in ranges.values() {
            assert!(range.start <= range.end);
            assert!(range.end <= bc.len());
        }
    }
}
