//! In-memory arrays for the "data generation" opcode category (§4.3):
//! `create_typed_array`, `fill_constant`, `fill_random`, `fill_expression`,
//! and `write_buffer_from_array`. These never touch the backend directly —
//! they're staged here and handed to `Backend::write_buffer` as raw bytes.

use rand::{Rng, SeedableRng};
use rand::rngs::SmallRng;

use crate::error::CoreError;

/// The element type an array was declared with, each 4 bytes wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U32,
    I32,
    F32,
}

impl ElementType {
    pub fn from_code(code: u8) -> Result<Self, CoreError> {
        match code {
            0 => Ok(ElementType::U32),
            1 => Ok(ElementType::I32),
            2 => Ok(ElementType::F32),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown array element type code {other}"
            ))),
        }
    }

    const fn byte_width(self) -> usize {
        4
    }

    /// Bit pattern a random draw of this element type produces.
    fn random_bytes(self, rng: &mut SmallRng) -> [u8; 4] {
        match self {
            ElementType::U32 => rng.random::<u32>().to_le_bytes(),
            ElementType::I32 => rng.random::<i32>().to_le_bytes(),
            ElementType::F32 => rng.random::<f32>().to_le_bytes(),
        }
    }

    /// Bit pattern an evaluated expression result encodes to for this type.
    fn encode(self, value: f32) -> [u8; 4] {
        match self {
            ElementType::U32 => (value.max(0.0) as u32).to_le_bytes(),
            ElementType::I32 => (value as i32).to_le_bytes(),
            ElementType::F32 => value.to_le_bytes(),
        }
    }
}

/// A host-side typed array allocated by `create_typed_array`.
pub struct TypedArray {
    element_type: ElementType,
    bytes: Vec<u8>,
}

impl TypedArray {
    pub fn new(length: u32, element_type: ElementType) -> Self {
        Self {
            element_type,
            bytes: vec![0u8; length as usize * element_type.byte_width()],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `fill_constant`: every element becomes the same raw 4-byte pattern,
    /// reinterpreted by the caller rather than this type (the dispatcher
    /// decodes `bits` as a plain varint, not as a typed value).
    pub fn fill_constant(&mut self, bits: u32) {
        let word = bits.to_le_bytes();
        for chunk in self.bytes.chunks_mut(4) {
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    /// `fill_random`: deterministic per-element draws from a PRNG seeded
    /// by `seed`, so the same seed always reproduces the same array.
    pub fn fill_random(&mut self, seed: u32) {
        let mut rng = SmallRng::seed_from_u64(seed as u64);
        let width = self.element_type.byte_width();
        for chunk in self.bytes.chunks_mut(width) {
            let word = self.element_type.random_bytes(&mut rng);
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    /// `fill_expression`: evaluates `expr` once per element, with `i`
    /// bound to the element's index, and encodes the result per type.
    pub fn fill_expression(&mut self, expr: &str) -> Result<(), CoreError> {
        let width = self.element_type.byte_width();
        let count = self.bytes.len() / width;
        for idx in 0..count {
            let value = eval_expr(expr, idx as u32)?;
            let word = self.element_type.encode(value);
            self.bytes[idx * width..idx * width + width].copy_from_slice(&word[..width]);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f32),
    Var,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, CoreError> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' => i += 1,
            b'+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'i' => {
                tokens.push(Token::Var);
                i += 1;
            }
            b'0'..=b'9' | b'.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let num = expr[start..i].parse::<f32>().map_err(|_| {
                    CoreError::InvalidArgument(format!("malformed number in expression {expr:?}"))
                })?;
                tokens.push(Token::Num(num));
            }
            other => {
                return Err(CoreError::InvalidArgument(format!(
                    "unexpected byte {other:#x} in expression {expr:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

/// A tiny recursive-descent evaluator: `+ - * /`, parens, numeric
/// literals, and the element-index variable `i`. No function calls or
/// comparisons — `fill_expression` only ever needs to produce a number
/// per array slot.
fn eval_expr(expr: &str, index: u32) -> Result<f32, CoreError> {
    let tokens = tokenize(expr)?;
    let mut pos = 0;
    let value = parse_sum(&tokens, &mut pos, index as f32)?;
    if pos != tokens.len() {
        return Err(CoreError::InvalidArgument(format!(
            "trailing tokens in expression {expr:?}"
        )));
    }
    Ok(value)
}

fn parse_sum(tokens: &[Token], pos: &mut usize, index: f32) -> Result<f32, CoreError> {
    let mut value = parse_product(tokens, pos, index)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Plus) => {
                *pos += 1;
                value += parse_product(tokens, pos, index)?;
            }
            Some(Token::Minus) => {
                *pos += 1;
                value -= parse_product(tokens, pos, index)?;
            }
            _ => return Ok(value),
        }
    }
}

fn parse_product(tokens: &[Token], pos: &mut usize, index: f32) -> Result<f32, CoreError> {
    let mut value = parse_unary(tokens, pos, index)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Star) => {
                *pos += 1;
                value *= parse_unary(tokens, pos, index)?;
            }
            Some(Token::Slash) => {
                *pos += 1;
                let rhs = parse_unary(tokens, pos, index)?;
                if rhs == 0.0 {
                    return Err(CoreError::InvalidArgument(
                        "division by zero in fill_expression".to_string(),
                    ));
                }
                value /= rhs;
            }
            _ => return Ok(value),
        }
    }
}

fn parse_unary(tokens: &[Token], pos: &mut usize, index: f32) -> Result<f32, CoreError> {
    if let Some(Token::Minus) = tokens.get(*pos) {
        *pos += 1;
        return Ok(-parse_unary(tokens, pos, index)?);
    }
    parse_atom(tokens, pos, index)
}

fn parse_atom(tokens: &[Token], pos: &mut usize, index: f32) -> Result<f32, CoreError> {
    match tokens.get(*pos) {
        Some(Token::Num(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Token::Var) => {
            *pos += 1;
            Ok(index)
        }
        Some(Token::LParen) => {
            *pos += 1;
            let value = parse_sum(tokens, pos, index)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                    Ok(value)
                }
                _ => Err(CoreError::InvalidArgument(
                    "unmatched '(' in expression".to_string(),
                )),
            }
        }
        _ => Err(CoreError::InvalidArgument(
            "expected a number, 'i', or '(' in expression".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_constant_repeats_raw_bits() {
        let mut array = TypedArray::new(3, ElementType::U32);
        array.fill_constant(0x0102_0304);
        assert_eq!(
            array.bytes(),
            &[0x04, 0x03, 0x02, 0x01, 0x04, 0x03, 0x02, 0x01, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn fill_random_is_deterministic_per_seed() {
        let mut a = TypedArray::new(8, ElementType::F32);
        a.fill_random(42);
        let mut b = TypedArray::new(8, ElementType::F32);
        b.fill_random(42);
        assert_eq!(a.bytes(), b.bytes());

        let mut c = TypedArray::new(8, ElementType::F32);
        c.fill_random(7);
        assert_ne!(a.bytes(), c.bytes());
    }

    #[test]
    fn fill_expression_evaluates_per_index() {
        let mut array = TypedArray::new(4, ElementType::I32);
        array.fill_expression("i * 2 + 1").unwrap();
        let words: Vec<i32> = array
            .bytes()
            .chunks(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(words, vec![1, 3, 5, 7]);
    }

    #[test]
    fn fill_expression_rejects_malformed_input() {
        let mut array = TypedArray::new(1, ElementType::F32);
        assert!(array.fill_expression("i +").is_err());
        assert!(array.fill_expression("i / 0").is_err());
    }
}
