//! Verification by type checking
//!
//! Class files from version 50 on carry `StackMapTable` attributes, so
//! verification is a single linear pass: the recorded frames are
//! authoritative and the live state only has to be compatible with them at
//! every join point.
//!
//! [Verification by type checking](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.10.1)

use super::errors::VerifyError;
use super::frame::Frame;
use super::interpreter::{step, Engine, MethodContext};
use super::types::VerificationType;
use crate::bytecode::decode;
use crate::classfile::RefType;
use std::collections::BTreeMap;

/// Single pass verifier driven by the method's `StackMapTable`
pub struct TypeCheckingMethodVerifier<'a> {
    ctx: MethodContext<'a>,
    frame: Frame,
    /// Recorded frames keyed by bytecode position
    recorded: BTreeMap<u32, Frame>,
    falls_through: bool,
}

impl<'a> TypeCheckingMethodVerifier<'a> {
    pub fn new(ctx: MethodContext<'a>) -> Result<TypeCheckingMethodVerifier<'a>, VerifyError> {
        let code = ctx.code;
        let frame = Frame::initial(
            ctx.class_name,
            ctx.method_name,
            ctx.is_static,
            ctx.descriptor,
            code.max_locals,
            code.max_stack,
        );
        let frame = frame.map_err(|err| err.in_method(&ctx.method_display()))?;

        let mut verifier = TypeCheckingMethodVerifier {
            ctx,
            frame,
            recorded: BTreeMap::new(),
            falls_through: true,
        };
        verifier
            .expand_stack_map_table()
            .map_err(|err| err.in_method(&verifier.ctx.method_display()))?;
        Ok(verifier)
    }

    /// Materialize the delta encoded stack map table into full frames
    fn expand_stack_map_table(&mut self) -> Result<(), VerifyError> {
        let table = match &self.ctx.code.stack_map_table {
            Some(table) => table,
            None => return Ok(()),
        };
        let mut basis = self.frame.clone();
        let mut position: Option<u32> = None;
        for entry in table {
            let delta = entry.offset_delta() as u32;
            let next = match position {
                None => delta,
                Some(previous) => previous + delta + 1,
            };
            if next as usize >= self.ctx.code.code.len() {
                return Err(VerifyError::structural(format!(
                    "stack map frame offset {} is past the end of the code",
                    next
                )));
            }
            basis
                .apply_frame_delta(entry)
                .map_err(|err| err.at(next))?;
            self.recorded.insert(next, basis.clone());
            position = Some(next);
        }
        Ok(())
    }

    pub fn verify(mut self) -> Result<(), VerifyError> {
        self.verify_exception_handlers()
            .map_err(|err| err.in_method(&self.ctx.method_display()))?;
        self.interpret()
            .map_err(|err| err.in_method(&self.ctx.method_display()))
    }

    fn verify_exception_handlers(&self) -> Result<(), VerifyError> {
        let code_length = self.ctx.code.code.len() as u32;
        let throwable = VerificationType::object(RefType::THROWABLE);
        for handler in &self.ctx.code.exception_handlers {
            if handler.start >= handler.end || handler.end as u32 > code_length {
                return Err(VerifyError::structural(format!(
                    "exception handler covers an invalid range {}..{}",
                    handler.start, handler.end
                )));
            }
            if (handler.handler as u32) >= code_length {
                return Err(VerifyError::structural(format!(
                    "exception handler entry {} is past the end of the code",
                    handler.handler
                )));
            }
            let caught = match &handler.catch_type {
                Some(class) => VerificationType::Reference(class.clone()),
                None => throwable.clone(),
            };
            if !throwable.is_assignable_from(&caught, self.ctx.graph) {
                return Err(VerifyError::type_error(format!(
                    "catch type {} is not a subclass of java/lang/Throwable",
                    caught
                )));
            }
            // The recorded frame at the handler entry must accept the caught
            // exception as its single stack value
            let entry = self.recorded.get(&(handler.handler as u32)).ok_or_else(|| {
                VerifyError::structural(format!(
                    "no stack map frame at exception handler entry {}",
                    handler.handler
                ))
            })?;
            let mut thrown = entry.clone();
            thrown.clear_stack();
            thrown.push(caught)?;
            entry
                .merge_from(&thrown, true, self.ctx.graph)
                .map_err(|err| err.at(handler.handler as u32))?;
        }
        Ok(())
    }

    fn interpret(&mut self) -> Result<(), VerifyError> {
        let ctx = self.ctx;
        let code_length = ctx.code.code.len() as u32;
        let offsets: Vec<u32> = self.recorded.keys().copied().collect();
        let mut next_offset = 0;

        let mut position = 0;
        while position < code_length {
            if offsets.get(next_offset).map_or(false, |offset| *offset < position) {
                return Err(VerifyError::structural(format!(
                    "stack map frame offset {} does not point at an instruction",
                    offsets[next_offset]
                )));
            }
            if offsets.get(next_offset) == Some(&position) {
                next_offset += 1;
                let recorded = &self.recorded[&position];
                if self.falls_through {
                    recorded
                        .merge_from(&self.frame, true, ctx.graph)
                        .map_err(|err| err.at(position))?;
                }
                self.frame.reset_from(recorded);
                self.falls_through = true;
            } else if !self.falls_through {
                return Err(VerifyError::structural(
                    "no stack map frame after an unconditional control transfer",
                )
                .at(position));
            }

            self.flow_into_handlers(position)?;

            let (insn, size) =
                decode(&ctx.code.code, position).map_err(|err| err.at(position))?;
            step(self, &ctx, &insn, position, position + size)
                .map_err(|err| err.at(position))?;
            position += size;
        }

        if self.falls_through {
            return Err(VerifyError::structural(
                "execution falls off the end of the method",
            ));
        }
        Ok(())
    }

    /// The locals at any covered position must fit the handler's entry frame
    fn flow_into_handlers(&self, position: u32) -> Result<(), VerifyError> {
        for handler in &self.ctx.code.exception_handlers {
            if !handler.covers(position) {
                continue;
            }
            // Handler existence was checked up front
            if let Some(entry) = self.recorded.get(&(handler.handler as u32)) {
                entry
                    .merge_from(&self.frame, false, self.ctx.graph)
                    .map_err(|err| err.at(position))?;
            }
        }
        Ok(())
    }
}

impl<'a> Engine for TypeCheckingMethodVerifier<'a> {
    fn frame(&self) -> &Frame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    fn set_falls_through(&mut self, falls_through: bool) {
        self.falls_through = falls_through;
    }

    fn load(&mut self, expected: VerificationType, index: u16) -> Result<(), VerifyError> {
        let actual = self.frame.load(&expected, index, self.ctx.graph)?;
        self.frame.push(actual)
    }

    fn store(
        &mut self,
        expected: VerificationType,
        index: u16,
        _position: u32,
    ) -> Result<(), VerifyError> {
        let value = self.frame.pop_with(&expected, self.ctx.graph)?;
        self.frame.store(value, index)
    }

    fn branch(&mut self, target: u32) -> Result<(), VerifyError> {
        let recorded = self.recorded.get(&target).ok_or_else(|| {
            VerifyError::structural(format!("no stack map frame at branch target {}", target))
        })?;
        recorded.merge_from(&self.frame, true, self.ctx.graph)
    }

    fn jsr(&mut self, _target: u32, _position: u32, _next: u32) -> Result<(), VerifyError> {
        Err(VerifyError::structural(
            "jsr and ret are not permitted in class files with stack map frames",
        ))
    }

    fn ret(&mut self, _index: u16, _position: u32) -> Result<(), VerifyError> {
        Err(VerifyError::structural(
            "jsr and ret are not permitted in class files with stack map frames",
        ))
    }
}
