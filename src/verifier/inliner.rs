//! Subroutine inlining
//!
//! The `jsr`/`ret` mechanism shares one subroutine body between call sites,
//! which stack maps cannot describe. This rewriter duplicates each subroutine
//! body once per calling context: `jsr` becomes a `goto` into the copy for
//! its context, `ret` becomes a `goto` back to the copy of the return
//! position, and the stores that saved return addresses disappear. Exception,
//! line number and local variable tables are projected onto the copies.
//!
//! The rewritten method has the same behavior but no subroutines, so it can
//! be verified again and given a stack map table.

use super::errors::VerifyError;
use super::inference::TypeInferencingMethodVerifier;
use super::interpreter::MethodContext;
use super::types::SubroutineId;
use crate::bytecode::{opcodes, Comparison, Insn};
use crate::classfile::{BaseType, CodeAttribute, ExceptionHandler, LineNumberEntry, LocalVariableEntry};
use byteorder::WriteBytesExt;
use std::collections::HashMap;

/// One inlining context: a concrete path of subroutine calls
struct SubroutineCall {
    parent: Option<usize>,
    /// Subroutine identities from the outermost call inward; empty for the
    /// top level
    path: Vec<SubroutineId>,
    /// Position the caller resumes at, for non top level contexts
    return_position: Option<u32>,
}

#[derive(Clone)]
enum CopyKind {
    Normal,
    /// A store of a return address; emits nothing
    Skip,
    /// `jsr` rewritten to a `goto` into the copy for the child context
    JsrGoto { child: usize, target: u32, wide: bool },
    /// `ret` rewritten to a `goto` back to a return position copy
    RetGoto { target: u32, target_call: usize },
}

struct InstructionCopy {
    node: usize,
    call: usize,
    kind: CopyKind,
    new_position: u32,
    size: u32,
}

pub struct SubroutineInliner<'a, 'v> {
    verifier: &'v TypeInferencingMethodVerifier<'a>,
    ctx: MethodContext<'a>,
    calls: Vec<SubroutineCall>,
    copies: Vec<InstructionCopy>,
    /// Copy indices per original position
    copies_at: HashMap<u32, Vec<usize>>,
}

impl<'a, 'v> SubroutineInliner<'a, 'v> {
    pub fn new(
        verifier: &'v TypeInferencingMethodVerifier<'a>,
        ctx: MethodContext<'a>,
    ) -> SubroutineInliner<'a, 'v> {
        SubroutineInliner {
            verifier,
            ctx,
            calls: vec![SubroutineCall {
                parent: None,
                path: vec![],
                return_position: None,
            }],
            copies: vec![],
            copies_at: HashMap::new(),
        }
    }

    pub fn rewrite(mut self) -> Result<CodeAttribute, VerifyError> {
        let method = self.ctx.method_display();
        self.plan_copies().map_err(|err| err.in_method(&method))?;
        self.assign_positions().map_err(|err| err.in_method(&method))?;
        let code = self.emit().map_err(|err| err.in_method(&method))?;
        self.project_tables(code)
            .map_err(|err| err.in_method(&method))
    }

    /// Walk each context over the original instructions, keeping the ones
    /// whose recorded call chain belongs to that context
    fn plan_copies(&mut self) -> Result<(), VerifyError> {
        let pool = self.verifier.subroutine_pool();
        let mut pending = 0;
        while pending < self.calls.len() {
            let call = pending;
            pending += 1;
            for (node_index, node) in self.verifier.instructions().iter().enumerate() {
                if !node.visited {
                    continue;
                }
                let chain = pool.ids_outside_in(node.chain);
                if !path_matches(&self.calls[call].path, &chain) {
                    continue;
                }
                let kind = match &node.insn {
                    Insn::Jsr(target) => {
                        let subroutine = pool.id_at_entry(*target).ok_or_else(|| {
                            VerifyError::structural(format!(
                                "no subroutine was entered at {}",
                                target
                            ))
                        })?;
                        let mut path = self.calls[call].path.clone();
                        path.push(subroutine);
                        self.calls.push(SubroutineCall {
                            parent: Some(call),
                            path,
                            return_position: Some(node.position + node.size),
                        });
                        CopyKind::JsrGoto {
                            child: self.calls.len() - 1,
                            target: *target,
                            wide: node.size == 5,
                        }
                    }
                    Insn::Ret(_) => {
                        let popped = self.verifier.frames_popped(node.position);
                        let mut return_call = call;
                        for _ in 1..popped {
                            return_call = self.calls[return_call].parent.ok_or_else(|| {
                                VerifyError::structural(
                                    "ret pops more subroutine frames than are active",
                                )
                            })?;
                        }
                        let target = self.calls[return_call].return_position.ok_or_else(|| {
                            VerifyError::structural("ret outside of any subroutine")
                        })?;
                        let target_call = match self.calls[return_call].parent {
                            Some(parent) => parent,
                            None => {
                                return Err(VerifyError::structural(
                                    "ret outside of any subroutine",
                                ))
                            }
                        };
                        CopyKind::RetGoto { target, target_call }
                    }
                    Insn::AStore(_) if self.verifier.is_return_address_store(node.position) => {
                        CopyKind::Skip
                    }
                    _ => CopyKind::Normal,
                };
                self.copies_at
                    .entry(node.position)
                    .or_insert_with(Vec::new)
                    .push(self.copies.len());
                self.copies.push(InstructionCopy {
                    node: node_index,
                    call,
                    kind,
                    new_position: 0,
                    size: 0,
                });
            }
        }
        Ok(())
    }

    fn assign_positions(&mut self) -> Result<(), VerifyError> {
        let mut position = 0u32;
        for copy in &mut self.copies {
            let node = &self.verifier.instructions()[copy.node];
            copy.new_position = position;
            copy.size = match &copy.kind {
                CopyKind::Skip => 0,
                CopyKind::JsrGoto { wide, .. } => {
                    if *wide {
                        5
                    } else {
                        3
                    }
                }
                CopyKind::RetGoto { .. } => 3,
                CopyKind::Normal => encoded_size(&node.insn, node.size, position),
            };
            position += copy.size;
        }
        if position > u16::MAX as u32 + 1 {
            return Err(VerifyError::encoding_limit(format!(
                "inlined code of {} bytes is over the class file limit",
                position
            )));
        }
        Ok(())
    }

    /// New position of the copy of `old` visible from `call`: the context
    /// itself first, then its ancestors
    fn resolve(&self, old: u32, call: usize) -> Result<u32, VerifyError> {
        let mut current = Some(call);
        while let Some(candidate) = current {
            if let Some(indices) = self.copies_at.get(&old) {
                for index in indices {
                    if self.copies[*index].call == candidate {
                        return Ok(self.copies[*index].new_position);
                    }
                }
            }
            current = self.calls[candidate].parent;
        }
        Err(VerifyError::structural(format!(
            "branch target {} is not visible from its subroutine context",
            old
        )))
    }

    fn branch_offset(&self, from: u32, to: u32, wide: bool) -> Result<i32, VerifyError> {
        let offset = to as i64 - from as i64;
        let fits = if wide {
            i32::try_from(offset).is_ok()
        } else {
            i16::try_from(offset).is_ok()
        };
        if !fits {
            return Err(VerifyError::encoding_limit(format!(
                "branch offset {} does not fit after inlining",
                offset
            )));
        }
        Ok(offset as i32)
    }

    fn emit(&self) -> Result<Vec<u8>, VerifyError> {
        let mut out: Vec<u8> = vec![];
        for copy in &self.copies {
            let node = &self.verifier.instructions()[copy.node];
            match &copy.kind {
                CopyKind::Skip => (),
                CopyKind::JsrGoto {
                    child,
                    target,
                    wide,
                } => {
                    let resolved = self.resolve(*target, *child)?;
                    let offset = self.branch_offset(copy.new_position, resolved, *wide)?;
                    if *wide {
                        out.push(opcodes::GOTO_W);
                        write_i32(&mut out, offset);
                    } else {
                        out.push(opcodes::GOTO);
                        write_i16(&mut out, offset as i16);
                    }
                }
                CopyKind::RetGoto {
                    target,
                    target_call,
                } => {
                    let resolved = self.resolve(*target, *target_call)?;
                    let offset = self.branch_offset(copy.new_position, resolved, false)?;
                    out.push(opcodes::GOTO);
                    write_i16(&mut out, offset as i16);
                }
                CopyKind::Normal => {
                    self.emit_normal(&mut out, copy, node.size)?;
                }
            }
        }
        Ok(out)
    }

    fn emit_normal(
        &self,
        out: &mut Vec<u8>,
        copy: &InstructionCopy,
        original_size: u32,
    ) -> Result<(), VerifyError> {
        use opcodes::*;

        let node = &self.verifier.instructions()[copy.node];
        let position = copy.new_position;
        let resolve16 = |old: &u32, out_position: u32| -> Result<i16, VerifyError> {
            let resolved = self.resolve(*old, copy.call)?;
            Ok(self.branch_offset(out_position, resolved, false)? as i16)
        };

        match &node.insn {
            Insn::Nop => out.push(NOP),
            Insn::AConstNull => out.push(ACONST_NULL),
            Insn::IConst(value) => match value {
                -1..=5 => out.push((ICONST_0 as i32 + value) as u8),
                -128..=127 => {
                    out.push(BIPUSH);
                    out.push(*value as i8 as u8);
                }
                _ => {
                    out.push(SIPUSH);
                    write_i16(out, *value as i16);
                }
            },
            Insn::LConst(value) => out.push(LCONST_0 + *value as u8),
            Insn::FConst(value) => out.push(FCONST_0 + *value as u8),
            Insn::DConst(value) => out.push(DCONST_0 + *value as u8),
            Insn::Ldc(index) => {
                if *index <= u8::MAX as u16 {
                    out.push(LDC);
                    out.push(*index as u8);
                } else {
                    out.push(LDC_W);
                    write_u16(out, *index);
                }
            }
            Insn::Ldc2(index) => {
                out.push(LDC2_W);
                write_u16(out, *index);
            }
            Insn::ILoad(index) => emit_local(out, ILOAD, ILOAD_0, *index),
            Insn::LLoad(index) => emit_local(out, LLOAD, LLOAD_0, *index),
            Insn::FLoad(index) => emit_local(out, FLOAD, FLOAD_0, *index),
            Insn::DLoad(index) => emit_local(out, DLOAD, DLOAD_0, *index),
            Insn::ALoad(index) => emit_local(out, ALOAD, ALOAD_0, *index),
            Insn::IStore(index) => emit_local(out, ISTORE, ISTORE_0, *index),
            Insn::LStore(index) => emit_local(out, LSTORE, LSTORE_0, *index),
            Insn::FStore(index) => emit_local(out, FSTORE, FSTORE_0, *index),
            Insn::DStore(index) => emit_local(out, DSTORE, DSTORE_0, *index),
            Insn::AStore(index) => emit_local(out, ASTORE, ASTORE_0, *index),
            Insn::IInc(index, amount) => {
                if *index <= u8::MAX as u16 && i8::try_from(*amount).is_ok() {
                    out.push(IINC);
                    out.push(*index as u8);
                    out.push(*amount as i8 as u8);
                } else {
                    out.push(WIDE);
                    out.push(IINC);
                    write_u16(out, *index);
                    write_i16(out, *amount);
                }
            }
            Insn::If(comparison, target) => {
                out.push(IFEQ + comparison_index(*comparison));
                let offset = resolve16(target, position)?;
                write_i16(out, offset);
            }
            Insn::IfICmp(comparison, target) => {
                out.push(IF_ICMPEQ + comparison_index(*comparison));
                let offset = resolve16(target, position)?;
                write_i16(out, offset);
            }
            Insn::IfACmp(equal, target) => {
                out.push(if *equal { IF_ACMPEQ } else { IF_ACMPNE });
                let offset = resolve16(target, position)?;
                write_i16(out, offset);
            }
            Insn::IfNull(null, target) => {
                out.push(if *null { IFNULL } else { IFNONNULL });
                let offset = resolve16(target, position)?;
                write_i16(out, offset);
            }
            Insn::Goto(target) => {
                let resolved = self.resolve(*target, copy.call)?;
                if original_size == 5 {
                    out.push(GOTO_W);
                    write_i32(out, self.branch_offset(position, resolved, true)?);
                } else {
                    out.push(GOTO);
                    write_i16(out, self.branch_offset(position, resolved, false)? as i16);
                }
            }
            Insn::TableSwitch {
                default,
                low,
                targets,
            } => {
                out.push(TABLESWITCH);
                pad_switch(out, position);
                let offset = self.resolve(*default, copy.call)? as i64 - position as i64;
                write_i32(out, offset as i32);
                write_i32(out, *low);
                write_i32(out, *low + targets.len() as i32 - 1);
                for target in targets {
                    let resolved = self.resolve(*target, copy.call)?;
                    write_i32(out, (resolved as i64 - position as i64) as i32);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                out.push(LOOKUPSWITCH);
                pad_switch(out, position);
                let offset = self.resolve(*default, copy.call)? as i64 - position as i64;
                write_i32(out, offset as i32);
                write_i32(out, pairs.len() as i32);
                for (matched, target) in pairs {
                    write_i32(out, *matched);
                    let resolved = self.resolve(*target, copy.call)?;
                    write_i32(out, (resolved as i64 - position as i64) as i32);
                }
            }
            Insn::GetStatic(index) => emit_indexed(out, GETSTATIC, *index),
            Insn::PutStatic(index) => emit_indexed(out, PUTSTATIC, *index),
            Insn::GetField(index) => emit_indexed(out, GETFIELD, *index),
            Insn::PutField(index) => emit_indexed(out, PUTFIELD, *index),
            Insn::InvokeVirtual(index) => emit_indexed(out, INVOKEVIRTUAL, *index),
            Insn::InvokeSpecial(index) => emit_indexed(out, INVOKESPECIAL, *index),
            Insn::InvokeStatic(index) => emit_indexed(out, INVOKESTATIC, *index),
            Insn::InvokeInterface(index, count) => {
                out.push(INVOKEINTERFACE);
                write_u16(out, *index);
                out.push(*count);
                out.push(0);
            }
            Insn::InvokeDynamic(index) => {
                out.push(INVOKEDYNAMIC);
                write_u16(out, *index);
                out.push(0);
                out.push(0);
            }
            Insn::New(index) => emit_indexed(out, NEW, *index),
            Insn::NewArray(element) => {
                out.push(NEWARRAY);
                out.push(newarray_code(*element));
            }
            Insn::ANewArray(index) => emit_indexed(out, ANEWARRAY, *index),
            Insn::CheckCast(index) => emit_indexed(out, CHECKCAST, *index),
            Insn::InstanceOf(index) => emit_indexed(out, INSTANCEOF, *index),
            Insn::MultiANewArray(index, dimensions) => {
                out.push(MULTIANEWARRAY);
                write_u16(out, *index);
                out.push(*dimensions);
            }
            Insn::Jsr(_) | Insn::Ret(_) => {
                // Rewritten as CopyKind variants, never emitted verbatim
                return Err(VerifyError::structural("subroutine instruction survived inlining"));
            }
            other => out.push(plain_opcode(other)),
        }
        Ok(())
    }

    /// Project the exception, line number and local variable tables onto the
    /// inlined copies
    fn project_tables(&self, code: Vec<u8>) -> Result<CodeAttribute, VerifyError> {
        let original = self.ctx.code;
        let mut handlers = vec![];
        for handler in &original.exception_handlers {
            let mut open: Option<(u32, u32, u32)> = None;
            for copy in &self.copies {
                if matches!(copy.kind, CopyKind::Skip) {
                    continue;
                }
                let node = &self.verifier.instructions()[copy.node];
                let covered = handler.covers(node.position);
                let target = if covered {
                    Some(self.resolve(handler.handler as u32, copy.call)?)
                } else {
                    None
                };
                match (&mut open, target) {
                    (Some((_, end, entry)), Some(target)) if *entry == target => {
                        *end = copy.new_position + copy.size;
                    }
                    (current, target) => {
                        if let Some((start, end, entry)) = current.take() {
                            handlers.push(make_handler(start, end, entry, handler)?);
                        }
                        if let Some(entry) = target {
                            *current = Some((
                                copy.new_position,
                                copy.new_position + copy.size,
                                entry,
                            ));
                        }
                    }
                }
            }
            if let Some((start, end, entry)) = open {
                handlers.push(make_handler(start, end, entry, handler)?);
            }
        }

        let mut line_numbers: Vec<LineNumberEntry> = vec![];
        if !original.line_numbers.is_empty() {
            let mut last_line = None;
            for copy in &self.copies {
                if matches!(copy.kind, CopyKind::Skip) {
                    continue;
                }
                let node = &self.verifier.instructions()[copy.node];
                let line = original
                    .line_numbers
                    .iter()
                    .filter(|entry| entry.start as u32 <= node.position)
                    .max_by_key(|entry| entry.start)
                    .map(|entry| entry.line);
                if let Some(line) = line {
                    if last_line != Some(line) {
                        line_numbers.push(LineNumberEntry {
                            start: copy.new_position as u16,
                            line,
                        });
                        last_line = Some(line);
                    }
                }
            }
        }

        let mut local_variables = vec![];
        for variable in &original.local_variables {
            let mut open: Option<(u32, u32)> = None;
            for copy in &self.copies {
                if matches!(copy.kind, CopyKind::Skip) {
                    continue;
                }
                let node = &self.verifier.instructions()[copy.node];
                let covered = variable.covers(node.position);
                match (&mut open, covered) {
                    (Some((_, end)), true) => *end = copy.new_position + copy.size,
                    (current, covered) => {
                        if let Some((start, end)) = current.take() {
                            local_variables.push(make_local_variable(start, end, variable));
                        }
                        if covered {
                            *current =
                                Some((copy.new_position, copy.new_position + copy.size));
                        }
                    }
                }
            }
            if let Some((start, end)) = open {
                local_variables.push(make_local_variable(start, end, variable));
            }
        }

        Ok(CodeAttribute {
            max_stack: original.max_stack,
            max_locals: original.max_locals,
            code,
            exception_handlers: handlers,
            stack_map_table: None,
            line_numbers,
            local_variables,
        })
    }
}

fn path_matches(path: &[SubroutineId], chain: &[SubroutineId]) -> bool {
    path.len() == chain.len()
        && path
            .iter()
            .zip(chain)
            .all(|(own, seen)| *seen == SubroutineId::MERGED || own == seen)
}

fn make_handler(
    start: u32,
    end: u32,
    entry: u32,
    original: &ExceptionHandler,
) -> Result<ExceptionHandler, VerifyError> {
    if end > u16::MAX as u32 {
        return Err(VerifyError::encoding_limit(format!(
            "exception handler end {} does not fit after inlining",
            end
        )));
    }
    Ok(ExceptionHandler {
        start: start as u16,
        end: end as u16,
        handler: entry as u16,
        catch_type: original.catch_type.clone(),
    })
}

fn make_local_variable(
    start: u32,
    end: u32,
    original: &LocalVariableEntry,
) -> LocalVariableEntry {
    LocalVariableEntry {
        start: start as u16,
        length: (end - start) as u16,
        name: original.name.clone(),
        descriptor: original.descriptor.clone(),
        index: original.index,
    }
}

fn comparison_index(comparison: Comparison) -> u8 {
    match comparison {
        Comparison::Eq => 0,
        Comparison::Ne => 1,
        Comparison::Lt => 2,
        Comparison::Ge => 3,
        Comparison::Gt => 4,
        Comparison::Le => 5,
    }
}

fn newarray_code(element: BaseType) -> u8 {
    match element {
        BaseType::Boolean => 4,
        BaseType::Char => 5,
        BaseType::Float => 6,
        BaseType::Double => 7,
        BaseType::Byte => 8,
        BaseType::Short => 9,
        BaseType::Int => 10,
        BaseType::Long => 11,
    }
}

fn emit_local(out: &mut Vec<u8>, opcode: u8, short_base: u8, index: u16) {
    if index <= 3 {
        out.push(short_base + index as u8);
    } else if index <= u8::MAX as u16 {
        out.push(opcode);
        out.push(index as u8);
    } else {
        out.push(opcodes::WIDE);
        out.push(opcode);
        write_u16(out, index);
    }
}

fn emit_indexed(out: &mut Vec<u8>, opcode: u8, index: u16) {
    out.push(opcode);
    write_u16(out, index);
}

fn pad_switch(out: &mut Vec<u8>, position: u32) {
    let padding = (4 - (position + 1) % 4) % 4;
    for _ in 0..padding {
        out.push(0);
    }
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    let _ = WriteBytesExt::write_u16::<byteorder::BigEndian>(out, value);
}

fn write_i16(out: &mut Vec<u8>, value: i16) {
    let _ = WriteBytesExt::write_i16::<byteorder::BigEndian>(out, value);
}

fn write_i32(out: &mut Vec<u8>, value: i32) {
    let _ = WriteBytesExt::write_i32::<byteorder::BigEndian>(out, value);
}

/// Size the re-encoded form of `insn` will take at `position`
fn encoded_size(insn: &Insn, original_size: u32, position: u32) -> u32 {
    match insn {
        Insn::IConst(value) => match value {
            -1..=5 => 1,
            -128..=127 => 2,
            _ => 3,
        },
        Insn::LConst(_) | Insn::FConst(_) | Insn::DConst(_) => 1,
        Insn::Ldc(index) => {
            if *index <= u8::MAX as u16 {
                2
            } else {
                3
            }
        }
        Insn::Ldc2(_) => 3,
        Insn::ILoad(index)
        | Insn::LLoad(index)
        | Insn::FLoad(index)
        | Insn::DLoad(index)
        | Insn::ALoad(index)
        | Insn::IStore(index)
        | Insn::LStore(index)
        | Insn::FStore(index)
        | Insn::DStore(index)
        | Insn::AStore(index) => {
            if *index <= 3 {
                1
            } else if *index <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        Insn::IInc(index, amount) => {
            if *index <= u8::MAX as u16 && i8::try_from(*amount).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::If(..) | Insn::IfICmp(..) | Insn::IfACmp(..) | Insn::IfNull(..) => 3,
        Insn::Goto(_) => original_size,
        Insn::TableSwitch { targets, .. } => {
            1 + (4 - (position + 1) % 4) % 4 + 12 + 4 * targets.len() as u32
        }
        Insn::LookupSwitch { pairs, .. } => {
            1 + (4 - (position + 1) % 4) % 4 + 8 + 8 * pairs.len() as u32
        }
        Insn::GetStatic(_)
        | Insn::PutStatic(_)
        | Insn::GetField(_)
        | Insn::PutField(_)
        | Insn::InvokeVirtual(_)
        | Insn::InvokeSpecial(_)
        | Insn::InvokeStatic(_)
        | Insn::New(_)
        | Insn::ANewArray(_)
        | Insn::CheckCast(_)
        | Insn::InstanceOf(_) => 3,
        Insn::InvokeInterface(..) | Insn::InvokeDynamic(_) => 5,
        Insn::NewArray(_) => 2,
        Insn::MultiANewArray(..) => 4,
        Insn::Jsr(_) | Insn::Ret(_) => original_size,
        _ => 1,
    }
}

/// Opcode for the operand free instructions
fn plain_opcode(insn: &Insn) -> u8 {
    use opcodes::*;
    match insn {
        Insn::IALoad => IALOAD,
        Insn::LALoad => LALOAD,
        Insn::FALoad => FALOAD,
        Insn::DALoad => DALOAD,
        Insn::AALoad => AALOAD,
        Insn::BALoad => BALOAD,
        Insn::CALoad => CALOAD,
        Insn::SALoad => SALOAD,
        Insn::IAStore => IASTORE,
        Insn::LAStore => LASTORE,
        Insn::FAStore => FASTORE,
        Insn::DAStore => DASTORE,
        Insn::AAStore => AASTORE,
        Insn::BAStore => BASTORE,
        Insn::CAStore => CASTORE,
        Insn::SAStore => SASTORE,
        Insn::Pop => POP,
        Insn::Pop2 => POP2,
        Insn::Dup => DUP,
        Insn::DupX1 => DUP_X1,
        Insn::DupX2 => DUP_X2,
        Insn::Dup2 => DUP2,
        Insn::Dup2X1 => DUP2_X1,
        Insn::Dup2X2 => DUP2_X2,
        Insn::Swap => SWAP,
        Insn::IAdd => IADD,
        Insn::LAdd => LADD,
        Insn::FAdd => FADD,
        Insn::DAdd => DADD,
        Insn::ISub => ISUB,
        Insn::LSub => LSUB,
        Insn::FSub => FSUB,
        Insn::DSub => DSUB,
        Insn::IMul => IMUL,
        Insn::LMul => LMUL,
        Insn::FMul => FMUL,
        Insn::DMul => DMUL,
        Insn::IDiv => IDIV,
        Insn::LDiv => LDIV,
        Insn::FDiv => FDIV,
        Insn::DDiv => DDIV,
        Insn::IRem => IREM,
        Insn::LRem => LREM,
        Insn::FRem => FREM,
        Insn::DRem => DREM,
        Insn::INeg => INEG,
        Insn::LNeg => LNEG,
        Insn::FNeg => FNEG,
        Insn::DNeg => DNEG,
        Insn::IShl => ISHL,
        Insn::LShl => LSHL,
        Insn::IShr => ISHR,
        Insn::LShr => LSHR,
        Insn::IUShr => IUSHR,
        Insn::LUShr => LUSHR,
        Insn::IAnd => IAND,
        Insn::LAnd => LAND,
        Insn::IOr => IOR,
        Insn::LOr => LOR,
        Insn::IXor => IXOR,
        Insn::LXor => LXOR,
        Insn::I2L => I2L,
        Insn::I2F => I2F,
        Insn::I2D => I2D,
        Insn::L2I => L2I,
        Insn::L2F => L2F,
        Insn::L2D => L2D,
        Insn::F2I => F2I,
        Insn::F2L => F2L,
        Insn::F2D => F2D,
        Insn::D2I => D2I,
        Insn::D2L => D2L,
        Insn::D2F => D2F,
        Insn::I2B => I2B,
        Insn::I2C => I2C,
        Insn::I2S => I2S,
        Insn::LCmp => LCMP,
        Insn::FCmpL => FCMPL,
        Insn::FCmpG => FCMPG,
        Insn::DCmpL => DCMPL,
        Insn::DCmpG => DCMPG,
        Insn::IReturn => IRETURN,
        Insn::LReturn => LRETURN,
        Insn::FReturn => FRETURN,
        Insn::DReturn => DRETURN,
        Insn::AReturn => ARETURN,
        Insn::Return => RETURN,
        Insn::ArrayLength => ARRAYLENGTH,
        Insn::AThrow => ATHROW,
        Insn::MonitorEnter => MONITORENTER,
        Insn::MonitorExit => MONITOREXIT,
        _ => NOP,
    }
}
