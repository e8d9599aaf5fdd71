//! Verification by type inference
//!
//! Class files older than version 50 carry no stack maps, so the frame at
//! every merge target has to be computed as a dataflow fixpoint: targets
//! start from the first state that reaches them and are widened by lattice
//! joins until nothing changes. This pass also understands the `jsr`/`ret`
//! subroutine mechanism that the type checking pass rejects.
//!
//! [Verification by type inference](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.10.2)

use super::errors::VerifyError;
use super::frame::Frame;
use super::interpreter::{step, Engine, MethodContext};
use super::type_state::{ChainId, Subroutines, TypeState};
use super::types::{SubroutineId, VerificationType};
use crate::bytecode::{decode, Insn};
use crate::classfile::{RefType, StackMapFrame};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Decoded instruction plus its dataflow bookkeeping
pub(crate) struct InsnNode {
    pub insn: Insn,
    pub position: u32,
    pub size: u32,
    /// Reached by the dataflow walk
    pub visited: bool,
    /// Subroutine call chain in effect the last time this instruction ran
    pub chain: ChainId,
}

/// Worklist driven verifier for methods without stack maps
pub struct TypeInferencingMethodVerifier<'a> {
    ctx: MethodContext<'a>,
    insns: Vec<InsnNode>,
    index_of: HashMap<u32, usize>,
    /// Positions reachable other than by falling through
    branch_targets: HashSet<u32>,
    states: BTreeMap<u32, TypeState>,
    subroutines: Subroutines,
    /// Position of the `jsr` that returns to each position after it
    jsr_of_target: HashMap<u32, u32>,
    /// Chain levels each `ret` pops, for the inliner
    ret_frames_popped: HashMap<u32, usize>,
    /// Positions of stores that saved a return address
    ret_stores: HashSet<u32>,
    queue: VecDeque<u32>,
    live: Frame,
    chain: ChainId,
    falls_through: bool,
    has_jsr: bool,
}

impl<'a> TypeInferencingMethodVerifier<'a> {
    pub fn new(ctx: MethodContext<'a>) -> Result<TypeInferencingMethodVerifier<'a>, VerifyError> {
        let code = ctx.code;
        let mut verifier = TypeInferencingMethodVerifier {
            ctx,
            insns: vec![],
            index_of: HashMap::new(),
            branch_targets: HashSet::new(),
            states: BTreeMap::new(),
            subroutines: Subroutines::new(),
            jsr_of_target: HashMap::new(),
            ret_frames_popped: HashMap::new(),
            ret_stores: HashSet::new(),
            queue: VecDeque::new(),
            live: Frame::new(code.max_locals, code.max_stack),
            chain: ChainId::TOP,
            falls_through: true,
            has_jsr: false,
        };
        let result = verifier
            .parse_instructions()
            .and_then(|_| verifier.verify_exception_handlers());
        result.map_err(|err| err.in_method(&verifier.ctx.method_display()))?;
        Ok(verifier)
    }

    fn parse_instructions(&mut self) -> Result<(), VerifyError> {
        let code = &self.ctx.code.code;
        if code.is_empty() {
            return Err(VerifyError::structural("method has an empty code array"));
        }
        if code.len() > u16::MAX as usize + 1 {
            return Err(VerifyError::encoding_limit(format!(
                "code array of {} bytes is over the class file limit",
                code.len()
            )));
        }

        let mut targets = vec![];
        let mut position = 0;
        while (position as usize) < code.len() {
            let (insn, size) = decode(code, position).map_err(|err| err.at(position))?;
            targets.extend(insn.branch_targets());
            if let Insn::Jsr(_) = insn {
                self.has_jsr = true;
            }
            self.index_of.insert(position, self.insns.len());
            self.insns.push(InsnNode {
                insn,
                position,
                size,
                visited: false,
                chain: ChainId::TOP,
            });
            position += size;
        }

        for handler in &self.ctx.code.exception_handlers {
            targets.push(handler.handler as u32);
        }
        for target in targets {
            if !self.index_of.contains_key(&target) {
                return Err(VerifyError::structural(format!(
                    "branch target {} does not point at an instruction",
                    target
                )));
            }
            self.branch_targets.insert(target);
        }
        Ok(())
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
            if !self.index_of.contains_key(&(handler.start as u32)) {
                return Err(VerifyError::structural(format!(
                    "exception handler range starts inside an instruction at {}",
                    handler.start
                )));
            }
            if let Some(class) = &handler.catch_type {
                let caught = VerificationType::Reference(class.clone());
                if !throwable.is_assignable_from(&caught, self.ctx.graph) {
                    return Err(VerifyError::type_error(format!(
                        "catch type {} is not a subclass of java/lang/Throwable",
                        caught
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run the dataflow loop to a fixpoint
    pub fn verify(&mut self) -> Result<(), VerifyError> {
        self.run()
            .map_err(|err| err.in_method(&self.ctx.method_display()))
    }

    fn run(&mut self) -> Result<(), VerifyError> {
        let code = self.ctx.code;
        let initial = Frame::initial(
            self.ctx.class_name,
            self.ctx.method_name,
            self.ctx.is_static,
            self.ctx.descriptor,
            code.max_locals,
            code.max_stack,
        )?;
        self.states.insert(
            0,
            TypeState {
                position: 0,
                frame: initial,
                chain: ChainId::TOP,
                visited: false,
            },
        );
        self.queue.push_back(0);

        while let Some(position) = self.queue.pop_front() {
            self.interpret_from(position)?;
        }
        Ok(())
    }

    fn interpret_from(&mut self, start: u32) -> Result<(), VerifyError> {
        let ctx = self.ctx;
        let code_length = ctx.code.code.len() as u32;
        {
            let state = match self.states.get_mut(&start) {
                Some(state) => state,
                None => return Ok(()),
            };
            state.visited = true;
            self.chain = state.chain;
            let frame = state.frame.clone();
            self.live.reset_from(&frame);
        }

        let mut position = start;
        loop {
            let index = self.index_of[&position];
            self.insns[index].visited = true;
            self.insns[index].chain = self.chain;
            let insn = self.insns[index].insn.clone();
            let size = self.insns[index].size;

            self.flow_into_handlers(position)
                .map_err(|err| err.at(position))?;
            step(self, &ctx, &insn, position, position + size)
                .map_err(|err| err.at(position))?;

            if !self.falls_through {
                return Ok(());
            }
            position += size;
            if position >= code_length {
                return Err(VerifyError::structural(
                    "execution falls off the end of the method",
                ));
            }
            if self.states.contains_key(&position) {
                let live = self.live.clone();
                let chain = self.chain;
                let changed = self
                    .join_into(position, &live, chain)
                    .map_err(|err| err.at(position))?;
                let state = &self.states[&position];
                if state.visited && !changed {
                    return Ok(());
                }
                self.states.get_mut(&position).map(|state| state.visited = true);
                let frame = self.states[&position].frame.clone();
                self.chain = self.states[&position].chain;
                self.live.reset_from(&frame);
            }
        }
    }

    /// Merge a flowing state into the recorded state at `target`, creating
    /// the record on first sight; reports whether the record widened
    fn join_into(
        &mut self,
        target: u32,
        frame: &Frame,
        chain: ChainId,
    ) -> Result<bool, VerifyError> {
        if let Some(state) = self.states.get_mut(&target) {
            let mut changed = state.frame.join_from(frame, self.ctx.graph)?;
            let merged = self.subroutines.merge(state.chain, chain);
            if merged != state.chain {
                state.chain = merged;
                changed = true;
            }
            Ok(changed)
        } else {
            self.states.insert(
                target,
                TypeState {
                    position: target,
                    frame: frame.clone(),
                    chain,
                    visited: false,
                },
            );
            Ok(true)
        }
    }

    /// Merge into `target` and queue it for interpretation if it widened or
    /// was never interpreted
    fn flow_to(&mut self, target: u32, frame: &Frame, chain: ChainId) -> Result<(), VerifyError> {
        let changed = self.join_into(target, frame, chain)?;
        if changed || !self.states[&target].visited {
            self.queue.push_back(target);
        }
        Ok(())
    }

    /// An exception raised anywhere in a protected range reaches the handler
    /// with the current locals and just the caught exception on the stack
    fn flow_into_handlers(&mut self, position: u32) -> Result<(), VerifyError> {
        for index in 0..self.ctx.code.exception_handlers.len() {
            let handler = &self.ctx.code.exception_handlers[index];
            if !handler.covers(position) {
                continue;
            }
            let target = handler.handler as u32;
            let caught = match &handler.catch_type {
                Some(class) => VerificationType::Reference(class.clone()),
                None => VerificationType::object(RefType::THROWABLE),
            };
            let mut entry = self.live.clone();
            entry.clear_stack();
            entry.push(caught)?;
            let chain = self.chain;
            self.flow_to(target, &entry, chain)?;
        }
        Ok(())
    }

    fn record_access(&mut self, index: u16, width: usize) {
        for id in self.subroutines.ids_outside_in(self.chain) {
            let subroutine = self.subroutines.get_mut(id);
            subroutine.record_access(index);
            if width == 2 {
                subroutine.record_access(index + 1);
            }
        }
    }

    pub fn has_subroutines(&self) -> bool {
        self.has_jsr
    }

    /// Instructions never reached by any execution path
    pub fn has_unvisited_code(&self) -> bool {
        self.insns.iter().any(|insn| !insn.visited)
    }

    pub(crate) fn instructions(&self) -> &[InsnNode] {
        &self.insns
    }

    pub(crate) fn subroutine_pool(&self) -> &Subroutines {
        &self.subroutines
    }

    pub(crate) fn frames_popped(&self, ret_position: u32) -> usize {
        self.ret_frames_popped
            .get(&ret_position)
            .copied()
            .unwrap_or(1)
    }

    pub(crate) fn is_return_address_store(&self, position: u32) -> bool {
        self.ret_stores.contains(&position)
    }

    /// Derive a stack map table from the inferred frames
    ///
    /// Only meaningful once the code is free of subroutines; return
    /// addresses surviving into a frame would degrade to `top`.
    pub fn generate_stack_map_table(&self) -> Vec<StackMapFrame> {
        let code = self.ctx.code;
        let mut previous = match Frame::initial(
            self.ctx.class_name,
            self.ctx.method_name,
            self.ctx.is_static,
            self.ctx.descriptor,
            code.max_locals,
            code.max_stack,
        ) {
            Ok(frame) => frame,
            Err(_) => return vec![],
        };
        let mut table = vec![];
        let mut previous_position: Option<u32> = None;
        for (position, state) in &self.states {
            if !state.visited || !self.branch_targets.contains(position) {
                continue;
            }
            let delta = match previous_position {
                None => *position,
                Some(previous) => position - previous - 1,
            };
            table.push(state.frame.stack_map_frame(&previous, delta as u16));
            previous.reset_from(&state.frame);
            previous_position = Some(*position);
        }
        table
    }
}

impl<'a> Engine for TypeInferencingMethodVerifier<'a> {
    fn frame(&self) -> &Frame {
        &self.live
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.live
    }

    fn set_falls_through(&mut self, falls_through: bool) {
        self.falls_through = falls_through;
    }

    fn touch_local(&mut self, index: u16, width: u16) {
        self.record_access(index, width as usize);
    }

    fn load(&mut self, expected: VerificationType, index: u16) -> Result<(), VerifyError> {
        let actual = self.live.load(&expected, index, self.ctx.graph)?;
        self.record_access(index, actual.width());
        self.live.push(actual)
    }

    fn store(
        &mut self,
        expected: VerificationType,
        index: u16,
        position: u32,
    ) -> Result<(), VerifyError> {
        let value = self.live.pop_with(&expected, self.ctx.graph)?;
        if let VerificationType::ReturnAddress(_) = value {
            self.ret_stores.insert(position);
        }
        self.record_access(index, value.width());
        self.live.store(value, index)
    }

    fn branch(&mut self, target: u32) -> Result<(), VerifyError> {
        let live = self.live.clone();
        let chain = self.chain;
        self.flow_to(target, &live, chain)
    }

    fn jsr(&mut self, target: u32, position: u32, next: u32) -> Result<(), VerifyError> {
        let subroutine = self.subroutines.at_entry(target);
        if self
            .subroutines
            .ids_outside_in(self.chain)
            .contains(&subroutine)
        {
            return Err(VerifyError::type_error(format!(
                "recursive call to the subroutine at {}",
                target
            )));
        }

        // Uninitialized objects may not leak into the subroutine, neither
        // along the branch nor through the locals ret restores
        self.live.kill_uninitialized();

        // The caller's state is kept at the jsr itself so that ret can
        // restore the locals the subroutine leaves alone
        let caller = self.live.clone();
        let chain = self.chain;
        self.join_into(position, &caller, chain)?;

        let mut entry = self.live.clone();
        entry.push(VerificationType::ReturnAddress(subroutine))?;
        let entry_chain = self.subroutines.push(self.chain, subroutine);

        self.jsr_of_target.insert(next, position);
        let new_target = self.subroutines.get_mut(subroutine).add_ret_target(next);
        if new_target {
            // Rets already interpreted have to branch to the new target too.
            // Their recorded states are re-enqueued directly; re-walking from
            // the entry would stop at the first unchanged merge point.
            self.queue.push_back(target);
            for ret_position in self.subroutines.get(subroutine).ret_positions.clone() {
                self.queue.push_back(ret_position);
            }
        }
        self.flow_to(target, &entry, entry_chain)
    }

    fn ret(&mut self, index: u16, position: u32) -> Result<(), VerifyError> {
        let subroutine = match self.live.local(index) {
            Some(VerificationType::ReturnAddress(subroutine)) => *subroutine,
            Some(other) => {
                return Err(VerifyError::type_error(format!(
                    "ret of local {} holding {} instead of a return address",
                    index, other
                )))
            }
            None => {
                return Err(VerifyError::type_error(format!(
                    "ret of local {} is out of bounds",
                    index
                )))
            }
        };
        if subroutine == SubroutineId::MERGED {
            return Err(VerifyError::type_error(
                "ret of a return address that merged from different subroutines",
            ));
        }
        self.record_access(index, 1);

        let ids = self.subroutines.ids_outside_in(self.chain);
        let innermost = ids.iter().rposition(|id| *id == subroutine).ok_or_else(|| {
            VerifyError::type_error("ret from a subroutine that is not active")
        })?;
        let frames_popped = ids.len() - innermost;
        let mut new_chain = self.chain;
        for _ in 0..frames_popped {
            new_chain = self.subroutines.parent(new_chain);
        }
        self.ret_frames_popped.insert(position, frames_popped);
        self.subroutines
            .get_mut(subroutine)
            .add_ret_position(position);

        // Uninitialized objects may not leak out of the subroutine
        self.live.kill_uninitialized();

        // Keep a state at the ret itself so a later jsr that discovers a new
        // return target can re-interpret it without re-walking the subroutine
        let snapshot = self.live.clone();
        self.join_into(position, &snapshot, self.chain)?;
        if let Some(state) = self.states.get_mut(&position) {
            state.visited = true;
        }

        let targets = self.subroutines.get(subroutine).ret_targets.clone();
        for target in targets {
            let jsr_position = match self.jsr_of_target.get(&target) {
                Some(position) => *position,
                None => continue,
            };
            let mut outgoing = self.live.clone();
            {
                let caller = &self.states[&jsr_position].frame;
                let pool = &self.subroutines;
                outgoing
                    .restore_locals_from(caller, |local| pool.get(subroutine).accesses(local));
            }
            self.flow_to(target, &outgoing, new_chain)?;
        }
        Ok(())
    }
}
