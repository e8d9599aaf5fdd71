//! Abstract machine state at one code position: types of the locals and the
//! operand stack

use super::errors::VerifyError;
use super::types::{ClassGraph, VerificationType};
use crate::classfile::{MethodDescriptor, RefType, StackMapFrame, VerificationTypeInfo};

/// Types in the locals and on the operand stack
///
/// Both arrays are slot addressed: a `Long` or `Double` occupies its own slot
/// plus a following [`VerificationType::Second`] slot. Unset locals hold
/// [`VerificationType::Top`]. Capacities are fixed at construction from
/// `max_locals` and `max_stack`.
#[derive(Clone, PartialEq, Debug)]
pub struct Frame {
    locals: Vec<VerificationType>,
    stack: Vec<VerificationType>,
    max_stack: usize,
    /// Slots at or above this index are all `Top`
    active_locals: usize,
}

impl Frame {
    pub fn new(max_locals: u16, max_stack: u16) -> Frame {
        Frame {
            locals: vec![VerificationType::Top; max_locals as usize],
            stack: Vec::with_capacity(max_stack as usize),
            max_stack: max_stack as usize,
            active_locals: 0,
        }
    }

    /// Entry state of a method: `this` (when instance) followed by the
    /// declared parameters
    pub fn initial(
        class_name: &str,
        method_name: &str,
        is_static: bool,
        descriptor: &MethodDescriptor,
        max_locals: u16,
        max_stack: u16,
    ) -> Result<Frame, VerifyError> {
        let mut frame = Frame::new(max_locals, max_stack);
        let mut index = 0;
        if !is_static {
            let this = if method_name == "<init>" && class_name != RefType::OBJECT {
                VerificationType::UninitializedThis
            } else {
                VerificationType::object(class_name)
            };
            frame.store(this, 0)?;
            index = 1;
        }
        for parameter in &descriptor.parameters {
            let parameter = VerificationType::of_field(parameter);
            let width = parameter.width();
            frame
                .store(parameter, index)
                .map_err(|_| VerifyError::structural("arguments do not fit in max_locals"))?;
            index += width as u16;
        }
        Ok(frame)
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn active_locals(&self) -> usize {
        self.active_locals
    }

    pub fn local(&self, index: u16) -> Option<&VerificationType> {
        self.locals.get(index as usize)
    }

    pub fn top(&self) -> Option<&VerificationType> {
        self.stack.last()
    }

    /// Push a value, accounting for its slot width
    pub fn push(&mut self, value: VerificationType) -> Result<(), VerifyError> {
        let width = value.width();
        if self.stack.len() + width > self.max_stack {
            return Err(VerifyError::structural("operand stack overflow"));
        }
        self.stack.push(value);
        if width == 2 {
            self.stack.push(VerificationType::Second);
        }
        Ok(())
    }

    /// Pop a value that must be usable where `expected` is required, and
    /// return what was actually there
    pub fn pop_with(
        &mut self,
        expected: &VerificationType,
        graph: &ClassGraph,
    ) -> Result<VerificationType, VerifyError> {
        if expected.width() == 2 {
            match self.pop_slot()? {
                VerificationType::Second => (),
                other => {
                    return Err(VerifyError::type_error(format!(
                        "expected {} on the stack, found {}",
                        expected, other
                    )))
                }
            }
        }
        let actual = self.pop_slot()?;
        if !expected.is_assignable_from(&actual, graph) {
            return Err(VerifyError::type_error(format!(
                "expected {} on the stack, found {}",
                expected, actual
            )));
        }
        Ok(actual)
    }

    /// Pop a single slot with no type expectation
    pub fn pop_slot(&mut self) -> Result<VerificationType, VerifyError> {
        self.stack
            .pop()
            .ok_or_else(|| VerifyError::type_error("operand stack underflow"))
    }

    /// Push a single slot, checking only for overflow
    pub fn push_slot(&mut self, value: VerificationType) -> Result<(), VerifyError> {
        if self.stack.len() + 1 > self.max_stack {
            return Err(VerifyError::structural("operand stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Read a local, requiring it to be usable where `expected` is required
    pub fn load(
        &self,
        expected: &VerificationType,
        index: u16,
        graph: &ClassGraph,
    ) -> Result<VerificationType, VerifyError> {
        let width = expected.width();
        if index as usize + width > self.locals.len() {
            return Err(VerifyError::structural(format!(
                "load from local {} is out of bounds",
                index
            )));
        }
        let actual = &self.locals[index as usize];
        let compatible = expected.is_assignable_from(actual, graph)
            && (width != 2
                || self.locals[index as usize + 1] == VerificationType::Second);
        if !compatible {
            return Err(VerifyError::type_error(format!(
                "local {} contains {} where {} is required",
                index, actual, expected
            )));
        }
        Ok(actual.clone())
    }

    /// Write a local, invalidating any category 2 value this write tears
    pub fn store(&mut self, value: VerificationType, index: u16) -> Result<(), VerifyError> {
        let index = index as usize;
        let width = value.width();
        if index + width > self.locals.len() {
            return Err(VerifyError::structural(format!(
                "store to local {} is out of bounds",
                index
            )));
        }
        // A write over the second slot of a long or double kills the value
        if index > 0 && self.locals[index - 1].width() == 2 {
            self.locals[index - 1] = VerificationType::Top;
        }
        // A one slot write over a long or double strands its second slot
        if width == 1 && self.locals[index].width() == 2 {
            self.locals[index + 1] = VerificationType::Top;
        }
        self.locals[index] = value;
        if width == 2 {
            if self.locals[index + 1].width() == 2 && index + 2 < self.locals.len() {
                // The torn value's second slot
                self.locals[index + 2] = VerificationType::Top;
            }
            self.locals[index + 1] = VerificationType::Second;
        }
        if index + width > self.active_locals {
            self.active_locals = index + width;
        }
        Ok(())
    }

    /// Remove the last `count` locals, counting a category 2 value as one
    pub fn chop_locals(&mut self, count: u8) -> Result<(), VerifyError> {
        for _ in 0..count {
            let last = self
                .locals[..self.active_locals]
                .iter()
                .rposition(|local| *local != VerificationType::Top)
                .ok_or_else(|| VerifyError::type_error("cannot chop an empty set of locals"))?;
            if self.locals[last] == VerificationType::Second {
                self.locals[last - 1] = VerificationType::Top;
            }
            self.locals[last] = VerificationType::Top;
            self.active_locals = self.locals[..last]
                .iter()
                .rposition(|local| *local != VerificationType::Top)
                .map_or(0, |position| position + 1);
        }
        Ok(())
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.locals.fill(VerificationType::Top);
        self.active_locals = 0;
    }

    /// Copy another frame's contents into this one
    pub fn reset_from(&mut self, other: &Frame) {
        self.locals.clone_from(&other.locals);
        self.stack.clone_from(&other.stack);
        self.active_locals = other.active_locals;
    }

    /// Replace every occurrence of `old` in the locals and on the stack
    pub fn replace_all(&mut self, old: &VerificationType, new: &VerificationType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == old {
                *slot = new.clone();
            }
        }
    }

    /// Replace every occurrence of `old` in the locals only
    pub fn replace_locals(&mut self, old: &VerificationType, new: &VerificationType) {
        for slot in self.locals.iter_mut() {
            if slot == old {
                *slot = new.clone();
            }
        }
        self.recompute_active_locals();
    }

    pub fn stack_contains(&self, value: &VerificationType) -> bool {
        self.stack.contains(value)
    }

    /// Does `value` appear in any local or stack slot?
    pub fn contains(&self, value: &VerificationType) -> bool {
        self.locals.contains(value) || self.stack.contains(value)
    }

    /// Restore from `source` every local slot for which `accessed` is false,
    /// leaving the accessed slots as they are
    pub fn restore_locals_from(&mut self, source: &Frame, accessed: impl Fn(u16) -> bool) {
        for (index, slot) in self.locals.iter_mut().enumerate() {
            if !accessed(index as u16) {
                if let Some(original) = source.locals.get(index) {
                    *slot = original.clone();
                }
            }
        }
        self.recompute_active_locals();
    }

    /// Turn every uninitialized object type into `Top`
    pub fn kill_uninitialized(&mut self) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot.is_uninitialized() {
                *slot = VerificationType::Top;
            }
        }
        self.recompute_active_locals();
    }

    fn recompute_active_locals(&mut self) {
        self.active_locals = self
            .locals
            .iter()
            .rposition(|local| *local != VerificationType::Top)
            .map_or(0, |position| position + 1);
    }

    /// Check that `incoming` flow is usable wherever this recorded frame
    /// says a value is live. Used by the type checking pass, where the
    /// recorded frame is authoritative and never widened.
    ///
    /// The stack comparison is skipped for exception handler entries, whose
    /// recorded stack is fixed by construction.
    pub fn merge_from(
        &self,
        incoming: &Frame,
        check_stack: bool,
        graph: &ClassGraph,
    ) -> Result<(), VerifyError> {
        if check_stack {
            if self.stack.len() != incoming.stack.len() {
                return Err(VerifyError::type_error(format!(
                    "stack height {} flows into a frame expecting height {}",
                    incoming.stack.len(),
                    self.stack.len()
                )));
            }
            for (recorded, live) in self.stack.iter().zip(&incoming.stack) {
                if !recorded.is_assignable_from(live, graph) {
                    return Err(VerifyError::type_error(format!(
                        "stack value {} flows into a slot expecting {}",
                        live, recorded
                    )));
                }
            }
        }
        for (index, (recorded, live)) in self.locals.iter().zip(&incoming.locals).enumerate() {
            if *recorded != VerificationType::Top && !recorded.is_assignable_from(live, graph) {
                return Err(VerifyError::type_error(format!(
                    "local {} holds {} where the recorded frame expects {}",
                    index, live, recorded
                )));
            }
        }
        Ok(())
    }

    /// Widen this frame to cover `incoming` as well, reporting whether
    /// anything changed. Used by the inferencing pass.
    pub fn join_from(&mut self, incoming: &Frame, graph: &ClassGraph) -> Result<bool, VerifyError> {
        if self.stack.len() != incoming.stack.len() {
            return Err(VerifyError::type_error(format!(
                "stack height {} flows into a frame with height {}",
                incoming.stack.len(),
                self.stack.len()
            )));
        }
        let mut changed = false;
        for (recorded, live) in self.stack.iter_mut().zip(&incoming.stack) {
            let joined = recorded.merge_with(live, graph);
            if joined == VerificationType::Top && *recorded != VerificationType::Top {
                return Err(VerifyError::type_error(format!(
                    "stack value {} cannot merge with {}",
                    live, recorded
                )));
            }
            if joined != *recorded {
                *recorded = joined;
                changed = true;
            }
        }
        for (recorded, live) in self.locals.iter_mut().zip(&incoming.locals) {
            let joined = recorded.merge_with(live, graph);
            if joined != *recorded {
                *recorded = joined;
                changed = true;
            }
        }
        if changed {
            self.recompute_active_locals();
        }
        Ok(changed)
    }

    /// Apply one stack map frame as a delta over this frame's locals
    pub fn apply_frame_delta(&mut self, frame: &StackMapFrame) -> Result<(), VerifyError> {
        self.clear_stack();
        match frame {
            StackMapFrame::Same { .. } => (),
            StackMapFrame::SameLocalsOneStack { stack, .. } => {
                self.push(VerificationType::of_info(stack))?;
            }
            StackMapFrame::Chop { chopped, .. } => self.chop_locals(*chopped)?,
            StackMapFrame::Append { locals, .. } => {
                for local in locals {
                    let index = self.active_locals as u16;
                    self.store(VerificationType::of_info(local), index)?;
                }
            }
            StackMapFrame::Full { locals, stack, .. } => {
                self.clear();
                let mut index = 0;
                for local in locals {
                    let local = VerificationType::of_info(local);
                    let width = local.width();
                    self.store(local, index)?;
                    index += width as u16;
                }
                for value in stack {
                    self.push(VerificationType::of_info(value))?;
                }
            }
        }
        Ok(())
    }

    /// Derive the most compact stack map frame taking `previous` to this
    /// frame
    pub fn stack_map_frame(&self, previous: &Frame, offset_delta: u16) -> StackMapFrame {
        let locals = self.locals_as_info();
        let previous_locals = previous.locals_as_info();
        let mut stack = self.stack_as_info();

        if locals == previous_locals {
            if stack.is_empty() {
                return StackMapFrame::Same { offset_delta };
            }
            if stack.len() == 1 {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: stack.remove(0),
                };
            }
        } else if stack.is_empty() {
            let shared = locals
                .iter()
                .zip(&previous_locals)
                .take_while(|(a, b)| a == b)
                .count();
            if shared == locals.len() {
                let chopped = previous_locals.len() - locals.len();
                if (1..=3).contains(&chopped) {
                    return StackMapFrame::Chop {
                        offset_delta,
                        chopped: chopped as u8,
                    };
                }
            } else if shared == previous_locals.len() {
                let appended = locals.len() - previous_locals.len();
                if (1..=3).contains(&appended) {
                    return StackMapFrame::Append {
                        offset_delta,
                        locals: locals[shared..].to_vec(),
                    };
                }
            }
        }

        StackMapFrame::Full {
            offset_delta,
            locals,
            stack,
        }
    }

    /// Locals in stack map form: second slots folded away, trailing `Top`s
    /// trimmed
    fn locals_as_info(&self) -> Vec<VerificationTypeInfo> {
        let mut infos = vec![];
        let mut index = 0;
        while index < self.active_locals {
            let local = &self.locals[index];
            index += local.width();
            infos.push(local.as_info());
        }
        infos
    }

    fn stack_as_info(&self) -> Vec<VerificationTypeInfo> {
        self.stack
            .iter()
            .filter(|value| **value != VerificationType::Second)
            .map(|value| value.as_info())
            .collect()
    }
}

impl VerificationType {
    /// Lattice element recorded by a stack map type info
    pub fn of_info(info: &VerificationTypeInfo) -> VerificationType {
        match info {
            VerificationTypeInfo::Top => VerificationType::Top,
            VerificationTypeInfo::Integer => VerificationType::Integer,
            VerificationTypeInfo::Float => VerificationType::Float,
            VerificationTypeInfo::Long => VerificationType::Long,
            VerificationTypeInfo::Double => VerificationType::Double,
            VerificationTypeInfo::Null => VerificationType::Null,
            VerificationTypeInfo::UninitializedThis => VerificationType::UninitializedThis,
            VerificationTypeInfo::Object(ref_type) => VerificationType::Reference(ref_type.clone()),
            VerificationTypeInfo::Uninitialized(position) => {
                VerificationType::Uninitialized(*position as u32)
            }
        }
    }

    /// Stack map type info for this lattice element
    ///
    /// Return addresses have no stack map form; they only exist while
    /// subroutines do, and subroutines are inlined away before stack maps are
    /// derived. They degrade to `Top` here.
    pub fn as_info(&self) -> VerificationTypeInfo {
        match self {
            VerificationType::Integer => VerificationTypeInfo::Integer,
            VerificationType::Float => VerificationTypeInfo::Float,
            VerificationType::Long => VerificationTypeInfo::Long,
            VerificationType::Double => VerificationTypeInfo::Double,
            VerificationType::Null => VerificationTypeInfo::Null,
            VerificationType::UninitializedThis => VerificationTypeInfo::UninitializedThis,
            VerificationType::Reference(ref_type) => {
                VerificationTypeInfo::Object(ref_type.clone())
            }
            VerificationType::Uninitialized(position) => {
                VerificationTypeInfo::Uninitialized(*position as u16)
            }
            _ => VerificationTypeInfo::Top,
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("locals: [")?;
        for (index, local) in self.locals[..self.active_locals].iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", local)?;
        }
        f.write_str("] stack: [")?;
        for (index, value) in self.stack.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classfile::ParseDescriptor;
    use crate::verifier::errors::ErrorKind;

    fn new_frame(max_locals: u16, max_stack: u16) -> Frame {
        Frame::new(max_locals, max_stack)
    }

    #[test]
    fn capacity_violations_are_structural() {
        let graph = ClassGraph::new();
        let mut frame = new_frame(1, 1);
        frame.push(VerificationType::Integer).unwrap();
        let overflow = frame.push(VerificationType::Integer).unwrap_err();
        assert!(matches!(overflow.kind, ErrorKind::Structural(_)));

        let load = frame.load(&VerificationType::Integer, 4, &graph).unwrap_err();
        assert!(matches!(load.kind, ErrorKind::Structural(_)));

        let store = frame.store(VerificationType::Integer, 4).unwrap_err();
        assert!(matches!(store.kind, ErrorKind::Structural(_)));
    }

    #[test]
    fn push_pop_widths() {
        let graph = ClassGraph::new();
        let mut frame = new_frame(0, 3);
        frame.push(VerificationType::Long).unwrap();
        frame.push(VerificationType::Integer).unwrap();
        assert_eq!(frame.stack_size(), 3);

        assert!(matches!(
            frame.pop_with(&VerificationType::Integer, &graph),
            Ok(VerificationType::Integer)
        ));
        assert!(matches!(
            frame.pop_with(&VerificationType::Long, &graph),
            Ok(VerificationType::Long)
        ));
        assert!(frame.pop_with(&VerificationType::Integer, &graph).is_err());
    }

    #[test]
    fn stack_overflow() {
        let mut frame = new_frame(0, 1);
        frame.push(VerificationType::Integer).unwrap();
        assert!(frame.push(VerificationType::Integer).is_err());
        assert!(new_frame(0, 1).push(VerificationType::Double).is_err());
    }

    #[test]
    fn torn_category2_locals() {
        let graph = ClassGraph::new();
        let mut frame = new_frame(4, 0);
        frame.store(VerificationType::Long, 0).unwrap();
        assert!(frame.load(&VerificationType::Long, 0, &graph).is_ok());

        // Overwriting the second slot kills the long
        frame.store(VerificationType::Integer, 1).unwrap();
        assert!(frame.load(&VerificationType::Long, 0, &graph).is_err());
        assert_eq!(frame.local(0), Some(&VerificationType::Top));
    }

    #[test]
    fn initial_frames() {
        let descriptor = MethodDescriptor::parse("(IJ)V").unwrap();
        let frame =
            Frame::initial("demo/Widget", "resize", false, &descriptor, 4, 0).unwrap();
        assert_eq!(frame.local(0), Some(&VerificationType::object("demo/Widget")));
        assert_eq!(frame.local(1), Some(&VerificationType::Integer));
        assert_eq!(frame.local(2), Some(&VerificationType::Long));
        assert_eq!(frame.active_locals(), 4);

        let init = MethodDescriptor::parse("()V").unwrap();
        let frame = Frame::initial("demo/Widget", "<init>", false, &init, 1, 0).unwrap();
        assert_eq!(frame.local(0), Some(&VerificationType::UninitializedThis));

        assert!(Frame::initial("demo/Widget", "resize", false, &descriptor, 2, 0).is_err());
    }

    #[test]
    fn chopping() {
        let mut frame = new_frame(4, 0);
        frame.store(VerificationType::Integer, 0).unwrap();
        frame.store(VerificationType::Long, 1).unwrap();
        frame.chop_locals(1).unwrap();
        assert_eq!(frame.active_locals(), 1);
        frame.chop_locals(1).unwrap();
        assert_eq!(frame.active_locals(), 0);
        assert!(frame.chop_locals(1).is_err());
    }

    #[test]
    fn join_widens() {
        let graph = ClassGraph::new();
        let mut recorded = new_frame(2, 1);
        recorded.store(VerificationType::object(RefType::STRING), 0).unwrap();
        recorded.push(VerificationType::Integer).unwrap();

        let mut incoming = new_frame(2, 1);
        incoming
            .store(VerificationType::object("java/lang/StringBuilder"), 0)
            .unwrap();
        incoming.push(VerificationType::Integer).unwrap();

        assert!(recorded.join_from(&incoming, &graph).unwrap());
        assert_eq!(recorded.local(0), Some(&VerificationType::object(RefType::OBJECT)));
        // A second merge of the same state is a no-op
        assert!(!recorded.join_from(&incoming, &graph).unwrap());
    }

    #[test]
    fn join_rejects_stack_conflicts() {
        let graph = ClassGraph::new();
        let mut recorded = new_frame(0, 1);
        recorded.push(VerificationType::Integer).unwrap();
        let mut incoming = new_frame(0, 1);
        incoming.push(VerificationType::Float).unwrap();
        assert!(recorded.join_from(&incoming, &graph).is_err());
    }

    #[test]
    fn compatibility_merge() {
        let graph = ClassGraph::new();
        let mut recorded = new_frame(1, 0);
        recorded.store(VerificationType::object(RefType::OBJECT), 0).unwrap();
        let mut incoming = new_frame(1, 0);
        incoming.store(VerificationType::object(RefType::STRING), 0).unwrap();
        assert!(recorded.merge_from(&incoming, true, &graph).is_ok());
        // The other direction narrows, which a recorded frame cannot do
        assert!(incoming.merge_from(&recorded, true, &graph).is_err());
    }

    #[test]
    fn stack_map_compression() {
        let mut base = new_frame(3, 2);
        base.store(VerificationType::Integer, 0).unwrap();

        let same = base.clone();
        assert_eq!(
            same.stack_map_frame(&base, 5),
            StackMapFrame::Same { offset_delta: 5 }
        );

        let mut appended = base.clone();
        appended.store(VerificationType::Float, 1).unwrap();
        assert_eq!(
            appended.stack_map_frame(&base, 5),
            StackMapFrame::Append {
                offset_delta: 5,
                locals: vec![VerificationTypeInfo::Float],
            }
        );
        assert_eq!(
            base.stack_map_frame(&appended, 7),
            StackMapFrame::Chop {
                offset_delta: 7,
                chopped: 1,
            }
        );

        let mut one_stack = base.clone();
        one_stack.push(VerificationType::Long).unwrap();
        assert_eq!(
            one_stack.stack_map_frame(&base, 2),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 2,
                stack: VerificationTypeInfo::Long,
            }
        );
    }
}
