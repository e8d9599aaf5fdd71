use super::descriptors::RefType;

/// Body of a method
///
/// [`Code` attribute](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.3)
#[derive(Clone, Debug, Default)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub stack_map_table: Option<Vec<StackMapFrame>>,
    pub line_numbers: Vec<LineNumberEntry>,
    pub local_variables: Vec<LocalVariableEntry>,
}

/// Entry in the exception handler table of a `Code` attribute
///
/// The handler covers positions in `start..end` (`end` exclusive). A `None`
/// catch type catches everything (this is how `finally` blocks compile).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: u16,
    pub end: u16,
    pub handler: u16,
    pub catch_type: Option<RefType>,
}

impl ExceptionHandler {
    pub fn covers(&self, position: u32) -> bool {
        (self.start as u32) <= position && position < (self.end as u32)
    }
}

/// [`LineNumberTable` entry](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.12)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start: u16,
    pub line: u16,
}

/// [`LocalVariableTable` entry](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.13)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start: u16,
    pub length: u16,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

impl LocalVariableEntry {
    pub fn covers(&self, position: u32) -> bool {
        (self.start as u32) <= position && position < (self.start as u32 + self.length as u32)
    }
}

/// Verification type as recorded in a `StackMapTable`, with constant pool
/// references already resolved
///
/// [Verification type info](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.4)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(RefType),
    /// Position of the `new` instruction that made the value
    Uninitialized(u16),
}

impl VerificationTypeInfo {
    /// Local or stack slots occupied
    pub fn width(&self) -> usize {
        match self {
            VerificationTypeInfo::Long | VerificationTypeInfo::Double => 2,
            _ => 1,
        }
    }
}

/// Frame in a `StackMapTable`, one of the four compressed shapes
///
/// Offsets are deltas: each frame applies at the previous frame's position
/// plus `offset_delta` plus one (plus zero for the first frame).
///
/// [`StackMapTable` attribute](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.4)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Same locals as the previous frame, empty stack
    Same { offset_delta: u16 },
    /// Same locals as the previous frame, one value on the stack
    SameLocalsOneStack {
        offset_delta: u16,
        stack: VerificationTypeInfo,
    },
    /// Previous locals minus the last `chopped` (1 to 3), empty stack
    Chop { offset_delta: u16, chopped: u8 },
    /// Previous locals plus 1 to 3 extra, empty stack
    Append {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
    },
    /// Explicit locals and stack
    Full {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
        stack: Vec<VerificationTypeInfo>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }
}
