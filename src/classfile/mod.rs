//! Class file model: descriptors, constant pool, code attributes, and a
//! reader for the binary format

mod access_flags;
mod attributes;
mod constants;
mod descriptors;
mod reader;

pub use access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
pub use attributes::{
    CodeAttribute, ExceptionHandler, LineNumberEntry, LocalVariableEntry, StackMapFrame,
    VerificationTypeInfo,
};
pub use constants::{Constant, ConstantPool, FieldRef, MethodRef};
pub use descriptors::{
    BaseType, FieldType, MethodDescriptor, ParseDescriptor, RefType, RenderDescriptor,
};
pub use reader::{parse_class, ClassFile, FieldInfo, MethodInfo, ReadError};

/// Class file format version
///
/// [Versions](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.1-200-B.2)
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const JAVA5: Version = Version {
        major: 49,
        minor: 0,
    };
    pub const JAVA6: Version = Version {
        major: 50,
        minor: 0,
    };
    pub const JAVA7: Version = Version {
        major: 51,
        minor: 0,
    };
    pub const JAVA8: Version = Version {
        major: 52,
        minor: 0,
    };

    /// Class files at or above this version carry `StackMapTable` attributes
    pub fn has_stack_maps(&self) -> bool {
        self.major >= Version::JAVA6.major
    }
}
