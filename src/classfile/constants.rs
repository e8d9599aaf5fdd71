use super::descriptors::{FieldType, MethodDescriptor, ParseDescriptor, RefType};
use crate::verifier::errors::VerifyError;

/// Parsed constant pool entry
///
/// [Constant pool](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.4)
#[derive(Clone, Debug)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    /// Index of the `Utf8` holding the class name
    Class(u16),
    /// Index of the `Utf8` holding the string contents
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    InvokeDynamic { bootstrap_method: u16, name_and_type: u16 },
    /// Occupies index 0 and the second slot of `Long`/`Double` entries
    Unusable,
}

impl Constant {
    pub(crate) fn tag_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class(_) => "Class",
            Constant::String(_) => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType(_) => "MethodType",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Unusable => "Unusable",
        }
    }
}

/// Resolved field reference
#[derive(Clone, Debug)]
pub struct FieldRef {
    pub class: RefType,
    pub name: String,
    pub descriptor: FieldType,
}

/// Resolved method reference
#[derive(Clone, Debug)]
pub struct MethodRef {
    pub class: RefType,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub is_interface: bool,
}

/// Read-only view of a class's constant pool, with typed accessors for the
/// entry shapes the verifier needs to resolve
#[derive(Clone, Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Entry 0 must be `Unusable`, as must the trailing slot of every
    /// `Long`/`Double` entry; the reader takes care of this
    pub fn new(entries: Vec<Constant>) -> ConstantPool {
        ConstantPool { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u16) -> Result<&Constant, VerifyError> {
        match self.entries.get(index as usize) {
            None | Some(Constant::Unusable) => Err(VerifyError::structural(format!(
                "invalid constant pool index {}",
                index
            ))),
            Some(constant) => Ok(constant),
        }
    }

    fn mismatch(&self, index: u16, expected: &str) -> VerifyError {
        let found = self
            .entries
            .get(index as usize)
            .map_or("Unusable", Constant::tag_name);
        VerifyError::structural(format!(
            "constant pool index {} holds {}, expected {}",
            index, found, expected
        ))
    }

    pub fn utf8_at(&self, index: u16) -> Result<&str, VerifyError> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(self.mismatch(index, "Utf8")),
        }
    }

    /// Resolve a `Class` entry into a reference type (arrays store a field
    /// descriptor where other classes store a binary name)
    pub fn class_at(&self, index: u16) -> Result<RefType, VerifyError> {
        match self.get(index)? {
            Constant::Class(name_index) => {
                let name = self.utf8_at(*name_index)?;
                RefType::from_class_constant(name)
                    .map_err(|err| VerifyError::structural(err.to_string()))
            }
            _ => Err(self.mismatch(index, "Class")),
        }
    }

    fn name_and_type_at(&self, index: u16) -> Result<(&str, &str), VerifyError> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8_at(*name)?, self.utf8_at(*descriptor)?))
            }
            _ => Err(self.mismatch(index, "NameAndType")),
        }
    }

    pub fn field_at(&self, index: u16) -> Result<FieldRef, VerifyError> {
        match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                let class = self.class_at(*class)?;
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                let descriptor = FieldType::parse(descriptor)
                    .map_err(|err| VerifyError::structural(err.to_string()))?;
                Ok(FieldRef {
                    class,
                    name: name.to_string(),
                    descriptor,
                })
            }
            _ => Err(self.mismatch(index, "Fieldref")),
        }
    }

    pub fn method_at(&self, index: u16) -> Result<MethodRef, VerifyError> {
        let (class, name_and_type, is_interface) = match self.get(index)? {
            Constant::MethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, true),
            _ => return Err(self.mismatch(index, "Methodref")),
        };
        let class = self.class_at(class)?;
        let (name, descriptor) = self.name_and_type_at(name_and_type)?;
        let descriptor = MethodDescriptor::parse(descriptor)
            .map_err(|err| VerifyError::structural(err.to_string()))?;
        Ok(MethodRef {
            class,
            name: name.to_string(),
            descriptor,
            is_interface,
        })
    }

    /// Method signature named by an `InvokeDynamic` entry
    pub fn invoke_dynamic_at(&self, index: u16) -> Result<MethodDescriptor, VerifyError> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. } => {
                let (_, descriptor) = self.name_and_type_at(*name_and_type)?;
                MethodDescriptor::parse(descriptor)
                    .map_err(|err| VerifyError::structural(err.to_string()))
            }
            _ => Err(self.mismatch(index, "InvokeDynamic")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_pool() -> ConstantPool {
        ConstantPool::new(vec![
            Constant::Unusable,                     // 0
            Constant::Utf8("java/lang/String".to_string()), // 1
            Constant::Class(1),                     // 2
            Constant::Utf8("length".to_string()),   // 3
            Constant::Utf8("()I".to_string()),      // 4
            Constant::NameAndType {
                name: 3,
                descriptor: 4,
            }, // 5
            Constant::MethodRef {
                class: 2,
                name_and_type: 5,
            }, // 6
            Constant::Long(99),                     // 7
            Constant::Unusable,                     // 8
        ])
    }

    #[test]
    fn typed_lookups() {
        let pool = sample_pool();
        assert_eq!(pool.class_at(2).unwrap(), RefType::object(RefType::STRING));
        let method = pool.method_at(6).unwrap();
        assert_eq!(method.name, "length");
        assert_eq!(method.descriptor.parameters.len(), 0);
        assert!(!method.is_interface);
    }

    #[test]
    fn invalid_indices() {
        let pool = sample_pool();
        assert!(pool.get(0).is_err());
        assert!(pool.get(8).is_err()); // second slot of the Long
        assert!(pool.get(100).is_err());
        assert!(pool.method_at(2).is_err()); // Class where Methodref expected
    }
}
