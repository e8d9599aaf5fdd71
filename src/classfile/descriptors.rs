use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => {
                let msg = format!("Unexpected leftover input '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Number of stack or local slots occupied by a value of this type
    pub fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("Invalid base type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing base type character";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        };
        Ok(typ)
    }
}

/// Reference type: a named class/interface or an array
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType {
    /// Class or interface, identified by its binary name (eg. `java/lang/String`)
    Object(String),
    /// Array with the given component type
    Array(Box<FieldType>),
}

impl RefType {
    pub const OBJECT: &'static str = "java/lang/Object";
    pub const STRING: &'static str = "java/lang/String";
    pub const CLASS: &'static str = "java/lang/Class";
    pub const THROWABLE: &'static str = "java/lang/Throwable";
    pub const CLONEABLE: &'static str = "java/lang/Cloneable";
    pub const SERIALIZABLE: &'static str = "java/io/Serializable";
    pub const METHOD_HANDLE: &'static str = "java/lang/invoke/MethodHandle";
    pub const METHOD_TYPE: &'static str = "java/lang/invoke/MethodType";

    pub fn object(name: impl Into<String>) -> RefType {
        RefType::Object(name.into())
    }

    pub fn array(component: FieldType) -> RefType {
        RefType::Array(Box::new(component))
    }

    /// Parse the name found in a `CONSTANT_Class_info`, which is either a
    /// binary class name or (for arrays only) a field descriptor
    pub fn from_class_constant(name: &str) -> Result<RefType> {
        if name.starts_with('[') {
            match FieldType::parse(name)? {
                FieldType::Ref(ref_type) => Ok(ref_type),
                FieldType::Base(_) => {
                    let msg = format!("Invalid class constant '{}'", name);
                    Err(Error::new(ErrorKind::InvalidInput, msg))
                }
            }
        } else {
            Ok(RefType::Object(name.to_string()))
        }
    }
}

impl RenderDescriptor for RefType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => {
                write_to.push('L');
                write_to.push_str(cls);
                write_to.push(';');
            }
            RefType::Array(component) => {
                write_to.push('[');
                component.render_to(write_to);
            }
        }
    }
}

impl ParseDescriptor for RefType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            Some('L') => {
                source.next();
                let mut class_name = String::new();
                loop {
                    let c: char = source.next().ok_or_else(|| {
                        let msg = format!("Missing terminator for 'L{}'", class_name);
                        Error::new(ErrorKind::UnexpectedEof, msg)
                    })?;
                    if c == ';' {
                        return Ok(RefType::Object(class_name));
                    } else {
                        class_name.push(c);
                    }
                }
            }
            Some('[') => {
                source.next();
                let component = FieldType::parse_from(source)?;
                Ok(RefType::Array(Box::new(component)))
            }
            Some(c) => {
                let msg = format!("Invalid reference type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
            None => {
                let msg = "Missing reference type";
                Err(Error::new(ErrorKind::UnexpectedEof, msg))
            }
        }
    }
}

/// Type of a field, parameter, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Ref(RefType),
}

impl FieldType {
    pub fn object(class_name: impl Into<String>) -> FieldType {
        FieldType::Ref(RefType::Object(class_name.into()))
    }

    pub fn array(component: FieldType) -> FieldType {
        FieldType::Ref(RefType::array(component))
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType {
        FieldType::Base(BaseType::Double)
    }

    /// Number of stack or local slots occupied by a value of this type
    pub fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => {
                let msg = format!("Invalid field type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Signature of a method
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Total slot length of parameters (not the same as the length of the
    /// vector), which must be 255 or less for the descriptor to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let mut len = if has_this_param { 1 } else { 0 };
        for parameter in &self.parameters {
            len += parameter.width();
        }
        len
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        // Assert open paren
        if let Some('(') = source.next() {
        } else {
            let msg = "Expected '(' for method";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        // Parse parameters
        let mut parameters = vec![];
        while source.peek().copied() != Some(')') {
            parameters.push(FieldType::parse_from(source)?);
        }

        // Assert close paren
        if let Some(')') = source.next() {
        } else {
            let msg = "Expected ')' for method";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        // Parse return
        let return_type = if let Some('V') = source.peek().copied() {
            let _ = source.next();
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fmt::Debug;

    fn round_trip<T: RenderDescriptor + ParseDescriptor + Debug + Eq>(rendered: &str, parsed: T) {
        assert_eq!(rendered, parsed.render());
        assert_eq!(T::parse(rendered).unwrap(), parsed);
    }

    #[test]
    fn base_types() {
        round_trip("B", BaseType::Byte);
        round_trip("C", BaseType::Char);
        round_trip("D", BaseType::Double);
        round_trip("F", BaseType::Float);
        round_trip("I", BaseType::Int);
        round_trip("J", BaseType::Long);
        round_trip("S", BaseType::Short);
        round_trip("Z", BaseType::Boolean);
    }

    #[test]
    fn field_types() {
        round_trip("I", FieldType::int());
        round_trip("Ljava/lang/Object;", FieldType::object(RefType::OBJECT));
        round_trip(
            "[[[D",
            FieldType::array(FieldType::array(FieldType::array(FieldType::double()))),
        );
        round_trip(
            "[Ljava/lang/String;",
            FieldType::array(FieldType::object(RefType::STRING)),
        );
    }

    #[test]
    fn method_descriptors() {
        round_trip(
            "(IDLjava/lang/Integer;)Ljava/lang/Object;",
            MethodDescriptor {
                parameters: vec![
                    FieldType::int(),
                    FieldType::double(),
                    FieldType::object("java/lang/Integer"),
                ],
                return_type: Some(FieldType::object(RefType::OBJECT)),
            },
        );
        round_trip(
            "()V",
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
    }

    #[test]
    fn class_constants() {
        assert_eq!(
            RefType::from_class_constant("java/lang/String").unwrap(),
            RefType::object(RefType::STRING),
        );
        assert_eq!(
            RefType::from_class_constant("[I").unwrap(),
            RefType::array(FieldType::int()),
        );
        // A class really can be named `I`; only array constants are descriptors
        assert_eq!(
            RefType::from_class_constant("I").unwrap(),
            RefType::object("I"),
        );
        assert!(RefType::from_class_constant("[").is_err());
    }

    #[test]
    fn parameter_lengths() {
        let descriptor = MethodDescriptor::parse("(IJD[J)V").unwrap();
        assert_eq!(descriptor.parameter_length(false), 6);
        assert_eq!(descriptor.parameter_length(true), 7);
    }
}
