use super::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use super::attributes::{
    CodeAttribute, ExceptionHandler, LineNumberEntry, LocalVariableEntry, StackMapFrame,
    VerificationTypeInfo,
};
use super::constants::{Constant, ConstantPool};
use super::descriptors::{FieldType, MethodDescriptor, ParseDescriptor};
use super::Version;
use byteorder::{BigEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

/// Failure while decoding a class file
#[derive(Debug)]
pub enum ReadError {
    Io(std::io::Error),
    Malformed(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "class file truncated: {}", err),
            ReadError::Malformed(msg) => write!(f, "malformed class file: {}", msg),
        }
    }
}

impl std::error::Error for ReadError {}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> ReadError {
        ReadError::Io(err)
    }
}

fn malformed(msg: impl Into<String>) -> ReadError {
    ReadError::Malformed(msg.into())
}

/// Parsed class file, with only the pieces verification consumes
#[derive(Debug)]
pub struct ClassFile {
    pub version: Version,
    pub pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: FieldType,
}

#[derive(Debug)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub code: Option<CodeAttribute>,
}

const MAGIC: u32 = 0xCAFE_BABE;

/// Decode a class file image
///
/// [`ClassFile` structure](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.1)
pub fn parse_class(bytes: &[u8]) -> Result<ClassFile, ReadError> {
    let mut input = Cursor::new(bytes);

    let magic = input.read_u32::<BigEndian>()?;
    if magic != MAGIC {
        return Err(malformed(format!("bad magic 0x{:08X}", magic)));
    }
    let minor = input.read_u16::<BigEndian>()?;
    let major = input.read_u16::<BigEndian>()?;
    let version = Version { major, minor };

    let pool = parse_constant_pool(&mut input)?;

    let access_flags = ClassAccessFlags::from_bits_truncate(input.read_u16::<BigEndian>()?);
    let this_class = input.read_u16::<BigEndian>()?;
    let super_class = input.read_u16::<BigEndian>()?;

    let class_name = |index: u16| -> Result<String, ReadError> {
        match pool.class_at(index) {
            Ok(super::descriptors::RefType::Object(name)) => Ok(name),
            Ok(other) => Err(malformed(format!(
                "expected a class name, found array type {:?}",
                other
            ))),
            Err(err) => Err(malformed(err.to_string())),
        }
    };

    let name = class_name(this_class)?;
    let superclass = if super_class == 0 {
        None
    } else {
        Some(class_name(super_class)?)
    };

    let interface_count = input.read_u16::<BigEndian>()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(class_name(input.read_u16::<BigEndian>()?)?);
    }

    let field_count = input.read_u16::<BigEndian>()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let access_flags = FieldAccessFlags::from_bits_truncate(input.read_u16::<BigEndian>()?);
        let name = pool
            .utf8_at(input.read_u16::<BigEndian>()?)
            .map_err(|err| malformed(err.to_string()))?
            .to_string();
        let descriptor = pool
            .utf8_at(input.read_u16::<BigEndian>()?)
            .map_err(|err| malformed(err.to_string()))?;
        let descriptor =
            FieldType::parse(descriptor).map_err(|err| malformed(err.to_string()))?;
        skip_attributes(&mut input)?;
        fields.push(FieldInfo {
            access_flags,
            name,
            descriptor,
        });
    }

    let method_count = input.read_u16::<BigEndian>()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(parse_method(&mut input, &pool)?);
    }

    // Class level attributes are not interesting here
    skip_attributes(&mut input)?;

    Ok(ClassFile {
        version,
        pool,
        access_flags,
        name,
        superclass,
        interfaces,
        fields,
        methods,
    })
}

fn parse_constant_pool(input: &mut Cursor<&[u8]>) -> Result<ConstantPool, ReadError> {
    let count = input.read_u16::<BigEndian>()?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(Constant::Unusable);
    while entries.len() < count as usize {
        let tag = input.read_u8()?;
        let constant = match tag {
            1 => {
                let length = input.read_u16::<BigEndian>()?;
                let mut buffer = vec![0; length as usize];
                input.read_exact(&mut buffer)?;
                // Real modified UTF-8 only diverges on supplementary
                // characters and embedded NULs, neither of which occurs in
                // names or descriptors
                let string = String::from_utf8(buffer)
                    .map_err(|_| malformed("invalid Utf8 constant"))?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(input.read_i32::<BigEndian>()?),
            4 => Constant::Float(f32::from_bits(input.read_u32::<BigEndian>()?)),
            5 => Constant::Long(input.read_i64::<BigEndian>()?),
            6 => Constant::Double(f64::from_bits(input.read_u64::<BigEndian>()?)),
            7 => Constant::Class(input.read_u16::<BigEndian>()?),
            8 => Constant::String(input.read_u16::<BigEndian>()?),
            9 => Constant::FieldRef {
                class: input.read_u16::<BigEndian>()?,
                name_and_type: input.read_u16::<BigEndian>()?,
            },
            10 => Constant::MethodRef {
                class: input.read_u16::<BigEndian>()?,
                name_and_type: input.read_u16::<BigEndian>()?,
            },
            11 => Constant::InterfaceMethodRef {
                class: input.read_u16::<BigEndian>()?,
                name_and_type: input.read_u16::<BigEndian>()?,
            },
            12 => Constant::NameAndType {
                name: input.read_u16::<BigEndian>()?,
                descriptor: input.read_u16::<BigEndian>()?,
            },
            15 => Constant::MethodHandle {
                kind: input.read_u8()?,
                reference: input.read_u16::<BigEndian>()?,
            },
            16 => Constant::MethodType(input.read_u16::<BigEndian>()?),
            18 => Constant::InvokeDynamic {
                bootstrap_method: input.read_u16::<BigEndian>()?,
                name_and_type: input.read_u16::<BigEndian>()?,
            },
            other => return Err(malformed(format!("unknown constant tag {}", other))),
        };
        let two_slots = matches!(constant, Constant::Long(_) | Constant::Double(_));
        entries.push(constant);
        if two_slots {
            entries.push(Constant::Unusable);
        }
    }
    Ok(ConstantPool::new(entries))
}

fn parse_method(input: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<MethodInfo, ReadError> {
    let access_flags = MethodAccessFlags::from_bits_truncate(input.read_u16::<BigEndian>()?);
    let name = pool
        .utf8_at(input.read_u16::<BigEndian>()?)
        .map_err(|err| malformed(err.to_string()))?
        .to_string();
    let descriptor = pool
        .utf8_at(input.read_u16::<BigEndian>()?)
        .map_err(|err| malformed(err.to_string()))?;
    let descriptor =
        MethodDescriptor::parse(descriptor).map_err(|err| malformed(err.to_string()))?;

    let mut code = None;
    let attribute_count = input.read_u16::<BigEndian>()?;
    for _ in 0..attribute_count {
        let attribute_name = input.read_u16::<BigEndian>()?;
        let length = input.read_u32::<BigEndian>()?;
        let attribute_name = pool
            .utf8_at(attribute_name)
            .map_err(|err| malformed(err.to_string()))?;
        if attribute_name == "Code" {
            code = Some(parse_code(input, pool)?);
        } else {
            skip(input, length as u64)?;
        }
    }

    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        code,
    })
}

fn parse_code(input: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<CodeAttribute, ReadError> {
    let max_stack = input.read_u16::<BigEndian>()?;
    let max_locals = input.read_u16::<BigEndian>()?;
    let code_length = input.read_u32::<BigEndian>()?;
    let mut code = vec![0; code_length as usize];
    input.read_exact(&mut code)?;

    let handler_count = input.read_u16::<BigEndian>()?;
    let mut exception_handlers = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        let start = input.read_u16::<BigEndian>()?;
        let end = input.read_u16::<BigEndian>()?;
        let handler = input.read_u16::<BigEndian>()?;
        let catch_index = input.read_u16::<BigEndian>()?;
        let catch_type = if catch_index == 0 {
            None
        } else {
            Some(
                pool.class_at(catch_index)
                    .map_err(|err| malformed(err.to_string()))?,
            )
        };
        exception_handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type,
        });
    }

    let mut stack_map_table = None;
    let mut line_numbers = vec![];
    let mut local_variables = vec![];

    let attribute_count = input.read_u16::<BigEndian>()?;
    for _ in 0..attribute_count {
        let attribute_name = input.read_u16::<BigEndian>()?;
        let length = input.read_u32::<BigEndian>()?;
        let attribute_name = pool
            .utf8_at(attribute_name)
            .map_err(|err| malformed(err.to_string()))?;
        match attribute_name {
            "StackMapTable" => stack_map_table = Some(parse_stack_map_table(input, pool)?),
            "LineNumberTable" => {
                let entry_count = input.read_u16::<BigEndian>()?;
                for _ in 0..entry_count {
                    line_numbers.push(LineNumberEntry {
                        start: input.read_u16::<BigEndian>()?,
                        line: input.read_u16::<BigEndian>()?,
                    });
                }
            }
            "LocalVariableTable" => {
                let entry_count = input.read_u16::<BigEndian>()?;
                for _ in 0..entry_count {
                    let start = input.read_u16::<BigEndian>()?;
                    let entry_length = input.read_u16::<BigEndian>()?;
                    let name = pool
                        .utf8_at(input.read_u16::<BigEndian>()?)
                        .map_err(|err| malformed(err.to_string()))?
                        .to_string();
                    let descriptor = pool
                        .utf8_at(input.read_u16::<BigEndian>()?)
                        .map_err(|err| malformed(err.to_string()))?
                        .to_string();
                    let index = input.read_u16::<BigEndian>()?;
                    local_variables.push(LocalVariableEntry {
                        start,
                        length: entry_length,
                        name,
                        descriptor,
                        index,
                    });
                }
            }
            _ => skip(input, length as u64)?,
        }
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_handlers,
        stack_map_table,
        line_numbers,
        local_variables,
    })
}

fn parse_stack_map_table(
    input: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<Vec<StackMapFrame>, ReadError> {
    let frame_count = input.read_u16::<BigEndian>()?;
    let mut frames = Vec::with_capacity(frame_count as usize);
    for _ in 0..frame_count {
        let tag = input.read_u8()?;
        let frame = match tag {
            0..=63 => StackMapFrame::Same {
                offset_delta: tag as u16,
            },
            64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: (tag - 64) as u16,
                stack: parse_verification_type(input, pool)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: input.read_u16::<BigEndian>()?,
                stack: parse_verification_type(input, pool)?,
            },
            248..=250 => StackMapFrame::Chop {
                chopped: 251 - tag,
                offset_delta: input.read_u16::<BigEndian>()?,
            },
            251 => StackMapFrame::Same {
                offset_delta: input.read_u16::<BigEndian>()?,
            },
            252..=254 => {
                let offset_delta = input.read_u16::<BigEndian>()?;
                let mut locals = vec![];
                for _ in 0..(tag - 251) {
                    locals.push(parse_verification_type(input, pool)?);
                }
                StackMapFrame::Append {
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = input.read_u16::<BigEndian>()?;
                let local_count = input.read_u16::<BigEndian>()?;
                let mut locals = Vec::with_capacity(local_count as usize);
                for _ in 0..local_count {
                    locals.push(parse_verification_type(input, pool)?);
                }
                let stack_count = input.read_u16::<BigEndian>()?;
                let mut stack = Vec::with_capacity(stack_count as usize);
                for _ in 0..stack_count {
                    stack.push(parse_verification_type(input, pool)?);
                }
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            other => return Err(malformed(format!("reserved stack map frame tag {}", other))),
        };
        frames.push(frame);
    }
    Ok(frames)
}

fn parse_verification_type(
    input: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<VerificationTypeInfo, ReadError> {
    let info = match input.read_u8()? {
        0 => VerificationTypeInfo::Top,
        1 => VerificationTypeInfo::Integer,
        2 => VerificationTypeInfo::Float,
        3 => VerificationTypeInfo::Double,
        4 => VerificationTypeInfo::Long,
        5 => VerificationTypeInfo::Null,
        6 => VerificationTypeInfo::UninitializedThis,
        7 => {
            let class = pool
                .class_at(input.read_u16::<BigEndian>()?)
                .map_err(|err| malformed(err.to_string()))?;
            VerificationTypeInfo::Object(class)
        }
        8 => VerificationTypeInfo::Uninitialized(input.read_u16::<BigEndian>()?),
        other => return Err(malformed(format!("unknown verification type tag {}", other))),
    };
    Ok(info)
}

fn skip(input: &mut Cursor<&[u8]>, length: u64) -> Result<(), ReadError> {
    let remaining = input.get_ref().len() as u64 - input.position();
    if length > remaining {
        return Err(malformed("attribute length runs past end of file"));
    }
    input.set_position(input.position() + length);
    Ok(())
}

fn skip_attributes(input: &mut Cursor<&[u8]>) -> Result<(), ReadError> {
    let attribute_count = input.read_u16::<BigEndian>()?;
    for _ in 0..attribute_count {
        let _name = input.read_u16::<BigEndian>()?;
        let length = input.read_u32::<BigEndian>()?;
        skip(input, length as u64)?;
    }
    Ok(())
}
