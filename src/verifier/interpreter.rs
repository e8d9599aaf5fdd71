//! Abstract interpretation of one instruction over a [`Frame`]
//!
//! Both verification engines drive the same [`step`] routine; they differ
//! only in what happens at control flow seams, which go through the
//! [`Engine`] trait.

use super::errors::VerifyError;
use super::frame::Frame;
use super::types::{ClassGraph, VerificationType};
use crate::bytecode::{opcodes, Insn};
use crate::classfile::{
    BaseType, CodeAttribute, ConstantPool, Constant, FieldType, MethodDescriptor, RefType,
    RenderDescriptor,
};

/// Everything about the method under verification that both engines share
#[derive(Copy, Clone)]
pub struct MethodContext<'a> {
    pub pool: &'a ConstantPool,
    pub graph: &'a ClassGraph,
    pub class_name: &'a str,
    pub superclass: Option<&'a str>,
    pub method_name: &'a str,
    pub descriptor: &'a MethodDescriptor,
    pub is_static: bool,
    pub code: &'a CodeAttribute,
}

impl<'a> MethodContext<'a> {
    pub fn method_display(&self) -> String {
        format!(
            "{}.{}{}",
            self.class_name,
            self.method_name,
            self.descriptor.render()
        )
    }

    pub fn is_constructor(&self) -> bool {
        self.method_name == "<init>"
    }

    /// Class name referenced by the `new` instruction at `position`
    fn new_class_at(&self, position: u32) -> Result<RefType, VerifyError> {
        let position = position as usize;
        if self.code.code.get(position) != Some(&opcodes::NEW) || position + 2 >= self.code.code.len()
        {
            return Err(VerifyError::type_error(format!(
                "uninitialized value does not come from a new instruction at {}",
                position
            )));
        }
        let index =
            ((self.code.code[position + 1] as u16) << 8) | self.code.code[position + 2] as u16;
        self.pool.class_at(index)
    }
}

/// Hooks where the two engines diverge
pub trait Engine {
    fn frame(&self) -> &Frame;
    fn frame_mut(&mut self) -> &mut Frame;
    fn set_falls_through(&mut self, falls_through: bool);
    /// A local was read or written without going through `load`/`store`
    fn touch_local(&mut self, _index: u16, _width: u16) {}

    fn load(&mut self, expected: VerificationType, index: u16) -> Result<(), VerifyError>;
    fn store(
        &mut self,
        expected: VerificationType,
        index: u16,
        position: u32,
    ) -> Result<(), VerifyError>;
    fn branch(&mut self, target: u32) -> Result<(), VerifyError>;
    fn jsr(&mut self, target: u32, position: u32, next: u32) -> Result<(), VerifyError>;
    fn ret(&mut self, index: u16, position: u32) -> Result<(), VerifyError>;
}

fn pop_one(frame: &mut Frame) -> Result<VerificationType, VerifyError> {
    let value = frame.pop_slot()?;
    if value == VerificationType::Second || value.width() == 2 {
        return Err(VerifyError::type_error(format!(
            "expected a category 1 value on the stack, found {}",
            value
        )));
    }
    Ok(value)
}

/// Pop either one category 2 value or two category 1 values, returned bottom
/// to top for re-pushing
fn pop_pair(frame: &mut Frame) -> Result<Vec<VerificationType>, VerifyError> {
    let top = frame.pop_slot()?;
    if top == VerificationType::Second {
        let value = frame.pop_slot()?;
        if value.width() != 2 {
            return Err(VerifyError::type_error(
                "stack holds a stranded second word",
            ));
        }
        Ok(vec![value, VerificationType::Second])
    } else {
        let below = pop_one(frame)?;
        Ok(vec![below, top])
    }
}

fn push_slots(frame: &mut Frame, slots: &[VerificationType]) -> Result<(), VerifyError> {
    for slot in slots {
        frame.push_slot(slot.clone())?;
    }
    Ok(())
}

fn object(name: &str) -> VerificationType {
    VerificationType::object(name)
}

fn array_of(element: FieldType) -> VerificationType {
    VerificationType::Reference(RefType::array(element))
}

fn array_dimensions(ref_type: &RefType) -> usize {
    match ref_type {
        RefType::Object(_) => 0,
        RefType::Array(component) => match &**component {
            FieldType::Ref(inner) => 1 + array_dimensions(inner),
            FieldType::Base(_) => 1,
        },
    }
}

/// Interpret one decoded instruction against the engine's current frame
///
/// `next` is the position just after this instruction. On return the
/// engine's falls-through flag says whether execution continues there.
pub fn step<E: Engine>(
    engine: &mut E,
    ctx: &MethodContext,
    insn: &Insn,
    position: u32,
    next: u32,
) -> Result<(), VerifyError> {
    use VerificationType as T;

    let graph = ctx.graph;
    engine.set_falls_through(insn.falls_through());

    match insn {
        Insn::Nop => (),

        Insn::AConstNull => engine.frame_mut().push(T::Null)?,
        Insn::IConst(_) => engine.frame_mut().push(T::Integer)?,
        Insn::LConst(_) => engine.frame_mut().push(T::Long)?,
        Insn::FConst(_) => engine.frame_mut().push(T::Float)?,
        Insn::DConst(_) => engine.frame_mut().push(T::Double)?,

        Insn::Ldc(index) => {
            let pushed = match ctx.pool.get(*index)? {
                Constant::Integer(_) => T::Integer,
                Constant::Float(_) => T::Float,
                Constant::String(_) => object(RefType::STRING),
                Constant::Class(_) => object(RefType::CLASS),
                Constant::MethodHandle { .. } => object(RefType::METHOD_HANDLE),
                Constant::MethodType(_) => object(RefType::METHOD_TYPE),
                other => {
                    return Err(VerifyError::structural(format!(
                        "ldc of a {} constant at index {}",
                        other.tag_name(),
                        index
                    )))
                }
            };
            engine.frame_mut().push(pushed)?;
        }
        Insn::Ldc2(index) => {
            let pushed = match ctx.pool.get(*index)? {
                Constant::Long(_) => T::Long,
                Constant::Double(_) => T::Double,
                _ => {
                    return Err(VerifyError::structural(format!(
                        "ldc2_w must name a long or double constant, index {}",
                        index
                    )))
                }
            };
            engine.frame_mut().push(pushed)?;
        }

        Insn::ILoad(index) => engine.load(T::Integer, *index)?,
        Insn::LLoad(index) => engine.load(T::Long, *index)?,
        Insn::FLoad(index) => engine.load(T::Float, *index)?,
        Insn::DLoad(index) => engine.load(T::Double, *index)?,
        Insn::ALoad(index) => engine.load(T::AnyReference, *index)?,

        Insn::IStore(index) => engine.store(T::Integer, *index, position)?,
        Insn::LStore(index) => engine.store(T::Long, *index, position)?,
        Insn::FStore(index) => engine.store(T::Float, *index, position)?,
        Insn::DStore(index) => engine.store(T::Double, *index, position)?,
        Insn::AStore(index) => engine.store(T::AnyReference, *index, position)?,

        Insn::IALoad => array_load(engine, graph, &[BaseType::Int], T::Integer)?,
        Insn::LALoad => array_load(engine, graph, &[BaseType::Long], T::Long)?,
        Insn::FALoad => array_load(engine, graph, &[BaseType::Float], T::Float)?,
        Insn::DALoad => array_load(engine, graph, &[BaseType::Double], T::Double)?,
        Insn::BALoad => {
            array_load(engine, graph, &[BaseType::Byte, BaseType::Boolean], T::Integer)?
        }
        Insn::CALoad => array_load(engine, graph, &[BaseType::Char], T::Integer)?,
        Insn::SALoad => array_load(engine, graph, &[BaseType::Short], T::Integer)?,
        Insn::AALoad => {
            let frame = engine.frame_mut();
            frame.pop_with(&T::Integer, graph)?;
            let array = frame.pop_slot()?;
            let component = match &array {
                T::Null => T::Null,
                T::Reference(RefType::Array(component)) => match &**component {
                    FieldType::Ref(element) => T::Reference(element.clone()),
                    FieldType::Base(_) => {
                        return Err(VerifyError::type_error(format!(
                            "aaload from a primitive array {}",
                            array
                        )))
                    }
                },
                other => {
                    return Err(VerifyError::type_error(format!(
                        "aaload from non array value {}",
                        other
                    )))
                }
            };
            frame.push(component)?;
        }

        Insn::IAStore => array_store(engine, graph, &[BaseType::Int], T::Integer)?,
        Insn::LAStore => array_store(engine, graph, &[BaseType::Long], T::Long)?,
        Insn::FAStore => array_store(engine, graph, &[BaseType::Float], T::Float)?,
        Insn::DAStore => array_store(engine, graph, &[BaseType::Double], T::Double)?,
        Insn::BAStore => {
            array_store(engine, graph, &[BaseType::Byte, BaseType::Boolean], T::Integer)?
        }
        Insn::CAStore => array_store(engine, graph, &[BaseType::Char], T::Integer)?,
        Insn::SAStore => array_store(engine, graph, &[BaseType::Short], T::Integer)?,
        Insn::AAStore => {
            let frame = engine.frame_mut();
            // Component compatibility is a run time check
            frame.pop_with(&object(RefType::OBJECT), graph)?;
            frame.pop_with(&T::Integer, graph)?;
            let array = frame.pop_slot()?;
            match &array {
                T::Null => (),
                T::Reference(RefType::Array(component))
                    if matches!(&**component, FieldType::Ref(_)) => (),
                other => {
                    return Err(VerifyError::type_error(format!(
                        "aastore into non array value {}",
                        other
                    )))
                }
            }
        }

        Insn::Pop => {
            pop_one(engine.frame_mut())?;
        }
        Insn::Pop2 => {
            pop_pair(engine.frame_mut())?;
        }
        Insn::Dup => {
            let frame = engine.frame_mut();
            let value = pop_one(frame)?;
            push_slots(frame, &[value.clone(), value])?;
        }
        Insn::DupX1 => {
            let frame = engine.frame_mut();
            let v1 = pop_one(frame)?;
            let v2 = pop_one(frame)?;
            push_slots(frame, &[v1.clone(), v2, v1])?;
        }
        Insn::DupX2 => {
            let frame = engine.frame_mut();
            let v1 = pop_one(frame)?;
            let below = pop_pair(frame)?;
            frame.push_slot(v1.clone())?;
            push_slots(frame, &below)?;
            frame.push_slot(v1)?;
        }
        Insn::Dup2 => {
            let frame = engine.frame_mut();
            let pair = pop_pair(frame)?;
            push_slots(frame, &pair)?;
            push_slots(frame, &pair)?;
        }
        Insn::Dup2X1 => {
            let frame = engine.frame_mut();
            let pair = pop_pair(frame)?;
            let below = pop_one(frame)?;
            push_slots(frame, &pair)?;
            frame.push_slot(below)?;
            push_slots(frame, &pair)?;
        }
        Insn::Dup2X2 => {
            let frame = engine.frame_mut();
            let pair = pop_pair(frame)?;
            let below = pop_pair(frame)?;
            push_slots(frame, &pair)?;
            push_slots(frame, &below)?;
            push_slots(frame, &pair)?;
        }
        Insn::Swap => {
            let frame = engine.frame_mut();
            let v1 = pop_one(frame)?;
            let v2 = pop_one(frame)?;
            push_slots(frame, &[v1, v2])?;
        }

        Insn::IAdd | Insn::ISub | Insn::IMul | Insn::IDiv | Insn::IRem | Insn::IAnd
        | Insn::IOr | Insn::IXor => binary(engine, graph, T::Integer)?,
        Insn::LAdd | Insn::LSub | Insn::LMul | Insn::LDiv | Insn::LRem | Insn::LAnd
        | Insn::LOr | Insn::LXor => binary(engine, graph, T::Long)?,
        Insn::FAdd | Insn::FSub | Insn::FMul | Insn::FDiv | Insn::FRem => {
            binary(engine, graph, T::Float)?
        }
        Insn::DAdd | Insn::DSub | Insn::DMul | Insn::DDiv | Insn::DRem => {
            binary(engine, graph, T::Double)?
        }

        Insn::INeg | Insn::I2B | Insn::I2C | Insn::I2S => {
            unary(engine, graph, T::Integer, T::Integer)?
        }
        Insn::LNeg => unary(engine, graph, T::Long, T::Long)?,
        Insn::FNeg => unary(engine, graph, T::Float, T::Float)?,
        Insn::DNeg => unary(engine, graph, T::Double, T::Double)?,

        Insn::IShl | Insn::IShr | Insn::IUShr => binary(engine, graph, T::Integer)?,
        Insn::LShl | Insn::LShr | Insn::LUShr => {
            let frame = engine.frame_mut();
            frame.pop_with(&T::Integer, graph)?;
            frame.pop_with(&T::Long, graph)?;
            frame.push(T::Long)?;
        }

        Insn::IInc(index, _) => {
            engine.frame().load(&T::Integer, *index, graph)?;
            engine.touch_local(*index, 1);
        }

        Insn::I2L => unary(engine, graph, T::Integer, T::Long)?,
        Insn::I2F => unary(engine, graph, T::Integer, T::Float)?,
        Insn::I2D => unary(engine, graph, T::Integer, T::Double)?,
        Insn::L2I => unary(engine, graph, T::Long, T::Integer)?,
        Insn::L2F => unary(engine, graph, T::Long, T::Float)?,
        Insn::L2D => unary(engine, graph, T::Long, T::Double)?,
        Insn::F2I => unary(engine, graph, T::Float, T::Integer)?,
        Insn::F2L => unary(engine, graph, T::Float, T::Long)?,
        Insn::F2D => unary(engine, graph, T::Float, T::Double)?,
        Insn::D2I => unary(engine, graph, T::Double, T::Integer)?,
        Insn::D2L => unary(engine, graph, T::Double, T::Long)?,
        Insn::D2F => unary(engine, graph, T::Double, T::Float)?,

        Insn::LCmp => comparison(engine, graph, T::Long)?,
        Insn::FCmpL | Insn::FCmpG => comparison(engine, graph, T::Float)?,
        Insn::DCmpL | Insn::DCmpG => comparison(engine, graph, T::Double)?,

        Insn::If(_, target) => {
            engine.frame_mut().pop_with(&T::Integer, graph)?;
            engine.branch(*target)?;
        }
        Insn::IfICmp(_, target) => {
            engine.frame_mut().pop_with(&T::Integer, graph)?;
            engine.frame_mut().pop_with(&T::Integer, graph)?;
            engine.branch(*target)?;
        }
        Insn::IfACmp(_, target) => {
            engine.frame_mut().pop_with(&object(RefType::OBJECT), graph)?;
            engine.frame_mut().pop_with(&object(RefType::OBJECT), graph)?;
            engine.branch(*target)?;
        }
        Insn::IfNull(_, target) => {
            engine.frame_mut().pop_with(&object(RefType::OBJECT), graph)?;
            engine.branch(*target)?;
        }
        Insn::Goto(target) => engine.branch(*target)?,
        Insn::Jsr(target) => engine.jsr(*target, position, next)?,
        Insn::Ret(index) => engine.ret(*index, position)?,

        Insn::TableSwitch { default, targets, .. } => {
            engine.frame_mut().pop_with(&T::Integer, graph)?;
            engine.branch(*default)?;
            for target in targets {
                engine.branch(*target)?;
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            engine.frame_mut().pop_with(&T::Integer, graph)?;
            engine.branch(*default)?;
            for (_, target) in pairs {
                engine.branch(*target)?;
            }
        }

        Insn::IReturn => {
            return_base(ctx, "ireturn", &[
                BaseType::Int,
                BaseType::Byte,
                BaseType::Char,
                BaseType::Short,
                BaseType::Boolean,
            ])?;
            engine.frame_mut().pop_with(&T::Integer, graph)?;
        }
        Insn::LReturn => {
            return_base(ctx, "lreturn", &[BaseType::Long])?;
            engine.frame_mut().pop_with(&T::Long, graph)?;
        }
        Insn::FReturn => {
            return_base(ctx, "freturn", &[BaseType::Float])?;
            engine.frame_mut().pop_with(&T::Float, graph)?;
        }
        Insn::DReturn => {
            return_base(ctx, "dreturn", &[BaseType::Double])?;
            engine.frame_mut().pop_with(&T::Double, graph)?;
        }
        Insn::AReturn => {
            let expected = match &ctx.descriptor.return_type {
                Some(FieldType::Ref(ref_type)) => T::Reference(ref_type.clone()),
                _ => {
                    return Err(VerifyError::type_error(
                        "areturn in a method that does not return a reference",
                    ))
                }
            };
            engine.frame_mut().pop_with(&expected, graph)?;
        }
        Insn::Return => {
            if ctx.descriptor.return_type.is_some() {
                return Err(VerifyError::type_error(
                    "return in a method that returns a value",
                ));
            }
            if ctx.is_constructor()
                && ctx.class_name != RefType::OBJECT
                && engine.frame().contains(&T::UninitializedThis)
            {
                return Err(VerifyError::type_error(
                    "constructor returns without calling a superclass constructor",
                ));
            }
        }

        Insn::GetStatic(index) => {
            let field = ctx.pool.field_at(*index)?;
            engine
                .frame_mut()
                .push(T::of_field(&field.descriptor))?;
        }
        Insn::PutStatic(index) => {
            let field = ctx.pool.field_at(*index)?;
            engine
                .frame_mut()
                .pop_with(&T::of_field(&field.descriptor), graph)?;
        }
        Insn::GetField(index) => {
            let field = ctx.pool.field_at(*index)?;
            let descriptor = field.descriptor.render();
            let receiver = engine
                .frame_mut()
                .pop_with(&T::Reference(field.class.clone()), graph)?;
            protected_access_check(ctx, &field.class, &field.name, &descriptor, &receiver)?;
            engine.frame_mut().push(T::of_field(&field.descriptor))?;
        }
        Insn::PutField(index) => {
            let field = ctx.pool.field_at(*index)?;
            let descriptor = field.descriptor.render();
            engine
                .frame_mut()
                .pop_with(&T::of_field(&field.descriptor), graph)?;
            // A constructor may store to its own fields before calling super
            let this_field = field.class == RefType::Object(ctx.class_name.to_string());
            if this_field && engine.frame().top() == Some(&T::UninitializedThis) {
                engine.frame_mut().pop_slot()?;
            } else {
                let receiver = engine
                    .frame_mut()
                    .pop_with(&T::Reference(field.class.clone()), graph)?;
                protected_access_check(ctx, &field.class, &field.name, &descriptor, &receiver)?;
            }
        }

        Insn::InvokeVirtual(index) => {
            let method = ctx.pool.method_at(*index)?;
            check_invocable(&method.name, "invokevirtual")?;
            pop_arguments(engine.frame_mut(), graph, &method.descriptor)?;
            let receiver = engine
                .frame_mut()
                .pop_with(&T::Reference(method.class.clone()), graph)?;
            let descriptor = method.descriptor.render();
            protected_access_check(ctx, &method.class, &method.name, &descriptor, &receiver)?;
            push_return(engine.frame_mut(), &method.descriptor)?;
        }
        Insn::InvokeSpecial(index) => {
            let method = ctx.pool.method_at(*index)?;
            if method.name == "<clinit>" {
                return Err(VerifyError::structural("cannot invoke <clinit>"));
            }
            pop_arguments(engine.frame_mut(), graph, &method.descriptor)?;
            if method.name == "<init>" {
                if method.descriptor.return_type.is_some() {
                    return Err(VerifyError::structural("<init> must return void"));
                }
                invoke_constructor(engine, ctx, &method.class)?;
            } else {
                engine
                    .frame_mut()
                    .pop_with(&object(ctx.class_name), graph)?;
                push_return(engine.frame_mut(), &method.descriptor)?;
            }
        }
        Insn::InvokeStatic(index) => {
            let method = ctx.pool.method_at(*index)?;
            check_invocable(&method.name, "invokestatic")?;
            pop_arguments(engine.frame_mut(), graph, &method.descriptor)?;
            push_return(engine.frame_mut(), &method.descriptor)?;
        }
        Insn::InvokeInterface(index, count) => {
            let method = ctx.pool.method_at(*index)?;
            check_invocable(&method.name, "invokeinterface")?;
            let expected_count = method.descriptor.parameter_length(true);
            if *count as usize != expected_count {
                return Err(VerifyError::structural(format!(
                    "invokeinterface count operand is {} but the signature needs {}",
                    count, expected_count
                )));
            }
            pop_arguments(engine.frame_mut(), graph, &method.descriptor)?;
            engine
                .frame_mut()
                .pop_with(&T::Reference(method.class.clone()), graph)?;
            push_return(engine.frame_mut(), &method.descriptor)?;
        }
        Insn::InvokeDynamic(index) => {
            let descriptor = ctx.pool.invoke_dynamic_at(*index)?;
            pop_arguments(engine.frame_mut(), graph, &descriptor)?;
            push_return(engine.frame_mut(), &descriptor)?;
        }

        Insn::New(index) => {
            let class = ctx.pool.class_at(*index)?;
            if matches!(class, RefType::Array(_)) {
                return Err(VerifyError::structural("new cannot make an array"));
            }
            let placeholder = T::Uninitialized(position);
            let frame = engine.frame_mut();
            if frame.stack_contains(&placeholder) {
                return Err(VerifyError::type_error(format!(
                    "uninitialized value from the new at {} is already on the stack",
                    position
                )));
            }
            // Any stale local from an earlier pass over this new dies here
            frame.replace_locals(&placeholder, &T::Top);
            frame.push(placeholder)?;
        }
        Insn::NewArray(element) => {
            let frame = engine.frame_mut();
            frame.pop_with(&T::Integer, graph)?;
            frame.push(array_of(FieldType::Base(*element)))?;
        }
        Insn::ANewArray(index) => {
            let component = ctx.pool.class_at(*index)?;
            let frame = engine.frame_mut();
            frame.pop_with(&T::Integer, graph)?;
            frame.push(array_of(FieldType::Ref(component)))?;
        }
        Insn::MultiANewArray(index, dimensions) => {
            let class = ctx.pool.class_at(*index)?;
            if array_dimensions(&class) < *dimensions as usize {
                return Err(VerifyError::structural(format!(
                    "multianewarray of {} dimensions on type {}",
                    dimensions,
                    class.render()
                )));
            }
            let frame = engine.frame_mut();
            for _ in 0..*dimensions {
                frame.pop_with(&T::Integer, graph)?;
            }
            frame.push(T::Reference(class))?;
        }
        Insn::ArrayLength => {
            let frame = engine.frame_mut();
            let array = frame.pop_slot()?;
            match array {
                T::Null | T::Reference(RefType::Array(_)) => (),
                other => {
                    return Err(VerifyError::type_error(format!(
                        "arraylength of non array value {}",
                        other
                    )))
                }
            }
            frame.push(T::Integer)?;
        }

        Insn::AThrow => {
            engine
                .frame_mut()
                .pop_with(&object(RefType::THROWABLE), graph)?;
        }
        Insn::CheckCast(index) => {
            let class = ctx.pool.class_at(*index)?;
            let frame = engine.frame_mut();
            frame.pop_with(&object(RefType::OBJECT), graph)?;
            frame.push(T::Reference(class))?;
        }
        Insn::InstanceOf(index) => {
            ctx.pool.class_at(*index)?;
            let frame = engine.frame_mut();
            frame.pop_with(&object(RefType::OBJECT), graph)?;
            frame.push(T::Integer)?;
        }
        Insn::MonitorEnter | Insn::MonitorExit => {
            engine
                .frame_mut()
                .pop_with(&object(RefType::OBJECT), graph)?;
        }
    }

    Ok(())
}

fn binary<E: Engine>(
    engine: &mut E,
    graph: &ClassGraph,
    operand: VerificationType,
) -> Result<(), VerifyError> {
    let frame = engine.frame_mut();
    frame.pop_with(&operand, graph)?;
    frame.pop_with(&operand, graph)?;
    frame.push(operand)
}

fn unary<E: Engine>(
    engine: &mut E,
    graph: &ClassGraph,
    from: VerificationType,
    to: VerificationType,
) -> Result<(), VerifyError> {
    let frame = engine.frame_mut();
    frame.pop_with(&from, graph)?;
    frame.push(to)
}

fn comparison<E: Engine>(
    engine: &mut E,
    graph: &ClassGraph,
    operand: VerificationType,
) -> Result<(), VerifyError> {
    let frame = engine.frame_mut();
    frame.pop_with(&operand, graph)?;
    frame.pop_with(&operand, graph)?;
    frame.push(VerificationType::Integer)
}

fn array_load<E: Engine>(
    engine: &mut E,
    graph: &ClassGraph,
    elements: &[BaseType],
    pushed: VerificationType,
) -> Result<(), VerifyError> {
    let frame = engine.frame_mut();
    frame.pop_with(&VerificationType::Integer, graph)?;
    expect_primitive_array(frame, elements)?;
    frame.push(pushed)
}

fn array_store<E: Engine>(
    engine: &mut E,
    graph: &ClassGraph,
    elements: &[BaseType],
    value: VerificationType,
) -> Result<(), VerifyError> {
    let frame = engine.frame_mut();
    frame.pop_with(&value, graph)?;
    frame.pop_with(&VerificationType::Integer, graph)?;
    expect_primitive_array(frame, elements)
}

fn expect_primitive_array(
    frame: &mut Frame,
    elements: &[BaseType],
) -> Result<(), VerifyError> {
    let array = frame.pop_slot()?;
    match &array {
        VerificationType::Null => Ok(()),
        VerificationType::Reference(RefType::Array(component))
            if matches!(&**component, FieldType::Base(base) if elements.contains(base)) =>
        {
            Ok(())
        }
        other => Err(VerifyError::type_error(format!(
            "expected an array of {:?}, found {}",
            elements, other
        ))),
    }
}

fn return_base(
    ctx: &MethodContext,
    mnemonic: &str,
    allowed: &[BaseType],
) -> Result<(), VerifyError> {
    match &ctx.descriptor.return_type {
        Some(FieldType::Base(base)) if allowed.contains(base) => Ok(()),
        _ => Err(VerifyError::type_error(format!(
            "{} does not match the declared return type",
            mnemonic
        ))),
    }
}

fn check_invocable(name: &str, mnemonic: &str) -> Result<(), VerifyError> {
    if name.starts_with('<') {
        return Err(VerifyError::structural(format!(
            "{} cannot invoke {}",
            mnemonic, name
        )));
    }
    Ok(())
}

fn pop_arguments(
    frame: &mut Frame,
    graph: &ClassGraph,
    descriptor: &MethodDescriptor,
) -> Result<(), VerifyError> {
    for parameter in descriptor.parameters.iter().rev() {
        frame.pop_with(&VerificationType::of_field(parameter), graph)?;
    }
    Ok(())
}

fn push_return(frame: &mut Frame, descriptor: &MethodDescriptor) -> Result<(), VerifyError> {
    if let Some(return_type) = &descriptor.return_type {
        frame.push(VerificationType::of_field(return_type))?;
    }
    Ok(())
}

/// `invokespecial` of `<init>`: consume the uninitialized receiver and widen
/// every copy of it to the initialized type
fn invoke_constructor<E: Engine>(
    engine: &mut E,
    ctx: &MethodContext,
    target: &RefType,
) -> Result<(), VerifyError> {
    let receiver = engine.frame_mut().pop_slot()?;
    match receiver {
        VerificationType::Uninitialized(new_position) => {
            let class = ctx.new_class_at(new_position)?;
            if class != *target {
                return Err(VerifyError::type_error(format!(
                    "constructor of {} invoked on an instance of {}",
                    target.render(),
                    class.render()
                )));
            }
            let initialized = VerificationType::Reference(class);
            engine
                .frame_mut()
                .replace_all(&receiver, &initialized);
        }
        VerificationType::UninitializedThis => {
            let valid_target = *target == RefType::Object(ctx.class_name.to_string())
                || ctx
                    .superclass
                    .map_or(false, |superclass| *target == RefType::Object(superclass.to_string()));
            if !valid_target {
                return Err(VerifyError::type_error(
                    "constructor call on this must target the current class or its superclass",
                ));
            }
            let initialized = VerificationType::object(ctx.class_name);
            engine
                .frame_mut()
                .replace_all(&VerificationType::UninitializedThis, &initialized);
        }
        other => {
            return Err(VerifyError::type_error(format!(
                "constructor invoked on initialized value {}",
                other
            )))
        }
    }
    Ok(())
}

/// Access to a protected member of a superclass in another package is only
/// sound when the receiver is at least of the current class
fn protected_access_check(
    ctx: &MethodContext,
    holder: &RefType,
    name: &str,
    descriptor: &str,
    receiver: &VerificationType,
) -> Result<(), VerifyError> {
    let holder_name = match holder {
        RefType::Object(name) => name.as_str(),
        RefType::Array(_) => return Ok(()),
    };
    let is_superclass = ctx
        .graph
        .superchain(ctx.class_name)
        .skip(1)
        .any(|ancestor| ancestor == holder_name);
    if !is_superclass
        || !ctx.graph.is_protected_member(holder_name, name, descriptor)
        || ClassGraph::package_of(holder_name) == ClassGraph::package_of(ctx.class_name)
    {
        return Ok(());
    }
    let current = VerificationType::object(ctx.class_name);
    if !current.is_assignable_from(receiver, ctx.graph) {
        return Err(VerifyError::type_error(format!(
            "protected member {}.{} accessed through a receiver of type {}",
            holder_name, name, receiver
        )));
    }
    Ok(())
}
