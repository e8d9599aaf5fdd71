//! Bytecode decoding
//!
//! Instructions are decoded into a normalized [`Insn`] form: the `_0` to `_3`
//! shorthand forms, `bipush`/`sipush`, and `wide` prefixes all collapse into
//! the general variant carrying the operand.
//!
//! [Instruction set](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-6.html)

use crate::classfile::BaseType;
use crate::verifier::errors::VerifyError;

/// Raw opcode values
#[allow(dead_code)]
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ICONST_2: u8 = 0x05;
    pub const ICONST_3: u8 = 0x06;
    pub const ICONST_4: u8 = 0x07;
    pub const ICONST_5: u8 = 0x08;
    pub const LCONST_0: u8 = 0x09;
    pub const LCONST_1: u8 = 0x0A;
    pub const FCONST_0: u8 = 0x0B;
    pub const FCONST_1: u8 = 0x0C;
    pub const FCONST_2: u8 = 0x0D;
    pub const DCONST_0: u8 = 0x0E;
    pub const DCONST_1: u8 = 0x0F;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const LLOAD: u8 = 0x16;
    pub const FLOAD: u8 = 0x17;
    pub const DLOAD: u8 = 0x18;
    pub const ALOAD: u8 = 0x19;
    pub const ILOAD_0: u8 = 0x1A;
    pub const LLOAD_0: u8 = 0x1E;
    pub const FLOAD_0: u8 = 0x22;
    pub const DLOAD_0: u8 = 0x26;
    pub const ALOAD_0: u8 = 0x2A;
    pub const IALOAD: u8 = 0x2E;
    pub const LALOAD: u8 = 0x2F;
    pub const FALOAD: u8 = 0x30;
    pub const DALOAD: u8 = 0x31;
    pub const AALOAD: u8 = 0x32;
    pub const BALOAD: u8 = 0x33;
    pub const CALOAD: u8 = 0x34;
    pub const SALOAD: u8 = 0x35;
    pub const ISTORE: u8 = 0x36;
    pub const LSTORE: u8 = 0x37;
    pub const FSTORE: u8 = 0x38;
    pub const DSTORE: u8 = 0x39;
    pub const ASTORE: u8 = 0x3A;
    pub const ISTORE_0: u8 = 0x3B;
    pub const LSTORE_0: u8 = 0x3F;
    pub const FSTORE_0: u8 = 0x43;
    pub const DSTORE_0: u8 = 0x47;
    pub const ASTORE_0: u8 = 0x4B;
    pub const IASTORE: u8 = 0x4F;
    pub const LASTORE: u8 = 0x50;
    pub const FASTORE: u8 = 0x51;
    pub const DASTORE: u8 = 0x52;
    pub const AASTORE: u8 = 0x53;
    pub const BASTORE: u8 = 0x54;
    pub const CASTORE: u8 = 0x55;
    pub const SASTORE: u8 = 0x56;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const DUP_X1: u8 = 0x5A;
    pub const DUP_X2: u8 = 0x5B;
    pub const DUP2: u8 = 0x5C;
    pub const DUP2_X1: u8 = 0x5D;
    pub const DUP2_X2: u8 = 0x5E;
    pub const SWAP: u8 = 0x5F;
    pub const IADD: u8 = 0x60;
    pub const LADD: u8 = 0x61;
    pub const FADD: u8 = 0x62;
    pub const DADD: u8 = 0x63;
    pub const ISUB: u8 = 0x64;
    pub const LSUB: u8 = 0x65;
    pub const FSUB: u8 = 0x66;
    pub const DSUB: u8 = 0x67;
    pub const IMUL: u8 = 0x68;
    pub const LMUL: u8 = 0x69;
    pub const FMUL: u8 = 0x6A;
    pub const DMUL: u8 = 0x6B;
    pub const IDIV: u8 = 0x6C;
    pub const LDIV: u8 = 0x6D;
    pub const FDIV: u8 = 0x6E;
    pub const DDIV: u8 = 0x6F;
    pub const IREM: u8 = 0x70;
    pub const LREM: u8 = 0x71;
    pub const FREM: u8 = 0x72;
    pub const DREM: u8 = 0x73;
    pub const INEG: u8 = 0x74;
    pub const LNEG: u8 = 0x75;
    pub const FNEG: u8 = 0x76;
    pub const DNEG: u8 = 0x77;
    pub const ISHL: u8 = 0x78;
    pub const LSHL: u8 = 0x79;
    pub const ISHR: u8 = 0x7A;
    pub const LSHR: u8 = 0x7B;
    pub const IUSHR: u8 = 0x7C;
    pub const LUSHR: u8 = 0x7D;
    pub const IAND: u8 = 0x7E;
    pub const LAND: u8 = 0x7F;
    pub const IOR: u8 = 0x80;
    pub const LOR: u8 = 0x81;
    pub const IXOR: u8 = 0x82;
    pub const LXOR: u8 = 0x83;
    pub const IINC: u8 = 0x84;
    pub const I2L: u8 = 0x85;
    pub const I2F: u8 = 0x86;
    pub const I2D: u8 = 0x87;
    pub const L2I: u8 = 0x88;
    pub const L2F: u8 = 0x89;
    pub const L2D: u8 = 0x8A;
    pub const F2I: u8 = 0x8B;
    pub const F2L: u8 = 0x8C;
    pub const F2D: u8 = 0x8D;
    pub const D2I: u8 = 0x8E;
    pub const D2L: u8 = 0x8F;
    pub const D2F: u8 = 0x90;
    pub const I2B: u8 = 0x91;
    pub const I2C: u8 = 0x92;
    pub const I2S: u8 = 0x93;
    pub const LCMP: u8 = 0x94;
    pub const FCMPL: u8 = 0x95;
    pub const FCMPG: u8 = 0x96;
    pub const DCMPL: u8 = 0x97;
    pub const DCMPG: u8 = 0x98;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9A;
    pub const IFLT: u8 = 0x9B;
    pub const IFGE: u8 = 0x9C;
    pub const IFGT: u8 = 0x9D;
    pub const IFLE: u8 = 0x9E;
    pub const IF_ICMPEQ: u8 = 0x9F;
    pub const IF_ICMPNE: u8 = 0xA0;
    pub const IF_ICMPLT: u8 = 0xA1;
    pub const IF_ICMPGE: u8 = 0xA2;
    pub const IF_ICMPGT: u8 = 0xA3;
    pub const IF_ICMPLE: u8 = 0xA4;
    pub const IF_ACMPEQ: u8 = 0xA5;
    pub const IF_ACMPNE: u8 = 0xA6;
    pub const GOTO: u8 = 0xA7;
    pub const JSR: u8 = 0xA8;
    pub const RET: u8 = 0xA9;
    pub const TABLESWITCH: u8 = 0xAA;
    pub const LOOKUPSWITCH: u8 = 0xAB;
    pub const IRETURN: u8 = 0xAC;
    pub const LRETURN: u8 = 0xAD;
    pub const FRETURN: u8 = 0xAE;
    pub const DRETURN: u8 = 0xAF;
    pub const ARETURN: u8 = 0xB0;
    pub const RETURN: u8 = 0xB1;
    pub const GETSTATIC: u8 = 0xB2;
    pub const PUTSTATIC: u8 = 0xB3;
    pub const GETFIELD: u8 = 0xB4;
    pub const PUTFIELD: u8 = 0xB5;
    pub const INVOKEVIRTUAL: u8 = 0xB6;
    pub const INVOKESPECIAL: u8 = 0xB7;
    pub const INVOKESTATIC: u8 = 0xB8;
    pub const INVOKEINTERFACE: u8 = 0xB9;
    pub const INVOKEDYNAMIC: u8 = 0xBA;
    pub const NEW: u8 = 0xBB;
    pub const NEWARRAY: u8 = 0xBC;
    pub const ANEWARRAY: u8 = 0xBD;
    pub const ARRAYLENGTH: u8 = 0xBE;
    pub const ATHROW: u8 = 0xBF;
    pub const CHECKCAST: u8 = 0xC0;
    pub const INSTANCEOF: u8 = 0xC1;
    pub const MONITORENTER: u8 = 0xC2;
    pub const MONITOREXIT: u8 = 0xC3;
    pub const WIDE: u8 = 0xC4;
    pub const MULTIANEWARRAY: u8 = 0xC5;
    pub const IFNULL: u8 = 0xC6;
    pub const IFNONNULL: u8 = 0xC7;
    pub const GOTO_W: u8 = 0xC8;
    pub const JSR_W: u8 = 0xC9;
}

/// Integer comparison condition
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// Normalized instruction
///
/// Branch targets are absolute bytecode positions, already folded from the
/// encoded relative offsets.
#[derive(Clone, PartialEq, Debug)]
pub enum Insn {
    Nop,
    AConstNull,
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    Ldc(u16),
    Ldc2(u16),
    ILoad(u16),
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16),
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    IShl,
    LShl,
    IShr,
    LShr,
    IUShr,
    LUShr,
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16),
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
    /// `ifeq` family: int against zero
    If(Comparison, u32),
    IfICmp(Comparison, u32),
    /// `if_acmpeq` / `if_acmpne`
    IfACmp(bool, u32),
    /// `ifnull` / `ifnonnull`
    IfNull(bool, u32),
    Goto(u32),
    Jsr(u32),
    Ret(u16),
    TableSwitch {
        default: u32,
        low: i32,
        targets: Vec<u32>,
    },
    LookupSwitch {
        default: u32,
        pairs: Vec<(i32, u32)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    InvokeVirtual(u16),
    InvokeSpecial(u16),
    InvokeStatic(u16),
    InvokeInterface(u16, u8),
    InvokeDynamic(u16),
    New(u16),
    NewArray(BaseType),
    ANewArray(u16),
    ArrayLength,
    AThrow,
    CheckCast(u16),
    InstanceOf(u16),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(u16, u8),
}

impl Insn {
    /// Does control continue at the next instruction after this one executes?
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Insn::Goto(_)
                | Insn::Jsr(_)
                | Insn::Ret(_)
                | Insn::TableSwitch { .. }
                | Insn::LookupSwitch { .. }
                | Insn::IReturn
                | Insn::LReturn
                | Insn::FReturn
                | Insn::DReturn
                | Insn::AReturn
                | Insn::Return
                | Insn::AThrow
        )
    }

    /// Absolute positions this instruction can branch to (not counting fall
    /// through or thrown exceptions)
    pub fn branch_targets(&self) -> Vec<u32> {
        match self {
            Insn::If(_, target)
            | Insn::IfICmp(_, target)
            | Insn::IfACmp(_, target)
            | Insn::IfNull(_, target)
            | Insn::Goto(target)
            | Insn::Jsr(target) => vec![*target],
            Insn::TableSwitch { default, targets, .. } => {
                let mut all = vec![*default];
                all.extend_from_slice(targets);
                all
            }
            Insn::LookupSwitch { default, pairs } => {
                let mut all = vec![*default];
                all.extend(pairs.iter().map(|(_, target)| *target));
                all
            }
            _ => vec![],
        }
    }
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn truncated(&self) -> VerifyError {
        VerifyError::structural("code ends in the middle of an instruction")
    }

    fn u8(&mut self) -> Result<u8, VerifyError> {
        let byte = *self.code.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(byte)
    }

    fn i8(&mut self) -> Result<i8, VerifyError> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16, VerifyError> {
        Ok(((self.u8()? as u16) << 8) | self.u8()? as u16)
    }

    fn i16(&mut self) -> Result<i16, VerifyError> {
        Ok(self.u16()? as i16)
    }

    fn i32(&mut self) -> Result<i32, VerifyError> {
        Ok(((self.u16()? as u32) << 16 | self.u16()? as u32) as i32)
    }
}

fn target(base: u32, offset: i64) -> Result<u32, VerifyError> {
    let absolute = base as i64 + offset;
    if absolute < 0 || absolute > u32::MAX as i64 {
        return Err(VerifyError::structural(format!(
            "branch offset {} escapes the code array",
            offset
        )));
    }
    Ok(absolute as u32)
}

/// Decode the instruction starting at `position`, returning it along with its
/// encoded size in bytes
pub fn decode(code: &[u8], position: u32) -> Result<(Insn, u32), VerifyError> {
    use opcodes::*;

    let mut reader = Reader {
        code,
        pos: position as usize,
    };
    let opcode = reader.u8()?;
    let insn = match opcode {
        NOP => Insn::Nop,
        ACONST_NULL => Insn::AConstNull,
        ICONST_M1..=ICONST_5 => Insn::IConst(opcode as i32 - ICONST_0 as i32),
        LCONST_0 | LCONST_1 => Insn::LConst((opcode - LCONST_0) as i64),
        FCONST_0..=FCONST_2 => Insn::FConst((opcode - FCONST_0) as f32),
        DCONST_0 | DCONST_1 => Insn::DConst((opcode - DCONST_0) as f64),
        BIPUSH => Insn::IConst(reader.i8()? as i32),
        SIPUSH => Insn::IConst(reader.i16()? as i32),
        LDC => Insn::Ldc(reader.u8()? as u16),
        LDC_W => Insn::Ldc(reader.u16()?),
        LDC2_W => Insn::Ldc2(reader.u16()?),
        ILOAD => Insn::ILoad(reader.u8()? as u16),
        LLOAD => Insn::LLoad(reader.u8()? as u16),
        FLOAD => Insn::FLoad(reader.u8()? as u16),
        DLOAD => Insn::DLoad(reader.u8()? as u16),
        ALOAD => Insn::ALoad(reader.u8()? as u16),
        ILOAD_0..=0x1D => Insn::ILoad((opcode - ILOAD_0) as u16),
        LLOAD_0..=0x21 => Insn::LLoad((opcode - LLOAD_0) as u16),
        FLOAD_0..=0x25 => Insn::FLoad((opcode - FLOAD_0) as u16),
        DLOAD_0..=0x29 => Insn::DLoad((opcode - DLOAD_0) as u16),
        ALOAD_0..=0x2D => Insn::ALoad((opcode - ALOAD_0) as u16),
        IALOAD => Insn::IALoad,
        LALOAD => Insn::LALoad,
        FALOAD => Insn::FALoad,
        DALOAD => Insn::DALoad,
        AALOAD => Insn::AALoad,
        BALOAD => Insn::BALoad,
        CALOAD => Insn::CALoad,
        SALOAD => Insn::SALoad,
        ISTORE => Insn::IStore(reader.u8()? as u16),
        LSTORE => Insn::LStore(reader.u8()? as u16),
        FSTORE => Insn::FStore(reader.u8()? as u16),
        DSTORE => Insn::DStore(reader.u8()? as u16),
        ASTORE => Insn::AStore(reader.u8()? as u16),
        ISTORE_0..=0x3E => Insn::IStore((opcode - ISTORE_0) as u16),
        LSTORE_0..=0x42 => Insn::LStore((opcode - LSTORE_0) as u16),
        FSTORE_0..=0x46 => Insn::FStore((opcode - FSTORE_0) as u16),
        DSTORE_0..=0x4A => Insn::DStore((opcode - DSTORE_0) as u16),
        ASTORE_0..=0x4E => Insn::AStore((opcode - ASTORE_0) as u16),
        IASTORE => Insn::IAStore,
        LASTORE => Insn::LAStore,
        FASTORE => Insn::FAStore,
        DASTORE => Insn::DAStore,
        AASTORE => Insn::AAStore,
        BASTORE => Insn::BAStore,
        CASTORE => Insn::CAStore,
        SASTORE => Insn::SAStore,
        POP => Insn::Pop,
        POP2 => Insn::Pop2,
        DUP => Insn::Dup,
        DUP_X1 => Insn::DupX1,
        DUP_X2 => Insn::DupX2,
        DUP2 => Insn::Dup2,
        DUP2_X1 => Insn::Dup2X1,
        DUP2_X2 => Insn::Dup2X2,
        SWAP => Insn::Swap,
        IADD => Insn::IAdd,
        LADD => Insn::LAdd,
        FADD => Insn::FAdd,
        DADD => Insn::DAdd,
        ISUB => Insn::ISub,
        LSUB => Insn::LSub,
        FSUB => Insn::FSub,
        DSUB => Insn::DSub,
        IMUL => Insn::IMul,
        LMUL => Insn::LMul,
        FMUL => Insn::FMul,
        DMUL => Insn::DMul,
        IDIV => Insn::IDiv,
        LDIV => Insn::LDiv,
        FDIV => Insn::FDiv,
        DDIV => Insn::DDiv,
        IREM => Insn::IRem,
        LREM => Insn::LRem,
        FREM => Insn::FRem,
        DREM => Insn::DRem,
        INEG => Insn::INeg,
        LNEG => Insn::LNeg,
        FNEG => Insn::FNeg,
        DNEG => Insn::DNeg,
        ISHL => Insn::IShl,
        LSHL => Insn::LShl,
        ISHR => Insn::IShr,
        LSHR => Insn::LShr,
        IUSHR => Insn::IUShr,
        LUSHR => Insn::LUShr,
        IAND => Insn::IAnd,
        LAND => Insn::LAnd,
        IOR => Insn::IOr,
        LOR => Insn::LOr,
        IXOR => Insn::IXor,
        LXOR => Insn::LXor,
        IINC => Insn::IInc(reader.u8()? as u16, reader.i8()? as i16),
        I2L => Insn::I2L,
        I2F => Insn::I2F,
        I2D => Insn::I2D,
        L2I => Insn::L2I,
        L2F => Insn::L2F,
        L2D => Insn::L2D,
        F2I => Insn::F2I,
        F2L => Insn::F2L,
        F2D => Insn::F2D,
        D2I => Insn::D2I,
        D2L => Insn::D2L,
        D2F => Insn::D2F,
        I2B => Insn::I2B,
        I2C => Insn::I2C,
        I2S => Insn::I2S,
        LCMP => Insn::LCmp,
        FCMPL => Insn::FCmpL,
        FCMPG => Insn::FCmpG,
        DCMPL => Insn::DCmpL,
        DCMPG => Insn::DCmpG,
        IFEQ..=IFLE => {
            let comparison = comparison(opcode - IFEQ);
            Insn::If(comparison, target(position, reader.i16()? as i64)?)
        }
        IF_ICMPEQ..=IF_ICMPLE => {
            let comparison = comparison(opcode - IF_ICMPEQ);
            Insn::IfICmp(comparison, target(position, reader.i16()? as i64)?)
        }
        IF_ACMPEQ => Insn::IfACmp(true, target(position, reader.i16()? as i64)?),
        IF_ACMPNE => Insn::IfACmp(false, target(position, reader.i16()? as i64)?),
        GOTO => Insn::Goto(target(position, reader.i16()? as i64)?),
        JSR => Insn::Jsr(target(position, reader.i16()? as i64)?),
        RET => Insn::Ret(reader.u8()? as u16),
        TABLESWITCH => {
            // 0 to 3 alignment padding bytes before the default offset
            reader.pos += (4 - reader.pos % 4) % 4;
            let default = target(position, reader.i32()? as i64)?;
            let low = reader.i32()?;
            let high = reader.i32()?;
            if low > high {
                return Err(VerifyError::structural(format!(
                    "tableswitch has low {} above high {}",
                    low, high
                )));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > reader.code.len() {
                return Err(reader.truncated());
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(target(position, reader.i32()? as i64)?);
            }
            Insn::TableSwitch {
                default,
                low,
                targets,
            }
        }
        LOOKUPSWITCH => {
            reader.pos += (4 - reader.pos % 4) % 4;
            let default = target(position, reader.i32()? as i64)?;
            let count = reader.i32()?;
            if count < 0 || count as usize > reader.code.len() {
                return Err(VerifyError::structural(format!(
                    "lookupswitch has invalid pair count {}",
                    count
                )));
            }
            let mut pairs = Vec::with_capacity(count as usize);
            let mut previous_match: Option<i32> = None;
            for _ in 0..count {
                let matched = reader.i32()?;
                if previous_match.map_or(false, |previous| previous >= matched) {
                    return Err(VerifyError::structural(
                        "lookupswitch matches are not sorted",
                    ));
                }
                previous_match = Some(matched);
                pairs.push((matched, target(position, reader.i32()? as i64)?));
            }
            Insn::LookupSwitch { default, pairs }
        }
        IRETURN => Insn::IReturn,
        LRETURN => Insn::LReturn,
        FRETURN => Insn::FReturn,
        DRETURN => Insn::DReturn,
        ARETURN => Insn::AReturn,
        RETURN => Insn::Return,
        GETSTATIC => Insn::GetStatic(reader.u16()?),
        PUTSTATIC => Insn::PutStatic(reader.u16()?),
        GETFIELD => Insn::GetField(reader.u16()?),
        PUTFIELD => Insn::PutField(reader.u16()?),
        INVOKEVIRTUAL => Insn::InvokeVirtual(reader.u16()?),
        INVOKESPECIAL => Insn::InvokeSpecial(reader.u16()?),
        INVOKESTATIC => Insn::InvokeStatic(reader.u16()?),
        INVOKEINTERFACE => {
            let index = reader.u16()?;
            let count = reader.u8()?;
            let zero = reader.u8()?;
            if zero != 0 {
                return Err(VerifyError::structural(
                    "invokeinterface fourth operand byte must be zero",
                ));
            }
            Insn::InvokeInterface(index, count)
        }
        INVOKEDYNAMIC => {
            let index = reader.u16()?;
            if reader.u16()? != 0 {
                return Err(VerifyError::structural(
                    "invokedynamic trailing operand bytes must be zero",
                ));
            }
            Insn::InvokeDynamic(index)
        }
        NEW => Insn::New(reader.u16()?),
        NEWARRAY => {
            let element = match reader.u8()? {
                4 => BaseType::Boolean,
                5 => BaseType::Char,
                6 => BaseType::Float,
                7 => BaseType::Double,
                8 => BaseType::Byte,
                9 => BaseType::Short,
                10 => BaseType::Int,
                11 => BaseType::Long,
                other => {
                    return Err(VerifyError::structural(format!(
                        "invalid newarray element type {}",
                        other
                    )))
                }
            };
            Insn::NewArray(element)
        }
        ANEWARRAY => Insn::ANewArray(reader.u16()?),
        ARRAYLENGTH => Insn::ArrayLength,
        ATHROW => Insn::AThrow,
        CHECKCAST => Insn::CheckCast(reader.u16()?),
        INSTANCEOF => Insn::InstanceOf(reader.u16()?),
        MONITORENTER => Insn::MonitorEnter,
        MONITOREXIT => Insn::MonitorExit,
        WIDE => match reader.u8()? {
            ILOAD => Insn::ILoad(reader.u16()?),
            LLOAD => Insn::LLoad(reader.u16()?),
            FLOAD => Insn::FLoad(reader.u16()?),
            DLOAD => Insn::DLoad(reader.u16()?),
            ALOAD => Insn::ALoad(reader.u16()?),
            ISTORE => Insn::IStore(reader.u16()?),
            LSTORE => Insn::LStore(reader.u16()?),
            FSTORE => Insn::FStore(reader.u16()?),
            DSTORE => Insn::DStore(reader.u16()?),
            ASTORE => Insn::AStore(reader.u16()?),
            IINC => Insn::IInc(reader.u16()?, reader.i16()?),
            RET => Insn::Ret(reader.u16()?),
            other => {
                return Err(VerifyError::structural(format!(
                    "opcode 0x{:02X} cannot be widened",
                    other
                )))
            }
        },
        MULTIANEWARRAY => {
            let index = reader.u16()?;
            let dimensions = reader.u8()?;
            if dimensions == 0 {
                return Err(VerifyError::structural(
                    "multianewarray must have at least one dimension",
                ));
            }
            Insn::MultiANewArray(index, dimensions)
        }
        IFNULL => Insn::IfNull(true, target(position, reader.i16()? as i64)?),
        IFNONNULL => Insn::IfNull(false, target(position, reader.i16()? as i64)?),
        GOTO_W => Insn::Goto(target(position, reader.i32()? as i64)?),
        JSR_W => Insn::Jsr(target(position, reader.i32()? as i64)?),
        other => {
            return Err(VerifyError::structural(format!(
                "unknown opcode 0x{:02X}",
                other
            )))
        }
    };

    Ok((insn, (reader.pos as u32) - position))
}

fn comparison(index: u8) -> Comparison {
    match index {
        0 => Comparison::Eq,
        1 => Comparison::Ne,
        2 => Comparison::Lt,
        3 => Comparison::Ge,
        4 => Comparison::Gt,
        _ => Comparison::Le,
    }
}

#[cfg(test)]
mod test {
    use super::opcodes::*;
    use super::*;

    #[test]
    fn shorthand_forms_normalize() {
        let code = [ILOAD_0 + 2, ALOAD, 7, WIDE, ILOAD, 0x01, 0x00];
        assert_eq!(decode(&code, 0).unwrap(), (Insn::ILoad(2), 1));
        assert_eq!(decode(&code, 1).unwrap(), (Insn::ALoad(7), 2));
        assert_eq!(decode(&code, 3).unwrap(), (Insn::ILoad(256), 4));
    }

    #[test]
    fn branch_targets_are_absolute() {
        // goto -3 at position 5
        let code = [NOP, NOP, NOP, NOP, NOP, GOTO, 0xFF, 0xFD];
        assert_eq!(decode(&code, 5).unwrap(), (Insn::Goto(2), 3));

        let code = [GOTO, 0xFF, 0x00];
        assert!(decode(&code, 0).is_err()); // escapes the code array
    }

    #[test]
    fn tableswitch_padding() {
        // tableswitch at 0: opcode, 3 pad bytes, default 16, low 1, high 2,
        // then two 4-byte offsets
        let mut code = vec![TABLESWITCH, 0, 0, 0];
        code.extend_from_slice(&16i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&2i32.to_be_bytes());
        code.extend_from_slice(&20i32.to_be_bytes());
        code.extend_from_slice(&24i32.to_be_bytes());
        let (insn, size) = decode(&code, 0).unwrap();
        assert_eq!(size, 24);
        assert_eq!(
            insn,
            Insn::TableSwitch {
                default: 16,
                low: 1,
                targets: vec![20, 24],
            }
        );
    }

    #[test]
    fn lookupswitch_match_order() {
        let mut code = vec![LOOKUPSWITCH, 0, 0, 0];
        code.extend_from_slice(&12i32.to_be_bytes());
        code.extend_from_slice(&2i32.to_be_bytes());
        code.extend_from_slice(&5i32.to_be_bytes()); // match 5 before match 3
        code.extend_from_slice(&16i32.to_be_bytes());
        code.extend_from_slice(&3i32.to_be_bytes());
        code.extend_from_slice(&20i32.to_be_bytes());
        assert!(decode(&code, 0).is_err());
    }

    #[test]
    fn truncated_code() {
        assert!(decode(&[ILOAD], 0).is_err());
        assert!(decode(&[], 0).is_err());
    }
}
