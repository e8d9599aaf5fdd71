//! End to end verification of hand assembled methods, driven through
//! [`ClassVerifier`] the way `main` drives it.

use jverify::bytecode::{decode, Insn};
use jverify::classfile::{
    ClassAccessFlags, ClassFile, CodeAttribute, Constant, ConstantPool, ExceptionHandler,
    MethodAccessFlags, MethodDescriptor, MethodInfo, ParseDescriptor, StackMapFrame, Version,
};
use jverify::verifier::{ClassGraph, ClassVerifier, VerifiedMethod, VerifierConfig, VerifyError};

fn code(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> CodeAttribute {
    CodeAttribute {
        max_stack,
        max_locals,
        code: bytes,
        ..CodeAttribute::default()
    }
}

fn static_method(descriptor: &str, code: CodeAttribute) -> MethodInfo {
    MethodInfo {
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name: "run".to_string(),
        descriptor: MethodDescriptor::parse(descriptor).expect("invalid descriptor"),
        code: Some(code),
    }
}

fn sample_class(version: Version, methods: Vec<MethodInfo>) -> ClassFile {
    ClassFile {
        version,
        pool: ConstantPool::new(vec![Constant::Unusable]),
        access_flags: ClassAccessFlags::PUBLIC,
        name: "Sample".to_string(),
        superclass: Some("java/lang/Object".to_string()),
        interfaces: vec![],
        fields: vec![],
        methods,
    }
}

fn verify(class: &ClassFile) -> Result<Vec<VerifiedMethod>, VerifyError> {
    verify_with(class, VerifierConfig::default())
}

fn verify_with(
    class: &ClassFile,
    config: VerifierConfig,
) -> Result<Vec<VerifiedMethod>, VerifyError> {
    let mut graph = ClassGraph::new();
    graph.add_class("Sample", Some("java/lang/Object"), vec![], false);
    ClassVerifier::new(&graph, config).verify_class(class)
}

fn instructions(code: &[u8]) -> Vec<Insn> {
    let mut insns = vec![];
    let mut position = 0;
    while (position as usize) < code.len() {
        let (insn, size) = decode(code, position).expect("undecodable output");
        insns.push(insn);
        position += size;
    }
    insns
}

/// Conditional branch over a `nop`:
///
/// ```text
/// 0: iconst_0
/// 1: ifeq 5
/// 4: nop
/// 5: return
/// ```
fn branchy_code() -> Vec<u8> {
    vec![0x03, 0x99, 0x00, 0x04, 0x00, 0xB1]
}

#[test]
fn checking_requires_a_frame_at_every_branch_target() {
    let missing = sample_class(
        Version::JAVA8,
        vec![static_method("()V", code(1, 0, branchy_code()))],
    );
    let error = verify(&missing).expect_err("branch target has no frame");
    assert!(error.to_string().contains("branch target"), "{}", error);

    let mut with_frame = code(1, 0, branchy_code());
    with_frame.stack_map_table = Some(vec![StackMapFrame::Same { offset_delta: 5 }]);
    let ok = sample_class(Version::JAVA8, vec![static_method("()V", with_frame)]);
    let verified = verify(&ok).expect("frame at target makes the method verify");
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].name, "run");
}

#[test]
fn version_50_falls_back_to_inference() {
    // Same method, but no stack map table at all. Checking rejects it, and
    // the failover re-derives the table by inference.
    let class = sample_class(
        Version::JAVA6,
        vec![static_method("()V", code(1, 0, branchy_code()))],
    );

    let verified = verify(&class).expect("failover to inference");
    let table = verified[0].code.stack_map_table.as_ref();
    assert_eq!(
        table.expect("derived table"),
        &vec![StackMapFrame::Same { offset_delta: 5 }],
    );

    let strict = VerifierConfig {
        legacy_fallback: |_| false,
    };
    assert!(verify_with(&class, strict).is_err());
}

#[test]
fn version_52_never_falls_back() {
    let class = sample_class(
        Version::JAVA8,
        vec![static_method("()V", code(1, 0, branchy_code()))],
    );
    assert!(verify(&class).is_err());
}

#[test]
fn pre_stack_map_class_files_use_inference_directly() {
    let class = sample_class(
        Version::JAVA5,
        vec![static_method("()V", code(1, 0, branchy_code()))],
    );
    let verified = verify(&class).expect("inference accepts the method");
    assert!(verified[0].code.stack_map_table.is_none());
}

#[test]
fn merging_int_with_reference_poisons_the_local() {
    // Local 1 holds an int on one path and a reference on the other, so the
    // merged local is unusable and the final iload must fail.
    //
    // ```text
    //  0: iload_0
    //  1: ifeq 9
    //  4: iconst_1
    //  5: istore_1
    //  6: goto 12
    //  9: aconst_null
    // 10: astore_1
    // 11: nop
    // 12: iload_1
    // 13: return
    // ```
    let bytes = vec![
        0x1A, 0x99, 0x00, 0x08, 0x04, 0x3C, 0xA7, 0x00, 0x06, 0x01, 0x4C, 0x00, 0x1B, 0xB1,
    ];
    let class = sample_class(
        Version::JAVA5,
        vec![static_method("(I)V", code(1, 2, bytes))],
    );
    let error = verify(&class).expect_err("iload of a merged local");
    assert!(error.is_type_error(), "{}", error);
    assert!(error.to_string().contains("Sample.run"), "{}", error);
}

#[test]
fn fallback_keeps_the_checking_error_when_both_engines_reject() {
    // The poisoned-local method in a version 50 class file has no stack map
    // table, so checking rejects it, and inference rejects the iload of the
    // merged local. The error reported is the one checking produced.
    let bytes = vec![
        0x1A, 0x99, 0x00, 0x08, 0x04, 0x3C, 0xA7, 0x00, 0x06, 0x01, 0x4C, 0x00, 0x1B, 0xB1,
    ];
    let class = sample_class(
        Version::JAVA6,
        vec![static_method("(I)V", code(1, 2, bytes))],
    );
    let error = verify(&class).expect_err("both engines reject the method");
    assert!(!error.is_type_error(), "{}", error);
    assert!(error.to_string().contains("branch target"), "{}", error);
}

/// `jsr`/`ret` in the shape javac gave try/finally: the subroutine touches
/// locals 1 and 2 but not local 0, which must survive the call.
///
/// ```text
///  0: iconst_5
///  1: istore_0
///  2: jsr 7
///  5: iload_0
///  6: ireturn
///  7: astore_2
///  8: iconst_0
///  9: istore_1
/// 10: ret 2
/// ```
fn subroutine_code() -> Vec<u8> {
    vec![
        0x08, 0x3B, 0xA8, 0x00, 0x05, 0x1A, 0xAC, 0x4D, 0x03, 0x3C, 0xA9, 0x02,
    ]
}

#[test]
fn subroutines_are_inlined_away() {
    let class = sample_class(
        Version::JAVA5,
        vec![static_method("()I", code(2, 3, subroutine_code()))],
    );
    let verified = verify(&class).expect("subroutine method verifies");

    let rewritten = &verified[0].code;
    assert!(rewritten.stack_map_table.is_none());
    let insns = instructions(&rewritten.code);
    assert!(
        insns
            .iter()
            .all(|insn| !matches!(insn, Insn::Jsr(_) | Insn::Ret(_))),
        "jsr or ret survived inlining: {:?}",
        insns,
    );
    assert!(insns.iter().any(|insn| matches!(insn, Insn::IReturn)));
}

#[test]
fn call_sites_keep_their_own_types_in_untouched_locals() {
    // Local 0 holds an int at the first call and a reference at the second;
    // the subroutine never touches it, so each return site gets its own
    // caller's type back instead of the merged top.
    //
    // ```text
    //  0: iconst_0
    //  1: istore_0
    //  2: jsr 15
    //  5: iload_0
    //  6: pop
    //  7: aconst_null
    //  8: astore_0
    //  9: jsr 15
    // 12: aload_0
    // 13: pop
    // 14: return
    // 15: astore_1
    // 16: ret 1
    // ```
    let bytes = vec![
        0x03, 0x3B, 0xA8, 0x00, 0x0D, 0x1A, 0x57, 0x01, 0x4B, 0xA8, 0x00, 0x06, 0x2A, 0x57,
        0xB1, 0x4C, 0xA9, 0x01,
    ];
    let class = sample_class(Version::JAVA5, vec![static_method("()V", code(1, 2, bytes))]);
    let verified = verify(&class).expect("each site loads its own type");

    let insns = instructions(&verified[0].code.code);
    assert!(
        insns
            .iter()
            .all(|insn| !matches!(insn, Insn::Jsr(_) | Insn::Ret(_))),
        "jsr or ret survived inlining: {:?}",
        insns,
    );
}

#[test]
fn a_second_call_site_reaches_code_after_its_jsr() {
    // Two calls to one subroutine whose body merges before the ret. The
    // second call only learns the code after its jsr is reachable once the
    // already interpreted ret flows to the new return target.
    //
    // ```text
    //  0: jsr 8
    //  3: jsr 8
    //  6: iconst_0
    //  7: ireturn
    //  8: astore_1
    //  9: iconst_0
    // 10: ifeq 15
    // 13: iconst_0
    // 14: pop
    // 15: ret 1
    // ```
    let bytes = vec![
        0xA8, 0x00, 0x08, 0xA8, 0x00, 0x05, 0x03, 0xAC, 0x4C, 0x03, 0x99, 0x00, 0x05, 0x03,
        0x57, 0xA9, 0x01,
    ];
    let class = sample_class(Version::JAVA5, vec![static_method("()I", code(2, 2, bytes))]);
    let verified = verify(&class).expect("both call sites verify");

    let insns = instructions(&verified[0].code.code);
    assert!(
        insns
            .iter()
            .all(|insn| !matches!(insn, Insn::Jsr(_) | Insn::Ret(_))),
        "jsr or ret survived inlining: {:?}",
        insns,
    );
    assert!(insns.iter().any(|insn| matches!(insn, Insn::IReturn)));
}

#[test]
fn inlined_subroutines_get_a_stack_map_table() {
    // The same method in a version 50 class file fails checking (there is no
    // table), falls back to inference, and comes out inlined with a table
    // derived for the rewritten code.
    let class = sample_class(
        Version::JAVA6,
        vec![static_method("()I", code(2, 3, subroutine_code()))],
    );
    let verified = verify(&class).expect("failover inlines the subroutine");
    assert!(verified[0].code.stack_map_table.is_some());
}

#[test]
fn exception_handlers_survive_inlining() {
    // The subroutine method again, with the try region protected by a
    // finally style handler that rethrows.
    let mut bytes = subroutine_code();
    bytes.push(0xBF); // 12: athrow
    let mut attr = code(2, 3, bytes);
    attr.exception_handlers = vec![ExceptionHandler {
        start: 0,
        end: 7,
        handler: 12,
        catch_type: None,
    }];

    let class = sample_class(Version::JAVA5, vec![static_method("()I", attr)]);
    let verified = verify(&class).expect("handler projects through inlining");

    let rewritten = &verified[0].code;
    assert_eq!(rewritten.exception_handlers.len(), 1);
    let handler = &rewritten.exception_handlers[0];
    assert!(handler.catch_type.is_none());
    assert!(handler.end > handler.start);
    // The projected entry must land on an instruction boundary
    let mut position = 0;
    let mut on_boundary = false;
    while (position as usize) < rewritten.code.len() {
        if position == handler.handler as u32 {
            on_boundary = true;
        }
        let (_, size) = decode(&rewritten.code, position).expect("undecodable output");
        position += size;
    }
    assert!(on_boundary, "handler entry {} off boundary", handler.handler);
}

#[test]
fn execution_may_not_fall_off_the_end() {
    let class = sample_class(Version::JAVA5, vec![static_method("()V", code(0, 0, vec![0x00]))]);
    let error = verify(&class).expect_err("nop only method");
    assert!(error.to_string().contains("falls off"), "{}", error);
}

#[test]
fn returns_must_match_the_descriptor() {
    // `()V` method ending in `iconst_0; ireturn`
    let class = sample_class(
        Version::JAVA5,
        vec![static_method("()V", code(1, 0, vec![0x03, 0xAC]))],
    );
    let error = verify(&class).expect_err("ireturn from a void method");
    assert!(error.is_type_error(), "{}", error);
}

#[test]
fn methods_without_code_must_be_abstract_or_native() {
    let mut class = sample_class(Version::JAVA8, vec![]);
    class.methods.push(MethodInfo {
        access_flags: MethodAccessFlags::PUBLIC,
        name: "bodyless".to_string(),
        descriptor: MethodDescriptor::parse("()V").expect("invalid descriptor"),
        code: None,
    });
    assert!(verify(&class).is_err());

    class.methods[0].access_flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT;
    assert!(verify(&class).is_ok());
}
