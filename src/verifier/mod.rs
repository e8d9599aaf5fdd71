//! Bytecode verification
//!
//! Two engines share one abstract interpreter: [`TypeCheckingMethodVerifier`]
//! replays the stack map frames recorded in modern class files, while
//! [`TypeInferencingMethodVerifier`] computes frames as a dataflow fixpoint
//! for older ones. [`ClassVerifier`] picks an engine per class file version,
//! falls back from checking to inference where the configuration allows it,
//! and inlines subroutines away when inference finds any.

pub mod errors;
pub mod frame;
pub mod interpreter;
pub mod type_state;
pub mod types;

mod checking;
mod inference;
mod inliner;

pub use checking::TypeCheckingMethodVerifier;
pub use errors::{ErrorKind, VerifyError};
pub use inference::TypeInferencingMethodVerifier;
pub use inliner::SubroutineInliner;
pub use interpreter::MethodContext;
pub use types::{ClassGraph, VerificationType};

use crate::classfile::{ClassFile, CodeAttribute, MethodAccessFlags, MethodInfo, Version};

/// Policy knobs for [`ClassVerifier`]
pub struct VerifierConfig {
    /// When verification by type checking fails for a class of this version,
    /// may the class be retried with type inference? The default accepts
    /// exactly version 50, the one release where stack maps existed but
    /// failover was still part of the contract.
    pub legacy_fallback: fn(&Version) -> bool,
}

impl Default for VerifierConfig {
    fn default() -> VerifierConfig {
        VerifierConfig {
            legacy_fallback: |version| version.major == Version::JAVA6.major,
        }
    }
}

/// A method that passed verification
///
/// The code attribute is the rewritten one when subroutine inlining ran, and
/// carries a derived stack map table when the class file version wants one.
#[derive(Clone, Debug)]
pub struct VerifiedMethod {
    pub name: String,
    pub code: CodeAttribute,
}

/// Verifies all methods of a class against a class hierarchy
pub struct ClassVerifier<'a> {
    graph: &'a ClassGraph,
    config: VerifierConfig,
}

impl<'a> ClassVerifier<'a> {
    pub fn new(graph: &'a ClassGraph, config: VerifierConfig) -> ClassVerifier<'a> {
        ClassVerifier { graph, config }
    }

    pub fn verify_class(&self, class: &ClassFile) -> Result<Vec<VerifiedMethod>, VerifyError> {
        let mut verified = vec![];
        for method in &class.methods {
            match &method.code {
                Some(code) => verified.push(self.verify_method(class, method, code)?),
                None => {
                    let no_body = MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE;
                    if !method.access_flags.intersects(no_body) {
                        return Err(VerifyError::structural(format!(
                            "method {}.{} has no Code attribute",
                            class.name, method.name
                        )));
                    }
                }
            }
        }
        Ok(verified)
    }

    pub fn verify_method(
        &self,
        class: &ClassFile,
        method: &MethodInfo,
        code: &CodeAttribute,
    ) -> Result<VerifiedMethod, VerifyError> {
        let ctx = MethodContext {
            pool: &class.pool,
            graph: self.graph,
            class_name: &class.name,
            superclass: class.superclass.as_deref(),
            method_name: &method.name,
            descriptor: &method.descriptor,
            is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
            code,
        };

        if class.version.has_stack_maps() {
            match TypeCheckingMethodVerifier::new(ctx).and_then(|verifier| verifier.verify()) {
                Ok(()) => {
                    log::trace!("verified {} by type checking", ctx.method_display());
                    return Ok(VerifiedMethod {
                        name: method.name.clone(),
                        code: code.clone(),
                    });
                }
                Err(error) if (self.config.legacy_fallback)(&class.version) => {
                    log::debug!(
                        "type checking failed for {} ({}); retrying with type inference",
                        ctx.method_display(),
                        error
                    );
                    // The checking error describes the class file as written,
                    // so it wins if inference rejects the method too
                    return match self.verify_by_inference(ctx, class.version, &method.name) {
                        Ok(verified) => Ok(verified),
                        Err(inference_error) => {
                            log::debug!(
                                "type inference also failed for {} ({})",
                                ctx.method_display(),
                                inference_error
                            );
                            Err(error)
                        }
                    };
                }
                Err(error) => return Err(error),
            }
        }

        self.verify_by_inference(ctx, class.version, &method.name)
    }

    fn verify_by_inference(
        &self,
        ctx: MethodContext,
        version: Version,
        name: &str,
    ) -> Result<VerifiedMethod, VerifyError> {
        let mut verifier = TypeInferencingMethodVerifier::new(ctx)?;
        verifier.verify()?;

        if !verifier.has_subroutines() && !verifier.has_unvisited_code() {
            log::trace!("verified {} by type inference", ctx.method_display());
            let mut code = ctx.code.clone();
            if version.has_stack_maps() && code.stack_map_table.is_none() {
                code.stack_map_table = Some(verifier.generate_stack_map_table());
            }
            return Ok(VerifiedMethod {
                name: name.to_string(),
                code,
            });
        }

        // Subroutines and dead code are both rewritten away, then the result
        // has to hold up to verification on its own
        log::debug!("inlining subroutines in {}", ctx.method_display());
        let inlined = SubroutineInliner::new(&verifier, ctx).rewrite()?;
        let rewritten = MethodContext {
            code: &inlined,
            ..ctx
        };
        let mut reverifier = TypeInferencingMethodVerifier::new(rewritten)?;
        reverifier.verify()?;
        if reverifier.has_subroutines() {
            return Err(VerifyError::structural(
                "subroutines survived inlining",
            )
            .in_method(&ctx.method_display()));
        }
        let table = if version.has_stack_maps() {
            Some(reverifier.generate_stack_map_table())
        } else {
            None
        };
        let mut code = inlined;
        code.stack_map_table = table;
        Ok(VerifiedMethod {
            name: name.to_string(),
            code,
        })
    }
}
