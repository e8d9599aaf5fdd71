//! Verifier for JVM class file bytecode
//!
//! The [`classfile`] module reads the binary format, [`bytecode`] decodes
//! instructions, and [`verifier`] holds the two verification engines along
//! with the subroutine inliner that bridges between them.

pub mod bytecode;
pub mod classfile;
pub mod verifier;
