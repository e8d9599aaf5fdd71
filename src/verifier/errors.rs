use std::fmt;

/// What went wrong during verification
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Malformed input: invalid offsets, truncated code, inconsistent tables,
    /// bad constant pool references
    Structural(String),
    /// Type system violation detected by abstract interpretation
    Type(String),
    /// Rewritten code exceeds a class file encoding limit
    EncodingLimit(String),
}

impl ErrorKind {
    fn message(&self) -> &str {
        match self {
            ErrorKind::Structural(msg) | ErrorKind::Type(msg) | ErrorKind::EncodingLimit(msg) => {
                msg
            }
        }
    }
}

/// Verification failure
///
/// Carries the failing bytecode position and the method under verification
/// once those are known, so the rendered message reads
/// `at offset N in method M: ...`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VerifyError {
    pub kind: ErrorKind,
    /// Method being verified, as `Class.name(descriptor)`, when known
    pub method: Option<String>,
    /// Bytecode position, or -1 when the failure is not tied to one
    pub position: i32,
}

impl VerifyError {
    pub fn structural(msg: impl Into<String>) -> VerifyError {
        VerifyError {
            kind: ErrorKind::Structural(msg.into()),
            method: None,
            position: -1,
        }
    }

    pub fn type_error(msg: impl Into<String>) -> VerifyError {
        VerifyError {
            kind: ErrorKind::Type(msg.into()),
            method: None,
            position: -1,
        }
    }

    pub fn encoding_limit(msg: impl Into<String>) -> VerifyError {
        VerifyError {
            kind: ErrorKind::EncodingLimit(msg.into()),
            method: None,
            position: -1,
        }
    }

    /// Attach a bytecode position, unless one is already recorded
    pub fn at(mut self, position: u32) -> VerifyError {
        if self.position < 0 {
            self.position = position as i32;
        }
        self
    }

    /// Attach the method context, unless one is already recorded
    pub fn in_method(mut self, method: &str) -> VerifyError {
        if self.method.is_none() {
            self.method = Some(method.to_string());
        }
        self
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Type(_))
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = self.kind.message();
        match (&self.method, self.position) {
            (Some(method), position) if position >= 0 => {
                write!(f, "at offset {} in method {}: {}", position, method, msg)
            }
            (Some(method), _) => write!(f, "in method {}: {}", method, msg),
            (None, position) if position >= 0 => write!(f, "at offset {}: {}", position, msg),
            (None, _) => f.write_str(msg),
        }
    }
}

impl std::error::Error for VerifyError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rendering() {
        let err = VerifyError::type_error("cannot pop int as reference")
            .at(42)
            .in_method("Foo.bar(()V)");
        assert_eq!(
            err.to_string(),
            "at offset 42 in method Foo.bar(()V): cannot pop int as reference",
        );

        let bare = VerifyError::structural("code attribute has length 0");
        assert_eq!(bare.to_string(), "code attribute has length 0");
    }

    #[test]
    fn context_is_not_overwritten() {
        let err = VerifyError::type_error("boom").at(1).at(2).in_method("A.a(()V)");
        assert_eq!(err.position, 1);
        let err = err.in_method("B.b(()V)");
        assert_eq!(err.method.as_deref(), Some("A.a(()V)"));
    }
}
