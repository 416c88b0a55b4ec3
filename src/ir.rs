use std::fmt;

use crate::opcodes;

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Unit {
    pub(crate) name: String,
    pub(crate) methods: Vec<Method>,
}

/// Intermediate representation for a method and its decoded instruction stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) instructions: Vec<Instruction>,
}

/// Bytecode instruction captured from a method body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

/// Instruction kinds relevant to call-site rewriting and detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum InstructionKind {
    Invoke(CallSite),
    Other,
}

/// Exact signature of an invocation: owner, name, descriptor and call kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl Unit {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }
}

impl Method {
    /// Identifier used in scan reports: `unit:method:descriptor`.
    pub(crate) fn match_id(&self, unit_name: &str) -> String {
        format!("{}:{}:{}", unit_name, self.name, self.descriptor)
    }
}

impl Instruction {
    pub(crate) fn invoke(offset: u32, call: CallSite) -> Self {
        Self {
            offset,
            opcode: call.kind.opcode(),
            kind: InstructionKind::Invoke(call),
        }
    }

    pub(crate) fn other(offset: u32, opcode: u8) -> Self {
        Self {
            offset,
            opcode,
            kind: InstructionKind::Other,
        }
    }

    pub(crate) fn call_site(&self) -> Option<&CallSite> {
        match &self.kind {
            InstructionKind::Invoke(call) => Some(call),
            InstructionKind::Other => None,
        }
    }
}

impl CallSite {
    pub(crate) fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        kind: CallKind,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            kind,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}{}",
            self.kind.mnemonic(),
            self.owner,
            self.name,
            self.descriptor
        )
    }
}

impl CallKind {
    pub(crate) fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            opcodes::INVOKEVIRTUAL => Some(CallKind::Virtual),
            opcodes::INVOKESPECIAL => Some(CallKind::Special),
            opcodes::INVOKESTATIC => Some(CallKind::Static),
            opcodes::INVOKEINTERFACE => Some(CallKind::Interface),
            _ => None,
        }
    }

    pub(crate) fn opcode(self) -> u8 {
        match self {
            CallKind::Virtual => opcodes::INVOKEVIRTUAL,
            CallKind::Special => opcodes::INVOKESPECIAL,
            CallKind::Static => opcodes::INVOKESTATIC,
            CallKind::Interface => opcodes::INVOKEINTERFACE,
        }
    }

    /// Whether the call consumes an implicit receiver from the operand stack.
    pub(crate) fn has_receiver(self) -> bool {
        !matches!(self, CallKind::Static)
    }

    fn mnemonic(self) -> &'static str {
        match self {
            CallKind::Virtual => "invokevirtual",
            CallKind::Special => "invokespecial",
            CallKind::Static => "invokestatic",
            CallKind::Interface => "invokeinterface",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_kind_round_trips_through_opcode() {
        for kind in [
            CallKind::Virtual,
            CallKind::Interface,
            CallKind::Special,
            CallKind::Static,
        ] {
            assert_eq!(CallKind::from_opcode(kind.opcode()), Some(kind));
        }
        assert_eq!(CallKind::from_opcode(opcodes::NOP), None);
    }

    #[test]
    fn match_id_joins_unit_method_and_descriptor() {
        let method = Method {
            name: "run".to_string(),
            descriptor: "(Ljava/lang/String;)Z".to_string(),
            instructions: Vec::new(),
        };

        assert_eq!(
            method.match_id("com/example/App"),
            "com/example/App:run:(Ljava/lang/String;)Z"
        );
    }

    #[test]
    fn call_site_display_uses_mnemonic() {
        let call = CallSite::new(
            "java/lang/String",
            "contains",
            "(Ljava/lang/CharSequence;)Z",
            CallKind::Virtual,
        );

        assert_eq!(
            call.to_string(),
            "invokevirtual java/lang/String.contains(Ljava/lang/CharSequence;)Z"
        );
    }
}
