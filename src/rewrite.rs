use anyhow::{Context, Result};

use crate::descriptor::lifts_receiver;
use crate::ir::{CallKind, CallSite, Instruction, Method};

/// Original call signature paired with its stack-compatible replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RewriteSpec {
    original: CallSite,
    replacement: CallSite,
}

impl RewriteSpec {
    /// Validate that swapping `original` for `replacement` leaves the operand
    /// stack shape unchanged.
    pub(crate) fn new(original: CallSite, replacement: CallSite) -> Result<Self> {
        let preserved = match (original.kind.has_receiver(), replacement.kind) {
            (true, CallKind::Static) => {
                lifts_receiver(&original.owner, &original.descriptor, &replacement.descriptor)
                    .with_context(|| format!("check rewrite {original} -> {replacement}"))?
            }
            (false, CallKind::Static) => original.descriptor == replacement.descriptor,
            _ => false,
        };
        if !preserved {
            anyhow::bail!(
                "rewrite {} -> {} changes the operand stack shape",
                original,
                replacement
            );
        }
        Ok(Self {
            original,
            replacement,
        })
    }

    /// `Pattern.matcher(CharSequence)` redirected to the static `CheckHelper.checkReg` helper.
    pub(crate) fn regex_matcher() -> Result<Self> {
        Self::new(
            CallSite::new(
                "java/util/regex/Pattern",
                "matcher",
                "(Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;",
                CallKind::Virtual,
            ),
            CallSite::new(
                "towdium/je_characters/CheckHelper",
                "checkReg",
                "(Ljava/util/regex/Pattern;Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;",
                CallKind::Static,
            ),
        )
    }

    pub(crate) fn original(&self) -> &CallSite {
        &self.original
    }

    pub(crate) fn replacement(&self) -> &CallSite {
        &self.replacement
    }
}

/// Replace every call to `spec.original` in `method` with `spec.replacement`.
///
/// Instructions keep their position and offset; non-matching instructions are
/// untouched. Returns the number of call sites replaced, so a second pass over
/// the same method returns zero.
pub(crate) fn rewrite_invocations(method: &mut Method, spec: &RewriteSpec) -> usize {
    let mut replaced = 0;
    for index in 0..method.instructions.len() {
        let matches = method.instructions[index]
            .call_site()
            .is_some_and(|call| *call == spec.original);
        if matches {
            let offset = method.instructions[index].offset;
            method.instructions[index] = Instruction::invoke(offset, spec.replacement.clone());
            replaced += 1;
        }
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{method_param_count, return_section};
    use crate::opcodes;

    fn method(instructions: Vec<Instruction>) -> Method {
        Method {
            name: "filter".to_string(),
            descriptor: "(Ljava/lang/String;)Z".to_string(),
            instructions,
        }
    }

    fn matcher_call(kind: CallKind) -> CallSite {
        CallSite::new(
            "java/util/regex/Pattern",
            "matcher",
            "(Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;",
            kind,
        )
    }

    #[test]
    fn rewrites_matching_call_and_leaves_others() {
        let spec = RewriteSpec::regex_matcher().expect("builtin spec");
        let before = vec![
            Instruction::other(0, opcodes::ALOAD_0),
            Instruction::invoke(1, matcher_call(CallKind::Virtual)),
            Instruction::other(4, opcodes::ARETURN),
        ];
        let mut target = method(before.clone());

        let replaced = rewrite_invocations(&mut target, &spec);

        assert_eq!(replaced, 1);
        assert_eq!(target.instructions.len(), 3);
        assert_eq!(target.instructions[0], before[0]);
        assert_eq!(target.instructions[2], before[2]);
        let rewritten = &target.instructions[1];
        assert_eq!(rewritten.offset, 1);
        assert_eq!(rewritten.opcode, opcodes::INVOKESTATIC);
        let call = rewritten.call_site().expect("invoke");
        assert_eq!(call.owner, "towdium/je_characters/CheckHelper");
        assert_eq!(call.name, "checkReg");
        assert_eq!(
            call.descriptor,
            "(Ljava/util/regex/Pattern;Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;"
        );
        assert_eq!(call.kind, CallKind::Static);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let spec = RewriteSpec::regex_matcher().expect("builtin spec");
        let mut target = method(vec![
            Instruction::invoke(0, matcher_call(CallKind::Virtual)),
            Instruction::other(3, opcodes::POP),
            Instruction::invoke(4, matcher_call(CallKind::Virtual)),
        ]);

        assert_eq!(rewrite_invocations(&mut target, &spec), 2);
        let once = target.clone();
        assert_eq!(rewrite_invocations(&mut target, &spec), 0);
        assert_eq!(target, once);
    }

    #[test]
    fn kind_is_part_of_the_signature() {
        let spec = RewriteSpec::regex_matcher().expect("builtin spec");
        let mut target = method(vec![Instruction::invoke(0, matcher_call(CallKind::Special))]);

        assert_eq!(rewrite_invocations(&mut target, &spec), 0);
        assert_eq!(
            target.instructions[0].call_site().map(|call| call.kind),
            Some(CallKind::Special)
        );
    }

    #[test]
    fn built_in_spec_preserves_stack_shape() {
        let validated = RewriteSpec::regex_matcher().expect("valid rewrite");

        let original = &validated.original().descriptor;
        let replacement = &validated.replacement().descriptor;
        assert_eq!(
            method_param_count(replacement).expect("count"),
            method_param_count(original).expect("count") + 1
        );
        assert_eq!(return_section(replacement), return_section(original));
    }

    #[test]
    fn rejects_shape_changing_rewrites() {
        let static_same_params = CallSite::new(
            "towdium/je_characters/CheckHelper",
            "checkReg",
            "(Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;",
            CallKind::Static,
        );
        assert!(RewriteSpec::new(matcher_call(CallKind::Virtual), static_same_params).is_err());

        let virtual_target = CallSite::new(
            "towdium/je_characters/CheckHelper",
            "checkReg",
            "(Ljava/util/regex/Pattern;Ljava/lang/CharSequence;)Ljava/util/regex/Matcher;",
            CallKind::Virtual,
        );
        assert!(RewriteSpec::new(matcher_call(CallKind::Virtual), virtual_target).is_err());
    }

    #[test]
    fn accepts_static_to_static_with_same_descriptor() {
        let original = CallSite::new("a/Util", "check", "(I)Z", CallKind::Static);
        let replacement = CallSite::new("b/Util", "check", "(I)Z", CallKind::Static);

        assert!(RewriteSpec::new(original, replacement).is_ok());
    }
}
